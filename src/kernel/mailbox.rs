use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::Message;

/// A bounded FIFO of messages owned by exactly one processor.
///
/// `offer` is callable from any thread and never blocks; `poll` is called
/// only by the worker currently executing the processor. Capacity is
/// fixed at creation and the queue never drops or overwrites accepted
/// messages.
pub struct Mailbox {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Mailbox { tx, rx, capacity }
    }

    /// Enqueue without blocking; `false` when the mailbox is full.
    pub fn offer(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Dequeue the head message, waiting up to `timeout` for one to
    /// arrive. A zero timeout polls without waiting.
    pub fn poll(&self, timeout: Duration) -> Option<Message> {
        if timeout.as_nanos() == 0 {
            self.rx.try_recv().ok()
        } else {
            self.rx.recv_timeout(timeout).ok()
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn offer_fails_when_full_and_poll_frees_one_slot() {
        let mbox = Mailbox::new(2);

        assert!(mbox.offer(Message::user(1u32)));
        assert!(mbox.offer(Message::user(2u32)));
        assert!(!mbox.offer(Message::user(3u32)));
        assert_eq!(mbox.len(), 2);

        assert!(mbox.poll(Duration::from_millis(0)).is_some());
        assert!(mbox.offer(Message::user(3u32)));
        assert!(!mbox.offer(Message::user(4u32)));
    }

    #[test]
    fn poll_preserves_offer_order() {
        let mbox = Mailbox::new(8);
        for i in 0..8u32 {
            assert!(mbox.offer(Message::user(i)));
        }
        for i in 0..8u32 {
            let msg = mbox.poll(Duration::from_millis(0)).unwrap();
            match msg {
                Message::User(m) => assert_eq!(*m.downcast_ref::<u32>().unwrap(), i),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert!(mbox.is_empty());
    }

    #[test]
    fn poll_times_out_on_empty() {
        let mbox = Mailbox::new(1);
        assert!(mbox.poll(Duration::from_millis(0)).is_none());
        assert!(mbox.poll(Duration::from_millis(5)).is_none());
    }
}
