use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use slog::Logger;

use crate::engine::{
    Broadcast, Channel, SetSubscription, Subscribe, SubscriptionsMsg, Unsubscribe, UnsubscribeAll,
};
use crate::kernel::Mailbox;
use crate::processor::ProcessorCell;
use crate::{AnyMessage, Message, Payload};

/// A cloneable handle to a registered processor.
///
/// Posting never blocks: `post` returns `false` when the mailbox is full
/// and callers decide their own back-pressure policy. The pub/sub
/// conveniences merely post the corresponding command to the engine's
/// subscriptions processor.
#[derive(Clone)]
pub struct ProcessorRef {
    pub(crate) cell: Arc<ProcessorCell>,
}

impl ProcessorRef {
    pub fn id(&self) -> &str {
        &self.cell.id
    }

    pub fn dispatcher(&self) -> &str {
        &self.cell.dispatcher
    }

    /// Mailbox capacity, fixed at registration.
    pub fn queue_size(&self) -> usize {
        self.cell.mailbox.capacity()
    }

    /// Number of messages currently queued.
    pub fn current_queue_size(&self) -> usize {
        self.cell.mailbox.len()
    }

    pub fn parent(&self) -> Option<&ProcessorRef> {
        self.cell.parent.as_ref()
    }

    /// Enqueue a message; `false` when the mailbox is full.
    pub fn post(&self, msg: impl Into<Message>) -> bool {
        self.cell.mailbox.offer(msg.into())
    }

    /// Join the given channels. The subscriptions processor replies with
    /// `Message::Subscribed` carrying the resulting membership.
    pub fn subscribe<I>(&self, channels: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<Channel>,
    {
        self.send_subscriptions(SubscriptionsMsg::Subscribe(Subscribe {
            processor: self.clone(),
            channels: collect(channels),
        }))
    }

    /// Make the channel membership exactly `channels`.
    pub fn set_subscription<I>(&self, channels: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<Channel>,
    {
        self.send_subscriptions(SubscriptionsMsg::SetSubscription(SetSubscription {
            processor: self.clone(),
            channels: collect(channels),
        }))
    }

    pub fn unsubscribe<I>(&self, channels: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<Channel>,
    {
        self.send_subscriptions(SubscriptionsMsg::Unsubscribe(Unsubscribe {
            processor: self.clone(),
            channels: collect(channels),
        }))
    }

    pub fn unsubscribe_all(&self) -> bool {
        self.send_subscriptions(SubscriptionsMsg::UnsubscribeAll(UnsubscribeAll {
            processor: self.clone(),
        }))
    }

    /// Publish `msg` to every subscriber of the given channels. Failed
    /// deliveries come back to this processor as `Message::NotDelivered`.
    pub fn broadcast<I, T>(&self, channels: I, msg: T) -> bool
    where
        I: IntoIterator,
        I::Item: Into<Channel>,
        T: Payload,
    {
        self.send_subscriptions(SubscriptionsMsg::Broadcast(Broadcast {
            sender: Some(self.clone()),
            channels: collect(channels),
            msg: AnyMessage::new(msg),
        }))
    }

    fn send_subscriptions(&self, msg: SubscriptionsMsg) -> bool {
        match self.cell.engine.upgrade().and_then(|core| core.subscriptions_ref()) {
            Some(subs) => subs.post(Message::Subscriptions(msg)),
            None => false,
        }
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.cell.mailbox
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.cell.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stopping(&self) {
        self.cell.stopping.store(true, Ordering::SeqCst);
    }

    /// Identity comparison: `true` only for handles to the very same
    /// cell. Distinguishes a live processor from a stopped one whose id
    /// has been reused.
    pub(crate) fn same_cell(&self, other: &ProcessorRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn process(&self, msg: Message, log: &Logger) {
        self.cell.process(self, msg, log);
    }
}

fn collect<I>(channels: I) -> Vec<Channel>
where
    I: IntoIterator,
    I::Item: Into<Channel>,
{
    channels.into_iter().map(Into::into).collect()
}

impl PartialEq for ProcessorRef {
    fn eq(&self, other: &ProcessorRef) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ProcessorRef {}

impl Hash for ProcessorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for ProcessorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ProcessorRef[{}]", self.id())
    }
}

impl fmt::Display for ProcessorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
