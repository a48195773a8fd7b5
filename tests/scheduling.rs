mod common;

use std::time::Duration;

use common::{probe, test_engine, Probe};
use event_engine::prelude::*;

#[derive(Clone, Debug)]
struct Ping(u32);

struct Receiver {
    id: String,
    dispatcher: String,
    queue: Option<usize>,
    probe: Probe<u32>,
}

impl Receiver {
    fn new(id: &str, probe: Probe<u32>) -> Self {
        Receiver {
            id: id.to_string(),
            dispatcher: "w".to_string(),
            queue: None,
            probe,
        }
    }
}

impl EventProcessor for Receiver {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatcher(&self) -> &str {
        &self.dispatcher
    }

    fn queue_size(&self) -> Option<usize> {
        self.queue
    }

    fn on_event(&mut self, _ctx: &mut Context, msg: &Message) -> Handled {
        match msg {
            Message::User(m) => match m.downcast_ref::<Ping>() {
                Some(Ping(n)) => {
                    self.probe.event(*n);
                    Handled::Yes
                }
                None => Handled::No,
            },
            _ => Handled::No,
        }
    }
}

#[test]
fn scheduled_message_is_posted() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pr, listen) = probe();
    engine.register(Receiver::new("target", pr)).unwrap();
    engine.start();

    let schedule = engine.schedule("target", Message::user(Ping(9)), Duration::from_millis(20));

    assert_eq!(
        schedule.outcome().wait_timeout(Duration::from_secs(5)),
        Some(ScheduledResult::Posted)
    );
    assert_eq!(listen.recv(), 9);
    engine.shutdown();
}

// Cancelling before the timer fires wins: the outcome is Cancelled, the
// target never sees the message and a second cancel reports false.
#[test]
fn cancel_before_firing() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pr, listen) = probe();
    engine.register(Receiver::new("target", pr)).unwrap();
    engine.start();

    let schedule = engine.schedule("target", Message::user(Ping(1)), Duration::from_millis(300));

    assert!(schedule.cancel());
    assert_eq!(schedule.outcome().try_get(), Some(ScheduledResult::Cancelled));

    listen.expect_none(Duration::from_millis(600));
    assert!(!schedule.cancel());
    engine.shutdown();
}

#[test]
fn schedule_to_unregistered_id_fails() {
    let engine = test_engine(vec![vec!["w"]], 16);
    engine.start();

    let schedule = engine.schedule(
        "does-not-exist",
        Message::user(Ping(1)),
        Duration::from_millis(10),
    );

    assert_eq!(
        schedule.outcome().wait_timeout(Duration::from_secs(5)),
        Some(ScheduledResult::FailedUnregistered)
    );
    engine.shutdown();
}

// Firing into a full mailbox completes the outcome with FailedQueueFull;
// the queued message is untouched.
#[test]
fn schedule_to_full_mailbox_fails() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pr, _listen) = probe();
    let full = engine
        .register(Receiver {
            id: "full".to_string(),
            dispatcher: "".to_string(), // no worker serves the default dispatcher here
            queue: Some(1),
            probe: pr,
        })
        .unwrap();
    engine.start();

    assert!(full.post(Message::user(Ping(0))));

    let schedule = engine.schedule("full", Message::user(Ping(1)), Duration::from_millis(10));
    assert_eq!(
        schedule.outcome().wait_timeout(Duration::from_secs(5)),
        Some(ScheduledResult::FailedQueueFull)
    );
    assert_eq!(full.current_queue_size(), 1);
    engine.shutdown();
}

// Outcomes are one-shot: once fired, cancel can no longer take effect.
#[test]
fn cancel_after_firing_returns_false() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pr, listen) = probe();
    engine.register(Receiver::new("target", pr)).unwrap();
    engine.start();

    let schedule = engine.schedule("target", Message::user(Ping(3)), Duration::from_millis(10));
    assert_eq!(
        schedule.outcome().wait_timeout(Duration::from_secs(5)),
        Some(ScheduledResult::Posted)
    );
    assert_eq!(listen.recv(), 3);

    assert!(!schedule.cancel());
    assert_eq!(schedule.outcome().try_get(), Some(ScheduledResult::Posted));
    engine.shutdown();
}
