mod common;

use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use common::{probe, test_engine, Probe};
use event_engine::prelude::*;

#[derive(Clone, Debug)]
struct Ping(u32);

#[derive(Clone, Debug)]
struct Block;

#[derive(Debug, PartialEq)]
enum SubEvent {
    Got(u32),
    Membership(Vec<String>),
    NotDeliveredTo(String),
    Blocked,
}

struct Subscriber {
    id: String,
    queue: Option<usize>,
    gate: Option<Receiver<()>>,
    probe: Probe<SubEvent>,
}

impl Subscriber {
    fn new(id: &str, probe: Probe<SubEvent>) -> Self {
        Subscriber {
            id: id.to_string(),
            queue: None,
            gate: None,
            probe,
        }
    }
}

impl EventProcessor for Subscriber {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatcher(&self) -> &str {
        "w"
    }

    fn queue_size(&self) -> Option<usize> {
        self.queue
    }

    fn on_event(&mut self, _ctx: &mut Context, msg: &Message) -> Handled {
        match msg {
            Message::User(m) => {
                if let Some(Ping(n)) = m.downcast_ref::<Ping>() {
                    self.probe.event(SubEvent::Got(*n));
                    Handled::Yes
                } else if m.is::<Block>() {
                    self.probe.event(SubEvent::Blocked);
                    if let Some(gate) = &self.gate {
                        let _ = gate.recv();
                    }
                    Handled::Yes
                } else {
                    Handled::No
                }
            }
            Message::Subscribed(s) => {
                let channels = s.channels.iter().map(|c| c.as_str().to_string()).collect();
                self.probe.event(SubEvent::Membership(channels));
                Handled::Yes
            }
            Message::NotDelivered(nd) => {
                self.probe
                    .event(SubEvent::NotDeliveredTo(nd.subscriber.id().to_string()));
                Handled::Yes
            }
            _ => Handled::No,
        }
    }
}

fn membership(channels: &[&str]) -> SubEvent {
    SubEvent::Membership(channels.iter().map(|c| c.to_string()).collect())
}

#[test]
fn subscribe_replies_with_membership() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pa, la) = probe();
    let a = engine.register(Subscriber::new("a", pa)).unwrap();
    engine.start();

    assert!(a.subscribe(vec!["x"]));
    assert_eq!(la.recv(), membership(&["x"]));

    assert!(a.subscribe(vec!["y"]));
    assert_eq!(la.recv(), membership(&["x", "y"]));
    engine.shutdown();
}

#[test]
fn broadcast_reaches_each_subscriber_once() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pa, la) = probe();
    let (pb, lb) = probe();
    let a = engine.register(Subscriber::new("a", pa)).unwrap();
    let b = engine.register(Subscriber::new("b", pb)).unwrap();
    engine.start();

    // a subscribes to both channels, b to one
    a.subscribe(vec!["x", "y"]);
    assert_eq!(la.recv(), membership(&["x", "y"]));
    b.subscribe(vec!["x"]);
    assert_eq!(lb.recv(), membership(&["x"]));

    assert!(engine.broadcast(vec!["x", "y"], Ping(7)));

    assert_eq!(la.recv(), SubEvent::Got(7));
    assert_eq!(lb.recv(), SubEvent::Got(7));
    // a is subscribed via two of the broadcast channels but gets one copy
    la.expect_none(Duration::from_millis(300));
    lb.expect_none(Duration::from_millis(300));
    engine.shutdown();
}

#[test]
fn unsubscribe_restores_previous_membership() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pa, la) = probe();
    let a = engine.register(Subscriber::new("a", pa)).unwrap();
    engine.start();

    a.subscribe(vec!["x"]);
    assert_eq!(la.recv(), membership(&["x"]));

    a.unsubscribe(vec!["x"]);
    assert_eq!(la.recv(), membership(&[]));

    engine.broadcast(vec!["x"], Ping(1));
    la.expect_none(Duration::from_millis(300));
    engine.shutdown();
}

#[test]
fn set_subscription_replaces_membership() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pa, la) = probe();
    let a = engine.register(Subscriber::new("a", pa)).unwrap();
    engine.start();

    a.subscribe(vec!["x"]);
    assert_eq!(la.recv(), membership(&["x"]));

    a.set_subscription(vec!["y", "z"]);
    assert_eq!(la.recv(), membership(&["y", "z"]));

    engine.broadcast(vec!["x"], Ping(1));
    engine.broadcast(vec!["z"], Ping(2));
    assert_eq!(la.recv(), SubEvent::Got(2));
    engine.shutdown();
}

#[test]
fn unsubscribe_all_empties_membership() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pa, la) = probe();
    let a = engine.register(Subscriber::new("a", pa)).unwrap();
    engine.start();

    a.subscribe(vec!["x", "y"]);
    assert_eq!(la.recv(), membership(&["x", "y"]));

    a.unsubscribe_all();
    assert_eq!(la.recv(), membership(&[]));
    engine.shutdown();
}

// A broadcast to a full subscriber is reported to the sender as
// NotDelivered; the other subscriber still receives exactly one copy and
// the full mailbox is left untouched.
#[test]
fn broadcast_with_full_subscriber_reports_not_delivered() {
    let engine = test_engine(vec![vec!["w"], vec!["w"]], 8);
    let (gate_tx, gate_rx) = channel();
    let (pa, la) = probe();
    let (pb, lb) = probe();
    let (ps, ls) = probe();

    let a = engine
        .register(Subscriber {
            id: "a".to_string(),
            queue: Some(1),
            gate: Some(gate_rx),
            probe: pa,
        })
        .unwrap();
    let b = engine.register(Subscriber::new("b", pb)).unwrap();
    let sender = engine.register(Subscriber::new("sender", ps)).unwrap();
    engine.start();

    a.subscribe(vec!["x"]);
    assert_eq!(la.recv(), membership(&["x"]));
    b.subscribe(vec!["x"]);
    assert_eq!(lb.recv(), membership(&["x"]));

    // park a inside its handler, then fill its single-slot mailbox
    assert!(a.post(Message::user(Block)));
    assert_eq!(la.recv(), SubEvent::Blocked);
    assert!(a.post(Message::user(Ping(0))));
    assert!(!a.post(Message::user(Ping(1))));

    assert!(sender.broadcast(vec!["x"], Ping(42)));

    assert_eq!(lb.recv(), SubEvent::Got(42));
    assert_eq!(ls.recv(), SubEvent::NotDeliveredTo("a".to_string()));
    assert_eq!(a.current_queue_size(), 1);

    drop(gate_tx.send(()));
    engine.shutdown();
}

// Stopping a subscriber does not remove it from channel lists; the
// remaining subscribers keep receiving.
#[test]
fn stop_does_not_unsubscribe() {
    let engine = test_engine(vec![vec!["w"]], 16);
    let (pa, la) = probe();
    let (pb, lb) = probe();
    let a = engine.register(Subscriber::new("a", pa)).unwrap();
    let b = engine.register(Subscriber::new("b", pb)).unwrap();
    engine.start();

    a.subscribe(vec!["x"]);
    assert_eq!(la.recv(), membership(&["x"]));
    b.subscribe(vec!["x"]);
    assert_eq!(lb.recv(), membership(&["x"]));

    engine.stop("a").unwrap();

    engine.broadcast(vec!["x"], Ping(5));
    assert_eq!(lb.recv(), SubEvent::Got(5));
    engine.shutdown();
}
