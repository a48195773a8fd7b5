#![allow(dead_code)]

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use slog::{o, Logger};

use event_engine::prelude::*;

/// An mpsc-channel probe: handlers push events, the test thread asserts
/// on what arrives and when.
pub fn probe<T: Send>() -> (Probe<T>, ProbeReceive<T>) {
    let (tx, rx) = channel::<T>();
    (Probe { tx }, ProbeReceive { rx })
}

pub struct Probe<T> {
    tx: Sender<T>,
}

impl<T: Send> Probe<T> {
    pub fn event(&self, evt: T) {
        drop(self.tx.send(evt));
    }
}

impl<T> Clone for Probe<T> {
    fn clone(&self) -> Self {
        Probe {
            tx: self.tx.clone(),
        }
    }
}

pub struct ProbeReceive<T> {
    rx: Receiver<T>,
}

impl<T: Send> ProbeReceive<T> {
    pub fn recv(&self) -> T {
        self.rx
            .recv_timeout(Duration::from_secs(10))
            .expect("probe timed out")
    }

    pub fn recv_within(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn expect_none(&self, timeout: Duration) {
        assert!(
            self.rx.recv_timeout(timeout).is_err(),
            "unexpected probe event"
        );
    }
}

pub fn discard_log() -> Logger {
    Logger::root(slog::Discard, o!())
}

pub fn test_config(assignment: Vec<Vec<&str>>, queue_size: usize) -> EngineConfig {
    EngineConfig {
        scheduler_pool_size: 1,
        thread_dispatcher_assignment: assignment
            .into_iter()
            .map(|names| names.into_iter().map(str::to_string).collect())
            .collect(),
        default_queue_size: queue_size,
        backoff: BackoffConfig {
            base_delay: Duration::from_micros(10),
            multiplier: 1.5,
            max_delay: Duration::from_millis(10),
        },
    }
}

pub fn test_engine(assignment: Vec<Vec<&str>>, queue_size: usize) -> Engine {
    Engine::builder()
        .name("test-engine")
        .cfg(test_config(assignment, queue_size))
        .log(discard_log())
        .create()
        .unwrap()
}
