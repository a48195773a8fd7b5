use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;
use slog::{debug, trace, Logger};

use crate::kernel::backoff::Backoff;
use crate::kernel::dispatcher::{DispatcherQueue, LockedDispatcher};
use crate::kernel::registrar::Registrar;

/// Upper bound on a single mailbox poll.
pub(crate) const MAX_POLL_MS: u64 = 40;

/// How long a worker camps on an empty dispatcher queue before moving on
/// to its next assignment.
const EMPTY_QUEUE_PARK: Duration = Duration::from_micros(100);

/// The body of one worker thread: round-robin the pinned dispatchers,
/// `try_lock` each, process one message from the head processor, push the
/// processor back, repeat. A full cycle of failed lock attempts triggers
/// exponential backoff.
pub(crate) struct Worker {
    pub index: usize,
    pub assignment: Vec<Arc<LockedDispatcher>>,
    pub keep_going: Arc<AtomicBool>,
    pub registrar: Registrar,
    pub backoff: Backoff,
    pub log: Logger,
}

impl Worker {
    pub fn run(self) {
        let names: Vec<&str> = self.assignment.iter().map(|d| d.name()).collect();
        debug!(self.log, "worker started";
            "worker" => self.index, "assignment" => format!("{:?}", names));

        let mut ri = 0usize;
        let mut failures = 0usize;
        let mut no_task_count = 0u32;
        let mut delay = self.backoff.initial();

        while self.keep_going.load(Ordering::Acquire) {
            let dispatcher = &self.assignment[ri];
            match dispatcher.try_lock() {
                Some(queue) => {
                    let wait = compute_wait(no_task_count, queue.len());
                    let had_work = self.process_one(dispatcher, queue, wait);
                    if had_work {
                        no_task_count = 0;
                        failures = 0;
                        delay = self.backoff.initial();
                    } else {
                        no_task_count = no_task_count.saturating_add(1);
                    }
                    ri = (ri + 1) % self.assignment.len();
                }
                None => {
                    ri = (ri + 1) % self.assignment.len();
                    failures += 1;
                    if failures >= self.assignment.len() {
                        // full cycle without acquiring a single lock
                        trace!(self.log, "worker backing off";
                            "worker" => self.index, "delay_us" => delay.as_micros() as u64);
                        self.backoff.sleep(delay);
                        delay = self.backoff.next(delay);
                        failures = 0;
                    }
                }
            }
        }

        debug!(self.log, "worker exiting"; "worker" => self.index);
    }

    /// Claim the head processor of `queue`, process at most one of its
    /// mailbox messages, and return it to the tail unless it is stopping
    /// or no longer registered. Returns whether a message was processed.
    fn process_one(
        &self,
        dispatcher: &LockedDispatcher,
        mut queue: MutexGuard<DispatcherQueue>,
        wait: Duration,
    ) -> bool {
        let processor = match LockedDispatcher::pop_head(&mut queue) {
            Some(p) => p,
            None => {
                // Nothing runnable: wait briefly for a push-back, then
                // give up so the other assigned dispatchers still get
                // visited.
                dispatcher.wait_for_work(&mut queue, EMPTY_QUEUE_PARK);
                if !self.keep_going.load(Ordering::Acquire) {
                    return false;
                }
                match LockedDispatcher::pop_head(&mut queue) {
                    Some(p) => p,
                    None => return false,
                }
            }
        };
        drop(queue);

        // The processor is claimed: it is in no dispatcher queue and only
        // this worker may run its handler.
        let had_work = match processor.mailbox().poll(wait) {
            Some(msg) => {
                processor.process(msg, &self.log);
                true
            }
            None => false,
        };

        let mut queue = dispatcher.lock();
        let registered = self
            .registrar
            .get(processor.id())
            .map_or(false, |current| current.same_cell(&processor));
        if processor.is_stopping() || !registered {
            // Never re-enqueue a stopping or unregistered processor.
            // Wake stop waiters so they observe its absence promptly.
            drop(queue);
            dispatcher.notify_all();
            debug!(self.log, "processor retired";
                "processor" => processor.id(), "dispatcher" => dispatcher.name());
        } else {
            dispatcher.push_tail(&mut queue, processor);
        }

        had_work
    }
}

/// How long to wait on a mailbox poll: immediate when the last visit
/// found work, growing with consecutive empty visits, shrinking with the
/// number of processors sharing the dispatcher, clamped to
/// `[0, MAX_POLL_MS]`.
pub(crate) fn compute_wait(no_task_count: u32, queue_len: usize) -> Duration {
    if no_task_count == 0 {
        return Duration::from_millis(0);
    }
    let ms = u64::from(no_task_count).saturating_mul(2) / (queue_len as u64 + 1);
    Duration::from_millis(ms.min(MAX_POLL_MS))
}
