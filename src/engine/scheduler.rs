use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use slog::{trace, Logger};
use uuid::Uuid;

use crate::kernel::Registrar;
use crate::Message;

/// How a schedule ended. Every schedule completes with exactly one of
/// these, exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduledResult {
    /// The message was accepted by the target's mailbox
    Posted,

    /// `cancel` won before the timer fired
    Cancelled,

    /// No processor with the target id was registered at fire time
    FailedUnregistered,

    /// The target's mailbox was full at fire time
    FailedQueueFull,
}

/// Timer-thread pool delivering one-shot delayed messages.
///
/// `schedule` arms a job; when the delay elapses a timer thread looks the
/// target id up in the registrar and posts the message, recording the
/// outcome on the returned [`Schedule`]. Cancellation is cooperative: it
/// wins only if the outcome has not completed yet.
pub struct Scheduler {
    shared: Arc<TimerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

struct TimerShared {
    jobs: Mutex<BinaryHeap<TimerJob>>,
    job_added: Condvar,
    keep_going: AtomicBool,
    seq: AtomicU64,
    registrar: Registrar,
    log: Logger,
}

struct TimerJob {
    fire_at: Instant,
    seq: u64,
    id: Uuid,
    target: String,
    msg: Message,
    outcome: ScheduleOutcome,
}

impl PartialEq for TimerJob {
    fn eq(&self, other: &TimerJob) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for TimerJob {}

impl PartialOrd for TimerJob {
    fn partial_cmp(&self, other: &TimerJob) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerJob {
    // reversed: BinaryHeap is a max-heap, the earliest job must surface
    fn cmp(&self, other: &TimerJob) -> CmpOrdering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cadence at which an idle timer thread re-checks its run flag.
const IDLE_WAIT: Duration = Duration::from_millis(500);

impl Scheduler {
    pub(crate) fn start(pool_size: usize, registrar: Registrar, log: Logger) -> Self {
        let shared = Arc::new(TimerShared {
            jobs: Mutex::new(BinaryHeap::new()),
            job_added: Condvar::new(),
            keep_going: AtomicBool::new(true),
            seq: AtomicU64::new(0),
            registrar,
            log,
        });

        let threads = (0..pool_size)
            .map(|i| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("timer-{}", i))
                    .spawn(move || run_timer(shared))
                    .unwrap()
            })
            .collect();

        Scheduler {
            shared,
            threads: Mutex::new(threads),
        }
    }

    /// Arm a one-shot delivery of `msg` to the processor registered under
    /// `id`, `delay` from now.
    pub fn schedule(&self, id: &str, msg: impl Into<Message>, delay: Duration) -> Schedule {
        let outcome = ScheduleOutcome::new();
        let job = TimerJob {
            fire_at: Instant::now() + delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            id: Uuid::new_v4(),
            target: id.to_string(),
            msg: msg.into(),
            outcome: outcome.clone(),
        };
        let schedule = Schedule {
            id: job.id,
            outcome,
        };

        trace!(self.shared.log, "scheduled";
            "schedule" => %schedule.id, "target" => id, "delay_ms" => delay.as_millis() as u64);

        let mut jobs = self.shared.jobs.lock();
        jobs.push(job);
        self.shared.job_added.notify_one();

        schedule
    }

    pub(crate) fn shutdown(&self) {
        self.shared.keep_going.store(false, Ordering::Release);
        self.shared.job_added.notify_all();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_timer(shared: Arc<TimerShared>) {
    loop {
        let mut jobs = shared.jobs.lock();
        if !shared.keep_going.load(Ordering::Acquire) {
            break;
        }
        let now = Instant::now();
        let due = match jobs.peek() {
            None => {
                shared.job_added.wait_for(&mut jobs, IDLE_WAIT);
                continue;
            }
            Some(job) if job.fire_at <= now => jobs.pop(),
            Some(job) => {
                let timeout = job.fire_at - now;
                shared.job_added.wait_for(&mut jobs, timeout.min(IDLE_WAIT));
                continue;
            }
        };
        drop(jobs);
        if let Some(job) = due {
            fire(&shared, job);
        }
    }
}

fn fire(shared: &TimerShared, job: TimerJob) {
    let TimerJob {
        id,
        target,
        msg,
        outcome,
        ..
    } = job;

    if outcome.try_get().is_some() {
        // cancelled before firing
        return;
    }

    let result = match shared.registrar.get(&target) {
        None => ScheduledResult::FailedUnregistered,
        Some(processor) => {
            if processor.post(msg) {
                ScheduledResult::Posted
            } else {
                ScheduledResult::FailedQueueFull
            }
        }
    };

    if outcome.complete(result) {
        trace!(shared.log, "schedule fired";
            "schedule" => %id, "target" => target.as_str(), "result" => format!("{:?}", result));
    }
}

/// Handle to an armed one-shot delivery.
pub struct Schedule {
    id: Uuid,
    outcome: ScheduleOutcome,
}

impl Schedule {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Try to cancel before the timer fires. Idempotent: returns `true`
    /// only for the call that actually completed the outcome; a schedule
    /// that already fired (or was already cancelled) returns `false`.
    pub fn cancel(&self) -> bool {
        self.outcome.complete(ScheduledResult::Cancelled)
    }

    pub fn outcome(&self) -> ScheduleOutcome {
        self.outcome.clone()
    }
}

/// One-shot, future-like view of a schedule's result.
#[derive(Clone)]
pub struct ScheduleOutcome {
    shared: Arc<OutcomeShared>,
}

struct OutcomeShared {
    result: Mutex<Option<ScheduledResult>>,
    done: Condvar,
}

impl ScheduleOutcome {
    fn new() -> Self {
        ScheduleOutcome {
            shared: Arc::new(OutcomeShared {
                result: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    pub fn try_get(&self) -> Option<ScheduledResult> {
        *self.shared.result.lock()
    }

    /// Block until the outcome completes.
    pub fn wait(&self) -> ScheduledResult {
        let mut slot = self.shared.result.lock();
        loop {
            if let Some(result) = *slot {
                return result;
            }
            self.shared.done.wait(&mut slot);
        }
    }

    /// Block until the outcome completes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ScheduledResult> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.result.lock();
        loop {
            if let Some(result) = *slot {
                return Some(result);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.shared.done.wait_for(&mut slot, deadline - now);
        }
    }

    /// First completion wins; later attempts report `false`.
    fn complete(&self, result: ScheduledResult) -> bool {
        let mut slot = self.shared.result.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        self.shared.done.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_scheduler() -> Scheduler {
        Scheduler::start(
            1,
            Registrar::new(),
            Logger::root(slog::Discard, o!()),
        )
    }

    #[test]
    fn unregistered_target_fails() {
        let scheduler = test_scheduler();
        let schedule = scheduler.schedule(
            "does-not-exist",
            Message::user("ping"),
            Duration::from_millis(10),
        );
        assert_eq!(
            schedule.outcome().wait_timeout(Duration::from_secs(5)),
            Some(ScheduledResult::FailedUnregistered)
        );
        scheduler.shutdown();
    }

    #[test]
    fn cancel_is_idempotent_and_wins_before_firing() {
        let scheduler = test_scheduler();
        let schedule = scheduler.schedule("anyone", Message::user(1u8), Duration::from_secs(60));

        assert!(schedule.cancel());
        assert!(!schedule.cancel());
        assert_eq!(schedule.outcome().try_get(), Some(ScheduledResult::Cancelled));
        scheduler.shutdown();
    }

    #[test]
    fn cancel_after_completion_returns_false() {
        let scheduler = test_scheduler();
        let schedule = scheduler.schedule("gone", Message::user(1u8), Duration::from_millis(1));
        let result = schedule.outcome().wait_timeout(Duration::from_secs(5));
        assert_eq!(result, Some(ScheduledResult::FailedUnregistered));
        assert!(!schedule.cancel());
        assert_eq!(
            schedule.outcome().try_get(),
            Some(ScheduledResult::FailedUnregistered)
        );
        scheduler.shutdown();
    }
}
