use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::processor::ProcessorRef;

pub type DispatcherQueue = VecDeque<ProcessorRef>;

/// A named FIFO of runnable processors behind a non-fair mutex.
///
/// Workers `try_lock` the mutex, pop the head processor, process one of
/// its messages with the lock released, then re-acquire to push it back.
/// `work_available` is signalled on every push-back so the graceful-stop
/// protocol can wait for an in-flight processor to be returned.
pub struct LockedDispatcher {
    name: String,
    queue: Mutex<DispatcherQueue>,
    work_available: Condvar,
}

impl LockedDispatcher {
    pub fn new(name: &str) -> Self {
        LockedDispatcher {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn try_lock(&self) -> Option<MutexGuard<DispatcherQueue>> {
        self.queue.try_lock()
    }

    pub fn lock(&self) -> MutexGuard<DispatcherQueue> {
        self.queue.lock()
    }

    pub fn push_tail(&self, queue: &mut DispatcherQueue, processor: ProcessorRef) {
        queue.push_back(processor);
        self.work_available.notify_one();
    }

    pub fn pop_head(queue: &mut DispatcherQueue) -> Option<ProcessorRef> {
        queue.pop_front()
    }

    pub fn remove_if(queue: &mut DispatcherQueue, id: &str) -> bool {
        if let Some(pos) = queue.iter().position(|p| p.id() == id) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(queue: &DispatcherQueue, id: &str) -> bool {
        queue.iter().any(|p| p.id() == id)
    }

    /// Wait on `work_available` with the queue lock released, up to
    /// `timeout`. Returns whether the wait timed out.
    pub fn wait_for_work(&self, queue: &mut MutexGuard<DispatcherQueue>, timeout: Duration) -> bool {
        self.work_available.wait_for(queue, timeout).timed_out()
    }

    /// Wake everything waiting on this dispatcher, both parked workers
    /// and stop-protocol waiters. Used at shutdown and when a stopping
    /// processor is dropped instead of returned.
    pub fn notify_all(&self) {
        self.work_available.notify_all();
    }
}
