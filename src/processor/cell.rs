use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Weak;

use parking_lot::Mutex;
use slog::{debug, warn, Logger};

use crate::engine::EngineCore;
use crate::kernel::Mailbox;
use crate::processor::{BoxHandler, Context, EventProcessor, Handled, ProcessorRef, StackOp};
use crate::{Failure, Message};

/// The engine-side half of a processor: identity, mailbox, stopping flag
/// and the task (handler stack) behind the task lock.
pub(crate) struct ProcessorCell {
    pub(crate) id: String,
    pub(crate) dispatcher: String,
    pub(crate) mailbox: Mailbox,
    pub(crate) stopping: AtomicBool,
    pub(crate) task: Mutex<Task>,
    pub(crate) parent: Option<ProcessorRef>,
    pub(crate) engine: Weak<EngineCore>,
}

/// The handler stack. The user's `EventProcessor` is the permanent
/// bottom; `overlays` holds anything stacked above it. Guarded by the
/// task lock, which also enforces at-most-one-concurrent-handler.
pub(crate) struct Task {
    processor: Box<dyn EventProcessor>,
    overlays: Vec<BoxHandler>,
}

impl Task {
    fn invoke_top(&mut self, ctx: &mut Context, msg: &Message) -> Handled {
        match self.overlays.last_mut() {
            Some(handler) => handler(ctx, msg),
            None => self.processor.on_event(ctx, msg),
        }
    }

    fn apply(&mut self, ops: Vec<StackOp>) {
        for op in ops {
            match op {
                StackOp::Push(handler) => self.overlays.push(handler),
                StackOp::Replace(handler) => {
                    self.overlays.pop();
                    self.overlays.push(handler);
                }
                // popping with nothing stacked would remove on_event;
                // the stack is never left empty
                StackOp::Pop => {
                    self.overlays.pop();
                }
            }
        }
    }
}

impl ProcessorCell {
    pub(crate) fn new(
        id: String,
        dispatcher: String,
        queue_size: usize,
        processor: Box<dyn EventProcessor>,
        parent: Option<ProcessorRef>,
        engine: Weak<EngineCore>,
    ) -> Self {
        ProcessorCell {
            id,
            dispatcher,
            mailbox: Mailbox::new(queue_size),
            stopping: AtomicBool::new(false),
            task: Mutex::new(Task {
                processor,
                overlays: Vec::new(),
            }),
            parent,
            engine,
        }
    }

    /// Run the active handler on one message, under the task lock.
    ///
    /// A panic escaping the handler is caught and surfaced in-band: the
    /// original message and the panic text are re-posted to this same
    /// mailbox as `Message::Failed`, best-effort. Stack mutations the
    /// handler requested are applied once it has returned.
    pub(crate) fn process(&self, myself: &ProcessorRef, msg: Message, log: &Logger) {
        let mut task = self.task.lock();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = Context::new(myself, log);
            let handled = task.invoke_top(&mut ctx, &msg);
            (ctx.into_ops(), handled)
        }));
        match outcome {
            Ok((ops, handled)) => {
                task.apply(ops);
                if handled == Handled::No {
                    debug!(log, "unhandled message"; "processor" => self.id.as_str());
                }
            }
            Err(payload) => {
                drop(task);
                let error = panic_text(payload);
                warn!(log, "handler panicked";
                    "processor" => self.id.as_str(), "error" => error.as_str());
                let failed = Message::Failed(Failure {
                    msg: Box::new(msg),
                    error,
                });
                let _ = self.mailbox.offer(failed);
            }
        }
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
