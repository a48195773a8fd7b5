use slog::Logger;

use crate::config::DEFAULT_DISPATCHER;
use crate::processor::ProcessorRef;
use crate::Message;

/// Outcome of offering a message to a handler. Handlers are partial:
/// a message the active handler does not recognise is reported as
/// `Handled::No`, logged, and dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Handled {
    Yes,
    No,
}

/// The user-facing processor contract.
///
/// An event processor is a single-threaded logical actor: the engine
/// guarantees that at most one worker thread runs `on_event` (or any
/// handler stacked above it) at any instant, so implementations need no
/// internal synchronization for their own state.
///
/// `on_event` is the permanent bottom of the handler stack. Handlers
/// pushed with [`Context::become_handler`] shadow it until popped.
pub trait EventProcessor: Send + 'static {
    /// Stable identifier, unique across the engine.
    fn id(&self) -> &str;

    /// Name of the dispatcher this processor lives in.
    fn dispatcher(&self) -> &str {
        DEFAULT_DISPATCHER
    }

    /// Mailbox capacity override; `None` uses the configured default.
    fn queue_size(&self) -> Option<usize> {
        None
    }

    fn on_event(&mut self, ctx: &mut Context, msg: &Message) -> Handled;
}

/// A handler stacked above `on_event`.
pub type BoxHandler = Box<dyn FnMut(&mut Context, &Message) -> Handled + Send>;

pub(crate) enum StackOp {
    Push(BoxHandler),
    Replace(BoxHandler),
    Pop,
}

/// Handler-side view of the processor, valid only for the duration of a
/// single handler invocation on the processing worker thread.
///
/// Handler-stack mutations requested here are applied after the handler
/// returns and take effect from the next message, which is what makes
/// them safe to call from inside the active handler. Foreign threads
/// must not mutate the stack directly; they post a message whose handler
/// does.
pub struct Context<'a> {
    myself: &'a ProcessorRef,
    log: &'a Logger,
    ops: Vec<StackOp>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(myself: &'a ProcessorRef, log: &'a Logger) -> Self {
        Context {
            myself,
            log,
            ops: Vec::new(),
        }
    }

    pub fn myself(&self) -> &ProcessorRef {
        self.myself
    }

    pub fn log(&self) -> &Logger {
        self.log
    }

    /// Install `handler` as the active handler.
    ///
    /// With `stack_previous` the current handler is kept underneath and
    /// restored by [`unbecome`](Context::unbecome); without it the top of
    /// the stack is replaced. The processor's own `on_event` is never
    /// removed: replacing with nothing stacked simply pushes.
    pub fn become_handler<H>(&mut self, handler: H, stack_previous: bool)
    where
        H: FnMut(&mut Context, &Message) -> Handled + Send + 'static,
    {
        let handler: BoxHandler = Box::new(handler);
        if stack_previous {
            self.ops.push(StackOp::Push(handler));
        } else {
            self.ops.push(StackOp::Replace(handler));
        }
    }

    /// Pop the active handler, restoring the one below. A no-op when only
    /// `on_event` remains.
    pub fn unbecome(&mut self) {
        self.ops.push(StackOp::Pop);
    }

    pub(crate) fn into_ops(self) -> Vec<StackOp> {
        self.ops
    }
}
