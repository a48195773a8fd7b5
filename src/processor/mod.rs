mod cell;
mod processor;
mod processor_ref;

pub use self::processor::{BoxHandler, Context, EventProcessor, Handled};
pub use self::processor_ref::ProcessorRef;

pub(crate) use self::cell::ProcessorCell;
pub(crate) use self::processor::StackOp;
