#![crate_name = "event_engine"]
#![deny(clippy::all)]
#![allow(clippy::new_ret_no_self)]
#![allow(clippy::large_enum_variant)]

mod validate;

pub mod config;
pub mod engine;
pub mod kernel;
pub mod processor;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::engine::{NotDelivered, Subscribed, SubscriptionsMsg};

/// Marker for user payload types carried through mailboxes.
pub trait Payload: Any + Send + Sync {}
impl<T: Any + Send + Sync> Payload for T {}

/// The heterogeneous mailbox element.
///
/// Every processor mailbox carries this one type: opaque user payloads
/// plus the built-in protocol messages the engine itself produces
/// (subscription commands and replies, back-pressure reports, and the
/// `(message, panic)` pairs re-posted when a handler fails).
#[derive(Clone, Debug)]
pub enum Message {
    /// An opaque user payload.
    User(AnyMessage),

    /// A command for the subscriptions processor.
    Subscriptions(SubscriptionsMsg),

    /// Reply carrying a processor's current channel membership.
    Subscribed(Subscribed),

    /// A broadcast could not be delivered to a subscriber (mailbox full).
    NotDelivered(NotDelivered),

    /// A handler panicked on `msg`; the original message and the panic
    /// text are surfaced in-band through the same mailbox.
    Failed(Failure),
}

impl Message {
    /// Wrap a user payload.
    pub fn user<T: Payload>(msg: T) -> Self {
        Message::User(AnyMessage::new(msg))
    }
}

impl From<AnyMessage> for Message {
    fn from(msg: AnyMessage) -> Self {
        Message::User(msg)
    }
}

#[derive(Clone, Debug)]
pub struct Failure {
    pub msg: Box<Message>,
    pub error: String,
}

/// A cheaply clonable, type-erased user payload.
///
/// Broadcast fan-out posts the same payload to many mailboxes, so the
/// value lives behind an `Arc` and clones are reference bumps.
#[derive(Clone)]
pub struct AnyMessage {
    msg: Arc<dyn Any + Send + Sync>,
}

impl AnyMessage {
    pub fn new<T: Payload>(msg: T) -> Self {
        Self { msg: Arc::new(msg) }
    }

    pub fn is<T: Payload>(&self) -> bool {
        self.msg.is::<T>()
    }

    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.msg.downcast_ref::<T>()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("AnyMessage")
    }
}

pub mod prelude {
    pub use crate::config::{load_config, BackoffConfig, ConfigError, EngineConfig};
    pub use crate::engine::{
        Broadcast, Channel, Engine, EngineBuilder, EngineError, NotDelivered, RegisterError,
        Schedule, ScheduleOutcome, ScheduledResult, Scheduler, StopError, Subscribed,
        SubscriptionsMsg,
    };
    pub use crate::processor::{Context, EventProcessor, Handled, ProcessorRef};
    pub use crate::{AnyMessage, Failure, Message, Payload};
}
