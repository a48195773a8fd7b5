mod engine;
mod logger;
mod scheduler;
mod subscriptions;

use std::error::Error;
use std::fmt;

use crate::config::ConfigError;

pub use self::engine::{Engine, EngineBuilder, DEFAULT_STOP_TIMEOUT};
pub use self::scheduler::{Schedule, ScheduleOutcome, ScheduledResult, Scheduler};
pub use self::subscriptions::{
    Broadcast, Channel, NotDelivered, SetSubscription, Subscribe, Subscribed, SubscriptionsMsg,
    Unsubscribe, UnsubscribeAll, SUBSCRIPTIONS_DISPATCHER, SUBSCRIPTIONS_ID,
};

pub(crate) use self::engine::EngineCore;
pub(crate) use self::subscriptions::Subscriptions;

/// Construction failed; no engine (and no thread) was created.
pub enum EngineError {
    InvalidName(String),
    ModuleFailed(String),
    Config(ConfigError),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl Error for EngineError {}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EngineError::InvalidName(ref name) => f.write_str(&format!(
                "Failed to create engine. Cause: Invalid engine name ({})",
                name
            )),
            EngineError::ModuleFailed(ref m) => f.write_str(&format!(
                "Failed to create engine. Cause: Sub module failed to start ({})",
                m
            )),
            EngineError::Config(ref e) => f.write_str(&format!(
                "Failed to create engine. Cause: {}",
                e
            )),
        }
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

/// Registration failed; the engine keeps running.
pub enum RegisterError {
    InvalidId(String),
    UnknownDispatcher(String, String),
    DuplicateId(String),
    InvalidQueueSize(String, usize),
}

impl Error for RegisterError {}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RegisterError::InvalidId(ref id) => {
                f.write_str(&format!("Failed to register processor. Cause: Invalid id ({})", id))
            }
            RegisterError::UnknownDispatcher(ref id, ref dispatcher) => f.write_str(&format!(
                "Failed to register processor {}. Cause: Unknown dispatcher ({})",
                id, dispatcher
            )),
            RegisterError::DuplicateId(ref id) => f.write_str(&format!(
                "Failed to register processor. Cause: Id already registered ({})",
                id
            )),
            RegisterError::InvalidQueueSize(ref id, size) => f.write_str(&format!(
                "Failed to register processor {}. Cause: Queue size out of range ({})",
                id, size
            )),
        }
    }
}

impl fmt::Debug for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

pub enum StopError {
    UnknownProcessor(String),
}

impl Error for StopError {}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StopError::UnknownProcessor(ref id) => f.write_str(&format!(
                "Failed to stop processor. Cause: Not registered ({})",
                id
            )),
        }
    }
}

impl fmt::Debug for StopError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}
