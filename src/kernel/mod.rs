pub(crate) mod backoff;
pub(crate) mod dispatcher;
pub(crate) mod mailbox;
pub(crate) mod registrar;
pub(crate) mod worker;

pub use self::backoff::Backoff;
pub use self::dispatcher::{DispatcherQueue, LockedDispatcher};
pub use self::mailbox::Mailbox;
pub use self::registrar::Registrar;
