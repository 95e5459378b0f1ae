//! Notification pipeline: events in, delivered (or retried) messages out.
//!
//! The dispatcher turns each domain event into durable ledger entries and
//! makes one delivery attempt per requested channel. Failed entries stay
//! on the ledger; the retry scheduler sweeps them on an interval until
//! delivery succeeds or the retry cap is reached.

pub mod dispatcher;
pub mod retry;

pub use dispatcher::Dispatcher;
pub use retry::{spawn_retry_loop, RetryScheduler};
