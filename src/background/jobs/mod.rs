//! Version job queue
//!
//! Includes:
//! - Scheduling options derived from version names
//! - The transport contract and an in-process queue implementing it
//! - Producer (dispatcher) and worker (executor) sides of a job
//! - Per-(media, version) processing guard

pub mod dispatcher;
pub mod executor;
pub mod guard;
pub mod local_queue;
pub mod options;
pub mod transport;

pub use dispatcher::{Dispatcher, Enqueued};
pub use executor::JobExecutor;
pub use guard::{InProgress, ProcessingGuard};
pub use local_queue::LocalQueue;
pub use options::{JobOptions, JobPayload, Partition};
pub use transport::{JobHandler, JobOutcome, JobTicket, JobTransport, MAKE_VERSION_HANDLER};
