use tokio::sync::oneshot;

use super::options::{JobOptions, JobPayload};
use crate::background::make::MakeOutcome;
use crate::common::errors::TransportError;

/// Handler name under which version jobs are registered.
pub const MAKE_VERSION_HANDLER: &str = "make_version";

/// Terminal state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(MakeOutcome),
    /// The job never finished: ttr exceeded, worker crashed or dropped it
    Lost(String),
}

/// Worker-side code for one handler name. Runs on a blocking thread.
pub trait JobHandler: Send + Sync {
    fn handle(&self, payload: &JobPayload) -> JobOutcome;
}

/// Receipt for an accepted job.
pub struct JobTicket {
    receiver: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub fn channel() -> (oneshot::Sender<JobOutcome>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    pub async fn outcome(self) -> JobOutcome {
        self.receiver
            .await
            .unwrap_or_else(|_| JobOutcome::Lost("the queue dropped the job".to_string()))
    }
}

/// Narrow enqueue contract of a job queue.
///
/// Delivery is at least once. Within one partition higher priorities are
/// served first.
pub trait JobTransport: Send + Sync {
    fn run(
        &self,
        handler: &str,
        payload: JobPayload,
        options: &JobOptions,
    ) -> Result<JobTicket, TransportError>;

    /// Re-establish the connection after `ConnectionLost`.
    fn reconnect(&self) -> Result<(), TransportError>;
}
