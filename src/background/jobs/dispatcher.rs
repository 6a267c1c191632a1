use log::{info, warn};
use std::sync::Arc;

use super::options::{JobOptions, JobPayload};
use super::transport::{JobHandler, JobOutcome, JobTicket, JobTransport, MAKE_VERSION_HANDLER};
use crate::common::errors::{PipelineError, TransportError};
use crate::config::AppConfig;
use crate::database::schema::MediaSchema;
use crate::registry::AssemblyRegistry;

/// One accepted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub version: String,
    pub options: JobOptions,
    /// Present when the producer waited (`fix3*`) or the job ran inline
    pub outcome: Option<JobOutcome>,
}

/// Producer side: turns (media, version) pairs into queued jobs.
pub struct Dispatcher {
    transport: Arc<dyn JobTransport>,
    assemblies: Arc<AssemblyRegistry>,
    /// Runs a job in-process when the transport refuses it and the version allows fallback
    inline: Arc<dyn JobHandler>,
    config: AppConfig,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn JobTransport>,
        assemblies: Arc<AssemblyRegistry>,
        inline: Arc<dyn JobHandler>,
        config: AppConfig,
    ) -> Self {
        Self {
            transport,
            assemblies,
            inline,
            config,
        }
    }

    /// One job per version name known to any media type, in name order.
    /// Whether the version applies to this media is decided by the worker.
    ///
    /// Aborts on the first version that cannot be enqueued; jobs already
    /// accepted stay queued.
    pub async fn enqueue_all(&self, media: &MediaSchema) -> Result<Vec<Enqueued>, PipelineError> {
        let versions = self.assemblies.versions();

        let mut enqueued = Vec::with_capacity(versions.len());
        for version in versions {
            enqueued.push(self.enqueue(media.id, &version).await?);
        }
        Ok(enqueued)
    }

    pub async fn enqueue(&self, media_id: u64, version: &str) -> Result<Enqueued, PipelineError> {
        let options = JobOptions::for_version(version, &self.config);
        let payload = JobPayload {
            media_id,
            version: version.to_string(),
        };

        let ticket = match self.submit(&payload, &options).await {
            Ok(ticket) => ticket,
            Err(TransportError::Unavailable) if options.fallback => {
                warn!(
                    "Job queue unavailable, making version `{}` of media {} inline",
                    version, media_id
                );
                let outcome = self.run_inline(payload).await;
                return Ok(Enqueued {
                    version: version.to_string(),
                    options,
                    outcome: Some(outcome),
                });
            }
            Err(err) => {
                return Err(PipelineError::EnqueueFailure {
                    media_id,
                    version: version.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        info!(
            "Enqueued version `{}` of media {} on {} (priority {})",
            version, media_id, options.queue, options.priority
        );
        let outcome = if options.wait {
            Some(ticket.outcome().await)
        } else {
            None
        };
        Ok(Enqueued {
            version: version.to_string(),
            options,
            outcome,
        })
    }

    /// Retry a dropped connection a bounded number of times, doubling the delay.
    async fn submit(
        &self,
        payload: &JobPayload,
        options: &JobOptions,
    ) -> Result<JobTicket, TransportError> {
        let mut delay = self.config.enqueue_retry_delay();
        let mut attempt = 0;
        loop {
            match self
                .transport
                .run(MAKE_VERSION_HANDLER, payload.clone(), options)
            {
                Err(TransportError::ConnectionLost) if attempt < self.config.enqueue_retries => {
                    attempt += 1;
                    warn!(
                        "Lost queue connection enqueueing media {} version `{}`, retry {}/{} in {:?}",
                        payload.media_id,
                        payload.version,
                        attempt,
                        self.config.enqueue_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    if let Err(err) = self.transport.reconnect() {
                        warn!("Reconnect failed: {}", err);
                    }
                }
                result => return result,
            }
        }
    }

    async fn run_inline(&self, payload: JobPayload) -> JobOutcome {
        let handler = self.inline.clone();
        tokio::task::spawn_blocking(move || handler.handle(&payload))
            .await
            .unwrap_or_else(|join_error| JobOutcome::Lost(join_error.to_string()))
    }
}
