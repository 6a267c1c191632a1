use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;

use super::guard::InProgress;
use super::options::JobPayload;
use super::transport::{JobHandler, JobOutcome};
use crate::background::make::{MakeEngine, MakeOutcome, MakeRequest};
use crate::common::errors::{PipelineError, handle_error};
use crate::database::Store;
use crate::database::schema::VersionSchema;
use crate::models::{Locator, MediaType};
use crate::registry::SchemeRegistry;
use crate::utils::checksum_of;
use crate::utils::mime::mime_from_ext;

/// Worker side of a version job: make, then persist the result.
pub struct JobExecutor {
    store: Store,
    engine: Arc<MakeEngine>,
    schemes: Arc<SchemeRegistry>,
    in_progress: InProgress,
}

impl JobExecutor {
    pub fn new(store: Store, engine: Arc<MakeEngine>, schemes: Arc<SchemeRegistry>) -> Self {
        Self {
            store,
            engine,
            schemes,
            in_progress: InProgress::new(),
        }
    }

    pub fn execute(&self, payload: &JobPayload) -> Result<MakeOutcome> {
        let Some(_guard) = self
            .in_progress
            .try_acquire(payload.media_id, &payload.version)
        else {
            info!(
                "Version `{}` of media {} is already being made, skipping",
                payload.version, payload.media_id
            );
            return Ok(MakeOutcome::Skipped);
        };

        let media = self
            .store
            .load_media(payload.media_id)?
            .ok_or(PipelineError::UnknownMedia(payload.media_id))?;
        let request = MakeRequest::from_media(&media, &payload.version)?;

        let outcome = self.engine.make(&request);
        match &outcome {
            MakeOutcome::Skipped => {}
            MakeOutcome::Made(locator) => {
                if let Err(err) = self.persist_made(&request, locator) {
                    // Nothing references the new file once the write is rolled back.
                    if let Err(cleanup) = self.schemes.delete_resource(locator) {
                        warn!("Failed to remove unreferenced {}: {:#}", locator, cleanup);
                    }
                    return Err(err);
                }
            }
            MakeOutcome::Failed(_) => self.persist_failed(&request)?,
        }
        Ok(outcome)
    }

    fn persist_made(&self, request: &MakeRequest, locator: &Locator) -> Result<()> {
        let capability = self.schemes.capabilities(locator.scheme())?;
        let checksum = if capability.checksum {
            let path = self.schemes.resolve_path(locator)?;
            Some(checksum_of(&path)?)
        } else {
            None
        };
        let mime_type = locator
            .extension()
            .map(mime_from_ext)
            .unwrap_or_else(|| request.mime_type.clone());
        let media_type = MediaType::from_mime(&mime_type);
        let row = VersionSchema::processed(
            request.media_id,
            &request.version,
            locator,
            media_type,
            mime_type,
            checksum,
        );
        self.write_row(row)
    }

    fn persist_failed(&self, request: &MakeRequest) -> Result<()> {
        let row = VersionSchema::failed(request.media_id, &request.version, request.media_type);
        self.write_row(row)
    }

    /// Single-writer update of one version row. The file of a replaced row is
    /// removed only after the commit succeeded.
    fn write_row(&self, mut row: VersionSchema) -> Result<()> {
        let txn = self.store.begin_write()?;
        let previous = VersionSchema::get_for_update(&txn, row.media_id, &row.version)?;
        if let Some(previous) = &previous {
            row.created_time = previous.created_time;
        }
        row.upsert(&txn)?;
        txn.commit().with_context(|| {
            format!(
                "failed to commit version `{}` of media {}",
                row.version, row.media_id
            )
        })?;

        if let Some(replaced) = previous.and_then(|p| p.locator()) {
            if row.locator().as_ref() != Some(&replaced) {
                if let Err(err) = self.schemes.delete_resource(&replaced) {
                    warn!("Failed to remove replaced version file {}: {:#}", replaced, err);
                }
            }
        }
        Ok(())
    }
}

impl JobHandler for JobExecutor {
    fn handle(&self, payload: &JobPayload) -> JobOutcome {
        match self.execute(payload) {
            Ok(outcome) => JobOutcome::Completed(outcome),
            Err(err) => {
                let err = handle_error(err.context(format!(
                    "job for media {} version `{}` failed",
                    payload.media_id, payload.version
                )));
                JobOutcome::Completed(MakeOutcome::Failed(format!("{:#}", err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::make::{LocalHandler, Pipeline};
    use crate::background::processors::{DefaultBackend, DefaultMediaInfo};
    use crate::config::AppConfig;
    use crate::database::schema::{MediaSchema, VersionStatus};
    use crate::registry::{Assembly, AssemblyRegistry, CloneAction};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: AppConfig,
        store: Store,
        executor: JobExecutor,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::rooted_at(dir.path());
        let schemes = Arc::new(SchemeRegistry::with_defaults(&config).unwrap());
        let mut assemblies = AssemblyRegistry::new();
        assemblies.register(MediaType::Document, "fix0", Assembly::Clone(CloneAction::Copy));
        assemblies.register(
            MediaType::Document,
            "fix1",
            Assembly::instructions(vec![("convert", json!("image/png"))]),
        );
        let pipeline = Arc::new(Pipeline::new(
            schemes.clone(),
            Arc::new(assemblies),
            Arc::new(DefaultBackend::new(&config.temp_root)),
            Arc::new(DefaultMediaInfo),
        ));
        let mut engine = MakeEngine::new();
        engine.register("file", Arc::new(LocalHandler::new(pipeline)));
        let store = Store::open(&config.db_path).unwrap();
        let executor = JobExecutor::new(store.clone(), Arc::new(engine), schemes);
        Fixture {
            _dir: dir,
            config,
            store,
            executor,
        }
    }

    fn insert_document(fixture: &Fixture) -> MediaSchema {
        let path = fixture.config.object_root.join("imported/aa/00112233.pdf");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let locator = Locator::new("file", "imported/aa/00112233.pdf");
        let media = MediaSchema::new(0, &locator, "doc", MediaType::Document, "application/pdf");
        fixture.store.insert_new_media(media).unwrap()
    }

    fn payload(media_id: u64, version: &str) -> JobPayload {
        JobPayload {
            media_id,
            version: version.to_string(),
        }
    }

    #[test]
    fn test_made_version_is_persisted_with_checksum() {
        let fixture = fixture();
        let media = insert_document(&fixture);
        let outcome = fixture.executor.execute(&payload(media.id, "fix0")).unwrap();
        let MakeOutcome::Made(locator) = outcome else {
            panic!("expected a made version");
        };

        let rows = fixture.store.load_versions(media.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, VersionStatus::Processed);
        assert_eq!(rows[0].locator().unwrap(), locator);
        assert_eq!(rows[0].mime_type, "application/pdf");
        assert_eq!(
            rows[0].checksum,
            Some(checksum_of(fixture.config.object_root.join(locator.path())).unwrap())
        );
    }

    #[test]
    fn test_skipped_version_writes_nothing() {
        let fixture = fixture();
        let media = insert_document(&fixture);
        let outcome = fixture.executor.execute(&payload(media.id, "flux0")).unwrap();
        assert_eq!(outcome, MakeOutcome::Skipped);
        assert!(fixture.store.load_versions(media.id).unwrap().is_empty());
    }

    #[test]
    fn test_failed_version_is_recorded_as_error() {
        let fixture = fixture();
        let media = insert_document(&fixture);
        // Documents have no processing adapter, so the backend refuses the source.
        let outcome = fixture.executor.execute(&payload(media.id, "fix1")).unwrap();
        assert!(matches!(outcome, MakeOutcome::Failed(_)));
        let rows = fixture.store.load_versions(media.id).unwrap();
        assert_eq!(rows[0].status, VersionStatus::Error);
        assert!(rows[0].locator().is_none());
    }

    #[test]
    fn test_remake_replaces_previous_file() {
        let fixture = fixture();
        let media = insert_document(&fixture);
        let MakeOutcome::Made(first) = fixture.executor.execute(&payload(media.id, "fix0")).unwrap()
        else {
            panic!("expected a made version");
        };
        let MakeOutcome::Made(second) =
            fixture.executor.execute(&payload(media.id, "fix0")).unwrap()
        else {
            panic!("expected a made version");
        };
        assert_ne!(first, second);
        assert!(!fixture.config.object_root.join(first.path()).exists());
        assert!(fixture.config.object_root.join(second.path()).exists());
        assert_eq!(fixture.store.load_versions(media.id).unwrap().len(), 1);
    }

    #[test]
    fn test_busy_pair_is_skipped() {
        let fixture = fixture();
        let media = insert_document(&fixture);
        let _held = fixture.executor.in_progress.try_acquire(media.id, "fix0").unwrap();
        let outcome = fixture.executor.execute(&payload(media.id, "fix0")).unwrap();
        assert_eq!(outcome, MakeOutcome::Skipped);
    }

    #[test]
    fn test_unknown_media_is_error() {
        let fixture = fixture();
        assert!(fixture.executor.execute(&payload(42, "fix0")).is_err());
        assert!(matches!(
            fixture.executor.handle(&payload(42, "fix0")),
            JobOutcome::Completed(MakeOutcome::Failed(_))
        ));
    }
}
