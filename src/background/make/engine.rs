use log::{error, info, warn};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::handler::{DownloadHandler, LocalHandler, ProviderHandler};
use super::{MakeHandler, MakeOutcome, MakeRequest, Pipeline};
use crate::background::provider::ProviderResolver;
use crate::common::errors::PipelineError;

/// Routes a request to the handler registered for its source scheme.
#[derive(Default)]
pub struct MakeEngine {
    handlers: HashMap<String, Arc<dyn MakeHandler>>,
}

impl MakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `file` read in place, `http`/`https` downloaded, `vimeo`/`youtube` through `resolver`.
    pub fn with_defaults(
        pipeline: Arc<Pipeline>,
        resolver: Arc<dyn ProviderResolver>,
        temp_root: &Path,
    ) -> Self {
        let mut engine = Self::new();
        engine.register("file", Arc::new(LocalHandler::new(pipeline.clone())));
        let download = Arc::new(DownloadHandler::new(pipeline.clone(), temp_root));
        engine.register("http", download.clone());
        engine.register("https", download);
        let provider = Arc::new(ProviderHandler::new(pipeline, resolver, temp_root));
        engine.register("vimeo", provider.clone());
        engine.register("youtube", provider);
        engine
    }

    pub fn register(&mut self, scheme: &str, handler: Arc<dyn MakeHandler>) {
        self.handlers.insert(scheme.to_ascii_lowercase(), handler);
    }

    /// Never fails outward: errors and panics inside a handler become `Failed`.
    pub fn make(&self, request: &MakeRequest) -> MakeOutcome {
        let Some(handler) = self.handlers.get(request.source.scheme()) else {
            let err = PipelineError::UnhandledScheme(request.source.scheme().to_string());
            error!(
                "Cannot make version `{}` of media {}: {}",
                request.version, request.media_id, err
            );
            return MakeOutcome::Failed(err.to_string());
        };

        let start_time = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| handler.make(request)));
        let duration = format!("{:?}", start_time.elapsed());

        match result {
            Ok(Ok(MakeOutcome::Failed(reason))) => {
                warn!(
                    duration = &*duration;
                    "Version `{}` of media {} failed: {}", request.version, request.media_id, reason
                );
                MakeOutcome::Failed(reason)
            }
            Ok(Ok(outcome)) => {
                info!(
                    duration = &*duration;
                    "Version `{}` of media {}: {}", request.version, request.media_id, outcome
                );
                outcome
            }
            Ok(Err(err)) => {
                error!(
                    duration = &*duration;
                    "Version `{}` of media {} ({}) failed: {:#}",
                    request.version, request.media_id, request.source, err
                );
                MakeOutcome::Failed(format!("{:#}", err))
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!(
                    "Version `{}` of media {} panicked: {}",
                    request.version, request.media_id, reason
                );
                MakeOutcome::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::processors::{
        MediaInfo, MediaInfoBackend, ProcessingBackend, ProcessingHandle, Step,
    };
    use crate::config::AppConfig;
    use crate::models::{Locator, MediaType};
    use crate::registry::{Assembly, AssemblyRegistry, CloneAction, SchemeRegistry};
    use anyhow::Result;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        operations: Mutex<Vec<String>>,
        stores: AtomicUsize,
    }

    struct ScriptedHandle {
        calls: Arc<Calls>,
        fail_on: Option<&'static str>,
    }

    impl ProcessingHandle for ScriptedHandle {
        fn name(&self) -> MediaType {
            MediaType::Image
        }

        fn convert(&mut self, _mime_type: &str) -> Result<Step> {
            self.calls.operations.lock().unwrap().push("convert".into());
            Ok(Step::Continue)
        }

        fn passthru(&mut self, operation: &str, _args: &[Value]) -> Result<bool> {
            self.calls.operations.lock().unwrap().push(operation.into());
            Ok(self.fail_on != Some(operation))
        }

        fn store(&mut self, target: &Path) -> Result<()> {
            self.calls.stores.fetch_add(1, Ordering::SeqCst);
            std::fs::write(target, b"processed")?;
            Ok(())
        }
    }

    struct ScriptedBackend {
        calls: Arc<Calls>,
        fail_on: Option<&'static str>,
    }

    impl ProcessingBackend for ScriptedBackend {
        fn factory(&self, _source: &Path, _mime_type: &str) -> Result<Box<dyn ProcessingHandle>> {
            Ok(Box::new(ScriptedHandle {
                calls: self.calls.clone(),
                fail_on: self.fail_on,
            }))
        }
    }

    struct NoInfo;

    impl MediaInfoBackend for NoInfo {
        fn inspect(&self, _path: &Path) -> Result<MediaInfo> {
            Ok(MediaInfo::default())
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: AppConfig,
        engine: MakeEngine,
        calls: Arc<Calls>,
    }

    fn fixture(assemblies: AssemblyRegistry, fail_on: Option<&'static str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::rooted_at(dir.path());
        let schemes = SchemeRegistry::with_defaults(&config).unwrap();
        let calls = Arc::new(Calls::default());
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(schemes),
            Arc::new(assemblies),
            Arc::new(ScriptedBackend {
                calls: calls.clone(),
                fail_on,
            }),
            Arc::new(NoInfo),
        ));
        let mut engine = MakeEngine::new();
        engine.register("file", Arc::new(LocalHandler::new(pipeline)));
        Fixture {
            _dir: dir,
            config,
            engine,
            calls,
        }
    }

    fn request(fixture: &Fixture, media_type: MediaType, mime: &str, version: &str) -> MakeRequest {
        let original = fixture.config.object_root.join("imported/ab/01234567.bin");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        std::fs::write(&original, b"original bytes").unwrap();
        MakeRequest {
            media_id: 1,
            source: Locator::new("file", "imported/ab/01234567.bin"),
            media_type,
            mime_type: mime.to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn test_clone_copy_produces_identical_bytes() {
        let mut assemblies = AssemblyRegistry::new();
        assemblies.register(MediaType::Document, "fix0", Assembly::Clone(CloneAction::Copy));
        let fixture = fixture(assemblies, None);
        let request = request(&fixture, MediaType::Document, "application/pdf", "fix0");

        let MakeOutcome::Made(locator) = fixture.engine.make(&request) else {
            panic!("expected a made version");
        };
        assert!(locator.path().starts_with("versions/fix0/"));
        let made = fixture.config.object_root.join(locator.path());
        assert_eq!(std::fs::read(made).unwrap(), b"original bytes");
        assert_eq!(fixture.calls.stores.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_instruction_failure_aborts_without_store() {
        let mut assemblies = AssemblyRegistry::new();
        assemblies.register(
            MediaType::Image,
            "fix1",
            Assembly::instructions(vec![
                ("sharpen", json!([1])),
                ("vignette", json!([])),
                ("sepia", json!([])),
            ]),
        );
        let fixture = fixture(assemblies, Some("vignette"));
        let request = request(&fixture, MediaType::Image, "image/png", "fix1");

        assert!(matches!(fixture.engine.make(&request), MakeOutcome::Failed(_)));
        assert_eq!(fixture.calls.stores.load(Ordering::SeqCst), 0);
        assert_eq!(
            *fixture.calls.operations.lock().unwrap(),
            vec!["sharpen", "vignette"]
        );
    }

    #[test]
    fn test_instructions_run_then_store() {
        let mut assemblies = AssemblyRegistry::new();
        assemblies.register(
            MediaType::Image,
            "fix1",
            Assembly::instructions(vec![("convert", json!("image/png")), ("sepia", json!([]))]),
        );
        let fixture = fixture(assemblies, None);
        let request = request(&fixture, MediaType::Image, "image/jpeg", "fix1");

        let MakeOutcome::Made(locator) = fixture.engine.make(&request) else {
            panic!("expected a made version");
        };
        assert_eq!(locator.extension().as_deref(), Some("png"));
        assert_eq!(fixture.calls.stores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_assembly_is_skipped() {
        let fixture = fixture(AssemblyRegistry::new(), None);
        let request = request(&fixture, MediaType::Audio, "audio/ogg", "fix1");
        assert_eq!(fixture.engine.make(&request), MakeOutcome::Skipped);
        assert!(!fixture.config.object_root.join("versions").exists());
    }

    #[test]
    fn test_unhandled_scheme_fails() {
        let fixture = fixture(AssemblyRegistry::with_defaults(None).unwrap(), None);
        let mut request = request(&fixture, MediaType::Image, "image/png", "fix1");
        request.source = Locator::new("ftp", "example.org/a.png");
        match fixture.engine.make(&request) {
            MakeOutcome::Failed(reason) => assert!(reason.contains("ftp")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_missing_source_is_contained_as_failure() {
        let mut assemblies = AssemblyRegistry::new();
        assemblies.register(MediaType::Document, "fix0", Assembly::Clone(CloneAction::Copy));
        let fixture = fixture(assemblies, None);
        let mut request = request(&fixture, MediaType::Document, "application/pdf", "fix0");
        request.source = Locator::new("file", "imported/zz/missing.pdf");
        assert!(matches!(fixture.engine.make(&request), MakeOutcome::Failed(_)));
    }
}
