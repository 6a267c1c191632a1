//! Library-level operations
//!
//! Includes:
//! - `Library`: the registries, store and queue wired together once at startup
//! - Version orchestration (make, delete, regenerate)
//! - Media transfer and deletion
//! - Storage reconciliation (sync) and checksum verification

pub mod media;
pub mod sync;
pub mod verify;
pub mod versions;

use anyhow::Result;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::background::jobs::{Dispatcher, JobExecutor, LocalQueue, MAKE_VERSION_HANDLER, Partition};
use crate::background::make::{MakeEngine, Pipeline};
use crate::background::processors::{
    DefaultBackend, DefaultMediaInfo, MediaInfoBackend, ProcessingBackend,
};
use crate::background::provider::{OEmbedResolver, ProviderResolver};
use crate::config::AppConfig;
use crate::database::Store;
use crate::models::Locator;
use crate::registry::{AssemblyRegistry, SchemeRegistry};

/// Cheap to clone; clones share the store, registries and queue.
#[derive(Clone)]
pub struct Library {
    pub config: AppConfig,
    pub store: Store,
    pub schemes: Arc<SchemeRegistry>,
    pub assemblies: Arc<AssemblyRegistry>,
    pub resolver: Arc<dyn ProviderResolver>,
    pub queue: LocalQueue,
    pub dispatcher: Arc<Dispatcher>,
}

impl Library {
    /// Library with the `image`/ffmpeg backend and the oEmbed resolver.
    pub fn open(config: AppConfig) -> Result<Self> {
        let backend = Arc::new(DefaultBackend::new(&config.temp_root));
        Self::with_backends(
            config,
            backend,
            Arc::new(DefaultMediaInfo),
            Arc::new(OEmbedResolver),
        )
    }

    pub fn with_backends(
        config: AppConfig,
        backend: Arc<dyn ProcessingBackend>,
        media_info: Arc<dyn MediaInfoBackend>,
        resolver: Arc<dyn ProviderResolver>,
    ) -> Result<Self> {
        let schemes = Arc::new(SchemeRegistry::with_defaults(&config)?);
        let assemblies = Arc::new(AssemblyRegistry::with_defaults(
            config.assembly_path.as_deref(),
        )?);
        let store = Store::open(&config.db_path)?;

        let pipeline = Arc::new(Pipeline::new(
            schemes.clone(),
            assemblies.clone(),
            backend,
            media_info,
        ));
        let engine = Arc::new(MakeEngine::with_defaults(
            pipeline,
            resolver.clone(),
            &config.temp_root,
        ));
        let executor = Arc::new(JobExecutor::new(store.clone(), engine, schemes.clone()));

        let queue = LocalQueue::new();
        queue.register_handler(MAKE_VERSION_HANDLER, executor.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(queue.clone()),
            assemblies.clone(),
            executor,
            config.clone(),
        ));

        info!(
            "Library opened with {} version name(s)",
            assemblies.versions().len()
        );
        Ok(Self {
            config,
            store,
            schemes,
            assemblies,
            resolver,
            queue,
            dispatcher,
        })
    }

    /// Spawn the configured number of `fix` and `flux` workers on the current runtime.
    pub fn start_workers(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self
            .queue
            .start_workers(Partition::Fix, self.config.fix_workers.max(1));
        handles.extend(
            self.queue
                .start_workers(Partition::Flux, self.config.flux_workers.max(1)),
        );
        handles
    }

    /// Filesystem path of a locator whose scheme has a storage base, `None` for remote resources.
    pub fn local_path(&self, locator: &Locator) -> Result<Option<PathBuf>> {
        if self.schemes.base(locator.scheme())?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.schemes.resolve_path(locator)?))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::background::provider::ProviderInfo;
    use anyhow::bail;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use tempfile::TempDir;

    /// Resolves `vimeo://` locators to a fixed poster URL.
    pub struct StaticResolver;

    impl ProviderResolver for StaticResolver {
        fn resolve(&self, url: &str) -> Result<ProviderInfo> {
            match crate::background::provider::parse_provider_url(url) {
                Some((provider, id)) => Ok(ProviderInfo {
                    provider: provider.to_string(),
                    locator: Locator::new(provider, id),
                    thumbnail_url: None,
                    title: Some("Provider clip".to_string()),
                }),
                None => bail!("not a provider url: {}", url),
            }
        }

        fn thumbnail_url(&self, locator: &Locator) -> Result<String> {
            bail!("no poster for {}", locator)
        }
    }

    pub fn library(dir: &TempDir) -> Library {
        let config = AppConfig {
            fix_workers: 1,
            flux_workers: 1,
            enqueue_retry_delay_ms: 1,
            ..AppConfig::rooted_at(dir.path())
        };
        Library::with_backends(
            config.clone(),
            Arc::new(DefaultBackend::new(&config.temp_root)),
            Arc::new(DefaultMediaInfo),
            Arc::new(StaticResolver),
        )
        .unwrap()
    }

    pub fn write_png(path: &Path, width: u32, height: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))
            .save(path)
            .unwrap();
    }
}
