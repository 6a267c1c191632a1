use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{MakeHandler, MakeOutcome, MakeRequest, Pipeline};
use crate::background::provider::ProviderResolver;
use crate::models::{Locator, MediaType};
use crate::registry::Assembly;
use crate::utils::fs_utils::{delete_with_retry, ensure_dir};
use crate::utils::mime::{extension_for_mime, mime_from_ext};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

// ────────────────────────────────────────────────────────────────
// Local files
// ────────────────────────────────────────────────────────────────

/// `file://` sources, read in place.
pub struct LocalHandler {
    pipeline: Arc<Pipeline>,
}

impl LocalHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

impl MakeHandler for LocalHandler {
    fn make(&self, request: &MakeRequest) -> Result<MakeOutcome> {
        let Some(assembly) = self.pipeline.assembly(request.media_type, &request.version) else {
            return Ok(MakeOutcome::Skipped);
        };
        let source = self.pipeline.schemes.resolve_path(&request.source)?;
        if !source.is_file() {
            bail!("source {:?} of media {} does not exist", source, request.media_id);
        }
        self.pipeline.materialize(
            request,
            &source,
            &request.mime_type,
            request.media_type,
            assembly,
        )
    }
}

// ────────────────────────────────────────────────────────────────
// Downloads
// ────────────────────────────────────────────────────────────────

/// A downloaded file that is removed when dropped.
pub struct TempDownload {
    pub path: PathBuf,
    pub mime_type: String,
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if let Err(err) = delete_with_retry(&self.path) {
            warn!("Failed to remove temporary download {:?}: {:#}", self.path, err);
        }
    }
}

/// Fetch `url` into `temp_root`. Blocking; call from a blocking thread.
pub fn download(url: &str, temp_root: &Path) -> Result<TempDownload> {
    ensure_dir(temp_root)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to request {}", url))?
        .error_for_status()
        .with_context(|| format!("download of {} was rejected", url))?;

    let url_extension = Locator::parse(url).ok().and_then(|l| l.extension());
    let header_mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .filter(|mime| !mime.is_empty() && mime != "application/octet-stream");
    let mime_type = header_mime
        .or_else(|| url_extension.as_deref().map(mime_from_ext))
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let extension = extension_for_mime(&mime_type)
        .or(url_extension)
        .unwrap_or_else(|| "bin".to_string());

    let path = temp_root.join(format!("{}.{}", Uuid::new_v4(), extension));
    let temp = TempDownload {
        path: path.clone(),
        mime_type,
    };
    let mut writer = BufWriter::new(
        File::create(&path).with_context(|| format!("failed to create {:?}", path))?,
    );
    let bytes = response
        .copy_to(&mut writer)
        .with_context(|| format!("failed to download {}", url))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {:?}", path))?;
    debug!("Downloaded {} bytes from {} to {:?}", bytes, url, path);
    Ok(temp)
}

/// `http://` and `https://` sources, fetched before processing.
pub struct DownloadHandler {
    pipeline: Arc<Pipeline>,
    temp_root: PathBuf,
}

impl DownloadHandler {
    pub fn new(pipeline: Arc<Pipeline>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            temp_root: temp_root.into(),
        }
    }
}

impl MakeHandler for DownloadHandler {
    fn make(&self, request: &MakeRequest) -> Result<MakeOutcome> {
        let Some(assembly) = self.pipeline.assembly(request.media_type, &request.version) else {
            return Ok(MakeOutcome::Skipped);
        };
        let capability = self.pipeline.schemes.capabilities(request.source.scheme())?;
        if !capability.download {
            bail!("scheme `{}` does not allow downloads", request.source.scheme());
        }
        let fetched = download(&request.source.to_string(), &self.temp_root)?;
        self.pipeline.materialize(
            request,
            &fetched.path,
            &request.mime_type,
            request.media_type,
            assembly,
        )
    }
}

// ────────────────────────────────────────────────────────────────
// Remote providers
// ────────────────────────────────────────────────────────────────

/// `vimeo://` / `youtube://` sources.
///
/// Versions converting to a still image are derived from the provider's
/// poster. Every other version is the provider's own player and is skipped.
pub struct ProviderHandler {
    pipeline: Arc<Pipeline>,
    resolver: Arc<dyn ProviderResolver>,
    temp_root: PathBuf,
}

impl ProviderHandler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        resolver: Arc<dyn ProviderResolver>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            resolver,
            temp_root: temp_root.into(),
        }
    }
}

/// True when the version stands for a poster rather than the playable asset.
pub fn is_poster_version(assembly: &Assembly) -> bool {
    assembly
        .target_mime()
        .is_some_and(|mime| MediaType::from_mime(mime) == MediaType::Image)
}

impl MakeHandler for ProviderHandler {
    fn make(&self, request: &MakeRequest) -> Result<MakeOutcome> {
        let Some(assembly) = self.pipeline.assembly(request.media_type, &request.version) else {
            return Ok(MakeOutcome::Skipped);
        };
        if !is_poster_version(assembly) {
            info!(
                "Version `{}` of media {} is served by {}",
                request.version,
                request.media_id,
                request.source.scheme()
            );
            return Ok(MakeOutcome::Skipped);
        }

        let poster = self.resolver.fetch_poster(&request.source, &self.temp_root)?;
        if MediaType::from_mime(&poster.mime_type) != MediaType::Image {
            return Err(anyhow!(
                "poster of {} is not an image ({})",
                request.source,
                poster.mime_type
            ));
        }
        self.pipeline.materialize(
            request,
            &poster.path,
            &poster.mime_type,
            MediaType::Image,
            assembly,
        )
    }
}
