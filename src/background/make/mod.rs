//! Version make engine - materializes one version of one media
//!
//! Includes:
//! - Request / outcome types
//! - Image preprocessing (animation profile, EXIF rotation)
//! - The shared pipeline: target allocation, clone shortcut, instruction run, store
//! - Scheme-specific handlers and the engine that dispatches to them

pub mod clone;
pub mod engine;
pub mod handler;
pub mod target;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use serde_json::{Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::background::processors::{
    MediaInfo, MediaInfoBackend, ProcessingBackend, apply_instructions,
};
use crate::common::VERSIONS_DIR;
use crate::common::errors::PipelineError;
use crate::database::schema::MediaSchema;
use crate::models::{Locator, MediaType};
use crate::registry::{Assembly, AssemblyRegistry, Instruction, SchemeRegistry};
use crate::utils::fs_utils::{delete_with_retry, ensure_parent};

pub use engine::MakeEngine;
pub use handler::{DownloadHandler, LocalHandler, ProviderHandler};

/// One (media, version) pair to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeRequest {
    pub media_id: u64,
    pub source: Locator,
    pub media_type: MediaType,
    pub mime_type: String,
    pub version: String,
}

impl MakeRequest {
    pub fn from_media(media: &MediaSchema, version: impl Into<String>) -> Result<Self> {
        Ok(Self {
            media_id: media.id,
            source: media.locator()?,
            media_type: media.media_type,
            mime_type: media.mime_type.clone(),
            version: version.into(),
        })
    }
}

/// Skipped and Failed are distinct: only Failed leaves an error record behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MakeOutcome {
    /// No assembly for this (type, version), or the version is served by a remote provider
    Skipped,
    Failed(String),
    Made(Locator),
}

impl fmt::Display for MakeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MakeOutcome::Skipped => write!(f, "skipped"),
            MakeOutcome::Failed(reason) => write!(f, "failed ({})", reason),
            MakeOutcome::Made(locator) => write!(f, "made {}", locator),
        }
    }
}

/// Materializes versions for sources of one or more schemes.
pub trait MakeHandler: Send + Sync {
    fn make(&self, request: &MakeRequest) -> Result<MakeOutcome>;
}

// ────────────────────────────────────────────────────────────────
// Preprocessing
// ────────────────────────────────────────────────────────────────

/// Counter-clockwise degrees that undo an EXIF orientation. Mirrored variants
/// share the angle of their unmirrored counterpart.
pub fn orientation_to_rotation(orientation: u32) -> Option<i32> {
    match orientation {
        1 | 2 => Some(0),
        3 | 4 => Some(180),
        5 | 6 => Some(-90),
        7 | 8 => Some(90),
        _ => None,
    }
}

const ANIMATION_INCOMPATIBLE: [&str; 3] = ["background", "interlace", "compress"];

/// Adjust image instructions to what the source actually is.
///
/// Animated sources keep their frames: every conversion targets GIF and
/// flattening or lossy steps are removed. `rotate: true` becomes the angle
/// derived from EXIF orientation, or disappears if the orientation is unknown.
pub fn preprocess_image(instructions: &[Instruction], info: &MediaInfo) -> Vec<Instruction> {
    instructions
        .iter()
        .filter(|i| !(info.is_animated && ANIMATION_INCOMPATIBLE.contains(&i.name.as_str())))
        .filter_map(|instruction| match instruction.name.as_str() {
            "convert" if info.is_animated => Some(Instruction::new("convert", json!("image/gif"))),
            "rotate" => match instruction.args.first() {
                Some(Value::Bool(true)) => info
                    .orientation
                    .and_then(orientation_to_rotation)
                    .map(|angle| Instruction::new("rotate", json!(angle))),
                Some(Value::Bool(false)) | None => None,
                Some(_) => Some(instruction.clone()),
            },
            _ => Some(instruction.clone()),
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────

/// Everything a handler needs to turn a local source file into a version.
pub struct Pipeline {
    pub schemes: Arc<SchemeRegistry>,
    pub assemblies: Arc<AssemblyRegistry>,
    pub backend: Arc<dyn ProcessingBackend>,
    pub media_info: Arc<dyn MediaInfoBackend>,
}

impl Pipeline {
    pub fn new(
        schemes: Arc<SchemeRegistry>,
        assemblies: Arc<AssemblyRegistry>,
        backend: Arc<dyn ProcessingBackend>,
        media_info: Arc<dyn MediaInfoBackend>,
    ) -> Self {
        Self {
            schemes,
            assemblies,
            backend,
            media_info,
        }
    }

    pub fn assembly(&self, media_type: MediaType, version: &str) -> Option<&Assembly> {
        self.assemblies.get(media_type, version)
    }

    /// Directory holding every file of `version`.
    pub fn version_root(&self, version: &str) -> Result<PathBuf> {
        let base = self
            .schemes
            .base("file")?
            .ok_or_else(|| anyhow!("the file scheme has no base"))?;
        Ok(Path::new(base).join(VERSIONS_DIR).join(version))
    }

    /// Run `assembly` against a local `source` and store the result under the version root.
    pub fn materialize(
        &self,
        request: &MakeRequest,
        source: &Path,
        source_mime: &str,
        media_type: MediaType,
        assembly: &Assembly,
    ) -> Result<MakeOutcome> {
        let assembly = match assembly {
            Assembly::Instructions(instructions) if media_type == MediaType::Image => {
                let info = self.media_info.inspect(source).unwrap_or_else(|err| {
                    warn!("Cannot inspect {:?}, using defaults: {:#}", source, err);
                    MediaInfo::default()
                });
                debug!("Media info for {:?}: {:?}", source, info);
                Assembly::Instructions(preprocess_image(instructions, &info))
            }
            other => other.clone(),
        };

        let version_root = self.version_root(&request.version)?;
        let extension = target::target_extension(source, source_mime, &assembly);
        let target_path = version_root.join(target::generate(&version_root, &extension, true));
        ensure_parent(&target_path)?;

        match &assembly {
            Assembly::Clone(action) => {
                if let Err(err) = clone::execute(*action, source, &target_path) {
                    warn!(
                        "Clone `{}` failed for media {} version `{}`: {:#}",
                        action, request.media_id, request.version, err
                    );
                    return Ok(MakeOutcome::Failed(format!("{:#}", err)));
                }
            }
            Assembly::Instructions(instructions) => {
                let handle = self.backend.factory(source, source_mime)?;
                let Some(mut handle) = apply_instructions(handle, instructions)? else {
                    let failure = PipelineError::ProcessingFailure {
                        media_id: request.media_id,
                        version: request.version.clone(),
                        reason: "an instruction reported failure".to_string(),
                    };
                    return Ok(MakeOutcome::Failed(failure.to_string()));
                };
                if let Err(err) = handle.store(&target_path) {
                    delete_with_retry(&target_path)?;
                    return Err(err).with_context(|| format!("failed to store {:?}", target_path));
                }
            }
        }

        let locator = self.schemes.locator_for_path("file", &target_path)?;
        Ok(MakeOutcome::Made(locator))
    }
}
