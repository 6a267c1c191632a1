//! Processing backend - executes assembly instructions against media bytes
//!
//! Includes:
//! - The handle protocol every adapter implements
//! - Instruction dispatch table
//! - `image` crate adapter for still and animated images
//! - ffmpeg adapter for video and audio
//! - Media info probing (dimensions, EXIF orientation, animation)

pub mod dispatch;
pub mod ffmpeg;
pub mod raster;
pub mod info;

use anyhow::{Result, bail};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

use crate::models::MediaType;

pub use dispatch::apply_instructions;
pub use info::{DefaultMediaInfo, MediaInfo, MediaInfoBackend};

/// Result of a single instruction.
pub enum Step {
    Continue,
    /// The instruction produced a new active handle (e.g. video -> still frame)
    Replace(Box<dyn ProcessingHandle>),
    /// The instruction reported failure; the pipeline stops without storing
    Abort,
}

/// An opened source inside the processing backend.
///
/// Typed operations default to `passthru`, so an adapter only overrides what
/// it natively understands.
pub trait ProcessingHandle: Send {
    /// Media type this handle currently produces.
    fn name(&self) -> MediaType;

    fn convert(&mut self, mime_type: &str) -> Result<Step>;

    fn fit(&mut self, width: u32, height: u32) -> Result<bool> {
        self.passthru("fit", &[json!(width), json!(height)])
    }

    fn fit_crop(&mut self, width: u32, height: u32) -> Result<bool> {
        self.passthru("fitCrop", &[json!(width), json!(height)])
    }

    fn zoom_crop(&mut self, width: u32, height: u32) -> Result<bool> {
        self.passthru("zoomCrop", &[json!(width), json!(height)])
    }

    fn strip(&mut self) -> Result<bool> {
        self.passthru("strip", &[])
    }

    /// 0 (best quality) to 9 (smallest output).
    fn compress(&mut self, level: f64) -> Result<bool> {
        self.passthru("compress", &[json!(level)])
    }

    fn color_depth(&mut self, bits: u32) -> Result<bool> {
        self.passthru("colorDepth", &[json!(bits)])
    }

    /// Counter-clockwise degrees; negative values turn clockwise.
    fn rotate(&mut self, degrees: i32) -> Result<bool> {
        self.passthru("rotate", &[json!(degrees)])
    }

    fn background(&mut self, color: &str) -> Result<bool> {
        self.passthru("background", &[json!(color)])
    }

    fn interlace(&mut self, enabled: bool) -> Result<bool> {
        self.passthru("interlace", &[json!(enabled)])
    }

    /// Generic entry point for operations without a typed method.
    fn passthru(&mut self, operation: &str, args: &[Value]) -> Result<bool> {
        let _ = args;
        bail!("{} backend does not support operation `{}`", self.name(), operation)
    }

    fn store(&mut self, target: &Path) -> Result<()>;
}

/// Opens sources into processing handles.
pub trait ProcessingBackend: Send + Sync {
    /// Fails when the source format is not supported.
    fn factory(&self, source: &Path, mime_type: &str) -> Result<Box<dyn ProcessingHandle>>;
}

/// `image` for pictures, ffmpeg for video and audio.
pub struct DefaultBackend {
    temp_root: PathBuf,
}

impl DefaultBackend {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }
}

impl ProcessingBackend for DefaultBackend {
    fn factory(&self, source: &Path, mime_type: &str) -> Result<Box<dyn ProcessingHandle>> {
        match MediaType::from_mime(mime_type) {
            MediaType::Image => Ok(Box::new(raster::ImageHandle::open(source)?)),
            media_type @ (MediaType::Video | MediaType::Audio) => Ok(Box::new(
                ffmpeg::FfmpegHandle::new(source, media_type, &self.temp_root),
            )),
            MediaType::Document => bail!(
                "no processing adapter for {:?} ({})",
                source,
                mime_type
            ),
        }
    }
}
