//! ffmpeg adapter - video and audio versions
//!
//! Includes:
//! - Silent ffmpeg command construction
//! - Argument accumulation (scale filters, codecs, quality)
//! - Still-frame extraction handing over to the image adapter

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use uuid::Uuid;

use super::raster::ImageHandle;
use super::{ProcessingHandle, Step};
use crate::models::MediaType;
use crate::utils::fs_utils::{delete_with_retry, ensure_dir, ensure_parent};

pub fn create_silent_ffmpeg_command() -> Command {
    let mut cmd = Command::new("ffmpeg");
    // Global options must come before the input/output options.
    cmd.args(["-v", "quiet", "-hide_banner", "-nostats", "-nostdin"]);
    cmd
}

fn run(mut cmd: Command, what: &str) -> Result<()> {
    let status = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("failed to execute ffmpeg for {}", what))?;
    if !status.success() {
        return Err(anyhow!(
            "ffmpeg {} failed with exit code: {}",
            what,
            status.code().unwrap_or(-1)
        ));
    }
    Ok(())
}

/// Codec arguments for a target container.
fn codec_args(mime_type: &str) -> Option<&'static [&'static str]> {
    let args: &'static [&'static str] = match mime_type {
        "video/mp4" => &["-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-movflags", "faststart"],
        "video/webm" => &["-c:v", "libvpx-vp9", "-c:a", "libopus"],
        "video/ogg" => &["-c:v", "libtheora", "-c:a", "libvorbis"],
        "audio/ogg" => &["-vn", "-c:a", "libvorbis"],
        "audio/mpeg" => &["-vn", "-c:a", "libmp3lame"],
        "audio/mp4" | "audio/aac" => &["-vn", "-c:a", "aac"],
        "audio/flac" => &["-vn", "-c:a", "flac"],
        "audio/wav" => &["-vn", "-c:a", "pcm_s16le"],
        _ => return None,
    };
    Some(args)
}

pub struct FfmpegHandle {
    source: PathBuf,
    media_type: MediaType,
    temp_root: PathBuf,
    filters: Vec<String>,
    output_args: Vec<String>,
    target_mime: Option<String>,
}

impl FfmpegHandle {
    pub fn new(source: &Path, media_type: MediaType, temp_root: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            media_type,
            temp_root: temp_root.to_path_buf(),
            filters: Vec::new(),
            output_args: Vec::new(),
            target_mime: None,
        }
    }

    /// Arguments that `store` would pass after the input, for inspection and logging.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.filters.is_empty() {
            args.push("-vf".to_string());
            args.push(self.filters.join(","));
        }
        args.extend(self.output_args.iter().cloned());
        args
    }

    /// First frame as a still image handle. The intermediate file is removed afterwards.
    fn extract_still(&self, mime_type: &str) -> Result<ImageHandle> {
        ensure_dir(&self.temp_root)?;
        let frame_path = self.temp_root.join(format!("{}.png", Uuid::new_v4()));

        let mut cmd = create_silent_ffmpeg_command();
        cmd.arg("-y").arg("-i").arg(&self.source);
        cmd.args(["-ss", "0", "-vframes", "1"]);
        if !self.filters.is_empty() {
            cmd.arg("-vf").arg(self.filters.join(","));
        }
        cmd.arg(&frame_path);
        let result = run(cmd, "still frame extraction").and_then(|_| {
            let mut handle = ImageHandle::open(&frame_path)?;
            handle.convert(mime_type)?;
            Ok(handle)
        });
        delete_with_retry(&frame_path)?;
        result
    }
}

impl ProcessingHandle for FfmpegHandle {
    fn name(&self) -> MediaType {
        self.media_type
    }

    fn convert(&mut self, mime_type: &str) -> Result<Step> {
        match MediaType::from_mime(mime_type) {
            MediaType::Image if self.media_type == MediaType::Video => {
                let still = self
                    .extract_still(mime_type)
                    .with_context(|| format!("failed to extract a still from {:?}", self.source))?;
                Ok(Step::Replace(Box::new(still)))
            }
            MediaType::Video | MediaType::Audio => {
                let args = codec_args(mime_type)
                    .ok_or_else(|| anyhow!("ffmpeg backend cannot produce {}", mime_type))?;
                self.output_args.extend(args.iter().map(|a| a.to_string()));
                self.media_type = MediaType::from_mime(mime_type);
                self.target_mime = Some(mime_type.to_string());
                Ok(Step::Continue)
            }
            _ => bail!("cannot convert {} to {}", self.media_type, mime_type),
        }
    }

    fn fit(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.media_type == MediaType::Audio {
            return Ok(true);
        }
        // Downscale only, keep aspect and even dimensions for yuv420p.
        self.filters.push(format!(
            "scale=w='min({w},iw)':h='min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
            w = width,
            h = height
        ));
        Ok(true)
    }

    fn fit_crop(&mut self, width: u32, height: u32) -> Result<bool> {
        self.zoom_crop(width, height)
    }

    fn zoom_crop(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.media_type == MediaType::Audio {
            return Ok(true);
        }
        self.filters.push(format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
            w = width,
            h = height
        ));
        Ok(true)
    }

    fn strip(&mut self) -> Result<bool> {
        self.output_args.extend(["-map_metadata".to_string(), "-1".to_string()]);
        Ok(true)
    }

    fn compress(&mut self, level: f64) -> Result<bool> {
        let level = level.clamp(0.0, 9.0);
        match self.media_type {
            MediaType::Audio => {
                // libvorbis/libmp3lame quality scales run the other way round.
                let quality = (9.0 - level).round() as u32;
                self.output_args
                    .extend(["-q:a".to_string(), quality.to_string()]);
            }
            _ => {
                let crf = 18 + (level * 2.0).round() as u32;
                self.output_args.extend(["-crf".to_string(), crf.to_string()]);
            }
        }
        Ok(true)
    }

    fn rotate(&mut self, degrees: i32) -> Result<bool> {
        let filter = match degrees.rem_euclid(360) {
            0 => return Ok(true),
            90 => "transpose=2",
            180 => "transpose=1,transpose=1",
            270 => "transpose=1",
            other => bail!("rotation by {} degrees is not supported", other),
        };
        self.filters.push(filter.to_string());
        Ok(true)
    }

    /// Unknown operations become raw ffmpeg output options: `-<op> <args...>`.
    fn passthru(&mut self, operation: &str, args: &[Value]) -> Result<bool> {
        self.output_args.push(format!("-{}", operation));
        for arg in args {
            let value = match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.output_args.push(value);
        }
        Ok(true)
    }

    fn store(&mut self, target: &Path) -> Result<()> {
        ensure_parent(target)?;
        let start_time = Instant::now();
        let mut cmd = create_silent_ffmpeg_command();
        cmd.arg("-y").arg("-i").arg(&self.source);
        cmd.args(self.output_args());
        cmd.arg(target);
        debug!("Running {:?}", cmd);
        run(cmd, "transcode")?;
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Transcoded {:?} -> {:?} ({})",
            self.source,
            target,
            self.target_mime.as_deref().unwrap_or("source format")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn video() -> FfmpegHandle {
        FfmpegHandle::new(Path::new("/in/clip.mov"), MediaType::Video, Path::new("/tmp"))
    }

    #[test]
    fn test_video_convert_accumulates_codec_and_scale() {
        let mut handle = video();
        assert!(matches!(handle.convert("video/mp4").unwrap(), Step::Continue));
        assert!(handle.fit(1280, 720).unwrap());
        let args = handle.output_args();
        assert_eq!(args[0], "-vf");
        assert!(args[1].contains("min(1280,iw)"));
        assert!(args.contains(&"libx264".to_string()));
    }

    #[test]
    fn test_audio_ignores_geometry_and_uses_quality_scale() {
        let mut handle =
            FfmpegHandle::new(Path::new("/in/a.wav"), MediaType::Audio, Path::new("/tmp"));
        handle.convert("audio/ogg").unwrap();
        handle.fit(100, 100).unwrap();
        handle.compress(5.0).unwrap();
        let args = handle.output_args();
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.ends_with(&["-q:a".to_string(), "4".to_string()]));
    }

    #[test]
    fn test_unsupported_target_is_error() {
        let mut handle = video();
        assert!(handle.convert("video/x-unknown").is_err());
        assert!(handle.convert("application/pdf").is_err());
    }

    #[test]
    fn test_passthru_becomes_output_option() {
        let mut handle = video();
        handle.passthru("r", &[json!(24)]).unwrap();
        handle.passthru("preset", &[json!("slow")]).unwrap();
        assert_eq!(handle.output_args(), ["-r", "24", "-preset", "slow"]);
    }
}
