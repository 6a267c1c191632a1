use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat, ImageReader};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// What preprocessing needs to know about an image source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Raw EXIF orientation tag (1..=8) when present
    pub orientation: Option<u32>,
    pub is_animated: bool,
}

pub trait MediaInfoBackend: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<MediaInfo>;
}

/// `image` for dimensions and animation, `kamadak-exif` for orientation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMediaInfo;

impl MediaInfoBackend for DefaultMediaInfo {
    fn inspect(&self, path: &Path) -> Result<MediaInfo> {
        let (width, height) = image::image_dimensions(path)
            .with_context(|| format!("failed to read dimensions of {:?}", path))?;
        let orientation = read_orientation(path);
        let is_animated = detect_animation(path).unwrap_or_else(|err| {
            debug!("Animation probe failed for {:?}: {:#}", path, err);
            false
        });
        Ok(MediaInfo {
            width,
            height,
            orientation,
            is_animated,
        })
    }
}

/// Missing or unreadable EXIF yields `None`.
fn read_orientation(path: &Path) -> Option<u32> {
    let file = File::open(path).ok()?;
    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0)
}

fn detect_animation(path: &Path) -> Result<bool> {
    let format = ImageReader::open(path)?.with_guessed_format()?.format();
    match format {
        Some(ImageFormat::Gif) => {
            let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
            Ok(decoder.into_frames().take(2).count() > 1)
        }
        Some(ImageFormat::WebP) => chunk_present(path, b"ANIM"),
        Some(ImageFormat::Png) => chunk_present(path, b"acTL"),
        _ => Ok(false),
    }
}

// Animated WebP carries an ANIM chunk and APNG an acTL chunk near the start of the file.
fn chunk_present(path: &Path, marker: &[u8; 4]) -> Result<bool> {
    let mut head = Vec::with_capacity(4096);
    File::open(path)?.take(4096).read_to_end(&mut head)?;
    Ok(head.windows(4).any(|window| window == marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, RgbImage, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_still_png_has_no_orientation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("still.png");
        RgbImage::new(32, 16).save(&path).unwrap();

        let info = DefaultMediaInfo.inspect(&path).unwrap();
        assert_eq!((info.width, info.height), (32, 16));
        assert_eq!(info.orientation, None);
        assert!(!info.is_animated);
    }

    #[test]
    fn test_multi_frame_gif_is_animated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anim.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            let frames = (0..3).map(|i| {
                let buffer = RgbaImage::from_pixel(8, 8, image::Rgba([i * 60, 0, 0, 255]));
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(100, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        assert!(DefaultMediaInfo.inspect(&path).unwrap().is_animated);
    }
}
