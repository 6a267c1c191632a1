//! Still and animated image adapter built on the `image` crate
//!
//! Includes:
//! - Decoding (single frame, or every frame for animated GIF, APNG and WebP)
//! - Geometry operations (fit, fitCrop, zoomCrop, rotate)
//! - Output tuning (quality, colour depth, background, interlace)
//! - Encoding by target MIME

use anyhow::{Context, Result, anyhow, bail};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngDecoder, PngEncoder};
use image::codecs::webp::WebPDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frame, ImageFormat, ImageReader, Rgba, RgbaImage};
use log::debug;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::{ProcessingHandle, Step};
use crate::models::MediaType;
use crate::utils::fs_utils::ensure_parent;

const DEFAULT_JPEG_QUALITY: u8 = 85;

pub struct ImageHandle {
    image: DynamicImage,
    /// Every frame of an animated source, kept only while the output stays GIF
    frames: Option<Vec<Frame>>,
    format: ImageFormat,
    jpeg_quality: u8,
    png_compression: CompressionType,
    background: Option<Rgba<u8>>,
    interlace: bool,
}

impl ImageHandle {
    pub fn open(source: &Path) -> Result<Self> {
        let reader = ImageReader::open(source)
            .with_context(|| format!("failed to open image {:?}", source))?
            .with_guessed_format()
            .with_context(|| format!("failed to sniff image format of {:?}", source))?;
        let format = reader
            .format()
            .ok_or_else(|| anyhow!("unrecognised image format: {:?}", source))?;

        let frames = decode_frames(source, format)?;
        let image = reader
            .decode()
            .with_context(|| format!("failed to decode image {:?}", source))?;
        Ok(Self::from_parts(image, frames, format))
    }

    pub fn from_image(image: DynamicImage, format: ImageFormat) -> Self {
        Self::from_parts(image, None, format)
    }

    fn from_parts(image: DynamicImage, frames: Option<Vec<Frame>>, format: ImageFormat) -> Self {
        Self {
            image,
            frames,
            format,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            png_compression: CompressionType::Default,
            background: None,
            interlace: false,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn is_animated(&self) -> bool {
        self.frames.is_some()
    }

    /// Apply `op` to the still image and to every animation frame.
    fn transform(&mut self, op: impl Fn(&DynamicImage) -> DynamicImage) {
        self.image = op(&self.image);
        if let Some(frames) = self.frames.take() {
            let frames = frames
                .into_iter()
                .map(|frame| {
                    let delay = frame.delay();
                    let buffer = op(&DynamicImage::ImageRgba8(frame.into_buffer())).to_rgba8();
                    Frame::from_parts(buffer, 0, 0, delay)
                })
                .collect();
            self.frames = Some(frames);
        }
    }
}

/// Every frame of an animated GIF, APNG or WebP. `None` for stills.
fn decode_frames(source: &Path, format: ImageFormat) -> Result<Option<Vec<Frame>>> {
    let open = || -> Result<BufReader<File>> {
        let file = File::open(source).with_context(|| format!("failed to open {:?}", source))?;
        Ok(BufReader::new(file))
    };
    let frames = match format {
        ImageFormat::Gif => GifDecoder::new(open()?)
            .with_context(|| format!("failed to read GIF {:?}", source))?
            .into_frames(),
        ImageFormat::Png => {
            let decoder = PngDecoder::new(open()?)
                .with_context(|| format!("failed to read PNG {:?}", source))?;
            if !decoder.is_apng()? {
                return Ok(None);
            }
            decoder.apng()?.into_frames()
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(open()?)
                .with_context(|| format!("failed to read WebP {:?}", source))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            decoder.into_frames()
        }
        _ => return Ok(None),
    };
    let frames = frames
        .collect_frames()
        .with_context(|| format!("failed to decode {:?} frames of {:?}", format, source))?;
    Ok((frames.len() > 1).then_some(frames))
}

// ────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────

/// Size of `(width, height)` scaled down to fit into `(max_width, max_height)`. Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let scaled_width = ((width as f64 * ratio).round() as u32).max(1);
    let scaled_height = ((height as f64 * ratio).round() as u32).max(1);
    (scaled_width, scaled_height)
}

/// Largest centred region of `(width, height)` with the aspect ratio of the box.
fn centred_crop(width: u32, height: u32, box_width: u32, box_height: u32) -> (u32, u32, u32, u32) {
    let target_ratio = box_width as f64 / box_height as f64;
    let source_ratio = width as f64 / height as f64;
    if source_ratio > target_ratio {
        let crop_width = ((height as f64 * target_ratio).round() as u32).clamp(1, width);
        ((width - crop_width) / 2, 0, crop_width, height)
    } else {
        let crop_height = ((width as f64 / target_ratio).round() as u32).clamp(1, height);
        (0, (height - crop_height) / 2, width, crop_height)
    }
}

fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value.trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid colour {:?}", value);
    }
    let expanded = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 | 8 => hex.to_string(),
        _ => bail!("invalid colour {:?}", value),
    };
    let channel = |i: usize| {
        u8::from_str_radix(&expanded[i..i + 2], 16)
            .with_context(|| format!("invalid colour {:?}", value))
    };
    let alpha = if expanded.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

fn flatten(image: &DynamicImage, background: Rgba<u8>) -> DynamicImage {
    let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), background);
    image::imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas)
}

impl ProcessingHandle for ImageHandle {
    fn name(&self) -> MediaType {
        MediaType::Image
    }

    fn convert(&mut self, mime_type: &str) -> Result<Step> {
        let format = ImageFormat::from_mime_type(mime_type)
            .ok_or_else(|| anyhow!("image backend cannot produce {}", mime_type))?;
        if format != ImageFormat::Gif {
            self.frames = None;
        }
        self.format = format;
        Ok(Step::Continue)
    }

    fn fit(&mut self, width: u32, height: u32) -> Result<bool> {
        let (current_width, current_height) = self.dimensions();
        let (new_width, new_height) = fit_within(current_width, current_height, width, height);
        if (new_width, new_height) != (current_width, current_height) {
            self.transform(|img| img.resize_exact(new_width, new_height, FilterType::Lanczos3));
        }
        Ok(true)
    }

    fn fit_crop(&mut self, width: u32, height: u32) -> Result<bool> {
        let (current_width, current_height) = self.dimensions();
        let (x, y, crop_width, crop_height) =
            centred_crop(current_width, current_height, width, height);
        let (new_width, new_height) = fit_within(crop_width, crop_height, width, height);
        self.transform(|img| {
            img.crop_imm(x, y, crop_width, crop_height)
                .resize_exact(new_width, new_height, FilterType::Lanczos3)
        });
        Ok(true)
    }

    fn zoom_crop(&mut self, width: u32, height: u32) -> Result<bool> {
        self.transform(|img| img.resize_to_fill(width, height, FilterType::Lanczos3));
        Ok(true)
    }

    // Re-encoding through the `image` crate never copies metadata.
    fn strip(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn compress(&mut self, level: f64) -> Result<bool> {
        let level = level.clamp(0.0, 9.0);
        self.jpeg_quality = (95.0 - level * 7.0).round() as u8;
        self.png_compression = match level {
            l if l < 3.0 => CompressionType::Fast,
            l if l < 7.0 => CompressionType::Default,
            _ => CompressionType::Best,
        };
        Ok(true)
    }

    fn color_depth(&mut self, bits: u32) -> Result<bool> {
        match bits {
            1 | 8 => self.transform(|img| DynamicImage::ImageLuma8(img.to_luma8())),
            16 => self.transform(|img| DynamicImage::ImageRgb16(img.to_rgb16())),
            24 => self.transform(|img| DynamicImage::ImageRgb8(img.to_rgb8())),
            32 => self.transform(|img| DynamicImage::ImageRgba8(img.to_rgba8())),
            other => bail!("unsupported colour depth {}", other),
        }
        Ok(true)
    }

    fn rotate(&mut self, degrees: i32) -> Result<bool> {
        match degrees.rem_euclid(360) {
            0 => {}
            90 => self.transform(DynamicImage::rotate270),
            180 => self.transform(DynamicImage::rotate180),
            270 => self.transform(DynamicImage::rotate90),
            other => bail!("rotation by {} degrees is not supported", other),
        }
        Ok(true)
    }

    fn background(&mut self, color: &str) -> Result<bool> {
        self.background = Some(parse_hex_color(color)?);
        Ok(true)
    }

    fn interlace(&mut self, enabled: bool) -> Result<bool> {
        // Neither encoder writes progressive output; the flag is kept for the log only.
        self.interlace = enabled;
        Ok(true)
    }

    fn passthru(&mut self, operation: &str, args: &[Value]) -> Result<bool> {
        match operation {
            "flip" => self.transform(DynamicImage::flipv),
            "flop" => self.transform(DynamicImage::fliph),
            "grayscale" => self.transform(DynamicImage::grayscale),
            "blur" => {
                let sigma = args.first().and_then(Value::as_f64).unwrap_or(1.0) as f32;
                self.transform(|img| img.blur(sigma));
            }
            other => bail!("image backend does not support operation `{}`", other),
        }
        Ok(true)
    }

    fn store(&mut self, target: &Path) -> Result<()> {
        ensure_parent(target)?;
        debug!(
            "Encoding {:?} as {:?} (interlace requested: {})",
            target, self.format, self.interlace
        );
        let file =
            File::create(target).with_context(|| format!("failed to create {:?}", target))?;
        let mut writer = BufWriter::new(file);

        match (self.format, self.frames.take()) {
            (ImageFormat::Gif, Some(frames)) => {
                let mut encoder = GifEncoder::new(&mut writer);
                encoder.set_repeat(Repeat::Infinite)?;
                encoder
                    .encode_frames(frames)
                    .with_context(|| format!("failed to encode GIF frames to {:?}", target))?;
            }
            (ImageFormat::Jpeg, _) => {
                let background = self.background.unwrap_or(Rgba([255, 255, 255, 255]));
                let flattened = DynamicImage::ImageRgb8(flatten(&self.image, background).to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
                flattened
                    .write_with_encoder(encoder)
                    .with_context(|| format!("failed to encode JPEG to {:?}", target))?;
            }
            (ImageFormat::Png, _) => {
                let image = match self.background {
                    Some(background) => flatten(&self.image, background),
                    None => self.image.clone(),
                };
                let encoder = PngEncoder::new_with_quality(
                    &mut writer,
                    self.png_compression,
                    PngFilter::Adaptive,
                );
                image
                    .write_with_encoder(encoder)
                    .with_context(|| format!("failed to encode PNG to {:?}", target))?;
            }
            (format, _) => {
                let image = match self.background {
                    Some(background) => flatten(&self.image, background),
                    None => self.image.clone(),
                };
                image
                    .write_to(&mut writer, format)
                    .with_context(|| format!("failed to encode {:?} to {:?}", format, target))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::processors::{DefaultMediaInfo, MediaInfoBackend};
    use image::RgbImage;
    use tempfile::TempDir;

    fn sample(width: u32, height: u32) -> ImageHandle {
        let image = RgbImage::from_fn(width, height, |x, _| image::Rgb([(x % 255) as u8, 0, 0]));
        ImageHandle::from_image(DynamicImage::ImageRgb8(image), ImageFormat::Png)
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(100, 50, 300, 300), (100, 50));
        assert_eq!(fit_within(1200, 600, 300, 300), (300, 150));
        assert_eq!(fit_within(600, 1200, 300, 300), (150, 300));
    }

    #[test]
    fn test_zoom_crop_fills_box_exactly() {
        let mut handle = sample(400, 200);
        assert!(handle.zoom_crop(100, 100).unwrap());
        assert_eq!(handle.dimensions(), (100, 100));
    }

    #[test]
    fn test_fit_crop_matches_box_ratio() {
        let mut handle = sample(400, 400);
        assert!(handle.fit_crop(100, 75).unwrap());
        assert_eq!(handle.dimensions(), (100, 75));
    }

    #[test]
    fn test_negative_rotation_turns_clockwise() {
        let mut handle = sample(40, 20);
        handle.rotate(-90).unwrap();
        assert_eq!(handle.dimensions(), (20, 40));
        handle.rotate(180).unwrap();
        assert_eq!(handle.dimensions(), (20, 40));
        assert!(handle.rotate(45).is_err());
    }

    #[test]
    fn test_convert_to_non_image_mime_fails() {
        let mut handle = sample(10, 10);
        assert!(handle.convert("video/mp4").is_err());
        assert!(matches!(handle.convert("image/jpeg").unwrap(), Step::Continue));
    }

    #[test]
    fn test_hex_colour() {
        assert_eq!(parse_hex_color("#fff").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_hex_color("00ff0080").unwrap(), Rgba([0, 255, 0, 128]));
        assert!(parse_hex_color("#12").is_err());
        assert!(parse_hex_color("#ééé").is_err());
        assert!(parse_hex_color("#ggg").is_err());
    }

    #[test]
    fn test_store_writes_decodable_jpeg() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out/thumb.jpg");
        let mut handle = sample(640, 480);
        handle.convert("image/jpeg").unwrap();
        handle.fit(200, 200).unwrap();
        handle.compress(5.0).unwrap();
        handle.store(&target).unwrap();

        let reopened = ImageHandle::open(&target).unwrap();
        assert_eq!(reopened.dimensions(), (200, 150));
        assert_eq!(reopened.format, ImageFormat::Jpeg);
    }

    fn write_apng(path: &Path, frame_count: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), 64, 48);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_animated(frame_count, 0).unwrap();
        encoder.set_frame_delay(1, 10).unwrap();
        let mut writer = encoder.write_header().unwrap();
        for i in 0..frame_count {
            let shade = (i * 80) as u8;
            let data: Vec<u8> = (0..64 * 48).flat_map(|_| [shade, 0, 255 - shade, 255]).collect();
            writer.write_image_data(&data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_apng_keeps_every_frame_as_gif() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("spinner.png");
        write_apng(&source, 3);
        assert!(DefaultMediaInfo.inspect(&source).unwrap().is_animated);

        let mut handle = ImageHandle::open(&source).unwrap();
        assert!(handle.is_animated());
        handle.convert("image/gif").unwrap();
        handle.fit(32, 32).unwrap();
        let target = dir.path().join("out/spinner.gif");
        handle.store(&target).unwrap();

        let decoder = GifDecoder::new(BufReader::new(File::open(&target).unwrap())).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].buffer().dimensions(), (32, 24));
    }

    #[test]
    fn test_still_png_has_no_frames() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("still.png");
        sample(20, 10).store(&source).unwrap();
        assert!(!ImageHandle::open(&source).unwrap().is_animated());
    }

    #[test]
    fn test_unknown_passthru_fails() {
        let mut handle = sample(10, 10);
        assert!(handle.passthru("grayscale", &[]).unwrap());
        assert!(handle.passthru("sharpen", &[]).is_err());
    }
}
