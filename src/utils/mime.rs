use image::ImageFormat;
use std::path::Path;

use super::PathExt;

const FALLBACK_MIME: &str = "application/octet-stream";

// Types the image crate does not know about.
const EXTRA_TYPES: &'static [(&'static str, &'static str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("flv", "video/x-flv"),
    ("wmv", "video/x-ms-wmv"),
    ("mpeg", "video/mpeg"),
    ("ogv", "video/ogg"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("wav", "audio/wav"),
    ("flac", "audio/flac"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("rtf", "application/rtf"),
];

pub fn mime_from_ext(ext: impl AsRef<str>) -> String {
    let ext = ext.as_ref().to_ascii_lowercase();
    if let Some(format) = ImageFormat::from_extension(&ext) {
        return format.to_mime_type().to_string();
    }
    EXTRA_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| mime.to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

pub fn mime_from_path(path: impl AsRef<Path>) -> String {
    mime_from_ext(path.as_ref().ext_lower())
}

/// Preferred file extension for a MIME type.
pub fn extension_for_mime(mime: impl AsRef<str>) -> Option<String> {
    let mime = mime.as_ref();
    if let Some(format) = ImageFormat::from_mime_type(mime) {
        return format.extensions_str().first().map(|e| e.to_string());
    }
    EXTRA_TYPES
        .iter()
        .find(|(_, m)| *m == mime)
        .map(|(ext, _)| ext.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_types_come_from_image_crate() {
        assert_eq!(mime_from_ext("JPG"), "image/jpeg");
        assert_eq!(extension_for_mime("image/png").as_deref(), Some("png"));
    }

    #[test]
    fn test_media_types_outside_image_crate() {
        assert_eq!(mime_from_ext("mp4"), "video/mp4");
        assert_eq!(extension_for_mime("audio/ogg").as_deref(), Some("ogg"));
        assert_eq!(mime_from_ext("xyz"), FALLBACK_MIME);
        assert_eq!(extension_for_mime("video/x-provider"), None);
    }
}
