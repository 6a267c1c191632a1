use rand::Rng;
use std::path::{Path, PathBuf};

use crate::common::TARGET_NAME_LENGTH;
use crate::registry::Assembly;
use crate::utils::PathExt;
use crate::utils::mime::extension_for_mime;

const SHARD_LENGTH: usize = 2;

fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| HEX[rng.random_range(0..16)] as char)
        .collect()
}

/// Fresh relative path `xx/yyyyyyyy.ext` below `base`.
///
/// The first two hex characters name the shard directory. With
/// `check_existence` the candidate is redrawn until nothing exists at
/// `base/<candidate>`; without it the first draw is returned.
pub fn generate(base: &Path, extension: &str, check_existence: bool) -> PathBuf {
    loop {
        let name = random_hex(SHARD_LENGTH + TARGET_NAME_LENGTH);
        let (shard, file) = name.split_at(SHARD_LENGTH);
        let mut candidate = PathBuf::from(shard).join(file);
        if !extension.is_empty() {
            candidate.set_extension(extension);
        }
        if !check_existence || !base.join(&candidate).exists() {
            return candidate;
        }
    }
}

/// Extension of the produced bytes.
///
/// A conversion is named after its target MIME, a clone or passthrough after
/// its source.
pub fn target_extension(source: &Path, source_mime: &str, assembly: &Assembly) -> String {
    if let Some(extension) = assembly.target_mime().and_then(extension_for_mime) {
        return extension;
    }
    let extension = source.ext_lower();
    if !extension.is_empty() {
        return extension;
    }
    extension_for_mime(source_mime).unwrap_or_else(|| "bin".to_string())
}
