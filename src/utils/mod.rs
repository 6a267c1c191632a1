pub mod fs_utils;
pub mod mime;

use anyhow::{Context, Result};
use arrayvec::ArrayString;
use blake3::Hasher;
use std::{fs::File, io::Read, path::Path};

pub trait PathExt {
    fn ext_lower(&self) -> String;
}

impl PathExt for Path {
    fn ext_lower(&self) -> String {
        self.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Blake3 of a file, streamed in 512 KiB chunks.
pub fn blake3_hasher(mut file: File) -> Result<ArrayString<64>> {
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 512 * 1024];

    loop {
        let n = file.read(&mut buffer).context("Failed to read file")?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex())
}

pub fn checksum_of(path: impl AsRef<Path>) -> Result<ArrayString<64>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("failed to open {:?} for hashing", path))?;
    blake3_hasher(file).with_context(|| format!("failed to hash {:?}", path))
}
