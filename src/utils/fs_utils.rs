use anyhow::{Context, Result};
use log::warn;
use std::{fs, io, path::Path, thread, time::Duration};

use crate::common::{MAX_COPY_RETRIES, MAX_DELETE_ATTEMPTS};

/// Create `dir` and its parents. Concurrent creators racing on the same tree all succeed.
pub fn ensure_dir(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to create directory tree {:?}", dir)),
    }
}

pub fn ensure_parent(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

pub fn copy_with_retry(source: &Path, dest: &Path) -> Result<u64> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match fs::copy(source, dest) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if attempts < MAX_COPY_RETRIES => {
                warn!(
                    "Failed copying {:?} -> {:?} (attempt {}), retrying: {}",
                    source, dest, attempts, err
                );
                thread::sleep(Duration::from_millis(100 * attempts as u64));
            }
            Err(err) => {
                return Err(err).context(format!(
                    "Failed copying {:?} -> {:?} after {} attempts",
                    source, dest, attempts
                ));
            }
        }
    }
}

/// Remove a file, retrying transient failures. A file that is already gone counts as removed.
pub fn delete_with_retry(path: &Path) -> Result<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match fs::remove_file(path) {
            Ok(_) => {
                log::info!("Deleted file: {:?}", path);
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) if attempts < MAX_DELETE_ATTEMPTS => {
                warn!(
                    "Failed deleting {:?} (attempt {}), retrying in {}ms: {}",
                    path,
                    attempts,
                    100 * attempts,
                    err
                );
                thread::sleep(Duration::from_millis(100 * attempts));
            }
            Err(err) => {
                return Err(err).context(format!(
                    "Failed deleting {:?} after {} attempts",
                    path, attempts
                ));
            }
        }
    }
}
