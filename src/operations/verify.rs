use anyhow::{Result, anyhow};
use arrayvec::ArrayString;
use log::{error, info};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::path::PathBuf;
use std::time::Instant;

use super::Library;
use crate::common::WORKER_RAYON_POOL;
use crate::common::errors::PipelineError;
use crate::database::schema::{MediaSchema, VersionSchema};
use crate::utils::checksum_of;

/// Outcome of re-hashing a media and its versions. Nothing is healed.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub media_id: u64,
    /// Files that carried a stored checksum and were re-hashed
    pub checked: usize,
    pub failures: Vec<PipelineError>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Expected {
    locator: String,
    path: PathBuf,
    checksum: ArrayString<64>,
}

pub fn verify(library: &Library, media_id: u64) -> Result<VerifyReport> {
    let start_time = Instant::now();
    let (media, versions) = {
        let txn = library.store.begin_read()?;
        let media = MediaSchema::get(&txn, media_id)?
            .ok_or_else(|| anyhow!(PipelineError::UnknownMedia(media_id)))?;
        (media, VersionSchema::for_media(&txn, media_id)?)
    };

    let mut expected = Vec::new();
    if let Some(checksum) = media.checksum {
        if let Some(path) = library.local_path(&media.locator()?)? {
            expected.push(Expected {
                locator: media.locator.clone(),
                path,
                checksum,
            });
        }
    }
    for version in versions {
        let (Some(locator), Some(checksum)) = (version.locator(), version.checksum) else {
            continue;
        };
        if let Some(path) = library.local_path(&locator)? {
            expected.push(Expected {
                locator: version.locator,
                path,
                checksum,
            });
        }
    }

    let checked = expected.len();
    let failures: Vec<PipelineError> = WORKER_RAYON_POOL.install(|| {
        expected
            .into_par_iter()
            .filter_map(|item| {
                let actual = match checksum_of(&item.path) {
                    Ok(actual) if actual == item.checksum => return None,
                    Ok(actual) => actual.to_string(),
                    Err(err) => format!("unreadable ({:#})", err),
                };
                Some(PipelineError::IntegrityFailure {
                    locator: item.locator,
                    expected: item.checksum.to_string(),
                    actual,
                })
            })
            .collect()
    });

    for failure in &failures {
        error!("Media {}: {}", media_id, failure);
    }
    info!(
        duration = &*format!("{:?}", start_time.elapsed());
        "Verified {} file(s) of media {}, {} mismatch(es)",
        checked, media_id, failures.len()
    );
    Ok(VerifyReport {
        media_id,
        checked,
        failures,
    })
}

/// Verify every media in the store.
pub fn verify_all(library: &Library) -> Result<Vec<VerifyReport>> {
    let ids: Vec<u64> = {
        let txn = library.store.begin_read()?;
        MediaSchema::get_all(&txn)?.into_iter().map(|m| m.id).collect()
    };
    ids.into_iter().map(|id| verify(library, id)).collect()
}
