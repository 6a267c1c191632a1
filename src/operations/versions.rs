use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tokio::task::spawn_blocking;

use super::Library;
use crate::background::jobs::{Enqueued, JobOutcome};
use crate::background::make::MakeOutcome;
use crate::common::errors::handle_error;
use crate::database::schema::{MediaSchema, VersionSchema};

// ────────────────────────────────────────────────────────────────
// Make / delete
// ────────────────────────────────────────────────────────────────

/// Enqueue every known version of `media`. Fails as a whole on the first enqueue failure.
pub async fn make_versions(library: &Library, media: &MediaSchema) -> Result<Vec<Enqueued>> {
    let start_time = Instant::now();
    let enqueued = library.dispatcher.enqueue_all(media).await.map_err(|err| {
        handle_error(
            anyhow::Error::new(err).context(format!("failed to make versions of media {}", media.id)),
        )
    })?;

    let waited_failures = enqueued
        .iter()
        .filter(|e| {
            matches!(
                e.outcome,
                Some(JobOutcome::Completed(MakeOutcome::Failed(_))) | Some(JobOutcome::Lost(_))
            )
        })
        .count();
    info!(
        duration = &*format!("{:?}", start_time.elapsed());
        "Enqueued {} version job(s) for media {} ({} awaited job(s) failed)",
        enqueued.len(), media.id, waited_failures
    );
    Ok(enqueued)
}

/// Remove every version of `media_id`: the file first (when its scheme allows), then the row.
///
/// Aborts on the first failure; versions handled before it stay deleted.
pub fn delete_versions(library: &Library, media_id: u64) -> Result<usize> {
    let versions = library.store.load_versions(media_id)?;
    let mut deleted = 0;
    for version in &versions {
        if let Some(locator) = version.locator() {
            library
                .schemes
                .delete_resource(&locator)
                .with_context(|| {
                    format!(
                        "failed to delete file of version `{}` of media {}",
                        version.version, media_id
                    )
                })?;
        }
        let txn = library.store.begin_write()?;
        VersionSchema::remove(&txn, media_id, &version.version)?;
        txn.commit()?;
        deleted += 1;
    }
    info!("Deleted {} version(s) of media {}", deleted, media_id);
    Ok(deleted)
}

// ────────────────────────────────────────────────────────────────
// Regenerate
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    Id(u64),
    /// Inclusive on both ends
    Range(u64, u64),
}

impl FromStr for Selection {
    type Err = anyhow::Error;

    /// `all`, `42` or `10-20`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Selection::All);
        }
        if let Some((from, to)) = s.split_once('-') {
            let from: u64 = from.trim().parse().with_context(|| format!("bad range start in `{}`", s))?;
            let to: u64 = to.trim().parse().with_context(|| format!("bad range end in `{}`", s))?;
            if from > to {
                bail!("empty range `{}`", s);
            }
            return Ok(Selection::Range(from, to));
        }
        let id = s.parse().with_context(|| format!("`{}` is not a media id", s))?;
        Ok(Selection::Id(id))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "all"),
            Selection::Id(id) => write!(f, "{}", id),
            Selection::Range(from, to) => write!(f, "{}-{}", from, to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerateReport {
    pub media_id: u64,
    pub deleted: usize,
    pub enqueued: usize,
    pub error: Option<String>,
}

impl RegenerateReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub fn selected_ids(library: &Library, selection: Selection) -> Result<Vec<u64>> {
    let txn = library.store.begin_read()?;
    let ids = match selection {
        Selection::All => MediaSchema::get_all(&txn)?.into_iter().map(|m| m.id).collect(),
        Selection::Id(id) => vec![id],
        Selection::Range(from, to) => MediaSchema::ids_in(&txn, from, to)?,
    };
    Ok(ids)
}

/// Delete then remake the versions of every selected media. A failing item is
/// reported and the loop moves on.
pub async fn regenerate<F>(
    library: &Library,
    selection: Selection,
    mut on_item: F,
) -> Result<Vec<RegenerateReport>>
where
    F: FnMut(&RegenerateReport),
{
    let ids = {
        let library = library.clone();
        spawn_blocking(move || selected_ids(&library, selection)).await??
    };
    info!("Regenerating versions of {} media ({})", ids.len(), selection);

    let mut reports = Vec::with_capacity(ids.len());
    for media_id in ids {
        let mut report = RegenerateReport {
            media_id,
            deleted: 0,
            enqueued: 0,
            error: None,
        };
        match regenerate_one(library, media_id, &mut report).await {
            Ok(()) => {}
            Err(err) => {
                error!("Regenerating media {} failed: {:#}", media_id, err);
                report.error = Some(format!("{:#}", err));
            }
        }
        on_item(&report);
        reports.push(report);
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        warn!("{} of {} media failed to regenerate", failed, reports.len());
    }
    Ok(reports)
}

async fn regenerate_one(library: &Library, media_id: u64, report: &mut RegenerateReport) -> Result<()> {
    let (media, deleted) = {
        let library = library.clone();
        spawn_blocking(move || -> Result<(MediaSchema, usize)> {
            let media = library
                .store
                .load_media(media_id)?
                .ok_or_else(|| anyhow!("media {} does not exist", media_id))?;
            let deleted = delete_versions(&library, media_id)?;
            Ok((media, deleted))
        })
        .await??
    };
    report.deleted = deleted;
    report.enqueued = make_versions(library, &media).await?.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::VersionStatus;
    use crate::models::{Locator, MediaType};
    use crate::operations::test_support::{library, write_png};
    use tempfile::TempDir;

    fn insert_png(library: &Library, name: &str) -> MediaSchema {
        let path = library.config.object_root.join("imported/aa").join(name);
        write_png(&path, 64, 48);
        let locator = Locator::new("file", format!("imported/aa/{}", name));
        let media = MediaSchema::new(0, &locator, name, MediaType::Image, "image/png");
        library.store.insert_new_media(media).unwrap()
    }

    #[test]
    fn test_selection_parsing() {
        assert_eq!("all".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!("42".parse::<Selection>().unwrap(), Selection::Id(42));
        assert_eq!("3-9".parse::<Selection>().unwrap(), Selection::Range(3, 9));
        assert!("9-3".parse::<Selection>().is_err());
        assert!("abc".parse::<Selection>().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_make_then_delete_versions() {
        let dir = TempDir::new().unwrap();
        let library = library(&dir);
        library.start_workers();
        let media = insert_png(&library, "00000001.png");

        let enqueued = make_versions(&library, &media).await.unwrap();
        assert_eq!(enqueued.len(), library.assemblies.versions().len());
        library.queue.wait_idle().await;

        let versions = library.store.load_versions(media.id).unwrap();
        assert!(versions.iter().any(|v| v.version == "fix3"));
        assert!(versions.iter().all(|v| v.status == VersionStatus::Processed));
        // Images have no flux0 recipe.
        assert!(versions.iter().all(|v| v.version != "flux0"));
        let files: Vec<_> = versions
            .iter()
            .map(|v| library.schemes.resolve_path(&v.locator().unwrap()).unwrap())
            .collect();
        assert!(files.iter().all(|f| f.is_file()));

        let deleted = delete_versions(&library, media.id).unwrap();
        assert_eq!(deleted, versions.len());
        assert!(library.store.load_versions(media.id).unwrap().is_empty());
        assert!(files.iter().all(|f| !f.exists()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_regenerate_continues_past_missing_media() {
        let dir = TempDir::new().unwrap();
        let library = library(&dir);
        library.start_workers();
        let media = insert_png(&library, "00000002.png");

        let mut seen = Vec::new();
        let reports = regenerate(&library, Selection::Range(media.id, media.id + 5), |r| {
            seen.push(r.media_id)
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![media.id]);
        assert!(reports[0].is_success());

        let reports = regenerate(&library, Selection::Id(99), |_| {}).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_success());
        library.queue.wait_idle().await;
    }
}
