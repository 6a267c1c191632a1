//! Reconciliation between the object store and the database.
//!
//! Files nobody references are removed. Version rows whose file vanished are
//! removed unconditionally (versions can always be remade). Media rows whose
//! file vanished are removed only once no file-backed version depends on them;
//! their `error` rows go with them.

use anyhow::{Context, Result};
use log::{info, warn};
use path_clean::PathClean;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use super::Library;
use crate::common::{IMPORTED_DIR, VERSIONS_DIR};
use crate::database::schema::{MediaSchema, VersionSchema};
use crate::utils::fs_utils::delete_with_retry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub dry_run: bool,
    /// Files under `imported/` or `versions/` without a row
    pub orphan_files: Vec<PathBuf>,
    /// Version rows whose file is missing, plus file-less rows of orphan media
    pub orphan_versions: Vec<(u64, String)>,
    /// Media rows whose file is missing and that no version depends on
    pub orphan_media: Vec<u64>,
    /// Media rows whose file is missing but that still have versions
    pub kept_media: Vec<u64>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_files.is_empty()
            && self.orphan_versions.is_empty()
            && self.orphan_media.is_empty()
    }
}

pub fn sync(library: &Library, dry_run: bool) -> Result<SyncReport> {
    let start_time = Instant::now();
    let (media, versions) = {
        let txn = library.store.begin_read()?;
        (MediaSchema::get_all(&txn)?, VersionSchema::get_all(&txn)?)
    };

    let mut report = SyncReport {
        dry_run,
        ..Default::default()
    };

    // ── Records ──
    let mut referenced = HashSet::new();
    let mut version_count: HashMap<u64, usize> = HashMap::new();
    let mut fileless = Vec::new();
    for version in &versions {
        let Some(locator) = version.locator() else {
            fileless.push(version);
            continue;
        };
        *version_count.entry(version.media_id).or_default() += 1;
        match library.local_path(&locator)? {
            Some(path) if path.is_file() => {
                referenced.insert(path.clean());
            }
            Some(_) => report
                .orphan_versions
                .push((version.media_id, version.version.clone())),
            None => {}
        }
    }
    for (media_id, _) in &report.orphan_versions {
        if let Some(count) = version_count.get_mut(media_id) {
            *count -= 1;
        }
    }
    for row in &media {
        let locator = row.locator()?;
        match library.local_path(&locator)? {
            Some(path) if path.is_file() => {
                referenced.insert(path.clean());
            }
            Some(_) if version_count.get(&row.id).copied().unwrap_or(0) == 0 => {
                report.orphan_media.push(row.id)
            }
            Some(_) => report.kept_media.push(row.id),
            None => {}
        }
    }
    let removed: HashSet<u64> = report.orphan_media.iter().copied().collect();
    report.orphan_versions.extend(
        fileless
            .into_iter()
            .filter(|version| removed.contains(&version.media_id))
            .map(|version| (version.media_id, version.version.clone())),
    );

    // ── Files ──
    let root = &library.config.object_root;
    for dir in [IMPORTED_DIR, VERSIONS_DIR] {
        report
            .orphan_files
            .extend(unreferenced_files(&root.join(dir), &referenced)?);
    }

    if !dry_run {
        apply(library, &report)?;
    }

    info!(
        duration = &*format!("{:?}", start_time.elapsed());
        "Sync{}: {} orphan file(s), {} orphan version row(s), {} orphan media row(s), {} media kept for their versions",
        if dry_run { " (dry run)" } else { "" },
        report.orphan_files.len(),
        report.orphan_versions.len(),
        report.orphan_media.len(),
        report.kept_media.len()
    );
    Ok(report)
}

fn unreferenced_files(dir: &Path, referenced: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut orphans = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("failed to walk {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().clean();
        if !referenced.contains(&path) {
            orphans.push(path);
        }
    }
    orphans.sort();
    Ok(orphans)
}

fn apply(library: &Library, report: &SyncReport) -> Result<()> {
    for path in &report.orphan_files {
        warn!("Deleting orphan file {:?}", path);
        delete_with_retry(path)?;
    }

    let txn = library.store.begin_write()?;
    for (media_id, version) in &report.orphan_versions {
        warn!("Deleting version `{}` of media {}: file is missing", version, media_id);
        VersionSchema::remove(&txn, *media_id, version)?;
    }
    for media_id in &report.orphan_media {
        warn!("Deleting media {}: file is missing", media_id);
        MediaSchema::remove(&txn, *media_id)?;
    }
    txn.commit().context("failed to commit sync deletions")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Locator, MediaType};
    use crate::operations::test_support::library;
    use tempfile::TempDir;

    struct Seeded {
        _dir: TempDir,
        library: Library,
        orphan_file: PathBuf,
        /// Media with file, one version whose file is missing
        healthy: u64,
        /// File missing, no versions
        lost: u64,
        /// File missing, one intact version
        referenced: u64,
    }

    fn write(library: &Library, relative: &str) -> Locator {
        let path = library.config.object_root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, relative.as_bytes()).unwrap();
        Locator::new("file", relative)
    }

    fn media(library: &Library, relative: &str) -> u64 {
        let row = MediaSchema::new(
            0,
            &Locator::new("file", relative),
            relative,
            MediaType::Document,
            "application/pdf",
        );
        library.store.insert_new_media(row).unwrap().id
    }

    fn version(library: &Library, media_id: u64, name: &str, locator: &Locator) {
        let txn = library.store.begin_write().unwrap();
        VersionSchema::processed(media_id, name, locator, MediaType::Document, "application/pdf", None)
            .upsert(&txn)
            .unwrap();
        txn.commit().unwrap();
    }

    fn seeded() -> Seeded {
        let dir = TempDir::new().unwrap();
        let library = library(&dir);

        write(&library, "imported/aa/00000001.pdf");
        let healthy = media(&library, "imported/aa/00000001.pdf");
        version(&library, healthy, "fix0", &Locator::new("file", "versions/fix0/bb/gone.pdf"));

        let lost = media(&library, "imported/aa/missing1.pdf");

        let referenced = media(&library, "imported/aa/missing2.pdf");
        let kept = write(&library, "versions/fix0/cc/00000002.pdf");
        version(&library, referenced, "fix0", &kept);

        let orphan = write(&library, "versions/fix1/dd/deadbeef.png");
        let orphan_file = library.config.object_root.join(orphan.path());
        Seeded {
            _dir: dir,
            library,
            orphan_file,
            healthy,
            lost,
            referenced,
        }
    }

    #[test]
    fn test_dry_run_reports_without_deleting() {
        let seeded = seeded();
        let report = sync(&seeded.library, true).unwrap();

        assert_eq!(report.orphan_files, vec![seeded.orphan_file.clean()]);
        assert_eq!(report.orphan_versions, vec![(seeded.healthy, "fix0".to_string())]);
        assert_eq!(report.orphan_media, vec![seeded.lost]);
        assert_eq!(report.kept_media, vec![seeded.referenced]);

        assert!(seeded.orphan_file.exists());
        assert!(seeded.library.store.load_media(seeded.lost).unwrap().is_some());
        assert_eq!(seeded.library.store.load_versions(seeded.healthy).unwrap().len(), 1);
    }

    #[test]
    fn test_sync_deletes_orphans_but_keeps_referenced_media() {
        let seeded = seeded();
        let report = sync(&seeded.library, false).unwrap();
        assert!(!report.is_clean());

        assert!(!seeded.orphan_file.exists());
        assert!(seeded.library.store.load_versions(seeded.healthy).unwrap().is_empty());
        assert!(seeded.library.store.load_media(seeded.healthy).unwrap().is_some());
        assert!(seeded.library.store.load_media(seeded.lost).unwrap().is_none());
        assert!(seeded.library.store.load_media(seeded.referenced).unwrap().is_some());

        assert!(sync(&seeded.library, false).unwrap().is_clean());
    }

    #[test]
    fn test_media_with_only_missing_versions_is_removed() {
        let dir = TempDir::new().unwrap();
        let library = library(&dir);
        let id = media(&library, "imported/aa/missing.pdf");
        version(&library, id, "fix0", &Locator::new("file", "versions/fix0/ee/gone.pdf"));

        let report = sync(&library, false).unwrap();
        assert_eq!(report.orphan_versions, vec![(id, "fix0".to_string())]);
        assert_eq!(report.orphan_media, vec![id]);
        assert!(library.store.load_media(id).unwrap().is_none());
    }

    #[test]
    fn test_error_rows_do_not_keep_lost_media() {
        let dir = TempDir::new().unwrap();
        let library = library(&dir);
        let id = media(&library, "imported/aa/missing.pdf");
        let txn = library.store.begin_write().unwrap();
        VersionSchema::failed(id, "fix0", MediaType::Document).upsert(&txn).unwrap();
        txn.commit().unwrap();

        let report = sync(&library, true).unwrap();
        assert_eq!(report.orphan_media, vec![id]);
        assert_eq!(report.orphan_versions, vec![(id, "fix0".to_string())]);
        assert!(report.kept_media.is_empty());

        sync(&library, false).unwrap();
        assert!(library.store.load_media(id).unwrap().is_none());
        assert!(library.store.load_versions(id).unwrap().is_empty());
        assert!(sync(&library, true).unwrap().is_clean());
    }

    #[test]
    fn test_error_rows_of_healthy_media_are_left_alone() {
        let dir = TempDir::new().unwrap();
        let library = library(&dir);
        write(&library, "imported/aa/00000003.pdf");
        let id = media(&library, "imported/aa/00000003.pdf");
        let txn = library.store.begin_write().unwrap();
        VersionSchema::failed(id, "fix0", MediaType::Document).upsert(&txn).unwrap();
        txn.commit().unwrap();

        assert!(sync(&library, false).unwrap().is_clean());
        assert_eq!(library.store.load_versions(id).unwrap().len(), 1);
    }
}
