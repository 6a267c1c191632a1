use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::registry::CloneAction;
use crate::utils::fs_utils::copy_with_retry;

/// Materialize `target` from `source` without touching the processing backend.
pub fn execute(action: CloneAction, source: &Path, target: &Path) -> Result<()> {
    match action {
        CloneAction::Copy => {
            copy_with_retry(source, target)?;
        }
        CloneAction::Link => {
            fs::hard_link(source, target)
                .with_context(|| format!("failed to hard-link {:?} -> {:?}", source, target))?;
        }
        CloneAction::Symlink => symlink(source, target)?,
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> Result<()> {
    // Relative link targets would resolve against the link's own directory.
    let source = fs::canonicalize(source)
        .with_context(|| format!("failed to resolve {:?}", source))?;
    std::os::unix::fs::symlink(&source, target)
        .with_context(|| format!("failed to symlink {:?} -> {:?}", source, target))
}

#[cfg(not(unix))]
fn symlink(source: &Path, target: &Path) -> Result<()> {
    anyhow::bail!(
        "symlink clones are not supported on this platform ({:?} -> {:?})",
        source,
        target
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.pdf");
        fs::write(&source, b"%PDF-1.4 fixture").unwrap();
        (dir, source)
    }

    #[test]
    fn test_copy_is_byte_identical() {
        let (dir, source) = fixture();
        let target = dir.path().join("copy.pdf");
        execute(CloneAction::Copy, &source, &target).unwrap();
        assert_eq!(fs::read(&source).unwrap(), fs::read(&target).unwrap());
    }

    #[test]
    fn test_link_shares_content() {
        let (dir, source) = fixture();
        let target = dir.path().join("link.pdf");
        execute(CloneAction::Link, &source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"%PDF-1.4 fixture");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_points_at_source() {
        let (dir, source) = fixture();
        let target = dir.path().join("symlink.pdf");
        execute(CloneAction::Symlink, &source, &target).unwrap();
        assert!(fs::symlink_metadata(&target).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&target).unwrap(), b"%PDF-1.4 fixture");
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = execute(
            CloneAction::Link,
            &dir.path().join("missing"),
            &dir.path().join("target"),
        );
        assert!(result.is_err());
    }
}
