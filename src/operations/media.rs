use anyhow::{Context, Result, anyhow, bail};
use log::{info, warn};
use path_clean::PathClean;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::Library;
use super::versions::delete_versions;
use crate::background::make::handler::download;
use crate::background::make::target;
use crate::background::provider::parse_provider_url;
use crate::common::IMPORTED_DIR;
use crate::common::errors::PipelineError;
use crate::database::schema::MediaSchema;
use crate::models::MediaType;
use crate::utils::fs_utils::{copy_with_retry, delete_with_retry, ensure_parent};
use crate::utils::mime::{extension_for_mime, mime_from_path};
use crate::utils::{PathExt, checksum_of};

// ────────────────────────────────────────────────────────────────
// Transfer
// ────────────────────────────────────────────────────────────────

/// Create a media from a local path, an http(s) URL or a provider page URL.
///
/// Local and downloaded files are copied under `imported/` at a fresh
/// location and hashed once. Provider media only store their locator.
/// Blocking; call from a blocking thread.
pub fn transfer(library: &Library, source: &str, title: Option<&str>) -> Result<MediaSchema> {
    let start_time = Instant::now();
    let media = if parse_provider_url(source).is_some() {
        transfer_provider(library, source, title)?
    } else if source.starts_with("http://") || source.starts_with("https://") {
        transfer_remote(library, source, title)?
    } else {
        let path = PathBuf::from(source).clean();
        if !path.is_file() {
            bail!("{:?} is not a file", path);
        }
        let mime_type = mime_from_path(&path);
        import_file(library, &path, &mime_type, title)?
    };
    info!(
        duration = &*format!("{:?}", start_time.elapsed());
        "Transferred {} as media {} ({})",
        source, media.id, media.mime_type
    );
    Ok(media)
}

fn transfer_provider(library: &Library, url: &str, title: Option<&str>) -> Result<MediaSchema> {
    let info = library.resolver.resolve(url)?;
    let capability = library.schemes.capabilities(info.locator.scheme())?;
    let mime_type = capability
        .mime_type
        .clone()
        .unwrap_or_else(|| "video/x-provider".to_string());
    let media_type = capability.media_type.unwrap_or(MediaType::Video);
    let title = title
        .map(str::to_string)
        .or(info.title)
        .unwrap_or_else(|| info.locator.path().to_string());

    let media = MediaSchema::new(0, &info.locator, title, media_type, mime_type);
    library.store.insert_new_media(media)
}

fn transfer_remote(library: &Library, url: &str, title: Option<&str>) -> Result<MediaSchema> {
    let scheme = url.split("://").next().unwrap_or_default();
    let capability = library.schemes.capabilities(scheme)?;
    if !(capability.download && capability.transfer) {
        bail!("scheme `{}` does not allow transfers", scheme);
    }
    let fetched = download(url, &library.config.temp_root)?;
    let fallback_title = url.rsplit('/').find(|s| !s.is_empty()).unwrap_or(url);
    import_file(
        library,
        &fetched.path,
        &fetched.mime_type,
        Some(title.unwrap_or(fallback_title)),
    )
}

/// Copy `path` into library storage and persist its row.
fn import_file(
    library: &Library,
    path: &Path,
    mime_type: &str,
    title: Option<&str>,
) -> Result<MediaSchema> {
    if !library.schemes.capabilities("file")?.transfer {
        bail!("the file scheme does not accept transfers");
    }
    let base = library
        .schemes
        .base("file")?
        .ok_or_else(|| anyhow!("the file scheme has no base"))?;
    let imported_root = Path::new(base).join(IMPORTED_DIR);

    let extension = match path.ext_lower() {
        ext if !ext.is_empty() => ext,
        _ => extension_for_mime(mime_type).unwrap_or_else(|| "bin".to_string()),
    };
    let target_path = imported_root.join(target::generate(&imported_root, &extension, true));
    ensure_parent(&target_path)?;
    copy_with_retry(path, &target_path)
        .with_context(|| format!("failed to copy {:?} into the library", path))?;

    let persisted = (|| -> Result<MediaSchema> {
        let checksum = checksum_of(&target_path)?;
        let locator = library.schemes.locator_for_path("file", &target_path)?;
        let title = title.map(str::to_string).unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        let mut media = MediaSchema::new(0, &locator, title, MediaType::from_mime(mime_type), mime_type);
        media.checksum = Some(checksum);
        library.store.insert_new_media(media)
    })();

    if persisted.is_err() {
        if let Err(err) = delete_with_retry(&target_path) {
            warn!("Failed to remove unreferenced {:?}: {:#}", target_path, err);
        }
    }
    persisted
}

// ────────────────────────────────────────────────────────────────
// Delete
// ────────────────────────────────────────────────────────────────

/// Versions first, then the original (when its scheme allows), then the row.
pub fn delete_media(library: &Library, media_id: u64) -> Result<()> {
    let media = library
        .store
        .load_media(media_id)?
        .ok_or(PipelineError::UnknownMedia(media_id))?;

    delete_versions(library, media_id)?;
    let locator = media.locator()?;
    if !library.schemes.delete_resource(&locator)? {
        info!("Keeping {}: its scheme does not allow deletion", locator);
    }

    let txn = library.store.begin_write()?;
    MediaSchema::remove(&txn, media_id)?;
    txn.commit()?;
    info!("Deleted media {}", media_id);
    Ok(())
}
