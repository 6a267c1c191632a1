//! Scheme capability registry.
//!
//! Each locator scheme (`file`, `http`, `https`, `vimeo`, ...) owns exactly one
//! capability record deciding whether resources behind it may be downloaded,
//! transferred into the library, checksummed, deleted, and whether their
//! paths are stored relative to a base.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::common::errors::PipelineError;
use crate::config::AppConfig;
use crate::models::{Locator, MediaType};
use crate::utils::fs_utils::delete_with_retry;

/// Storage base of a scheme, either fixed or keyed by environment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BaseLocation {
    Fixed(String),
    PerEnvironment(BTreeMap<String, String>),
}

impl BaseLocation {
    /// Member for `environment`, falling back to the `default` key.
    pub fn resolve(&self, environment: &str) -> Option<&str> {
        match self {
            BaseLocation::Fixed(base) => Some(base),
            BaseLocation::PerEnvironment(map) => map
                .get(environment)
                .or_else(|| map.get("default"))
                .map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeCapability {
    pub base: Option<BaseLocation>,
    pub relative: bool,
    pub checksum: bool,
    pub download: bool,
    pub transfer: bool,
    pub delete: bool,
    /// MIME type for scheme-only resources that are never downloaded
    pub mime_type: Option<String>,
    pub media_type: Option<MediaType>,
}

/// Partial capability update. Only fields that are `Some` are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemeOptions {
    pub base: Option<BaseLocation>,
    pub relative: Option<bool>,
    pub checksum: Option<bool>,
    pub download: Option<bool>,
    pub transfer: Option<bool>,
    pub delete: Option<bool>,
    pub mime_type: Option<String>,
    pub media_type: Option<MediaType>,
}

impl SchemeCapability {
    fn merge(&mut self, options: SchemeOptions) {
        if let Some(base) = options.base {
            self.base = Some(base);
        }
        if let Some(relative) = options.relative {
            self.relative = relative;
        }
        if let Some(checksum) = options.checksum {
            self.checksum = checksum;
        }
        if let Some(download) = options.download {
            self.download = download;
        }
        if let Some(transfer) = options.transfer {
            self.transfer = transfer;
        }
        if let Some(delete) = options.delete {
            self.delete = delete;
        }
        if let Some(mime_type) = options.mime_type {
            self.mime_type = Some(mime_type);
        }
        if let Some(media_type) = options.media_type {
            self.media_type = Some(media_type);
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemeRegistry {
    environment: String,
    schemes: HashMap<String, SchemeCapability>,
}

impl SchemeRegistry {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            schemes: HashMap::new(),
        }
    }

    /// Registry with the built-in schemes, then any JSON overrides from `scheme_path`.
    pub fn with_defaults(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new(config.environment.clone());
        let object_root = config.object_root.to_string_lossy().to_string();

        registry.register(
            "file",
            SchemeOptions {
                base: Some(BaseLocation::Fixed(object_root)),
                relative: Some(true),
                checksum: Some(true),
                transfer: Some(true),
                delete: Some(true),
                ..Default::default()
            },
        );
        for scheme in ["http", "https"] {
            registry.register(
                scheme,
                SchemeOptions {
                    download: Some(true),
                    transfer: Some(true),
                    ..Default::default()
                },
            );
        }
        for provider in ["vimeo", "youtube"] {
            registry.register(
                provider,
                SchemeOptions {
                    mime_type: Some("video/x-provider".to_string()),
                    media_type: Some(MediaType::Video),
                    ..Default::default()
                },
            );
        }

        if let Some(path) = &config.scheme_path {
            registry.load_overrides(path)?;
        }
        Ok(registry)
    }

    /// Merge a JSON object of `scheme -> options` over the current records.
    pub fn load_overrides(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read scheme overrides {:?}", path))?;
        let overrides: BTreeMap<String, SchemeOptions> = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse scheme overrides {:?}", path))?;
        for (scheme, options) in overrides {
            self.register(&scheme, options);
        }
        info!("Loaded scheme overrides from {:?}", path);
        Ok(())
    }

    /// Merge `options` over the scheme's current (or default) record. Last write wins per field.
    pub fn register(&mut self, scheme: &str, options: SchemeOptions) {
        self.schemes
            .entry(scheme.to_ascii_lowercase())
            .or_default()
            .merge(options);
    }

    pub fn capabilities(&self, scheme: &str) -> Result<&SchemeCapability, PipelineError> {
        self.schemes
            .get(&scheme.to_ascii_lowercase())
            .ok_or_else(|| PipelineError::UnknownScheme(scheme.to_string()))
    }

    /// Resolved storage base. `Ok(None)` for schemes registered without one.
    pub fn base(&self, scheme: &str) -> Result<Option<&str>, PipelineError> {
        Ok(self
            .capabilities(scheme)?
            .base
            .as_ref()
            .and_then(|base| base.resolve(&self.environment)))
    }

    /// Filesystem path behind a local locator. Relative locators are joined to the base.
    pub fn resolve_path(&self, locator: &Locator) -> Result<PathBuf> {
        let capability = self.capabilities(locator.scheme())?;
        let path = Path::new(locator.path());
        if capability.relative && !path.is_absolute() {
            let base = self.base(locator.scheme())?.with_context(|| {
                format!("scheme `{}` is relative but has no base", locator.scheme())
            })?;
            Ok(Path::new(base).join(path))
        } else {
            Ok(path.to_path_buf())
        }
    }

    /// Remove the resource behind `locator` if its scheme allows deletion.
    ///
    /// Returns whether anything was (or had already been) removed.
    pub fn delete_resource(&self, locator: &Locator) -> Result<bool> {
        if !self.capabilities(locator.scheme())?.delete {
            return Ok(false);
        }
        let path = self.resolve_path(locator)?;
        delete_with_retry(&path)?;
        Ok(true)
    }

    /// Locator for `path` under `scheme`, stored relative to the base when the scheme asks for it.
    pub fn locator_for_path(&self, scheme: &str, path: &Path) -> Result<Locator> {
        let capability = self.capabilities(scheme)?;
        let stored = match (capability.relative, self.base(scheme)?) {
            (true, Some(base)) => path.strip_prefix(base).unwrap_or(path),
            _ => path,
        };
        let stored = stored.to_string_lossy().replace('\\', "/");
        Ok(Locator::new(scheme, stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scheme() {
        let registry = SchemeRegistry::new("development");
        assert!(matches!(
            registry.capabilities("ftp"),
            Err(PipelineError::UnknownScheme(s)) if s == "ftp"
        ));
        assert!(registry.base("ftp").is_err());
    }

    #[test]
    fn test_register_then_base() {
        let mut registry = SchemeRegistry::new("development");
        registry.register(
            "file",
            SchemeOptions {
                base: Some(BaseLocation::Fixed("/srv/media".into())),
                ..Default::default()
            },
        );
        assert_eq!(registry.base("file").unwrap(), Some("/srv/media"));
    }

    #[test]
    fn test_base_per_environment() {
        let mut registry = SchemeRegistry::new("production");
        let bases = BTreeMap::from([
            ("development".to_string(), "/tmp/media".to_string()),
            ("production".to_string(), "/srv/media".to_string()),
        ]);
        registry.register(
            "file",
            SchemeOptions {
                base: Some(BaseLocation::PerEnvironment(bases)),
                ..Default::default()
            },
        );
        assert_eq!(registry.base("file").unwrap(), Some("/srv/media"));
    }

    #[test]
    fn test_merge_never_drops_flags() {
        let mut registry = SchemeRegistry::new("development");
        registry.register(
            "https",
            SchemeOptions {
                download: Some(true),
                transfer: Some(true),
                ..Default::default()
            },
        );
        registry.register(
            "https",
            SchemeOptions {
                checksum: Some(true),
                ..Default::default()
            },
        );
        let capability = registry.capabilities("https").unwrap();
        assert!(capability.download && capability.transfer && capability.checksum);

        registry.register(
            "https",
            SchemeOptions {
                transfer: Some(false),
                ..Default::default()
            },
        );
        let capability = registry.capabilities("https").unwrap();
        assert!(capability.download && !capability.transfer);
    }

    #[test]
    fn test_relative_locator_round_trip() {
        let config = AppConfig::rooted_at("/srv");
        let registry = SchemeRegistry::with_defaults(&config).unwrap();
        let path = config.object_root.join("imported/ab/cdef0123.jpg");
        let locator = registry.locator_for_path("file", &path).unwrap();
        assert_eq!(locator.to_string(), "file://imported/ab/cdef0123.jpg");
        assert_eq!(registry.resolve_path(&locator).unwrap(), path);
    }

    #[test]
    fn test_delete_resource_respects_capability() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::rooted_at(dir.path());
        let registry = SchemeRegistry::with_defaults(&config).unwrap();
        let path = config.object_root.join("versions/fix0/ab/00000000.png");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();

        let locator = registry.locator_for_path("file", &path).unwrap();
        assert!(registry.delete_resource(&locator).unwrap());
        assert!(!path.exists());

        let remote = Locator::parse("https://example.org/a.png").unwrap();
        assert!(!registry.delete_resource(&remote).unwrap());
    }

    #[test]
    fn test_overrides_parse_per_environment_base() {
        let json = r#"{"s3": {"base": {"default": "/mnt/s3"}, "delete": true}}"#;
        let overrides: BTreeMap<String, SchemeOptions> = serde_json::from_str(json).unwrap();
        let mut registry = SchemeRegistry::new("staging");
        for (scheme, options) in overrides {
            registry.register(&scheme, options);
        }
        assert_eq!(registry.base("s3").unwrap(), Some("/mnt/s3"));
        assert!(registry.capabilities("s3").unwrap().delete);
    }
}
