use anyhow::{Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A scheme-prefixed resource reference such as `file://ab/cd12ef34.jpg`,
/// `https://example.org/a.png` or `vimeo://76979871`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    scheme: String,
    path: String,
}

impl Locator {
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            path: path.into(),
        }
    }

    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref();
        let (scheme, path) = value
            .split_once("://")
            .ok_or_else(|| anyhow!("locator {:?} has no scheme prefix", value))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(anyhow!("locator {:?} has an invalid scheme", value));
        }
        Ok(Self::new(scheme, path))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `scheme://`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Extension of the last path segment, lower-cased.
    pub fn extension(&self) -> Option<String> {
        let last = self.path.rsplit('/').next()?;
        let last = last.split(['?', '#']).next()?;
        let (_, ext) = last.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}

impl FromStr for Locator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Locator::parse(&raw).map_err(serde::de::Error::custom)
    }
}
