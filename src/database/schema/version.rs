use anyhow::Result;
use arrayvec::ArrayString;
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::now_ms;
use crate::models::{Locator, MediaType};

// Key: (media id, version name) -> Value: VersionSchema (bitcode)
pub const VERSION_TABLE: TableDefinition<(u64, &str), &[u8]> =
    TableDefinition::new("media_version");

/// Rows are written once a make finishes, so only terminal states are stored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub enum VersionStatus {
    Processed,
    Error,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Processed => write!(f, "processed"),
            VersionStatus::Error => write!(f, "error"),
        }
    }
}

/// A derived artifact of one media. Owned by `media_id`, never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct VersionSchema {
    pub media_id: u64,
    pub version: String,
    /// Empty while no artifact has been produced (status `error`)
    pub locator: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub checksum: Option<ArrayString<64>>,
    pub status: VersionStatus,
    pub created_time: i64,
    pub modified_time: i64,
}

impl VersionSchema {
    pub fn processed(
        media_id: u64,
        version: impl Into<String>,
        locator: &Locator,
        media_type: MediaType,
        mime_type: impl Into<String>,
        checksum: Option<ArrayString<64>>,
    ) -> Self {
        let timestamp = now_ms();
        Self {
            media_id,
            version: version.into(),
            locator: locator.to_string(),
            media_type,
            mime_type: mime_type.into(),
            checksum,
            status: VersionStatus::Processed,
            created_time: timestamp,
            modified_time: timestamp,
        }
    }

    pub fn failed(media_id: u64, version: impl Into<String>, media_type: MediaType) -> Self {
        let timestamp = now_ms();
        Self {
            media_id,
            version: version.into(),
            locator: String::new(),
            media_type,
            mime_type: String::new(),
            checksum: None,
            status: VersionStatus::Error,
            created_time: timestamp,
            modified_time: timestamp,
        }
    }

    pub fn locator(&self) -> Option<Locator> {
        if self.locator.is_empty() {
            None
        } else {
            Locator::parse(&self.locator).ok()
        }
    }

    pub fn get(txn: &ReadTransaction, media_id: u64, version: &str) -> Result<Option<Self>> {
        let table = txn.open_table(VERSION_TABLE)?;
        let row = match table.get((media_id, version))? {
            Some(bytes) => Some(bitcode::decode(bytes.value())?),
            None => None,
        };
        Ok(row)
    }

    pub fn for_media(txn: &ReadTransaction, media_id: u64) -> Result<Vec<Self>> {
        let table = txn.open_table(VERSION_TABLE)?;
        let mut versions = Vec::new();
        for entry in table.range::<(u64, &str)>((media_id, "")..)? {
            let (key, value) = entry?;
            if key.value().0 != media_id {
                break;
            }
            versions.push(bitcode::decode(value.value())?);
        }
        Ok(versions)
    }

    pub fn get_all(txn: &ReadTransaction) -> Result<Vec<Self>> {
        let table = txn.open_table(VERSION_TABLE)?;
        let mut versions = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            versions.push(bitcode::decode(value.value())?);
        }
        Ok(versions)
    }

    /// Read the current row inside a write transaction (single writer per row).
    pub fn get_for_update(
        txn: &WriteTransaction,
        media_id: u64,
        version: &str,
    ) -> Result<Option<Self>> {
        let table = txn.open_table(VERSION_TABLE)?;
        let row = match table.get((media_id, version))? {
            Some(bytes) => Some(bitcode::decode(bytes.value())?),
            None => None,
        };
        Ok(row)
    }

    pub fn has_versions(txn: &ReadTransaction, media_id: u64) -> Result<bool> {
        let table = txn.open_table(VERSION_TABLE)?;
        let mut range = table.range::<(u64, &str)>((media_id, "")..)?;
        let found = match range.next() {
            Some(entry) => entry?.0.value().0 == media_id,
            None => false,
        };
        Ok(found)
    }

    pub fn upsert(&self, txn: &WriteTransaction) -> Result<()> {
        let mut table = txn.open_table(VERSION_TABLE)?;
        let bytes = bitcode::encode(self);
        table.insert((self.media_id, self.version.as_str()), bytes.as_slice())?;
        Ok(())
    }

    pub fn remove(txn: &WriteTransaction, media_id: u64, version: &str) -> Result<bool> {
        let mut table = txn.open_table(VERSION_TABLE)?;
        let removed = table.remove((media_id, version))?.is_some();
        Ok(removed)
    }
}
