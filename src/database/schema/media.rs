use anyhow::Result;
use arrayvec::ArrayString;
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::now_ms;
use crate::models::{Locator, MediaType};

// Key: media id -> Value: MediaSchema (bitcode)
pub const MEDIA_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("media");

/// An original asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct MediaSchema {
    pub id: u64,
    pub locator: String,
    pub title: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub checksum: Option<ArrayString<64>>,
    pub owner: Option<String>,
    pub created_time: i64,
    pub modified_time: i64,
}

impl MediaSchema {
    pub fn new(
        id: u64,
        locator: &Locator,
        title: impl Into<String>,
        media_type: MediaType,
        mime_type: impl Into<String>,
    ) -> Self {
        let timestamp = now_ms();
        Self {
            id,
            locator: locator.to_string(),
            title: title.into(),
            media_type,
            mime_type: mime_type.into(),
            checksum: None,
            owner: None,
            created_time: timestamp,
            modified_time: timestamp,
        }
    }

    pub fn locator(&self) -> Result<Locator> {
        Locator::parse(&self.locator)
    }

    pub fn get(txn: &ReadTransaction, id: u64) -> Result<Option<Self>> {
        let table = txn.open_table(MEDIA_TABLE)?;
        let row = match table.get(id)? {
            Some(bytes) => Some(bitcode::decode(bytes.value())?),
            None => None,
        };
        Ok(row)
    }

    pub fn get_all(txn: &ReadTransaction) -> Result<Vec<Self>> {
        let table = txn.open_table(MEDIA_TABLE)?;
        let mut media = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            media.push(bitcode::decode(value.value())?);
        }
        Ok(media)
    }

    pub fn ids_in(txn: &ReadTransaction, from: u64, to: u64) -> Result<Vec<u64>> {
        let table = txn.open_table(MEDIA_TABLE)?;
        let mut ids = Vec::new();
        for entry in table.range(from..=to)? {
            let (key, _) = entry?;
            ids.push(key.value());
        }
        Ok(ids)
    }

    /// One past the highest stored id.
    pub fn next_id(txn: &WriteTransaction) -> Result<u64> {
        let table = txn.open_table(MEDIA_TABLE)?;
        let last = table.last()?.map(|(key, _)| key.value());
        Ok(last.map_or(1, |id| id + 1))
    }

    pub fn insert(&self, txn: &WriteTransaction) -> Result<()> {
        let mut table = txn.open_table(MEDIA_TABLE)?;
        let bytes = bitcode::encode(self);
        table.insert(self.id, bytes.as_slice())?;
        Ok(())
    }

    pub fn remove(txn: &WriteTransaction, id: u64) -> Result<bool> {
        let mut table = txn.open_table(MEDIA_TABLE)?;
        let removed = table.remove(id)?.is_some();
        Ok(removed)
    }
}
