use anyhow::{Context, Result};
use log::info;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

use crate::database::schema::{MEDIA_TABLE, MediaSchema, VERSION_TABLE, VersionSchema};
use crate::utils::fs_utils::ensure_parent;

/// Handle on the on-disk media database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pub in_disk: Arc<Database>,
}

impl Store {
    /// Open (or create) the database and make sure every table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let database = Database::create(path)
            .with_context(|| format!("failed to open media database {:?}", path))?;
        let store = Self {
            in_disk: Arc::new(database),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<()> {
        let txn = self.begin_write()?;
        let _ = txn.open_table(MEDIA_TABLE)?;
        let _ = txn.open_table(VERSION_TABLE)?;
        txn.commit()?;
        info!("Database tables initialized successfully.");
        Ok(())
    }

    pub fn begin_read(&self) -> Result<redb::ReadTransaction> {
        Ok(self.in_disk.begin_read()?)
    }

    pub fn begin_write(&self) -> Result<redb::WriteTransaction> {
        Ok(self.in_disk.begin_write()?)
    }

    pub fn load_media(&self, id: u64) -> Result<Option<MediaSchema>> {
        let txn = self.begin_read()?;
        MediaSchema::get(&txn, id)
    }

    pub fn load_versions(&self, media_id: u64) -> Result<Vec<VersionSchema>> {
        let txn = self.begin_read()?;
        VersionSchema::for_media(&txn, media_id)
    }

    /// Persist a new media row under a freshly allocated id.
    pub fn insert_new_media(&self, mut media: MediaSchema) -> Result<MediaSchema> {
        let txn = self.begin_write()?;
        media.id = MediaSchema::next_id(&txn)?;
        media.insert(&txn)?;
        txn.commit()?;
        Ok(media)
    }
}
