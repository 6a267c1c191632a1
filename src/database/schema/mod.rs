pub mod media;
pub mod version;

pub use media::{MEDIA_TABLE, MediaSchema};
pub use version::{VERSION_TABLE, VersionSchema, VersionStatus};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
