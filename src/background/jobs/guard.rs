use dashmap::DashSet;
use std::sync::Arc;

// ────────────────────────────────────────────────────────────────
// ProcessingGuard - one maker per (media id, version) at a time
// ────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InProgress(Arc<DashSet<(u64, String)>>);

pub struct ProcessingGuard {
    set: Arc<DashSet<(u64, String)>>,
    key: (u64, String),
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

impl InProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another worker holds the same pair.
    pub fn try_acquire(&self, media_id: u64, version: &str) -> Option<ProcessingGuard> {
        let key = (media_id, version.to_string());
        if self.0.insert(key.clone()) {
            Some(ProcessingGuard {
                set: self.0.clone(),
                key,
            })
        } else {
            None
        }
    }
}
