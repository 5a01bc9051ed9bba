pub mod hash;

use std::collections::HashSet;
use shared::types::AppEntry;

/// The set of applications the responder advertises.
///
/// Owned by the controller task, so every mutation is atomic with respect to
/// `snapshot()` by construction. Insertion order is kept for diagnostics only.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    entries: Vec<AppEntry>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-write-wins merge: any existing entry sharing a name with one of
    /// `new_entries` is dropped and the new entry appended. Other entries stay.
    pub fn replace_or_merge(&mut self, new_entries: Vec<AppEntry>) {
        for entry in new_entries {
            let entry = entry.bounded();
            self.entries.retain(|existing| existing.name != entry.name);
            self.entries.push(entry);
        }
    }

    /// Remove entries whose name is listed. Absent names are ignored.
    /// Returns how many entries were removed.
    pub fn delete(&mut self, names: &[String]) -> usize {
        let names: HashSet<&str> = names.iter().map(String::as_str).collect();
        let before = self.entries.len();
        self.entries.retain(|entry| {
            let remove = names.contains(entry.name.as_str());
            if remove {
                tracing::debug!("Removing application {} from registry", entry.name);
            }
            !remove
        });
        before - self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<AppEntry> {
        self.entries.clone()
    }

    pub fn get(&self, name: &str) -> Option<&AppEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn digest(&self) -> String {
        hash::compute_digest(&self.entries)
    }

    /// Log the current contents under a label
    pub fn dump(&self, label: &str) {
        tracing::debug!("Registry [{}] holds {} application(s)", label, self.entries.len());
        for e in &self.entries {
            tracing::debug!(
                "  app={} prefix={} cors={} allow_stop={} query={} payload={}",
                e.name,
                e.url_prefix,
                e.cors_origin,
                e.allow_stop,
                e.launch_query,
                e.launch_payload
            );
        }
    }
}
