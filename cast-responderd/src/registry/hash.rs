use sha2::{Sha256, Digest};
use shared::types::AppEntry;

/// Computes a SHA-256 digest of a registry snapshot.
/// Entries are visited in name order so the digest does not depend on
/// registration order; fields are NUL-separated to keep boundaries unambiguous.
pub fn compute_digest(entries: &[AppEntry]) -> String {
    let mut indices: Vec<usize> = (0..entries.len()).collect();
    indices.sort_by(|&a, &b| entries[a].name.cmp(&entries[b].name));

    let mut hasher = Sha256::new();
    for &i in &indices {
        let e = &entries[i];
        for field in [
            &e.name,
            &e.url_prefix,
            &e.cors_origin,
            &e.launch_query,
            &e.launch_payload,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([e.allow_stop as u8, b'\n']);
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_entry(name: &str) -> AppEntry {
        AppEntry {
            name: name.to_string(),
            url_prefix: format!("my{}", name),
            cors_origin: ".example.com".to_string(),
            launch_query: "source_type=12".to_string(),
            launch_payload: String::new(),
            allow_stop: true,
        }
    }

    #[test]
    fn test_digest_ignores_order() {
        let a = test_entry("Netflix");
        let b = test_entry("YouTube");

        assert_eq!(
            compute_digest(&[a.clone(), b.clone()]),
            compute_digest(&[b, a]),
        );
    }

    #[test]
    fn test_digest_changes_on_field_change() {
        let a = test_entry("Netflix");
        let mut changed = a.clone();
        changed.allow_stop = false;

        assert_ne!(compute_digest(&[a]), compute_digest(&[changed]));
    }

    #[test]
    fn test_digest_field_boundaries() {
        let mut a = test_entry("ab");
        a.url_prefix = "c".to_string();
        let mut b = test_entry("a");
        b.url_prefix = "bc".to_string();

        assert_ne!(compute_digest(&[a]), compute_digest(&[b]));
    }

    #[test]
    fn test_empty_registry_digest_is_stable() {
        assert_eq!(compute_digest(&[]), compute_digest(&[]));
        assert_eq!(compute_digest(&[]).len(), 64);
    }
}
