//! Deterministic artifact key derivation.

use uuid::Uuid;

/// Blob store key for a task's published artifact:
/// `packages/<accountHash>/<bundleID>/<taskId>.ipa`.
///
/// Inputs are validated as safe path segments before a task is ever
/// created, so the key never needs escaping.
#[must_use]
pub fn artifact_key_for(account_hash: &str, bundle_id: &str, task_id: Uuid) -> String {
    format!("packages/{account_hash}/{bundle_id}/{task_id}.ipa")
}

/// Sibling temp key used while injection rewrites the archive.
#[must_use]
pub(crate) fn temp_key_for(artifact_key: &str) -> String {
    format!("{artifact_key}.new")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        let id = Uuid::nil();
        assert_eq!(
            artifact_key_for("aaaaaaaa", "com.x.y", id),
            format!("packages/aaaaaaaa/com.x.y/{id}.ipa")
        );
        assert_eq!(
            temp_key_for("packages/a/b/c.ipa"),
            "packages/a/b/c.ipa.new"
        );
    }
}
