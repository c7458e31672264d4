use std::time::Duration;

use crate::error::Result;
use crate::vector_store::VectorStore;

/// Fixed set of payload indexes required for query performance.
pub const REQUIRED_INDEXES: &[(&str, &str)] = &[
    ("type", "keyword"),
    ("path", "text"),
    ("git_branch", "keyword"),
    ("file_mtime", "integer"),
    ("hidden_branches", "keyword"),
];

pub struct IndexCreationReport {
    pub created: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Ensures the required payload indexes exist on a collection. Safe to call
/// on every first index run; a 409 (already exists) counts as success.
pub async fn ensure_indexes(store: &dyn VectorStore, collection: &str) -> IndexCreationReport {
    let mut created = Vec::new();
    let mut failed = Vec::new();

    for (field, schema) in REQUIRED_INDEXES {
        let mut attempts = 0;
        let mut last_err = None;
        loop {
            match store.create_payload_index(collection, field, schema).await {
                Ok(()) => {
                    created.push((*field).to_string());
                    last_err = None;
                    break;
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    attempts += 1;
                    if attempts >= 3 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1u64 << (attempts - 1))).await;
                }
            }
        }
        if let Some(err) = last_err {
            failed.push(((*field).to_string(), err));
        }
    }

    IndexCreationReport { created, failed }
}

/// Read-only check for query/status contexts: returns fields that are
/// expected but currently missing.
pub async fn missing_indexes(store: &dyn VectorStore, collection: &str) -> Result<Vec<&'static str>> {
    let present = store.list_payload_indexes(collection).await?;
    Ok(REQUIRED_INDEXES
        .iter()
        .filter(|(field, _)| !present.iter().any(|p| p == field))
        .map(|(field, _)| *field)
        .collect())
}

/// User-initiated recovery: drop every required index, then recreate it from
/// scratch. Unlike `ensure_indexes`, this does not treat "already there" as
/// the steady state — a corrupted index is expected to actually go away.
pub async fn rebuild_indexes(store: &dyn VectorStore, collection: &str) -> IndexCreationReport {
    for (field, _) in REQUIRED_INDEXES {
        if let Err(e) = store.delete_payload_index(collection, field).await {
            tracing::warn!(field, error = %e, "failed to drop payload index before rebuild");
        }
    }
    ensure_indexes(store, collection).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeVectorStore;

    #[tokio::test]
    async fn ensure_indexes_creates_every_required_field() {
        let store = FakeVectorStore::default();
        store.create_collection("idx_test", 4, 1024).await.unwrap();
        let report = ensure_indexes(&store, "idx_test").await;
        assert!(report.failed.is_empty());
        assert_eq!(report.created.len(), REQUIRED_INDEXES.len());
        assert!(missing_indexes(&store, "idx_test").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_indexes_reports_gaps() {
        let store = FakeVectorStore::default();
        store.create_collection("idx_test", 4, 1024).await.unwrap();
        store.create_payload_index("idx_test", "type", "keyword").await.unwrap();
        let missing = missing_indexes(&store, "idx_test").await.unwrap();
        assert!(missing.contains(&"path"));
        assert!(!missing.contains(&"type"));
    }

    #[tokio::test]
    async fn rebuild_indexes_drops_before_recreating() {
        let store = FakeVectorStore::default();
        store.create_collection("idx_test", 4, 1024).await.unwrap();
        ensure_indexes(&store, "idx_test").await;
        assert!(missing_indexes(&store, "idx_test").await.unwrap().is_empty());

        let report = rebuild_indexes(&store, "idx_test").await;
        assert!(report.failed.is_empty());
        assert_eq!(report.created.len(), REQUIRED_INDEXES.len());
        assert!(missing_indexes(&store, "idx_test").await.unwrap().is_empty());
    }
}
