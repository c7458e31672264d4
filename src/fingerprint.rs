use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

/// Derives the 8-hex-character project identifier from a canonical project root path.
pub fn project_id(canonical_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

/// Collection name is derived from the project id and embedding model so that
/// switching embedding models forces a fresh collection.
pub fn collection_name(project_id: &str, model_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    let model_hash = hex::encode(&hasher.finalize()[..4]);
    format!("idx_{project_id}_{model_hash}")
}

/// SHA-256 hash of file content, hex-encoded.
pub fn file_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Deterministic UUID-v5 document id for a given project/file/chunk/kind.
pub fn doc_id(project_id: &str, file_path: &str, chunk_index: usize, doc_kind: &str) -> Uuid {
    let name = format!("{project_id}:{file_path}:{chunk_index}:{doc_kind}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn project_id_is_eight_hex_chars() {
        let id = project_id(&PathBuf::from("/home/user/repo"));
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn project_id_is_stable() {
        let p = PathBuf::from("/home/user/repo");
        assert_eq!(project_id(&p), project_id(&p));
    }

    #[test]
    fn doc_id_is_deterministic() {
        let a = doc_id("abcd1234", "src/main.rs", 0, "content");
        let b = doc_id("abcd1234", "src/main.rs", 0, "content");
        assert_eq!(a, b);
    }

    #[test]
    fn doc_id_differs_by_chunk_index() {
        let a = doc_id("abcd1234", "src/main.rs", 0, "content");
        let b = doc_id("abcd1234", "src/main.rs", 1, "content");
        assert_ne!(a, b);
    }

    #[test]
    fn collection_name_changes_with_model() {
        let a = collection_name("abcd1234", "nomic-embed-text");
        let b = collection_name("abcd1234", "titan-embed-v2");
        assert_ne!(a, b);
    }
}
