use std::sync::Arc;

use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::fingerprint;
use crate::git_topology::GitTopology;
use crate::vector_store::{Filter, VectorStore};

#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub path_glob: Option<String>,
    pub language: Option<String>,
    pub min_score: Option<f32>,
    pub limit: usize,
    pub branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryHit {
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub score: f32,
    pub content: String,
    pub git_branch: Option<String>,
}

/// Read-only, stateless semantic search. Multiple queries may run
/// concurrently against the same collection.
pub struct QueryService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    project_root: std::path::PathBuf,
}

impl QueryService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingClient>, project_root: std::path::PathBuf) -> Self {
        QueryService { store, embedder, project_root }
    }

    fn project_id(&self) -> String {
        let canonical = self.project_root.canonicalize().unwrap_or_else(|_| self.project_root.clone());
        fingerprint::project_id(&canonical)
    }

    fn collection_name(&self) -> String {
        fingerprint::collection_name(&self.project_id(), self.embedder.model_id())
    }

    pub async fn search(&self, query_text: &str, filters: QueryFilters) -> Result<Vec<QueryHit>> {
        let vectors = self.embedder.embed_batch(&[query_text.to_string()]).await?;
        let vector = vectors.into_iter().next().unwrap_or_default();

        let project_id = self.project_id();
        let mut filter = Filter::new().with_eq("project_id", project_id).with_eq("type", "content");

        if let Some(language) = &filters.language {
            filter = filter.with_eq("language", language.clone());
        }

        // The branch-visibility filter is mandatory, not opt-in: a caller
        // that doesn't name a branch still gets the current checkout's view,
        // determined here rather than trusting the caller to pass one.
        let git = GitTopology::discover(&self.project_root);
        let effective_branch = match &filters.branch {
            Some(branch) => Some(branch.clone()),
            None => git.current_branch()?,
        };
        if let Some(branch) = &effective_branch {
            filter = filter.with_eq("git_branch", branch.clone()).with_not_contains("hidden_branches", branch.clone());
        }

        let limit = if filters.limit == 0 { 10 } else { filters.limit };
        let collection = self.collection_name();
        let hits = self.store.search(&collection, &vector, &filter, limit, filters.min_score).await?;

        let mut results: Vec<QueryHit> = hits
            .into_iter()
            .filter(|h| {
                filters
                    .path_glob
                    .as_ref()
                    .map(|glob| path_matches_glob(h.payload.get("path").and_then(|v| v.as_str()).unwrap_or(""), glob))
                    .unwrap_or(true)
            })
            .map(|h| QueryHit {
                path: h.payload.get("path").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                line_start: h.payload.get("line_start").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                line_end: h.payload.get("line_end").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                score: h.score,
                content: h.payload.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                git_branch: h.payload.get("git_branch").and_then(|v| v.as_str()).map(str::to_string),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }
}

/// Minimal glob support: `*` matches any run of characters, everything else
/// must match literally. Sufficient for path-prefix/suffix filters.
fn path_matches_glob(path: &str, glob: &str) -> bool {
    let parts: Vec<&str> = glob.split('*').collect();
    if parts.len() == 1 {
        return path == glob;
    }
    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match path[pos..].find(part) {
            Some(idx) => {
                if i == 0 && idx != 0 {
                    return false;
                }
                pos += idx + part.len();
            }
            None => return false,
        }
    }
    if let Some(last) = parts.last() {
        if !last.is_empty() && !path.ends_with(last) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingClient;
    use crate::test_support::FakeVectorStore;
    use crate::vector_store::Point;
    use async_trait::async_trait;
    use serde_json::json;

    #[test]
    fn glob_star_matches_any_suffix() {
        assert!(path_matches_glob("src/main.rs", "src/*"));
        assert!(path_matches_glob("src/lib/mod.rs", "*.rs"));
        assert!(!path_matches_glob("src/main.py", "*.rs"));
    }

    #[test]
    fn glob_without_star_is_exact() {
        assert!(path_matches_glob("a.rs", "a.rs"));
        assert!(!path_matches_glob("a.rs", "b.rs"));
    }

    struct EchoEmbedder;

    #[async_trait]
    impl EmbeddingClient for EchoEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_id(&self) -> &str {
            "echo"
        }
        fn provider_type(&self) -> &'static str {
            "echo"
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        fn default_thread_count(&self) -> usize {
            1
        }
    }

    fn init_repo_with_commit(dir: &std::path::Path) -> String {
        let repo = git2::Repository::init(dir).unwrap();
        std::fs::write(dir.join("a.rs"), "fn a() {}").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(std::path::Path::new("a.rs")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        repo.head().unwrap().shorthand().unwrap().to_string()
    }

    #[tokio::test]
    async fn search_excludes_docs_hidden_on_current_branch_without_explicit_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        let branch = init_repo_with_commit(dir.path());

        let store = Arc::new(FakeVectorStore::default());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(EchoEmbedder);
        let service = QueryService::new(store.clone(), embedder.clone(), dir.path().to_path_buf());
        let collection = service.collection_name();
        store.create_collection(&collection, 2, 1024).await.unwrap();

        let project_id = service.project_id();
        let visible = Point {
            id: fingerprint::doc_id(&project_id, "a.rs", 0, "content"),
            vector: vec![1.0, 0.0],
            payload: json!({
                "project_id": project_id, "type": "content", "path": "a.rs",
                "content": "fn a() {}", "git_branch": branch, "hidden_branches": Vec::<String>::new(),
            }),
        };
        let hidden = Point {
            id: fingerprint::doc_id(&project_id, "b.rs", 0, "content"),
            vector: vec![1.0, 0.0],
            payload: json!({
                "project_id": project_id, "type": "content", "path": "b.rs",
                "content": "fn b() {}", "git_branch": branch, "hidden_branches": [branch.clone()],
            }),
        };
        store.upsert_points(&collection, &[visible, hidden], true).await.unwrap();

        let hits = service.search("fn a", QueryFilters::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.rs");
    }
}
