pub mod branch_visibility;
pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod fingerprint;
pub mod git_topology;
pub mod lock;
pub mod metadata;
pub mod orchestrator;
pub mod payload_index;
pub mod query;
#[cfg(test)]
mod test_support;
pub mod vector_store;
pub mod walker;
pub mod worker_pool;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::Config;
pub use embeddings::EmbeddingClient;
pub use error::{IndexError, Result};
pub use orchestrator::{IndexOrchestrator, IndexStats, Mode, ProgressCallback};
pub use query::{QueryFilters, QueryHit, QueryService};
pub use vector_store::{VectorStore, VectorStoreClient};
pub use worker_pool::CancellationToken;

/// Builds the explicit dependency set an orchestrator run or query needs.
/// No process-wide state is held anywhere in this crate besides the
/// advisory lock file acquired for the duration of a run.
pub struct IndexDeps {
    pub project_root: PathBuf,
    pub config: Config,
    pub embedder: Arc<dyn EmbeddingClient>,
}

impl IndexDeps {
    pub fn new(project_root: PathBuf, config: Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingClient> = Arc::from(embeddings::create_client(&config.embedding)?);
        Ok(IndexDeps { project_root, config, embedder })
    }

    fn store(&self) -> Arc<dyn VectorStore> {
        Arc::new(VectorStoreClient::new(self.config.vector_store_url.clone()))
    }

    pub fn orchestrator(&self) -> IndexOrchestrator {
        IndexOrchestrator::new(self.project_root.clone(), self.config.clone(), self.store(), self.embedder.clone())
    }

    pub fn query_service(&self) -> QueryService {
        QueryService::new(self.store(), self.embedder.clone(), self.project_root.clone())
    }
}

/// Runs an index operation against a project root with an explicit mode and
/// cancellation handle, reporting progress through an optional callback.
/// This is the synchronous entry point a CLI or server builds on; it holds
/// no global state of its own.
pub async fn run_index(
    deps: &IndexDeps,
    mode: Mode,
    cancellation: CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<IndexStats> {
    deps.orchestrator().run(mode, cancellation, progress).await
}

/// Runs a semantic search query against the project's collection.
pub async fn run_query(deps: &IndexDeps, query_text: &str, filters: QueryFilters) -> Result<Vec<QueryHit>> {
    deps.query_service().search(query_text, filters).await
}
