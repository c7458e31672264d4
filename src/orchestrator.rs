use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::branch_visibility::BranchVisibility;
use crate::chunker::Chunker;
use crate::config::Config;
use crate::embeddings::EmbeddingClient;
use crate::error::{IndexError, Result};
use crate::fingerprint;
use crate::git_topology::{ChangeKind, GitTopology};
use crate::lock::IndexLock;
use crate::metadata::{GitSnapshot, ProgressiveMetadata, RunStatus};
use crate::payload_index;
use crate::vector_store::{Filter, Point, VectorStore};
use crate::walker::{detect_language, FileWalker};
use crate::worker_pool::{CancellationToken, EmbedTask, VectorWorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Full,
    Reconcile,
    ClearAndFull,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub files_done: usize,
    pub files_total: usize,
    pub current_path: Option<PathBuf>,
    pub chunks_so_far: u64,
    pub phase: &'static str,
}

pub type ProgressCallback = dyn Fn(ProgressEvent) + Send + Sync;

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub files_completed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: u64,
    pub status: Option<RunStatus>,
}

/// Top-level pipeline: decides a mode, drives the walker/chunker/worker pool/
/// vector store, and keeps ProgressiveMetadata in lockstep at file
/// boundaries. Holds no process-wide state besides the advisory lock file.
pub struct IndexOrchestrator {
    project_root: PathBuf,
    config: Config,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl IndexOrchestrator {
    pub fn new(project_root: PathBuf, config: Config, store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        IndexOrchestrator { project_root, config, store, embedder }
    }

    fn hidden_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.hidden_state_dir)
    }

    fn metadata_path(&self) -> PathBuf {
        self.hidden_dir().join("progressive.json")
    }

    fn project_id(&self) -> String {
        let canonical = self.project_root.canonicalize().unwrap_or_else(|_| self.project_root.clone());
        fingerprint::project_id(&canonical)
    }

    fn collection_name(&self) -> String {
        fingerprint::collection_name(&self.project_id(), self.embedder.model_id())
    }

    pub async fn run(
        &self,
        mode: Mode,
        cancellation: CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<IndexStats> {
        let _lock = IndexLock::acquire(&self.hidden_dir())?;

        let collection = self.collection_name();
        if !self.store.collection_exists(&collection).await? {
            self.store
                .create_collection(&collection, self.embedder.dimensions(), self.config.max_segment_size_kb)
                .await?;
        }
        if self.config.enable_payload_indexes {
            let report = payload_index::ensure_indexes(self.store.as_ref(), &collection).await;
            if !report.failed.is_empty() {
                tracing::warn!(?report.failed, "some payload indexes failed to create");
            }
        }

        let mut metadata = ProgressiveMetadata::load(&self.metadata_path());
        let git = GitTopology::discover(&self.project_root);

        if git.is_git() {
            let current_branch = git.current_branch()?;
            if let (Some(recorded), Some(current)) = (&metadata.git.branch, &current_branch) {
                if recorded != current {
                    tracing::info!(from = %recorded, to = %current, "branch checkout detected, reconciling visibility");
                    let visibility = BranchVisibility::new(self.store.as_ref(), collection.clone());
                    let project_id = self.project_id();
                    visibility.reconcile_branch_visibility(&project_id, &self.project_root, current).await?;
                }
            }
        }

        if mode == Mode::Reconcile {
            return self.reconcile(&collection, &git, &mut metadata, cancellation, progress).await;
        }

        if mode == Mode::ClearAndFull {
            self.store.delete_collection(&collection).await.ok();
            self.store
                .create_collection(&collection, self.embedder.dimensions(), self.config.max_segment_size_kb)
                .await?;
            metadata = ProgressiveMetadata::default();
        }

        if metadata.can_resume_interrupted(self.embedder.provider_type(), self.embedder.model_id()) {
            tracing::info!(
                completed = metadata.current_index,
                total = metadata.files_to_index.len(),
                "resuming interrupted operation"
            );
            return self.drive_files(&collection, &mut metadata, cancellation, progress).await;
        }

        let files_to_index = self.select_files_for_mode(&collection, mode, &git, &metadata).await?;

        let snapshot = GitSnapshot {
            commit: git.current_commit()?,
            branch: git.current_branch()?,
            ancestry: git
                .current_branch()?
                .map(|b| git.ancestry(&b).unwrap_or_default())
                .unwrap_or_default(),
        };

        metadata.start_run(
            files_to_index,
            self.embedder.provider_type().to_string(),
            self.embedder.model_id().to_string(),
            self.embedder.dimensions(),
            snapshot,
        );
        metadata.save(&self.metadata_path())?;

        self.drive_files(&collection, &mut metadata, cancellation, progress).await
    }

    /// Chooses which files belong in this run based on mode and prior state.
    /// Full mode (no prior state) always walks everything; incremental modes
    /// prefer git-based change detection and fall back to mtime comparison.
    /// Deletions discovered via git are hidden on the current branch here,
    /// not just during an explicit `reconcile` — a plain incremental `index`
    /// run is the common case that actually encounters them.
    async fn select_files_for_mode(
        &self,
        collection: &str,
        mode: Mode,
        git: &GitTopology,
        metadata: &ProgressiveMetadata,
    ) -> Result<Vec<PathBuf>> {
        let walker = FileWalker::new(self.project_root.clone(), self.config.max_file_size_bytes, self.config.hidden_state_dir.clone());
        let all_files = walker.walk();

        let is_fresh_start = mode == Mode::Full || metadata.status == RunStatus::Idle || metadata.files_to_index.is_empty();
        if is_fresh_start {
            return Ok(all_files);
        }

        if git.is_git() {
            if let Some(since) = &metadata.git.commit {
                let changed = git.changed_files(since)?;

                let deleted: Vec<&PathBuf> = changed.iter().filter(|c| c.kind == ChangeKind::Deleted).map(|c| &c.path).collect();
                if !deleted.is_empty() {
                    if let Some(branch) = git.current_branch()? {
                        let visibility = BranchVisibility::new(self.store.as_ref(), collection.to_string());
                        let project_id = self.project_id();
                        for path in deleted {
                            let path_str = path.to_string_lossy().replace('\\', "/");
                            visibility.hide_file_in_branch(&project_id, &path_str, &branch).await?;
                        }
                    }
                }

                let changed_paths: Vec<PathBuf> = changed
                    .iter()
                    .filter(|c| c.kind != ChangeKind::Deleted)
                    .map(|c| c.path.clone())
                    .collect();
                return Ok(all_files.into_iter().filter(|f| changed_paths.contains(f)).collect());
            }
        }

        let safety_buffer = self.config.incremental_safety_buffer_secs;
        let threshold = metadata.last_successful_mtime.map(|m| m - safety_buffer);
        Ok(all_files
            .into_iter()
            .filter(|rel| {
                let Some(threshold) = threshold else { return true };
                let abs = self.project_root.join(rel);
                mtime_secs(&abs).map(|m| m > threshold).unwrap_or(true)
            })
            .collect())
    }

    /// Processes the remaining files in `metadata.files_to_index` one at a
    /// time, each committed atomically: accumulate all chunk vectors, then
    /// delete-then-upsert as a single batch before advancing the resume point.
    async fn drive_files(
        &self,
        collection: &str,
        metadata: &mut ProgressiveMetadata,
        cancellation: CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<IndexStats> {
        let chunker = Chunker::new(self.config.chunk_size, self.config.chunk_overlap);
        let worker_count = self.config.resolve_thread_count(None, self.embedder.default_thread_count());
        let mut pool = VectorWorkerPool::spawn(self.embedder.clone(), worker_count, worker_count * 4, cancellation.clone());

        let project_id = self.project_id();
        let git = GitTopology::discover(&self.project_root);
        let current_branch = git.current_branch()?;
        let current_commit = git.current_commit()?;
        let total = metadata.files_to_index.len();
        let mut stats = IndexStats::default();

        let files = metadata.remaining_files().to_vec();
        for rel_path in files {
            if cancellation.is_cancelled() {
                tracing::info!("cancellation observed before starting next file");
                break;
            }

            let abs_path = self.project_root.join(&rel_path);
            let path_str = rel_path.to_string_lossy().replace('\\', "/");

            let content = match tokio::fs::read_to_string(&abs_path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %abs_path.display(), error = %e, "skipping unreadable file");
                    stats.files_skipped += 1;
                    continue;
                }
            };

            let file_hash = fingerprint::file_hash(content.as_bytes());
            let chunks = chunker.chunk(&content);
            let mtime = mtime_secs(&abs_path).unwrap_or(0);
            let file_size = content.len() as u64;
            let language = detect_language(&abs_path).unwrap_or("text");
            let blob = git.blob_id_for_path(&rel_path).unwrap_or(None);

            for chunk in &chunks {
                pool.submit(EmbedTask { file_path: path_str.clone(), chunk: chunk.clone() })
                    .await
                    .map_err(|_| IndexError::Other(anyhow::anyhow!("worker pool closed unexpectedly")))?;
            }

            let mut vectors: HashMap<usize, Vec<f32>> = HashMap::new();
            let mut failed = false;
            while vectors.len() < chunks.len() {
                let Some(result) = pool.recv().await else { break };
                match result.vector {
                    Ok(v) => {
                        vectors.insert(result.chunk.chunk_index, v);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path_str, error = %e, "embedding failed for chunk, aborting file");
                        failed = true;
                        break;
                    }
                }
            }

            if cancellation.is_cancelled() || failed {
                tracing::info!(path = %path_str, "file not committed (cancelled or embedding failed)");
                continue;
            }

            let indexed_at = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
            let points: Vec<Point> = chunks
                .iter()
                .map(|chunk| {
                    let payload = json!({
                        "type": "content",
                        "doc_kind": "content",
                        "path": path_str,
                        "content": chunk.content,
                        "language": language,
                        "file_size": file_size,
                        "file_mtime": mtime,
                        "file_hash": file_hash,
                        "chunk_index": chunk.chunk_index,
                        "total_chunks": chunk.total_chunks,
                        "line_start": chunk.line_start,
                        "line_end": chunk.line_end,
                        "project_id": project_id,
                        "indexed_at": indexed_at,
                        "git_branch": current_branch,
                        "git_commit": current_commit,
                        "git_blob": blob,
                        "working_dir_status": "committed",
                        "hidden_branches": Vec::<String>::new(),
                    });
                    Point {
                        id: fingerprint::doc_id(&project_id, &path_str, chunk.chunk_index, "content"),
                        vector: vectors.get(&chunk.chunk_index).cloned().unwrap_or_default(),
                        payload,
                    }
                })
                .collect();

            let delete_filter = Filter::new()
                .with_eq("project_id", project_id.clone())
                .with_eq("path", path_str.clone())
                .with_eq("doc_kind", "content");
            self.store.delete_by_filter(collection, &delete_filter).await?;
            if !points.is_empty() {
                self.store.upsert_points(collection, &points, true).await?;
            }

            metadata.record_file_complete(&rel_path, chunks.len() as u64, mtime);
            metadata.save(&self.metadata_path())?;

            stats.files_completed += 1;
            stats.chunks_indexed += chunks.len() as u64;

            if let Some(cb) = progress {
                cb(ProgressEvent {
                    files_done: metadata.current_index,
                    files_total: total,
                    current_path: Some(rel_path.clone()),
                    chunks_so_far: metadata.chunks_indexed,
                    phase: "indexing",
                });
            }
        }

        // `cancellation` is the caller's own handle (also held by the pool's
        // workers); we don't force-cancel it here, since a clean finish must
        // leave it untouched for any later run that reuses the same handle.

        if cancellation.is_cancelled() {
            metadata.finish_cancelled();
            stats.status = Some(RunStatus::Cancelled);
        } else if metadata.current_index >= metadata.files_to_index.len() {
            metadata.finish_completed();
            stats.status = Some(RunStatus::Completed);
        } else {
            metadata.finish_failed();
            stats.status = Some(RunStatus::Failed);
        }
        metadata.save(&self.metadata_path())?;

        Ok(stats)
    }

    /// Streams the collection, diffs stored file hashes against the
    /// filesystem, and hides/deletes/reindexes accordingly.
    async fn reconcile(
        &self,
        collection: &str,
        git: &GitTopology,
        metadata: &mut ProgressiveMetadata,
        cancellation: CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<IndexStats> {
        let project_id = self.project_id();
        let current_branch = git.current_branch()?;
        let mut stats = IndexStats::default();

        let filter = Filter::new().with_eq("project_id", project_id.clone()).with_eq("type", "content");
        let mut by_path: HashMap<String, String> = HashMap::new();
        let mut cursor = None;
        loop {
            let page = self.store.scroll(collection, &filter, 512, cursor.clone()).await?;
            for point in &page.points {
                if let (Some(path), Some(hash)) = (
                    point.payload.get("path").and_then(|v| v.as_str()),
                    point.payload.get("file_hash").and_then(|v| v.as_str()),
                ) {
                    by_path.insert(path.to_string(), hash.to_string());
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let visibility = BranchVisibility::new(self.store.as_ref(), collection.to_string());
        let mut to_reindex = Vec::new();

        for (path, stored_hash) in &by_path {
            if cancellation.is_cancelled() {
                break;
            }
            let abs = self.project_root.join(path);
            match tokio::fs::read(&abs).await {
                Ok(bytes) => {
                    let current_hash = fingerprint::file_hash(&bytes);
                    if &current_hash != stored_hash {
                        to_reindex.push(PathBuf::from(path));
                    }
                }
                Err(_) => {
                    if git.is_git() {
                        if let Some(branch) = &current_branch {
                            visibility.hide_file_in_branch(&project_id, path, branch).await?;
                        }
                    } else {
                        visibility.hard_delete_file(&project_id, path).await?;
                    }
                }
            }
        }

        let walker = FileWalker::new(self.project_root.clone(), self.config.max_file_size_bytes, self.config.hidden_state_dir.clone());
        for rel in walker.walk() {
            let key = rel.to_string_lossy().replace('\\', "/");
            if !by_path.contains_key(&key) {
                to_reindex.push(rel);
            }
        }

        if !to_reindex.is_empty() {
            metadata.start_run(
                to_reindex,
                self.embedder.provider_type().to_string(),
                self.embedder.model_id().to_string(),
                self.embedder.dimensions(),
                metadata.git.clone(),
            );
            metadata.save(&self.metadata_path())?;
            stats = self.drive_files(collection, metadata, cancellation, progress).await?;
        }

        Ok(stats)
    }
}

fn mtime_secs(path: &Path) -> Option<i64> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs() as i64)
}
