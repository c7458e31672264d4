use std::collections::BTreeSet;
use std::path::Path;

use serde_json::json;

use crate::chunker::Chunk;
use crate::error::Result;
use crate::fingerprint;
use crate::vector_store::{Filter, Point, VectorStore};

const SCROLL_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingDirStatus {
    Staged,
    Unstaged,
}

impl WorkingDirStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingDirStatus::Staged => "staged",
            WorkingDirStatus::Unstaged => "unstaged",
        }
    }
}

/// Branch-aware visibility for indexed documents. Git mode prefers soft hide
/// (mutating `hidden_branches`) so other branches keep seeing the document;
/// non-git mode has no branch concept and falls back to hard delete.
pub struct BranchVisibility<'a> {
    store: &'a dyn VectorStore,
    collection: String,
}

impl<'a> BranchVisibility<'a> {
    pub fn new(store: &'a dyn VectorStore, collection: String) -> Self {
        BranchVisibility { store, collection }
    }

    pub async fn hide_file_in_branch(&self, project_id: &str, path: &str, branch: &str) -> Result<()> {
        self.mutate_hidden_branches(project_id, path, branch, true).await
    }

    pub async fn unhide_file_in_branch(&self, project_id: &str, path: &str, branch: &str) -> Result<()> {
        self.mutate_hidden_branches(project_id, path, branch, false).await
    }

    /// Idempotent: scrolls the matched content docs, adds/removes `branch`
    /// from each document's `hidden_branches` list, and writes the whole
    /// list back. A document whose list already reflects the target state
    /// is skipped.
    async fn mutate_hidden_branches(&self, project_id: &str, path: &str, branch: &str, hide: bool) -> Result<()> {
        let filter = Filter::new()
            .with_eq("project_id", project_id)
            .with_eq("path", path)
            .with_eq("type", "content");

        let mut cursor = None;
        loop {
            let page = self.store.scroll(&self.collection, &filter, SCROLL_PAGE_SIZE, cursor.clone()).await?;
            for point in &page.points {
                let mut hidden: Vec<String> = point
                    .payload
                    .get("hidden_branches")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();

                let already_hidden = hidden.iter().any(|b| b == branch);
                if hide == already_hidden {
                    continue;
                }
                if hide {
                    hidden.push(branch.to_string());
                } else {
                    hidden.retain(|b| b != branch);
                }

                self.store
                    .set_payload(&self.collection, &[point.id], json!({ "hidden_branches": hidden }))
                    .await?;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    /// Hard delete: used only in non-git mode, or explicit `clean-data`.
    pub async fn hard_delete_file(&self, project_id: &str, path: &str) -> Result<()> {
        let filter = Filter::new().with_eq("project_id", project_id).with_eq("path", path);
        self.store.delete_by_filter(&self.collection, &filter).await
    }

    /// Recomputes which tracked files should be visible on `branch` after a
    /// checkout: any stored path that no longer exists on disk gets hidden,
    /// any that does gets unhidden. Does not touch hashes or reindex content
    /// — that is `IndexOrchestrator::reconcile`'s job.
    pub async fn reconcile_branch_visibility(&self, project_id: &str, project_root: &Path, branch: &str) -> Result<()> {
        let filter = Filter::new()
            .with_eq("project_id", project_id)
            .with_eq("type", "content")
            .with_eq("doc_kind", "content");

        let mut paths: BTreeSet<String> = BTreeSet::new();
        let mut cursor = None;
        loop {
            let page = self.store.scroll(&self.collection, &filter, SCROLL_PAGE_SIZE, cursor.clone()).await?;
            for point in &page.points {
                if let Some(path) = point.payload.get("path").and_then(|v| v.as_str()) {
                    paths.insert(path.to_string());
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        for path in paths {
            let exists = project_root.join(&path).is_file();
            if exists {
                self.unhide_file_in_branch(project_id, &path, branch).await?;
            } else {
                self.hide_file_in_branch(project_id, &path, branch).await?;
            }
        }
        Ok(())
    }

    /// Inserts working-dir overlay documents for a file's uncommitted
    /// content. These carry a distinct `doc_kind` ("working_dir") so they
    /// coexist with the committed docs for the same `(project_id, path)`
    /// rather than replacing them; any prior overlay for this path is
    /// cleared first so a re-save doesn't accumulate stale chunks.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_working_dir_overlay(
        &self,
        project_id: &str,
        path: &str,
        branch: &str,
        chunks: &[Chunk],
        vectors: &std::collections::HashMap<usize, Vec<f32>>,
        language: &str,
        file_hash: &str,
        status: WorkingDirStatus,
    ) -> Result<()> {
        self.clear_working_dir_overlay(project_id, path).await?;

        let points: Vec<Point> = chunks
            .iter()
            .map(|chunk| {
                let payload = json!({
                    "type": "content",
                    "doc_kind": "working_dir",
                    "path": path,
                    "content": chunk.content,
                    "language": language,
                    "file_hash": file_hash,
                    "chunk_index": chunk.chunk_index,
                    "total_chunks": chunk.total_chunks,
                    "line_start": chunk.line_start,
                    "line_end": chunk.line_end,
                    "project_id": project_id,
                    "git_branch": branch,
                    "git_commit": "working_dir",
                    "git_blob": serde_json::Value::Null,
                    "working_dir_status": status.as_str(),
                    "hidden_branches": Vec::<String>::new(),
                });
                Point {
                    id: fingerprint::doc_id(project_id, path, chunk.chunk_index, "working_dir"),
                    vector: vectors.get(&chunk.chunk_index).cloned().unwrap_or_default(),
                    payload,
                }
            })
            .collect();

        if !points.is_empty() {
            self.store.upsert_points(&self.collection, &points, true).await?;
        }
        Ok(())
    }

    /// Removes any working-dir overlay for `path`, restoring visibility of
    /// the committed docs (e.g. after the change is committed or reverted).
    pub async fn clear_working_dir_overlay(&self, project_id: &str, path: &str) -> Result<()> {
        let filter = Filter::new()
            .with_eq("project_id", project_id)
            .with_eq("path", path)
            .with_eq("doc_kind", "working_dir");
        self.store.delete_by_filter(&self.collection, &filter).await
    }
}
