use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitSnapshot {
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub ancestry: Vec<String>,
}

/// Persisted on-disk state for a single project's indexing history. Written
/// only by the orchestrator, and only at file boundaries, with atomic
/// temp-file + rename semantics so a crash never leaves a torn write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveMetadata {
    pub status: RunStatus,
    pub provider_name: String,
    pub model_name: String,
    pub embedding_dim: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub files_to_index: Vec<PathBuf>,
    pub current_index: usize,
    pub completed_files: BTreeSet<PathBuf>,
    pub chunks_indexed: u64,
    pub git: GitSnapshot,
    pub last_successful_mtime: Option<i64>,
}

impl Default for ProgressiveMetadata {
    fn default() -> Self {
        ProgressiveMetadata {
            status: RunStatus::Idle,
            provider_name: String::new(),
            model_name: String::new(),
            embedding_dim: 0,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            files_to_index: Vec::new(),
            current_index: 0,
            completed_files: BTreeSet::new(),
            chunks_indexed: 0,
            git: GitSnapshot::default(),
            last_successful_mtime: None,
        }
    }
}

impl ProgressiveMetadata {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "progressive metadata is corrupt, starting fresh");
                    ProgressiveMetadata::default()
                }
            },
            Err(_) => ProgressiveMetadata::default(),
        }
    }

    /// Atomic write: serialize to a temp file, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::FileIo { path: parent.display().to_string(), source: e })?;
        }
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self).map_err(|e| IndexError::Other(anyhow::anyhow!(e)))?;
        std::fs::write(&tmp, text).map_err(|e| IndexError::FileIo { path: tmp.display().to_string(), source: e })?;
        std::fs::rename(&tmp, path).map_err(|e| IndexError::FileIo { path: path.display().to_string(), source: e })
    }

    pub fn start_run(&mut self, files: Vec<PathBuf>, provider_name: String, model_name: String, embedding_dim: usize, git: GitSnapshot) {
        self.status = RunStatus::InProgress;
        self.provider_name = provider_name;
        self.model_name = model_name;
        self.embedding_dim = embedding_dim;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.files_to_index = files;
        self.current_index = 0;
        self.completed_files.clear();
        self.chunks_indexed = 0;
        self.git = git;
    }

    /// Whether an interrupted run can be resumed in place, rather than
    /// falling back to timestamp-based incremental indexing.
    pub fn can_resume_interrupted(&self, provider_name: &str, model_name: &str) -> bool {
        self.status == RunStatus::InProgress
            && self.current_index < self.files_to_index.len()
            && self.provider_name == provider_name
            && self.model_name == model_name
    }

    pub fn record_file_complete(&mut self, path: &Path, chunks: u64, mtime: i64) {
        self.completed_files.insert(path.to_path_buf());
        self.current_index += 1;
        self.chunks_indexed += chunks;
        self.last_successful_mtime = Some(self.last_successful_mtime.map_or(mtime, |m| m.max(mtime)));
        self.last_heartbeat_at = Some(Utc::now());
    }

    pub fn finish_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn finish_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
    }

    pub fn finish_failed(&mut self) {
        self.status = RunStatus::Failed;
    }

    pub fn remaining_files(&self) -> &[PathBuf] {
        &self.files_to_index[self.current_index.min(self.files_to_index.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fresh_metadata_cannot_resume() {
        let meta = ProgressiveMetadata::default();
        assert!(!meta.can_resume_interrupted("ollama", "nomic-embed-text"));
    }

    #[test]
    fn interrupted_run_can_resume_with_matching_provider() {
        let mut meta = ProgressiveMetadata::default();
        meta.start_run(vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")], "ollama".into(), "nomic-embed-text".into(), 768, GitSnapshot::default());
        meta.record_file_complete(Path::new("a.rs"), 3, 100);
        assert!(meta.can_resume_interrupted("ollama", "nomic-embed-text"));
        assert!(!meta.can_resume_interrupted("bedrock", "titan"));
    }

    #[test]
    fn completed_run_cannot_resume() {
        let mut meta = ProgressiveMetadata::default();
        meta.start_run(vec![PathBuf::from("a.rs")], "ollama".into(), "m".into(), 768, GitSnapshot::default());
        meta.record_file_complete(Path::new("a.rs"), 1, 100);
        meta.finish_completed();
        assert!(!meta.can_resume_interrupted("ollama", "m"));
    }

    #[test]
    fn save_and_load_round_trips_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progressive.json");
        let mut meta = ProgressiveMetadata::default();
        meta.start_run(vec![PathBuf::from("a.rs")], "ollama".into(), "m".into(), 768, GitSnapshot::default());
        meta.save(&path).unwrap();
        assert!(!dir.path().join("progressive.json.tmp").exists());

        let loaded = ProgressiveMetadata::load(&path);
        assert_eq!(loaded.provider_name, "ollama");
        assert_eq!(loaded.files_to_index.len(), 1);
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progressive.json");
        std::fs::write(&path, "{ not valid json").unwrap();
        let loaded = ProgressiveMetadata::load(&path);
        assert_eq!(loaded.status, RunStatus::Idle);
    }
}
