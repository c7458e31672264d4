use serde::{Deserialize, Serialize};

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    150
}
fn default_batch_size() -> usize {
    64
}
fn default_max_segment_size_kb() -> u64 {
    102_400
}
fn default_enable_payload_indexes() -> bool {
    true
}
fn default_incremental_safety_buffer_secs() -> i64 {
    30
}
fn default_max_file_size_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_hidden_state_dir() -> String {
    ".semantic-index".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            aws_region: None,
            aws_profile: None,
        }
    }
}

/// Project-level configuration, persisted under `<hidden_state_dir>/config.json`.
/// Unknown fields are ignored on load so older/newer configs remain compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub worker_threads: Option<usize>,
    pub embedding: ProviderConfig,
    #[serde(default = "default_max_segment_size_kb")]
    pub max_segment_size_kb: u64,
    #[serde(default = "default_enable_payload_indexes")]
    pub enable_payload_indexes: bool,
    #[serde(default = "default_incremental_safety_buffer_secs")]
    pub incremental_safety_buffer_secs: i64,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_hidden_state_dir")]
    pub hidden_state_dir: String,
    #[serde(default)]
    pub vector_store_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_batch_size(),
            worker_threads: None,
            embedding: ProviderConfig::default(),
            max_segment_size_kb: default_max_segment_size_kb(),
            enable_payload_indexes: default_enable_payload_indexes(),
            incremental_safety_buffer_secs: default_incremental_safety_buffer_secs(),
            max_file_size_bytes: default_max_file_size_bytes(),
            hidden_state_dir: default_hidden_state_dir(),
            vector_store_url: "http://localhost:6333".to_string(),
        }
    }
}

impl Config {
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "config is corrupt, using defaults");
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }

    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)
    }

    /// Resolve worker thread count: explicit override > configured value > provider default.
    pub fn resolve_thread_count(&self, cli_override: Option<usize>, provider_default: usize) -> usize {
        cli_override.or(self.worker_threads).unwrap_or(provider_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size, 1000);
        assert_eq!(cfg.chunk_overlap, 150);
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.worker_threads, None);
        assert_eq!(cfg.max_segment_size_kb, 102_400);
        assert!(cfg.enable_payload_indexes);
        assert_eq!(cfg.incremental_safety_buffer_secs, 30);
        assert_eq!(cfg.max_file_size_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.hidden_state_dir, ".semantic-index");
        assert_eq!(cfg.embedding.provider, "ollama");
    }

    #[test]
    fn load_or_default_falls_back_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_or_default(&dir.path().join("missing.json"));
        assert_eq!(cfg.chunk_size, Config::default().chunk_size);
    }

    #[test]
    fn load_or_default_falls_back_on_corrupt_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cfg = Config::load_or_default(&path);
        assert_eq!(cfg.chunk_size, Config::default().chunk_size);
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = Config::default();
        cfg.chunk_size = 2000;
        cfg.worker_threads = Some(8);
        cfg.save(&path).unwrap();
        assert!(!dir.path().join("config.json.tmp").exists());

        let loaded = Config::load_or_default(&path);
        assert_eq!(loaded.chunk_size, 2000);
        assert_eq!(loaded.worker_threads, Some(8));
    }

    #[test]
    fn resolve_thread_count_prefers_override_then_config_then_provider_default() {
        let mut cfg = Config::default();
        assert_eq!(cfg.resolve_thread_count(None, 4), 4);
        cfg.worker_threads = Some(6);
        assert_eq!(cfg.resolve_thread_count(None, 4), 6);
        assert_eq!(cfg.resolve_thread_count(Some(2), 4), 2);
    }
}
