use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "py", "pyi", "ts", "tsx", "js", "jsx", "mjs", "cjs", "go", "java", "c", "h", "cpp", "cc",
    "cxx", "hpp", "hxx", "hh", "kt", "kts", "rb", "php", "cs", "swift", "scala", "md", "toml",
    "yaml", "yml", "json",
];

/// Enumerates indexable files under a project root, honoring gitignore rules,
/// an extension allowlist, and a size limit. Emits sorted project-relative paths.
pub struct FileWalker {
    root: PathBuf,
    max_file_size_bytes: u64,
    hidden_state_dir: String,
}

impl FileWalker {
    pub fn new(root: PathBuf, max_file_size_bytes: u64, hidden_state_dir: String) -> Self {
        FileWalker { root, max_file_size_bytes, hidden_state_dir }
    }

    pub fn walk(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(true)
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if self.is_excluded(path) {
                continue;
            }
            if !self.has_allowed_extension(path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() > self.max_file_size_bytes {
                continue;
            }
            if self.looks_binary(path) {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_path_buf());
            }
        }

        out.sort();
        out
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|c| c.as_os_str() == self.hidden_state_dir.as_str())
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| DEFAULT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// A file is treated as binary if its first 8KB contain a NUL byte.
    fn looks_binary(&self, path: &Path) -> bool {
        let Ok(bytes) = std::fs::read(path) else { return true };
        let probe_len = bytes.len().min(8192);
        bytes[..probe_len].contains(&0u8)
    }
}

/// Infers a language tag from a file extension, for payload metadata only
/// (no AST parsing is performed).
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => "cpp",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "swift" => "swift",
        "scala" => "scala",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn skips_hidden_state_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".semantic-index")).unwrap();
        fs::write(dir.path().join(".semantic-index/progressive.json"), "{}").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let walker = FileWalker::new(dir.path().to_path_buf(), 5_000_000, ".semantic-index".to_string());
        let files = walker.walk();
        assert_eq!(files, vec![PathBuf::from("main.rs")]);
    }

    #[test]
    fn skips_binary_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), [0u8, 1, 2, 3]).unwrap();
        let walker = FileWalker::new(dir.path().to_path_buf(), 5_000_000, ".semantic-index".to_string());
        assert!(walker.walk().is_empty());
    }

    #[test]
    fn skips_oversized_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "x".repeat(100)).unwrap();
        let walker = FileWalker::new(dir.path().to_path_buf(), 10, ".semantic-index".to_string());
        assert!(walker.walk().is_empty());
    }

    #[test]
    fn detects_language_by_extension() {
        assert_eq!(detect_language(Path::new("a.rs")), Some("rust"));
        assert_eq!(detect_language(Path::new("a.unknownext")), None);
    }
}
