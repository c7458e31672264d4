use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Git-awareness for a project root. Non-git projects get `GitTopology::None`
/// and downstream logic falls back to mtime/hash-based incremental indexing.
pub enum GitTopology {
    Repo(git2::Repository),
    None,
}

impl GitTopology {
    pub fn discover(root: &Path) -> Self {
        match git2::Repository::discover(root) {
            Ok(repo) => GitTopology::Repo(repo),
            Err(_) => GitTopology::None,
        }
    }

    pub fn is_git(&self) -> bool {
        matches!(self, GitTopology::Repo(_))
    }

    pub fn current_branch(&self) -> Result<Option<String>> {
        match self {
            GitTopology::None => Ok(None),
            GitTopology::Repo(repo) => {
                let head = match repo.head() {
                    Ok(h) => h,
                    Err(_) => return Ok(None),
                };
                Ok(head.shorthand().map(|s| s.to_string()))
            }
        }
    }

    pub fn current_commit(&self) -> Result<Option<String>> {
        match self {
            GitTopology::None => Ok(None),
            GitTopology::Repo(repo) => {
                let head = match repo.head() {
                    Ok(h) => h,
                    Err(_) => return Ok(None),
                };
                Ok(head.target().map(|oid| oid.to_string()))
            }
        }
    }

    pub fn list_branches(&self) -> Result<Vec<String>> {
        match self {
            GitTopology::None => Ok(Vec::new()),
            GitTopology::Repo(repo) => {
                let mut out = Vec::new();
                for b in repo.branches(Some(git2::BranchType::Local))? {
                    let (branch, _) = b?;
                    if let Some(name) = branch.name()? {
                        out.push(name.to_string());
                    }
                }
                Ok(out)
            }
        }
    }

    /// Commits reachable from `branch`, most recent first.
    pub fn ancestry(&self, branch: &str) -> Result<Vec<String>> {
        match self {
            GitTopology::None => Ok(Vec::new()),
            GitTopology::Repo(repo) => {
                let reference = repo.find_branch(branch, git2::BranchType::Local)?.into_reference();
                let oid = reference
                    .target()
                    .ok_or_else(|| crate::error::IndexError::Other(anyhow::anyhow!("branch {branch} has no target")))?;
                let mut revwalk = repo.revwalk()?;
                revwalk.push(oid)?;
                let mut out = Vec::new();
                for oid in revwalk.flatten() {
                    out.push(oid.to_string());
                }
                Ok(out)
            }
        }
    }

    /// Files added, modified, or deleted between `since_commit` and HEAD
    /// (working tree included), relative to the project root.
    pub fn changed_files(&self, since_commit: &str) -> Result<Vec<ChangedFile>> {
        match self {
            GitTopology::None => Ok(Vec::new()),
            GitTopology::Repo(repo) => {
                let old_oid = git2::Oid::from_str(since_commit)?;
                let old_commit = repo.find_commit(old_oid)?;
                let old_tree = old_commit.tree()?;

                let head = repo.head()?;
                let new_commit = head.peel_to_commit()?;
                let new_tree = new_commit.tree()?;

                let mut opts = git2::DiffOptions::new();
                let diff = repo.diff_tree_to_workdir_with_index(Some(&old_tree), Some(&mut opts))?;
                let _ = new_tree;

                let mut out = Vec::new();
                diff.foreach(
                    &mut |delta, _| {
                        let kind = match delta.status() {
                            git2::Delta::Added | git2::Delta::Copied | git2::Delta::Untracked => ChangeKind::Added,
                            git2::Delta::Deleted => ChangeKind::Deleted,
                            _ => ChangeKind::Modified,
                        };
                        if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                            out.push(ChangedFile { path: path.to_path_buf(), kind });
                        }
                        true
                    },
                    None,
                    None,
                    None,
                )?;

                Ok(out)
            }
        }
    }

    /// Whether `ancestor_commit` is reachable from `branch`.
    pub fn branch_contains(&self, branch: &str, ancestor_commit: &str) -> Result<bool> {
        self.ancestry(branch).map(|commits| commits.iter().any(|c| c == ancestor_commit))
    }

    /// Blob id of `path` as recorded in HEAD's tree, or `None` if the
    /// project isn't a repo, HEAD has no commits yet, or the path isn't
    /// tracked at HEAD (e.g. a file created but not yet committed).
    pub fn blob_id_for_path(&self, path: &Path) -> Result<Option<String>> {
        match self {
            GitTopology::None => Ok(None),
            GitTopology::Repo(repo) => {
                let head = match repo.head() {
                    Ok(h) => h,
                    Err(_) => return Ok(None),
                };
                let commit = match head.peel_to_commit() {
                    Ok(c) => c,
                    Err(_) => return Ok(None),
                };
                let tree = commit.tree()?;
                Ok(tree.get_path(path).ok().map(|entry| entry.id().to_string()))
            }
        }
    }
}
