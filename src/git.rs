use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository};

use crate::{llog_debug, Result};

/// Read-only access to the repository the agent works in.
pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        llog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    /// `None` when `path` is not inside a repository.
    pub fn discover(path: &Path) -> Option<Self> {
        Self::new(path).ok()
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    /// Full sha of HEAD, or `None` on an unborn branch.
    pub fn head_commit(&self) -> Result<Option<String>> {
        let repo = self.repo()?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        Ok(Some(commit.id().to_string()))
    }

    /// Check for uncommitted changes (staged or unstaged).
    pub fn is_dirty(&self) -> Result<bool> {
        let repo = self.repo()?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    }
}

/// The short HEAD sha if it differs from `before`.
///
/// Used after an iteration to record the commit the agent produced.
pub fn commit_if_changed(git: Option<&GitOps>, before: Option<&str>) -> Option<String> {
    let git = git?;
    let after = git.head_commit().ok().flatten()?;
    if before == Some(after.as_str()) {
        return None;
    }
    Some(after.chars().take(7).collect())
}
