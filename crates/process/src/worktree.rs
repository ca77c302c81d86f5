//! Git worktree creation for issues with `use_worktree` set, and base
//! commit capture for `executeIssue` (§4.C10). Grounded on the oddjobs
//! workspace effect's `create_worktree` subprocess pattern, simplified to
//! a single awaited call since `executeIssue` needs the resulting path
//! before it can spawn the agent at all.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use ie_domain::{Error, Result};
use uuid::Uuid;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

async fn run_git(args: &[&str], cwd: &Path) -> Result<Output> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args).current_dir(cwd);
    tokio::time::timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| Error::Other(format!("git {args:?} timed out")))?
        .map_err(Error::from)
}

/// Creates `<repo_root>/.worktrees/<issue_id>` on a new branch off `HEAD`
/// and returns the worktree path.
pub async fn create(repo_root: &Path, issue_id: Uuid) -> Result<PathBuf> {
    let path = repo_root.join(".worktrees").join(issue_id.to_string());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let branch = format!("issue/{issue_id}");
    let path_str = path.display().to_string();

    let output = run_git(&["worktree", "add", "-b", &branch, &path_str, "HEAD"], repo_root).await?;
    if !output.status.success() {
        return Err(Error::Other(format!(
            "git worktree add failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(path)
}

/// `git rev-parse HEAD` in the given directory. Best-effort: returns
/// `None` rather than failing `executeIssue` if the directory isn't a
/// repository (e.g. a project with no `directory` configured).
pub async fn capture_base_commit_hash(dir: &Path) -> Option<String> {
    let output = run_git(&["rev-parse", "HEAD"], dir).await.ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
