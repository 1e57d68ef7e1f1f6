//! Hosting boundary: put the audio file and the index where listeners fetch them.

use crate::config::{PodcastConfig, PublishConfig, PublishTarget};
use crate::error::CallError;
use crate::files::{sha256_file, sha256_hex, write_atomic};
use crate::pipeline::types::UploadReceipt;
use crate::publish::index::{self, IndexEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::process::Command;
use tracing::{debug, info};

/// What to upload and where.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    /// Path relative to the hosting root, e.g. `podcasts/20261019_daily.wav`.
    pub remote_path: String,
    pub content_hash: String,
    /// Episode title, used in commit messages.
    pub title: String,
}

#[async_trait]
pub trait HostingBackend: Send + Sync {
    /// Upload the artifact. Uploading content that is already present under
    /// `remote_path` with the same hash must be a no-op.
    async fn upload_artifact(
        &self,
        target: &PublishTarget,
        request: &UploadRequest,
    ) -> Result<UploadReceipt, CallError>;

    /// Insert or replace the episode's entry in the index. Returns the
    /// commit ref of the published state.
    async fn update_index(
        &self,
        podcast: &PodcastConfig,
        entry: &IndexEntry,
    ) -> Result<String, CallError>;
}

/// Public URL for a path under the hosting root.
pub fn public_url(target: &PublishTarget, remote_path: &str) -> String {
    format!(
        "{}/{}",
        target.base_url.trim_end_matches('/'),
        remote_path.trim_start_matches('/')
    )
}

/// A local directory served as a static site, optionally a git checkout
/// that is committed and pushed after each step.
pub struct RepositoryBackend {
    settings: PublishConfig,
}

impl RepositoryBackend {
    pub fn new(settings: PublishConfig) -> Self {
        Self { settings }
    }

    fn token(&self) -> Option<String> {
        std::env::var(&self.settings.token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }

    /// Commit `path` (relative to the repository) and push if a remote is set.
    async fn commit_and_push(
        &self,
        target: &PublishTarget,
        path: &str,
        message: &str,
    ) -> Result<(), CallError> {
        let repo = &target.repository;
        if !is_git_checkout(repo) {
            return Ok(());
        }

        git(repo, &["add", "--", path], None).await?;
        let staged = git(repo, &["status", "--porcelain", "--", path], None).await?;
        if staged.trim().is_empty() {
            debug!(path, "Nothing to commit");
        } else {
            let name = format!("user.name={}", self.settings.committer_name);
            let email = format!("user.email={}", self.settings.committer_email);
            git(
                repo,
                &["-c", &name, "-c", &email, "commit", "-m", message, "--", path],
                None,
            )
            .await?;
        }

        if let Some(remote) = &target.remote {
            let token = self.token();
            let url = authenticated_url(remote, token.as_deref());
            let refspec = format!("HEAD:{}", target.branch);
            git(repo, &["push", &url, &refspec], token.as_deref())
                .await
                // A rejected or unreachable push may succeed later.
                .map_err(|e| match e {
                    CallError::Permanent(message) => CallError::Transient(message),
                    other => other,
                })?;
            info!(branch = %target.branch, "Pushed publication repository");
        }
        Ok(())
    }
}

#[async_trait]
impl HostingBackend for RepositoryBackend {
    async fn upload_artifact(
        &self,
        target: &PublishTarget,
        request: &UploadRequest,
    ) -> Result<UploadReceipt, CallError> {
        let dest = target.repository.join(&request.remote_path);
        let receipt = UploadReceipt {
            url: public_url(target, &request.remote_path),
            remote_path: request.remote_path.clone(),
            content_hash: request.content_hash.clone(),
        };

        let present = sha256_file(&dest).ok();
        if present.as_deref() == Some(request.content_hash.as_str()) {
            debug!(path = %dest.display(), "Artifact already present with same content");
        } else {
            let bytes = std::fs::read(&request.local_path).map_err(|e| {
                CallError::Permanent(format!(
                    "cannot read artifact {}: {e}",
                    request.local_path.display()
                ))
            })?;
            if sha256_hex(&bytes) != request.content_hash {
                return Err(CallError::Permanent(format!(
                    "artifact {} changed since synthesis",
                    request.local_path.display()
                )));
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            write_atomic(&dest, &bytes).map_err(|e| CallError::Permanent(e.to_string()))?;
            info!(path = %dest.display(), bytes = bytes.len(), "Artifact uploaded");
        }

        self.commit_and_push(
            target,
            &request.remote_path,
            &format!("Add podcast audio: {}", request.title),
        )
        .await?;
        Ok(receipt)
    }

    async fn update_index(
        &self,
        podcast: &PodcastConfig,
        entry: &IndexEntry,
    ) -> Result<String, CallError> {
        let target = &podcast.publish;
        let path = target.repository.join(&target.index_file);
        let existing = match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(e)),
        };

        let document = index::upsert(existing.as_deref(), podcast, entry)?;
        std::fs::create_dir_all(&target.repository).map_err(io_error)?;
        write_atomic(&path, document.as_bytes()).map_err(|e| CallError::Permanent(e.to_string()))?;
        info!(path = %path.display(), guid = %entry.guid, "Index updated");

        self.commit_and_push(
            target,
            &target.index_file,
            &format!("Add podcast episode: {}", entry.title),
        )
        .await?;

        if is_git_checkout(&target.repository) {
            let head = git(&target.repository, &["rev-parse", "HEAD"], None).await?;
            Ok(head.trim().to_string())
        } else {
            Ok(sha256_hex(document.as_bytes()))
        }
    }
}

fn io_error(e: std::io::Error) -> CallError {
    CallError::Permanent(e.to_string())
}

fn is_git_checkout(repo: &Path) -> bool {
    repo.join(".git").exists()
}

/// Insert the token into an https remote URL.
fn authenticated_url(remote: &str, token: Option<&str>) -> String {
    match (token, remote.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !rest.contains('@') => {
            format!("https://x-access-token:{token}@{rest}")
        }
        _ => remote.to_string(),
    }
}

/// git in `repo`. Dropping the future that drives it kills the process.
fn git_command(repo: &Path, args: &[&str]) -> Command {
    let mut command = Command::new("git");
    command
        .arg("-C")
        .arg(repo)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    command
}

/// Run git in `repo`; `secret` is masked in error output.
async fn git(repo: &Path, args: &[&str], secret: Option<&str>) -> Result<String, CallError> {
    let output = git_command(repo, args)
        .output()
        .await
        .map_err(|e| CallError::Permanent(format!("failed to run git: {e}")))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if let Some(secret) = secret {
        stderr = stderr.replace(secret, "***");
    }
    let subcommand = args
        .iter()
        .find(|a| !a.starts_with('-') && !a.contains('='))
        .copied()
        .unwrap_or("git");
    Err(CallError::Permanent(format!("git {subcommand} failed: {stderr}")))
}

/// Mock hosting backend for testing.
///
/// Keeps uploaded hashes and index entries in memory and counts calls.
#[derive(Default)]
pub struct MockHostingBackend {
    uploads: AtomicUsize,
    index_updates: AtomicUsize,
    index_failures_left: AtomicUsize,
    upload_failure: Option<CallError>,
    stored: Mutex<HashMap<String, String>>,
    entries: Mutex<Vec<IndexEntry>>,
}

impl MockHostingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` index updates permanently.
    pub fn with_index_failures(self, times: usize) -> Self {
        self.index_failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Fail every upload with `error`.
    pub fn with_upload_failure(mut self, error: CallError) -> Self {
        self.upload_failure = Some(error);
        self
    }

    /// Fail the next `times` index updates; usable after construction.
    pub fn fail_next_index_updates(&self, times: usize) {
        self.index_failures_left.store(times, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn index_update_count(&self) -> usize {
        self.index_updates.load(Ordering::SeqCst)
    }

    /// Index entries, newest first.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl HostingBackend for MockHostingBackend {
    async fn upload_artifact(
        &self,
        target: &PublishTarget,
        request: &UploadRequest,
    ) -> Result<UploadReceipt, CallError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.upload_failure {
            return Err(error.clone());
        }
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.remote_path.clone(), request.content_hash.clone());
        Ok(UploadReceipt {
            url: public_url(target, &request.remote_path),
            remote_path: request.remote_path.clone(),
            content_hash: request.content_hash.clone(),
        })
    }

    async fn update_index(
        &self,
        _podcast: &PodcastConfig,
        entry: &IndexEntry,
    ) -> Result<String, CallError> {
        self.index_updates.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .index_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CallError::Permanent("index push rejected".to_string()));
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.guid != entry.guid);
        entries.insert(0, entry.clone());
        Ok(format!("mock-{}", entries.len()))
    }
}
