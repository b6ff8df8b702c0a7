//! Git adapter for the tournament.
//!
//! The evolve controller only needs branch lifecycle plus one squash
//! operation, so we keep a small, explicit wrapper around `git` subprocess
//! calls. Every successful mutation emits exactly one event.

use std::path::PathBuf;
use std::process::Output;

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::RunError;
use crate::events::{Emitter, EventPayload};

/// Version-control operations the evolve controller relies on.
#[allow(async_fn_in_trait)]
pub trait Vcs {
    /// Name of the checked-out branch.
    async fn current_branch(&self) -> Result<String>;
    /// Create `name` at HEAD and check it out.
    async fn create_branch(&self, name: &str) -> Result<()>;
    /// Create `name` at `base` and check it out.
    async fn create_branch_from(&self, name: &str, base: &str) -> Result<()>;
    async fn checkout(&self, name: &str) -> Result<()>;
    /// Force-delete `name`.
    async fn delete_branch(&self, name: &str) -> Result<()>;
    /// Collapse everything since the merge-base with `base` (working tree
    /// included, untracked files too) into one commit on the current branch.
    async fn squash_since(&self, base: &str, message: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    emitter: Emitter,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, emitter: Emitter) -> Self {
        Self {
            workdir: workdir.into(),
            emitter,
        }
    }

    /// SHA of the merge-base between HEAD and `base`.
    pub async fn merge_base(&self, base: &str) -> Result<String> {
        let out = self.run_capture(&["merge-base", "HEAD", base]).await?;
        Ok(out.trim().to_string())
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let combined = combined_output(&output);
            warn!(command = %args.join(" "), exit_code = ?output.status.code(), "git failed");
            return Err(RunError::Vcs {
                command: args.join(" "),
                output: combined,
            }
            .into());
        }
        Ok(output)
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut command = Command::new("git");
        command.args(args).current_dir(&self.workdir);
        // Out of the terminal's foreground group: Ctrl-C must not cut a
        // squash in half.
        #[cfg(unix)]
        command.process_group(0);
        command
            .output()
            .await
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Vcs for Git {
    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    async fn current_branch(&self) -> Result<String> {
        let out = self
            .run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (check out a branch first)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    #[instrument(skip_all, fields(branch = name))]
    async fn create_branch(&self, name: &str) -> Result<()> {
        debug!("creating and checking out new branch at HEAD");
        self.run_checked(&["checkout", "-b", name]).await?;
        self.emitter
            .emit(EventPayload::BranchCreated {
                name: name.to_string(),
                base: String::new(),
            })
            .await;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = name, base))]
    async fn create_branch_from(&self, name: &str, base: &str) -> Result<()> {
        debug!("creating and checking out new branch");
        self.run_checked(&["checkout", "-b", name, base]).await?;
        self.emitter
            .emit(EventPayload::BranchCreated {
                name: name.to_string(),
                base: base.to_string(),
            })
            .await;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = name))]
    async fn checkout(&self, name: &str) -> Result<()> {
        debug!("checking out branch");
        self.run_checked(&["checkout", name]).await?;
        self.emitter
            .emit(EventPayload::BranchCheckedOut {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = name))]
    async fn delete_branch(&self, name: &str) -> Result<()> {
        debug!("force-deleting branch");
        self.run_checked(&["branch", "-D", name]).await?;
        self.emitter
            .emit(EventPayload::BranchDeleted {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    #[instrument(skip_all, fields(base))]
    async fn squash_since(&self, base: &str, message: &str) -> Result<()> {
        let merge_base = self.merge_base(base).await?;
        debug!(merge_base = %merge_base, "squashing onto merge-base");
        // Soft reset keeps the working tree; add -A picks up files the
        // assistant created but never staged.
        self.run_checked(&["reset", "--soft", &merge_base]).await?;
        self.run_checked(&["add", "-A"]).await?;
        self.run_checked(&["commit", "--allow-empty", "-m", message])
            .await?;
        self.emitter
            .emit(EventPayload::CommitsSquashed {
                branch: base.to_string(),
            })
            .await;
        Ok(())
    }
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut combined = String::new();
    combined.push_str(stdout.trim());
    if !combined.is_empty() && !stderr.trim().is_empty() {
        combined.push('\n');
    }
    combined.push_str(stderr.trim());
    combined
}
