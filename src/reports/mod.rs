//! Report repository sync
//! Commits and pushes generated reports; failures never stop the daily flow

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ReportsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    NothingToPublish,
}

#[async_trait]
pub trait ReportPublisher: Send + Sync {
    async fn publish(&self) -> Result<PublishOutcome>;
}

/// Snapshot the reports directory with git and push it
pub struct GitReportPublisher {
    repo_dir: PathBuf,
    remote: String,
    branch: Option<String>,
    git_bin: String,
}

impl GitReportPublisher {
    pub fn new(repo_dir: PathBuf, remote: String, branch: Option<String>, git_bin: String) -> Self {
        Self {
            repo_dir,
            remote,
            branch,
            git_bin,
        }
    }

    /// Publisher for the configured reports directory, if any
    pub fn from_config(config: &ReportsConfig) -> Option<Self> {
        config.dir.clone().map(|dir| {
            Self::new(
                dir,
                config.remote.clone(),
                config.branch.clone(),
                config.git_bin.clone(),
            )
        })
    }

    async fn git(&self, args: &[&str]) -> Result<(bool, String)> {
        debug!(?args, dir = %self.repo_dir.display(), "Running git");

        let output = Command::new(&self.git_bin)
            .arg("-C")
            .arg(&self.repo_dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Cannot run '{}'", self.git_bin))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }
}

#[async_trait]
impl ReportPublisher for GitReportPublisher {
    async fn publish(&self) -> Result<PublishOutcome> {
        let (ok, out) = self.git(&["add", "-A"]).await?;
        if !ok {
            bail!("git add failed: {}", out.trim());
        }

        let message = format!("reports {}", Local::now().format("%Y-%m-%d"));
        let (ok, out) = self.git(&["commit", "-m", &message]).await?;
        if !ok {
            if is_nothing_to_commit(&out) {
                info!("No report changes to publish");
                return Ok(PublishOutcome::NothingToPublish);
            }
            bail!("git commit failed: {}", out.trim());
        }

        let mut push = vec!["push", self.remote.as_str()];
        if let Some(branch) = &self.branch {
            push.push(branch.as_str());
        }
        let (ok, out) = self.git(&push).await?;
        if !ok {
            bail!("git push failed: {}", out.trim());
        }

        info!(remote = %self.remote, "Reports published");
        Ok(PublishOutcome::Published)
    }
}

fn is_nothing_to_commit(output: &str) -> bool {
    output.contains("nothing to commit") || output.contains("nothing added to commit")
}
