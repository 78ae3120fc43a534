use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::remote::RcloneRemote;
use crate::scheduler::BackupJob;

/// External programs every run needs on PATH.
const BASE_TOOLS: &[&str] = &["rclone", "zip"];
/// Additionally required when at least one Postgres database is configured.
const POSTGRES_TOOLS: &[&str] = &["pg_dump", "psql"];

/// Command-line switches that shape a single run.
///
/// Without `live` a run is a rehearsal: the archive is produced locally but
/// nothing is uploaded and nothing is pruned.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub live: bool,
    pub disable_pruning: bool,
    pub ignore_missing: bool,
}

/// Executes one backup run end to end: dump databases, stage directories,
/// compress the lot into a timestamped archive, upload it, prune the remote.
pub struct BackupRunner {
    config: Config,
    opts: RunOptions,
    remote: RcloneRemote,
}

impl BackupRunner {
    pub fn new(config: Config, opts: RunOptions) -> Self {
        let remote = RcloneRemote::new(config.remote.clone());
        BackupRunner {
            config,
            opts,
            remote,
        }
    }

    /// Verify external tools and database connectivity before doing any work.
    pub async fn preflight(&self) -> Result<()> {
        let mut tools: Vec<&str> = BASE_TOOLS.to_vec();
        if self.config.databases.iter().any(Database::is_postgres) {
            tools.extend_from_slice(POSTGRES_TOOLS);
        }
        for tool in tools {
            let output = Command::new("which")
                .arg(tool)
                .output()
                .await
                .context("failed to invoke which")?;
            if !output.status.success() {
                bail!("required tool '{}' is not installed or not on PATH", tool);
            }
        }
        for db in &self.config.databases {
            tracing::debug!(database = %db, "Testing database connection");
            db.test_connection().await?;
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting backup...");
        tracing::debug!(
            remote = %self.config.remote,
            dirs = ?self.config.dirs,
            databases = ?self.config.databases,
            pruning = %self.config.pruning,
            "Loaded configuration"
        );

        let dirs = self.resolve_dirs()?;
        self.preflight().await?;

        let now = Local::now().naive_local();
        let stamp = self.config.format.timestamp(now);
        let archive_name = self.config.format.render(now);

        let workspace = std::env::temp_dir().join(format!("backhaul_{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&workspace)
            .await
            .context(format!("could not create workspace {}", workspace.display()))?;
        tracing::info!(workspace = %workspace.display(), "Created temporary workspace");

        let result = self
            .produce_and_ship(&workspace, &dirs, &stamp, &archive_name)
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            tracing::warn!(workspace = %workspace.display(), "Could not remove workspace: {}", e);
        }
        result
    }

    async fn produce_and_ship(
        &self,
        workspace: &Path,
        dirs: &[PathBuf],
        stamp: &str,
        archive_name: &str,
    ) -> Result<()> {
        let mut databases: Vec<&Database> = self.config.databases.iter().collect();
        databases.sort_by(|a, b| a.name().cmp(b.name()));
        for (index, db) in databases.iter().enumerate() {
            tracing::info!(database = %db, "Dumping database...");
            db.dump(workspace, stamp, index).await?;
        }

        for dir in dirs {
            tracing::info!(dir = %dir.display(), "Copying backup directory...");
            stage_directory(dir, workspace).await?;
        }

        let archive_path = std::env::temp_dir().join(archive_name);
        tracing::info!(archive = %archive_path.display(), "Compressing files...");
        compress(workspace, &archive_path).await?;

        let shipped = self.ship(&archive_path).await;
        let _ = tokio::fs::remove_file(&archive_path).await;
        shipped?;

        if self.opts.disable_pruning {
            tracing::info!("Skipping pruning because '--disable-pruning' was passed");
        } else if self.opts.live {
            self.prune().await?;
        } else {
            tracing::info!("Skipping pruning because the '--live' flag is false");
        }

        tracing::info!("Done!");
        Ok(())
    }

    async fn ship(&self, archive_path: &Path) -> Result<()> {
        if self.opts.live {
            tracing::info!(remote = %self.remote.name(), "Uploading backup...");
            self.remote.upload(archive_path).await
        } else {
            tracing::info!("Skipping upload to rclone because the '--live' flag is false");
            Ok(())
        }
    }

    /// Apply the pruning policy to the remote listing and delete whatever
    /// fell out of retention.
    async fn prune(&self) -> Result<()> {
        tracing::info!("Pruning old backup files...");
        let listing = self.remote.list().await?;
        let plan = self.config.pruning.plan(&listing, &self.config.format);
        tracing::debug!(
            keeping = plan.keep.len(),
            pruning = plan.prune.len(),
            "Computed retention plan"
        );
        for filename in &plan.prune {
            tracing::info!(filename = %filename, "Pruning...");
            self.remote.delete(filename).await?;
        }
        Ok(())
    }

    /// In service mode a missing directory is skipped with a warning so one
    /// bad entry cannot wedge the whole schedule; in a one-shot run it is an
    /// error unless `--ignore-missing` was passed.
    fn resolve_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for dir in &self.config.dirs {
            if dir.exists() {
                found.push(dir.clone());
            } else if self.opts.ignore_missing || self.config.service.enabled {
                tracing::warn!(dir = %dir.display(), "Skipping directory because it was not found");
            } else {
                bail!(
                    "the directory '{}' was not found; pass --ignore-missing to skip it",
                    dir.display()
                );
            }
        }
        Ok(found)
    }
}

impl BackupJob for BackupRunner {
    async fn execute(&mut self) -> Result<()> {
        self.run().await
    }
}

/// Where `dir` lands inside the workspace: its path with root and parent
/// markers stripped, so `/srv/app/data` stages at `<ws>/srv/app/data` and
/// two directories sharing a basename cannot collide.
fn stage_target(workspace: &Path, dir: &Path) -> PathBuf {
    let tail: PathBuf = dir
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect();
    workspace.join(tail)
}

async fn stage_directory(dir: &Path, workspace: &Path) -> Result<()> {
    let source = dir
        .canonicalize()
        .context(format!("could not resolve {}", dir.display()))?;
    let target = stage_target(workspace, &source);
    let parent = target.parent().unwrap_or(workspace).to_path_buf();
    tokio::fs::create_dir_all(&parent)
        .await
        .context(format!("could not create {}", parent.display()))?;

    let output = Command::new("cp")
        .arg("-r")
        .arg(&source)
        .arg(&parent)
        .output()
        .await
        .context("failed to invoke cp")?;
    if !output.status.success() {
        bail!(
            "cp -r of {} failed: {}",
            source.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Zip the workspace contents into `archive_path`. Runs from inside the
/// workspace so archive members carry relative paths.
async fn compress(workspace: &Path, archive_path: &Path) -> Result<()> {
    let output = Command::new("zip")
        .arg("-rq")
        .arg(archive_path)
        .arg(".")
        .current_dir(workspace)
        .output()
        .await
        .context("failed to invoke zip")?;
    if !output.status.success() {
        bail!(
            "zip failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
