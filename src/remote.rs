use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

/// Client for the configured rclone remote, e.g. `gdrive:backups`.
///
/// Every operation shells out to the `rclone` binary; nothing here talks to
/// the storage provider directly, so any remote rclone supports works.
pub struct RcloneRemote {
    remote: String,
}

impl RcloneRemote {
    pub fn new(remote: impl Into<String>) -> Self {
        RcloneRemote {
            remote: remote.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.remote
    }

    /// Filenames currently present at the top level of the remote.
    pub async fn list(&self) -> Result<Vec<String>> {
        let output = Command::new("rclone")
            .arg("lsf")
            .arg(&self.remote)
            .output()
            .await
            .context("failed to invoke rclone")?;
        if !output.status.success() {
            bail!(
                "rclone lsf {} failed: {}",
                self.remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn upload(&self, file: &Path) -> Result<()> {
        let output = Command::new("rclone")
            .arg("copy")
            .arg(file)
            .arg(&self.remote)
            .output()
            .await
            .context("failed to invoke rclone")?;
        if !output.status.success() {
            bail!(
                "rclone copy of {} to {} failed: {}",
                file.display(),
                self.remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        let target = format!("{}/{}", self.remote, filename);
        let output = Command::new("rclone")
            .arg("delete")
            .arg(&target)
            .output()
            .await
            .context("failed to invoke rclone")?;
        if !output.status.success() {
            bail!(
                "rclone delete of {} failed: {}",
                target,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
