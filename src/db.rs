use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

/// A database the backup run snapshots with the vendor's own dump tooling.
///
/// Postgres databases are dumped over the network with `pg_dump`; SQLite
/// databases are plain files and are copied as-is.
#[derive(Clone)]
pub enum Database {
    Postgres {
        name: String,
        host: String,
        port: String,
        username: String,
        password: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

impl Database {
    /// Identifier used for sorting and for naming the dump file.
    pub fn name(&self) -> &str {
        match self {
            Database::Postgres { name, .. } => name,
            Database::Sqlite { path } => path.to_str().unwrap_or("sqlite"),
        }
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self, Database::Postgres { .. })
    }

    /// Cheap reachability probe, run before any dump is attempted so a dead
    /// database fails the whole run up front.
    pub async fn test_connection(&self) -> Result<()> {
        match self {
            Database::Postgres {
                name,
                host,
                port,
                username,
                password,
            } => {
                let output = Command::new("psql")
                    .arg("-h")
                    .arg(host)
                    .arg("-p")
                    .arg(port)
                    .arg("-U")
                    .arg(username)
                    .arg("-d")
                    .arg(name)
                    .arg("-c")
                    .arg(r"\q")
                    .env("PGPASSWORD", password)
                    .output()
                    .await
                    .context("failed to invoke psql")?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    bail!("could not connect to {}: {}", self, stderr.trim());
                }
                Ok(())
            }
            Database::Sqlite { path } => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .context(format!("could not read {}", self))?;
                if !metadata.is_file() {
                    bail!("{} is not a regular file", self);
                }
                Ok(())
            }
        }
    }

    /// Dump this database into `dir` and return the path written.
    ///
    /// The file is named `<timestamp>_<sanitized name>_<index>` so dumps from
    /// one run sort together and two databases can never collide.
    pub async fn dump(&self, dir: &Path, timestamp: &str, index: usize) -> Result<PathBuf> {
        let stem = format!("{}_{}_{}", timestamp, sanitize(self.name()), index);
        match self {
            Database::Postgres {
                name,
                host,
                port,
                username,
                password,
            } => {
                let dest = dir.join(format!("{}.sql", stem));
                let dump_file = std::fs::File::create(&dest)
                    .context(format!("could not create {}", dest.display()))?;
                let status = Command::new("pg_dump")
                    .arg("-h")
                    .arg(host)
                    .arg("-p")
                    .arg(port)
                    .arg("-U")
                    .arg(username)
                    .arg("-d")
                    .arg(name)
                    .env("PGPASSWORD", password)
                    .stdout(Stdio::from(dump_file))
                    .status()
                    .await
                    .context("failed to invoke pg_dump")?;
                if !status.success() {
                    bail!("pg_dump exited with {} for {}", status, self);
                }
                Ok(dest)
            }
            Database::Sqlite { path } => {
                let dest = dir.join(format!("{}.db", stem));
                tokio::fs::copy(path, &dest)
                    .await
                    .context(format!("could not copy {}", self))?;
                Ok(dest)
            }
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Database::Postgres {
                name, host, port, ..
            } => write!(f, "<POSTGRES database {}@{}:{}>", name, host, port),
            Database::Sqlite { path } => write!(f, "<SQLITE database {}>", path.display()),
        }
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Database::Postgres {
                name,
                host,
                port,
                username,
                ..
            } => f
                .debug_struct("Postgres")
                .field("name", name)
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("password", &"*****")
                .finish(),
            Database::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
        }
    }
}

/// Database names can contain characters that are awkward in filenames;
/// slashes and dots become underscores.
fn sanitize(name: &str) -> String {
    name.replace(['/', '.'], "_")
}
