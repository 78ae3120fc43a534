use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Weekday};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::db::Database;
use crate::format::{FileFormat, PatternError};
use crate::retention::PruningPolicy;
use crate::schedule::Cadence;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path:?} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(
        "one or more variables in the string '{value}' are missing from the environment but required by the config"
    )]
    MissingEnvVar { value: String },
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),
}

/// Fully validated runtime configuration.
///
/// Every string that came out of the YAML file has had its `${VAR}`
/// references expanded, the naming scheme has been round-trip checked and
/// the schedule reduced to a typed [`Cadence`], so nothing downstream ever
/// re-validates config data.
#[derive(Debug, Clone)]
pub struct Config {
    pub remote: String,
    pub format: FileFormat,
    pub dirs: Vec<PathBuf>,
    pub pruning: PruningPolicy,
    pub databases: Vec<Database>,
    pub log_dir: PathBuf,
    pub service: ServiceMode,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceMode {
    pub enabled: bool,
    pub cadence: Cadence,
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.enabled {
            write!(f, "Service mode enabled. Backing up {}.", self.cadence)
        } else {
            write!(
                f,
                "Service mode disabled. Running one time only before shutting down."
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    backup: RawConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    rclone: RawRclone,
    format: RawFormat,
    dirs: Vec<String>,
    pruning: PruningPolicy,
    databases: RawDatabases,
    logs: RawLogs,
    service_mode: RawServiceMode,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRclone {
    remote: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFormat {
    prefix: String,
    datetime: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDatabases {
    postgres: Option<Vec<RawPostgres>>,
    sqlite: Option<Vec<RawSqlite>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPostgres {
    name: String,
    host: String,
    port: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSqlite {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogs {
    dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServiceMode {
    enabled: bool,
    frequency: String,
    num_hours: u32,
    time_of_day: String,
    day_of_week: String,
}

impl Config {
    /// Read, env-expand and validate the YAML config at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Config, ConfigError> {
        let raw: RawFile = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_raw(raw.backup)
    }

    fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
        let vars = Regex::new(r"\$\{([^}]+)\}").unwrap();

        let format = FileFormat::new(
            &expand_env(&raw.format.prefix, &vars)?,
            &expand_env(&raw.format.datetime, &vars)?,
        )?;

        let mut dirs = Vec::new();
        for dir in &raw.dirs {
            dirs.push(PathBuf::from(expand_env(dir, &vars)?));
        }

        let mut databases = Vec::new();
        if let Some(entries) = &raw.databases.postgres {
            for db in entries {
                databases.push(Database::Postgres {
                    name: expand_env(&db.name, &vars)?,
                    host: expand_env(&db.host, &vars)?,
                    port: expand_env(&db.port, &vars)?,
                    username: expand_env(&db.username, &vars)?,
                    password: expand_env(&db.password, &vars)?,
                });
            }
        }
        if let Some(entries) = &raw.databases.sqlite {
            for db in entries {
                databases.push(Database::Sqlite {
                    path: PathBuf::from(expand_env(&db.path, &vars)?),
                });
            }
        }

        let service = ServiceMode {
            enabled: raw.service_mode.enabled,
            cadence: build_cadence(&raw.service_mode, &vars)?,
        };

        Ok(Config {
            remote: expand_env(&raw.rclone.remote, &vars)?,
            format,
            dirs,
            pruning: raw.pruning,
            databases,
            log_dir: PathBuf::from(expand_env(&raw.logs.dir, &vars)?),
            service,
        })
    }
}

/// The schedule is reduced to a typed [`Cadence`] here, once, so an invalid
/// combination aborts startup instead of surfacing mid-run. Fields the
/// chosen frequency does not use are ignored entirely.
fn build_cadence(raw: &RawServiceMode, vars: &Regex) -> Result<Cadence, ConfigError> {
    let frequency = expand_env(&raw.frequency, vars)?;
    match frequency.to_lowercase().as_str() {
        "hourly" => {
            if raw.num_hours == 0 {
                return Err(ConfigError::InvalidSchedule(
                    "num_hours must be at least 1 for an hourly schedule".to_string(),
                ));
            }
            Ok(Cadence::Hourly {
                every: raw.num_hours,
            })
        }
        "daily" => Ok(Cadence::Daily {
            at: parse_time_of_day(&expand_env(&raw.time_of_day, vars)?)?,
        }),
        "weekly" => Ok(Cadence::Weekly {
            on: parse_day_of_week(&expand_env(&raw.day_of_week, vars)?)?,
            at: parse_time_of_day(&expand_env(&raw.time_of_day, vars)?)?,
        }),
        other => Err(ConfigError::InvalidSchedule(format!(
            "unsupported frequency '{}' (expected hourly, daily or weekly)",
            other
        ))),
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| {
        ConfigError::InvalidSchedule(format!("time_of_day '{}' does not match HH:MM", value))
    })
}

fn parse_day_of_week(value: &str) -> Result<Weekday, ConfigError> {
    value
        .parse::<Weekday>()
        .map_err(|_| ConfigError::InvalidSchedule(format!("unknown day_of_week '{}'", value)))
}

/// Substitute every `${VAR}` with its environment value. A single missing
/// variable fails the whole string, naming the configured value so the
/// operator can tell which setting was at fault.
fn expand_env(value: &str, vars: &Regex) -> Result<String, ConfigError> {
    for caps in vars.captures_iter(value) {
        if std::env::var(&caps[1]).is_err() {
            return Err(ConfigError::MissingEnvVar {
                value: value.to_string(),
            });
        }
    }
    let expanded = vars.replace_all(value, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    });
    Ok(expanded.into_owned())
}
