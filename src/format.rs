use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// Every archive this tool produces or manages ends in this suffix.
pub const ARCHIVE_EXTENSION: &str = ".zip";

#[derive(Debug, Error)]
#[error("datetime pattern '{pattern}' cannot round-trip a timestamp through a filename")]
pub struct PatternError {
    pattern: String,
}

/// Naming scheme for backup archives: `<prefix>_<timestamp>.zip`.
///
/// The same scheme is used in both directions. New archives are named by
/// rendering the current time, and remote listings are read back by parsing
/// the timestamp out of each filename. Files that do not match exactly are
/// treated as foreign and never touched.
#[derive(Debug, Clone)]
pub struct FileFormat {
    prefix: String,
    pattern: String,
}

impl FileFormat {
    /// Build a naming scheme from the configured prefix and strftime pattern.
    ///
    /// A blank prefix is dropped entirely, otherwise an underscore separator
    /// is appended. The pattern is rejected unless a rendered filename parses
    /// back to the same timestamp at the pattern's own precision.
    pub fn new(prefix: &str, pattern: &str) -> Result<Self, PatternError> {
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(PatternError {
                pattern: pattern.to_string(),
            });
        }

        let prefix = if prefix.trim().is_empty() {
            String::new()
        } else {
            format!("{}_", prefix)
        };
        let format = Self {
            prefix,
            pattern: pattern.to_string(),
        };

        let probe = DateTime::<Utc>::UNIX_EPOCH.naive_utc();
        let rendered = format.render(probe);
        match format.parse(&rendered) {
            Some(instant) if format.render(instant) == rendered => Ok(format),
            _ => Err(PatternError {
                pattern: pattern.to_string(),
            }),
        }
    }

    /// Render just the timestamp portion, without prefix or extension.
    pub fn timestamp(&self, instant: NaiveDateTime) -> String {
        instant.format(&self.pattern).to_string()
    }

    /// Full archive filename for the given instant.
    pub fn render(&self, instant: NaiveDateTime) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            self.timestamp(instant),
            ARCHIVE_EXTENSION
        )
    }

    /// Recover the timestamp from a filename produced by [`render`](Self::render).
    ///
    /// Returns `None` for anything that does not match the scheme exactly:
    /// wrong prefix, wrong extension, or a stamp the pattern cannot parse.
    /// Date-only patterns parse to midnight of that day.
    pub fn parse(&self, filename: &str) -> Option<NaiveDateTime> {
        let stamp = filename
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(ARCHIVE_EXTENSION)?;
        NaiveDateTime::parse_from_str(stamp, &self.pattern)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(stamp, &self.pattern)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(prefix: &str, pattern: &str) -> FileFormat {
        FileFormat::new(prefix, pattern).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn renders_prefixed_filename() {
        let format = fmt("backup", "%Y-%m-%d");
        assert_eq!(format.render(at(2024, 1, 1, 0, 0, 0)), "backup_2024-01-01.zip");
    }

    #[test]
    fn blank_prefix_is_dropped() {
        let format = fmt("  ", "%Y-%m-%d");
        assert_eq!(format.render(at(2024, 5, 6, 9, 30, 0)), "2024-05-06.zip");
    }

    #[test]
    fn parses_full_datetime_pattern() {
        let format = fmt("backup", "%Y-%m-%d_%H-%M-%S");
        let instant = at(2024, 3, 15, 23, 59, 58);
        assert_eq!(format.parse(&format.render(instant)), Some(instant));
    }

    #[test]
    fn date_only_pattern_parses_to_midnight() {
        let format = fmt("backup", "%Y-%m-%d");
        assert_eq!(
            format.parse("backup_2024-01-01.zip"),
            Some(at(2024, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn rejects_foreign_filenames() {
        let format = fmt("backup", "%Y-%m-%d");
        assert_eq!(format.parse("random_notes.txt"), None);
        assert_eq!(format.parse("other_2024-01-01.zip"), None);
        assert_eq!(format.parse("backup_2024-13-01.zip"), None);
        assert_eq!(format.parse("backup_2024-01-01.zip.bak"), None);
        assert_eq!(format.parse("backup_2024-01-01extra.zip"), None);
    }

    #[test]
    fn rejects_patterns_that_cannot_round_trip() {
        assert!(FileFormat::new("backup", "%H-%M").is_err());
        assert!(FileFormat::new("backup", "%Q").is_err());
        assert!(FileFormat::new("backup", "no-fields-at-all").is_err());
    }

    #[test]
    fn accepts_usual_patterns() {
        assert!(FileFormat::new("backup", "%Y-%m-%d").is_ok());
        assert!(FileFormat::new("", "%Y-%m-%d_%H-%M").is_ok());
        assert!(FileFormat::new("db", "%d.%m.%Y").is_ok());
    }
}
