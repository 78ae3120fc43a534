use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{Datelike, NaiveDateTime};
use serde::Deserialize;

use crate::format::FileFormat;

/// How many backups to retain per generation bucket.
///
/// Buckets are counted in calendar slots, not elapsed time: the calendar day,
/// the ISO week, the calendar month and the calendar year of each backup's
/// timestamp. The newest backup inside each of the N most recent non-empty
/// slots survives, and a backup survives if any bucket wants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PruningPolicy {
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
}

/// Outcome of applying a [`PruningPolicy`] to a remote listing.
///
/// `keep` and `prune` partition the filenames that parse under the naming
/// scheme; foreign files appear in neither. Both lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<String>,
    pub prune: Vec<String>,
}

impl PruningPolicy {
    /// Decide which of the given files to keep and which to prune.
    ///
    /// Purely a planning step: nothing is deleted here.
    pub fn plan(&self, filenames: &[String], format: &FileFormat) -> RetentionPlan {
        let mut backups: Vec<(NaiveDateTime, &str)> = Vec::new();
        for name in filenames {
            match format.parse(name) {
                Some(instant) => backups.push((instant, name.as_str())),
                None => tracing::debug!(filename = %name, "Not a managed backup, leaving it alone"),
            }
        }

        let mut keep: HashSet<&str> = HashSet::new();
        keep_newest_per_slot(&backups, self.keep_daily, |t| t.date(), &mut keep);
        keep_newest_per_slot(
            &backups,
            self.keep_weekly,
            |t| (t.iso_week().year(), t.iso_week().week()),
            &mut keep,
        );
        keep_newest_per_slot(
            &backups,
            self.keep_monthly,
            |t| (t.year(), t.month()),
            &mut keep,
        );
        keep_newest_per_slot(&backups, self.keep_yearly, |t| t.year(), &mut keep);

        let mut kept: Vec<String> = keep.iter().map(|name| name.to_string()).collect();
        let mut prune: Vec<String> = backups
            .iter()
            .filter(|(_, name)| !keep.contains(name))
            .map(|(_, name)| name.to_string())
            .collect();
        kept.sort();
        kept.dedup();
        prune.sort();
        prune.dedup();

        RetentionPlan { keep: kept, prune }
    }
}

impl fmt::Display for PruningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keep {} daily, {} weekly, {} monthly and {} yearly backups",
            self.keep_daily, self.keep_weekly, self.keep_monthly, self.keep_yearly
        )
    }
}

/// Mark the newest backup of each of the `slots_to_keep` most recent slots.
///
/// Within a slot the newest timestamp wins; identical timestamps fall back to
/// the lexically greater filename so the choice is stable across runs.
fn keep_newest_per_slot<'a, K: Ord>(
    backups: &[(NaiveDateTime, &'a str)],
    slots_to_keep: u32,
    slot: impl Fn(NaiveDateTime) -> K,
    keep: &mut HashSet<&'a str>,
) {
    let mut newest: BTreeMap<K, (NaiveDateTime, &'a str)> = BTreeMap::new();
    for &(instant, name) in backups {
        let candidate = (instant, name);
        let entry = newest.entry(slot(instant)).or_insert(candidate);
        if candidate > *entry {
            *entry = candidate;
        }
    }
    for &(_, name) in newest.values().rev().take(slots_to_keep as usize) {
        keep.insert(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn scheme() -> FileFormat {
        FileFormat::new("backup", "%Y-%m-%d").unwrap()
    }

    fn policy(d: u32, w: u32, m: u32, y: u32) -> PruningPolicy {
        PruningPolicy {
            keep_daily: d,
            keep_weekly: w,
            keep_monthly: m,
            keep_yearly: y,
        }
    }

    fn names(days: &[&str]) -> Vec<String> {
        days.iter().map(|d| format!("backup_{}.zip", d)).collect()
    }

    fn midnight(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn daily_keeps_most_recent_days() {
        let files = names(&[
            "2024-01-01",
            "2024-01-02",
            "2024-01-03",
            "2024-01-04",
            "2024-01-05",
            "2024-01-06",
            "2024-01-07",
            "2024-01-08",
            "2024-01-09",
            "2024-01-10",
        ]);
        let plan = policy(3, 0, 0, 0).plan(&files, &scheme());
        assert_eq!(plan.keep, names(&["2024-01-08", "2024-01-09", "2024-01-10"]));
        assert_eq!(plan.prune.len(), 7);
        assert!(plan.prune.contains(&"backup_2024-01-01.zip".to_string()));
    }

    #[test]
    fn newest_file_in_slot_represents_it() {
        let scheme = FileFormat::new("backup", "%Y-%m-%d_%H-%M").unwrap();
        let files = vec![
            "backup_2024-01-05_09-00.zip".to_string(),
            "backup_2024-01-05_21-00.zip".to_string(),
        ];
        let plan = policy(1, 0, 0, 0).plan(&files, &scheme);
        assert_eq!(plan.keep, vec!["backup_2024-01-05_21-00.zip"]);
        assert_eq!(plan.prune, vec!["backup_2024-01-05_09-00.zip"]);
    }

    #[test]
    fn weekly_keeps_newest_of_each_iso_week() {
        let files = names(&[
            "2024-01-03",
            "2024-01-05",
            "2024-01-10",
            "2024-01-12",
            "2024-01-17",
        ]);
        let plan = policy(0, 2, 0, 0).plan(&files, &scheme());
        assert_eq!(plan.keep, names(&["2024-01-12", "2024-01-17"]));
        assert_eq!(plan.prune, names(&["2024-01-03", "2024-01-05", "2024-01-10"]));
    }

    #[test]
    fn iso_week_boundary_splits_slots() {
        // Sun 2023-12-31 is ISO week 52 of 2023, Mon 2024-01-01 opens week 1
        // of 2024, so both survive a two-week policy.
        let files = names(&["2023-12-31", "2024-01-01"]);
        let plan = policy(0, 2, 0, 0).plan(&files, &scheme());
        assert_eq!(plan.keep.len(), 2);
        assert!(plan.prune.is_empty());
    }

    #[test]
    fn monthly_and_yearly_buckets() {
        let files = names(&[
            "2022-06-15",
            "2023-03-10",
            "2023-11-20",
            "2024-01-05",
            "2024-02-11",
        ]);
        let plan = policy(0, 0, 2, 2).plan(&files, &scheme());
        assert_eq!(plan.keep, names(&["2023-11-20", "2024-01-05", "2024-02-11"]));
        assert_eq!(plan.prune, names(&["2022-06-15", "2023-03-10"]));
    }

    #[test]
    fn single_backup_satisfies_every_bucket() {
        let files = names(&["2024-04-01"]);
        let plan = policy(7, 4, 12, 3).plan(&files, &scheme());
        assert_eq!(plan.keep, files);
        assert!(plan.prune.is_empty());
    }

    #[test]
    fn zero_policy_prunes_everything_parsable() {
        let mut files = names(&["2024-01-01", "2024-01-02"]);
        files.push("random_notes.txt".to_string());
        let plan = policy(0, 0, 0, 0).plan(&files, &scheme());
        assert!(plan.keep.is_empty());
        assert_eq!(plan.prune, names(&["2024-01-01", "2024-01-02"]));
    }

    #[test]
    fn foreign_files_are_left_alone() {
        let files = vec![
            "backup_2024-01-01.zip".to_string(),
            "random_notes.txt".to_string(),
            "backup_latest.zip".to_string(),
        ];
        let plan = policy(1, 1, 1, 1).plan(&files, &scheme());
        assert_eq!(plan.keep, vec!["backup_2024-01-01.zip"]);
        assert!(plan.prune.is_empty());
    }

    #[test]
    fn pruning_twice_is_idempotent() {
        let files = names(&[
            "2024-01-01",
            "2024-01-02",
            "2024-01-03",
            "2024-01-04",
            "2024-01-05",
            "2024-01-06",
        ]);
        let strategy = policy(3, 1, 1, 1);
        let first = strategy.plan(&files, &scheme());
        let second = strategy.plan(&first.keep, &scheme());
        assert_eq!(second.keep, first.keep);
        assert!(second.prune.is_empty());
    }

    #[test]
    fn partition_is_disjoint_and_total() {
        let files = names(&[
            "2023-11-28",
            "2023-12-14",
            "2024-01-02",
            "2024-01-19",
            "2024-02-03",
            "2024-02-04",
            "2024-02-05",
        ]);
        let plan = policy(2, 1, 1, 0).plan(&files, &scheme());
        for name in &files {
            assert!(plan.keep.contains(name) ^ plan.prune.contains(name));
        }
        assert_eq!(plan.keep.len() + plan.prune.len(), files.len());
    }

    #[test]
    fn ties_on_timestamp_break_lexically() {
        let backups = [
            (midnight(2024, 1, 1), "backup_a.zip"),
            (midnight(2024, 1, 1), "backup_b.zip"),
        ];
        let mut keep = HashSet::new();
        keep_newest_per_slot(&backups, 1, |t| t.date(), &mut keep);
        assert_eq!(keep.len(), 1);
        assert!(keep.contains("backup_b.zip"));
    }
}
