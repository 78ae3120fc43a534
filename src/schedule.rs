use std::fmt;

use chrono::{
    DateTime, Datelike, Local, LocalResult, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Weekday,
};

/// How often the service runs a backup.
///
/// Hourly counts elapsed time since the last run. Daily and weekly target a
/// wall-clock time of day, so a freshly started service waits for the next
/// scheduled instant instead of firing immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Hourly { every: u32 },
    Daily { at: NaiveTime },
    Weekly { on: Weekday, at: NaiveTime },
}

impl Cadence {
    /// Signed time until the next run is due. Zero or positive means wait,
    /// negative means the run is overdue.
    pub fn next_run_in(&self, last_ran_at: DateTime<Local>, now: DateTime<Local>) -> TimeDelta {
        match *self {
            Cadence::Hourly { every } => last_ran_at + TimeDelta::hours(i64::from(every)) - now,
            Cadence::Daily { at } => {
                let target_date = if last_ran_at.date_naive() < now.date_naive() {
                    now.date_naive()
                } else {
                    now.date_naive() + TimeDelta::days(1)
                };
                resolve_local(target_date.and_time(at)) - now
            }
            Cadence::Weekly { on, at } => {
                if now - last_ran_at >= TimeDelta::days(7) && now.weekday() == on {
                    resolve_local(now.date_naive().and_time(at)) - now
                } else {
                    let ahead = days_until(last_ran_at.weekday(), on);
                    let target_date = last_ran_at.date_naive() + TimeDelta::days(ahead);
                    resolve_local(target_date.and_time(at)) - now
                }
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Hourly { every } => write!(f, "every {} hour(s)", every),
            Cadence::Daily { at } => write!(f, "every day at {}", at.format("%H:%M")),
            Cadence::Weekly { on, at } => {
                write!(f, "every week on {} at {}", on, at.format("%H:%M"))
            }
        }
    }
}

/// Days from `from` strictly forward to the next `to`, always in 1..=7.
fn days_until(from: Weekday, to: Weekday) -> i64 {
    let diff = (to.num_days_from_monday() + 7 - from.num_days_from_monday()) % 7;
    if diff == 0 { 7 } else { i64::from(diff) }
}

/// Pin a wall-clock date and time to the local timezone. Around a DST
/// transition an ambiguous time resolves to the earlier instant and a
/// skipped time rolls forward to the next wall-clock time that exists.
fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    let mut candidate = naive;
    loop {
        match Local.from_local_datetime(&candidate) {
            LocalResult::Single(resolved) => return resolved,
            LocalResult::Ambiguous(earlier, _) => return earlier,
            LocalResult::None => candidate += TimeDelta::minutes(30),
        }
    }
}

/// Render a duration the way an operator reads it: "1d 2h 3m", "2h 3m"
/// or "5m". Sub-minute remainders are dropped.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    if days != 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours != 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
