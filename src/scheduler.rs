use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, TimeDelta};

use crate::schedule::{Cadence, format_duration};

/// Default wall-clock poll interval of the schedule loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// `last_ran_at` is seeded this far in the past before any run has happened,
/// so an hourly cadence is due on the very first check and a daily or weekly
/// one targets its next scheduled instant instead of tomorrow's.
const SENTINEL_WEEKS: i64 = 52 * 20;

/// Source of "now" for scheduling decisions, swappable in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

/// The real local clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// The unit of work the scheduler drives. One call is one full backup run.
pub trait BackupJob {
    async fn execute(&mut self) -> Result<()>;
}

/// Polling loop around a [`Cadence`].
///
/// The loop wakes every `poll_interval`, asks the cadence whether a run is
/// overdue, and drives the job when it is. `last_ran_at` advances only on a
/// successful run, so a failure is retried on the next poll instead of being
/// deferred to the following scheduled slot.
pub struct Scheduler<C = SystemClock> {
    cadence: Cadence,
    poll_interval: Duration,
    clock: C,
    last_ran_at: DateTime<Local>,
}

impl Scheduler {
    pub fn new(cadence: Cadence, poll_interval: Duration) -> Self {
        Scheduler::with_clock(cadence, poll_interval, SystemClock)
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(cadence: Cadence, poll_interval: Duration, clock: C) -> Self {
        let last_ran_at = clock.now() - TimeDelta::weeks(SENTINEL_WEEKS);
        Scheduler {
            cadence,
            poll_interval,
            clock,
            last_ran_at,
        }
    }

    /// One scheduling decision. Returns the signed time until the next run
    /// as of the end of the tick.
    pub async fn tick(&mut self, job: &mut impl BackupJob) -> TimeDelta {
        let due_in = self.cadence.next_run_in(self.last_ran_at, self.clock.now());
        if due_in >= TimeDelta::zero() {
            return due_in;
        }
        match job.execute().await {
            Ok(()) => {
                self.last_ran_at = self.clock.now();
                let due_in = self.cadence.next_run_in(self.last_ran_at, self.clock.now());
                tracing::info!("Next run in {}. Going to sleep...", format_duration(due_in));
                due_in
            }
            Err(e) => {
                tracing::error!("Backup failed, will retry on the next poll: {:#}", e);
                self.cadence.next_run_in(self.last_ran_at, self.clock.now())
            }
        }
    }

    /// Drive the loop until `shutdown` resolves. A run already in flight
    /// finishes before the shutdown is observed.
    pub async fn run(&mut self, job: &mut impl BackupJob, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            self.tick(job).await;
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping the schedule loop");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FakeClock(Arc<Mutex<DateTime<Local>>>);

    impl FakeClock {
        fn at(start: DateTime<Local>) -> Self {
            FakeClock(Arc::new(Mutex::new(start)))
        }

        fn advance(&self, delta: TimeDelta) {
            *self.0.lock().unwrap() += delta;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Local> {
            *self.0.lock().unwrap()
        }
    }

    struct CountingJob {
        runs: u32,
        failures_left: u32,
    }

    impl CountingJob {
        fn new() -> Self {
            CountingJob {
                runs: 0,
                failures_left: 0,
            }
        }
    }

    impl BackupJob for CountingJob {
        async fn execute(&mut self) -> Result<()> {
            self.runs += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                bail!("simulated failure");
            }
            Ok(())
        }
    }

    fn start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    fn hourly_scheduler(clock: FakeClock) -> Scheduler<FakeClock> {
        Scheduler::with_clock(Cadence::Hourly { every: 1 }, Duration::from_millis(1), clock)
    }

    #[tokio::test]
    async fn first_check_runs_immediately() {
        let clock = FakeClock::at(start());
        let mut scheduler = hourly_scheduler(clock.clone());
        let mut job = CountingJob::new();
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 1);
        let wait = scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 1);
        assert_eq!(wait, TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn runs_once_per_due_period() {
        let clock = FakeClock::at(start());
        let mut scheduler = hourly_scheduler(clock.clone());
        let mut job = CountingJob::new();
        scheduler.tick(&mut job).await;
        clock.advance(TimeDelta::minutes(30));
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 1);
        clock.advance(TimeDelta::minutes(31));
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 2);
    }

    #[tokio::test]
    async fn failure_retries_on_next_poll() {
        let clock = FakeClock::at(start());
        let mut scheduler = hourly_scheduler(clock.clone());
        let mut job = CountingJob::new();
        job.failures_left = 2;
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 1);
        // last_ran_at did not advance, so the very next tick tries again.
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 2);
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 3);
        // The third attempt succeeded, so the schedule now holds for an hour.
        scheduler.tick(&mut job).await;
        assert_eq!(job.runs, 3);
    }

    #[tokio::test]
    async fn run_loop_exits_on_shutdown() {
        let clock = FakeClock::at(start());
        let mut scheduler = hourly_scheduler(clock.clone());
        let mut job = CountingJob::new();
        scheduler.run(&mut job, std::future::ready(())).await;
        assert_eq!(job.runs, 1);
    }
}
