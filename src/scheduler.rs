//! Periodic "run now" events at a daily or weekly wall-clock time
//!
//! Runs are serialized through a run guard. A tick that fires while the
//! previous run still holds the guard is skipped, never queued.

use chrono::{Datelike, Duration, Local, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::AutomationConfig;
use crate::error::{CleanupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly,
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily => f.write_str("daily"),
            Schedule::Weekly => f.write_str("weekly"),
        }
    }
}

/// Parse "HH:MM" (24-hour)
pub fn parse_run_at(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
        CleanupError::ConfigError(format!(
            "automation.run_at must be HH:MM (24-hour), got '{}'",
            value
        ))
    })
}

pub fn parse_weekday(value: &str) -> Result<Weekday> {
    value.trim().parse::<Weekday>().map_err(|_| {
        CleanupError::ConfigError(format!(
            "automation.weekday must be a day name like 'monday', got '{}'",
            value
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub schedule: Schedule,
    pub at: NaiveTime,
    pub weekday: Weekday,
}

impl ScheduleSpec {
    pub fn from_config(config: &AutomationConfig) -> Result<Self> {
        Ok(Self {
            schedule: config.schedule,
            at: parse_run_at(&config.run_at)?,
            weekday: parse_weekday(&config.weekday)?,
        })
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schedule {
            Schedule::Daily => write!(f, "daily at {}", self.at.format("%H:%M")),
            Schedule::Weekly => write!(f, "every {} at {}", self.weekday, self.at.format("%H:%M")),
        }
    }
}

/// First scheduled instant strictly after `now` (local wall clock)
pub fn next_run_after(now: NaiveDateTime, spec: &ScheduleSpec) -> NaiveDateTime {
    match spec.schedule {
        Schedule::Daily => {
            let today = now.date().and_time(spec.at);
            if today > now {
                today
            } else {
                today + Duration::days(1)
            }
        }
        Schedule::Weekly => {
            let target = spec.weekday.num_days_from_monday();
            let current = now.weekday().num_days_from_monday();
            let days_ahead = (target + 7 - current) % 7;
            let candidate = (now.date() + Duration::days(i64::from(days_ahead))).and_time(spec.at);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(7)
            }
        }
    }
}

pub struct Scheduler {
    spec: ScheduleSpec,
    guard: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(spec: ScheduleSpec) -> Self {
        Self {
            spec,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn is_running(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Start `job` unless a previous run still holds the guard.
    ///
    /// Returns the handle of the spawned run, or `None` when the tick was skipped.
    pub fn trigger<F, Fut>(&self, job: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match Arc::clone(&self.guard).try_lock_owned() {
            Ok(permit) => {
                let run = job();
                Some(tokio::spawn(async move {
                    run.await;
                    drop(permit);
                }))
            }
            Err(_) => {
                tracing::warn!("Previous cleanup run still in progress, skipping this tick");
                None
            }
        }
    }

    /// Sleep until each scheduled instant and trigger `job`, until Ctrl+C.
    pub async fn run_forever<F, Fut>(&self, job: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Scheduler started ({})", self.spec);

        loop {
            let now = Local::now();
            let next = next_run_after(now.naive_local(), &self.spec);
            // A wall-clock time skipped by a DST jump resolves to the next hour
            let next_local = Local
                .from_local_datetime(&next)
                .earliest()
                .or_else(|| Local.from_local_datetime(&(next + Duration::hours(1))).earliest())
                .ok_or_else(|| {
                    CleanupError::ConfigError(format!("Cannot resolve local time {}", next))
                })?;

            let wait = (next_local - now).to_std().unwrap_or_default();
            tracing::info!("Next cleanup run at {}", next_local.format("%Y-%m-%d %H:%M %Z"));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Scheduler stopping");
                    return Ok(());
                }
            }

            self.trigger(&job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn spec(schedule: Schedule) -> ScheduleSpec {
        ScheduleSpec {
            schedule,
            at: parse_run_at("09:00").unwrap(),
            weekday: Weekday::Mon,
        }
    }

    #[test]
    fn test_daily_next_run() {
        let s = spec(Schedule::Daily);
        assert_eq!(next_run_after(at(2025, 6, 4, 8, 0), &s), at(2025, 6, 4, 9, 0));
        assert_eq!(next_run_after(at(2025, 6, 4, 9, 0), &s), at(2025, 6, 5, 9, 0));
        assert_eq!(next_run_after(at(2025, 12, 31, 23, 0), &s), at(2026, 1, 1, 9, 0));
    }

    #[test]
    fn test_weekly_next_run() {
        let s = spec(Schedule::Weekly);
        // 2025-06-04 is a Wednesday
        assert_eq!(next_run_after(at(2025, 6, 4, 8, 0), &s), at(2025, 6, 9, 9, 0));
        // Monday before and after the run time
        assert_eq!(next_run_after(at(2025, 6, 9, 8, 59), &s), at(2025, 6, 9, 9, 0));
        assert_eq!(next_run_after(at(2025, 6, 9, 9, 30), &s), at(2025, 6, 16, 9, 0));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_run_at("07:30").unwrap(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(parse_run_at("7").is_err());
        assert_eq!(parse_weekday("Friday").unwrap(), Weekday::Fri);
        assert_eq!(parse_weekday("sun").unwrap(), Weekday::Sun);
        assert!(parse_weekday("funday").is_err());
    }

    #[test]
    fn test_spec_display() {
        assert_eq!(spec(Schedule::Daily).to_string(), "daily at 09:00");
        assert_eq!(spec(Schedule::Weekly).to_string(), "every Mon at 09:00");
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = Scheduler::new(spec(Schedule::Daily));
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let first = {
            let release = Arc::clone(&release);
            let runs = Arc::clone(&runs);
            scheduler.trigger(move || async move {
                release.notified().await;
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(first.is_some());
        assert!(scheduler.is_running());

        let runs2 = Arc::clone(&runs);
        let second = scheduler.trigger(move || async move {
            runs2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(second.is_none());

        release.notify_one();
        first.unwrap().await.unwrap();
        assert!(!scheduler.is_running());

        let runs3 = Arc::clone(&runs);
        let third = scheduler.trigger(move || async move {
            runs3.fetch_add(1, Ordering::SeqCst);
        });
        third.unwrap().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
