//! Compiled schedule triggers.

use chrono::{DateTime, Duration, TimeZone};

use autoflow_core::{AutoflowError, IntervalConfig, Result, ScheduleConfig};

use crate::cron::CronSpec;

/// Fixed period, first fire one period after the schedule is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSpec {
    period: Duration,
}

impl IntervalSpec {
    pub fn compile(config: &IntervalConfig) -> std::result::Result<Self, String> {
        let too_large = || "interval too large".to_string();
        let parts = [
            (config.weeks, 7 * 24 * 60),
            (config.days, 24 * 60),
            (config.hours, 60),
            (config.minutes, 1),
        ];
        let mut minutes: u64 = 0;
        for (amount, scale) in parts {
            let part = amount.unwrap_or(0).checked_mul(scale).ok_or_else(too_large)?;
            minutes = minutes.checked_add(part).ok_or_else(too_large)?;
        }
        if minutes == 0 {
            return Err("interval must be at least one minute".into());
        }
        let minutes = i64::try_from(minutes).map_err(|_| too_large())?;
        let period = Duration::try_minutes(minutes).ok_or_else(too_large)?;
        Ok(Self { period })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval(IntervalSpec),
    Cron(CronSpec),
}

impl Trigger {
    /// Compile a schedule entry; exactly one of `interval` and `schedule` must be set.
    pub fn compile(config: &ScheduleConfig) -> Result<Self> {
        let compiled = match (&config.interval, &config.schedule) {
            (Some(interval), None) => IntervalSpec::compile(interval).map(Trigger::Interval),
            (None, Some(cron)) => CronSpec::compile(cron).map(Trigger::Cron),
            (Some(_), Some(_)) => Err("schedule sets both 'interval' and 'schedule'".to_string()),
            (None, None) => Err("schedule needs 'interval' or 'schedule'".to_string()),
        };
        if config.tasks.names().is_empty() {
            return Err(AutoflowError::config("schedule names no tasks", vec![]));
        }
        compiled.map_err(|e| AutoflowError::config(e, vec![]))
    }

    /// First fire time after loading at `now`.
    pub fn first<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Interval(spec) => now.clone().checked_add_signed(spec.period),
            Trigger::Cron(spec) => spec.next_after(now),
        }
    }

    /// Next fire time after a fire that was due at `due` and handled at `now`.
    /// Missed interval periods are skipped, not replayed.
    pub fn next<Tz: TimeZone>(&self, due: &DateTime<Tz>, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Interval(spec) => {
                let next = due.clone().checked_add_signed(spec.period)?;
                if next > *now {
                    return Some(next);
                }
                let period = spec.period.num_seconds();
                let behind = (now.clone() - next.clone()).num_seconds();
                let skip = (behind / period + 1).checked_mul(period)?;
                next.checked_add_signed(Duration::try_seconds(skip)?)
            }
            Trigger::Cron(spec) => spec.next_after(now),
        }
    }
}
