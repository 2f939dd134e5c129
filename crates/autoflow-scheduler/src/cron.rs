//! Cron field parsing and next-fire computation.
//!
//! Fields: `minute hour day month day_of_week`, each one of
//! `*`, `*/N`, `N`, `A-B`, `A-B/N` or a comma list of those.
//! `day_of_week` is `0 = mon .. 6 = sun` and accepts `mon`..`sun`;
//! `month` accepts `jan`..`dec`. Unset fields match anything.
//! A time matches when every field matches.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};

use autoflow_core::{CronConfig, CronField};

/// Days scanned before giving up (covers leap-day schedules).
const MAX_SCAN_DAYS: u32 = 366 * 8;

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// A compiled cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    months: Vec<u32>,
    weekdays: Vec<u32>,
}

impl CronSpec {
    pub fn compile(config: &CronConfig) -> Result<Self, String> {
        Ok(Self {
            minutes: field(config.minute.as_ref(), "minute", 0, 59, &[])?,
            hours: field(config.hour.as_ref(), "hour", 0, 23, &[])?,
            days: field(config.day.as_ref(), "day", 1, 31, &[])?,
            months: field(config.month.as_ref(), "month", 1, 12, &MONTHS)?,
            weekdays: field(config.day_of_week.as_ref(), "day_of_week", 0, 6, &WEEKDAYS)?,
        })
    }

    /// First matching minute strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let local = after.naive_local();
        let start = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        let mut day = start.date();
        for _ in 0..MAX_SCAN_DAYS {
            if self.matches_date(day) {
                let floor = if day == start.date() { Some(start) } else { None };
                if let Some(found) = self.first_time_on(day, floor, &tz) {
                    return Some(found);
                }
            }
            day = day.succ_opt()?;
        }
        tracing::warn!("⚠️ Cron schedule {self:?} never fires");
        None
    }

    fn matches_date(&self, day: NaiveDate) -> bool {
        self.days.contains(&day.day())
            && self.months.contains(&day.month())
            && self.weekdays.contains(&day.weekday().num_days_from_monday())
    }

    fn first_time_on<Tz: TimeZone>(
        &self,
        day: NaiveDate,
        floor: Option<NaiveDateTime>,
        tz: &Tz,
    ) -> Option<DateTime<Tz>> {
        for &hour in &self.hours {
            for &minute in &self.minutes {
                let Some(candidate) = day.and_hms_opt(hour, minute, 0) else {
                    continue;
                };
                if floor.is_some_and(|f| candidate < f) {
                    continue;
                }
                // Local times skipped by a DST jump have no mapping.
                if let Some(found) = tz.from_local_datetime(&candidate).earliest() {
                    return Some(found);
                }
            }
        }
        None
    }
}

fn field(value: Option<&CronField>, name: &str, min: u32, max: u32, names: &[&str]) -> Result<Vec<u32>, String> {
    let expr = match value {
        None => return Ok((min..=max).collect()),
        Some(CronField::Number(n)) => n.to_string(),
        Some(CronField::Expr(s)) => s.trim().to_lowercase(),
    };
    parse_field(&expr, min, max, names).map_err(|e| format!("invalid cron {name} '{expr}': {e}"))
}

/// Parse a cron field into the sorted list of values it matches.
fn parse_field(expr: &str, min: u32, max: u32, names: &[&str]) -> Result<Vec<u32>, String> {
    let mut values = Vec::new();
    for part in expr.split(',') {
        let part = part.trim();
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("bad step '{step}'"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a, min, max, names)?, value(b, min, max, names)?)
        } else {
            let v = value(range, min, max, names)?;
            // `N/step` runs from N to the end of the range.
            (v, if step > 1 { max } else { v })
        };
        if lo > hi {
            return Err(format!("empty range {lo}-{hi}"));
        }
        values.extend((lo..=hi).step_by(step as usize));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn value(token: &str, min: u32, max: u32, names: &[&str]) -> Result<u32, String> {
    let token = token.trim();
    if let Some(pos) = names.iter().position(|n| *n == token) {
        return Ok(min + pos as u32);
    }
    let n: u32 = token.parse().map_err(|_| format!("'{token}' is not a number"))?;
    if n < min || n > max {
        return Err(format!("{n} is outside {min}-{max}"));
    }
    Ok(n)
}
