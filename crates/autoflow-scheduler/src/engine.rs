//! Compiled schedules of the current config generation.
//!
//! `tick(now)` walks every trigger, emits one [`Fire`] per task of each due
//! schedule and moves that schedule to its next fire time. An interval that
//! fell behind jumps to the next future period instead of firing once per
//! missed period.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{Mutex, watch};

use autoflow_core::{AutoflowError, Result, ScheduleConfig, TaskOptions};

use crate::schedule::Trigger;

/// Ids are never reused, so an id from an older generation never names a
/// schedule of the current one.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Receives run requests from the scheduler. Keeps this crate independent of
/// the executor.
pub trait Submitter: Send + Sync {
    fn submit(&self, task: &str, options: TaskOptions) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Schedule {
    id: u64,
    config: ScheduleConfig,
    trigger: Trigger,
    next_run: Option<DateTime<Local>>,
    last_run: Option<DateTime<Local>>,
}

impl Schedule {
    fn compile(id: u64, config: ScheduleConfig, now: &DateTime<Local>) -> Result<Self> {
        let trigger = Trigger::compile(&config)?;
        let next_run = trigger.first(now);
        if next_run.is_none() && matches!(trigger, Trigger::Interval(_)) {
            return Err(AutoflowError::config("interval too large", vec![]));
        }
        Ok(Self {
            id,
            config,
            trigger,
            next_run,
            last_run: None,
        })
    }

    fn info(&self) -> ScheduleInfo {
        ScheduleInfo {
            id: self.id,
            config: self.config.clone(),
            next_run: self.next_run,
            last_run: self.last_run,
        }
    }
}

/// Public view of one schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleInfo {
    pub id: u64,
    #[serde(flatten)]
    pub config: ScheduleConfig,
    pub next_run: Option<DateTime<Local>>,
    pub last_run: Option<DateTime<Local>>,
}

/// One run request produced by a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fire {
    pub schedule: u64,
    pub task: String,
}

#[derive(Debug, Default)]
pub struct SchedulerEngine {
    schedules: Vec<Schedule>,
    generation: u64,
}

impl SchedulerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every schedule with a new generation. On any error the current
    /// generation is kept.
    pub fn load(&mut self, configs: &[ScheduleConfig], now: DateTime<Local>) -> Result<()> {
        let compiled = configs
            .iter()
            .enumerate()
            .map(|(i, config)| {
                Schedule::compile(next_id(), config.clone(), &now).map_err(|e| match e {
                    AutoflowError::Config { message, errors } => AutoflowError::Config {
                        message: format!("schedules[{i}]: {message}"),
                        errors,
                    },
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.schedules = compiled;
        self.generation += 1;
        tracing::info!(
            "📅 Loaded {} schedule(s) (generation {})",
            self.schedules.len(),
            self.generation
        );
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn list(&self) -> Vec<ScheduleInfo> {
        self.schedules.iter().map(Schedule::info).collect()
    }

    pub fn get(&self, id: u64) -> Option<ScheduleInfo> {
        self.schedules.iter().find(|s| s.id == id).map(Schedule::info)
    }

    /// Schedule configs in their current order.
    pub fn configs(&self) -> Vec<ScheduleConfig> {
        self.schedules.iter().map(|s| s.config.clone()).collect()
    }

    pub fn add(&mut self, config: ScheduleConfig, now: DateTime<Local>) -> Result<ScheduleInfo> {
        let schedule = Schedule::compile(next_id(), config, &now)?;
        let info = schedule.info();
        tracing::info!("📅 Schedule added: #{} → {:?}", info.id, info.config.tasks.names());
        self.schedules.push(schedule);
        Ok(info)
    }

    /// Replace the config of schedule `id`, keeping its id.
    pub fn update(&mut self, id: u64, config: ScheduleConfig, now: DateTime<Local>) -> Result<ScheduleInfo> {
        let pos = self.position(id)?;
        let schedule = Schedule::compile(id, config, &now)?;
        let info = schedule.info();
        self.schedules[pos] = schedule;
        tracing::info!("📅 Schedule #{id} updated");
        Ok(info)
    }

    pub fn remove(&mut self, id: u64) -> Result<()> {
        let pos = self.position(id)?;
        self.schedules.remove(pos);
        tracing::info!("📅 Schedule #{id} removed");
        Ok(())
    }

    fn position(&self, id: u64) -> Result<usize> {
        self.schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| AutoflowError::NotFound(format!("schedule #{id}")))
    }

    /// Collect every due schedule's tasks and advance their next fire time.
    /// Each listed task yields its own request; nothing is deduplicated.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<Fire> {
        let mut fired = Vec::new();
        for schedule in self.schedules.iter_mut() {
            let Some(due) = schedule.next_run else { continue };
            if due > now {
                continue;
            }
            for task in schedule.config.tasks.names() {
                tracing::info!("🔔 Schedule #{} triggered task '{task}'", schedule.id);
                fired.push(Fire {
                    schedule: schedule.id,
                    task,
                });
            }
            schedule.last_run = Some(now);
            schedule.next_run = schedule.trigger.next(&due, &now);
        }
        fired
    }
}

/// Run the tick loop until `shutdown` turns true.
pub async fn spawn_scheduler(
    engine: Arc<Mutex<SchedulerEngine>>,
    submitter: Arc<dyn Submitter>,
    check_interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("⏰ Scheduler started (check every {check_interval_secs}s)");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(check_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let fired = {
            let mut eng = engine.lock().await;
            eng.tick(Local::now())
        };
        for fire in fired {
            if let Err(e) = submitter.submit(&fire.task, TaskOptions::default()) {
                tracing::warn!("⚠️ Schedule #{} could not submit '{}': {e}", fire.schedule, fire.task);
            }
        }
    }
    tracing::info!("⏰ Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::{CronConfig, CronField, IntervalConfig, TaskNames};
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex as StdMutex;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 6, 10, h, m, s).unwrap()
    }

    fn every_minutes(tasks: &[&str], minutes: u64) -> ScheduleConfig {
        ScheduleConfig {
            tasks: TaskNames::Many(tasks.iter().map(|t| t.to_string()).collect()),
            interval: Some(IntervalConfig {
                minutes: Some(minutes),
                ..IntervalConfig::default()
            }),
            schedule: None,
        }
    }

    fn daily_at(task: &str, hour: u32) -> ScheduleConfig {
        ScheduleConfig {
            tasks: TaskNames::One(task.into()),
            interval: None,
            schedule: Some(CronConfig {
                hour: Some(CronField::Number(hour)),
                minute: Some(CronField::Number(0)),
                ..CronConfig::default()
            }),
        }
    }

    #[test]
    fn test_tick_fires_due_schedules_without_dedup() {
        let mut engine = SchedulerEngine::new();
        engine
            .load(&[every_minutes(&["tv", "movies"], 10), every_minutes(&["tv"], 10)], at(12, 0, 0))
            .unwrap();

        assert!(engine.tick(at(12, 5, 0)).is_empty());
        let fired = engine.tick(at(12, 10, 0));
        let tasks: Vec<_> = fired.iter().map(|f| f.task.as_str()).collect();
        assert_eq!(tasks, vec!["tv", "movies", "tv"]);

        // Already advanced.
        assert!(engine.tick(at(12, 10, 30)).is_empty());
        assert_eq!(engine.tick(at(12, 20, 0)).len(), 3);
    }

    #[test]
    fn test_cron_schedule_next_run() {
        let mut engine = SchedulerEngine::new();
        engine.load(&[daily_at("nightly", 3)], at(2, 59, 59)).unwrap();
        let info = &engine.list()[0];
        assert_eq!(info.next_run, Some(at(3, 0, 0)));

        assert_eq!(engine.tick(at(3, 0, 0)).len(), 1);
        let info = &engine.list()[0];
        assert_eq!(info.last_run, Some(at(3, 0, 0)));
        assert_eq!(info.next_run, Some(at(3, 0, 0) + Duration::days(1)));
    }

    #[test]
    fn test_failed_reload_keeps_generation() {
        let mut engine = SchedulerEngine::new();
        engine.load(&[every_minutes(&["tv"], 10)], at(12, 0, 0)).unwrap();
        let before = engine.list();

        let bad = every_minutes(&["tv"], 0);
        let err = engine.load(&[every_minutes(&["x"], 5), bad], at(12, 0, 0)).unwrap_err();
        assert!(err.to_string().contains("schedules[1]"));
        assert_eq!(engine.list(), before);
        assert_eq!(engine.generation(), 1);

        engine.load(&[every_minutes(&["tv"], 10)], at(12, 0, 0)).unwrap();
        assert_ne!(engine.list()[0].id, before[0].id);
        assert_eq!(engine.generation(), 2);
    }

    #[test]
    fn test_interval_beyond_calendar_is_rejected() {
        let mut engine = SchedulerEngine::new();
        let mut huge = every_minutes(&["tv"], 1);
        huge.interval = Some(IntervalConfig {
            weeks: Some(20_000_000),
            ..IntervalConfig::default()
        });
        let err = engine.load(&[huge.clone()], at(12, 0, 0)).unwrap_err();
        assert!(err.to_string().contains("schedules[0]"));
        assert!(err.to_string().contains("interval too large"));
        assert!(engine.add(huge, at(12, 0, 0)).is_err());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_crud() {
        let mut engine = SchedulerEngine::new();
        let a = engine.add(every_minutes(&["a"], 5), at(12, 0, 0)).unwrap();
        let b = engine.add(daily_at("b", 4), at(12, 0, 0)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(engine.len(), 2);

        let updated = engine.update(a.id, every_minutes(&["a", "c"], 15), at(12, 0, 0)).unwrap();
        assert_eq!(updated.id, a.id);
        assert_eq!(updated.next_run, Some(at(12, 15, 0)));
        assert!(engine.update(a.id, every_minutes(&["a"], 0), at(12, 0, 0)).is_err());
        assert_eq!(engine.get(a.id).unwrap().config.tasks.names(), vec!["a", "c"]);

        engine.remove(b.id).unwrap();
        assert!(matches!(engine.remove(b.id), Err(AutoflowError::NotFound(_))));
        assert_eq!(engine.configs().len(), 1);
    }

    struct Recorder(StdMutex<Vec<String>>);

    impl Submitter for Recorder {
        fn submit(&self, task: &str, _options: TaskOptions) -> Result<()> {
            self.0.lock().unwrap().push(task.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loop_submits_and_stops() {
        let mut engine = SchedulerEngine::new();
        engine.add(every_minutes(&["tv"], 1), Local::now() - Duration::minutes(2)).unwrap();
        let engine = Arc::new(Mutex::new(engine));
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(spawn_scheduler(engine.clone(), recorder.clone(), 1, stop_rx));
        // The first interval tick completes immediately.
        for _ in 0..100 {
            if !recorder.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["tv"]);
    }
}
