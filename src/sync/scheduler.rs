//! Recurring export schedules
//!
//! Schedules are held in memory. Each one carries its own run lock so a
//! schedule never overlaps with itself while distinct schedules run in
//! parallel. Manual runs wait for the lock; the periodic driver skips a
//! schedule that is still busy and picks it up on a later tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ExportRequest, ExportResult, SyncEngine};
use crate::{Error, Result};

/// Identity recorded in history for automatic runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRequester {
    /// Always record this identity
    Fixed(String),
    /// Record whoever created the schedule
    Creator,
}

impl Default for ScheduleRequester {
    fn default() -> Self {
        Self::Fixed("scheduler".to_string())
    }
}

impl ScheduleRequester {
    /// Parse a config value: `creator`, or any other non-empty fixed identity
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" => Self::default(),
            v if v.eq_ignore_ascii_case("creator") => Self::Creator,
            v => Self::Fixed(v.to_string()),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the driver scans for due schedules
    pub tick: Duration,
    /// Deadline for each automatic run
    pub run_timeout: Duration,
    pub requester: ScheduleRequester,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            run_timeout: Duration::from_secs(600),
            requester: ScheduleRequester::default(),
        }
    }
}

/// A named, interval-driven export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub request: ExportRequest,
    pub interval_secs: u64,
    pub enabled: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<bool>,
    pub run_count: u64,
}

impl Schedule {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }
}

/// Request to create a schedule
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSchedule {
    #[serde(default)]
    pub name: String,
    pub request: ExportRequest,
    pub interval_secs: i64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

const fn enabled_by_default() -> bool {
    true
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSchedule {
    pub name: Option<String>,
    pub request: Option<ExportRequest>,
    pub interval_secs: Option<i64>,
    pub enabled: Option<bool>,
}

struct Slot {
    schedule: Schedule,
    running: Arc<Mutex<()>>,
}

/// Owns schedules and triggers their runs
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    config: SchedulerConfig,
    slots: RwLock<BTreeMap<String, Slot>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a schedule; its first run is due one interval from now
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a non-positive interval or an unknown plugin
    pub async fn create(&self, input: CreateSchedule, created_by: &str) -> Result<Schedule> {
        let interval_secs = positive_interval(input.interval_secs)?;
        self.check_target(&input.request).await?;

        let now = Utc::now();
        let name = if input.name.trim().is_empty() {
            format!("{} every {interval_secs}s", input.request.plugin_name)
        } else {
            input.name
        };
        let schedule = Schedule {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            request: input.request,
            interval_secs,
            enabled: input.enabled,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            next_run_at: next_after(now, interval_secs),
            last_run_at: None,
            last_result_id: None,
            last_success: None,
            run_count: 0,
        };

        tracing::info!(
            schedule_id = %schedule.id,
            plugin = %schedule.request.plugin_name,
            interval_secs,
            "schedule created"
        );

        self.slots.write().await.insert(
            schedule.id.clone(),
            Slot {
                schedule: schedule.clone(),
                running: Arc::new(Mutex::new(())),
            },
        );
        Ok(schedule)
    }

    /// Schedules ordered by id
    pub async fn list(&self) -> Vec<Schedule> {
        self.slots
            .read()
            .await
            .values()
            .map(|s| s.schedule.clone())
            .collect()
    }

    /// # Errors
    ///
    /// Returns `NotFound` if no schedule has this id
    pub async fn get(&self, id: &str) -> Result<Schedule> {
        self.slots
            .read()
            .await
            .get(id)
            .map(|s| s.schedule.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Apply a partial update
    ///
    /// Changing the interval moves the next run to one new interval from now.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `Validation` for a rejected
    /// interval or target
    pub async fn update(&self, id: &str, input: UpdateSchedule) -> Result<Schedule> {
        let interval_secs = input.interval_secs.map(positive_interval).transpose()?;
        if let Some(request) = &input.request {
            self.check_target(request).await?;
        }

        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(id).ok_or_else(|| not_found(id))?;
        let schedule = &mut slot.schedule;
        let now = Utc::now();

        if let Some(name) = input.name.filter(|n| !n.trim().is_empty()) {
            schedule.name = name;
        }
        if let Some(request) = input.request {
            schedule.request = request;
        }
        if let Some(enabled) = input.enabled {
            schedule.enabled = enabled;
        }
        if let Some(secs) = interval_secs {
            schedule.interval_secs = secs;
            schedule.next_run_at = next_after(now, secs);
        }
        schedule.updated_at = now;

        Ok(schedule.clone())
    }

    /// # Errors
    ///
    /// Returns `NotFound` if no schedule has this id
    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.slots.write().await.remove(id).is_none() {
            return Err(not_found(id));
        }
        tracing::info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Run a schedule now, regardless of its enabled flag or due time
    ///
    /// Waits for an in-flight run of the same schedule to finish first. The
    /// result is recorded under `requester`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `Cancelled` if `cancel` fires
    /// during the export
    pub async fn run_now(
        &self,
        id: &str,
        requester: &str,
        cancel: &CancellationToken,
    ) -> Result<ExportResult> {
        let running = self.run_lock(id).await?;
        let guard = running.lock_owned().await;
        // Deleted while we waited
        let schedule = self.get(id).await?;
        self.execute(&schedule, requester, None, cancel, guard).await
    }

    /// Trigger every enabled schedule whose next run has elapsed
    ///
    /// Busy schedules are skipped. Returns the spawned runs.
    pub async fn tick(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let now = Utc::now();
        let due: Vec<(String, Arc<Mutex<()>>)> = self
            .slots
            .read()
            .await
            .values()
            .filter(|s| s.schedule.is_due(now))
            .map(|s| (s.schedule.id.clone(), Arc::clone(&s.running)))
            .collect();

        let mut handles = Vec::with_capacity(due.len());
        for (id, running) in due {
            let Some((schedule, guard)) = self.claim(&id, running, now).await else {
                continue;
            };

            let requester = match &self.config.requester {
                ScheduleRequester::Fixed(name) => name.clone(),
                ScheduleRequester::Creator => schedule.created_by.clone(),
            };
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let timeout = Some(this.config.run_timeout);
                if let Err(e) = this.execute(&schedule, &requester, timeout, &cancel, guard).await {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "scheduled run aborted");
                }
            }));
        }

        handles
    }

    /// Drive due schedules until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(tick_secs = self.config.tick.as_secs_f64(), "scheduler started");

            let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        in_flight.retain(|h| !h.is_finished());
                        in_flight.extend(self.tick(&cancel).await);
                    }
                }
            }

            // Runs observe the same token, so they wind down promptly
            for joined in futures::future::join_all(in_flight).await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "scheduled run task failed");
                }
            }
            tracing::info!("scheduler stopped");
        })
    }

    async fn execute(
        &self,
        schedule: &Schedule,
        requester: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        _guard: OwnedMutexGuard<()>,
    ) -> Result<ExportResult> {
        tracing::info!(schedule_id = %schedule.id, plugin = %schedule.request.plugin_name, "schedule run started");

        let run = self.engine.export(&schedule.request, cancel);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "scheduled run exceeded {}ms",
                    limit.as_millis()
                )))
            }),
            None => run.await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(Error::Cancelled(msg)) => {
                self.reschedule(&schedule.id, None).await;
                return Err(Error::Cancelled(msg));
            }
            Err(e) => self.engine.capture_export_failure(&schedule.request, &e),
        };

        self.engine.record_export(&result, requester);
        self.reschedule(&schedule.id, Some(&result)).await;

        tracing::info!(
            schedule_id = %schedule.id,
            export_id = %result.id,
            success = result.success,
            "schedule run finished"
        );
        Ok(result)
    }

    async fn reschedule(&self, id: &str, result: Option<&ExportResult>) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(id) else {
            return;
        };
        let schedule = &mut slot.schedule;
        let now = Utc::now();
        schedule.next_run_at = next_after(now, schedule.interval_secs);
        if let Some(result) = result {
            schedule.last_run_at = Some(now);
            schedule.last_result_id = Some(result.id.clone());
            schedule.last_success = Some(result.success);
            schedule.run_count += 1;
        }
    }

    /// Take the run lock of a schedule that is still due at `now`
    ///
    /// A run that finished after the due snapshot has already moved
    /// `next_run_at`, so the schedule is re-read under the lock.
    async fn claim(
        &self,
        id: &str,
        running: Arc<Mutex<()>>,
        now: DateTime<Utc>,
    ) -> Option<(Schedule, OwnedMutexGuard<()>)> {
        let Ok(guard) = running.try_lock_owned() else {
            tracing::debug!(schedule_id = %id, "previous run still active, skipping");
            return None;
        };
        let schedule = self.get(id).await.ok().filter(|s| s.is_due(now))?;
        Some((schedule, guard))
    }

    async fn run_lock(&self, id: &str) -> Result<Arc<Mutex<()>>> {
        self.slots
            .read()
            .await
            .get(id)
            .map(|s| Arc::clone(&s.running))
            .ok_or_else(|| not_found(id))
    }

    async fn check_target(&self, request: &ExportRequest) -> Result<()> {
        if request.plugin_name.trim().is_empty() {
            return Err(Error::Validation(
                "schedule request requires plugin_name".to_string(),
            ));
        }
        self.engine
            .registry()
            .get(&request.plugin_name)
            .await
            .map(|_| ())
            .map_err(|_| Error::Validation(format!("unknown plugin '{}'", request.plugin_name)))
    }
}

fn positive_interval(secs: i64) -> Result<u64> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| Error::Validation("interval_secs must be positive".to_string()))
}

fn next_after(now: DateTime<Utc>, interval_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(interval_secs).unwrap_or(i64::MAX);
    now.checked_add_signed(chrono::TimeDelta::seconds(secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("schedule '{id}'"))
}
