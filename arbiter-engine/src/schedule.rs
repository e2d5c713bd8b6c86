//! Task schedule cache
//!
//! Submission windows come from an external task backend. The cache is an
//! explicitly owned read-through map with a TTL, shared by `Arc` between
//! the intake gate and the background refresh task.

use crate::scheduler::DeadlineScheduler;
use arbiter_core::{ArbiterResult, TaskId, TaskSchedule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};

// ============================================================================
// TASK DIRECTORY
// ============================================================================

/// Source of task schedules (the external task backend).
#[async_trait]
pub trait TaskDirectory: Send + Sync {
    /// Schedule of one task, `None` if the backend does not know it.
    async fn fetch_schedule(&self, task_id: &TaskId) -> ArbiterResult<Option<TaskSchedule>>;

    /// Every schedule the backend currently knows.
    async fn list_schedules(&self) -> ArbiterResult<Vec<TaskSchedule>>;
}

/// Fixed in-memory directory for the offline runner and tests.
#[derive(Debug, Default)]
pub struct StaticTaskDirectory {
    schedules: RwLock<HashMap<TaskId, TaskSchedule>>,
}

impl StaticTaskDirectory {
    pub fn new(schedules: impl IntoIterator<Item = TaskSchedule>) -> Self {
        Self {
            schedules: RwLock::new(
                schedules
                    .into_iter()
                    .map(|s| (s.task_id.clone(), s))
                    .collect(),
            ),
        }
    }

    pub async fn upsert(&self, schedule: TaskSchedule) {
        self.schedules
            .write()
            .await
            .insert(schedule.task_id.clone(), schedule);
    }
}

#[async_trait]
impl TaskDirectory for StaticTaskDirectory {
    async fn fetch_schedule(&self, task_id: &TaskId) -> ArbiterResult<Option<TaskSchedule>> {
        Ok(self.schedules.read().await.get(task_id).cloned())
    }

    async fn list_schedules(&self) -> ArbiterResult<Vec<TaskSchedule>> {
        let mut schedules: Vec<_> = self.schedules.read().await.values().cloned().collect();
        schedules.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        Ok(schedules)
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone)]
struct CachedSchedule {
    schedule: TaskSchedule,
    fetched_at: Instant,
}

/// Read-through cache of task schedules.
pub struct TaskScheduleCache {
    directory: Arc<dyn TaskDirectory>,
    ttl: Duration,
    entries: RwLock<HashMap<TaskId, CachedSchedule>>,
}

impl TaskScheduleCache {
    pub fn new(directory: Arc<dyn TaskDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Schedule for `task_id`, fetching it when missing or older than the TTL.
    ///
    /// If the backend fails and a stale entry exists, the stale entry is
    /// served.
    pub async fn get(&self, task_id: &TaskId) -> ArbiterResult<Option<TaskSchedule>> {
        let cached = self.entries.read().await.get(task_id).cloned();
        if let Some(entry) = &cached {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(Some(entry.schedule.clone()));
            }
        }

        match self.directory.fetch_schedule(task_id).await {
            Ok(Some(schedule)) => {
                self.entries.write().await.insert(
                    task_id.clone(),
                    CachedSchedule {
                        schedule: schedule.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(Some(schedule))
            }
            Ok(None) => {
                self.entries.write().await.remove(task_id);
                Ok(None)
            }
            Err(e) => match cached {
                Some(entry) => {
                    tracing::warn!(
                        task_id = %task_id,
                        error = %e,
                        "Task backend unavailable; serving stale schedule"
                    );
                    Ok(Some(entry.schedule))
                }
                None => Err(e),
            },
        }
    }

    /// Replace the cache contents with the backend's full schedule list.
    /// Returns how many schedules were loaded.
    pub async fn refresh(&self) -> ArbiterResult<usize> {
        let schedules = self.directory.list_schedules().await?;
        let now = Instant::now();
        let fresh: HashMap<_, _> = schedules
            .into_iter()
            .map(|schedule| {
                (
                    schedule.task_id.clone(),
                    CachedSchedule {
                        schedule,
                        fetched_at: now,
                    },
                )
            })
            .collect();

        let count = fresh.len();
        *self.entries.write().await = fresh;
        Ok(count)
    }

    /// Every cached schedule, soonest deadline first.
    pub async fn cached(&self) -> Vec<TaskSchedule> {
        let mut schedules: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.schedule.clone())
            .collect();
        schedules.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        schedules
    }

    pub async fn invalidate(&self, task_id: &TaskId) {
        self.entries.write().await.remove(task_id);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for TaskScheduleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduleCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BACKGROUND REFRESH
// ============================================================================

/// Counters for the refresh loop.
#[derive(Debug, Default)]
pub struct ScheduleRefreshMetrics {
    pub refreshes: AtomicU64,
    pub refresh_errors: AtomicU64,
    /// Deadline timers created from refreshed schedules
    pub tasks_scheduled: AtomicU64,
}

impl ScheduleRefreshMetrics {
    pub fn snapshot(&self) -> ScheduleRefreshSnapshot {
        ScheduleRefreshSnapshot {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
            tasks_scheduled: self.tasks_scheduled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRefreshSnapshot {
    pub refreshes: u64,
    pub refresh_errors: u64,
    pub tasks_scheduled: u64,
}

/// Background task that refreshes the schedule cache every `every`.
///
/// When a scheduler is given, each refresh also arms deadline timers for
/// newly seen tasks. Runs until the shutdown signal is received.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(schedule_refresh_task(
///     cache.clone(),
///     config.schedule_refresh_interval,
///     Some(scheduler.clone()),
///     shutdown_rx,
/// ));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn schedule_refresh_task(
    cache: Arc<TaskScheduleCache>,
    every: Duration,
    scheduler: Option<DeadlineScheduler>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ScheduleRefreshMetrics> {
    let metrics = Arc::new(ScheduleRefreshMetrics::default());

    let mut refresh_interval = interval(every);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        refresh_interval_secs = every.as_secs(),
        "Schedule refresh task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Schedule refresh task shutting down");
                    break;
                }
            }

            _ = refresh_interval.tick() => {
                refresh_once(&cache, scheduler.as_ref(), &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        refreshes = snapshot.refreshes,
        refresh_errors = snapshot.refresh_errors,
        tasks_scheduled = snapshot.tasks_scheduled,
        "Schedule refresh task completed"
    );

    metrics
}

async fn refresh_once(
    cache: &TaskScheduleCache,
    scheduler: Option<&DeadlineScheduler>,
    metrics: &ScheduleRefreshMetrics,
) {
    match cache.refresh().await {
        Ok(count) => {
            metrics.refreshes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(schedules = count, "Task schedules refreshed");
        }
        Err(e) => {
            metrics.refresh_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Failed to refresh task schedules");
            return;
        }
    }

    if let Some(scheduler) = scheduler {
        let armed = scheduler.schedule_all(&cache.cached().await).await;
        metrics
            .tasks_scheduled
            .fetch_add(armed as u64, Ordering::Relaxed);
    }
}
