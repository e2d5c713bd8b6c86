//! Deadline scheduler
//!
//! Arms one timer per task that runs its processing cycle at the deadline.
//! A refreshed schedule with a moved deadline re-arms the timer until it
//! fires.
//! Manual triggers call `CycleRunner::run` directly; the processed marker
//! keeps the two paths from processing a task twice.

use crate::cycle::{CycleOutcome, CycleRunner};
use arbiter_core::{TaskId, TaskSchedule, Timestamp};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// A task's timer and the deadline it was armed for.
struct ArmedTimer {
    deadline: Timestamp,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Schedules cycles at task deadlines. Clones share timers and shutdown.
#[derive(Clone)]
pub struct DeadlineScheduler {
    runner: CycleRunner,
    timers: Arc<Mutex<HashMap<TaskId, ArmedTimer>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl DeadlineScheduler {
    pub fn new(runner: CycleRunner) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            runner,
            timers: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Arm a timer for the task's deadline, or run now if it has passed.
    ///
    /// A task already armed for a different deadline is re-armed as long as
    /// its timer has not fired. Returns `false` when nothing was armed: the
    /// window is empty, the same deadline is already armed, the cycle has
    /// already started, or the scheduler is shut down.
    pub async fn schedule(&self, schedule: &TaskSchedule) -> bool {
        if *self.shutdown_tx.borrow() {
            return false;
        }

        if schedule.start_time >= schedule.deadline {
            tracing::warn!(
                task_id = %schedule.task_id,
                start_time = %schedule.start_time,
                deadline = %schedule.deadline,
                "Start time is not before the deadline; not scheduled"
            );
            return false;
        }

        let mut timers = self.timers.lock().await;
        if let Some(armed) = timers.get(&schedule.task_id) {
            if armed.deadline == schedule.deadline || armed.fired.load(Ordering::Acquire) {
                return false;
            }
            armed.handle.abort();
            tracing::info!(
                task_id = %schedule.task_id,
                old_deadline = %armed.deadline,
                new_deadline = %schedule.deadline,
                "Deadline moved; re-arming"
            );
        }

        let delay = (schedule.deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let task_id = schedule.task_id.clone();
        let runner = self.runner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let fired = Arc::new(AtomicBool::new(false));

        tracing::info!(
            task_id = %task_id,
            deadline = %schedule.deadline,
            delay_secs = delay.as_secs(),
            "Cycle scheduled at deadline"
        );

        let handle = tokio::spawn({
            let task_id = task_id.clone();
            let fired = fired.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => {
                        tracing::debug!(task_id = %task_id, "Deadline timer cancelled");
                        return;
                    }
                }
                fired.store(true, Ordering::Release);

                match runner.run(&task_id).await {
                    Ok(CycleOutcome::Completed(report)) => tracing::info!(
                        task_id = %task_id,
                        pending = report.pending_found,
                        "Deadline cycle completed"
                    ),
                    Ok(CycleOutcome::Skipped { reason, .. }) => tracing::info!(
                        task_id = %task_id,
                        reason = ?reason,
                        "Deadline cycle skipped"
                    ),
                    Err(e) => tracing::error!(
                        task_id = %task_id,
                        error = %e,
                        "Deadline cycle failed"
                    ),
                }
            }
        });

        timers.insert(
            task_id,
            ArmedTimer {
                deadline: schedule.deadline,
                fired,
                handle,
            },
        );
        true
    }

    /// Schedule each task, re-arming moved deadlines. Returns how many
    /// timers were armed.
    pub async fn schedule_all(&self, schedules: &[TaskSchedule]) -> usize {
        let mut armed = 0;
        for schedule in schedules {
            if self.schedule(schedule).await {
                armed += 1;
            }
        }
        armed
    }

    pub async fn is_scheduled(&self, task_id: &TaskId) -> bool {
        self.timers.lock().await.contains_key(task_id)
    }

    /// Timers whose cycle has not finished yet.
    pub async fn pending_count(&self) -> usize {
        self.timers
            .lock()
            .await
            .values()
            .filter(|armed| !armed.handle.is_finished())
            .count()
    }

    /// Cancel waiting timers and wait for cycles already running.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let handles: Vec<_> = self.timers.lock().await.drain().collect();

        for (task_id, armed) in handles {
            if let Err(e) = armed.handle.await {
                tracing::error!(task_id = %task_id, error = %e, "Deadline task panicked");
            }
        }
        tracing::info!("Deadline scheduler shut down");
    }
}

impl std::fmt::Debug for DeadlineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineScheduler")
            .field("shut_down", &*self.shutdown_tx.borrow())
            .finish_non_exhaustive()
    }
}
