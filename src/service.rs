//! Task lifecycle: turns inbound events into task records.
//!
//! Every mutation goes through a single commit step, which reaps orphans on
//! the reporting worker, persists the task and only then announces it. Events
//! for the same instance are serialized by [`InstanceLocks`], so a lookup and
//! the following save never interleave with another event for that task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcast;
use crate::error::{Error, Result};
use crate::locks::InstanceLocks;
use crate::models::{EventKind, Task, TaskEvent, TaskStatus};
use crate::statistics::Statistics;
use crate::table::{TaskFilter, TaskTable};
use crate::timestamp;

/// How long tasks are kept before the sweep deletes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
  /// Age since queueing, regardless of progress.
  pub queued: Duration,
  /// Age since ending, for tasks that ended.
  pub ended: Duration,
}

impl Default for Retention {
  fn default() -> Self {
    Self {
      queued: Duration::from_secs(48 * 60 * 60),
      ended: Duration::from_secs(60 * 60),
    }
  }
}

impl Retention {
  pub fn filter_at(&self, now: DateTime<Utc>) -> TaskFilter {
    let cutoff = |age: Duration| {
      let at = chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
      timestamp::format(at)
    };
    TaskFilter::Expired {
      queued_before: cutoff(self.queued),
      ended_before: cutoff(self.ended),
    }
  }
}

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

pub struct TaskService {
  table: Arc<dyn TaskTable>,
  broadcast: Broadcast,
  locks: InstanceLocks,
}

impl TaskService {
  pub fn new(table: Arc<dyn TaskTable>, broadcast: Broadcast) -> Self {
    Self {
      table,
      broadcast,
      locks: InstanceLocks::new(),
    }
  }

  pub fn broadcast(&self) -> &Broadcast {
    &self.broadcast
  }

  pub async fn handle_event(&self, event: TaskEvent) -> Result<Task> {
    let _guard = self.locks.acquire(event.instance).await;
    match event.event {
      EventKind::Queued => self.task_queued(&event).await,
      EventKind::Started => self.task_started(&event).await,
      EventKind::Finished => self.task_ended(&event, TaskStatus::Passed).await,
      EventKind::Failed => self.task_ended(&event, TaskStatus::Failed).await,
      EventKind::Cancelled => self.task_cancelled(&event).await,
    }
  }

  async fn task_queued(&self, event: &TaskEvent) -> Result<Task> {
    let mut task = Task::from_event(event);
    task.worker.clear();
    self.commit(&task).await?;
    Ok(task)
  }

  async fn task_started(&self, event: &TaskEvent) -> Result<Task> {
    let mut task = self.lookup_or_synthesize(event, false).await?;
    if task.log.is_empty() {
      task.log = event.log.clone();
    }
    // A start after an end is a new run on the same instance.
    if task.started.is_empty() || !task.ended.is_empty() {
      task.started = timestamp::now();
      task.ended.clear();
    }
    task.status = TaskStatus::Running;
    task.worker = event.hostname.clone();
    self.commit(&task).await?;
    Ok(task)
  }

  async fn task_ended(&self, event: &TaskEvent, status: TaskStatus) -> Result<Task> {
    let mut task = self.lookup_or_synthesize(event, true).await?;
    if task.worker.is_empty() {
      task.worker = event.hostname.clone();
    }
    if task.log.is_empty() {
      task.log = event.log.clone();
    }
    task.ended = timestamp::now();
    task.status = status;
    self.commit(&task).await?;
    Ok(task)
  }

  async fn task_cancelled(&self, event: &TaskEvent) -> Result<Task> {
    let mut task = self.lookup_or_synthesize(event, false).await?;
    if task.worker.is_empty() {
      task.worker = event.hostname.clone();
    }
    task.log.clear();
    task.ended = timestamp::now();
    task.status = TaskStatus::Cancelled;
    self.commit(&task).await?;
    Ok(task)
  }

  /// Events may overtake the `queued` report. A missing task is rebuilt from
  /// the event itself instead of being rejected.
  async fn lookup_or_synthesize(&self, event: &TaskEvent, backfill_start: bool) -> Result<Task> {
    if let Some(task) = self.table.find_one(&TaskFilter::Instance(event.instance)).await? {
      return Ok(task);
    }
    debug!("Task {} not seen before {:?}, synthesizing", event.instance, event.event);
    let mut task = Task::from_event(event);
    if backfill_start {
      task.started = timestamp::now();
    }
    Ok(task)
  }

  async fn commit(&self, task: &Task) -> Result<()> {
    if task.status == TaskStatus::Running {
      self.reap_orphans(task).await?;
    }
    self.table.save(task).await?;
    info!("Task {} ({}) is {}", task.instance, task.name, task.status);
    self.broadcast.publish(task);
    Ok(())
  }

  /// A worker runs one task at a time. Anything else it still has open is
  /// assumed finished and closed as passed.
  async fn reap_orphans(&self, task: &Task) -> Result<()> {
    if task.worker.is_empty() {
      return Ok(());
    }
    let orphans = self.table.find(&TaskFilter::RunningOn(task.worker.clone())).await?;
    for mut orphan in orphans.into_iter().filter(|orphan| orphan.instance != task.instance) {
      debug!("Worker {} moved on, closing task {}", task.worker, orphan.instance);
      orphan.status = TaskStatus::Passed;
      orphan.ended = timestamp::now();
      self.table.save(&orphan).await?;
      self.broadcast.publish(&orphan);
    }
    Ok(())
  }

  pub async fn get_task(&self, instance: Uuid) -> Result<Task> {
    self
      .table
      .find_one(&TaskFilter::Instance(instance))
      .await?
      .ok_or(Error::NotFound(instance))
  }

  pub async fn get_tasks(&self) -> Result<Vec<Task>> {
    self.table.find(&TaskFilter::All).await
  }

  /// Announces the task as deleted, then removes it. The announcement stands
  /// even when the removal fails.
  pub async fn delete_task(&self, mut task: Task) -> Result<Task> {
    task.status = TaskStatus::Deleted;
    self.broadcast.publish(&task);
    self.table.delete(&task).await?;
    info!("Task {} ({}) deleted", task.instance, task.name);
    Ok(task)
  }

  pub async fn delete_instance(&self, instance: Uuid) -> Result<Task> {
    let _guard = self.locks.acquire(instance).await;
    let task = self.get_task(instance).await?;
    self.delete_task(task).await
  }

  pub async fn statistics(&self) -> Result<Statistics> {
    self.statistics_at(Utc::now()).await
  }

  pub async fn statistics_at(&self, now: DateTime<Utc>) -> Result<Statistics> {
    let tasks = self.get_tasks().await?;
    Ok(Statistics::from_tasks(&tasks, now))
  }

  /// Deletes every task past its retention. Individual failures are logged and
  /// skipped; the count covers tasks actually removed.
  pub async fn reclaim_expired_at(&self, now: DateTime<Utc>, retention: &Retention) -> Result<usize> {
    let filter = retention.filter_at(now);
    let expired = self.table.find(&filter).await?;
    let mut reclaimed = 0;
    for candidate in expired {
      let _guard = self.locks.acquire(candidate.instance).await;
      // Re-read under the lock: an event may have refreshed the task meanwhile.
      let current = match self.table.find_one(&TaskFilter::Instance(candidate.instance)).await {
        Ok(Some(task)) if filter.matches(&task) => task,
        Ok(_) => continue,
        Err(e) => {
          warn!("Failed to reload expired task {}: {}", candidate.instance, e);
          continue;
        }
      };
      match self.delete_task(current).await {
        Ok(_) => reclaimed += 1,
        Err(e) => warn!("Failed to reclaim task {}: {}", candidate.instance, e),
      }
    }
    Ok(reclaimed)
  }
}

/// Runs the reclamation sweep every `period` until the runtime shuts down.
/// Periods below one millisecond are raised to it.
pub fn spawn_reclamation(service: Arc<TaskService>, period: Duration, retention: Retention) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period.max(MIN_SWEEP_PERIOD));
    ticker.tick().await;
    loop {
      ticker.tick().await;
      match service.reclaim_expired_at(Utc::now(), &retention).await {
        Ok(0) => {}
        Ok(count) => info!("Reclaimed {} expired tasks", count),
        Err(e) => error!("Reclamation sweep failed: {}", e),
      }
    }
  })
}
