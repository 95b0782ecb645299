//! Point-in-time metrics derived from the whole task table.
//!
//! Nothing here is cached: every request rescans the table and recomputes the
//! counters and wait-time summaries from scratch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Task, TaskStatus};
use crate::timestamp;

/// Sample set summarised as min/max/mean/median with three decimals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataSet {
  #[serde(skip)]
  samples: Vec<f64>,
  min: String,
  max: String,
  mean: String,
  median: String,
}

impl Default for DataSet {
  fn default() -> Self {
    let zero = render(0.0);
    Self {
      samples: Vec::new(),
      min: zero.clone(),
      max: zero.clone(),
      mean: zero.clone(),
      median: zero,
    }
  }
}

fn render(value: f64) -> String {
  format!("{:.3}", value)
}

impl DataSet {
  pub fn add(&mut self, sample: f64) {
    self.samples.push(sample);
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn min(&self) -> &str {
    &self.min
  }

  pub fn max(&self) -> &str {
    &self.max
  }

  pub fn mean(&self) -> &str {
    &self.mean
  }

  pub fn median(&self) -> &str {
    &self.median
  }

  /// Recomputes the summary from the samples. An empty set summarises to zero.
  pub fn update(&mut self) {
    if self.samples.is_empty() {
      *self = Self::default();
      return;
    }
    let mut sorted = self.samples.clone();
    sorted.sort_by(f64::total_cmp);
    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 {
      (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    } else {
      sorted[count / 2]
    };
    self.min = render(sorted[0]);
    self.max = render(sorted[count - 1]);
    self.mean = render(mean);
    self.median = render(median);
  }
}

/// Seconds between queueing and starting, or until `now` when not started yet.
pub fn wait_time(task: &Task, now: DateTime<Utc>) -> Option<f64> {
  if task.queued.is_empty() {
    return None;
  }
  let queued = timestamp::parse(&task.queued)?;
  let started = if task.started.is_empty() {
    now
  } else {
    timestamp::parse(&task.started)?
  };
  let seconds = (started - queued).num_milliseconds() as f64 / 1000.0;
  Some(seconds.max(0.0))
}

/// Counters shared by every scope. Workers never see queued tasks.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseMetrics {
  pub wait_time: DataSet,
  pub running: usize,
  pub passed: usize,
  pub failed: usize,
  pub cancelled: usize,
}

impl BaseMetrics {
  fn record(&mut self, status: TaskStatus, wait: Option<f64>) {
    match status {
      TaskStatus::Running => self.running += 1,
      TaskStatus::Passed => self.passed += 1,
      TaskStatus::Failed => self.failed += 1,
      TaskStatus::Cancelled => self.cancelled += 1,
      TaskStatus::Queued | TaskStatus::Deleted => {}
    }
    // Cancelled tasks may never have waited for a worker at all.
    if status != TaskStatus::Cancelled {
      if let Some(wait) = wait {
        self.wait_time.add(wait);
      }
    }
  }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metrics {
  #[serde(flatten)]
  pub base: BaseMetrics,
  pub queued: usize,
}

impl Metrics {
  fn record(&mut self, status: TaskStatus, wait: Option<f64>) {
    if status == TaskStatus::Queued {
      self.queued += 1;
    }
    self.base.record(status, wait);
  }

  pub fn wait_time(&self) -> &DataSet {
    &self.base.wait_time
  }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statistics {
  pub tasks: Metrics,
  pub routing_keys: BTreeMap<String, Metrics>,
  pub workers: BTreeMap<String, BaseMetrics>,
}

impl Statistics {
  /// Single pass over `tasks`, then every touched data set is summarised.
  pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Self {
    let mut stats = Statistics::default();

    for task in tasks {
      if task.status == TaskStatus::Deleted {
        continue;
      }
      let wait = wait_time(task, now);

      stats.tasks.record(task.status, wait);
      if !task.routing_key.is_empty() {
        stats
          .routing_keys
          .entry(task.routing_key.clone())
          .or_default()
          .record(task.status, wait);
      }
      if !task.worker.is_empty() && task.status != TaskStatus::Queued {
        stats
          .workers
          .entry(task.worker.clone())
          .or_default()
          .record(task.status, wait);
      }
    }

    stats.tasks.base.wait_time.update();
    for metrics in stats.routing_keys.values_mut() {
      metrics.base.wait_time.update();
    }
    for metrics in stats.workers.values_mut() {
      metrics.wait_time.update();
    }
    stats
  }
}
