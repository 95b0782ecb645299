use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
  Queued,
  Running,
  Passed,
  Failed,
  Cancelled,
  Deleted,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Queued => "Queued",
      TaskStatus::Running => "Running",
      TaskStatus::Passed => "Passed",
      TaskStatus::Failed => "Failed",
      TaskStatus::Cancelled => "Cancelled",
      TaskStatus::Deleted => "Deleted",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Queued" => Ok(TaskStatus::Queued),
      "Running" => Ok(TaskStatus::Running),
      "Passed" => Ok(TaskStatus::Passed),
      "Failed" => Ok(TaskStatus::Failed),
      "Cancelled" => Ok(TaskStatus::Cancelled),
      "Deleted" => Ok(TaskStatus::Deleted),
      other => Err(format!("unknown task status '{}'", other)),
    }
  }
}

/// One tracked unit of work. Empty strings mean "not set" for the optional
/// text fields and for the three transition timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
  #[serde(rename = "id")]
  pub instance: Uuid,
  pub name: String,
  pub identity: String,
  pub routing_key: String,
  pub worker: String,
  pub status: TaskStatus,
  pub queued: String,
  pub started: String,
  pub ended: String,
  pub log: String,
}

impl Task {
  /// Builds a freshly queued task from whatever the event carries. Used for
  /// `queued` and for events that arrive before the task was ever seen.
  pub fn from_event(event: &TaskEvent) -> Self {
    Self {
      instance: event.instance,
      name: event.name.clone(),
      identity: event.identity.clone(),
      routing_key: event.routing_key.clone(),
      worker: event.hostname.clone(),
      status: TaskStatus::Queued,
      queued: timestamp::now(),
      started: String::new(),
      ended: String::new(),
      log: event.log.clone(),
    }
  }

  pub fn is_running_on(&self, worker: &str) -> bool {
    self.worker == worker && !self.started.is_empty() && self.ended.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
  Queued,
  Started,
  Finished,
  Failed,
  Cancelled,
}

/// Inbound lifecycle notification reported by a client or a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
  pub event: EventKind,
  pub instance: Uuid,
  #[serde(default)]
  pub identity: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub routing_key: String,
  #[serde(default)]
  pub hostname: String,
  #[serde(default)]
  pub role: String,
  #[serde(default)]
  pub log: String,
}
