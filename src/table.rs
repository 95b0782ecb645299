use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Task;

/// Predicates the lifecycle issues against the task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
  All,
  Instance(Uuid),
  /// Started but not ended on the given worker.
  RunningOn(String),
  /// Queued before `queued_before`, or ended before `ended_before`.
  Expired {
    queued_before: String,
    ended_before: String,
  },
}

impl TaskFilter {
  pub fn matches(&self, task: &Task) -> bool {
    match self {
      TaskFilter::All => true,
      TaskFilter::Instance(instance) => task.instance == *instance,
      TaskFilter::RunningOn(worker) => task.is_running_on(worker),
      TaskFilter::Expired {
        queued_before,
        ended_before,
      } => {
        task.queued.as_str() < queued_before.as_str()
          || (!task.ended.is_empty() && task.ended.as_str() < ended_before.as_str())
      }
    }
  }
}

/// Durable keyed store of tasks. Holds no business logic.
#[async_trait]
pub trait TaskTable: Send + Sync {
  async fn create(&self, task: &Task) -> Result<()>;

  /// Insert or replace by instance.
  async fn save(&self, task: &Task) -> Result<()>;

  async fn delete(&self, task: &Task) -> Result<()>;

  async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

  async fn find_one(&self, filter: &TaskFilter) -> Result<Option<Task>> {
    Ok(self.find(filter).await?.into_iter().next())
  }
}

#[derive(Default)]
pub struct MemoryTaskTable {
  tasks: RwLock<BTreeMap<Uuid, Task>>,
}

impl MemoryTaskTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.tasks.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.read().is_empty()
  }
}

#[async_trait]
impl TaskTable for MemoryTaskTable {
  async fn create(&self, task: &Task) -> Result<()> {
    let mut tasks = self.tasks.write();
    if tasks.contains_key(&task.instance) {
      return Err(Error::Conflict(task.instance));
    }
    tasks.insert(task.instance, task.clone());
    Ok(())
  }

  async fn save(&self, task: &Task) -> Result<()> {
    self.tasks.write().insert(task.instance, task.clone());
    Ok(())
  }

  async fn delete(&self, task: &Task) -> Result<()> {
    self.tasks.write().remove(&task.instance);
    Ok(())
  }

  async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
    let tasks = self.tasks.read();
    if let TaskFilter::Instance(instance) = filter {
      return Ok(tasks.get(instance).cloned().into_iter().collect());
    }
    Ok(tasks.values().filter(|task| filter.matches(task)).cloned().collect())
  }
}
