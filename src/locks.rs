use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

/// Serializes read-modify-write sequences per task instance.
#[derive(Default)]
pub struct InstanceLocks {
  locks: Arc<LockMap>,
}

impl InstanceLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// The guard exists before the wait starts, so a waiter dropped while
  /// still queued releases its map entry like a holder does.
  pub async fn acquire(&self, instance: Uuid) -> InstanceGuard {
    let lock = {
      let mut locks = self.locks.lock();
      Arc::clone(locks.entry(instance).or_default())
    };
    let mut guard = InstanceGuard {
      instance,
      locks: Arc::clone(&self.locks),
      lock,
      held: None,
    };
    guard.held = Some(Arc::clone(&guard.lock).lock_owned().await);
    guard
  }

  pub fn len(&self) -> usize {
    self.locks.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.locks.lock().is_empty()
  }
}

pub struct InstanceGuard {
  instance: Uuid,
  locks: Arc<LockMap>,
  lock: Arc<AsyncMutex<()>>,
  held: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard {
  fn drop(&mut self) {
    let mut locks = self.locks.lock();
    drop(self.held.take());
    // Only the map and this guard reference the entry: nobody else holds or awaits it.
    let idle = locks
      .get(&self.instance)
      .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
    if idle {
      locks.remove(&self.instance);
    }
  }
}
