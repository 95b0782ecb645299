//! In-process fan-out of task mutations to live observers.
//!
//! Each subscriber owns a bounded mailbox. Publishing never waits: when a
//! mailbox is full the task is dropped for that subscriber only. Delivery is
//! therefore at most once, and nothing in the lifecycle may depend on it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Task;

pub const MAILBOX_CAPACITY: usize = 10;

type Registry = RwLock<HashMap<Uuid, mpsc::Sender<Task>>>;

#[derive(Clone)]
pub struct Broadcast {
  clients: Arc<Registry>,
  capacity: usize,
}

impl Default for Broadcast {
  fn default() -> Self {
    Self::new()
  }
}

impl Broadcast {
  pub fn new() -> Self {
    Self::with_capacity(MAILBOX_CAPACITY)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      clients: Arc::new(RwLock::new(HashMap::new())),
      capacity: capacity.max(1),
    }
  }

  pub fn subscribe(&self) -> Subscription {
    let (sender, receiver) = mpsc::channel(self.capacity);
    let id = Uuid::new_v4();
    self.clients.write().insert(id, sender);
    debug!("Subscriber {} registered", id);
    Subscription {
      id,
      receiver,
      clients: Arc::clone(&self.clients),
    }
  }

  pub fn unsubscribe(&self, id: Uuid) {
    unregister(&self.clients, id);
  }

  pub fn publish(&self, task: &Task) {
    let clients = self.clients.read();
    for (id, sender) in clients.iter() {
      match sender.try_send(task.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
          warn!("Subscriber {} mailbox full, discarded event for task {}", id, task.instance);
        }
        Err(TrySendError::Closed(_)) => {
          debug!("Subscriber {} already gone, skipping", id);
        }
      }
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.clients.read().len()
  }
}

fn unregister(clients: &Registry, id: Uuid) {
  if clients.write().remove(&id).is_some() {
    debug!("Subscriber {} unregistered", id);
  }
}

/// A registered mailbox. Dropping it unregisters the mailbox, so every exit
/// path of an observer connection releases its registry slot.
pub struct Subscription {
  id: Uuid,
  receiver: mpsc::Receiver<Task>,
  clients: Arc<Registry>,
}

impl Subscription {
  pub fn id(&self) -> Uuid {
    self.id
  }

  pub async fn recv(&mut self) -> Option<Task> {
    self.receiver.recv().await
  }

  pub fn try_recv(&mut self) -> Option<Task> {
    self.receiver.try_recv().ok()
  }

  pub fn close(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    unregister(&self.clients, self.id);
  }
}
