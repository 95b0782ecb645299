use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use taskboard::broadcast::Broadcast;
use taskboard::error::{Error, Result};
use taskboard::models::{EventKind, Task, TaskEvent, TaskStatus};
use taskboard::service::{Retention, TaskService};
use taskboard::table::{MemoryTaskTable, TaskFilter, TaskTable};
use taskboard::timestamp;

fn event(kind: EventKind, instance: Uuid, hostname: &str) -> TaskEvent {
  TaskEvent {
    event: kind,
    instance,
    identity: "5d41402abc4b2a76b9719d911017c592".into(),
    name: "cucumber".into(),
    routing_key: "default".into(),
    hostname: hostname.into(),
    role: "worker".into(),
    log: format!("https://logs.example/{}", instance),
  }
}

fn setup() -> (Arc<MemoryTaskTable>, TaskService) {
  let table = Arc::new(MemoryTaskTable::new());
  let service = TaskService::new(table.clone(), Broadcast::new());
  (table, service)
}

#[tokio::test]
async fn queued_started_finished_orders_timestamps() {
  let (_, service) = setup();
  let instance = Uuid::new_v4();

  let queued = service.handle_event(event(EventKind::Queued, instance, "client-host")).await.unwrap();
  assert_eq!(queued.status, TaskStatus::Queued);
  assert!(queued.worker.is_empty());

  service.handle_event(event(EventKind::Started, instance, "w1")).await.unwrap();
  service.handle_event(event(EventKind::Finished, instance, "w2")).await.unwrap();

  let task = service.get_task(instance).await.unwrap();
  assert_eq!(task.status, TaskStatus::Passed);
  assert_eq!(task.worker, "w1");
  assert!(!task.queued.is_empty() && !task.started.is_empty() && !task.ended.is_empty());
  assert!(task.queued <= task.started);
  assert!(task.started <= task.ended);
}

#[tokio::test]
async fn out_of_order_events_synthesize_the_task() {
  let (table, service) = setup();

  let finished = Uuid::new_v4();
  let task = service.handle_event(event(EventKind::Finished, finished, "w1")).await.unwrap();
  assert_eq!(task.status, TaskStatus::Passed);
  assert_eq!(task.worker, "w1");
  assert!(!task.started.is_empty());
  assert!(!task.ended.is_empty());

  let failed = Uuid::new_v4();
  let task = service.handle_event(event(EventKind::Failed, failed, "w2")).await.unwrap();
  assert_eq!(task.status, TaskStatus::Failed);
  assert!(!task.started.is_empty());

  let started = Uuid::new_v4();
  let task = service.handle_event(event(EventKind::Started, started, "w3")).await.unwrap();
  assert_eq!(task.status, TaskStatus::Running);
  assert_eq!(task.log, format!("https://logs.example/{}", started));

  let cancelled = Uuid::new_v4();
  let task = service.handle_event(event(EventKind::Cancelled, cancelled, "w4")).await.unwrap();
  assert_eq!(task.status, TaskStatus::Cancelled);
  assert!(task.started.is_empty());
  assert!(task.log.is_empty());

  assert_eq!(table.len(), 4);
}

#[tokio::test]
async fn repeated_finish_keeps_status_and_refreshes_end() {
  let (table, service) = setup();
  let instance = Uuid::new_v4();
  service.handle_event(event(EventKind::Started, instance, "w1")).await.unwrap();
  let first = service.handle_event(event(EventKind::Finished, instance, "w1")).await.unwrap();

  tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  let second = service.handle_event(event(EventKind::Finished, instance, "w1")).await.unwrap();

  assert_eq!(second.status, TaskStatus::Passed);
  assert!(second.ended > first.ended);
  assert_eq!(second.started, first.started);
  assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn new_start_on_worker_reaps_orphan() {
  let (_, service) = setup();
  let mut observer = service.broadcast().subscribe();
  let a = Uuid::new_v4();
  let b = Uuid::new_v4();
  let elsewhere = Uuid::new_v4();

  service.handle_event(event(EventKind::Started, a, "W")).await.unwrap();
  service.handle_event(event(EventKind::Started, elsewhere, "X")).await.unwrap();
  service.handle_event(event(EventKind::Started, b, "W")).await.unwrap();

  let a = service.get_task(a).await.unwrap();
  assert_eq!(a.status, TaskStatus::Passed);
  assert!(!a.ended.is_empty());
  assert_eq!(service.get_task(b).await.unwrap().status, TaskStatus::Running);
  assert_eq!(service.get_task(elsewhere).await.unwrap().status, TaskStatus::Running);

  let announced: Vec<(Uuid, TaskStatus)> = std::iter::from_fn(|| observer.try_recv())
    .map(|task| (task.instance, task.status))
    .collect();
  assert_eq!(
    &announced[2..],
    &[(a.instance, TaskStatus::Passed), (b, TaskStatus::Running)]
  );
}

#[tokio::test]
async fn restart_on_same_worker_does_not_reap_itself() {
  let (_, service) = setup();
  let instance = Uuid::new_v4();
  let first = service.handle_event(event(EventKind::Started, instance, "W")).await.unwrap();
  let again = service.handle_event(event(EventKind::Started, instance, "W")).await.unwrap();

  assert_eq!(again.status, TaskStatus::Running);
  assert_eq!(again.started, first.started);
  assert!(again.ended.is_empty());
}

#[tokio::test]
async fn start_after_end_begins_a_new_run() {
  let (_, service) = setup();
  let instance = Uuid::new_v4();
  service.handle_event(event(EventKind::Started, instance, "W")).await.unwrap();
  let ended = service.handle_event(event(EventKind::Failed, instance, "W")).await.unwrap();

  tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  let restarted = service.handle_event(event(EventKind::Started, instance, "W")).await.unwrap();
  assert_eq!(restarted.status, TaskStatus::Running);
  assert!(restarted.ended.is_empty());
  assert!(restarted.started > ended.ended);
  assert_eq!(service.get_task(instance).await.unwrap(), restarted);

  // Still open on W, so the next task there closes it.
  let next = Uuid::new_v4();
  service.handle_event(event(EventKind::Started, next, "W")).await.unwrap();
  let reaped = service.get_task(instance).await.unwrap();
  assert_eq!(reaped.status, TaskStatus::Passed);
  assert!(!reaped.ended.is_empty());
}

#[tokio::test]
async fn events_never_produce_deleted() {
  let (_, service) = setup();
  let instance = Uuid::new_v4();
  let kinds = [
    EventKind::Queued,
    EventKind::Started,
    EventKind::Cancelled,
    EventKind::Started,
    EventKind::Failed,
    EventKind::Finished,
    EventKind::Queued,
  ];
  for kind in kinds {
    let task = service.handle_event(event(kind, instance, "w1")).await.unwrap();
    assert_ne!(task.status, TaskStatus::Deleted);
  }
}

#[tokio::test]
async fn cancel_keeps_existing_worker() {
  let (_, service) = setup();
  let instance = Uuid::new_v4();
  service.handle_event(event(EventKind::Started, instance, "w1")).await.unwrap();
  let task = service.handle_event(event(EventKind::Cancelled, instance, "w9")).await.unwrap();
  assert_eq!(task.worker, "w1");
  assert!(task.log.is_empty());
}

#[tokio::test]
async fn delete_announces_then_removes() {
  let (table, service) = setup();
  let instance = Uuid::new_v4();
  service.handle_event(event(EventKind::Queued, instance, "")).await.unwrap();
  let mut observer = service.broadcast().subscribe();

  let deleted = service.delete_instance(instance).await.unwrap();
  assert_eq!(deleted.status, TaskStatus::Deleted);
  assert_eq!(observer.try_recv().map(|task| task.status), Some(TaskStatus::Deleted));
  assert!(table.is_empty());

  assert!(matches!(service.delete_instance(instance).await, Err(Error::NotFound(id)) if id == instance));
  assert!(matches!(service.get_task(instance).await, Err(Error::NotFound(_))));
}

fn stored(queued: &str, ended: &str) -> Task {
  let mut task = Task::from_event(&event(EventKind::Queued, Uuid::new_v4(), ""));
  task.queued = queued.into();
  task.ended = ended.into();
  if !ended.is_empty() {
    task.started = queued.into();
    task.status = TaskStatus::Passed;
  }
  task
}

#[tokio::test]
async fn sweep_reclaims_by_queued_age_and_by_ended_age() {
  let (table, service) = setup();
  let now = Utc::now();
  let ago = |d: Duration| timestamp::format(now - d);

  let never_started = stored(&ago(Duration::hours(49)), "");
  let ended_long_ago = stored(&ago(Duration::hours(3)), &ago(Duration::hours(2)));
  let ended_recently = stored(&ago(Duration::hours(3)), &ago(Duration::minutes(10)));
  let waiting = stored(&ago(Duration::hours(47)), "");
  for task in [&never_started, &ended_long_ago, &ended_recently, &waiting] {
    assert_ok!(table.create(task).await);
  }
  let mut observer = service.broadcast().subscribe();

  let reclaimed = service.reclaim_expired_at(now, &Retention::default()).await.unwrap();
  assert_eq!(reclaimed, 2);

  let mut remaining: Vec<Uuid> = service.get_tasks().await.unwrap().into_iter().map(|task| task.instance).collect();
  remaining.sort();
  let mut expected = vec![ended_recently.instance, waiting.instance];
  expected.sort();
  assert_eq!(remaining, expected);

  let announced: Vec<TaskStatus> = std::iter::from_fn(|| observer.try_recv()).map(|task| task.status).collect();
  assert_eq!(announced, vec![TaskStatus::Deleted, TaskStatus::Deleted]);
}

#[tokio::test]
async fn statistics_cover_the_whole_table() {
  let (table, service) = setup();
  let now = Utc::now();
  let mut waiting = stored(&timestamp::format(now - Duration::seconds(10)), "");
  waiting.routing_key.clear();
  assert_ok!(table.create(&waiting).await);

  let stats = service.statistics_at(now).await.unwrap();
  assert_eq!(stats.tasks.queued, 1);
  assert_eq!(stats.tasks.wait_time().mean(), "10.000");
  assert!(stats.routing_keys.is_empty());
  assert!(stats.workers.is_empty());
}

/// Table whose writes always fail, for checking error propagation.
struct BrokenTable;

#[async_trait]
impl TaskTable for BrokenTable {
  async fn create(&self, _task: &Task) -> Result<()> {
    Err(Error::Storage(sqlx::Error::PoolClosed))
  }

  async fn save(&self, _task: &Task) -> Result<()> {
    Err(Error::Storage(sqlx::Error::PoolClosed))
  }

  async fn delete(&self, _task: &Task) -> Result<()> {
    Err(Error::Storage(sqlx::Error::PoolClosed))
  }

  async fn find(&self, _filter: &TaskFilter) -> Result<Vec<Task>> {
    Ok(Vec::new())
  }
}

#[tokio::test]
async fn storage_failures_propagate_without_announcing_saves() {
  let service = TaskService::new(Arc::new(BrokenTable), Broadcast::new());
  let mut observer = service.broadcast().subscribe();

  let result = service.handle_event(event(EventKind::Queued, Uuid::new_v4(), "")).await;
  assert!(matches!(result, Err(Error::Storage(_))));
  assert!(observer.try_recv().is_none());

  let task = stored(&timestamp::now(), "");
  assert_err!(service.delete_task(task.clone()).await);
  assert_eq!(observer.try_recv().map(|task| task.instance), Some(task.instance));
}

#[tokio::test]
async fn concurrent_events_for_one_instance_leave_one_task() {
  let table = Arc::new(MemoryTaskTable::new());
  let service = Arc::new(TaskService::new(table.clone(), Broadcast::new()));
  let instance = Uuid::new_v4();

  let mut handles = Vec::new();
  for i in 0..20 {
    let service = service.clone();
    let kind = if i % 2 == 0 { EventKind::Started } else { EventKind::Finished };
    handles.push(tokio::spawn(async move {
      service.handle_event(event(kind, instance, "w1")).await
    }));
  }
  for handle in handles {
    assert_ok!(handle.await.unwrap());
  }

  assert_eq!(table.len(), 1);
  let task = service.get_task(instance).await.unwrap();
  assert!(matches!(task.status, TaskStatus::Running | TaskStatus::Passed));
}
