use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::{FromRow, PgPool, Pool, Postgres, QueryBuilder};
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Task, TaskStatus};
use crate::table::{TaskFilter, TaskTable};

static MIGRATOR: Migrator = sqlx::migrate!();

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

const COLUMNS: &str =
  "instance, name, identity, routing_key, worker, status, queued, started, ended, log";

pub async fn setup_database(database_url: &str) -> anyhow::Result<Pool<Postgres>> {
  let pool = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    Pool::<Postgres>::connect(database_url)
  })
    .await?;

  MIGRATOR.run(&pool).await?;
  info!("Database migrations complete");
  Ok(pool)
}

#[derive(FromRow)]
struct TaskRow {
  instance: Uuid,
  name: String,
  identity: String,
  routing_key: String,
  worker: String,
  status: String,
  queued: String,
  started: String,
  ended: String,
  log: String,
}

impl TryFrom<TaskRow> for Task {
  type Error = Error;

  fn try_from(row: TaskRow) -> Result<Self> {
    let status: TaskStatus = row.status.parse().map_err(Error::InvalidRecord)?;
    Ok(Task {
      instance: row.instance,
      name: row.name,
      identity: row.identity,
      routing_key: row.routing_key,
      worker: row.worker,
      status,
      queued: row.queued,
      started: row.started,
      ended: row.ended,
      log: row.log,
    })
  }
}

pub struct PgTaskTable {
  pool: PgPool,
}

impl PgTaskTable {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  async fn insert(&self, task: &Task, upsert: bool) -> Result<()> {
    let mut query = insert_query(task, upsert);
    query.build().execute(&self.pool).await.map_err(|e| match e {
      sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::Conflict(task.instance),
      other => Error::Storage(other),
    })?;
    Ok(())
  }
}

fn insert_query(task: &Task, upsert: bool) -> QueryBuilder<'static, Postgres> {
  let mut query = QueryBuilder::<Postgres>::new(format!("INSERT INTO tasks ({}) ", COLUMNS));
  query.push_values(std::iter::once(task), |mut row, task| {
    row
      .push_bind(task.instance)
      .push_bind(task.name.clone())
      .push_bind(task.identity.clone())
      .push_bind(task.routing_key.clone())
      .push_bind(task.worker.clone())
      .push_bind(task.status.as_str().to_string())
      .push_bind(task.queued.clone())
      .push_bind(task.started.clone())
      .push_bind(task.ended.clone())
      .push_bind(task.log.clone());
  });
  if upsert {
    query.push(
      " ON CONFLICT (instance) DO UPDATE SET name = EXCLUDED.name, identity = EXCLUDED.identity, \
       routing_key = EXCLUDED.routing_key, worker = EXCLUDED.worker, status = EXCLUDED.status, \
       queued = EXCLUDED.queued, started = EXCLUDED.started, ended = EXCLUDED.ended, log = EXCLUDED.log",
    );
  }
  query
}

fn select_query(filter: &TaskFilter) -> QueryBuilder<'static, Postgres> {
  let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM tasks", COLUMNS));
  push_filter(&mut query, filter);
  query.push(" ORDER BY queued");
  query
}

/// Appends the WHERE clause for `filter`. Timestamps compare as text.
fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
  match filter {
    TaskFilter::All => {}
    TaskFilter::Instance(instance) => {
      query.push(" WHERE instance = ").push_bind(*instance);
    }
    TaskFilter::RunningOn(worker) => {
      query
        .push(" WHERE worker = ")
        .push_bind(worker.clone())
        .push(" AND started <> '' AND ended = ''");
    }
    TaskFilter::Expired {
      queued_before,
      ended_before,
    } => {
      query
        .push(" WHERE (queued < ")
        .push_bind(queued_before.clone())
        .push(") OR (ended <> '' AND ended < ")
        .push_bind(ended_before.clone())
        .push(")");
    }
  }
}

#[async_trait]
impl TaskTable for PgTaskTable {
  async fn create(&self, task: &Task) -> Result<()> {
    self.insert(task, false).await
  }

  async fn save(&self, task: &Task) -> Result<()> {
    self.insert(task, true).await
  }

  async fn delete(&self, task: &Task) -> Result<()> {
    sqlx::query("DELETE FROM tasks WHERE instance = $1")
      .bind(task.instance)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
    let mut query = select_query(filter);
    let rows: Vec<TaskRow> = query.build_query_as().fetch_all(&self.pool).await?;
    rows.into_iter().map(Task::try_from).collect()
  }
}
