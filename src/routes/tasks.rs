use std::sync::Arc;

use uuid::Uuid;
use warp::http::Response;
use warp::hyper::Body;
use warp::http::header::{CONTENT_TYPE, HeaderValue};
use warp::{Filter, Rejection, Reply};

use crate::error::Error;
use crate::logs::LogFetcher;
use crate::models::TaskEvent;
use crate::service::TaskService;

use super::with_service;

const MAX_EVENT_BYTES: u64 = 64 * 1024;

fn with_logs(logs: LogFetcher) -> impl Filter<Extract = (LogFetcher,), Error = std::convert::Infallible> + Clone {
  warp::any().map(move || logs.clone())
}

fn parse_instance(id: &str) -> Result<Uuid, Rejection> {
  Uuid::parse_str(id).map_err(|e| warp::reject::custom(Error::Malformed(format!("task id '{}': {}", id, e))))
}

pub fn submit_route(service: Arc<TaskService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "tasks")
    .and(warp::post())
    .and(warp::body::content_length_limit(MAX_EVENT_BYTES))
    .and(warp::body::json())
    .and(with_service(service))
    .and_then(handle_submit_event)
}

pub fn list_route(service: Arc<TaskService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "tasks")
    .and(warp::get())
    .and(with_service(service))
    .and_then(handle_list_tasks)
}

pub fn get_route(service: Arc<TaskService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "tasks" / String)
    .and(warp::get())
    .and(with_service(service))
    .and_then(handle_get_task)
}

pub fn delete_route(service: Arc<TaskService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "tasks" / String)
    .and(warp::delete())
    .and(with_service(service))
    .and_then(handle_delete_task)
}

pub fn log_route(
  service: Arc<TaskService>,
  logs: LogFetcher,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "tasks" / String / "log")
    .and(warp::get())
    .and(with_service(service))
    .and(with_logs(logs))
    .and_then(handle_task_log)
}

pub fn statistics_route(service: Arc<TaskService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "statistics")
    .and(warp::get())
    .and(with_service(service))
    .and_then(handle_statistics)
}

async fn handle_submit_event(event: TaskEvent, service: Arc<TaskService>) -> Result<impl Reply, Rejection> {
  let task = service.handle_event(event).await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&task))
}

async fn handle_list_tasks(service: Arc<TaskService>) -> Result<impl Reply, Rejection> {
  let tasks = service.get_tasks().await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&tasks))
}

async fn handle_get_task(id: String, service: Arc<TaskService>) -> Result<impl Reply, Rejection> {
  let instance = parse_instance(&id)?;
  let task = service.get_task(instance).await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&task))
}

async fn handle_delete_task(id: String, service: Arc<TaskService>) -> Result<impl Reply, Rejection> {
  let instance = parse_instance(&id)?;
  service.delete_instance(instance).await.map_err(warp::reject::custom)?;
  Ok(warp::reply())
}

async fn handle_task_log(id: String, service: Arc<TaskService>, logs: LogFetcher) -> Result<impl Reply, Rejection> {
  let instance = parse_instance(&id)?;
  let task = service.get_task(instance).await.map_err(warp::reject::custom)?;
  let log = logs.fetch_log(&task).await.map_err(warp::reject::custom)?;

  let mut response = Response::new(Body::wrap_stream(log.body));
  if let Some(content_type) = log.content_type.and_then(|value| HeaderValue::from_str(&value).ok()) {
    response.headers_mut().insert(CONTENT_TYPE, content_type);
  }
  Ok(response)
}

async fn handle_statistics(service: Arc<TaskService>) -> Result<impl Reply, Rejection> {
  let stats = service.statistics().await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&stats))
}
