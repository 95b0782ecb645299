use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::{Filter, Rejection, Reply};

use crate::error::Error;
use crate::logs::LogFetcher;
use crate::service::TaskService;

pub mod events;
pub mod tasks;

impl warp::reject::Reject for Error {}

pub fn routes(
  service: Arc<TaskService>,
  logs: LogFetcher,
  static_dir: PathBuf,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  let api = events::events_route(service.clone())
    .or(tasks::submit_route(service.clone()))
    .or(tasks::list_route(service.clone()))
    .or(tasks::log_route(service.clone(), logs))
    .or(tasks::get_route(service.clone()))
    .or(tasks::delete_route(service.clone()))
    .or(tasks::statistics_route(service));

  let index = static_dir.join("index.html");
  let assets = warp::get()
    .and(outside_api())
    .and(warp::fs::dir(static_dir).or(warp::fs::file(index)));

  api
    .or(assets)
    .recover(handle_rejection)
    .with(warp::log::custom(|request| {
      info!(
        "{:>6} {} {} {:?}",
        request.method(),
        request.path(),
        request.status().as_u16(),
        request.elapsed()
      );
    }))
}

/// Client-side routes fall back to index.html, API paths never do.
fn outside_api() -> impl Filter<Extract = (), Error = Rejection> + Clone {
  warp::path::full()
    .and_then(|path: FullPath| async move {
      if path.as_str().starts_with("/api/") {
        Err(warp::reject::not_found())
      } else {
        Ok(())
      }
    })
    .untuple_one()
}

pub(crate) fn with_service(
  service: Arc<TaskService>,
) -> impl Filter<Extract = (Arc<TaskService>,), Error = Infallible> + Clone {
  warp::any().map(move || service.clone())
}

pub(crate) fn status_of(err: &Error) -> StatusCode {
  match err {
    Error::Malformed(_) => StatusCode::BAD_REQUEST,
    Error::NotFound(_) => StatusCode::NOT_FOUND,
    Error::Conflict(_) => StatusCode::CONFLICT,
    Error::LogFetch(_) => StatusCode::BAD_GATEWAY,
    Error::Storage(_) | Error::InvalidRecord(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
  let (status, message) = if let Some(err) = rejection.find::<Error>() {
    let status = status_of(err);
    let message = match status {
      StatusCode::INTERNAL_SERVER_ERROR => {
        error!("Request failed: {}", err);
        "internal server error".to_string()
      }
      StatusCode::NOT_FOUND => "not found".to_string(),
      _ => err.to_string(),
    };
    (status, message)
  } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, format!("bad request: {}", err))
  } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
    (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
  } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
    (StatusCode::LENGTH_REQUIRED, "length required".to_string())
  } else if rejection.is_not_found() {
    (StatusCode::NOT_FOUND, "not found".to_string())
  } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
  } else {
    error!("Unhandled rejection: {:?}", rejection);
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
  };
  Ok(warp::reply::with_status(message, status))
}
