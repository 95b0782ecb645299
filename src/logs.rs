use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error};
use warp::hyper::body::Bytes;

use crate::error::{Error, Result};
use crate::models::Task;

/// Log content streamed from wherever the worker uploaded it.
pub struct TaskLog {
  pub content_type: Option<String>,
  pub body: BoxStream<'static, reqwest::Result<Bytes>>,
}

#[derive(Clone)]
pub struct LogFetcher {
  client: Client,
}

impl LogFetcher {
  /// `timeout` bounds connecting and every read of the upstream body, so a
  /// silent log host ends as a gateway failure instead of a hung request.
  pub fn new(accept_invalid_certs: bool, timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .danger_accept_invalid_certs(accept_invalid_certs)
      .connect_timeout(timeout)
      .read_timeout(timeout)
      .build()?;
    Ok(Self { client })
  }

  pub async fn fetch_log(&self, task: &Task) -> Result<TaskLog> {
    if task.log.is_empty() {
      return Err(Error::NotFound(task.instance));
    }
    debug!("Fetching log for task {} from {}", task.instance, task.log);
    let response = self
      .client
      .get(&task.log)
      .send()
      .await
      .and_then(|response| response.error_for_status())
      .map_err(|e| {
        error!("Log fetch for task {} failed: {:?}", task.instance, e);
        Error::LogFetch(e)
      })?;
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .map(str::to_string);
    Ok(TaskLog {
      content_type,
      body: response.bytes_stream().boxed(),
    })
  }
}
