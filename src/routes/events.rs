use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tracing::{debug, error, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::service::TaskService;

use super::with_service;

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn events_route(service: Arc<TaskService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("api" / "v1" / "tasks" / "events")
    .and(warp::ws())
    .and(with_service(service))
    .map(|ws: Ws, service: Arc<TaskService>| ws.on_upgrade(move |socket| stream_events(socket, service)))
}

/// Pushes every task mutation to the socket as JSON until either side goes
/// away. Incoming frames are only read to notice the disconnect.
async fn stream_events(socket: WebSocket, service: Arc<TaskService>) {
  let mut subscription = service.broadcast().subscribe();
  let id = subscription.id();
  let (mut outgoing, mut incoming) = socket.split();
  debug!("Observer {} connected", id);

  loop {
    tokio::select! {
      task = subscription.recv() => {
        let Some(task) = task else { break };
        let payload = match serde_json::to_string(&task) {
          Ok(payload) => payload,
          Err(e) => {
            error!("Failed to encode task {}: {:?}", task.instance, e);
            continue;
          }
        };
        match tokio::time::timeout(WRITE_TIMEOUT, outgoing.send(Message::text(payload))).await {
          Ok(Ok(())) => {}
          Ok(Err(e)) => {
            debug!("Observer {} write failed: {}", id, e);
            break;
          }
          Err(_) => {
            warn!("Observer {} write timed out", id);
            break;
          }
        }
      }
      message = incoming.next() => match message {
        Some(Ok(message)) if message.is_close() => break,
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          debug!("Observer {} read failed: {}", id, e);
          break;
        }
        None => break,
      },
    }
  }

  drop(subscription);
  let _ = outgoing.close().await;
  debug!("Observer {} disconnected", id);
}
