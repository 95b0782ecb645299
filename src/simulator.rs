//! Load generator: keeps ten task slots busy across ten fake workers and
//! reports their lifecycles to a running taskboard.

use std::env;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use uuid::Uuid;

const ROUTING_KEYS: [&str; 2] = ["default", "test"];
const NAMES: [&str; 8] = ["onion", "cucumber", "orange", "banana", "apple", "squash", "gridlock", "majo"];
const SLOTS: usize = 10;
const WORKERS: usize = 10;
const LOG_URL: &str = "https://ftp.sunet.se/mirror/archive/ftp.sunet.se/pub/simtelnet/CDROMS.TXT";

struct SimulatedTask {
  identity: String,
  instance: Uuid,
  name: &'static str,
  routing_key: &'static str,
  worker: String,
  started: bool,
}

impl SimulatedTask {
  fn random(rng: &mut impl Rng) -> Self {
    let instance = Uuid::new_v4();
    let identity = format!("{:x}", Sha256::digest(Uuid::new_v4().as_bytes()));
    Self {
      identity,
      instance,
      name: NAMES.choose(rng).copied().unwrap_or("onion"),
      routing_key: ROUTING_KEYS.choose(rng).copied().unwrap_or("default"),
      worker: format!("worker-{}", rng.random_range(0..WORKERS)),
      started: false,
    }
  }
}

async fn post(client: &reqwest::Client, url: &str, task: &SimulatedTask, event: &str) {
  let role = if event == "queued" { "client" } else { "worker" };
  let result = client
    .post(url)
    .json(&json!({
      "event": event,
      "hostname": task.worker,
      "identity": task.identity,
      "instance": task.instance,
      "name": task.name,
      "role": role,
      "routing_key": task.routing_key,
      "log": LOG_URL,
    }))
    .send()
    .await
    .and_then(|response| response.error_for_status());
  match result {
    Ok(_) => info!("{} {} ({})", event, task.instance, task.name),
    Err(e) => error!("Failed to report {} for {}: {:?}", event, task.instance, e),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let host = env::args().nth(1).unwrap_or_else(|| "localhost:8080".into());
  let url = format!("http://{}/api/v1/tasks", host);
  let client = reqwest::Client::new();
  let mut slots: Vec<Option<SimulatedTask>> = (0..SLOTS).map(|_| None).collect();

  loop {
    let (slot, roll) = {
      let mut rng = rand::rng();
      (rng.random_range(0..SLOTS), rng.random_range(0..3))
    };

    match slots[slot].take() {
      None => {
        let task = SimulatedTask::random(&mut rand::rng());
        post(&client, &url, &task, "queued").await;
        slots[slot] = Some(task);
      }
      Some(mut task) if !task.started => {
        if roll > 0 {
          post(&client, &url, &task, "started").await;
          task.started = true;
          slots[slot] = Some(task);
        } else {
          post(&client, &url, &task, "cancelled").await;
        }
      }
      Some(task) => {
        let outcome = if roll % 2 == 0 { "finished" } else { "failed" };
        post(&client, &url, &task, outcome).await;
      }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
  }
}
