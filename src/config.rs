use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::service::Retention;

#[derive(Debug, Clone)]
pub struct Config {
  /// Postgres URL. Without one, tasks live in memory only.
  pub database_url: Option<String>,
  pub server_port: u16,
  pub static_dir: PathBuf,
  pub gc_interval: Duration,
  pub retention: Retention,
  pub log_accept_invalid_certs: bool,
  /// Connect and read timeout for the log proxy.
  pub log_timeout: Duration,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let defaults = Retention::default();
    Ok(Self {
      database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
      server_port: parse_or(&lookup, "SERVER_PORT", 8080)?,
      static_dir: lookup("STATIC_DIR").unwrap_or_else(|| "static".into()).into(),
      gc_interval: positive_secs(&lookup, "GC_INTERVAL_SECS", 60)?,
      retention: Retention {
        queued: Duration::from_secs(parse_or(&lookup, "QUEUED_RETENTION_SECS", defaults.queued.as_secs())?),
        ended: Duration::from_secs(parse_or(&lookup, "ENDED_RETENTION_SECS", defaults.ended.as_secs())?),
      },
      log_accept_invalid_certs: parse_or(&lookup, "LOG_ACCEPT_INVALID_CERTS", false)?,
      log_timeout: positive_secs(&lookup, "LOG_TIMEOUT_SECS", 30)?,
    })
  }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match lookup(key) {
    Some(value) => value
      .trim()
      .parse()
      .with_context(|| format!("invalid value '{}' for {}", value, key)),
    None => Ok(default),
  }
}

/// Periods and timeouts: zero would spin the timer or fail every request.
fn positive_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
  match parse_or(lookup, key, default)? {
    0 => bail!("{} must be greater than zero", key),
    secs => Ok(Duration::from_secs(secs)),
  }
}
