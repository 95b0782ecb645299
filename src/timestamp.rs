//! Fixed-width task timestamps.
//!
//! Tasks carry their transition times as `YYYY-MM-DD HH:MM:SS.mmm` strings in
//! UTC. The width never varies, so ordering two timestamps as strings gives the
//! same answer as ordering them as instants. The reclamation sweep and the
//! running-task lookup both rely on that.

use chrono::{DateTime, NaiveDateTime, Utc};

const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn format(at: DateTime<Utc>) -> String {
  at.format(FORMAT).to_string()
}

pub fn now() -> String {
  format(Utc::now())
}

/// Accepts the rendered format with or without the fractional part.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
  NaiveDateTime::parse_from_str(value, PARSE_FORMAT)
    .ok()
    .map(|naive| naive.and_utc())
}
