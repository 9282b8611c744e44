//! Line formatting for decoded readings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use tsim_core::Reading;

use crate::error::Result;

/// Output format for one reading per line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Renders epoch milliseconds as RFC 3339, or `None` for the
/// clock-unavailable sentinel and other unrepresentable values.
pub fn rfc3339(timestamp_ms: i64) -> Option<String> {
    if timestamp_ms < 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(flatten)]
    reading: &'a Reading,
    time: Option<String>,
}

pub fn format_reading(reading: &Reading, format: OutputFormat) -> Result<String> {
    let time = rfc3339(reading.timestamp_ms);
    match format {
        OutputFormat::Human => Ok(format!("{}  {}", time.as_deref().unwrap_or("-"), reading)),
        OutputFormat::Json => Ok(serde_json::to_string(&JsonLine { reading, time })?),
    }
}
