//! Output formatting shared by the subcommands.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Unix seconds as RFC 3339, or the raw number if out of range.
pub fn format_timestamp(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(time) => time.to_rfc3339(),
        None => ts.to_string(),
    }
}

pub fn now_unix() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

pub fn status_marker(ok: bool) -> &'static str {
    if ok {
        "\x1b[32m✓\x1b[0m"
    } else {
        "\x1b[31m✗\x1b[0m"
    }
}
