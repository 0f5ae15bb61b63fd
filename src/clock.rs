//! Small wall-clock helpers shared by [`crate::limiter`] and
//! [`crate::monitor`], both of which need "now" expressed as both absolute
//! epoch-seconds (the bucket id space) and an ISO-8601 string (the log
//! schema, §6).

use chrono::{DateTime, Local};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as absolute epoch-seconds.
#[must_use]
pub(crate) fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// ISO-8601 rendering of `epoch_seconds`, in local time, matching the
/// original's `datetime.fromtimestamp(...).isoformat()`.
#[must_use]
pub(crate) fn iso_timestamp(epoch_seconds: i64) -> String {
    let since_epoch = Duration::from_secs(epoch_seconds.max(0) as u64);
    DateTime::<Local>::from(UNIX_EPOCH + since_epoch).to_rfc3339()
}
