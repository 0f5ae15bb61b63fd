//! Reads the persisted log (§6) back into [`MinuteBucket`]s.
//!
//! The hot path (§7) never returns a `Result`; this is the one place the
//! crate does, because a malformed or missing log has no safe default to
//! fall back to the way a dropped log line does.

use crate::bucket::SecondBucket;
use crate::minute::MinuteBucket;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure modes for reading a persisted log back into memory.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The log directory contained no `*.log` files.
    #[error("no ratellmiter log files found in {0}")]
    NoLogFiles(PathBuf),
    /// A log file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A line in a log file was not a valid `MinuteBucket` record.
    #[error("failed to parse line {line} of {path}: {source}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse every line of `path` into [`MinuteBucket`]s, in file order.
pub fn load_session(path: impl AsRef<Path>) -> Result<Vec<MinuteBucket>, ReplayError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ReplayError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| ReplayError::MalformedLine {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Replay the most recently started monitor session found under `log_directory`.
///
/// Log files are named `<start-epoch-seconds>.log` (§6); "latest" is the one
/// with the greatest numeric stem.
pub fn replay_latest(log_directory: impl AsRef<Path>) -> Result<Vec<MinuteBucket>, ReplayError> {
    let log_directory = log_directory.as_ref();
    let entries = fs::read_dir(log_directory).map_err(|source| ReplayError::Unreadable {
        path: log_directory.to_path_buf(),
        source,
    })?;

    let latest = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("log"))
        .filter_map(|entry| {
            let stem: i64 = entry.path().file_stem()?.to_str()?.parse().ok()?;
            Some((stem, entry.path()))
        })
        .max_by_key(|(stem, _)| *stem)
        .map(|(_, path)| path)
        .ok_or_else(|| ReplayError::NoLogFiles(log_directory.to_path_buf()))?;

    load_session(latest)
}

/// Drop trailing seconds from `minute` that saw no activity at all,
/// supplementing the replayed data the way the original's
/// `trim_inactive_seconds` prepares a minute for graphing: the graphing tool
/// itself stays out of scope, but the trimming is useful to any consumer of
/// replayed data on its own.
#[must_use]
pub fn trim_trailing_inactive_seconds(minute: &MinuteBucket) -> Vec<SecondBucket> {
    let mut seconds = minute.seconds.clone();
    while matches!(seconds.last(), Some(second) if !second.had_activity()) {
        seconds.pop();
    }
    seconds
}
