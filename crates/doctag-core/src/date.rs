use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate};
use filetime::FileTime;

/// Local calendar date of the file's last modification.
pub fn modified_date(path: &Path) -> anyhow::Result<NaiveDate> {
    let meta = fs::metadata(path).with_context(|| format!("Cannot stat {}", path.display()))?;
    let mtime = FileTime::from_last_modification_time(&meta);
    let utc = DateTime::from_timestamp(mtime.unix_seconds(), mtime.nanoseconds())
        .with_context(|| format!("Modification time of {} out of range", path.display()))?;
    Ok(utc.with_timezone(&Local).date_naive())
}

/// Date from the filename if present, otherwise from the filesystem.
pub fn resolve_date(parsed: Option<NaiveDate>, path: &Path) -> anyhow::Result<NaiveDate> {
    match parsed {
        Some(date) => Ok(date),
        None => modified_date(path),
    }
}
