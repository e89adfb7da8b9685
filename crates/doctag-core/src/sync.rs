use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::date::resolve_date;
use crate::filename::{check_tags, format_filename, parse_filename};
use crate::mover::relocate;
use crate::tags::{normalize_tags, TagStore, TagStoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Compute names and tags without touching anything
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub date: NaiveDate,
    pub tags: BTreeSet<String>,
    pub renamed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub synced: Vec<SyncOutcome>,
    pub failed: Vec<(PathBuf, String)>,
}

/// The rename went through; only writing the finder tags failed.
#[derive(Error, Debug)]
#[error("Renamed to {} but cannot write its tags", destination.display())]
pub struct TagsNotWritten {
    pub destination: PathBuf,
    #[source]
    pub source: TagStoreError,
}

pub(crate) fn file_name_str(path: &Path) -> anyhow::Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no UTF-8 file name", path.display()))
}

/// Bring a file's name and its finder tags in line with each other.
///
/// Both end up carrying the union of the two tag sets, and the name gets a
/// date prefix (from the modification time if it had none).
pub fn sync_file(
    path: &Path,
    store: &dyn TagStore,
    options: &SyncOptions,
) -> anyhow::Result<SyncOutcome> {
    info!("{}", path.display());
    if !path.is_file() {
        bail!("File {} does not exist", path.display());
    }

    let finder_tags = store
        .read_tags(path)
        .with_context(|| format!("Cannot read tags of {}", path.display()))?;
    debug!("Finder tags: {}", join(&finder_tags));

    let parsed = parse_filename(file_name_str(path)?)?;
    debug!("Filename tags: {}", join(&parsed.tags));

    let tags = normalize_tags(finder_tags.iter().chain(parsed.tags.iter()));
    debug!("Combined tags: {}", join(&tags));
    check_tags(&tags)?;

    let date = resolve_date(parsed.date, path)?;
    let new_name = format_filename(&parsed.base_name, Some(date), &tags)?;
    debug!("New filename: {}", new_name);

    let destination = match path.parent() {
        Some(parent) => parent.join(&new_name),
        None => PathBuf::from(&new_name),
    };
    let renamed = destination != path;

    if !options.dry_run {
        if renamed {
            info!("{} => {}", path.display(), destination.display());
            relocate(path, &destination)?;
        }
        if let Err(source) = store.write_tags(&destination, &tags) {
            if renamed {
                return Err(TagsNotWritten {
                    destination,
                    source,
                }
                .into());
            }
            return Err(source)
                .with_context(|| format!("Cannot write tags of {}", destination.display()));
        }
    }

    Ok(SyncOutcome {
        source: path.to_path_buf(),
        destination,
        date,
        tags,
        renamed,
    })
}

/// Sync every file, continuing past individual failures.
///
/// A failure is recorded under the path the file has when the run ends.
pub fn sync_files(files: &[PathBuf], store: &dyn TagStore, options: &SyncOptions) -> SyncReport {
    let mut report = SyncReport::default();
    for file in files {
        match sync_file(file, store, options) {
            Ok(outcome) => report.synced.push(outcome),
            Err(e) => {
                error!("{}: {:#}", file.display(), e);
                let path = match e.downcast_ref::<TagsNotWritten>() {
                    Some(partial) => partial.destination.clone(),
                    None => file.clone(),
                };
                report.failed.push((path, format!("{:#}", e)));
            }
        }
    }
    report
}

pub(crate) fn join(tags: &BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
