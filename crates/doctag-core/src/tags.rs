//! Filesystem ("finder") tags attached to files outside their names.
//!
//! The rest of the crate only sees the [`TagStore`] trait, so the helper
//! executable can be swapped for an in-memory store or disabled entirely.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Helper executable used when nothing else is configured.
pub const DEFAULT_TAG_EXE: &str = "tag";

#[derive(Error, Debug)]
pub enum TagStoreError {
    #[error("Failed to run {exe}: {source}")]
    Io {
        exe: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{exe} failed for {path} ({status}): {stderr}")]
    Command {
        exe: String,
        path: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("Tag '{0}' contains a comma and cannot be stored")]
    Unencodable(String),
    #[error("Tag helper returned non UTF-8 output for {0}")]
    InvalidOutput(PathBuf),
}

/// Reads and writes the tag set attached to a file.
pub trait TagStore: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<BTreeSet<String>, TagStoreError>;
    fn write_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), TagStoreError>;
}

/// Trim, NFC-normalize and drop empty tags.
///
/// Filenames on macOS come back decomposed (NFD) while the tag helper
/// reports composed strings; without normalization the same umlaut tag
/// would appear twice in a merged set.
pub fn normalize_tags<I>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().nfc().collect::<String>())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Shells out to a `tag`-compatible helper (`--list --no-name` / `--set`).
#[derive(Debug, Clone)]
pub struct CommandTagStore {
    exe: PathBuf,
}

impl Default for CommandTagStore {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_EXE)
    }
}

impl CommandTagStore {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    fn run<I, S>(&self, args: I, path: &Path) -> Result<Vec<u8>, TagStoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let exe = self.exe.display().to_string();
        let output = Command::new(&self.exe)
            .args(args)
            .arg(path)
            .output()
            .map_err(|source| TagStoreError::Io {
                exe: exe.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TagStoreError::Command {
                exe,
                path: path.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl TagStore for CommandTagStore {
    fn read_tags(&self, path: &Path) -> Result<BTreeSet<String>, TagStoreError> {
        let stdout = self.run(["--list", "--no-name"], path)?;
        let text =
            String::from_utf8(stdout).map_err(|_| TagStoreError::InvalidOutput(path.to_path_buf()))?;
        Ok(normalize_tags(text.trim().split(',')))
    }

    fn write_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), TagStoreError> {
        // The helper's list format is comma separated; a comma inside a tag
        // would silently turn into two tags.
        if let Some(bad) = tags.iter().find(|t| t.contains(',')) {
            return Err(TagStoreError::Unencodable(bad.clone()));
        }
        let joined = tags.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        self.run(["--set", joined.as_str()], path)?;
        Ok(())
    }
}

/// Store for platforms without finder tags: nothing in, nothing out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTagStore;

impl TagStore for NoopTagStore {
    fn read_tags(&self, _path: &Path) -> Result<BTreeSet<String>, TagStoreError> {
        Ok(BTreeSet::new())
    }

    fn write_tags(&self, _path: &Path, _tags: &BTreeSet<String>) -> Result<(), TagStoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTagStore {
    tags: Mutex<HashMap<PathBuf, BTreeSet<String>>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I>(&self, path: impl Into<PathBuf>, tags: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.tags
            .lock()
            .unwrap()
            .insert(path.into(), normalize_tags(tags));
    }

    pub fn get(&self, path: &Path) -> Option<BTreeSet<String>> {
        self.tags.lock().unwrap().get(path).cloned()
    }
}

impl TagStore for MemoryTagStore {
    fn read_tags(&self, path: &Path) -> Result<BTreeSet<String>, TagStoreError> {
        Ok(self.get(path).unwrap_or_default())
    }

    fn write_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), TagStoreError> {
        self.tags
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), tags.clone());
        Ok(())
    }
}
