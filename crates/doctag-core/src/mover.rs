use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::filename::{format_filename, split_extension};

/// Where a file should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Nothing occupies this path yet.
    Free(PathBuf),
    /// The source itself, or a byte-identical copy, is already there.
    Identical(PathBuf),
}

impl Placement {
    pub fn path(&self) -> &Path {
        match self {
            Placement::Free(p) | Placement::Identical(p) => p,
        }
    }
}

/// `scan.pdf` -> `scan(2).pdf`
fn with_counter(base_name: &str, counter: u32) -> String {
    let (stem, ext) = split_extension(base_name);
    format!("{}({}){}", stem, counter, ext)
}

/// Pick a destination in `dir` for `source` under its canonical name.
///
/// Paths in `taken` (claimed by earlier files of the same run) and paths on
/// disk with different content are skipped by appending `(n)` to the stem,
/// which keeps the result parseable.
///
/// A name without an extension cannot carry a date or tags, so it is kept
/// as-is and only ever gets the counter.
pub fn place(
    source: &Path,
    dir: &Path,
    base_name: &str,
    date: Option<NaiveDate>,
    tags: &BTreeSet<String>,
    taken: &HashSet<PathBuf>,
) -> anyhow::Result<Placement> {
    let verbatim = split_extension(base_name).1.is_empty();
    let mut counter = 0u32;
    loop {
        let name = if counter == 0 {
            base_name.to_string()
        } else {
            with_counter(base_name, counter)
        };
        let candidate = if verbatim {
            dir.join(name)
        } else {
            dir.join(format_filename(&name, date, tags)?)
        };
        counter += 1;

        if taken.contains(&candidate) {
            continue;
        }
        if candidate == source {
            return Ok(Placement::Identical(candidate));
        }
        if candidate.exists() {
            if same_content(source, &candidate)? {
                return Ok(Placement::Identical(candidate));
            }
            continue;
        }
        return Ok(Placement::Free(candidate));
    }
}

/// SHA-256 of a file, hex encoded.
pub fn file_digest(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Size check first, hash only when sizes agree.
pub fn same_content(a: &Path, b: &Path) -> anyhow::Result<bool> {
    let (meta_a, meta_b) = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => (ma, mb),
        _ => return Ok(false),
    };
    if !meta_a.is_file() || !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(file_digest(a)? == file_digest(b)?)
}

/// Move `source` to `dest`, never replacing an existing file.
///
/// Falls back to copy + delete when a plain rename is refused (e.g. across
/// filesystems); the copy keeps the original modification time.
pub fn relocate(source: &Path, dest: &Path) -> anyhow::Result<()> {
    if dest.exists() {
        bail!("Refusing to overwrite {}", dest.display());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }

    let rename_err = match fs::rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    tracing::debug!("rename {} failed ({}), copying", source.display(), rename_err);

    let meta = fs::metadata(source)
        .with_context(|| format!("Cannot move {}: {}", source.display(), rename_err))?;
    fs::copy(source, dest).with_context(|| {
        format!("Cannot copy {} to {}", source.display(), dest.display())
    })?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dest, mtime).ok();
    fs::remove_file(source).with_context(|| format!("Cannot remove {}", source.display()))?;
    Ok(())
}
