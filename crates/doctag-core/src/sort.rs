use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::date::resolve_date;
use crate::filename::{check_tags, parse_filename, FilenameError, ParsedFilename};
use crate::mover::{place, relocate, Placement};
use crate::sync::{file_name_str, join};
use crate::tags::{normalize_tags, TagStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortOptions {
    /// Root of the `YYYY/MM` tree
    pub output: PathBuf,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStatus {
    /// Dry run: would be moved to `destination`
    Planned,
    Moved,
    /// Source, or an identical copy, already sits at `destination`
    AlreadySorted,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SortOutcome {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub tags: BTreeSet<String>,
    pub status: SortStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SortResult {
    pub total: u64,
    pub moved: u64,
    pub skipped: u64,
    pub failed: u64,
    pub outcomes: Vec<SortOutcome>,
}

impl SortResult {
    fn push(&mut self, outcome: SortOutcome) {
        self.total += 1;
        match outcome.status {
            SortStatus::Moved | SortStatus::Planned => self.moved += 1,
            SortStatus::AlreadySorted => self.skipped += 1,
            SortStatus::Failed(_) => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Everything known about a file before a destination is picked.
struct Draft {
    dir: PathBuf,
    base_name: String,
    date: NaiveDate,
    tags: BTreeSet<String>,
}

/// `<output>/<YYYY>/<MM>`
pub fn bucket_dir(output: &Path, date: NaiveDate) -> PathBuf {
    output
        .join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
}

/// Decode the name, falling back to "no date, no tags, name as-is" for
/// names the codec cannot read.
fn parse_or_fallback(name: &str) -> anyhow::Result<ParsedFilename> {
    match parse_filename(name) {
        Ok(parsed) => Ok(parsed),
        Err(FilenameError::Malformed(_)) => {
            warn!("{}: no date/tag layout, using file timestamp", name);
            Ok(ParsedFilename {
                date: None,
                base_name: name.to_string(),
                tags: BTreeSet::new(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn draft(path: &Path, output: &Path, store: &dyn TagStore) -> anyhow::Result<Draft> {
    if !path.is_file() {
        bail!("{} not found", path.display());
    }
    let parsed = parse_or_fallback(file_name_str(path)?)?;
    let date = resolve_date(parsed.date, path)?;

    let finder_tags = store
        .read_tags(path)
        .with_context(|| format!("Cannot read tags of {}", path.display()))?;
    let tags = normalize_tags(finder_tags.iter().chain(parsed.tags.iter()));
    check_tags(&tags)?;

    Ok(Draft {
        dir: bucket_dir(output, date),
        base_name: parsed.base_name,
        date,
        tags,
    })
}

fn failed(source: &Path, err: &anyhow::Error) -> SortOutcome {
    error!("{}: {:#}", source.display(), err);
    SortOutcome {
        source: source.to_path_buf(),
        destination: None,
        tags: BTreeSet::new(),
        status: SortStatus::Failed(format!("{:#}", err)),
    }
}

/// Move documents into `<output>/<YYYY>/<MM>/` under their canonical name.
///
/// Tags and dates are gathered in parallel; destinations are then assigned
/// one file at a time so two inputs never claim the same name.
pub fn sort_files(
    files: &[PathBuf],
    store: &dyn TagStore,
    options: &SortOptions,
) -> anyhow::Result<SortResult> {
    if !options.output.is_dir() {
        bail!("Output directory {} does not exist", options.output.display());
    }
    debug!("Destination: {}", options.output.display());

    // Phase 1: read names, timestamps and finder tags
    let drafts: Vec<(&PathBuf, anyhow::Result<Draft>)> = files
        .par_iter()
        .map(|f| (f, draft(f, &options.output, store)))
        .collect();

    // Phase 2: assign destinations and move (sequential - needs collision tracking)
    let mut taken: HashSet<PathBuf> = HashSet::new();
    let mut result = SortResult::default();

    for (source, draft) in drafts {
        info!("{}", source.display());
        let draft = match draft {
            Ok(d) => d,
            Err(e) => {
                result.push(failed(source, &e));
                continue;
            }
        };

        let placement = match place(
            source,
            &draft.dir,
            &draft.base_name,
            Some(draft.date),
            &draft.tags,
            &taken,
        ) {
            Ok(p) => p,
            Err(e) => {
                result.push(failed(source, &e));
                continue;
            }
        };
        taken.insert(placement.path().to_path_buf());

        let status = match &placement {
            Placement::Identical(dest) => {
                info!("{} already sorted as {}", source.display(), dest.display());
                SortStatus::AlreadySorted
            }
            Placement::Free(dest) => {
                info!("=> {}", dest.display());
                debug!("Setting finder tags to: {}", join(&draft.tags));
                if options.dry_run {
                    SortStatus::Planned
                } else {
                    let moved = relocate(source, dest).and_then(|()| {
                        store
                            .write_tags(dest, &draft.tags)
                            .with_context(|| format!("Cannot write tags of {}", dest.display()))
                    });
                    match moved {
                        Ok(()) => SortStatus::Moved,
                        Err(e) => {
                            error!("{}: {:#}", source.display(), e);
                            SortStatus::Failed(format!("{:#}", e))
                        }
                    }
                }
            }
        };

        result.push(SortOutcome {
            source: source.clone(),
            destination: Some(placement.path().to_path_buf()),
            tags: draft.tags,
            status,
        });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::MemoryTagStore;
    use chrono::{Local, TimeZone};
    use filetime::FileTime;
    use std::fs;
    use tempfile::tempdir;

    fn write_dated(path: &Path, contents: &[u8], y: i32, m: u32, d: u32) {
        fs::write(path, contents).unwrap();
        let t = Local.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap();
        filetime::set_file_mtime(path, FileTime::from_unix_time(t.timestamp(), 0)).unwrap();
    }

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let archive = dir.path().join("archive");
        fs::create_dir_all(&inbox).unwrap();
        fs::create_dir_all(&archive).unwrap();
        (dir, inbox, archive)
    }

    #[test]
    fn test_bucket_dir() {
        let d = NaiveDate::from_ymd_opt(2018, 8, 1).unwrap();
        assert_eq!(
            bucket_dir(Path::new("/out"), d),
            PathBuf::from("/out/2018/08")
        );
    }

    #[test]
    fn test_sort_by_filename_date() {
        let (_dir, inbox, archive) = setup();
        let file = inbox.join("2018-08-01--3482274514__google_invoice.pdf");
        write_dated(&file, b"pdf", 2020, 6, 6);

        let store = MemoryTagStore::new();
        store.insert(&file, ["paid"]);

        let options = SortOptions { output: archive.clone(), dry_run: false };
        let result = sort_files(&[file.clone()], &store, &options).unwrap();

        let dest = archive
            .join("2018")
            .join("08")
            .join("2018-08-01--3482274514__google_invoice_paid.pdf");
        assert_eq!(result.moved, 1);
        assert_eq!(result.outcomes[0].destination.as_ref(), Some(&dest));
        assert!(dest.exists());
        assert!(!file.exists());
        assert_eq!(store.get(&dest).unwrap().len(), 3);
    }

    #[test]
    fn test_sort_falls_back_to_mtime() {
        let (_dir, inbox, archive) = setup();
        let plain = inbox.join("scan.pdf");
        write_dated(&plain, b"a", 2016, 11, 30);
        let no_ext = inbox.join("README");
        write_dated(&no_ext, b"b", 2015, 1, 2);

        let options = SortOptions { output: archive.clone(), dry_run: false };
        let result = sort_files(&[plain, no_ext], &MemoryTagStore::new(), &options).unwrap();

        assert_eq!(result.moved, 2);
        assert!(archive.join("2016/11/2016-11-30--scan.pdf").exists());
        assert!(archive.join("2015/01/README").exists());
    }

    #[test]
    fn test_sort_extensionless_name_is_stable() {
        let (_dir, inbox, archive) = setup();
        let file = inbox.join("README");
        write_dated(&file, b"b", 2015, 1, 2);

        let store = MemoryTagStore::new();
        store.insert(&file, ["x"]);

        let options = SortOptions { output: archive.clone(), dry_run: false };
        let result = sort_files(&[file.clone()], &store, &options).unwrap();
        let dest = archive.join("2015").join("01").join("README");
        assert_eq!(result.outcomes[0].status, SortStatus::Moved);
        assert_eq!(result.outcomes[0].destination.as_ref(), Some(&dest));
        assert_eq!(store.get(&dest).unwrap().len(), 1);

        // sorting the sorted file again leaves it alone
        let again = sort_files(&[dest.clone()], &store, &options).unwrap();
        assert_eq!(again.outcomes[0].status, SortStatus::AlreadySorted);
        assert_eq!(again.outcomes[0].destination.as_ref(), Some(&dest));
        assert!(dest.exists());
        assert_eq!(fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_sort_rejects_tags_the_name_cannot_hold() {
        let (_dir, inbox, archive) = setup();
        let file = inbox.join("2018-08-01--scan.pdf");
        write_dated(&file, b"a", 2018, 8, 1);

        let store = MemoryTagStore::new();
        store.insert(&file, ["v1.0"]);

        let options = SortOptions { output: archive.clone(), dry_run: false };
        let result = sort_files(&[file.clone()], &store, &options).unwrap();
        assert_eq!(result.failed, 1);
        assert!(matches!(
            &result.outcomes[0].status,
            SortStatus::Failed(msg) if msg.contains("v1.0")
        ));
        assert!(file.exists());
        assert!(!archive.join("2018").exists());
    }

    #[test]
    fn test_sort_dry_run() {
        let (_dir, inbox, archive) = setup();
        let file = inbox.join("scan__a.pdf");
        write_dated(&file, b"a", 2016, 11, 30);

        let options = SortOptions { output: archive.clone(), dry_run: true };
        let result = sort_files(&[file.clone()], &MemoryTagStore::new(), &options).unwrap();

        assert_eq!(result.outcomes[0].status, SortStatus::Planned);
        assert!(file.exists());
        assert!(!archive.join("2016").exists());
    }

    #[test]
    fn test_sort_collisions_and_duplicates() {
        let (_dir, inbox, archive) = setup();
        let month = archive.join("2018").join("08");
        fs::create_dir_all(&month).unwrap();
        fs::write(month.join("2018-08-01--scan.pdf"), b"existing").unwrap();

        let sub = inbox.join("sub");
        fs::create_dir_all(&sub).unwrap();
        let first = inbox.join("2018-08-01--scan.pdf");
        let second = sub.join("2018-08-01--scan.pdf");
        let dup = inbox.join("2018-08-01--scan__.pdf");
        fs::write(&first, b"one").unwrap();
        fs::write(&second, b"two").unwrap();
        fs::write(&dup, b"existing").unwrap();

        let options = SortOptions { output: archive.clone(), dry_run: false };
        let result = sort_files(
            &[first, second, dup.clone()],
            &MemoryTagStore::new(),
            &options,
        )
        .unwrap();

        assert_eq!(result.moved, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(fs::read(month.join("2018-08-01--scan(1).pdf")).unwrap(), b"one");
        assert_eq!(fs::read(month.join("2018-08-01--scan(2).pdf")).unwrap(), b"two");
        assert_eq!(result.outcomes[2].status, SortStatus::AlreadySorted);
        assert!(dup.exists());
    }

    #[test]
    fn test_sort_reports_bad_files() {
        let (_dir, inbox, archive) = setup();
        let missing = inbox.join("missing.pdf");
        let bad_date = inbox.join("9999-99-99--scan.pdf");
        fs::write(&bad_date, b"x").unwrap();

        let options = SortOptions { output: archive, dry_run: false };
        let result = sort_files(&[missing, bad_date.clone()], &MemoryTagStore::new(), &options)
            .unwrap();

        assert_eq!(result.failed, 2);
        assert!(bad_date.exists());
        assert!(matches!(result.outcomes[1].status, SortStatus::Failed(_)));
    }

    #[test]
    fn test_sort_requires_output_dir() {
        let (dir, _inbox, _archive) = setup();
        let options = SortOptions {
            output: dir.path().join("nope"),
            dry_run: false,
        };
        assert!(sort_files(&[], &MemoryTagStore::new(), &options).is_err());
    }
}
