pub mod date;
pub mod filename;
pub mod mover;
pub mod sort;
pub mod sync;
pub mod tags;

pub use filename::{check_tags, format_filename, parse_filename, FilenameError, ParsedFilename};
pub use sort::{sort_files, SortOptions, SortOutcome, SortResult, SortStatus};
pub use sync::{sync_file, sync_files, SyncOptions, SyncOutcome, SyncReport, TagsNotWritten};
pub use tags::{
    normalize_tags, CommandTagStore, MemoryTagStore, NoopTagStore, TagStore, TagStoreError,
    DEFAULT_TAG_EXE,
};
