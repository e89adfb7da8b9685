use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// `[YYYY-MM-DD--][--]<name>[__<tags>].<ext>`
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<date>\d{4}-\d{2}-\d{2})--)?(?:--)?(?P<name>.*?)(?:__(?P<tags>[\w\- ]*?))?(?P<ext>\.\w+)$",
    )
    .unwrap()
});

/// A single tag that survives a trip through the tag block.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w\- ]+$").unwrap());

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("Malformed filename: {0}")]
    Malformed(String),
    #[error("Invalid date prefix '{date}' in {filename}")]
    InvalidDate { filename: String, date: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Tag '{0}' cannot be encoded in a filename")]
    UnencodableTag(String),
}

/// Date, name and tags decoded from a filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedFilename {
    pub date: Option<NaiveDate>,
    /// Stem plus extension, without date prefix or tag block
    pub base_name: String,
    pub tags: BTreeSet<String>,
}

impl ParsedFilename {
    /// Render back into the canonical filename layout.
    pub fn to_filename(&self) -> Result<String, FilenameError> {
        format_filename(&self.base_name, self.date, &self.tags)
    }
}

/// Decode `YYYY-MM-DD--name__tag1_tag2.ext`.
///
/// Date prefix and tag block are both optional; the extension is not.
/// Tags may contain spaces and hyphens, and are split on `_`.
pub fn parse_filename(filename: &str) -> Result<ParsedFilename, FilenameError> {
    let caps = FILENAME_RE
        .captures(filename)
        .ok_or_else(|| FilenameError::Malformed(filename.to_string()))?;

    let date = match caps.name("date") {
        Some(m) => Some(NaiveDate::parse_from_str(m.as_str(), DATE_FORMAT).map_err(|_| {
            FilenameError::InvalidDate {
                filename: filename.to_string(),
                date: m.as_str().to_string(),
            }
        })?),
        None => None,
    };

    let tags: BTreeSet<String> = caps
        .name("tags")
        .map(|m| {
            m.as_str()
                .split('_')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedFilename {
        date,
        base_name: format!("{}{}", &caps["name"], &caps["ext"]),
        tags,
    })
}

/// Encode a base name, optional date and tag set into a filename.
///
/// Tags are written in sorted order so the same set always produces the
/// same name. Nothing is escaped.
pub fn format_filename<I>(
    base_name: &str,
    date: Option<NaiveDate>,
    tags: I,
) -> Result<String, FilenameError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    if base_name.is_empty() {
        return Err(FilenameError::InvalidArgument("base name is empty"));
    }

    let (stem, ext) = split_extension(base_name);

    let mut out = String::with_capacity(base_name.len() + 16);
    if let Some(d) = date {
        out.push_str(&d.format(DATE_FORMAT).to_string());
        out.push_str("--");
    }
    out.push_str(stem);

    let sorted: BTreeSet<String> = tags
        .into_iter()
        .map(|t| t.as_ref().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if !sorted.is_empty() {
        out.push_str("__");
        out.push_str(&sorted.into_iter().collect::<Vec<_>>().join("_"));
    }

    out.push_str(ext);
    Ok(out)
}

/// Reject tags that [`parse_filename`] would read back differently.
///
/// `_` separates tags, and anything outside letters, digits, `-` and space
/// ends the tag block early.
pub fn check_tags<I>(tags: I) -> Result<(), FilenameError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    for tag in tags {
        let tag = tag.as_ref();
        if tag.contains('_') || !TAG_RE.is_match(tag) {
            return Err(FilenameError::UnencodableTag(tag.to_string()));
        }
    }
    Ok(())
}

/// Split at the last `.`; the extension keeps its dot.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}
