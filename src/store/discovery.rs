//! Input document discovery

use crate::error::{Error, Result};
use crate::types::DocumentRef;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Suffix appended to the input name to derive the default output directory
pub const OUTPUT_SUFFIX: &str = "_脱水";

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[0-9]+").ok());

/// Inclusive range of chapter numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRange {
    /// First chapter included
    pub start: u64,
    /// Last chapter included
    pub end: u64,
}

impl ChapterRange {
    /// Create a range; bounds are swapped if given in reverse
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Whether `n` lies in the range
    pub fn contains(&self, n: u64) -> bool {
        (self.start..=self.end).contains(&n)
    }
}

impl std::str::FromStr for ChapterRange {
    type Err = Error;

    /// Parse `"start-end"`, e.g. `"1-10"`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Discovery(format!("invalid chapter range '{s}', expected 'start-end'"));
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse().map_err(|_| invalid())?;
        let end = end.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(start, end))
    }
}

/// Options for [`discover_documents`]
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Keep only files whose first number falls in this range
    pub range: Option<ChapterRange>,
    /// Directory never descended into (normally the output directory)
    pub exclude: Option<PathBuf>,
    /// Keep only the first N documents
    pub limit: Option<usize>,
}

/// First run of ASCII digits in the file name of `path`
pub fn first_number(path: &Path) -> Option<u64> {
    let name = path.file_stem()?.to_str()?;
    NUMBER.as_ref()?.find(name)?.as_str().parse().ok()
}

/// Output directory used when none is configured
///
/// `<dir>/<dir name>_脱水` for a directory input, `<parent>/<file stem>_脱水`
/// for a single file.
pub fn default_output_dir(input: &Path) -> PathBuf {
    if input.is_dir() {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        input.join(format!("{name}{OUTPUT_SUFFIX}"))
    } else {
        let stem = input
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}{OUTPUT_SUFFIX}"))
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
}

/// Enumerate `.txt` documents under `input`
///
/// A file input yields itself. Directory inputs are walked recursively, skipping
/// `options.exclude`, and sorted by their first number, then by path, so
/// `chapter_2` comes before `chapter_10`.
///
/// # Errors
///
/// Returns [`Error::Discovery`] if `input` does not exist.
pub fn discover_documents(input: &Path, options: &DiscoveryOptions) -> Result<Vec<DocumentRef>> {
    if !input.exists() {
        return Err(Error::Discovery(format!("input {} does not exist", input.display())));
    }

    let mut paths: Vec<PathBuf> = if input.is_file() {
        vec![input.to_path_buf()]
    } else {
        let exclude = options.exclude.as_deref();
        WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| exclude.is_none_or(|ex| entry.path() != ex))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_text_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    };

    if let Some(range) = options.range {
        paths.retain(|p| first_number(p).is_some_and(|n| range.contains(n)));
    }

    paths.sort_by(|a, b| {
        first_number(a)
            .unwrap_or(u64::MAX)
            .cmp(&first_number(b).unwrap_or(u64::MAX))
            .then_with(|| a.cmp(b))
    });

    if let Some(limit) = options.limit {
        if paths.len() > limit {
            tracing::info!(limit, found = paths.len(), "Test mode: truncating document list");
            paths.truncate(limit);
        }
    }

    tracing::info!(input = %input.display(), documents = paths.len(), "Discovered documents");
    Ok(paths.into_iter().map(DocumentRef::new).collect())
}
