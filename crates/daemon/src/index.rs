//! The in-memory filesystem name index: `INDEX_START` / `INDEX_STATUS` /
//! `SEARCH_INDEX` / `INDEX_CANCEL`.
//!
//! One [`IndexStore`] is shared by the whole daemon (owned by
//! [`crate::server::Daemon`], cloned into every session). A scan clears it,
//! walks every root, skipping `dev`/`proc`/`sys` at any depth, and inserts
//! one entry per discovered file or directory; `ready` only flips to true
//! once the scan completes, so a query racing a scan sees either the old
//! complete index (if `ready` was already true) or `RESP_ERROR` (if this is
//! the first scan).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use dashmap::DashMap;

use crate::error::DaemonError;
use crate::progress::ProgressEmitter;

/// Leaf directory names skipped at any depth during a scan.
const SKIPPED_LEAVES: [&str; 3] = ["dev", "proc", "sys"];

/// One discovered filesystem entry.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Absolute path.
    pub path: PathBuf,
    /// The path's final component, cached so search doesn't re-derive it.
    pub name: String,
    /// File size in bytes; 0 for directories.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
    /// Whether this entry is a directory.
    pub is_dir: bool,
}

/// The shared, process-wide index.
#[derive(Clone, Default)]
pub struct IndexStore {
    entries: Arc<DashMap<PathBuf, IndexEntry>>,
    indexing: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    scanned_count: Arc<AtomicU64>,
}

impl IndexStore {
    /// Creates an empty, not-yet-scanned index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a scan is currently running.
    #[must_use]
    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::Acquire)
    }

    /// Whether a completed scan is available to search.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of entries currently held (meaningful mid-scan too, since
    /// entries are inserted incrementally).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders `INDEX_STATUS`'s human-readable summary.
    #[must_use]
    pub fn status_summary(&self) -> String {
        if self.is_indexing() {
            format!("indexing ({} entries so far)", self.scanned_count.load(Ordering::Acquire))
        } else if self.is_ready() {
            format!("ready ({} entries)", self.entries.len())
        } else {
            "not started".to_string()
        }
    }

    /// Clears the index, spawns a background walk over `roots`, and
    /// returns immediately — `INDEX_START`'s handler replies `RESP_OK`
    /// without waiting for the scan.
    ///
    /// `roots` is the comma-separated list already split by the caller.
    /// `progress` emits a `PROGRESS` frame every
    /// [`crate::progress::SCAN_COUNT_THRESHOLD`] entries or
    /// [`crate::progress::SCAN_TIME_THRESHOLD`]; the caller is responsible
    /// for sending the terminal frame once the returned handle completes.
    pub fn start_scan(
        &self,
        roots: Vec<PathBuf>,
        mut progress: ProgressEmitter,
    ) -> tokio::task::JoinHandle<u64> {
        self.entries.clear();
        self.ready.store(false, Ordering::Release);
        self.indexing.store(true, Ordering::Release);
        self.scanned_count.store(0, Ordering::Release);

        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for root in roots {
                walk(&root, &store, &mut total, &mut progress);
            }
            store.indexing.store(false, Ordering::Release);
            store.ready.store(true, Ordering::Release);
            total
        })
    }

    /// Searches the index for entries matching `query`, capped at
    /// [`MAX_SEARCH_RESULTS`]. Returns `Err` if no scan has ever completed.
    pub fn search(&self, query: &str) -> Result<Vec<IndexEntry>, DaemonError> {
        if !self.is_ready() {
            return Err(DaemonError::protocol("index is not ready"));
        }

        let parsed = ParsedQuery::parse(query);
        let mut results = Vec::new();
        for entry in self.entries.iter() {
            if results.len() >= MAX_SEARCH_RESULTS {
                break;
            }
            if parsed.matches(entry.value()) {
                results.push(entry.value().clone());
            }
        }
        Ok(results)
    }
}

/// `SEARCH_INDEX` returns at most this many matches.
pub const MAX_SEARCH_RESULTS: usize = 1000;

fn walk(path: &Path, store: &IndexStore, total: &mut u64, progress: &mut ProgressEmitter) {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return;
    };

    let is_dir = metadata.is_dir();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if SKIPPED_LEAVES.contains(&name.as_str()) {
        return;
    }

    let size = if is_dir { 0 } else { metadata.len() };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());

    store.entries.insert(
        path.to_path_buf(),
        IndexEntry {
            path: path.to_path_buf(),
            name,
            size,
            mtime,
            is_dir,
        },
    );
    *total += 1;
    store.scanned_count.store(*total, Ordering::Release);
    let _ = progress.tick(*total, 1);

    if is_dir {
        if let Ok(children) = std::fs::read_dir(path) {
            for child in children.flatten() {
                walk(&child.path(), store, total, progress);
            }
        }
    }
}

/// A parsed `SEARCH_INDEX` query: an optional min/max size filter plus a
/// wildcard name pattern.
struct ParsedQuery {
    min_size: Option<u64>,
    max_size: Option<u64>,
    pattern: String,
}

impl ParsedQuery {
    fn parse(query: &str) -> Self {
        let mut min_size = None;
        let mut max_size = None;
        let mut pattern = "*".to_string();

        for token in query.split_whitespace() {
            if let Some(rest) = token.strip_prefix("size:>") {
                if let Some(bytes) = parse_size(rest) {
                    min_size = Some(bytes);
                    continue;
                }
            }
            if let Some(rest) = token.strip_prefix("size:<") {
                if let Some(bytes) = parse_size(rest) {
                    max_size = Some(bytes);
                    continue;
                }
            }
            pattern = token.to_string();
        }

        Self {
            min_size,
            max_size,
            pattern,
        }
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(min) = self.min_size {
            if entry.size <= min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if entry.size >= max {
                return false;
            }
        }

        let pattern = self.pattern.to_ascii_lowercase();
        wildcard_match(&pattern, &entry.name.to_ascii_lowercase())
            || wildcard_match(&pattern, &entry.path.to_string_lossy().to_ascii_lowercase())
    }
}

/// Parses a `size:` filter's numeric suffix: digits followed by an
/// optional case-insensitive `K`/`M`/`G` unit (bytes if absent).
fn parse_size(text: &str) -> Option<u64> {
    let (digits, multiplier) = match text.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&text[..text.len() - 1], 1024),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&text[..text.len() - 1], 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'g') => (&text[..text.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'b') && text.len() > 1 => {
            return parse_size(&text[..text.len() - 1]);
        }
        _ => (text, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

/// Case-sensitive `*`/`?` wildcard match (callers lower-case both sides for
/// case-insensitive matching). `*` matches any run of characters including
/// none; `?` matches exactly one character.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    wildcard_match_inner(&pattern, &text)
}

fn wildcard_match_inner(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            wildcard_match_inner(&pattern[1..], text)
                || (!text.is_empty() && wildcard_match_inner(pattern, &text[1..]))
        }
        Some('?') => !text.is_empty() && wildcard_match_inner(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && wildcard_match_inner(&pattern[1..], &text[1..]),
    }
}
