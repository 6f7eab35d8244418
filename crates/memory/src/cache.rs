//! In-memory view of every known memory file.
//!
//! The cache is the fast path for all reads. It never talks to the remote
//! store itself: callers decide when to fall back.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

/// Revision token held by a record whose write has not been confirmed remotely.
pub const PENDING_REVISION: &str = "pending";

/// Category of paths without a slash.
pub const ROOT_CATEGORY: &str = "root";

const SNIPPET_MAX_CHARS: usize = 150;
const SNIPPET_CHARS_BEFORE: usize = 50;
const SNIPPET_CHARS_AFTER: usize = 100;
const ELLIPSIS: &str = "...";

/// A cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
    pub revision: String,
}

impl FileRecord {
    pub fn is_pending(&self) -> bool {
        self.revision == PENDING_REVISION
    }

    /// The revision to hand to the remote store, `None` while unconfirmed.
    pub fn known_revision(&self) -> Option<&str> {
        (!self.is_pending()).then_some(self.revision.as_str())
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub snippet: String,
}

#[derive(Debug, Default)]
struct Entries {
    /// Paths in first-insertion order
    order: Vec<String>,
    records: HashMap<String, FileRecord>,
}

/// Path → record map preserving insertion order.
///
/// Every method takes the lock for its whole duration and never awaits, so
/// each call is atomic with respect to other tasks.
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<Entries>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<FileRecord> {
        self.read().records.get(path).cloned()
    }

    /// Insert or overwrite the record for `path`.
    pub fn set(&self, path: &str, content: &str, revision: &str) {
        let mut entries = self.write();
        let record = FileRecord {
            path: path.to_string(),
            content: content.to_string(),
            revision: revision.to_string(),
        };
        if entries.records.insert(path.to_string(), record).is_none() {
            entries.order.push(path.to_string());
        }
    }

    /// Remove the record for `path`. Returns whether anything was removed.
    pub fn delete(&self, path: &str) -> bool {
        self.remove(path).is_some()
    }

    /// Remove and return the record for `path`.
    pub fn remove(&self, path: &str) -> Option<FileRecord> {
        let mut entries = self.write();
        let record = entries.records.remove(path)?;
        entries.order.retain(|p| p != path);
        Some(record)
    }

    /// Stamp `revision` onto the record for `path` if it still holds `content`.
    ///
    /// Returns `false` when the record was deleted or overwritten with newer
    /// content since the write being confirmed was issued.
    pub fn confirm(&self, path: &str, content: &str, revision: &str) -> bool {
        let mut entries = self.write();
        match entries.records.get_mut(path) {
            Some(record) if record.content == content => {
                record.revision = revision.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn entries(&self) -> Vec<FileRecord> {
        let entries = self.read();
        entries
            .order
            .iter()
            .filter_map(|path| entries.records.get(path).cloned())
            .collect()
    }

    /// Distinct first path segments, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.read()
            .order
            .iter()
            .map(|path| category_of(path).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut entries = self.write();
        entries.order.clear();
        entries.records.clear();
    }

    /// Case-insensitive substring search over paths, then contents.
    ///
    /// Results follow insertion order. A record whose path matches is reported
    /// once and its content is not scanned for the match position.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let needle = fold(query);
        let entries = self.read();

        entries
            .order
            .iter()
            .filter_map(|path| entries.records.get(path))
            .filter_map(|record| {
                let snippet = if find_folded(&fold(&record.path), &needle).is_some() {
                    leading_snippet(&record.content)
                } else if find_folded(&fold(&record.content), &needle).is_some() {
                    extract_snippet(&record.content, query)
                } else {
                    return None;
                };
                Some(SearchHit {
                    path: record.path.clone(),
                    snippet,
                })
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// First slash-delimited segment of a path, or `root` for top-level files.
pub fn category_of(path: &str) -> &str {
    match path.split_once('/') {
        Some((category, _)) => category,
        None => ROOT_CATEGORY,
    }
}

/// Excerpt of `content` around the first case-insensitive occurrence of `query`.
///
/// Content of at most 150 characters is returned whole. Longer content is cut
/// to 50 characters before the match through 100 characters after it, with an
/// ellipsis on each side that does not reach the content boundary.
pub fn extract_snippet(content: &str, query: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= SNIPPET_MAX_CHARS {
        return content.to_string();
    }

    let needle = fold(query);
    let Some(index) = find_folded(&fold(content), &needle) else {
        return leading_snippet(content);
    };

    let start = index.saturating_sub(SNIPPET_CHARS_BEFORE);
    let end = (index + needle.len() + SNIPPET_CHARS_AFTER).min(chars.len());

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Content of at most 150 characters, or its first 150 followed by an ellipsis.
fn leading_snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SNIPPET_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}{}", head, ELLIPSIS)
    } else {
        head
    }
}

/// Lowercase char-by-char so indices line up with the original text.
fn fold(text: &str) -> Vec<char> {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

fn find_folded(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
