//! The replicated log.
//!
//! Index 0 always holds [`LogEntry::sentinel`] at term 0, so `parent_log_index
//! == 0` is a valid "no real predecessor yet" case for `AppendEntries`
//! without needing an `Option` at every call site. Real entries start at
//! index 1.

use super::types::{LogEntry, Term};

/// Append-only (until truncated by a conflicting leader) sequence of
/// [`LogEntry`] values.
#[derive(Debug, Clone)]
pub struct ReplicationLog {
    entries: Vec<LogEntry>,
}

impl ReplicationLog {
    /// A fresh log containing only the sentinel at index 0.
    pub fn new() -> Self {
        Self {
            entries: vec![LogEntry::sentinel()],
        }
    }

    /// Index of the last entry, sentinel included.
    pub fn last_index(&self) -> u64 {
        (self.entries.len() - 1) as u64
    }

    /// Term of the last entry.
    pub fn last_term(&self) -> Term {
        self.entries.last().expect("sentinel always present").term
    }

    /// Term stored at `index`, if it exists.
    pub fn term_at(&self, index: u64) -> Option<Term> {
        self.entries.get(index as usize).map(|e| e.term)
    }

    /// The entry at `index`, if it exists.
    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    /// Whether `index` names a real, populated slot (sentinel excluded if
    /// `index == 0`, but the sentinel itself is a valid match target for
    /// `parent_log_index == 0`).
    pub fn contains(&self, index: u64) -> bool {
        (index as usize) < self.entries.len()
    }

    /// All entries strictly after `index`, in order. Used to answer an
    /// `AppendEntries` call by slicing the requested suffix.
    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .skip(index as usize + 1)
            .cloned()
            .collect()
    }

    /// Append a single entry, returning its new index.
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Drop every entry at or after `from_index`, used when a follower
    /// discovers a conflicting entry and must discard its divergent suffix.
    /// `from_index` must be >= 1; the sentinel is never truncated.
    pub fn truncate_suffix(&mut self, from_index: u64) {
        let from_index = from_index.max(1) as usize;
        if from_index < self.entries.len() {
            self.entries.truncate(from_index);
        }
    }

    /// Apply `new_entries` starting right after `parent_index`, truncating
    /// any conflicting suffix first. Mirrors the follower-side half of log
    /// matching: the leader already proved `parent_index`/`parent_term`
    /// line up before calling this.
    pub fn splice_from(&mut self, parent_index: u64, new_entries: Vec<LogEntry>) {
        self.truncate_suffix(parent_index + 1);
        for entry in new_entries {
            self.append(entry);
        }
    }
}

impl Default for ReplicationLog {
    fn default() -> Self {
        Self::new()
    }
}
