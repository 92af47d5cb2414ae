use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const SCHEMA_VERSION: u32 = 1;

/// A contributor as a `(name, email)` pair.
///
/// On a raw [`CommitRecord`] this is whatever the VCS recorded; after mailmap
/// resolution it is the canonical identity used for grouping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelta {
    pub added: u64,
    pub removed: u64,
}

impl LineDelta {
    pub fn new(added: u64, removed: u64) -> Self {
        Self { added, removed }
    }
}

/// One parsed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub author: Identity,
    pub timestamp: DateTime<Utc>,
    pub is_merge: bool,
    pub paths: BTreeMap<String, LineDelta>,
}

impl CommitRecord {
    pub fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }

    pub fn lines_added(&self) -> u64 {
        self.paths.values().map(|d| d.added).sum()
    }

    pub fn lines_removed(&self) -> u64 {
        self.paths.values().map(|d| d.removed).sum()
    }
}

/// Counters shared by contributor and path aggregates.
///
/// `merge` is associative and commutative: counters add, first time takes
/// the minimum and last time the maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub file_count: u64,
    pub first_commit_time: Option<DateTime<Utc>>,
    pub last_commit_time: Option<DateTime<Utc>>,
}

impl Stats {
    pub fn lines_changed(&self) -> u64 {
        self.lines_added + self.lines_removed
    }

    pub fn is_empty(&self) -> bool {
        self.commits == 0
    }

    pub fn record_commit(&mut self, timestamp: DateTime<Utc>, delta: LineDelta) {
        self.commits += 1;
        self.lines_added += delta.added;
        self.lines_removed += delta.removed;
        self.observe_time(timestamp);
    }

    pub fn merge(&mut self, other: &Stats) {
        self.commits += other.commits;
        self.lines_added += other.lines_added;
        self.lines_removed += other.lines_removed;
        self.file_count += other.file_count;
        self.first_commit_time = min_time(self.first_commit_time, other.first_commit_time);
        self.last_commit_time = max_time(self.last_commit_time, other.last_commit_time);
    }

    fn observe_time(&mut self, timestamp: DateTime<Utc>) {
        self.first_commit_time = min_time(self.first_commit_time, Some(timestamp));
        self.last_commit_time = max_time(self.last_commit_time, Some(timestamp));
    }
}

fn min_time(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn max_time(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

pub type ContributorStats = Stats;

/// Aggregate for a single file path, plus who contributed to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathStats {
    pub stats: Stats,
    pub contributors: BTreeMap<Identity, Stats>,
}

impl PathStats {
    pub fn merge(&mut self, other: &PathStats) {
        self.stats.merge(&other.stats);
        for (identity, stats) in &other.contributors {
            self.contributors
                .entry(identity.clone())
                .or_default()
                .merge(stats);
        }
    }
}

/// Final result of the aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub contributors: BTreeMap<Identity, ContributorStats>,
    pub paths: BTreeMap<String, PathStats>,
}

/// Identity-resolved commit history as persisted in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u32,
    pub commits: Vec<CommitRecord>,
    /// Files present at the tip of the analysed range.
    pub tree_paths: Vec<String>,
}

impl HistorySnapshot {
    pub fn new(mut commits: Vec<CommitRecord>, mut tree_paths: Vec<String>) -> Self {
        commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.hash.cmp(&b.hash)));
        tree_paths.sort();
        tree_paths.dedup();
        Self {
            version: SCHEMA_VERSION,
            commits,
            tree_paths,
        }
    }
}

/// Half-open time window: `since` is inclusive, `until` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new() -> Self {
        Self { since: None, until: None }
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        if let Some(since) = self.since {
            if timestamp < &since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if timestamp >= &until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub name: String,
    pub email: String,
    pub commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub file_count: u64,
    pub first_commit_time: Option<DateTime<Utc>>,
    pub last_commit_time: Option<DateTime<Utc>>,
}

impl TableRow {
    pub fn new(identity: &Identity, stats: &ContributorStats) -> Self {
        Self {
            name: identity.name.clone(),
            email: identity.email.clone(),
            commits: stats.commits,
            lines_added: stats.lines_added,
            lines_removed: stats.lines_removed,
            file_count: stats.file_count,
            first_commit_time: stats.first_commit_time,
            last_commit_time: stats.last_commit_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub hash: String,
    pub short_hash: String,
    pub name: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
    pub is_merge: bool,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub files: Vec<String>,
}

impl HistoryEntry {
    pub fn new(record: &CommitRecord) -> Self {
        Self {
            hash: record.hash.clone(),
            short_hash: record.short_hash().to_string(),
            name: record.author.name.clone(),
            email: record.author.email.clone(),
            timestamp: record.timestamp,
            is_merge: record.is_merge,
            lines_added: record.lines_added(),
            lines_removed: record.lines_removed(),
            files: record.paths.keys().cloned().collect(),
        }
    }
}
