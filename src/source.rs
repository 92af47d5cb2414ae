//! Pluggable commit data sources.

use crate::error::{GwhoError, Result};
use crate::mailmap::MailmapSources;
use crate::model::CommitRecord;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Revision expressions selecting the commits to analyse, e.g. `HEAD`,
/// `v1.0..main` or `^old main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevRange {
    pub revs: Vec<String>,
}

impl Default for RevRange {
    fn default() -> Self {
        Self {
            revs: vec!["HEAD".to_string()],
        }
    }
}

impl RevRange {
    pub fn new<I, S>(revs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let revs: Vec<String> = revs.into_iter().map(Into::into).collect();
        if revs.is_empty() {
            Self::default()
        } else {
            Self { revs }
        }
    }

    /// Splits the expressions into tips to walk from and tips whose
    /// ancestry is excluded. `a..b` yields `b` and excludes `a`; an empty
    /// side of `..` means `HEAD`.
    pub fn split(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for rev in &self.revs {
            let rev = rev.trim();
            if rev.is_empty() {
                return Err(GwhoError::InvalidFilter("empty revision".into()));
            }
            if rev.contains("...") {
                return Err(GwhoError::InvalidFilter(format!(
                    "symmetric difference is not supported: {rev}"
                )));
            }
            if let Some((from, to)) = rev.split_once("..") {
                exclude.push(or_head(from));
                include.push(or_head(to));
            } else if let Some(excluded) = rev.strip_prefix('^') {
                exclude.push(excluded.to_string());
            } else {
                include.push(rev.to_string());
            }
        }

        if include.is_empty() {
            include.push("HEAD".to_string());
        }
        Ok((include, exclude))
    }
}

fn or_head(side: &str) -> String {
    if side.is_empty() {
        "HEAD".to_string()
    } else {
        side.to_string()
    }
}

pub type CommitIter<'a> = Box<dyn Iterator<Item = Result<CommitRecord>> + 'a>;

/// Anything that can enumerate commits for a revision range.
///
/// Records are raw: authors are as recorded, not yet mailmapped.
pub trait CommitSource {
    /// Value that changes whenever the commits selected by `range` change.
    fn state_fingerprint(&self, range: &RevRange) -> Result<String>;

    /// Lazily yields the commits reachable from `range`. Any `Err` item is
    /// fatal for the run; records that cannot be decoded should be reported
    /// as [`GwhoError::DataSource`](crate::error::GwhoError::DataSource).
    fn commits(&self, range: &RevRange) -> Result<CommitIter<'_>>;

    /// Files present at the tip of `range`.
    fn tree_paths(&self, range: &RevRange) -> Result<Vec<String>>;

    fn mailmap_sources(&self) -> MailmapSources;

    /// Directory the source lives in; used to namespace the cache.
    fn root(&self) -> Option<PathBuf> {
        None
    }
}

/// Fixed list of commits, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub records: Vec<CommitRecord>,
    pub tree_paths: Vec<String>,
    pub mailmap: MailmapSources,
}

impl MemorySource {
    pub fn new(records: Vec<CommitRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_tree_paths(mut self, paths: Vec<String>) -> Self {
        self.tree_paths = paths;
        self
    }

    pub fn with_mailmap(mut self, sources: MailmapSources) -> Self {
        self.mailmap = sources;
        self
    }
}

impl CommitSource for MemorySource {
    fn state_fingerprint(&self, range: &RevRange) -> Result<String> {
        let mut hasher = Sha256::new();
        for rev in &range.revs {
            hasher.update(rev.as_bytes());
            hasher.update([0]);
        }
        for record in &self.records {
            hasher.update(record.hash.as_bytes());
            hasher.update([0]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn commits(&self, _range: &RevRange) -> Result<CommitIter<'_>> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }

    fn tree_paths(&self, _range: &RevRange) -> Result<Vec<String>> {
        Ok(self.tree_paths.clone())
    }

    fn mailmap_sources(&self) -> MailmapSources {
        self.mailmap.clone()
    }
}
