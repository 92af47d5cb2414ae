//! The single entry point consumed by the presentation layer.
//!
//! A run resolves the repository and mailmap fingerprints, reads the cached
//! history (or walks the source and writes it back), aggregates it under the
//! query's filters and shapes the result into a table, a tree, a timeline or
//! a history.

use crate::cache::{default_cache_dir, Cache, CacheKey};
use crate::error::Result;
use crate::filter::{FilterArgs, Filters};
use crate::mailmap::Mailmap;
use crate::model::{Aggregate, HistoryEntry, HistorySnapshot, PathStats, TableRow};
use crate::rank::{rank_contributors, Mode};
use crate::source::{CommitSource, RevRange};
use crate::tally::{aggregate, default_workers};
use crate::timeline::{build_timeline, check_mode, TimeBucket};
use crate::tree::{build_tree, DirectoryNode};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Process-level knobs. Never includes anything that changes results.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_enabled: bool,
    /// Overrides the per-repository directory under the user cache dir.
    pub cache_dir: Option<PathBuf>,
    /// `None` picks a count from the history size.
    pub workers: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_dir: None,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Table,
    Tree { show_all: bool },
    Timeline,
    History,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub range: RevRange,
    pub filters: FilterArgs,
    pub mode: Mode,
    pub view: View,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            range: RevRange::default(),
            filters: FilterArgs::default(),
            mode: Mode::default(),
            view: View::Table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Contributors ranked by the query's mode.
    Table(Vec<TableRow>),
    Tree(DirectoryNode),
    /// Contiguous time buckets, oldest first.
    Timeline(Vec<TimeBucket>),
    /// Surviving commits, oldest first.
    History(Vec<HistoryEntry>),
}

/// How the history for a run was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub report: Report,
    pub aggregate: Aggregate,
    pub cache: CacheStatus,
}

pub struct Engine<S: CommitSource> {
    source: S,
    config: EngineConfig,
}

impl<S: CommitSource> Engine<S> {
    pub fn new(source: S, config: EngineConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn run(&self, query: &Query) -> Result<Outcome> {
        let start = Instant::now();

        let now = Utc::now();

        // Bad filters fail before any history is read.
        let filters = Filters::parse_at(&query.filters, now)?;
        if query.view == View::Timeline {
            check_mode(query.mode)?;
        }

        let mailmap = Mailmap::load(&self.source.mailmap_sources());
        let key = CacheKey {
            repo_fingerprint: self.source.state_fingerprint(&query.range)?,
            mailmap_fingerprint: mailmap.fingerprint().to_string(),
        };
        debug!(
            repo = %key.repo_fingerprint,
            mailmap = %key.mailmap_fingerprint,
            "fingerprints"
        );

        let mut cache = self.open_cache();
        let (snapshot, status) = match cache.get(&key) {
            Some(snapshot) => (snapshot, CacheStatus::Hit),
            None => {
                let snapshot = self.read_history(&query.range, &mailmap)?;
                if let Err(e) = cache.put(&key, &snapshot) {
                    warn!(error = %e, "could not write cache, continuing without it");
                }
                let status = if cache.is_enabled() {
                    CacheStatus::Miss
                } else {
                    CacheStatus::Disabled
                };
                (snapshot, status)
            }
        };

        let workers = self
            .config
            .workers
            .unwrap_or_else(|| default_workers(snapshot.commits.len()));

        // Snapshot records already carry canonical authors; resolving them
        // again would follow chained mailmap rules a second hop.
        let aggregate = aggregate(
            snapshot.commits.iter().cloned(),
            &Mailmap::empty(),
            &filters,
            workers,
        );
        let report = match query.view {
            View::Table => Report::Table(table(&aggregate, query.mode)),
            View::Tree { show_all } => {
                Report::Tree(tree(&aggregate, &snapshot.tree_paths, &filters, show_all))
            }
            View::Timeline => {
                Report::Timeline(timeline(&snapshot, &filters, query.mode, now))
            }
            View::History => Report::History(history(&snapshot, &filters)),
        };

        info!(
            cache = ?status,
            workers,
            duration_ms = start.elapsed().as_millis() as u64,
            "query complete"
        );
        Ok(Outcome {
            report,
            aggregate,
            cache: status,
        })
    }

    fn open_cache(&self) -> Cache {
        if !self.config.cache_enabled {
            return Cache::disabled();
        }
        let dir = self
            .config
            .cache_dir
            .clone()
            .or_else(|| self.source.root().and_then(|root| default_cache_dir(&root)));
        let Some(dir) = dir else {
            debug!("no cache directory available");
            return Cache::disabled();
        };
        match Cache::open(&dir) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cache unavailable");
                Cache::disabled()
            }
        }
    }

    fn read_history(&self, range: &RevRange, mailmap: &Mailmap) -> Result<HistorySnapshot> {
        let start = Instant::now();
        let mut commits = Vec::new();
        for record in self.source.commits(range)? {
            commits.push(mailmap.canonicalize(record?));
        }
        let tree_paths = self.source.tree_paths(range)?;
        debug!(
            commits = commits.len(),
            files = tree_paths.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "read history"
        );
        Ok(HistorySnapshot::new(commits, tree_paths))
    }
}

fn table(aggregate: &Aggregate, mode: Mode) -> Vec<TableRow> {
    rank_contributors(mode, aggregate.contributors.iter())
        .into_iter()
        .map(|(identity, stats)| TableRow::new(identity, stats))
        .collect()
}

fn tree(
    aggregate: &Aggregate,
    tree_paths: &[String],
    filters: &Filters,
    show_all: bool,
) -> DirectoryNode {
    if !show_all {
        return build_tree(&aggregate.paths, false);
    }
    let mut paths = aggregate.paths.clone();
    for path in tree_paths.iter().filter(|p| filters.path_matches(p)) {
        paths.entry(path.clone()).or_insert_with(PathStats::default);
    }
    build_tree(&paths, true)
}

fn timeline(
    snapshot: &HistorySnapshot,
    filters: &Filters,
    mode: Mode,
    now: DateTime<Utc>,
) -> Vec<TimeBucket> {
    let records: Vec<_> = snapshot
        .commits
        .iter()
        .filter(|record| filters.matches(record))
        .map(|record| filters.restrict(record))
        .collect();
    build_timeline(records.iter().map(|r| r.as_ref()), mode, now)
}

fn history(snapshot: &HistorySnapshot, filters: &Filters) -> Vec<HistoryEntry> {
    snapshot
        .commits
        .iter()
        .filter(|record| filters.matches(record))
        .map(|record| HistoryEntry::new(&filters.restrict(record)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitRecord, Identity, LineDelta};
    use crate::source::MemorySource;
    use chrono::{TimeZone, Utc};

    fn record(hash: &str, name: &str, secs: i64, paths: &[(&str, u64, u64)]) -> CommitRecord {
        CommitRecord {
            hash: hash.into(),
            author: Identity::new(name, format!("{}@x.com", name.to_lowercase())),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            is_merge: false,
            paths: paths
                .iter()
                .map(|(p, a, r)| (p.to_string(), LineDelta::new(*a, *r)))
                .collect(),
        }
    }

    fn engine(records: Vec<CommitRecord>) -> Engine<MemorySource> {
        let source = MemorySource::new(records).with_tree_paths(vec![
            "src/lib.rs".into(),
            "LICENSE".into(),
        ]);
        let config = EngineConfig {
            cache_enabled: false,
            ..EngineConfig::default()
        };
        Engine::new(source, config)
    }

    #[test]
    fn table_is_ranked_by_mode() {
        let engine = engine(vec![
            record("1", "Alice", 10, &[("src/lib.rs", 1, 0)]),
            record("2", "Bob", 20, &[("src/lib.rs", 50, 0)]),
            record("3", "Alice", 30, &[("src/lib.rs", 1, 0)]),
        ]);

        let names = |mode| match engine.run(&Query { mode, ..Query::default() }).unwrap().report {
            Report::Table(rows) => rows.into_iter().map(|r| r.name).collect::<Vec<_>>(),
            other => panic!("unexpected report {other:?}"),
        };
        assert_eq!(names(Mode::Commits), ["Alice", "Bob"]);
        assert_eq!(names(Mode::Lines), ["Bob", "Alice"]);
        assert_eq!(names(Mode::LastModified), ["Alice", "Bob"]);
    }

    #[test]
    fn show_all_adds_untouched_tree_paths() {
        let engine = engine(vec![record("1", "Alice", 10, &[("src/lib.rs", 1, 0)])]);

        let run = |show_all| match engine
            .run(&Query {
                view: View::Tree { show_all },
                ..Query::default()
            })
            .unwrap()
            .report
        {
            Report::Tree(root) => root,
            other => panic!("unexpected report {other:?}"),
        };

        assert!(run(false).find("LICENSE").is_none());
        let full = run(true);
        let license = full.find("LICENSE").unwrap();
        assert!(license.is_file);
        assert_eq!(license.stats.commits, 0);
        assert_eq!(full.stats.commits, 1);
    }

    #[test]
    fn history_is_filtered_and_chronological() {
        let engine = engine(vec![
            record("b", "Bob", 20, &[("docs/a.md", 1, 0), ("src/x.rs", 2, 0)]),
            record("a", "Alice", 10, &[("src/lib.rs", 1, 0)]),
            record("c", "Carol", 30, &[("docs/b.md", 1, 0)]),
        ]);
        let query = Query {
            view: View::History,
            filters: FilterArgs {
                pathspecs: vec!["src".into()],
                ..FilterArgs::default()
            },
            ..Query::default()
        };

        let Report::History(entries) = engine.run(&query).unwrap().report else {
            panic!("expected history");
        };
        let hashes: Vec<_> = entries.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, ["a", "b"]);
        assert_eq!(entries[1].files, ["src/x.rs"]);
        assert_eq!(entries[1].lines_added, 2);
    }

    #[test]
    fn timeline_buckets_surviving_commits() {
        let day = 86_400;
        let engine = engine(vec![
            record("1", "Alice", 10 * day, &[("src/lib.rs", 1, 0)]),
            record("2", "Bob", 10 * day + 60, &[("src/lib.rs", 9, 0)]),
            record("3", "Bob", 12 * day, &[("docs/a.md", 1, 0)]),
        ]);
        let query = |mode| Query {
            mode,
            view: View::Timeline,
            filters: FilterArgs {
                pathspecs: vec!["src".into()],
                ..FilterArgs::default()
            },
            ..Query::default()
        };

        let Report::Timeline(buckets) = engine.run(&query(Mode::Lines)).unwrap().report else {
            panic!("expected timeline");
        };
        // Yearly: the history is decades old.
        assert_eq!(buckets[0].label, "1970");
        assert_eq!(buckets[0].total.commits, 2);
        assert_eq!(buckets[0].top_contributor.as_ref().unwrap().name, "Bob");

        assert!(engine.run(&query(Mode::LastModified)).is_err());
    }

    #[test]
    fn invalid_filters_fail_the_run() {
        let engine = engine(Vec::new());
        let query = Query {
            filters: FilterArgs {
                since: Some("not a date".into()),
                ..FilterArgs::default()
            },
            ..Query::default()
        };
        assert!(engine.run(&query).is_err());
    }
}
