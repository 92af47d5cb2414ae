//! Aggregation of commit records into per-contributor and per-path stats.
//!
//! The record stream is cut into contiguous chunks, one per worker. Each
//! worker resolves, filters and folds its chunk into a private [`Tally`];
//! the partial tallies are then merged on the calling thread. `Tally::merge`
//! only adds counters, unions file sets and takes min/max of times, so the
//! result does not depend on how the stream was chunked.

use crate::filter::Filters;
use crate::mailmap::Mailmap;
use crate::model::{Aggregate, CommitRecord, Identity, LineDelta, PathStats, Stats};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, warn};

/// Target number of commits handled by each worker.
const COMMITS_PER_WORKER: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ContributorTally {
    stats: Stats,
    files: BTreeSet<String>,
}

/// Partial aggregate owned by a single worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    contributors: BTreeMap<Identity, ContributorTally>,
    paths: BTreeMap<String, PathStats>,
}

impl Tally {
    /// Folds one canonical, already filtered record in.
    pub fn add(&mut self, record: &CommitRecord) {
        let delta = LineDelta::new(record.lines_added(), record.lines_removed());
        let contributor = self.contributors.entry(record.author.clone()).or_default();
        contributor.stats.record_commit(record.timestamp, delta);

        for (path, delta) in &record.paths {
            contributor.files.insert(path.clone());

            let path_stats = self.paths.entry(path.clone()).or_default();
            path_stats.stats.record_commit(record.timestamp, *delta);
            path_stats
                .contributors
                .entry(record.author.clone())
                .or_default()
                .record_commit(record.timestamp, *delta);
        }
    }

    pub fn merge(mut self, other: Tally) -> Tally {
        for (identity, theirs) in other.contributors {
            let ours = self.contributors.entry(identity).or_default();
            ours.stats.merge(&theirs.stats);
            ours.files.extend(theirs.files);
        }
        for (path, theirs) in other.paths {
            self.paths.entry(path).or_default().merge(&theirs);
        }
        self
    }

    pub fn finish(self) -> Aggregate {
        let contributors = self
            .contributors
            .into_iter()
            .map(|(identity, mut tally)| {
                tally.stats.file_count = tally.files.len() as u64;
                (identity, tally.stats)
            })
            .collect();

        let paths = self
            .paths
            .into_iter()
            .map(|(path, mut stats)| {
                stats.stats.file_count = 1;
                for contributor in stats.contributors.values_mut() {
                    contributor.file_count = 1;
                }
                (path, stats)
            })
            .collect();

        Aggregate { contributors, paths }
    }
}

/// Worker count used when the caller does not choose one.
pub fn default_workers(commit_count: usize) -> usize {
    let max_workers = (rayon::current_num_threads() * 2).saturating_sub(1).max(1);
    (commit_count / COMMITS_PER_WORKER + 1).min(max_workers)
}

/// Resolves, filters and aggregates `records` on `workers` threads.
///
/// `workers <= 1` folds everything on the calling thread.
/// Records that are already canonical take `Mailmap::empty()` as resolver.
pub fn aggregate<I>(records: I, resolver: &Mailmap, filters: &Filters, workers: usize) -> Aggregate
where
    I: IntoIterator<Item = CommitRecord>,
{
    let start = Instant::now();
    let workers = workers.max(1);

    let tally = if workers == 1 {
        tally_chunk(records, resolver, filters)
    } else {
        let chunks = partition(records.into_iter().collect(), workers);
        debug!(
            workers,
            chunks = chunks.len(),
            chunk_size = chunks.first().map(Vec::len).unwrap_or(0),
            "partitioned commits"
        );

        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                let partials: Vec<Tally> = pool.install(|| {
                    chunks
                        .into_par_iter()
                        .map(|chunk| tally_chunk(chunk, resolver, filters))
                        .collect()
                });
                partials.into_iter().fold(Tally::default(), Tally::merge)
            }
            Err(e) => {
                warn!(error = %e, "could not start worker pool, aggregating on one thread");
                tally_chunk(chunks.into_iter().flatten(), resolver, filters)
            }
        }
    };

    let aggregate = tally.finish();
    debug!(
        contributors = aggregate.contributors.len(),
        paths = aggregate.paths.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "tallied commits"
    );
    aggregate
}

fn tally_chunk<I>(records: I, resolver: &Mailmap, filters: &Filters) -> Tally
where
    I: IntoIterator<Item = CommitRecord>,
{
    let mut tally = Tally::default();
    for record in records {
        let record = resolver.canonicalize(record);
        if !filters.matches(&record) {
            continue;
        }
        tally.add(&filters.restrict(&record));
    }
    tally
}

/// Splits `records` into at most `n` contiguous, order-preserving chunks.
fn partition(mut records: Vec<CommitRecord>, n: usize) -> Vec<Vec<CommitRecord>> {
    let size = records.len().div_ceil(n.max(1)).max(1);
    let mut chunks = Vec::with_capacity(n);
    while records.len() > size {
        let tail = records.split_off(size);
        chunks.push(records);
        records = tail;
    }
    chunks.push(records);
    chunks
}
