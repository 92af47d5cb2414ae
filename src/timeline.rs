//! Time-bucketed view of a history.
//!
//! The bucket size follows the age of the oldest surviving commit: daily for
//! up to sixty days, monthly for up to five years, yearly beyond that. Every
//! bucket from the first commit up to `now` is present, empty ones included,
//! and each names the contributor that ranks first in it.

use crate::error::{GwhoError, Result};
use crate::model::{CommitRecord, Identity, Stats};
use crate::rank::{rank_contributors, Mode};
use crate::tally::Tally;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Daily,
    Monthly,
    Yearly,
}

impl Resolution {
    pub fn for_span(start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let span = now - start;
        if span > Duration::days(5 * 365) {
            Resolution::Yearly
        } else if span > Duration::days(60) {
            Resolution::Monthly
        } else {
            Resolution::Daily
        }
    }

    /// First day of the bucket containing `date`.
    pub fn truncate(self, date: NaiveDate) -> NaiveDate {
        let first = match self {
            Resolution::Daily => Some(date),
            Resolution::Monthly => date.with_day(1),
            Resolution::Yearly => date.with_ordinal(1),
        };
        first.unwrap_or(date)
    }

    fn next(self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Resolution::Daily => start.succ_opt(),
            Resolution::Monthly => start.checked_add_months(Months::new(1)),
            Resolution::Yearly => start.checked_add_months(Months::new(12)),
        }
    }

    pub fn label(self, start: NaiveDate) -> String {
        let fmt = match self {
            Resolution::Daily => "%Y-%m-%d",
            Resolution::Monthly => "%b %Y",
            Resolution::Yearly => "%Y",
        };
        start.format(fmt).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub label: String,
    pub start: NaiveDate,
    /// All contributors in the bucket together.
    pub total: Stats,
    pub top_contributor: Option<Identity>,
    /// Stats of `top_contributor` alone.
    pub top: Option<Stats>,
}

impl TimeBucket {
    pub fn value(&self, mode: Mode) -> u64 {
        self.top.as_ref().map_or(0, |stats| metric(mode, stats))
    }

    pub fn total_value(&self, mode: Mode) -> u64 {
        metric(mode, &self.total)
    }
}

fn metric(mode: Mode, stats: &Stats) -> u64 {
    match mode {
        Mode::Commits | Mode::LastModified => stats.commits,
        Mode::Lines => stats.lines_changed(),
        Mode::Files => stats.file_count,
    }
}

/// Last-modified has no per-bucket quantity to plot.
pub fn check_mode(mode: Mode) -> Result<()> {
    if mode == Mode::LastModified {
        return Err(GwhoError::InvalidQuery(
            "the timeline cannot rank by last modified".to_string(),
        ));
    }
    Ok(())
}

/// Buckets canonical, already filtered `records` up to `now`.
pub fn build_timeline<'a, I>(records: I, mode: Mode, now: DateTime<Utc>) -> Vec<TimeBucket>
where
    I: IntoIterator<Item = &'a CommitRecord>,
{
    let records: Vec<&CommitRecord> = records.into_iter().collect();
    let Some(start) = records.iter().map(|r| r.timestamp).min() else {
        return Vec::new();
    };
    let resolution = Resolution::for_span(start, now);

    let mut tallies: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    for record in records {
        let key = resolution.truncate(record.timestamp.date_naive());
        tallies.entry(key).or_default().add(record);
    }

    let today = now.date_naive();
    let end = tallies
        .keys()
        .next_back()
        .map_or(today, |last| (*last).max(today));

    let mut buckets = Vec::new();
    let mut cursor = Some(resolution.truncate(start.date_naive()));
    while let Some(day) = cursor.filter(|d| *d <= end) {
        let tally = tallies.remove(&day).unwrap_or_default();
        buckets.push(bucket(resolution, day, tally, mode));
        cursor = resolution.next(day);
    }
    buckets
}

fn bucket(resolution: Resolution, start: NaiveDate, tally: Tally, mode: Mode) -> TimeBucket {
    let aggregate = tally.finish();

    let mut total = Stats::default();
    for stats in aggregate.contributors.values() {
        total.merge(stats);
    }
    total.file_count = aggregate.paths.len() as u64;

    let (top_contributor, top) = rank_contributors(mode, aggregate.contributors.iter())
        .into_iter()
        .next()
        .map(|(identity, stats)| (identity.clone(), stats.clone()))
        .unzip();

    TimeBucket {
        label: resolution.label(start),
        start,
        total,
        top_contributor,
        top,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LineDelta;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn commit(hash: &str, name: &str, when: DateTime<Utc>, paths: &[(&str, u64)]) -> CommitRecord {
        CommitRecord {
            hash: hash.into(),
            author: Identity::new(name, format!("{}@x.com", name.to_lowercase())),
            timestamp: when,
            is_merge: false,
            paths: paths
                .iter()
                .map(|(p, added)| (p.to_string(), LineDelta::new(*added, 0)))
                .collect(),
        }
    }

    #[test]
    fn resolution_follows_history_span() {
        let now = day(2024, 6, 1);
        assert_eq!(Resolution::for_span(day(2024, 5, 1), now), Resolution::Daily);
        assert_eq!(Resolution::for_span(day(2024, 1, 1), now), Resolution::Monthly);
        assert_eq!(Resolution::for_span(day(2018, 1, 1), now), Resolution::Yearly);
    }

    #[test]
    fn truncates_and_labels_buckets() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
        let monthly = Resolution::Monthly.truncate(date);
        assert_eq!(monthly, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(Resolution::Monthly.label(monthly), "Mar 2024");
        assert_eq!(Resolution::Yearly.label(Resolution::Yearly.truncate(date)), "2024");
        assert_eq!(Resolution::Daily.label(date), "2024-03-17");
    }

    #[test]
    fn buckets_are_contiguous_up_to_now() {
        let records = [
            commit("1", "Alice", day(2024, 1, 1), &[("a", 1)]),
            commit("2", "Bob", day(2024, 1, 3), &[("b", 1)]),
        ];
        let buckets = build_timeline(&records, Mode::Commits, day(2024, 1, 4));

        let labels: Vec<_> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04"]);
        assert_eq!(buckets[1].top_contributor, None);
        assert_eq!(buckets[1].total_value(Mode::Commits), 0);
        assert_eq!(buckets[2].top_contributor.as_ref().unwrap().name, "Bob");
    }

    #[test]
    fn monthly_buckets_cross_year_boundary() {
        let records = [commit("1", "Alice", day(2023, 11, 20), &[("a", 1)])];
        let buckets = build_timeline(&records, Mode::Commits, day(2024, 2, 10));
        let labels: Vec<_> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["Nov 2023", "Dec 2023", "Jan 2024", "Feb 2024"]);
    }

    #[test]
    fn top_contributor_follows_mode() {
        let records = [
            commit("1", "Alice", day(2024, 1, 1), &[("a", 1)]),
            commit("2", "Alice", day(2024, 1, 1), &[("a", 1)]),
            commit("3", "Bob", day(2024, 1, 1), &[("b", 40), ("c", 10), ("d", 1)]),
        ];
        let now = day(2024, 1, 1);
        let top = |mode| {
            let buckets = build_timeline(&records, mode, now);
            assert_eq!(buckets.len(), 1);
            buckets[0].top_contributor.clone().unwrap().name
        };
        assert_eq!(top(Mode::Commits), "Alice");
        assert_eq!(top(Mode::Lines), "Bob");
        assert_eq!(top(Mode::Files), "Bob");

        let bucket = &build_timeline(&records, Mode::Lines, now)[0];
        assert_eq!(bucket.value(Mode::Lines), 51);
        assert_eq!(bucket.total_value(Mode::Lines), 53);
        assert_eq!(bucket.total.file_count, 4);
        assert_eq!(bucket.total.commits, 3);
    }

    #[test]
    fn empty_history_has_no_buckets() {
        assert!(build_timeline(&[], Mode::Commits, day(2024, 1, 1)).is_empty());
    }

    #[test]
    fn last_modified_is_rejected() {
        assert!(check_mode(Mode::Commits).is_ok());
        assert!(matches!(
            check_mode(Mode::LastModified),
            Err(GwhoError::InvalidQuery(_))
        ));
    }
}
