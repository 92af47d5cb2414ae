//! Query-time commit filters.
//!
//! Everything here is validated up front by [`Filters::parse`]; once a
//! `Filters` value exists, [`Filters::matches`] is a pure predicate.

use crate::error::{GwhoError, Result};
use crate::model::{CommitRecord, DateRange};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::borrow::Cow;
use std::time::Duration;

/// Raw filter parameters as they arrive from the command line.
#[derive(Debug, Clone, Default)]
pub struct FilterArgs {
    pub authors: Vec<String>,
    pub not_authors: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub include_merges: bool,
    pub pathspecs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pathspec {
    Include(String),
    Exclude(String),
}

impl Pathspec {
    pub fn parse(raw: &str) -> Result<Self> {
        let (exclude, body) = if let Some(rest) = raw.strip_prefix(":(exclude)") {
            (true, rest)
        } else if let Some(rest) = raw.strip_prefix(":!").or_else(|| raw.strip_prefix(":^")) {
            (true, rest)
        } else {
            (false, raw)
        };

        let prefix = body.trim_start_matches("./").trim_end_matches('/');
        if prefix.is_empty() && !(body == "." || body == "./") {
            return Err(GwhoError::InvalidFilter(format!("empty pathspec '{raw}'")));
        }
        if prefix.starts_with('/') {
            return Err(GwhoError::InvalidFilter(format!(
                "pathspec must be relative to the repository root: '{raw}'"
            )));
        }

        let prefix = if prefix == "." { String::new() } else { prefix.to_string() };
        Ok(if exclude {
            Pathspec::Exclude(prefix)
        } else {
            Pathspec::Include(prefix)
        })
    }

    fn prefix(&self) -> &str {
        match self {
            Pathspec::Include(p) | Pathspec::Exclude(p) => p,
        }
    }

    /// Matches `path` itself or anything beneath it.
    fn covers(&self, path: &str) -> bool {
        let prefix = self.prefix();
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub authors: Vec<String>,
    pub not_authors: Vec<String>,
    pub range: DateRange,
    pub include_merges: bool,
    pub pathspecs: Vec<Pathspec>,
    /// Commits dated after this instant are dropped.
    pub not_after: Option<DateTime<Utc>>,
}

impl Filters {
    /// No filtering at all, merges included.
    pub fn all() -> Self {
        Self {
            include_merges: true,
            ..Self::default()
        }
    }

    pub fn parse(args: &FilterArgs) -> Result<Self> {
        Self::parse_at(args, Utc::now())
    }

    /// Like [`Filters::parse`] with relative dates measured from `now`.
    ///
    /// Commits dated after `now` are treated as bogus clocks and filtered out.
    pub fn parse_at(args: &FilterArgs, now: DateTime<Utc>) -> Result<Self> {
        let since = args.since.as_deref().map(|s| parse_date(s, now)).transpose()?;
        let until = args.until.as_deref().map(|s| parse_date(s, now)).transpose()?;

        if let (Some(s), Some(u)) = (since, until) {
            if s > u {
                return Err(GwhoError::InvalidDate(format!(
                    "Invalid range: since ({s}) is after until ({u})"
                )));
            }
        }

        let mut range = DateRange::new();
        if let Some(s) = since {
            range = range.with_since(s);
        }
        if let Some(u) = until {
            range = range.with_until(u);
        }

        Ok(Self {
            authors: normalize_patterns(&args.authors, "author")?,
            not_authors: normalize_patterns(&args.not_authors, "not-author")?,
            range,
            include_merges: args.include_merges,
            not_after: Some(now),
            pathspecs: args
                .pathspecs
                .iter()
                .map(|p| Pathspec::parse(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Whether `record` (already carrying its canonical author) survives.
    pub fn matches(&self, record: &CommitRecord) -> bool {
        if record.is_merge && !self.include_merges {
            return false;
        }
        if !self.range.contains(&record.timestamp) {
            return false;
        }
        if self.not_after.is_some_and(|cutoff| record.timestamp > cutoff) {
            return false;
        }

        let name = record.author.name.to_lowercase();
        let email = record.author.email.to_lowercase();
        let hit = |pattern: &String| name.contains(pattern.as_str()) || email.contains(pattern.as_str());

        if !self.authors.is_empty() && !self.authors.iter().any(hit) {
            return false;
        }
        if self.not_authors.iter().any(hit) {
            return false;
        }

        if self.has_includes() {
            return record.paths.keys().any(|p| self.path_matches(p));
        }
        true
    }

    pub fn path_matches(&self, path: &str) -> bool {
        let mut included = !self.has_includes();
        for spec in &self.pathspecs {
            match spec {
                Pathspec::Include(_) if spec.covers(path) => included = true,
                Pathspec::Exclude(_) if spec.covers(path) => return false,
                _ => {}
            }
        }
        included
    }

    /// The record with paths outside the pathspecs removed.
    pub fn restrict<'a>(&self, record: &'a CommitRecord) -> Cow<'a, CommitRecord> {
        if self.pathspecs.is_empty() || record.paths.keys().all(|p| self.path_matches(p)) {
            return Cow::Borrowed(record);
        }
        let mut restricted = record.clone();
        restricted.paths.retain(|p, _| self.path_matches(p));
        Cow::Owned(restricted)
    }

    fn has_includes(&self) -> bool {
        self.pathspecs
            .iter()
            .any(|p| matches!(p, Pathspec::Include(_)))
    }
}

fn normalize_patterns(patterns: &[String], flag: &str) -> Result<Vec<String>> {
    patterns
        .iter()
        .map(|p| {
            let p = p.trim();
            if p.is_empty() {
                Err(GwhoError::InvalidFilter(format!("empty --{flag} pattern")))
            } else {
                Ok(p.to_lowercase())
            }
        })
        .collect()
}

/// Parses an absolute or relative date.
///
/// Accepts RFC 3339, `YYYY-MM-DD` (UTC midnight), `N days|weeks|months ago`
/// and humantime durations such as `2weeks`, the latter two counted back
/// from `now`.
pub fn parse_date(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();

    // RFC3339
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    // YYYY-MM-DD
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(datetime) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&datetime));
        }
    }

    let duration = parse_natural_duration(trimmed)
        .or_else(|| humantime::parse_duration(trimmed).ok())
        .ok_or_else(|| GwhoError::InvalidDate(format!("Unrecognised date '{input}'")))?;

    let delta = chrono::Duration::from_std(duration)
        .map_err(|_| GwhoError::InvalidDate(format!("Duration overflow for '{input}'")))?;
    now.checked_sub_signed(delta)
        .ok_or_else(|| GwhoError::InvalidDate(format!("Duration overflow for '{input}'")))
}

fn parse_natural_duration(input: &str) -> Option<Duration> {
    let input = input.to_lowercase();
    let body = input.strip_suffix(" ago")?;
    let (count, unit) = body.trim().split_once(char::is_whitespace)?;
    let n: u64 = count.parse().ok()?;

    let day = 86_400;
    let secs = match unit.trim() {
        "second" | "seconds" => 1,
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3_600,
        "day" | "days" => day,
        "week" | "weeks" => 7 * day,
        "month" | "months" => 30 * day,
        "year" | "years" => 365 * day,
        _ => return None,
    };
    n.checked_mul(secs).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, LineDelta};
    use std::collections::BTreeMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(name: &str, email: &str, secs: i64, is_merge: bool, paths: &[&str]) -> CommitRecord {
        CommitRecord {
            hash: format!("{name}-{secs}"),
            author: Identity::new(name, email),
            timestamp: at(secs),
            is_merge,
            paths: paths
                .iter()
                .map(|p| (p.to_string(), LineDelta::new(1, 0)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn parse(args: FilterArgs) -> Filters {
        Filters::parse_at(&args, at(1_800_000_000)).unwrap()
    }

    #[test]
    fn absent_filters_match_everything() {
        let filters = Filters::all();
        assert!(filters.matches(&record("a", "a@x", 0, true, &[])));
        assert!(filters.matches(&record("a", "a@x", 10, false, &["x"])));
    }

    #[test]
    fn since_is_inclusive_and_until_exclusive() {
        let filters = parse(FilterArgs {
            since: Some("2024-01-01".into()),
            until: Some("2024-02-01".into()),
            include_merges: true,
            ..FilterArgs::default()
        });
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp();
        let until = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap().timestamp();

        assert!(filters.matches(&record("a", "a@x", since, false, &[])));
        assert!(!filters.matches(&record("a", "a@x", since - 1, false, &[])));
        assert!(filters.matches(&record("a", "a@x", until - 1, false, &[])));
        assert!(!filters.matches(&record("a", "a@x", until, false, &[])));
    }

    #[test]
    fn commits_after_now_are_dropped_until_their_date_passes() {
        let args = FilterArgs::default();
        let commit = record("a", "a@x", 1_700_000_100, false, &["f"]);

        let before = Filters::parse_at(&args, at(1_700_000_000)).unwrap();
        assert!(!before.matches(&commit));

        let after = Filters::parse_at(&args, at(1_700_000_100)).unwrap();
        assert!(after.matches(&commit));
        assert!(Filters::all().matches(&commit));
    }

    #[test]
    fn merges_dropped_unless_included() {
        let merge = record("a", "a@x", 0, true, &["f"]);
        let without = parse(FilterArgs::default());
        let with = parse(FilterArgs {
            include_merges: true,
            ..FilterArgs::default()
        });
        assert!(!without.matches(&merge));
        assert!(with.matches(&merge));
    }

    #[test]
    fn author_filters_are_case_insensitive_substrings() {
        let filters = parse(FilterArgs {
            authors: vec!["ALICE".into(), "bob@".into()],
            not_authors: vec!["bot".into()],
            ..FilterArgs::default()
        });
        assert!(filters.matches(&record("Alice Adams", "aa@x.com", 0, false, &[])));
        assert!(filters.matches(&record("Robert", "bob@x.com", 0, false, &[])));
        assert!(!filters.matches(&record("Carol", "carol@x.com", 0, false, &[])));
        assert!(!filters.matches(&record("alice-bot", "ci@x.com", 0, false, &[])));
    }

    #[test]
    fn pathspecs_select_and_restrict_paths() {
        let filters = parse(FilterArgs {
            pathspecs: vec!["src".into(), ":!src/gen".into()],
            ..FilterArgs::default()
        });
        let touched = record("a", "a@x", 0, false, &["src/lib.rs", "src/gen/out.rs", "README"]);
        let outside = record("a", "a@x", 0, false, &["README", "srcfoo"]);

        assert!(filters.matches(&touched));
        assert!(!filters.matches(&outside));

        let restricted = filters.restrict(&touched);
        let kept: Vec<_> = restricted.paths.keys().cloned().collect();
        assert_eq!(kept, ["src/lib.rs"]);
    }

    #[test]
    fn exclude_only_pathspec_keeps_commits() {
        let filters = parse(FilterArgs {
            pathspecs: vec![":(exclude)docs".into()],
            ..FilterArgs::default()
        });
        let docs_only = record("a", "a@x", 0, false, &["docs/a.md"]);
        assert!(filters.matches(&docs_only));
        assert!(filters.restrict(&docs_only).paths.is_empty());
    }

    #[test]
    fn rejects_invalid_parameters() {
        let now = at(1_700_000_000);
        for args in [
            FilterArgs {
                since: Some("not a date".into()),
                ..FilterArgs::default()
            },
            FilterArgs {
                since: Some("2024-02-01".into()),
                until: Some("2024-01-01".into()),
                ..FilterArgs::default()
            },
            FilterArgs {
                pathspecs: vec!["".into()],
                ..FilterArgs::default()
            },
            FilterArgs {
                pathspecs: vec![":!".into()],
                ..FilterArgs::default()
            },
            FilterArgs {
                authors: vec!["  ".into()],
                ..FilterArgs::default()
            },
        ] {
            assert!(Filters::parse_at(&args, now).is_err(), "{args:?}");
        }
    }

    #[test]
    fn parses_relative_dates() {
        let now = at(1_700_000_000);
        assert_eq!(parse_date("3 days ago", now).unwrap(), at(1_700_000_000 - 3 * 86_400));
        assert_eq!(parse_date("2weeks", now).unwrap(), at(1_700_000_000 - 14 * 86_400));
        assert_eq!(
            parse_date("2024-03-05T10:00:00+02:00", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap()
        );
    }
}
