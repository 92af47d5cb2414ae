use crate::model::{Identity, Stats};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The metric results are ranked by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Commits,
    Lines,
    Files,
    LastModified,
}

impl Mode {
    /// Orders `a` before `b` when it ranks higher. Equal metrics compare equal.
    pub fn compare(self, a: &Stats, b: &Stats) -> Ordering {
        match self {
            Mode::Commits => b.commits.cmp(&a.commits),
            Mode::Lines => b.lines_changed().cmp(&a.lines_changed()),
            Mode::Files => b.file_count.cmp(&a.file_count),
            // `None` sorts before `Some`, so reversing puts never-touched last
            Mode::LastModified => b.last_commit_time.cmp(&a.last_commit_time),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Commits => "commits",
            Mode::Lines => "lines",
            Mode::Files => "files",
            Mode::LastModified => "last modified",
        }
    }
}

/// Ranking order for contributors: metric descending, then name, then email.
pub fn compare_contributors(mode: Mode, a: (&Identity, &Stats), b: (&Identity, &Stats)) -> Ordering {
    mode.compare(a.1, b.1)
        .then_with(|| a.0.name.cmp(&b.0.name))
        .then_with(|| a.0.email.cmp(&b.0.email))
}

/// Ranking order for tree siblings: metric descending, then name.
pub fn compare_named(mode: Mode, a: (&str, &Stats), b: (&str, &Stats)) -> Ordering {
    mode.compare(a.1, b.1).then_with(|| a.0.cmp(b.0))
}

pub fn rank_contributors<'a, I>(mode: Mode, entries: I) -> Vec<(&'a Identity, &'a Stats)>
where
    I: IntoIterator<Item = (&'a Identity, &'a Stats)>,
{
    let mut ranked: Vec<_> = entries.into_iter().collect();
    ranked.sort_by(|a, b| compare_contributors(mode, *a, *b));
    ranked
}
