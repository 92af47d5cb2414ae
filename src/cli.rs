use crate::filter::FilterArgs;
use crate::output::{Format, Render, DEFAULT_TABLE_LIMIT};
use crate::query::{EngineConfig, Query, View};
use crate::rank::Mode;
use crate::source::RevRange;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Any non-empty value turns the history cache off.
pub const DISABLE_CACHE_ENV: &str = "GWHO_DISABLE_CACHE";

#[derive(Parser)]
#[command(name = "gwho")]
#[command(about = "Per-author and per-path statistics from git history")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    #[arg(long, help = "Path to git repository")]
    pub repo: Option<PathBuf>,

    #[arg(long, help = "Directory for the history cache")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, help = "Do not read or write the history cache")]
    pub no_cache: bool,

    #[arg(long, help = "Number of aggregation workers (default: based on history size)")]
    pub workers: Option<usize>,

    #[arg(long = "rev", help = "Revision or range to analyse, e.g. main or v1.0..HEAD (repeatable)")]
    pub revs: Vec<String>,

    #[arg(long, help = "Only commits at or after this date (RFC3339, YYYY-MM-DD, or '2 weeks ago')")]
    pub since: Option<String>,

    #[arg(long, help = "Only commits before this date (RFC3339, YYYY-MM-DD, or '2 weeks ago')")]
    pub until: Option<String>,

    #[arg(long = "author", help = "Only authors whose name or email contains this (repeatable)")]
    pub authors: Vec<String>,

    #[arg(long = "not-author", help = "Skip authors whose name or email contains this (repeatable)")]
    pub not_authors: Vec<String>,

    #[arg(long, help = "Include merge commits")]
    pub merges: bool,

    #[arg(long, short, value_enum, default_value_t = Mode::Commits, help = "Metric to rank by")]
    pub mode: Mode,
}

impl CommonArgs {
    pub fn engine_config(&self) -> EngineConfig {
        let env_disabled = std::env::var_os(DISABLE_CACHE_ENV).is_some_and(|v| !v.is_empty());
        EngineConfig {
            cache_enabled: !self.no_cache && !env_disabled,
            cache_dir: self.cache_dir.clone(),
            workers: self.workers,
        }
    }

    pub fn query(&self, view: View, pathspecs: Vec<String>) -> Query {
        Query {
            range: RevRange::new(self.revs.iter().cloned()),
            filters: FilterArgs {
                authors: self.authors.clone(),
                not_authors: self.not_authors.clone(),
                since: self.since.clone(),
                until: self.until.clone(),
                include_merges: self.merges,
                pathspecs,
            },
            mode: self.mode,
            view,
        }
    }
}

#[derive(Args, Clone, Copy, Debug)]
pub struct FormatArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool,

    #[arg(long, help = "Output as NDJSON")]
    pub ndjson: bool,

    #[arg(short = 'e', long = "email", help = "Label authors by email address")]
    pub show_email: bool,
}

impl FormatArgs {
    fn render(self, limit: Option<usize>, depth: Option<usize>) -> Render {
        Render {
            format: Format::from_flags(self.json, self.ndjson),
            limit,
            depth,
            show_email: self.show_email,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Contributors ranked by the chosen mode
    Table {
        #[clap(flatten)]
        format: FormatArgs,

        #[arg(long, short = 'n', default_value_t = DEFAULT_TABLE_LIMIT, help = "Show at most this many authors (0 for all)")]
        limit: usize,

        #[arg(help = "Limit to these paths (':!path' excludes)")]
        paths: Vec<String>,
    },
    /// Directory tree with rolled-up stats and the top contributor per entry
    Tree {
        #[clap(flatten)]
        format: FormatArgs,

        #[arg(long, short, help = "Include files without matching commits")]
        all: bool,

        #[arg(long, help = "Maximum directory depth to show")]
        depth: Option<usize>,

        #[arg(help = "Limit to these paths (':!path' excludes)")]
        paths: Vec<String>,
    },
    /// Top contributor per day, month or year
    #[command(alias = "hist")]
    Timeline {
        #[clap(flatten)]
        format: FormatArgs,

        #[arg(help = "Limit to these paths (':!path' excludes)")]
        paths: Vec<String>,
    },
    /// Matching commits, oldest first
    Log {
        #[clap(flatten)]
        format: FormatArgs,

        #[arg(long, help = "Show only the most recent N commits")]
        limit: Option<usize>,

        #[arg(help = "Limit to these paths (':!path' excludes)")]
        paths: Vec<String>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn execute(self) -> Result<()> {
        let (view, paths, render) = match self.command {
            Commands::Table {
                format,
                limit,
                paths,
            } => (View::Table, paths, format.render((limit > 0).then_some(limit), None)),
            Commands::Tree {
                format,
                all,
                depth,
                paths,
            } => (View::Tree { show_all: all }, paths, format.render(None, depth)),
            Commands::Timeline { format, paths } => (View::Timeline, paths, format.render(None, None)),
            Commands::Log {
                format,
                limit,
                paths,
            } => (View::History, paths, format.render(limit, None)),
        };
        crate::output::exec(self.common, view, paths, render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_flags_become_a_query() {
        let cli = Cli::try_parse_from([
            "gwho",
            "--author",
            "alice",
            "--author",
            "bob",
            "--merges",
            "--rev",
            "v1..main",
            "--mode",
            "last-modified",
            "tree",
            "--all",
            "src",
            ":!src/gen",
        ])
        .unwrap();

        let Commands::Tree { all, ref paths, .. } = cli.command else {
            panic!("expected tree");
        };
        assert!(all);
        let query = cli.common.query(View::Tree { show_all: all }, paths.clone());
        assert_eq!(query.filters.authors, ["alice", "bob"]);
        assert!(query.filters.include_merges);
        assert_eq!(query.filters.pathspecs, ["src", ":!src/gen"]);
        assert_eq!(query.range.revs, ["v1..main"]);
        assert_eq!(query.mode, Mode::LastModified);
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["gwho", "table"]).unwrap();
        let query = cli.common.query(View::Table, Vec::new());
        assert_eq!(query.range, RevRange::default());
        assert!(!query.filters.include_merges);
        assert_eq!(query.mode, Mode::Commits);

        let config = EngineConfig {
            cache_enabled: true,
            ..cli.common.engine_config()
        };
        assert_eq!(config.workers, None);

        let Commands::Table { limit, format, .. } = cli.command else {
            panic!("expected table");
        };
        assert_eq!(limit, 10);
        assert!(!format.show_email);

        let no_cache = Cli::try_parse_from(["gwho", "--no-cache", "log"]).unwrap();
        assert!(!no_cache.common.engine_config().cache_enabled);
    }

    #[test]
    fn hist_is_an_alias_for_timeline() {
        let cli = Cli::try_parse_from(["gwho", "-m", "lines", "hist", "-e", "src"]).unwrap();
        let Commands::Timeline { format, paths } = cli.command else {
            panic!("expected timeline");
        };
        assert!(format.show_email);
        assert_eq!(paths, ["src"]);
        assert_eq!(cli.common.mode, Mode::Lines);

        let cli = Cli::try_parse_from(["gwho", "table", "-n", "0", "-e"]).unwrap();
        let Commands::Table { limit, format, .. } = cli.command else {
            panic!("expected table");
        };
        assert_eq!(limit, 0);
        assert!(format.show_email);
    }
}
