use crate::cli::CommonArgs;
use crate::git::GitRepo;
use crate::model::{HistoryEntry, Identity, TableRow, SCHEMA_VERSION};
use crate::query::{Engine, Report, View};
use crate::rank::Mode;
use crate::timeline::TimeBucket;
use crate::tree::TreeEntry;
use anyhow::Context;
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_TABLE_LIMIT: usize = 10;

const BAR_WIDTH: u64 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
    Ndjson,
}

impl Format {
    pub fn from_flags(json: bool, ndjson: bool) -> Self {
        if json {
            Format::Json
        } else if ndjson {
            Format::Ndjson
        } else {
            Format::Text
        }
    }
}

/// Presentation-only settings; none of these reach the engine.
#[derive(Debug, Clone, Copy)]
pub struct Render {
    pub format: Format,
    pub limit: Option<usize>,
    pub depth: Option<usize>,
    /// Label authors by email instead of name.
    pub show_email: bool,
}

#[derive(Serialize)]
struct Meta<'a> {
    version: u32,
    generated_at: DateTime<Utc>,
    repository_path: String,
    mode: Mode,
    revs: &'a [String],
    since: Option<&'a str>,
    until: Option<&'a str>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(flatten)]
    meta: &'a Meta<'a>,
    entries: T,
}

pub fn exec(
    common: CommonArgs,
    view: View,
    pathspecs: Vec<String>,
    render: Render,
) -> anyhow::Result<()> {
    let repo = GitRepo::open(common.repo.as_ref()).context("Failed to open git repository")?;
    let repository_path = repo.path().to_string_lossy().to_string();

    let query = common.query(view, pathspecs);
    let engine = Engine::new(repo, common.engine_config());
    let outcome = engine.run(&query).context("Failed to analyse repository history")?;

    let meta = Meta {
        version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        repository_path,
        mode: query.mode,
        revs: &query.range.revs,
        since: common.since.as_deref(),
        until: common.until.as_deref(),
    };
    match (outcome.report, render.format) {
        (Report::Table(rows), Format::Json) => print_envelope(&meta, Entries::Table(&rows))?,
        (Report::Table(rows), Format::Ndjson) => print_ndjson(&rows)?,
        (Report::Table(rows), Format::Text) => output_table(&rows, query.mode, &render),

        (Report::Tree(root), format) => {
            let entry = root.render(query.mode, render.depth);
            match format {
                Format::Json => print_envelope(&meta, Entries::Tree(&entry))?,
                Format::Ndjson => print_ndjson(&flatten(entry))?,
                Format::Text => output_tree(&entry, query.mode, render.show_email),
            }
        }

        (Report::Timeline(buckets), Format::Json) => {
            print_envelope(&meta, Entries::Timeline(&buckets))?
        }
        (Report::Timeline(buckets), Format::Ndjson) => print_ndjson(&buckets)?,
        (Report::Timeline(buckets), Format::Text) => {
            output_timeline(&buckets, query.mode, render.show_email)
        }

        (Report::History(entries), Format::Json) => {
            print_envelope(&meta, Entries::History(&entries))?
        }
        (Report::History(entries), Format::Ndjson) => print_ndjson(&entries)?,
        (Report::History(entries), Format::Text) => output_history(&entries, &render),
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(untagged)]
enum Entries<'a> {
    Table(&'a [TableRow]),
    Tree(&'a TreeEntry),
    Timeline(&'a [TimeBucket]),
    History(&'a [HistoryEntry]),
}

fn print_envelope(meta: &Meta<'_>, entries: Entries<'_>) -> anyhow::Result<()> {
    print_json(&Envelope { meta, entries })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_ndjson<T: Serialize>(items: &[T]) -> anyhow::Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}

/// Pre-order list of nodes, each without its children.
fn flatten(root: TreeEntry) -> Vec<TreeEntry> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(mut node) = stack.pop() {
        let children = std::mem::take(&mut node.children);
        out.push(node);
        stack.extend(children.into_iter().rev());
    }
    out
}

fn author<'a>(name: &'a str, email: &'a str, show_email: bool) -> &'a str {
    if show_email {
        email
    } else {
        name
    }
}

fn output_table(rows: &[TableRow], mode: Mode, render: &Render) {
    if rows.is_empty() {
        println!("No commits match");
        return;
    }

    println!(
        "{:<40} {:>8} {:>16} {:>6} {:>14}",
        style(if render.show_email { "Email" } else { "Author" }).bold(),
        style("Commits").bold(),
        style("Lines (+/-)").bold(),
        style("Files").bold(),
        style("Last edit").bold()
    );
    println!("{}", "─".repeat(88));

    let now = Utc::now();
    let limit = render.limit.unwrap_or(rows.len());
    for row in rows.iter().take(limit) {
        let lines = format!("+{} / -{}", row.lines_added, row.lines_removed);
        println!(
            "{:<40} {:>8} {:>16} {:>6} {:>14}",
            truncate(author(&row.name, &row.email, render.show_email), 40),
            row.commits,
            lines,
            row.file_count,
            age(row.last_commit_time, now)
        );
    }
    if rows.len() > limit {
        println!("\n... and {} more authors", rows.len() - limit);
    }
    println!("\n{}", style(format!("ranked by {}", mode.label())).dim());
}

fn output_tree(root: &TreeEntry, mode: Mode, show_email: bool) {
    if root.children.is_empty() {
        println!("No files match");
        return;
    }

    let now = Utc::now();
    println!(
        "{} {}",
        style(".").bold(),
        style(metric(root, mode, now)).dim()
    );
    print_children(root, "", mode, now, show_email);
}

fn print_children(
    node: &TreeEntry,
    prefix: &str,
    mode: Mode,
    now: DateTime<Utc>,
    show_email: bool,
) {
    let count = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        let name = if child.is_file {
            style(child.name.clone())
        } else {
            style(format!("{}/", child.name)).blue().bold()
        };
        let who = child
            .top_contributor
            .as_ref()
            .map(|id| author(&id.name, &id.email, show_email))
            .unwrap_or("-");

        println!(
            "{prefix}{branch}{name} {} {}",
            style(metric(child, mode, now)).dim(),
            style(who).cyan()
        );

        let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
        print_children(child, &nested, mode, now, show_email);
    }
}

fn metric(entry: &TreeEntry, mode: Mode, now: DateTime<Utc>) -> String {
    match mode {
        Mode::Commits => format!("{} commits", entry.commits),
        Mode::Lines => format!("+{} -{}", entry.lines_added, entry.lines_removed),
        Mode::Files => format!("{} files", entry.file_count),
        Mode::LastModified => age(entry.last_commit_time, now),
    }
}

/// One bar per bucket: `#` for the top contributor, `-` for everyone else.
fn output_timeline(buckets: &[TimeBucket], mode: Mode, show_email: bool) {
    if buckets.is_empty() {
        println!("No commits match");
        return;
    }

    let max = buckets
        .iter()
        .map(|b| b.total_value(mode))
        .max()
        .unwrap_or(0)
        .max(BAR_WIDTH);
    let mut previous: Option<&Identity> = None;
    for bucket in buckets {
        let Some(top) = bucket.top_contributor.as_ref() else {
            println!("{} ┤", bucket.label);
            continue;
        };
        let value = bar_len(bucket.value(mode), max);
        let total = bar_len(bucket.total_value(mode), max);
        let bar = "#".repeat(value);
        let rest = format!(
            "{:<width$}",
            "-".repeat(total.saturating_sub(value)),
            width = (BAR_WIDTH as usize).saturating_sub(value)
        );

        let who = truncate(author(&top.name, &top.email, show_email), 25);
        let metric = match (mode, bucket.top.as_ref()) {
            (Mode::Lines, Some(stats)) => format!(
                "({} / {})",
                style(stats.lines_added).green(),
                style(stats.lines_removed).red()
            ),
            _ => format!("({})", bucket.value(mode)),
        };
        let label = format!("{who} {metric}");
        // Same winner as the bucket before is dimmed.
        let label = if previous == Some(top) {
            style(label).dim().to_string()
        } else {
            label
        };

        println!("{} ┤ {bar}{}  {label}", bucket.label, style(rest).dim());
        previous = Some(top);
    }
}

fn bar_len(value: u64, max: u64) -> usize {
    if max == 0 {
        return 0;
    }
    (value * BAR_WIDTH).div_ceil(max) as usize
}

fn output_history(entries: &[HistoryEntry], render: &Render) {
    if entries.is_empty() {
        println!("No commits match");
        return;
    }

    let skip = render.limit.map_or(0, |l| entries.len().saturating_sub(l));
    for e in &entries[skip..] {
        let marker = if e.is_merge { " (merge)" } else { "" };
        println!(
            "{} {} {} {}{}",
            style(&e.short_hash).yellow(),
            style(e.timestamp.format("%Y-%m-%d")).dim(),
            author(&e.name, &e.email, render.show_email),
            style(format!("+{} -{}", e.lines_added, e.lines_removed)).green(),
            marker
        );
        for file in &e.files {
            println!("    {file}");
        }
    }
}

/// Coarse "3days ago" rendering of a timestamp.
fn age(time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(time) = time else {
        return "never".to_string();
    };
    let secs = (now - time).num_seconds().max(0) as u64;
    let rounded = match secs {
        s if s < 3_600 => return "just now".to_string(),
        s if s < 86_400 => s / 3_600 * 3_600,
        s => s / 86_400 * 86_400,
    };
    format!("{} ago", humantime::format_duration(Duration::from_secs(rounded)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
