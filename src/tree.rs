//! Directory rollup of per-path statistics.
//!
//! Every node holds the sum of the stats of the files beneath it (min/max
//! for times) and the merged per-contributor breakdown, so any directory can
//! be ranked or asked for its top contributor without revisiting leaves.

use crate::model::{Identity, PathStats, Stats};
use crate::rank::{compare_named, rank_contributors, Mode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    pub name: String,
    pub path: String,
    pub is_file: bool,
    pub stats: Stats,
    pub contributors: BTreeMap<Identity, Stats>,
    pub children: BTreeMap<String, DirectoryNode>,
}

impl DirectoryNode {
    fn new(name: &str, path: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            ..Self::default()
        }
    }

    fn absorb(&mut self, leaf: &PathStats) {
        self.stats.merge(&leaf.stats);
        for (identity, stats) in &leaf.contributors {
            self.contributors
                .entry(identity.clone())
                .or_default()
                .merge(stats);
        }
    }

    fn insert(&mut self, path: &str, leaf: &PathStats) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return;
        }

        self.absorb(leaf);
        let mut node = self;
        for (i, segment) in segments.iter().enumerate() {
            let child_path = segments[..=i].join("/");
            node.is_file = false;
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| DirectoryNode::new(segment, child_path));
            node.absorb(leaf);
        }
        if node.children.is_empty() {
            node.is_file = true;
        }
    }

    /// Looks up a descendant by slash-separated path.
    pub fn find(&self, path: &str) -> Option<&DirectoryNode> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.children.get(segment))
    }

    /// Children ordered by `mode`, ties by name.
    pub fn ranked_children(&self, mode: Mode) -> Vec<&DirectoryNode> {
        let mut children: Vec<&DirectoryNode> = self.children.values().collect();
        children.sort_by(|a, b| compare_named(mode, (&a.name, &a.stats), (&b.name, &b.stats)));
        children
    }

    pub fn top_contributor(&self, mode: Mode) -> Option<(&Identity, &Stats)> {
        rank_contributors(mode, self.contributors.iter())
            .into_iter()
            .next()
    }

    /// All file leaves beneath this node.
    pub fn files(&self) -> Vec<&DirectoryNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_file {
                out.push(node);
            }
            stack.extend(node.children.values());
        }
        out
    }

    /// Serializable, ranked view of the tree down to `max_depth` levels.
    pub fn render(&self, mode: Mode, max_depth: Option<usize>) -> TreeEntry {
        self.render_at(mode, max_depth, 0)
    }

    fn render_at(&self, mode: Mode, max_depth: Option<usize>, depth: usize) -> TreeEntry {
        let descend = max_depth.map_or(true, |max| depth < max);
        TreeEntry {
            name: self.name.clone(),
            path: self.path.clone(),
            is_file: self.is_file,
            commits: self.stats.commits,
            lines_added: self.stats.lines_added,
            lines_removed: self.stats.lines_removed,
            file_count: self.stats.file_count,
            first_commit_time: self.stats.first_commit_time,
            last_commit_time: self.stats.last_commit_time,
            top_contributor: self.top_contributor(mode).map(|(id, _)| id.clone()),
            children: if descend {
                self.ranked_children(mode)
                    .into_iter()
                    .map(|c| c.render_at(mode, max_depth, depth + 1))
                    .collect()
            } else {
                Vec::new()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    pub is_file: bool,
    pub commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub file_count: u64,
    pub first_commit_time: Option<DateTime<Utc>>,
    pub last_commit_time: Option<DateTime<Utc>>,
    pub top_contributor: Option<Identity>,
    pub children: Vec<TreeEntry>,
}

/// Folds per-path stats into a directory tree rooted at the repository root.
///
/// With `show_all` unset, paths without any surviving activity are left out,
/// and so are directories left empty by that.
pub fn build_tree(paths: &BTreeMap<String, PathStats>, show_all: bool) -> DirectoryNode {
    let mut root = DirectoryNode::new("", String::new());
    for (path, stats) in paths {
        if !show_all && stats.stats.is_empty() {
            continue;
        }
        root.insert(path, stats);
    }
    root
}
