use crate::error::{GwhoError, Result};
use crate::mailmap::MailmapSources;
use crate::model::{CommitRecord, Identity, LineDelta};
use crate::source::{CommitIter, CommitSource, RevRange};
use chrono::{DateTime, Utc};
use gix::object::tree::diff::ChangeDetached;
use gix::objs::tree::EntryMode;
use gix::{discover, ObjectId, Repository};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAILMAP_FILE: &str = ".mailmap";

/// Only this many leading bytes are inspected for NUL when sniffing binaries.
const BINARY_SNIFF_LEN: usize = 8192;

pub struct GitRepo {
    repo: Repository,
    path: PathBuf,
}

impl GitRepo {
    /// Open a repository at `path`, or current dir if `None`
    pub fn open<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let repo_path = match path {
            Some(p) => p.as_ref().to_path_buf(),
            None => std::env::current_dir()?,
        };

        let repo = discover(&repo_path)?;
        let path = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();
        debug!(path = %path.display(), "opened repository");

        Ok(Self { repo, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, rev: &str) -> Result<ObjectId> {
        let id = self
            .repo
            .rev_parse_single(rev)
            .map_err(|e| GwhoError::GitRepo(format!("Invalid revision '{rev}': {e}")))?;
        let commit = id
            .object()?
            .peel_to_commit()
            .map_err(|_| GwhoError::GitRepo(format!("Not a commit: {rev}")))?;
        Ok(commit.id)
    }

    /// Every commit reachable from `tips`, parents included.
    fn ancestry(&self, tips: &[ObjectId]) -> Result<HashSet<ObjectId>> {
        let mut seen = HashSet::new();
        let mut stack: Vec<ObjectId> = tips.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let commit = self.repo.find_commit(id)?;
            stack.extend(commit.parent_ids().map(|p| p.detach()));
        }
        Ok(seen)
    }

    fn tips(&self, range: &RevRange) -> Result<(Vec<ObjectId>, Vec<ObjectId>)> {
        let (include, exclude) = range.split()?;
        let include = include
            .iter()
            .map(|r| self.resolve(r))
            .collect::<Result<Vec<_>>>()?;
        let exclude = exclude
            .iter()
            .map(|r| self.resolve(r))
            .collect::<Result<Vec<_>>>()?;
        Ok((include, exclude))
    }

    fn read_commit(&self, id: ObjectId) -> Result<Walked> {
        let commit = self.repo.find_commit(id)?;
        let parents: Vec<ObjectId> = commit.parent_ids().map(|p| p.detach()).collect();

        let secs = commit.time()?.seconds;
        let author = commit.author()?;
        let name = author.name.to_string();
        let email = author.email.to_string();

        if name.trim().is_empty() && email.trim().is_empty() {
            debug!(commit = %id, "skipping commit without author");
            return Ok(Walked { parents, record: None });
        }

        let timestamp = commit_timestamp(id, secs)?;

        let is_merge = parents.len() > 1;
        // Merges carry no per-file diff, like `git log --numstat`.
        let paths = if is_merge {
            BTreeMap::new()
        } else {
            self.diff_paths(id, parents.first().copied())?
        };

        Ok(Walked {
            parents,
            record: Some(CommitRecord {
                hash: id.to_string(),
                author: Identity::new(name, email),
                timestamp,
                is_merge,
                paths,
            }),
        })
    }

    fn diff_paths(
        &self,
        commit_id: ObjectId,
        parent_id: Option<ObjectId>,
    ) -> Result<BTreeMap<String, LineDelta>> {
        let commit_tree = self.repo.find_commit(commit_id)?.tree()?;
        let parent_tree = match parent_id {
            Some(pid) => Some(self.repo.find_commit(pid)?.tree()?),
            None => None,
        };

        let changes: Vec<ChangeDetached> =
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), None)?;

        let mut paths = BTreeMap::new();
        for change in changes {
            if let Some((path, delta)) = self.change_delta(change)? {
                let entry: &mut LineDelta = paths.entry(path).or_default();
                entry.added += delta.added;
                entry.removed += delta.removed;
            }
        }
        Ok(paths)
    }

    fn change_delta(&self, change: ChangeDetached) -> Result<Option<(String, LineDelta)>> {
        let (path, old, new) = match change {
            ChangeDetached::Addition {
                id,
                location,
                entry_mode,
                ..
            } => {
                if !is_file(entry_mode) {
                    return Ok(None);
                }
                (location.to_string(), None, Some(id))
            }
            ChangeDetached::Deletion {
                id,
                location,
                entry_mode,
                ..
            } => {
                if !is_file(entry_mode) {
                    return Ok(None);
                }
                (location.to_string(), Some(id), None)
            }
            ChangeDetached::Modification {
                previous_id,
                id,
                location,
                entry_mode,
                ..
            } => {
                if !is_file(entry_mode) {
                    return Ok(None);
                }
                (location.to_string(), Some(previous_id), Some(id))
            }
            // Renames and copies count against the new path only.
            ChangeDetached::Rewrite {
                source_id,
                id,
                location,
                entry_mode,
                ..
            } => {
                if !is_file(entry_mode) {
                    return Ok(None);
                }
                (location.to_string(), Some(source_id), Some(id))
            }
        };

        let old = old.map(|id| self.blob(id)).transpose()?;
        let new = new.map(|id| self.blob(id)).transpose()?;
        let old = old.as_deref().unwrap_or_default();
        let new = new.as_deref().unwrap_or_default();

        let delta = if is_binary(old) || is_binary(new) {
            LineDelta::default()
        } else {
            line_delta(old, new)
        };
        Ok(Some((path, delta)))
    }

    fn blob(&self, id: ObjectId) -> Result<Vec<u8>> {
        let object = self.repo.find_object(id)?;
        Ok(object.detach().data)
    }

    fn global_mailmap(&self) -> Option<PathBuf> {
        let config = self.repo.config_snapshot();
        let raw = config.string("mailmap.file")?.to_string();
        let path = expand_home(raw.trim());
        debug!(path = %path.display(), "global mailmap configured");
        Some(path)
    }
}

fn commit_timestamp(id: ObjectId, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        GwhoError::DataSource(format!("commit {id} has an out-of-range timestamp ({secs})"))
    })
}

struct Walked {
    parents: Vec<ObjectId>,
    record: Option<CommitRecord>,
}

/// Depth-first walk over the commits of a range, one record per step.
struct CommitWalk<'a> {
    repo: &'a GitRepo,
    stack: Vec<ObjectId>,
    seen: HashSet<ObjectId>,
    progress: ProgressBar,
    yielded: u64,
}

impl<'a> CommitWalk<'a> {
    fn new(repo: &'a GitRepo, tips: Vec<ObjectId>, excluded: HashSet<ObjectId>) -> Self {
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} {pos}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        progress.set_message("Reading commits...");

        Self {
            repo,
            stack: tips,
            seen: excluded,
            progress,
            yielded: 0,
        }
    }
}

impl Iterator for CommitWalk<'_> {
    type Item = Result<CommitRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if !self.seen.insert(id) {
                continue;
            }

            let walked = match self.repo.read_commit(id) {
                Ok(walked) => walked,
                Err(e) => {
                    self.stack.clear();
                    self.progress.abandon();
                    return Some(Err(e));
                }
            };
            self.stack.extend(walked.parents.into_iter().rev());

            if let Some(record) = walked.record {
                self.yielded += 1;
                self.progress.inc(1);
                return Some(Ok(record));
            }
        }

        if !self.progress.is_finished() {
            self.progress.finish_and_clear();
            info!(commits = self.yielded, "finished reading commits");
        }
        None
    }
}

impl CommitSource for GitRepo {
    fn state_fingerprint(&self, range: &RevRange) -> Result<String> {
        let (include, exclude) = range.split()?;
        let mut hasher = Sha256::new();
        for (sign, revs) in [("+", include), ("-", exclude)] {
            for rev in revs {
                let id = self.resolve(&rev)?;
                hasher.update(sign.as_bytes());
                hasher.update(rev.as_bytes());
                hasher.update([0]);
                hasher.update(id.as_bytes());
            }
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn commits(&self, range: &RevRange) -> Result<CommitIter<'_>> {
        let (include, exclude) = self.tips(range)?;
        let excluded = self.ancestry(&exclude)?;
        debug!(
            tips = include.len(),
            excluded = excluded.len(),
            "walking history"
        );
        Ok(Box::new(CommitWalk::new(self, include, excluded)))
    }

    fn tree_paths(&self, range: &RevRange) -> Result<Vec<String>> {
        let (include, _) = self.tips(range)?;
        let mut paths = Vec::new();
        for tip in include {
            let tree = self.repo.find_commit(tip)?.tree()?;
            let mut recorder = gix::traverse::tree::Recorder::default();
            tree.traverse()
                .breadthfirst(&mut recorder)
                .map_err(|e| GwhoError::GitRepo(format!("Failed to list tree: {e}")))?;
            paths.extend(
                recorder
                    .records
                    .into_iter()
                    .filter(|entry| is_file(entry.mode))
                    .map(|entry| entry.filepath.to_string()),
            );
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn mailmap_sources(&self) -> MailmapSources {
        MailmapSources {
            local: self.repo.workdir().map(|dir| dir.join(MAILMAP_FILE)),
            global: self.global_mailmap(),
        }
    }

    fn root(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// Blobs, executables and symlinks; not trees or submodules.
fn is_file(mode: EntryMode) -> bool {
    !mode.is_tree() && !mode.is_commit()
}

fn is_binary(data: &[u8]) -> bool {
    data.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

/// Lines added and removed between two text blobs.
fn line_delta(old: &[u8], new: &[u8]) -> LineDelta {
    let old = String::from_utf8_lossy(old);
    let new = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());

    let mut delta = LineDelta::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => delta.added += 1,
            ChangeTag::Delete => delta.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    delta
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
