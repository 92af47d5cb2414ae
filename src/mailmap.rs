//! Mailmap-based identity resolution.
//!
//! Rules come from up to two files: the repository's `.mailmap` and the file
//! named by the `mailmap.file` git setting. Neither has to exist. A missing or
//! unreadable file contributes no rules, and its absence is recorded in the
//! fingerprint so that creating or deleting a mailmap invalidates cached
//! history.
//!
//! Lookup is a single hop. A rule matching both commit name and email beats
//! an email-only rule; otherwise the first matching rule wins, with local
//! rules ordered before global ones.

use crate::model::{CommitRecord, Identity};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailmapOrigin {
    Local,
    Global,
}

/// Where mailmap files may live for a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailmapSources {
    pub local: Option<PathBuf>,
    pub global: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailmapRule {
    pub proper_name: Option<String>,
    pub proper_email: Option<String>,
    pub commit_name: Option<String>,
    pub commit_email: String,
    pub origin: MailmapOrigin,
}

impl MailmapRule {
    fn matches(&self, raw: &Identity) -> bool {
        if !self.commit_email.eq_ignore_ascii_case(&raw.email) {
            return false;
        }
        match &self.commit_name {
            Some(name) => name.to_lowercase() == raw.name.to_lowercase(),
            None => true,
        }
    }

    fn apply(&self, raw: &Identity) -> Identity {
        Identity {
            name: self.proper_name.clone().unwrap_or_else(|| raw.name.clone()),
            email: self.proper_email.clone().unwrap_or_else(|| raw.email.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mailmap {
    rules: Vec<MailmapRule>,
    by_email: HashMap<String, Vec<usize>>,
    fingerprint: String,
}

impl Mailmap {
    /// A resolver with no rules; every identity passes through unchanged.
    pub fn empty() -> Self {
        Self::from_bytes(None, None)
    }

    /// Reads whichever sources exist. Never fails.
    pub fn load(sources: &MailmapSources) -> Self {
        let local = sources.local.as_deref().and_then(read_source);
        let global = sources.global.as_deref().and_then(read_source);
        let mailmap = Self::from_bytes(local.as_deref(), global.as_deref());
        debug!(
            local = local.is_some(),
            global = global.is_some(),
            rules = mailmap.rules.len(),
            fingerprint = %mailmap.fingerprint,
            "loaded mailmap"
        );
        mailmap
    }

    pub fn from_bytes(local: Option<&[u8]>, global: Option<&[u8]>) -> Self {
        let mut rules = Vec::new();
        if let Some(bytes) = local {
            rules.extend(parse_rules(&String::from_utf8_lossy(bytes), MailmapOrigin::Local));
        }
        if let Some(bytes) = global {
            rules.extend(parse_rules(&String::from_utf8_lossy(bytes), MailmapOrigin::Global));
        }

        let mut by_email: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            by_email
                .entry(rule.commit_email.to_ascii_lowercase())
                .or_default()
                .push(i);
        }

        Self {
            rules,
            by_email,
            fingerprint: fingerprint(local, global),
        }
    }

    pub fn rules(&self) -> &[MailmapRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Content fingerprint of the sources this resolver was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn resolve(&self, raw: &Identity) -> Identity {
        let Some(candidates) = self.by_email.get(&raw.email.to_ascii_lowercase()) else {
            return raw.clone();
        };

        let mut email_only: Option<&MailmapRule> = None;
        for &i in candidates {
            let rule = &self.rules[i];
            if !rule.matches(raw) {
                continue;
            }
            if rule.commit_name.is_some() {
                return rule.apply(raw);
            }
            if email_only.is_none() {
                email_only = Some(rule);
            }
        }

        match email_only {
            Some(rule) => rule.apply(raw),
            None => raw.clone(),
        }
    }

    /// Rewrites the record's author to its canonical identity.
    pub fn canonicalize(&self, mut record: CommitRecord) -> CommitRecord {
        if !self.rules.is_empty() {
            record.author = self.resolve(&record.author);
        }
        record
    }
}

impl Default for Mailmap {
    fn default() -> Self {
        Self::empty()
    }
}

fn read_source(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "mailmap not present");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable mailmap");
            None
        }
    }
}

fn fingerprint(local: Option<&[u8]>, global: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    for (tag, content) in [("local", local), ("global", global)] {
        hasher.update(tag.as_bytes());
        match content {
            Some(bytes) => {
                hasher.update([1u8]);
                hasher.update((bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
            None => hasher.update([0u8]),
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Parses mailmap text. Lines that do not hold a usable entry are skipped.
pub fn parse_rules(text: &str, origin: MailmapOrigin) -> Vec<MailmapRule> {
    text.lines()
        .filter_map(|line| parse_line(line, origin))
        .collect()
}

fn parse_line(line: &str, origin: MailmapOrigin) -> Option<MailmapRule> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (first_name, first_email, rest) = split_name_email(line)?;
    let second = split_name_email(rest);

    match second {
        None => {
            // `Proper Name <commit@email>`
            Some(MailmapRule {
                proper_name: Some(first_name?),
                proper_email: None,
                commit_name: None,
                commit_email: first_email?,
                origin,
            })
        }
        Some((commit_name, commit_email, _)) => Some(MailmapRule {
            proper_name: first_name,
            proper_email: first_email,
            commit_name,
            commit_email: commit_email?,
            origin,
        }),
    }
}

/// Splits `Name <email> rest` into its parts; empty name or email become `None`.
fn split_name_email(s: &str) -> Option<(Option<String>, Option<String>, &str)> {
    let open = s.find('<')?;
    let close = open + s[open..].find('>')?;
    let name = non_empty(&s[..open]);
    let email = non_empty(&s[open + 1..close]);
    Some((name, email, &s[close + 1..]))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const LOCAL: &str = "\
# team aliases
Benoit Chesneau <bchesneau@gmail.com> <benoitc@enlil.local>
<randall@bleeds.info> <randall.leeds@gmail.com>
Jane Doe <jane@x.com> jdoe <JANE@old.com>
Jane D <jane@x.com> <jane@old.com>
Solo Name <solo@x.com>
";

    fn id(name: &str, email: &str) -> Identity {
        Identity::new(name, email)
    }

    #[test]
    fn parses_all_entry_shapes() {
        let rules = parse_rules(LOCAL, MailmapOrigin::Local);
        assert_eq!(rules.len(), 5);
        assert_eq!(rules[1].proper_name, None);
        assert_eq!(rules[1].proper_email.as_deref(), Some("randall@bleeds.info"));
        assert_eq!(rules[2].commit_name.as_deref(), Some("jdoe"));
        assert_eq!(rules[4].proper_name.as_deref(), Some("Solo Name"));
        assert_eq!(rules[4].commit_email, "solo@x.com");
    }

    #[test]
    fn skips_lines_without_commit_email() {
        let rules = parse_rules("No Email Here\n<> <>\nName <>\n", MailmapOrigin::Local);
        assert!(rules.is_empty());
    }

    #[test]
    fn resolves_email_alias() {
        let mailmap = Mailmap::from_bytes(Some(LOCAL.as_bytes()), None);
        assert_eq!(
            mailmap.resolve(&id("benoitc", "benoitc@enlil.local")),
            id("Benoit Chesneau", "bchesneau@gmail.com")
        );
        assert_eq!(
            mailmap.resolve(&id("Randall", "Randall.Leeds@gmail.com")),
            id("Randall", "randall@bleeds.info")
        );
        assert_eq!(
            mailmap.resolve(&id("Someone", "solo@x.com")),
            id("Solo Name", "solo@x.com")
        );
    }

    #[test]
    fn name_and_email_rule_beats_email_only_rule() {
        let mailmap = Mailmap::from_bytes(Some(LOCAL.as_bytes()), None);
        assert_eq!(
            mailmap.resolve(&id("JDoe", "jane@old.com")),
            id("Jane Doe", "jane@x.com")
        );
        assert_eq!(
            mailmap.resolve(&id("Jane", "jane@old.com")),
            id("Jane D", "jane@x.com")
        );
    }

    #[test]
    fn local_rules_take_precedence_over_global() {
        let local = b"Local Name <local@x.com> <dup@x.com>\n";
        let global = b"Global Name <global@x.com> <dup@x.com>\n";
        let mailmap = Mailmap::from_bytes(Some(local), Some(global));
        assert_eq!(
            mailmap.resolve(&id("d", "dup@x.com")),
            id("Local Name", "local@x.com")
        );
    }

    #[test]
    fn resolution_is_a_single_hop_and_idempotent() {
        let text = b"B <b@x.com> <a@x.com>\nC <c@x.com> <b@x.com>\n";
        let mailmap = Mailmap::from_bytes(Some(text), None);
        assert_eq!(mailmap.resolve(&id("A", "a@x.com")), id("B", "b@x.com"));

        let well_formed = Mailmap::from_bytes(Some(LOCAL.as_bytes()), None);
        let once = well_formed.resolve(&id("benoitc", "benoitc@enlil.local"));
        assert_eq!(well_formed.resolve(&once), once);
    }

    #[test]
    fn unknown_identity_passes_through() {
        let mailmap = Mailmap::from_bytes(Some(LOCAL.as_bytes()), None);
        let raw = id("Nobody", "nobody@x.com");
        assert_eq!(mailmap.resolve(&raw), raw);
        assert_eq!(Mailmap::empty().resolve(&raw), raw);
    }

    #[test]
    fn fingerprint_tracks_presence_and_content() {
        let none = Mailmap::from_bytes(None, None);
        let empty_local = Mailmap::from_bytes(Some(b""), None);
        let empty_global = Mailmap::from_bytes(None, Some(b""));
        let local = Mailmap::from_bytes(Some(LOCAL.as_bytes()), None);
        let edited = Mailmap::from_bytes(Some(b"X <x@x.com> <y@x.com>\n"), None);
        let swapped = Mailmap::from_bytes(None, Some(LOCAL.as_bytes()));

        let all = [&none, &empty_local, &empty_global, &local, &edited, &swapped];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.fingerprint(), b.fingerprint());
            }
        }
        assert_eq!(
            local.fingerprint(),
            Mailmap::from_bytes(Some(LOCAL.as_bytes()), None).fingerprint()
        );
    }

    #[test]
    fn load_degrades_for_missing_and_unreadable_sources() {
        let dir = tempdir().unwrap();
        let local = dir.path().join(".mailmap");
        fs::write(&local, LOCAL).unwrap();

        let sources = MailmapSources {
            local: Some(local.clone()),
            global: Some(dir.path().join("does-not-exist")),
        };
        let mailmap = Mailmap::load(&sources);
        assert_eq!(mailmap.rules().len(), 5);
        assert_eq!(
            mailmap.fingerprint(),
            Mailmap::from_bytes(Some(LOCAL.as_bytes()), None).fingerprint()
        );

        // A directory cannot be read as a file
        let unreadable = MailmapSources {
            local: None,
            global: Some(dir.path().to_path_buf()),
        };
        let mailmap = Mailmap::load(&unreadable);
        assert!(mailmap.is_empty());
        assert_eq!(mailmap.fingerprint(), Mailmap::empty().fingerprint());
    }

    #[test]
    fn removing_and_restoring_reproduces_fingerprint() {
        let dir = tempdir().unwrap();
        let local = dir.path().join(".mailmap");
        let sources = MailmapSources {
            local: Some(local.clone()),
            global: None,
        };

        fs::write(&local, LOCAL).unwrap();
        let before = Mailmap::load(&sources).fingerprint().to_string();
        fs::remove_file(&local).unwrap();
        let removed = Mailmap::load(&sources).fingerprint().to_string();
        fs::write(&local, LOCAL).unwrap();
        let restored = Mailmap::load(&sources).fingerprint().to_string();

        assert_ne!(before, removed);
        assert_eq!(before, restored);
    }
}
