//! Session discovery over the transcript root.
//!
//! Layout: one directory per project (named by its encoded path), each
//! holding `<session-id>.jsonl` transcripts plus `agent-*.jsonl` helper files
//! that are never listed. Nothing is cached between calls; every catalog is
//! rebuilt from the files and their modification times.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::chain::group_sessions_into_chains;
use super::paths::{project_name, resolve_project_path_from};
use super::status::{evaluate, StatusThresholds};
use super::summary::generate_session_summary;
use super::tags::{NoTags, Tag, Tagger};
use super::{ProjectSummary, Session, SessionDetail};
use crate::transcript::parser::{is_sidechain_record, parse_session_file};

const TRANSCRIPT_EXT: &str = "jsonl";
const AGENT_FILE_PREFIX: &str = "agent-";

#[derive(Clone)]
pub struct SessionDirectory {
    projects_dir: PathBuf,
    path_root: PathBuf,
    tagger: Arc<dyn Tagger>,
    thresholds: StatusThresholds,
}

impl SessionDirectory {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            path_root: PathBuf::from("/"),
            tagger: Arc::new(NoTags),
            thresholds: StatusThresholds::default(),
        }
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn Tagger>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_thresholds(mut self, thresholds: StatusThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Root that encoded project names are resolved beneath (default `/`).
    pub fn with_path_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.path_root = root.into();
        self
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn thresholds(&self) -> StatusThresholds {
        self.thresholds
    }

    /// Build the full catalog, newest first, with chains assigned.
    ///
    /// Unreadable directories and files are logged and skipped; a single
    /// bad transcript never empties the catalog.
    pub fn discover(&self) -> Vec<Session> {
        let entries = match fs::read_dir(&self.projects_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "cannot read projects directory {}: {e}",
                    self.projects_dir.display()
                );
                return Vec::new();
            }
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(encoded) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            sessions.extend(self.scan_project(&dir, &encoded));
        }

        group_sessions_into_chains(sessions)
    }

    /// Look up one session and load its messages.
    ///
    /// Re-runs discovery so the metadata is current. `None` covers both an
    /// unknown id and a transcript that can no longer be read.
    pub fn get_by_id(&self, session_id: &str) -> Option<SessionDetail> {
        let session = self
            .discover()
            .into_iter()
            .find(|s| s.id == session_id)?;

        match read_transcript(&session.file_path) {
            Ok(content) => {
                let messages = parse_session_file(&content);
                Some(SessionDetail { session, messages })
            }
            Err(e) => {
                debug!("session {session_id} vanished while loading: {e:#}");
                None
            }
        }
    }

    /// Projects with their session counts, busiest first.
    pub fn projects(&self) -> Vec<ProjectSummary> {
        let mut by_path: HashMap<PathBuf, ProjectSummary> = HashMap::new();
        for session in self.discover() {
            by_path
                .entry(session.project.clone())
                .and_modify(|p| p.count += 1)
                .or_insert_with(|| ProjectSummary {
                    name: session.project_name.clone(),
                    path: session.project.clone(),
                    count: 1,
                });
        }

        let mut projects: Vec<ProjectSummary> = by_path.into_values().collect();
        projects.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        projects
    }

    /// Number of sessions carrying each tag.
    pub fn tag_counts(&self) -> BTreeMap<Tag, usize> {
        let mut counts = BTreeMap::new();
        for session in self.discover() {
            for tag in session.tags {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }
        counts
    }

    fn scan_project(&self, dir: &Path, encoded: &str) -> Vec<Session> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read project directory {}: {e}", dir.display());
                return Vec::new();
            }
        };

        let mut transcripts: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_session_transcript(p))
            .collect();
        transcripts.sort();

        if transcripts.is_empty() {
            return Vec::new();
        }

        let project = resolve_project_path_from(&self.path_root, encoded);
        let name = project_name(&project, encoded);

        transcripts
            .into_iter()
            .filter_map(|path| match self.load_session(&path, &project, &name) {
                Ok(session) => session,
                Err(e) => {
                    debug!("skipping transcript {}: {e:#}", path.display());
                    None
                }
            })
            .collect()
    }

    /// Build the catalog entry for one transcript. `Ok(None)` means the file
    /// is not a listable session (side-chain, or nothing parseable in it).
    fn load_session(&self, path: &Path, project: &Path, name: &str) -> Result<Option<Session>> {
        let content = read_transcript(path)?;
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("no modification time for {}", path.display()))?;
        let last_modified = DateTime::<Utc>::from(modified);

        if content.lines().next().is_some_and(is_sidechain_record) {
            return Ok(None);
        }

        let messages = parse_session_file(&content);
        let Some(first) = messages.first() else {
            return Ok(None);
        };

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("transcript name is not valid UTF-8")?
            .to_string();

        Ok(Some(Session {
            id,
            project: project.to_path_buf(),
            project_name: name.to_string(),
            title: generate_session_summary(&messages),
            timestamp: first.timestamp,
            last_modified,
            message_count: messages.len(),
            tags: self.tagger.generate_tags(&messages),
            status: evaluate(&messages, Some(last_modified), Utc::now(), self.thresholds),
            file_path: path.to_path_buf(),
            chain: None,
        }))
    }
}

fn read_transcript(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn is_session_transcript(path: &Path) -> bool {
    let is_jsonl = path.extension().and_then(|e| e.to_str()) == Some(TRANSCRIPT_EXT);
    let is_agent = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(AGENT_FILE_PREFIX));
    is_jsonl && !is_agent && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::transcript::Message;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const USER_LINE: &str = r#"{"type":"user","uuid":"u1","timestamp":"2026-01-01T10:00:00Z","message":{"role":"user","content":"Fix the flaky test"}}"#;
    const ASSISTANT_LINE: &str = r#"{"type":"assistant","uuid":"a1","timestamp":"2026-01-01T10:00:05Z","message":{"id":"msg_1","role":"assistant","content":[{"type":"text","text":"Done."}]}}"#;

    struct Fixture {
        _root: TempDir,
        projects: PathBuf,
        fs_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let projects = root.path().join("projects");
        let fs_root = root.path().join("fs");
        fs::create_dir_all(&projects).unwrap();
        fs::create_dir_all(fs_root.join("work/demo-app")).unwrap();
        Fixture {
            projects,
            fs_root,
            _root: root,
        }
    }

    fn write(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn directory(f: &Fixture) -> SessionDirectory {
        SessionDirectory::new(&f.projects).with_path_root(&f.fs_root)
    }

    #[test]
    fn discovers_sessions_with_metadata() {
        let f = fixture();
        let project_dir = f.projects.join("-work-demo-app");
        write(&project_dir, "abc.jsonl", &[USER_LINE, ASSISTANT_LINE]);

        let sessions = directory(&f).discover();
        assert_eq!(sessions.len(), 1);

        let s = &sessions[0];
        assert_eq!(s.id, "abc");
        assert_eq!(s.project, f.fs_root.join("work/demo-app"));
        assert_eq!(s.project_name, "demo-app");
        assert_eq!(s.title, "Fix the flaky test");
        assert_eq!(s.message_count, 2);
        assert_eq!(s.timestamp.to_rfc3339(), "2026-01-01T10:00:00+00:00");
        assert_eq!(s.file_path, project_dir.join("abc.jsonl"));
        // Written just now, so the debounce keeps it working.
        assert_eq!(s.status, SessionStatus::Working);
        assert!(s.chain.is_none());
    }

    #[test]
    fn skips_agent_sidechain_empty_and_broken_files() {
        let f = fixture();
        let dir = f.projects.join("-work-demo-app");
        write(&dir, "good.jsonl", &[USER_LINE]);
        write(&dir, "agent-123.jsonl", &[USER_LINE]);
        write(
            &dir,
            "side.jsonl",
            &[r#"{"type":"user","isSidechain":true,"message":{"content":"sub task"}}"#, USER_LINE],
        );
        write(&dir, "empty.jsonl", &[]);
        write(&dir, "garbage.jsonl", &["not json", "{also not"]);
        write(&dir, "notes.txt", &[USER_LINE]);

        let ids: Vec<String> = directory(&f).discover().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["good".to_string()]);
    }

    #[test]
    fn missing_projects_dir_yields_empty_catalog() {
        let dir = SessionDirectory::new("/definitely/not/here/projects");
        assert!(dir.discover().is_empty());
        assert!(dir.get_by_id("anything").is_none());
    }

    #[test]
    fn chains_sessions_with_the_same_title() {
        let f = fixture();
        let dir = f.projects.join("-work-demo-app");
        write(&dir, "first.jsonl", &[USER_LINE]);
        let second = write(&dir, "second.jsonl", &[USER_LINE, ASSISTANT_LINE]);
        let older = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(dir.join("first.jsonl"))
            .unwrap()
            .set_modified(older)
            .unwrap();

        let sessions = directory(&f).discover();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].file_path, second);
        let chain = sessions[1].chain.as_ref().expect("chained");
        assert_eq!(chain.chain_id, "second");
        assert_eq!(chain.chain_index, 1);
        assert_eq!(chain.chain_length, 2);
        // Stale by an hour.
        assert_eq!(sessions[1].status, SessionStatus::Idle);
    }

    #[test]
    fn get_by_id_returns_full_messages() {
        let f = fixture();
        write(&f.projects.join("-work-demo-app"), "abc.jsonl", &[USER_LINE, ASSISTANT_LINE]);

        let detail = directory(&f).get_by_id("abc").expect("found");
        assert_eq!(detail.session.id, "abc");
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[1].id, "msg_1");
        assert!(directory(&f).get_by_id("missing").is_none());
    }

    #[test]
    fn projects_and_tag_counts() {
        let f = fixture();
        write(&f.projects.join("-work-demo-app"), "a.jsonl", &[USER_LINE]);
        write(
            &f.projects.join("-work-demo-app"),
            "b.jsonl",
            &[r#"{"type":"user","message":{"content":"Another task"}}"#],
        );
        write(&f.projects.join("-elsewhere"), "c.jsonl", &[USER_LINE]);

        let tagger = |messages: &[Message]| -> Vec<Tag> {
            let mut tags = vec!["all".to_string()];
            if messages.len() > 1 {
                tags.push("long".to_string());
            }
            tags
        };
        let dir = directory(&f).with_tagger(Arc::new(tagger));

        let projects = dir.projects();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].name, "demo-app");
        assert_eq!(projects[0].count, 2);
        assert_eq!(projects[1].name, "elsewhere");
        assert_eq!(projects[1].count, 1);

        let counts = dir.tag_counts();
        assert_eq!(counts.get("all"), Some(&3));
        assert_eq!(counts.get("long"), None);
    }
}
