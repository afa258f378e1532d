//! Mapping between encoded project directory names and real paths.
//!
//! Transcripts live under `<projects>/<encoded>/` where `<encoded>` is the
//! project's absolute path with every `/` replaced by `-`, so
//! `/home/user/my-proj` becomes `-home-user-my-proj`. The encoding is lossy:
//! a literal hyphen and a separator look the same. We recover the path by
//! probing which candidate directories actually exist.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CODE_DIR_TAIL: Regex = Regex::new(r"-code-(.+)$").unwrap();
}

/// Returns the default transcript root, `~/.claude/projects`.
pub fn claude_projects_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// Resolve an encoded project directory name against the filesystem root.
pub fn resolve_project_path(encoded_name: &str) -> PathBuf {
    resolve_project_path_from(Path::new("/"), encoded_name)
}

/// Resolve an encoded project directory name beneath `root`.
///
/// Greedy: at each step take the longest run of remaining hyphen-joined
/// tokens that names an existing directory under the prefix resolved so far.
/// When no run exists, the remaining tokens are joined verbatim and the
/// search stops, so a path that no longer exists still resolves to a
/// best-effort approximation.
pub fn resolve_project_path_from(root: &Path, encoded_name: &str) -> PathBuf {
    let stripped = encoded_name.strip_prefix('-').unwrap_or(encoded_name);
    if stripped.is_empty() {
        return root.to_path_buf();
    }

    let parts: Vec<&str> = stripped.split('-').collect();
    let mut current = root.to_path_buf();
    let mut i = 0;

    while i < parts.len() {
        let matched = (1..=parts.len() - i).rev().find_map(|len| {
            let candidate = current.join(parts[i..i + len].join("-"));
            candidate.is_dir().then_some((candidate, len))
        });

        match matched {
            Some((candidate, len)) => {
                current = candidate;
                i += len;
            }
            None => {
                current = current.join(parts[i..].join("-"));
                break;
            }
        }
    }

    current
}

/// Human-readable project name: the last path component, else the tail of
/// the encoded name after `-code-`, else the path itself.
pub fn project_name(project_path: &Path, encoded_dir: &str) -> String {
    if let Some(name) = project_path.file_name().and_then(|n| n.to_str()) {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    if let Some(caps) = CODE_DIR_TAIL.captures(encoded_dir) {
        return caps[1].to_string();
    }

    project_path.display().to_string()
}
