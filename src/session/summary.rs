use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::transcript::{Message, Role};

pub const UNTITLED: &str = "Untitled session";

const TITLE_MAX_CHARS: usize = 100;
const INTENT_MAX_CHARS: usize = 80;
/// Short intents get an "(edited ...)" suffix even for one or two files.
const INTENT_CONTEXT_BELOW_CHARS: usize = 60;

lazy_static! {
    static ref FILE_REFERENCE: Regex = Regex::new(r"@[\w./-]+").unwrap();
}

/// Quick-list title: the first line of the first real user prompt.
///
/// Bare slash-command invocations (`/clear`) are not prompts.
pub fn summarize(messages: &[Message]) -> String {
    first_user_line(messages)
        .map(|line| truncate_chars(&line, TITLE_MAX_CHARS))
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn first_user_line(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.first_text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .filter(|text| !(text.starts_with('/') && !text.contains(' ')))
        .map(|text| text.lines().next().unwrap_or_default().trim().to_string())
        .find(|line| !line.is_empty())
}

/// Tool activity gathered across a transcript, in first-seen order.
#[derive(Debug, Default)]
struct Activity {
    files_edited: Vec<String>,
    files_read: Vec<String>,
    tools_used: Vec<String>,
}

impl Activity {
    fn collect(messages: &[Message]) -> Self {
        let mut activity = Activity::default();
        let mut seen_tools = BTreeSet::new();

        for (_, name, input) in messages.iter().flat_map(|m| m.tool_uses()) {
            if seen_tools.insert(name.to_string()) {
                activity.tools_used.push(name.to_string());
            }

            let file_path = input.get("file_path").and_then(|v| v.as_str());
            let target = match name {
                "Edit" | "Write" => &mut activity.files_edited,
                "Read" => &mut activity.files_read,
                _ => continue,
            };
            if let Some(path) = file_path {
                if !target.iter().any(|p| p == path) {
                    target.push(path.to_string());
                }
            }
        }

        activity
    }
}

/// Richer session title combining the user's intent with what was edited.
///
/// Without a usable intent it falls back, in order, to files edited, files
/// read, tools used, and finally [`UNTITLED`].
pub fn generate_session_summary(messages: &[Message]) -> String {
    let activity = Activity::collect(messages);

    if let Some(intent) = user_intent(messages) {
        let mut summary = truncate_chars(&intent, INTENT_MAX_CHARS);
        let edited = &activity.files_edited;

        if !edited.is_empty() {
            let names = basenames(edited, 2);
            if edited.len() > 2 {
                summary.push_str(&format!(" (edited {names} +{} more)", edited.len() - 2));
            } else if summary.chars().count() < INTENT_CONTEXT_BELOW_CHARS {
                summary.push_str(&format!(" (edited {names})"));
            }
        }

        return summary;
    }

    if !activity.files_edited.is_empty() {
        let names = basenames(&activity.files_edited, 3);
        let count = activity.files_edited.len();
        return if count > 3 {
            format!("Edited {names} +{} more files", count - 3)
        } else {
            format!("Edited {names}")
        };
    }

    if !activity.files_read.is_empty() {
        let names = basenames(&activity.files_read, 3);
        let count = activity.files_read.len();
        return if count > 3 {
            format!("Explored {names} +{} more", count - 3)
        } else {
            format!("Explored {names}")
        };
    }

    if !activity.tools_used.is_empty() {
        let tools: Vec<&str> = activity.tools_used.iter().take(3).map(String::as_str).collect();
        return format!("Session using {}", tools.join(", "));
    }

    UNTITLED.to_string()
}

/// First line of the first user message that is not a slash command, with
/// `@path` references removed. Only the first user message carrying text is
/// considered.
fn user_intent(messages: &[Message]) -> Option<String> {
    let text = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.first_text())
        .map(str::trim)
        .find(|text| !text.is_empty() && !text.starts_with('/'))?;

    let first_line = text.lines().next().unwrap_or_default().trim();
    let intent = FILE_REFERENCE.replace_all(first_line, "").trim().to_string();
    (!intent.is_empty()).then_some(intent)
}

fn basenames(paths: &[String], limit: usize) -> String {
    paths
        .iter()
        .take(limit)
        .map(|p| p.rsplit('/').next().unwrap_or(p))
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}
