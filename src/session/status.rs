//! Session status inference.
//!
//! Status is decided by the first matching rule in [`RULES`]. The order is
//! load-bearing: a pending user question beats tool bookkeeping, and the
//! recency debounce must run before the plain-text rule or the status
//! flickers between consecutive tool calls.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::SessionStatus;
use crate::transcript::{ContentBlock, Message, Role};

/// Past this age a session is idle whatever its transcript says.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Within this age a finished-looking session is still reported as working.
pub const RECENT_THRESHOLD: Duration = Duration::from_secs(30);

/// Tool the assistant uses to put a question to the user.
pub const ASK_USER_TOOL: &str = "AskUserQuestion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThresholds {
    pub stale: Duration,
    pub recent: Duration,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            stale: STALE_THRESHOLD,
            recent: RECENT_THRESHOLD,
        }
    }
}

/// Everything a rule may look at.
pub struct StatusInput<'a> {
    pub messages: &'a [Message],
    /// Age of the file at evaluation time, when known.
    pub age: Option<Duration>,
    pub thresholds: StatusThresholds,
}

impl StatusInput<'_> {
    fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn last_from_assistant(&self) -> Option<&Message> {
        self.last().filter(|m| m.role == Role::Assistant)
    }

    /// Whether the last message invokes a tool that no result in the
    /// transcript answers.
    fn has_unanswered_tool_use(&self) -> bool {
        let Some(last) = self.last() else {
            return false;
        };

        let answered: HashSet<&str> = self
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect();

        last.tool_uses().any(|(id, _, _)| !answered.contains(id))
    }
}

pub type Rule = fn(&StatusInput<'_>) -> Option<SessionStatus>;

/// Ordered status rules; the first `Some` wins.
pub const RULES: &[(&str, Rule)] = &[
    ("empty", rule_empty),
    ("stale", rule_stale),
    ("user_spoke_last", rule_user_spoke_last),
    ("asks_user", rule_asks_user),
    ("tool_in_flight", rule_tool_in_flight),
    ("recently_modified", rule_recently_modified),
    ("answered_with_text", rule_answered_with_text),
];

fn rule_empty(input: &StatusInput<'_>) -> Option<SessionStatus> {
    input.messages.is_empty().then_some(SessionStatus::Idle)
}

fn rule_stale(input: &StatusInput<'_>) -> Option<SessionStatus> {
    let age = input.age?;
    (age > input.thresholds.stale).then_some(SessionStatus::Idle)
}

fn rule_user_spoke_last(input: &StatusInput<'_>) -> Option<SessionStatus> {
    let last = input.last()?;
    (last.role == Role::User).then_some(SessionStatus::Working)
}

fn rule_asks_user(input: &StatusInput<'_>) -> Option<SessionStatus> {
    let last = input.last_from_assistant()?;
    last.tool_uses()
        .any(|(_, name, _)| name == ASK_USER_TOOL)
        .then_some(SessionStatus::Awaiting)
}

fn rule_tool_in_flight(input: &StatusInput<'_>) -> Option<SessionStatus> {
    input
        .has_unanswered_tool_use()
        .then_some(SessionStatus::Working)
}

fn rule_recently_modified(input: &StatusInput<'_>) -> Option<SessionStatus> {
    let age = input.age?;
    (age < input.thresholds.recent).then_some(SessionStatus::Working)
}

fn rule_answered_with_text(input: &StatusInput<'_>) -> Option<SessionStatus> {
    let last = input.last_from_assistant()?;
    let has_text = last
        .content
        .iter()
        .filter_map(ContentBlock::as_text)
        .any(|t| !t.trim().is_empty());

    (has_text && !input.has_unanswered_tool_use()).then_some(SessionStatus::Awaiting)
}

/// Run the rules against an explicit clock.
pub fn evaluate(
    messages: &[Message],
    last_modified: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    thresholds: StatusThresholds,
) -> SessionStatus {
    // A modification time in the future counts as "just now".
    let age = last_modified.map(|lm| (now - lm).to_std().unwrap_or(Duration::ZERO));
    let input = StatusInput {
        messages,
        age,
        thresholds,
    };

    RULES
        .iter()
        .find_map(|(_, rule)| rule(&input))
        .unwrap_or(SessionStatus::Idle)
}

/// Status of a session right now, using the default thresholds.
pub fn determine_session_status(
    messages: &[Message],
    last_modified: Option<DateTime<Utc>>,
) -> SessionStatus {
    evaluate(messages, last_modified, Utc::now(), StatusThresholds::default())
}
