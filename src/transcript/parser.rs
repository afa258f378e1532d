use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::sanitize::clean_system_content;
use super::{ContentBlock, Message, Role, ToolResultContent};

// ---------------------------------------------------------------------------
// Raw JSONL shapes (private deserialization types)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLine {
    #[serde(rename = "type")]
    line_type: String,
    timestamp: Option<String>,
    uuid: Option<String>,
    #[serde(default)]
    is_sidechain: bool,
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: Option<String>,
    content: RawContent,
}

/// Transcripts encode `content` as either a plain string or an array of
/// typed blocks. We handle both forms here.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    block_type: String,
    // text block
    text: Option<String>,
    // thinking block
    thinking: Option<String>,
    // tool_use block
    id: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Map<String, serde_json::Value>>,
    // tool_result block
    tool_use_id: Option<String>,
    content: Option<serde_json::Value>,
}

/// Only the flag we need from a record's header.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHeader {
    #[serde(default)]
    is_sidechain: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a whole transcript into its ordered message sequence.
///
/// Malformed lines are skipped individually; they never abort the parse.
pub fn parse_session_file(content: &str) -> Vec<Message> {
    content.lines().filter_map(parse_line).collect()
}

/// Parse a single JSONL record.
///
/// Returns `None` for blank lines, malformed JSON, summary and other
/// non-conversational records, side-chain records, and records whose
/// content is empty once internal markup is removed.
pub fn parse_line(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let raw: RawLine = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            debug!("skipping malformed transcript line: {e}");
            return None;
        }
    };

    if raw.is_sidechain {
        return None;
    }

    let role = match raw.line_type.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };

    let msg = raw.message?;
    let content = convert_content(msg.content);
    if content.is_empty() {
        return None;
    }

    let id = msg
        .id
        .or(raw.uuid)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(Message {
        id,
        role,
        timestamp,
        content,
    })
}

/// Whether a raw record is flagged as belonging to a sub-agent side-chain.
/// Unparseable records are not side-chain records.
pub fn is_sidechain_record(line: &str) -> bool {
    serde_json::from_str::<RawHeader>(line.trim())
        .map(|h| h.is_sidechain)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Content conversion
// ---------------------------------------------------------------------------

fn convert_content(content: RawContent) -> Vec<ContentBlock> {
    match content {
        RawContent::Text(s) => {
            let text = clean_system_content(&s);
            if text.is_empty() {
                vec![]
            } else {
                vec![ContentBlock::Text { text }]
            }
        }
        RawContent::Blocks(raw_blocks) => raw_blocks
            .into_iter()
            .filter_map(|b| convert_block(b, true))
            .collect(),
    }
}

/// Normalize one raw block into the closed `ContentBlock` set.
///
/// Top-level text is sanitized; blocks nested inside a tool result pass
/// through as written.
fn convert_block(block: RawBlock, sanitize: bool) -> Option<ContentBlock> {
    let converted = match block.block_type.as_str() {
        "text" => {
            let text = block.text?;
            if !sanitize {
                return Some(ContentBlock::Text { text });
            }
            let text = clean_system_content(&text);
            if text.is_empty() {
                return None;
            }
            Some(ContentBlock::Text { text })
        }
        "thinking" => block.thinking.map(|thinking| ContentBlock::Thinking { thinking }),
        "tool_use" => match (block.id, block.name) {
            (Some(id), Some(name)) => Some(ContentBlock::ToolUse {
                id,
                name,
                input: block.input.unwrap_or_default(),
            }),
            _ => None,
        },
        "tool_result" => block.tool_use_id.map(|tool_use_id| ContentBlock::ToolResult {
            tool_use_id,
            content: convert_tool_result(block.content),
        }),
        _ => None,
    };

    if converted.is_none() {
        debug!("dropping unrecognized or incomplete '{}' block", block.block_type);
    }
    converted
}

fn convert_tool_result(content: Option<serde_json::Value>) -> ToolResultContent {
    match content {
        None | Some(serde_json::Value::Null) => ToolResultContent::Text(String::new()),
        Some(serde_json::Value::String(s)) => ToolResultContent::Text(s),
        Some(serde_json::Value::Array(items)) => ToolResultContent::Blocks(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value::<RawBlock>(item).ok())
                .filter_map(|b| convert_block(b, false))
                .collect(),
        ),
        Some(other) => ToolResultContent::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
