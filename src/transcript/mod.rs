pub mod parser;
pub mod sanitize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use parser::parse_session_file;
pub use sanitize::clean_system_content;

/// One typed block inside a message. The set of variants is closed: raw
/// blocks of any other type are dropped by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Map<String, serde_json::Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
    },
    Thinking {
        thinking: String,
    },
}

/// A tool result carries either plain text or a nested list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Call id, tool name and input of a tool invocation, if this block is one.
    pub fn as_tool_use(&self) -> Option<(&str, &str, &serde_json::Map<String, serde_json::Value>)> {
        match self {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A parsed transcript message. Only the parser builds these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// First text block of the message, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }

    pub fn tool_uses(
        &self,
    ) -> impl Iterator<Item = (&str, &str, &serde_json::Map<String, serde_json::Value>)> + '_ {
        self.content.iter().filter_map(ContentBlock::as_tool_use)
    }
}
