pub mod chain;
pub mod directory;
pub mod paths;
pub mod status;
pub mod summary;
pub mod tags;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transcript::Message;

pub use chain::group_sessions_into_chains;
pub use directory::SessionDirectory;
pub use status::{determine_session_status, StatusThresholds};
pub use summary::{generate_session_summary, summarize};
pub use tags::{NoTags, Tag, Tagger};

/// Live state of a session as inferred from its transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The assistant finished its turn and is waiting on the user.
    Awaiting,
    Working,
    Idle,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Awaiting => "awaiting",
            SessionStatus::Working => "working",
            SessionStatus::Idle => "idle",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a session inside a chain of continued conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    /// Id of the newest session in the chain.
    pub chain_id: String,
    /// 0 is the newest member.
    pub chain_index: usize,
    pub chain_length: usize,
}

/// Catalog entry for one transcript file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project: PathBuf,
    pub project_name: String,
    pub title: String,
    /// Timestamp of the first message.
    pub timestamp: DateTime<Utc>,
    /// File modification time.
    pub last_modified: DateTime<Utc>,
    pub message_count: usize,
    pub tags: Vec<Tag>,
    pub status: SessionStatus,
    pub file_path: PathBuf,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainInfo>,
}

/// A catalog entry together with its full message sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub count: usize,
}
