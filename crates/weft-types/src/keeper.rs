use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperStatus {
    Active,
    Archived,
}

impl KeeperStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeeperStatus::Active => "active",
            KeeperStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(KeeperStatus::Active),
            "archived" => Some(KeeperStatus::Archived),
            _ => None,
        }
    }
}

/// Durable snapshot of a Context Keeper, as stored through the Persistence
/// Port and restored on worker start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperRecord {
    pub id: String,
    pub team_id: String,
    pub topic: String,
    pub source_agent: String,
    pub messages: Vec<ChatMessage>,
    pub token_count: u64,
    #[serde(default)]
    pub metadata: Value,
    pub status: KeeperStatus,
    pub created_at: DateTime<Utc>,
}

impl KeeperRecord {
    /// One-line directory entry advertised to agents.
    pub fn index_entry(&self) -> String {
        format!(
            "Keeper:{} topic={} source={} tokens={}",
            self.id, self.topic, self.source_agent, self.token_count
        )
    }
}
