use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named container owning a shared table, an agent roster, a pub/sub
/// namespace, and optionally nested sub-teams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    pub name: String,
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_team_id: Option<String>,
    #[serde(default)]
    pub depth: u32,
    pub created_at: DateTime<Utc>,
}

/// Metadata written into a sub-team's `:meta` table slot at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMeta {
    pub parent_team_id: String,
    pub spawning_agent: String,
    pub depth: u32,
    pub project_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Error,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Error => "error",
        }
    }
}

/// Roster entry stored in the shared team context for each live agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub role: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
