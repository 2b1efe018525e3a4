use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Learning metric recorded when a task reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetric {
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub task_id: String,
    pub success: bool,
    pub cost_usd: f64,
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}
