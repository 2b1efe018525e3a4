use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_HOPS: u32 = 5;

/// A tracked `ask → (forward)* → answer` routing trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub query_id: String,
    pub team_id: String,
    pub origin: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Agents the query has passed through, in order.
    #[serde(default)]
    pub hops: Vec<String>,
    #[serde(default)]
    pub enrichments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub created_at: u64,
    pub max_hops: u32,
}
