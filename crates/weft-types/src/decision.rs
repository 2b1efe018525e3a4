use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Goal,
    Decision,
    Option,
    Action,
    Outcome,
    Observation,
    Revisit,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Goal => "goal",
            NodeType::Decision => "decision",
            NodeType::Option => "option",
            NodeType::Action => "action",
            NodeType::Outcome => "outcome",
            NodeType::Observation => "observation",
            NodeType::Revisit => "revisit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "goal" => Some(NodeType::Goal),
            "decision" => Some(NodeType::Decision),
            "option" => Some(NodeType::Option),
            "action" => Some(NodeType::Action),
            "outcome" => Some(NodeType::Outcome),
            "observation" => Some(NodeType::Observation),
            "revisit" => Some(NodeType::Revisit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    LeadsTo,
    Chosen,
    Rejected,
    Requires,
    Blocks,
    Enables,
    Supersedes,
    Supports,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::LeadsTo => "leads_to",
            EdgeType::Chosen => "chosen",
            EdgeType::Rejected => "rejected",
            EdgeType::Requires => "requires",
            EdgeType::Blocks => "blocks",
            EdgeType::Enables => "enables",
            EdgeType::Supersedes => "supersedes",
            EdgeType::Supports => "supports",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "leads_to" => Some(EdgeType::LeadsTo),
            "chosen" => Some(EdgeType::Chosen),
            "rejected" => Some(EdgeType::Rejected),
            "requires" => Some(EdgeType::Requires),
            "blocks" => Some(EdgeType::Blocks),
            "enables" => Some(EdgeType::Enables),
            "supersedes" => Some(EdgeType::Supersedes),
            "supports" => Some(EdgeType::Supports),
            _ => None,
        }
    }
}

/// A node in the append-mostly reasoning DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: String,
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 0–100.
    pub confidence: u8,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEdge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Filters for listing decision nodes; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub node_type: Option<NodeType>,
    pub status: Option<String>,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
    pub limit: Option<u32>,
}
