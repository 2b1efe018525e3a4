use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::team::AgentStatus;

/// Topic names for a team's pub/sub namespace.
pub mod topics {
    pub fn team(team_id: &str) -> String {
        format!("team:{team_id}")
    }

    pub fn agent(team_id: &str, name: &str) -> String {
        format!("team:{team_id}:agent:{name}")
    }

    pub fn context(team_id: &str) -> String {
        format!("team:{team_id}:context")
    }

    pub fn tasks(team_id: &str) -> String {
        format!("team:{team_id}:tasks")
    }

    pub fn decisions(team_id: &str) -> String {
        format!("team:{team_id}:decisions")
    }

    pub fn debate(team_id: &str, debate_id: &str) -> String {
        format!("team:{team_id}:debate:{debate_id}")
    }

    pub fn pair(team_id: &str, pair_id: &str) -> String {
        format!("team:{team_id}:pair:{pair_id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    Proposal,
    Critique,
    Revision,
    Vote,
}

/// A proposal snapshot circulated during critique and vote phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateProposal {
    pub agent: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateCritiqueNote {
    pub agent: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairPosition {
    Coder,
    Reviewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairEventKind {
    IntentBroadcast,
    FileEdited,
    ReviewFeedback,
    ReviewApproved,
    ReviewRejected,
}

/// Every tagged message shape carried by the pub/sub fabric. Delivery is
/// best-effort and at-most-once; subscribers ignore variants they do not
/// handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TeamEvent {
    AgentStatus {
        name: String,
        status: AgentStatus,
    },
    ContextUpdate {
        from: String,
        payload: Value,
    },
    PeerMessage {
        from: String,
        content: String,
    },
    RoleChanged {
        name: String,
        old_role: String,
        new_role: String,
    },
    RoleChangeRequest {
        name: String,
        old_role: String,
        new_role: String,
        request_id: String,
    },
    AgentEscalation {
        name: String,
        old_model: String,
        new_model: String,
    },
    BudgetWarning {
        team_id: String,
        spent_usd: f64,
        limit_usd: f64,
    },
    KeeperCreated {
        id: String,
        topic: String,
        source: String,
        tokens: u64,
    },
    ToolExecuting {
        agent: String,
        tool: String,
    },
    ToolComplete {
        agent: String,
        tool: String,
        ok: bool,
    },
    TaskCreated {
        id: String,
        title: String,
    },
    TaskAssigned {
        id: String,
        agent: String,
    },
    TaskStarted {
        id: String,
        owner: String,
    },
    TaskCompleted {
        id: String,
        owner: Option<String>,
        result: String,
    },
    TaskFailed {
        id: String,
        owner: Option<String>,
        reason: String,
    },
    TasksUnblocked {
        ids: Vec<String>,
    },
    Query {
        query_id: String,
        from: String,
        question: String,
        enrichments: Vec<String>,
    },
    QueryAnswer {
        query_id: String,
        from: String,
        answer: String,
        enrichments: Vec<String>,
    },
    TeamDissolved {
        team_id: String,
    },
    SubTeamCompleted {
        team_id: String,
    },
    DebatePropose {
        debate_id: String,
        round: u32,
        topic: String,
    },
    DebateCritique {
        debate_id: String,
        round: u32,
        proposals: Vec<DebateProposal>,
    },
    DebateRevise {
        debate_id: String,
        round: u32,
        critiques: Vec<DebateCritiqueNote>,
    },
    DebateVote {
        debate_id: String,
        proposals: Vec<DebateProposal>,
    },
    DebateResponse {
        debate_id: String,
        agent: String,
        phase: DebatePhase,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice: Option<String>,
    },
    PairStarted {
        pair_id: String,
        position: PairPosition,
        peer: String,
    },
    PairSessionStarted {
        pair_id: String,
        coder: String,
        reviewer: String,
    },
    PairSessionStopped {
        pair_id: String,
    },
    PairEvent {
        pair_id: String,
        event: PairEventKind,
        from: String,
        payload: Value,
        ts: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_with_snake_case_tags() {
        let event = TeamEvent::TaskCompleted {
            id: "t1".to_string(),
            owner: Some("coder".to_string()),
            result: "done".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task_completed");
        let back: TeamEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn topic_names_are_namespaced_per_team() {
        assert_eq!(topics::team("t-abc"), "team:t-abc");
        assert_eq!(topics::agent("t-abc", "coder"), "team:t-abc:agent:coder");
        assert_eq!(topics::debate("t-abc", "d1"), "team:t-abc:debate:d1");
    }
}
