use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use weft_types::now_ms;

use crate::pricing::{calculate_cost, round8};

/// Newest-first call log is capped per team.
const CALL_LOG_CAP: usize = 500;

/// One Model Client call's worth of usage, as reported by the caller. Cost
/// is resolved from pricing when the provider did not supply one.
#[derive(Debug, Clone, Default)]
pub struct UsageSample {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub model: Option<String>,
}

impl UsageSample {
    fn resolved_cost(&self) -> f64 {
        match (self.cost, self.model.as_deref()) {
            (Some(cost), _) => cost,
            (None, Some(model)) => calculate_cost(model, self.input_tokens, self.output_tokens),
            (None, None) => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub requests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub agent: String,
    pub old_model: String,
    pub new_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub ts: u64,
}

#[derive(Default)]
struct TeamCosts {
    agents: HashMap<String, AgentUsage>,
    calls: VecDeque<CallRecord>,
    escalations: Vec<EscalationRecord>,
}

/// Per-team, per-agent usage accumulators plus call and escalation logs.
#[derive(Default)]
pub struct CostTracker {
    teams: Mutex<HashMap<String, TeamCosts>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_usage(&self, team_id: &str, agent: &str, sample: &UsageSample) {
        let cost = sample.resolved_cost();
        let mut teams = self.teams.lock().await;
        let team = teams.entry(team_id.to_string()).or_default();
        let usage = team.agents.entry(agent.to_string()).or_default();
        usage.input_tokens = usage.input_tokens.saturating_add(sample.input_tokens);
        usage.output_tokens = usage.output_tokens.saturating_add(sample.output_tokens);
        usage.cost = round8(usage.cost + cost);
        usage.requests += 1;
        if let Some(model) = &sample.model {
            usage.last_model = Some(model.clone());
        }
    }

    pub async fn record_call(&self, team_id: &str, agent: &str, sample: &UsageSample) {
        let record = CallRecord {
            agent: agent.to_string(),
            model: sample.model.clone(),
            input_tokens: sample.input_tokens,
            output_tokens: sample.output_tokens,
            cost: sample.resolved_cost(),
            ts: now_ms(),
        };
        let mut teams = self.teams.lock().await;
        let team = teams.entry(team_id.to_string()).or_default();
        team.calls.push_front(record);
        team.calls.truncate(CALL_LOG_CAP);
    }

    pub async fn record_escalation(
        &self,
        team_id: &str,
        agent: &str,
        old_model: &str,
        new_model: &str,
        task_id: Option<&str>,
    ) {
        let mut teams = self.teams.lock().await;
        let team = teams.entry(team_id.to_string()).or_default();
        team.escalations.push(EscalationRecord {
            agent: agent.to_string(),
            old_model: old_model.to_string(),
            new_model: new_model.to_string(),
            task_id: task_id.map(|t| t.to_string()),
            ts: now_ms(),
        });
    }

    pub async fn get_agent_usage(&self, team_id: &str, agent: &str) -> Option<AgentUsage> {
        self.teams
            .lock()
            .await
            .get(team_id)
            .and_then(|team| team.agents.get(agent).cloned())
    }

    pub async fn get_team_usage(&self, team_id: &str) -> HashMap<String, AgentUsage> {
        self.teams
            .lock()
            .await
            .get(team_id)
            .map(|team| team.agents.clone())
            .unwrap_or_default()
    }

    /// `(cost_usd, tokens)` across every agent in the team.
    pub async fn team_totals(&self, team_id: &str) -> (f64, u64) {
        let teams = self.teams.lock().await;
        let Some(team) = teams.get(team_id) else {
            return (0.0, 0);
        };
        let cost = round8(team.agents.values().map(|a| a.cost).sum());
        let tokens = team
            .agents
            .values()
            .map(|a| a.input_tokens + a.output_tokens)
            .sum();
        (cost, tokens)
    }

    /// Newest-first call log for the team.
    pub async fn list_calls(&self, team_id: &str, limit: usize) -> Vec<CallRecord> {
        self.teams
            .lock()
            .await
            .get(team_id)
            .map(|team| team.calls.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn list_escalations(&self, team_id: &str) -> Vec<EscalationRecord> {
        self.teams
            .lock()
            .await
            .get(team_id)
            .map(|team| team.escalations.clone())
            .unwrap_or_default()
    }

    pub async fn reset_team(&self, team_id: &str) {
        self.teams.lock().await.remove(team_id);
    }
}
