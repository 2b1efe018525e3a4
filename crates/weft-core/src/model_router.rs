use std::collections::HashMap;

use tokio::sync::Mutex;

use weft_types::TeamTask;

use crate::pricing::resolve_tier;
use crate::roles::RoleConfig;

/// Failures recorded for one `(team, agent, task)` before escalation kicks in.
pub const ESCALATION_THRESHOLD: u32 = 2;

/// Outcome of walking the escalation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationStep {
    Ok(String),
    /// Already at the tail of the chain.
    MaxReached,
    /// No chain configured (fewer than two entries).
    Disabled,
}

#[derive(Debug, Clone, Default)]
struct ModelStats {
    successes: u64,
    attempts: u64,
}

#[derive(Default)]
struct RouterState {
    failures: HashMap<(String, String, String), u32>,
    stats: HashMap<String, ModelStats>,
}

/// Model selection, failure tracking, and the opt-in escalation ladder.
pub struct ModelRouter {
    default_model: String,
    escalation_chain: Vec<String>,
    state: Mutex<RouterState>,
}

impl ModelRouter {
    pub fn new(default_model: String, escalation_chain: Vec<String>) -> Self {
        Self {
            default_model,
            escalation_chain,
            state: Mutex::new(RouterState::default()),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Escalation needs an ordered chain of at least two models.
    pub fn escalation_enabled(&self) -> bool {
        self.escalation_chain.len() >= 2
    }

    /// Model for a role/task. A task's `model_hint` wins — either a full
    /// `provider:model` string or a legacy tier name.
    pub fn select(&self, _role: &RoleConfig, task: Option<&TeamTask>) -> String {
        if let Some(hint) = task.and_then(|t| t.model_hint.as_deref()) {
            if let Some(resolved) = resolve_tier(hint) {
                return resolved.to_string();
            }
            if hint.contains(':') {
                return hint.to_string();
            }
            tracing::warn!(hint, "unresolvable model hint; using default");
        }
        self.default_model.clone()
    }

    pub async fn record_failure(&self, team_id: &str, agent: &str, task_id: &str) -> u32 {
        let mut state = self.state.lock().await;
        let counter = state
            .failures
            .entry((team_id.to_string(), agent.to_string(), task_id.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    pub async fn failure_count(&self, team_id: &str, agent: &str, task_id: &str) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(&(team_id.to_string(), agent.to_string(), task_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub async fn should_escalate(&self, team_id: &str, agent: &str, task_id: &str) -> bool {
        self.failure_count(team_id, agent, task_id).await >= ESCALATION_THRESHOLD
    }

    pub async fn record_attempt(&self, model: &str) {
        let mut state = self.state.lock().await;
        state.stats.entry(model.to_string()).or_default().attempts += 1;
    }

    /// A success counts as both a success and an attempt, and clears the
    /// failure counter for the task.
    pub async fn record_success(&self, team_id: &str, agent: &str, task_id: &str, model: &str) {
        let mut state = self.state.lock().await;
        let stats = state.stats.entry(model.to_string()).or_default();
        stats.successes += 1;
        stats.attempts += 1;
        state.failures.remove(&(
            team_id.to_string(),
            agent.to_string(),
            task_id.to_string(),
        ));
    }

    /// `successes / attempts`; 1.0 when the model has no data yet.
    pub async fn get_success_rate(&self, model: &str) -> f64 {
        let state = self.state.lock().await;
        match state.stats.get(model) {
            Some(stats) if stats.attempts > 0 => stats.successes as f64 / stats.attempts as f64,
            _ => 1.0,
        }
    }

    pub fn escalate(&self, current_model: &str) -> EscalationStep {
        if !self.escalation_enabled() {
            return EscalationStep::Disabled;
        }
        let Some(pos) = self
            .escalation_chain
            .iter()
            .position(|model| model == current_model)
        else {
            // unknown current model restarts at the head of the chain
            return EscalationStep::Ok(self.escalation_chain[0].clone());
        };
        match self.escalation_chain.get(pos + 1) {
            Some(next) => EscalationStep::Ok(next.clone()),
            None => EscalationStep::MaxReached,
        }
    }
}
