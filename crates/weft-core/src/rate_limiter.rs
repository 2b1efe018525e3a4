use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use weft_types::now_ms;

/// Default token-per-minute allowances per provider; unknown providers get
/// [`UNKNOWN_BUCKET`].
const DEFAULT_BUCKETS: &[(&str, f64)] = &[
    ("anthropic", 80_000.0),
    ("openai", 90_000.0),
    ("google", 60_000.0),
];

const UNKNOWN_BUCKET: (f64, f64) = (50_000.0, 50_000.0);

pub const DEFAULT_TEAM_BUDGET_USD: f64 = 5.00;
pub const DEFAULT_AGENT_BUDGET_USD: f64 = 1.00;

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub team_budget_usd: f64,
    pub agent_budget_usd: f64,
    /// Per-provider `(max, refill_per_min)` overrides.
    pub buckets: HashMap<String, (f64, f64)>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            team_budget_usd: DEFAULT_TEAM_BUDGET_USD,
            agent_budget_usd: DEFAULT_AGENT_BUDGET_USD,
            buckets: HashMap::new(),
        }
    }
}

/// Admission decision for a provider bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Ok,
    /// Come back in at least this many milliseconds.
    Wait { ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Team,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetStatus {
    Ok,
    Exceeded(BudgetScope),
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    max: f64,
    refill_per_min: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    fn new(max: f64, refill_per_min: f64, now: u64) -> Self {
        Self {
            tokens: max,
            max,
            refill_per_min,
            last_refill_ms: now,
        }
    }

    fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill_ms);
        if elapsed == 0 {
            return;
        }
        let added = elapsed as f64 * self.refill_per_min / 60_000.0;
        self.tokens = (self.tokens + added).min(self.max);
        self.last_refill_ms = now;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentBudget {
    pub spent: f64,
    pub limit: f64,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamBudget {
    pub spent: f64,
    pub limit: f64,
    pub agents: HashMap<String, AgentBudget>,
}

#[derive(Default)]
struct LimiterState {
    buckets: HashMap<String, TokenBucket>,
    budgets: HashMap<String, TeamBudget>,
}

/// Provider token buckets plus hierarchical USD budgets. All operations are
/// serialized through one mutex so team and agent totals move together.
pub struct RateLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Try to take `estimated_tokens` from the provider's bucket.
    pub async fn acquire(&self, provider: &str, estimated_tokens: u64) -> Admission {
        self.acquire_at(provider, estimated_tokens, now_ms()).await
    }

    pub async fn acquire_at(&self, provider: &str, estimated_tokens: u64, now: u64) -> Admission {
        let mut state = self.state.lock().await;
        let (max, refill) = self.bucket_shape(provider);
        let bucket = state
            .buckets
            .entry(provider.to_string())
            .or_insert_with(|| TokenBucket::new(max, refill, now));
        bucket.refill(now);

        let want = estimated_tokens as f64;
        if bucket.tokens >= want {
            bucket.tokens -= want;
            return Admission::Ok;
        }
        let deficit = want - bucket.tokens;
        let wait_ms = (deficit / bucket.refill_per_min * 60_000.0).ceil() as u64;
        Admission::Wait {
            ms: wait_ms.max(1),
        }
    }

    /// Override one agent's USD limit (a role-level budget); takes the place
    /// of the configured per-agent default for that agent only.
    pub async fn set_agent_limit(&self, team_id: &str, agent: &str, limit_usd: f64) {
        let mut state = self.state.lock().await;
        let team_limit = self.config.team_budget_usd;
        let team = state
            .budgets
            .entry(team_id.to_string())
            .or_insert_with(|| TeamBudget {
                spent: 0.0,
                limit: team_limit,
                agents: HashMap::new(),
            });
        team.agents
            .entry(agent.to_string())
            .or_insert_with(AgentBudget::default)
            .limit = limit_usd;
    }

    /// Record a completed call against the team and agent budgets. The team
    /// check wins when both are exhausted.
    pub async fn record_usage(
        &self,
        team_id: &str,
        agent: &str,
        tokens: u64,
        cost_usd: f64,
    ) -> BudgetStatus {
        let mut state = self.state.lock().await;
        let team_limit = self.config.team_budget_usd;
        let agent_limit = self.config.agent_budget_usd;
        let team = state
            .budgets
            .entry(team_id.to_string())
            .or_insert_with(|| TeamBudget {
                spent: 0.0,
                limit: team_limit,
                agents: HashMap::new(),
            });
        let entry = team
            .agents
            .entry(agent.to_string())
            .or_insert_with(|| AgentBudget {
                spent: 0.0,
                limit: agent_limit,
                tokens_used: 0,
            });

        entry.spent += cost_usd;
        entry.tokens_used = entry.tokens_used.saturating_add(tokens);
        let agent_exceeded = entry.spent >= entry.limit;
        team.spent += cost_usd;

        if team.spent >= team.limit {
            BudgetStatus::Exceeded(BudgetScope::Team)
        } else if agent_exceeded {
            BudgetStatus::Exceeded(BudgetScope::Agent)
        } else {
            BudgetStatus::Ok
        }
    }

    pub async fn get_team_budget(&self, team_id: &str) -> Option<TeamBudget> {
        self.state.lock().await.budgets.get(team_id).cloned()
    }

    pub async fn reset_team(&self, team_id: &str) {
        self.state.lock().await.budgets.remove(team_id);
    }

    fn bucket_shape(&self, provider: &str) -> (f64, f64) {
        if let Some(shape) = self.config.buckets.get(provider) {
            return *shape;
        }
        DEFAULT_BUCKETS
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, per_min)| (*per_min, *per_min))
            .unwrap_or(UNKNOWN_BUCKET)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}
