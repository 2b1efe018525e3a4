pub mod agent;
pub mod debate;
pub mod error;
pub mod keeper;
pub mod manager;
pub mod pair;
pub mod query_router;
pub mod supervisor;
pub mod tasks;

pub use agent::{AgentHandle, AgentInit, AgentSnapshot, SpawnAgentOptions};
pub use debate::{run_debate, DebateOptions, DebateOutcome};
pub use error::TeamsError;
pub use keeper::{
    detect_mode, start_keeper, topic_overlap, KeeperHandle, KeeperOptions, KeeperRegistry,
    RetrievalMode,
};
pub use manager::{generate_team_id, TeamsManager};
pub use pair::{broadcast_pair_event, start_pair, stop_pair, PairRecord};
pub use query_router::{AskOptions, QueryRouter};
pub use supervisor::AgentSupervisor;
pub use tasks::TaskCoordinator;

use std::sync::Arc;

use weft_core::{
    CollaboratorHooks, CostTracker, ModelRouter, PubSub, RateLimiter, SharedContext, WeftConfig,
};
use weft_providers::ModelClient;
use weft_store::Store;
use weft_tools::ToolRegistry;

/// Everything a team worker needs, threaded through construction. One
/// instance per process; clones are cheap handles onto shared state.
#[derive(Clone)]
pub struct TeamDeps {
    pub fabric: Arc<PubSub>,
    pub context: SharedContext,
    pub rate_limiter: Arc<RateLimiter>,
    pub cost_tracker: Arc<CostTracker>,
    pub model_router: Arc<ModelRouter>,
    pub store: Arc<dyn Store>,
    pub model_client: Arc<dyn ModelClient>,
    pub tools: ToolRegistry,
    pub keepers: KeeperRegistry,
    pub hooks: CollaboratorHooks,
    pub config: WeftConfig,
}

impl TeamDeps {
    /// Deps wired from a config plus the two external ports.
    pub fn new(
        config: WeftConfig,
        store: Arc<dyn Store>,
        model_client: Arc<dyn ModelClient>,
    ) -> Self {
        let registry = weft_core::TableRegistry::new();
        Self {
            fabric: Arc::new(PubSub::new()),
            context: SharedContext::new(registry),
            rate_limiter: Arc::new(RateLimiter::new(config.limiter_config())),
            cost_tracker: Arc::new(CostTracker::new()),
            model_router: Arc::new(ModelRouter::new(
                config.model.default.clone(),
                config.escalation_chain(),
            )),
            store,
            model_client,
            tools: ToolRegistry::new(),
            keepers: KeeperRegistry::new(),
            hooks: CollaboratorHooks::none(),
            config,
        }
    }

    pub fn with_hooks(mut self, hooks: CollaboratorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }
}
