use thiserror::Error;

use weft_core::{BudgetScope, ContextError};
use weft_store::StoreError;

#[derive(Debug, Error)]
pub enum TeamsError {
    #[error("team {0} not found")]
    TeamNotFound(String),

    #[error("agent {name} not found in team {team_id}")]
    AgentNotFound { team_id: String, name: String },

    #[error("agent {name} already exists in team {team_id}")]
    DuplicateAgent { team_id: String, name: String },

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("query {0} not found")]
    QueryNotFound(String),

    #[error("keeper {0} not found")]
    KeeperNotFound(String),

    #[error("pair session {0} not found")]
    PairNotFound(String),

    #[error("unknown role `{0}`")]
    UnknownRole(String),

    #[error("sub-team depth {depth} exceeds maximum {max}")]
    MaxDepthExceeded { depth: u32, max: u32 },

    #[error("parent team {0} not found")]
    ParentNotFound(String),

    #[error("pair requires two distinct agents, got `{0}` twice")]
    SameAgent(String),

    #[error("debate requires at least 2 participants, got {0}")]
    InsufficientParticipants(usize),

    #[error("query {query_id} reached its hop limit of {max_hops}")]
    MaxHopsReached { query_id: String, max_hops: u32 },

    #[error("no final answer after {0} iterations")]
    MaxIterationsExceeded(u32),

    #[error("{scope:?} budget exceeded")]
    BudgetExceeded { scope: BudgetScope },

    #[error("template `{0}` not found")]
    TemplateNotFound(String),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("keeper spawn failed: {0}")]
    KeeperSpawn(String),

    #[error("agent {0} is shutting down")]
    AgentStopped(String),

    #[error(transparent)]
    Role(#[from] weft_core::RoleError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}
