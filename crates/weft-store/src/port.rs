use async_trait::async_trait;

use weft_types::{
    AgentMetric, DecisionEdge, DecisionNode, KeeperRecord, NodeFilter, TaskCostSummary,
    TaskDependency, TeamTask,
};

use crate::error::StoreResult;

/// Persistence Port. Every operation is atomic; updates report missing rows
/// instead of silently inserting.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_keeper(&self, record: &KeeperRecord) -> StoreResult<()>;
    async fn fetch_keeper(&self, id: &str) -> StoreResult<Option<KeeperRecord>>;

    async fn insert_task(&self, task: &TeamTask) -> StoreResult<()>;
    async fn update_task(&self, task: &TeamTask) -> StoreResult<TeamTask>;
    async fn get_task(&self, id: &str) -> StoreResult<Option<TeamTask>>;
    async fn list_tasks_by_team(&self, team_id: &str) -> StoreResult<Vec<TeamTask>>;
    async fn list_tasks_by_agent(&self, team_id: &str, agent: &str) -> StoreResult<Vec<TeamTask>>;
    async fn insert_task_dep(&self, dep: &TaskDependency) -> StoreResult<()>;
    async fn list_task_deps(&self, team_id: &str) -> StoreResult<Vec<TaskDependency>>;
    async fn sum_task_cost_by_team(&self, team_id: &str) -> StoreResult<TaskCostSummary>;

    async fn insert_decision_node(&self, node: &DecisionNode) -> StoreResult<()>;
    async fn insert_decision_edge(&self, edge: &DecisionEdge) -> StoreResult<()>;
    async fn list_decision_nodes(&self, filter: &NodeFilter) -> StoreResult<Vec<DecisionNode>>;
    async fn update_decision_node(&self, node: &DecisionNode) -> StoreResult<DecisionNode>;

    async fn insert_agent_metric(&self, metric: &AgentMetric) -> StoreResult<()>;
}
