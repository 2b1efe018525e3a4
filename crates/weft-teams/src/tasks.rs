use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use weft_types::{
    topics, AgentMetric, DepType, NewTask, TaskCostSummary, TaskStatus, TaskSummary, TeamEvent,
    TeamTask,
};

use crate::error::TeamsError;
use crate::TeamDeps;

const DEFAULT_PRIORITY: i32 = 3;

/// CRUD and dependency scheduling over the persistent task table. Every
/// mutation refreshes the shared-context cache and broadcasts on the team's
/// task topic.
#[derive(Clone)]
pub struct TaskCoordinator {
    deps: TeamDeps,
}

impl TaskCoordinator {
    pub fn new(deps: TeamDeps) -> Self {
        Self { deps }
    }

    pub async fn create_task(&self, team_id: &str, new: NewTask) -> Result<TeamTask, TeamsError> {
        let now = Utc::now();
        let task = TeamTask {
            id: format!("task_{}", Uuid::new_v4().simple()),
            team_id: team_id.to_string(),
            title: new.title,
            description: new.description,
            status: TaskStatus::Pending,
            owner: None,
            priority: new.priority.unwrap_or(DEFAULT_PRIORITY),
            model_hint: new.model_hint,
            role: new.role,
            task_type: new.task_type,
            result: None,
            cost_usd: 0.0,
            tokens_used: 0,
            inserted_at: now,
            updated_at: now,
        };
        self.deps.store.insert_task(&task).await?;
        self.refresh_cache(&task).await;
        self.broadcast(
            team_id,
            TeamEvent::TaskCreated {
                id: task.id.clone(),
                title: task.title.clone(),
            },
        );
        Ok(task)
    }

    pub async fn add_dependency(
        &self,
        task_id: &str,
        depends_on_id: &str,
        dep_type: DepType,
    ) -> Result<(), TeamsError> {
        self.deps
            .store
            .insert_task_dep(&weft_types::TaskDependency {
                task_id: task_id.to_string(),
                depends_on_id: depends_on_id.to_string(),
                dep_type,
            })
            .await?;
        Ok(())
    }

    pub async fn assign_task(
        &self,
        team_id: &str,
        task_id: &str,
        agent: &str,
    ) -> Result<TeamTask, TeamsError> {
        let mut task = self.fetch(task_id).await?;
        task.status = TaskStatus::Assigned;
        task.owner = Some(agent.to_string());
        task.updated_at = Utc::now();
        self.deps.store.update_task(&task).await?;
        self.refresh_cache(&task).await;

        let event = TeamEvent::TaskAssigned {
            id: task.id.clone(),
            agent: agent.to_string(),
        };
        self.broadcast(team_id, event.clone());
        self.deps.fabric.send_to(team_id, agent, &event);
        Ok(task)
    }

    pub async fn start_task(&self, team_id: &str, task_id: &str) -> Result<TeamTask, TeamsError> {
        let mut task = self.fetch(task_id).await?;
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        self.deps.store.update_task(&task).await?;
        self.refresh_cache(&task).await;
        self.broadcast(
            team_id,
            TeamEvent::TaskStarted {
                id: task.id.clone(),
                owner: task.owner.clone().unwrap_or_default(),
            },
        );
        Ok(task)
    }

    /// Completion persists the owner's accumulated cost and tokens onto the
    /// row, records a learning metric, and unblocks dependents.
    pub async fn complete_task(
        &self,
        team_id: &str,
        task_id: &str,
        result: &str,
    ) -> Result<TeamTask, TeamsError> {
        let mut task = self.fetch(task_id).await?;
        task.status = TaskStatus::Completed;
        task.result = Some(result.to_string());
        task.updated_at = Utc::now();
        if let Some(owner) = &task.owner {
            if let Some(usage) = self.deps.cost_tracker.get_agent_usage(team_id, owner).await {
                task.cost_usd = usage.cost;
                task.tokens_used = usage.input_tokens + usage.output_tokens;
            }
        }
        self.deps.store.update_task(&task).await?;
        self.refresh_cache(&task).await;
        self.broadcast(
            team_id,
            TeamEvent::TaskCompleted {
                id: task.id.clone(),
                owner: task.owner.clone(),
                result: result.to_string(),
            },
        );
        self.record_metric(&task, true).await;
        self.auto_schedule_unblocked(team_id).await?;
        Ok(task)
    }

    pub async fn fail_task(
        &self,
        team_id: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<TeamTask, TeamsError> {
        let mut task = self.fetch(task_id).await?;
        task.status = TaskStatus::Failed;
        task.result = Some(reason.to_string());
        task.updated_at = Utc::now();
        self.deps.store.update_task(&task).await?;
        self.refresh_cache(&task).await;
        self.broadcast(
            team_id,
            TeamEvent::TaskFailed {
                id: task.id.clone(),
                owner: task.owner.clone(),
                reason: reason.to_string(),
            },
        );
        self.record_metric(&task, false).await;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TeamTask>, TeamsError> {
        Ok(self.deps.store.get_task(task_id).await?)
    }

    pub async fn list_tasks(&self, team_id: &str) -> Result<Vec<TeamTask>, TeamsError> {
        Ok(self.deps.store.list_tasks_by_team(team_id).await?)
    }

    pub async fn list_tasks_by_agent(
        &self,
        team_id: &str,
        agent: &str,
    ) -> Result<Vec<TeamTask>, TeamsError> {
        Ok(self.deps.store.list_tasks_by_agent(team_id, agent).await?)
    }

    /// Pending tasks whose every `blocks` predecessor is completed, in
    /// `(priority asc, inserted_at asc)` order.
    pub async fn list_available(&self, team_id: &str) -> Result<Vec<TeamTask>, TeamsError> {
        let tasks = self.deps.store.list_tasks_by_team(team_id).await?;
        let deps = self.deps.store.list_task_deps(team_id).await?;

        let completed: HashSet<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();

        let mut blockers: HashMap<&str, Vec<&str>> = HashMap::new();
        for dep in &deps {
            if dep.dep_type == DepType::Blocks {
                blockers
                    .entry(dep.task_id.as_str())
                    .or_default()
                    .push(dep.depends_on_id.as_str());
            }
        }

        Ok(tasks
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && blockers
                        .get(task.id.as_str())
                        .map(|preds| preds.iter().all(|p| completed.contains(p)))
                        .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    /// Broadcast the newly-available set after a completion; quiet when
    /// nothing unblocked.
    pub async fn auto_schedule_unblocked(&self, team_id: &str) -> Result<(), TeamsError> {
        let available = self.list_available(team_id).await?;
        if available.is_empty() {
            return Ok(());
        }
        self.broadcast(
            team_id,
            TeamEvent::TasksUnblocked {
                ids: available.into_iter().map(|t| t.id).collect(),
            },
        );
        Ok(())
    }

    /// Persisted aggregate over the team's completed tasks.
    pub async fn team_cost_summary(&self, team_id: &str) -> Result<TaskCostSummary, TeamsError> {
        Ok(self.deps.store.sum_task_cost_by_team(team_id).await?)
    }

    async fn fetch(&self, task_id: &str) -> Result<TeamTask, TeamsError> {
        self.deps
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| TeamsError::TaskNotFound(task_id.to_string()))
    }

    async fn refresh_cache(&self, task: &TeamTask) {
        let _ = self
            .deps
            .context
            .cache_task(
                &task.team_id,
                &task.id,
                TaskSummary {
                    title: task.title.clone(),
                    status: task.status,
                    owner: task.owner.clone(),
                },
            )
            .await;
    }

    async fn record_metric(&self, task: &TeamTask, success: bool) {
        let metric = AgentMetric {
            team_id: task.team_id.clone(),
            agent_name: task.owner.clone(),
            task_id: task.id.clone(),
            success,
            cost_usd: task.cost_usd,
            tokens_used: task.tokens_used,
            model: task.model_hint.clone(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.deps.store.insert_agent_metric(&metric).await {
            tracing::warn!(task = %task.id, error = %err, "metric insert failed");
        }
    }

    fn broadcast(&self, team_id: &str, event: TeamEvent) {
        self.deps.fabric.broadcast(&topics::tasks(team_id), &event);
    }
}
