use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::Level;

use weft_core::pricing::resolve_tier;
use weft_observability::{emit_event, ProcessKind, TelemetryEvent};
use weft_types::{topics, Team, TeamEvent, TeamMeta};

use crate::agent::{AgentHandle, AgentInit, SpawnAgentOptions};
use crate::error::TeamsError;
use crate::keeper::{spawn_keeper_worker, KeeperHandle, KeeperOptions};
use crate::query_router::QueryRouter;
use crate::supervisor::AgentSupervisor;
use crate::tasks::TaskCoordinator;
use crate::TeamDeps;

/// `lowercase |> sanitize |> truncate(20) |> "-" |> 4 random url-safe bytes`.
pub fn generate_team_id(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let truncated: String = sanitized.chars().take(20).collect();
    let suffix = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 4]>());
    format!("{truncated}-{suffix}")
}

/// Public API of the Teams subsystem: team lifecycle, agent and keeper
/// spawning, sub-team nesting with cascade dissolution.
pub struct TeamsManager {
    deps: TeamDeps,
    supervisor: AgentSupervisor,
    tasks: TaskCoordinator,
    queries: Arc<QueryRouter>,
    teams: Arc<RwLock<HashMap<String, Team>>>,
}

impl TeamsManager {
    pub fn new(deps: TeamDeps) -> Self {
        Self {
            supervisor: AgentSupervisor::new(deps.clone()),
            tasks: TaskCoordinator::new(deps.clone()),
            queries: Arc::new(QueryRouter::new(deps.clone())),
            teams: Arc::new(RwLock::new(HashMap::new())),
            deps,
        }
    }

    pub fn deps(&self) -> &TeamDeps {
        &self.deps
    }

    pub fn tasks(&self) -> &TaskCoordinator {
        &self.tasks
    }

    pub fn queries(&self) -> &QueryRouter {
        &self.queries
    }

    pub async fn create_team(&self, name: &str, project_path: Option<String>) -> Team {
        let team = Team {
            team_id: generate_team_id(name),
            name: name.to_string(),
            project_path: project_path.unwrap_or_else(|| ".".to_string()),
            parent_team_id: None,
            depth: 0,
            created_at: Utc::now(),
        };
        self.deps.context.registry().create(&team.team_id).await;
        self.teams
            .write()
            .await
            .insert(team.team_id.clone(), team.clone());
        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(&team.team_id),
                ..TelemetryEvent::new("team.created", "teams.manager")
            },
        );
        team
    }

    pub async fn create_sub_team(
        &self,
        parent_team_id: &str,
        spawning_agent: &str,
        name: &str,
        max_depth: Option<u32>,
    ) -> Result<Team, TeamsError> {
        let parent = self
            .teams
            .read()
            .await
            .get(parent_team_id)
            .cloned()
            .ok_or_else(|| TeamsError::ParentNotFound(parent_team_id.to_string()))?;

        let max = max_depth.unwrap_or(self.deps.config.teams.max_sub_team_depth);
        let depth = parent.depth + 1;
        if depth > max {
            return Err(TeamsError::MaxDepthExceeded { depth, max });
        }

        let team = Team {
            team_id: generate_team_id(name),
            name: name.to_string(),
            project_path: parent.project_path.clone(),
            parent_team_id: Some(parent.team_id.clone()),
            depth,
            created_at: Utc::now(),
        };
        self.deps.context.registry().create(&team.team_id).await;
        self.deps
            .context
            .set_meta(
                &team.team_id,
                &TeamMeta {
                    parent_team_id: parent.team_id.clone(),
                    spawning_agent: spawning_agent.to_string(),
                    depth,
                    project_path: team.project_path.clone(),
                },
            )
            .await?;
        self.deps
            .context
            .add_sub_team(&parent.team_id, &team.team_id)
            .await?;
        self.teams
            .write()
            .await
            .insert(team.team_id.clone(), team.clone());
        Ok(team)
    }

    pub async fn spawn_agent(
        &self,
        team_id: &str,
        name: &str,
        role_name: &str,
        opts: SpawnAgentOptions,
    ) -> Result<AgentHandle, TeamsError> {
        let team = self.require_team(team_id).await?;
        let role = weft_core::resolve_role(role_name, self.deps.config.role_override(role_name))?;
        let budget_limit = role.budget_limit;

        let model = opts
            .model
            .clone()
            .or_else(|| {
                (role.model_tier != "default")
                    .then(|| resolve_tier(&role.model_tier).map(|m| m.to_string()))
                    .flatten()
            })
            .unwrap_or_else(|| self.deps.model_router.default_model().to_string());

        let handle = self
            .supervisor
            .spawn(AgentInit {
                team_id: team_id.to_string(),
                name: name.to_string(),
                role,
                model,
                project_path: opts.project_path.unwrap_or(team.project_path),
            })
            .await?;

        if let Some(limit) = budget_limit {
            self.deps.rate_limiter.set_agent_limit(team_id, name, limit).await;
        }

        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(team_id),
                agent: Some(name),
                ..TelemetryEvent::new("agent.spawned", "teams.manager")
            },
        );
        Ok(handle)
    }

    /// Expand a configured team template: `count > 1` suffixes `-1..n`.
    pub async fn spawn_from_template(
        &self,
        team_id: &str,
        template_name: &str,
    ) -> Result<Vec<AgentHandle>, TeamsError> {
        let template = self
            .deps
            .config
            .template(template_name)
            .cloned()
            .ok_or_else(|| TeamsError::TemplateNotFound(template_name.to_string()))?;

        let mut handles = Vec::new();
        for agent in &template.agents {
            let count = agent.count.unwrap_or(1).max(1);
            for i in 1..=count {
                let name = if count == 1 {
                    agent.name.clone()
                } else {
                    format!("{}-{i}", agent.name)
                };
                let handle = self
                    .spawn_agent(
                        team_id,
                        &name,
                        &agent.role,
                        SpawnAgentOptions {
                            model: agent.model.clone(),
                            project_path: None,
                        },
                    )
                    .await?;
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    pub async fn spawn_keeper(
        &self,
        team_id: &str,
        mut opts: KeeperOptions,
    ) -> Result<KeeperHandle, TeamsError> {
        self.require_team(team_id).await?;
        if opts.persist_debounce_ms == 0 {
            opts.persist_debounce_ms = self.deps.config.teams.keeper.persist_debounce_ms;
        }

        let (handle, join) = spawn_keeper_worker(
            self.deps.store.clone(),
            self.deps.model_client.clone(),
            self.deps.config.model.default.clone(),
            team_id,
            opts.clone(),
        )
        .await
        .map_err(|err| TeamsError::KeeperSpawn(err.to_string()))?;

        self.deps.keepers.add(handle.clone()).await;
        self.monitor_keeper(team_id.to_string(), opts, handle.id.clone(), join);

        let tokens = handle
            .get_state()
            .await
            .map(|state| state.token_count)
            .unwrap_or(0);
        self.deps.fabric.broadcast(
            &topics::team(team_id),
            &TeamEvent::KeeperCreated {
                id: handle.id.clone(),
                topic: handle.topic.clone(),
                source: handle.source_agent.clone(),
                tokens,
            },
        );
        Ok(handle)
    }

    /// Transient restart for keepers: a panicked worker is respawned with
    /// the same id, which restores the last flushed state from the store.
    fn monitor_keeper(
        &self,
        team_id: String,
        opts: KeeperOptions,
        keeper_id: String,
        mut join: tokio::task::JoinHandle<()>,
    ) {
        let deps = self.deps.clone();
        tokio::spawn(async move {
            loop {
                match (&mut join).await {
                    Ok(()) => break,
                    Err(err) if err.is_panic() => {
                        if !deps.keepers.contains(&team_id, &keeper_id).await {
                            break;
                        }
                        tracing::error!(keeper = %keeper_id, "keeper worker panicked; restarting");
                        let mut respawn_opts = opts.clone();
                        respawn_opts.id = Some(keeper_id.clone());
                        match spawn_keeper_worker(
                            deps.store.clone(),
                            deps.model_client.clone(),
                            deps.config.model.default.clone(),
                            &team_id,
                            respawn_opts,
                        )
                        .await
                        {
                            Ok((handle, new_join)) => {
                                deps.keepers.replace(handle).await;
                                join = new_join;
                            }
                            Err(err) => {
                                tracing::error!(keeper = %keeper_id, error = %err, "keeper restart failed");
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }

    pub async fn stop_agent(&self, team_id: &str, name: &str) -> Result<(), TeamsError> {
        self.supervisor.stop(team_id, name).await?;
        let _ = self.deps.context.remove_agent(team_id, name).await;
        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(team_id),
                agent: Some(name),
                ..TelemetryEvent::new("agent.stopped", "teams.manager")
            },
        );
        Ok(())
    }

    pub async fn list_agents(&self, team_id: &str) -> Vec<AgentHandle> {
        self.supervisor.list(team_id).await
    }

    pub async fn find_agent(&self, team_id: &str, name: &str) -> Result<AgentHandle, TeamsError> {
        self.supervisor
            .find(team_id, name)
            .await
            .ok_or_else(|| TeamsError::AgentNotFound {
                team_id: team_id.to_string(),
                name: name.to_string(),
            })
    }

    pub async fn get_team(&self, team_id: &str) -> Option<Team> {
        self.teams.read().await.get(team_id).cloned()
    }

    pub async fn list_sub_teams(&self, team_id: &str) -> Vec<Team> {
        let mut teams = self
            .teams
            .read()
            .await
            .values()
            .filter(|team| team.parent_team_id.as_deref() == Some(team_id))
            .cloned()
            .collect::<Vec<_>>();
        teams.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        teams
    }

    pub async fn get_parent_team(&self, team_id: &str) -> Option<Team> {
        let parent_id = self
            .teams
            .read()
            .await
            .get(team_id)
            .and_then(|team| team.parent_team_id.clone())?;
        self.get_team(&parent_id).await
    }

    /// Recursive cascade: sub-teams first, then this team's workers, state,
    /// and topics. Dissolving an unknown team is a no-op.
    pub async fn dissolve_team(&self, team_id: &str) -> Result<(), TeamsError> {
        let Some(team) = self.teams.read().await.get(team_id).cloned() else {
            return Ok(());
        };

        let children = self.list_sub_teams(team_id).await;
        for child in children {
            Box::pin(self.dissolve_team(&child.team_id)).await?;
        }

        // read the child's meta before its table goes away
        let meta = self.deps.context.get_meta(team_id).await;

        self.supervisor.stop_team(team_id).await;
        self.deps.keepers.stop_team(team_id).await;
        self.deps.rate_limiter.reset_team(team_id).await;
        self.deps.cost_tracker.reset_team(team_id).await;

        self.deps.context.registry().drop_table(team_id).await;
        self.deps.fabric.broadcast(
            &topics::team(team_id),
            &TeamEvent::TeamDissolved {
                team_id: team_id.to_string(),
            },
        );
        self.deps.fabric.drop_team_topics(team_id);
        self.teams.write().await.remove(team_id);

        if let (Some(parent_id), Some(meta)) = (team.parent_team_id.as_deref(), meta) {
            let _ = self
                .deps
                .context
                .remove_sub_team(parent_id, team_id)
                .await;
            self.deps.fabric.send_to(
                parent_id,
                &meta.spawning_agent,
                &TeamEvent::SubTeamCompleted {
                    team_id: team_id.to_string(),
                },
            );
        }

        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(team_id),
                ..TelemetryEvent::new("team.dissolved", "teams.manager")
            },
        );
        Ok(())
    }

    async fn require_team(&self, team_id: &str) -> Result<Team, TeamsError> {
        self.teams
            .read()
            .await
            .get(team_id)
            .cloned()
            .ok_or_else(|| TeamsError::TeamNotFound(team_id.to_string()))
    }
}
