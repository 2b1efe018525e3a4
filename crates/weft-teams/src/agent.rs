use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::Level;
use uuid::Uuid;

use weft_core::{
    context_window, pricing, Admission, BudgetStatus, EscalationStep, RoleConfig,
};
use weft_observability::{emit_event, ProcessKind, TelemetryEvent};
use weft_providers::{provider_of, CallOptions, ModelResponse};
use weft_tools::ToolContext;
use weft_types::{
    estimate_total_tokens, topics, AgentStatus, ChatMessage, NodeFilter, NodeType, RosterEntry,
    TeamEvent, TeamTask, TokenUsage, ToolCall,
};

use crate::error::TeamsError;
use crate::keeper::topic_overlap;
use crate::TeamDeps;

/// Tokens assumed per model call when asking the rate limiter for admission.
const ACQUIRE_ESTIMATE: u64 = 1_000;
/// Token budget handed to the repo-map collaborator.
const REPO_MAP_TOKEN_BUDGET: u64 = 2_000;
/// Fraction of the context window that triggers the offload nudge.
const CONTEXT_PRESSURE_RATIO: f64 = 0.5;
/// Fraction of the team budget that triggers a `budget.warning` broadcast.
const BUDGET_WARNING_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Default)]
pub struct SpawnAgentOptions {
    pub model: Option<String>,
    pub project_path: Option<String>,
}

/// Immutable spawn arguments; a supervisor restart rebuilds the worker from
/// these, the same way a crashed process restarts from its init args.
#[derive(Clone)]
pub struct AgentInit {
    pub team_id: String,
    pub name: String,
    pub role: RoleConfig,
    pub model: String,
    pub project_path: String,
}

#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub team_id: String,
    pub name: String,
    pub role: String,
    pub status: AgentStatus,
    pub model: String,
    pub task_id: Option<String>,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub failure_count: u32,
    pub message_count: usize,
}

pub enum AgentCommand {
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<String, TeamsError>>,
    },
    AssignTask {
        task: TeamTask,
    },
    PeerMessage {
        from: String,
        content: String,
    },
    GetStatus {
        reply: oneshot::Sender<AgentSnapshot>,
    },
    GetHistory {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    ChangeRole {
        role: String,
        require_approval: bool,
        reply: oneshot::Sender<Result<(), TeamsError>>,
    },
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Clonable handle onto one agent worker's mailbox.
#[derive(Clone, Debug)]
pub struct AgentHandle {
    pub team_id: String,
    pub name: String,
    tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    /// Blocking request/response with no upper bound: the caller decided to
    /// wait for the agent's answer.
    pub async fn send_message(&self, text: &str) -> Result<String, TeamsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::SendMessage {
                text: text.to_string(),
                reply,
            })
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))?;
        rx.await
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))?
    }

    pub fn assign_task(&self, task: TeamTask) {
        let _ = self.tx.send(AgentCommand::AssignTask { task });
    }

    pub fn peer_message(&self, from: &str, content: &str) {
        let _ = self.tx.send(AgentCommand::PeerMessage {
            from: from.to_string(),
            content: content.to_string(),
        });
    }

    pub async fn get_status(&self) -> Result<AgentSnapshot, TeamsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::GetStatus { reply })
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))?;
        rx.await
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))
    }

    pub async fn get_history(&self) -> Result<Vec<ChatMessage>, TeamsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::GetHistory { reply })
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))?;
        rx.await
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))
    }

    pub async fn change_role(&self, role: &str, require_approval: bool) -> Result<(), TeamsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::ChangeRole {
                role: role.to_string(),
                require_approval,
                reply,
            })
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))?;
        rx.await
            .map_err(|_| TeamsError::AgentStopped(self.name.clone()))?
    }

    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(AgentCommand::Stop { reply: Some(reply) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub(crate) fn from_parts(
        team_id: String,
        name: String,
        tx: mpsc::UnboundedSender<AgentCommand>,
    ) -> Self {
        Self { team_id, name, tx }
    }
}

pub(crate) struct AgentWorker {
    init: AgentInit,
    deps: TeamDeps,
    session_id: String,
    role: RoleConfig,
    model: String,
    status: AgentStatus,
    messages: Vec<ChatMessage>,
    task: Option<TeamTask>,
    /// Peer context updates, keyed by sender.
    context: HashMap<String, Value>,
    cost_usd: f64,
    tokens_used: u64,
    /// Escalations taken during the current turn; reset when a turn starts.
    failure_count: u32,
}

impl AgentWorker {
    pub(crate) fn new(init: AgentInit, deps: TeamDeps) -> Self {
        let role = init.role.clone();
        let model = init.model.clone();
        Self {
            init,
            deps,
            session_id: Uuid::new_v4().to_string(),
            role,
            model,
            status: AgentStatus::Idle,
            messages: Vec::new(),
            task: None,
            context: HashMap::new(),
            cost_usd: 0.0,
            tokens_used: 0,
            failure_count: 0,
        }
    }

    /// Worker main loop: one message in flight at a time, so history appends
    /// are totally ordered and inbound peer traffic never preempts an
    /// in-flight reasoning turn.
    pub(crate) async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<AgentCommand>,
        mut bus_rx: mpsc::UnboundedReceiver<TeamEvent>,
    ) {
        self.update_roster().await;
        self.broadcast_status();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None => break,
                        Some(AgentCommand::Stop { reply }) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(());
                            }
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                event = bus_rx.recv() => {
                    match event {
                        None => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
            }
        }
        let _ = self
            .deps
            .context
            .remove_agent(&self.init.team_id, &self.init.name)
            .await;
    }

    async fn handle_command(&mut self, cmd: AgentCommand) {
        match cmd {
            AgentCommand::SendMessage { text, reply } => {
                let result = self.handle_send_message(&text).await;
                let _ = reply.send(result);
            }
            AgentCommand::AssignTask { task } => {
                self.handle_task_assignment(task).await;
            }
            AgentCommand::PeerMessage { from, content } => {
                self.messages
                    .push(ChatMessage::user(format!("[Peer {from}]: {content}")));
            }
            AgentCommand::GetStatus { reply } => {
                let _ = reply.send(self.snapshot());
            }
            AgentCommand::GetHistory { reply } => {
                let _ = reply.send(self.messages.clone());
            }
            AgentCommand::ChangeRole {
                role,
                require_approval,
                reply,
            } => {
                let _ = reply.send(self.handle_change_role(&role, require_approval).await);
            }
            AgentCommand::Stop { .. } => unreachable!("handled by run loop"),
        }
    }

    async fn handle_send_message(&mut self, text: &str) -> Result<String, TeamsError> {
        self.messages.push(ChatMessage::user(text));
        self.set_status(AgentStatus::Working).await;
        // escalation may fire at most once per turn
        self.failure_count = 0;

        let result = self.run_turn().await;

        match &result {
            Ok(_) => self.set_status(AgentStatus::Idle).await,
            Err(_) => self.set_status(AgentStatus::Error).await,
        }
        result
    }

    /// One ReAct turn: iterate model calls and tool invocations until the
    /// model produces a final answer or the role's iteration cap is hit.
    async fn run_turn(&mut self) -> Result<String, TeamsError> {
        let system_prompt = self.build_system_prompt().await;
        let tool_schemas = self.deps.tools.schemas_for(&self.role.tools).await;

        let mut iterations = 0u32;
        while iterations < self.role.max_iterations {
            iterations += 1;

            self.acquire_admission().await;

            emit_event(
                Level::INFO,
                ProcessKind::Teams,
                TelemetryEvent {
                    team_id: Some(&self.init.team_id),
                    agent: Some(&self.init.name),
                    model: Some(&self.model),
                    ..TelemetryEvent::new("llm.request.start", "teams.agent")
                },
            );

            let mut call_messages = Vec::with_capacity(self.messages.len() + 1);
            call_messages.push(ChatMessage::system(system_prompt.clone()));
            call_messages.extend(self.messages.iter().cloned());

            let response = self
                .deps
                .model_client
                .call(
                    &self.model,
                    &call_messages,
                    &tool_schemas,
                    &CallOptions::default(),
                )
                .await;

            match response {
                Ok(ModelResponse::Final { text, usage }) => {
                    self.record_usage(&usage).await?;
                    self.messages.push(ChatMessage::assistant(text.clone()));
                    if let Some(task) = &self.task {
                        self.deps
                            .model_router
                            .record_success(
                                &self.init.team_id,
                                &self.init.name,
                                &task.id,
                                &self.model,
                            )
                            .await;
                    }
                    return Ok(text);
                }
                Ok(ModelResponse::ToolCalls { calls, usage }) => {
                    self.record_usage(&usage).await?;
                    self.messages.push(ChatMessage {
                        role: weft_types::MessageRole::Assistant,
                        content: String::new(),
                        tool_call_id: None,
                        tool_calls: Some(calls.clone()),
                    });
                    for call in calls {
                        self.execute_tool_call(call).await;
                    }
                }
                Err(err) => {
                    if let Some(next) = self.try_escalate(&err).await {
                        self.model = next;
                        self.failure_count += 1;
                        continue;
                    }
                    return Err(TeamsError::Model(err.to_string()));
                }
            }
        }
        Err(TeamsError::MaxIterationsExceeded(self.role.max_iterations))
    }

    /// Sleep out any rate-limit waits before calling the provider.
    async fn acquire_admission(&self) {
        let provider = provider_of(&self.model).to_string();
        loop {
            match self
                .deps
                .rate_limiter
                .acquire(&provider, ACQUIRE_ESTIMATE)
                .await
            {
                Admission::Ok => return,
                Admission::Wait { ms } => {
                    tracing::debug!(
                        agent = %self.init.name,
                        provider = %provider,
                        wait_ms = ms,
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
            }
        }
    }

    async fn execute_tool_call(&mut self, call: ToolCall) {
        self.deps.fabric.broadcast(
            &topics::team(&self.init.team_id),
            &TeamEvent::ToolExecuting {
                agent: self.init.name.clone(),
                tool: call.name.clone(),
            },
        );
        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(&self.init.team_id),
                agent: Some(&self.init.name),
                detail: Some(&call.name),
                ..TelemetryEvent::new("tool.call.start", "teams.agent")
            },
        );

        let output = if self.role.tools.iter().any(|t| t == &call.name) {
            let ctx = ToolContext {
                project_path: self.init.project_path.clone(),
                session_id: Some(self.session_id.clone()),
                team_id: self.init.team_id.clone(),
                agent_name: self.init.name.clone(),
                // context_offload needs the current history without calling
                // back into this worker
                agent_snapshot: (call.name == "context_offload")
                    .then(|| serde_json::to_value(&self.messages).unwrap_or(Value::Null)),
            };
            self.deps
                .tools
                .invoke(&call.name, call.arguments.clone(), &ctx)
                .await
        } else {
            Err(anyhow::anyhow!(
                "tool `{}` is not permitted for role `{}`",
                call.name,
                self.role.name
            ))
        };

        let (content, ok) = match output {
            Ok(output) => (output.result, true),
            Err(err) => (format!("Error: {err}"), false),
        };
        self.messages.push(ChatMessage::tool(call.id, content));

        self.deps.fabric.broadcast(
            &topics::team(&self.init.team_id),
            &TeamEvent::ToolComplete {
                agent: self.init.name.clone(),
                tool: call.name.clone(),
                ok,
            },
        );
        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(&self.init.team_id),
                agent: Some(&self.init.name),
                detail: Some(&call.name),
                status: Some(if ok { "ok" } else { "error" }),
                ..TelemetryEvent::new("tool.call.finish", "teams.agent")
            },
        );
    }

    /// Escalation fires at most once per turn (`failure_count` is reset at
    /// the start of every turn), and only after enough recorded failures for
    /// the current task.
    async fn try_escalate(&mut self, err: &anyhow::Error) -> Option<String> {
        let task_id = self.task.as_ref().map(|t| t.id.clone())?;
        self.deps
            .model_router
            .record_failure(&self.init.team_id, &self.init.name, &task_id)
            .await;

        if self.failure_count >= 1 {
            return None;
        }
        if !self.deps.model_router.escalation_enabled() {
            return None;
        }
        if !self
            .deps
            .model_router
            .should_escalate(&self.init.team_id, &self.init.name, &task_id)
            .await
        {
            return None;
        }

        match self.deps.model_router.escalate(&self.model) {
            EscalationStep::Ok(next) => {
                tracing::info!(
                    agent = %self.init.name,
                    old = %self.model,
                    new = %next,
                    error = %err,
                    "escalating model after repeated failures"
                );
                self.deps
                    .cost_tracker
                    .record_escalation(
                        &self.init.team_id,
                        &self.init.name,
                        &self.model,
                        &next,
                        Some(&task_id),
                    )
                    .await;
                self.deps.fabric.broadcast(
                    &topics::team(&self.init.team_id),
                    &TeamEvent::AgentEscalation {
                        name: self.init.name.clone(),
                        old_model: self.model.clone(),
                        new_model: next.clone(),
                    },
                );
                Some(next)
            }
            EscalationStep::MaxReached | EscalationStep::Disabled => None,
        }
    }

    /// Per-call usage accounting: rate-limiter budgets, cost tracker, and
    /// the 80% budget warning. Exceedance only aborts under `hard_abort`.
    async fn record_usage(&mut self, usage: &TokenUsage) -> Result<(), TeamsError> {
        let tokens = usage.total_tokens();
        let cost = usage
            .total_cost
            .unwrap_or_else(|| {
                pricing::calculate_cost(&self.model, usage.input_tokens, usage.output_tokens)
            });

        let status = self
            .deps
            .rate_limiter
            .record_usage(&self.init.team_id, &self.init.name, tokens, cost)
            .await;

        let sample = weft_core::UsageSample {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: Some(cost),
            model: Some(self.model.clone()),
        };
        self.deps
            .cost_tracker
            .record_usage(&self.init.team_id, &self.init.name, &sample)
            .await;
        self.deps
            .cost_tracker
            .record_call(&self.init.team_id, &self.init.name, &sample)
            .await;
        self.deps.model_router.record_attempt(&self.model).await;

        self.cost_usd += cost;
        self.tokens_used = self.tokens_used.saturating_add(tokens);

        emit_event(
            Level::INFO,
            ProcessKind::Teams,
            TelemetryEvent {
                team_id: Some(&self.init.team_id),
                agent: Some(&self.init.name),
                model: Some(&self.model),
                ..TelemetryEvent::new("llm.request.finish", "teams.agent")
            },
        );

        if let Some(budget) = self
            .deps
            .rate_limiter
            .get_team_budget(&self.init.team_id)
            .await
        {
            if budget.spent >= budget.limit * BUDGET_WARNING_RATIO {
                self.deps.fabric.broadcast(
                    &topics::team(&self.init.team_id),
                    &TeamEvent::BudgetWarning {
                        team_id: self.init.team_id.clone(),
                        spent_usd: budget.spent,
                        limit_usd: budget.limit,
                    },
                );
            }
        }

        if let BudgetStatus::Exceeded(scope) = status {
            if self.deps.config.teams.budget.hard_abort {
                return Err(TeamsError::BudgetExceeded { scope });
            }
            tracing::warn!(
                team = %self.init.team_id,
                agent = %self.init.name,
                ?scope,
                "budget exceeded; continuing current turn"
            );
        }
        Ok(())
    }

    async fn build_system_prompt(&self) -> String {
        let mut sections = vec![self.role.system_prompt.clone()];

        if let Some(rules) = self
            .deps
            .hooks
            .fetch_project_rules(&self.init.project_path)
            .await
        {
            sections.push(format!("Project rules:\n{rules}"));
        }

        if let Some(graph) = self.decision_graph_summary().await {
            sections.push(graph);
        }

        if let Some(map) = self
            .deps
            .hooks
            .fetch_repo_map(&self.init.project_path, REPO_MAP_TOKEN_BUDGET)
            .await
        {
            sections.push(format!("Repository map:\n{map}"));
        }

        let keeper_index = self.deps.keepers.index_entries(&self.init.team_id).await;
        if !keeper_index.is_empty() {
            sections.push(format!(
                "Context keepers available via context_retrieve:\n{}",
                keeper_index.join("\n")
            ));
        }

        let window = context_window(&self.model);
        let used = estimate_total_tokens(&self.messages);
        if (used as f64) >= (window as f64) * CONTEXT_PRESSURE_RATIO {
            sections.push(format!(
                "Context pressure: your history holds ~{used} of {window} tokens. \
                 Offload older threads with context_offload before continuing."
            ));
        }

        sections.join("\n\n")
    }

    async fn decision_graph_summary(&self) -> Option<String> {
        let goals = self
            .deps
            .store
            .list_decision_nodes(&NodeFilter {
                node_type: Some(NodeType::Goal),
                status: Some("active".to_string()),
                limit: Some(5),
                ..NodeFilter::default()
            })
            .await
            .unwrap_or_default();
        let decisions = self
            .deps
            .store
            .list_decision_nodes(&NodeFilter {
                node_type: Some(NodeType::Decision),
                limit: Some(5),
                ..NodeFilter::default()
            })
            .await
            .unwrap_or_default();

        if goals.is_empty() && decisions.is_empty() {
            return None;
        }
        let mut lines = Vec::new();
        if !goals.is_empty() {
            lines.push("Active goals:".to_string());
            lines.extend(goals.iter().map(|n| format!("- {}", n.title)));
        }
        if !decisions.is_empty() {
            lines.push("Recent decisions:".to_string());
            lines.extend(decisions.iter().map(|n| format!("- {}", n.title)));
        }
        Some(lines.join("\n"))
    }

    async fn handle_task_assignment(&mut self, task: TeamTask) {
        let description = task.description.clone();
        self.task = Some(task);
        self.keeper_prefetch(&description).await;
    }

    /// Inject the most relevant keeper slice as a system hint so the next
    /// turn starts with the offloaded context already in view.
    async fn keeper_prefetch(&mut self, description: &str) {
        if description.trim().is_empty() {
            return;
        }
        let keepers = self.deps.keepers.list(&self.init.team_id).await;
        let best = keepers
            .iter()
            .map(|k| (topic_overlap(&k.topic, description), k))
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score);
        let Some((_, keeper)) = best else {
            return;
        };
        match keeper.retrieve(description).await {
            Ok(messages) if !messages.is_empty() => {
                let formatted = messages
                    .iter()
                    .map(|m| format!("[{}]: {}", m.role.as_str(), m.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.messages.push(ChatMessage::system(format!(
                    "Relevant offloaded context from keeper `{}`:\n{formatted}",
                    keeper.topic
                )));
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "keeper prefetch failed");
            }
        }
    }

    async fn handle_change_role(
        &mut self,
        role_name: &str,
        require_approval: bool,
    ) -> Result<(), TeamsError> {
        let overrides = self.deps.config.role_override(role_name);
        let new_role = weft_core::resolve_role(role_name, overrides)
            .map_err(|_| TeamsError::UnknownRole(role_name.to_string()))?;

        let old_role = self.role.name.clone();
        if require_approval {
            // advisory only: the request is broadcast, not awaited
            self.deps.fabric.broadcast(
                &topics::team(&self.init.team_id),
                &TeamEvent::RoleChangeRequest {
                    name: self.init.name.clone(),
                    old_role: old_role.clone(),
                    new_role: new_role.name.clone(),
                    request_id: Uuid::new_v4().to_string(),
                },
            );
        }

        self.role = new_role;
        self.update_roster().await;
        self.deps.fabric.broadcast(
            &topics::team(&self.init.team_id),
            &TeamEvent::RoleChanged {
                name: self.init.name.clone(),
                old_role,
                new_role: self.role.name.clone(),
            },
        );
        Ok(())
    }

    /// PubSub reactions. Injected messages surface on the next turn; they
    /// never interrupt in-flight reasoning.
    async fn handle_event(&mut self, event: TeamEvent) {
        match event {
            TeamEvent::ContextUpdate { from, payload } => {
                self.context.insert(from, payload);
            }
            TeamEvent::AgentStatus { name, status } => {
                tracing::debug!(agent = %self.init.name, peer = %name, ?status, "peer status");
            }
            TeamEvent::PeerMessage { from, content } => {
                if from != self.init.name {
                    self.messages
                        .push(ChatMessage::user(format!("[Peer {from}]: {content}")));
                }
            }
            TeamEvent::TaskAssigned { id, agent } if agent == self.init.name => {
                // the assignment reaches us on both the tasks topic and our
                // direct topic; take it once
                if self.task.as_ref().map(|t| t.id == id).unwrap_or(false) {
                    return;
                }
                match self.deps.store.get_task(&id).await {
                    Ok(Some(task)) => self.handle_task_assignment(task).await,
                    Ok(None) => tracing::warn!(task = %id, "assigned task not found"),
                    Err(err) => tracing::warn!(task = %id, error = %err, "task fetch failed"),
                }
            }
            TeamEvent::KeeperCreated {
                id,
                topic,
                source,
                tokens,
            } if source != self.init.name => {
                self.messages.push(ChatMessage::system(format!(
                    "New keeper available: Keeper:{id} topic={topic} source={source} tokens={tokens}"
                )));
            }
            TeamEvent::Query {
                query_id,
                from,
                question,
                enrichments,
            } if from != self.init.name => {
                let mut body = format!("[Query from {from} | ID: {query_id}]\n{question}");
                if !enrichments.is_empty() {
                    body.push_str("\n\n");
                    body.push_str(&enrichments.join("\n"));
                }
                body.push_str(
                    "\n\nYou can respond using peer_answer_question, or pass it on with \
                     peer_forward_question.",
                );
                self.messages.push(ChatMessage::user(body));
            }
            TeamEvent::QueryAnswer {
                query_id,
                from,
                answer,
                enrichments,
            } => {
                let mut body = format!("[Answer from {from} | Query: {query_id}]\n{answer}");
                if !enrichments.is_empty() {
                    body.push_str("\n\n");
                    body.push_str(&enrichments.join("\n"));
                }
                self.messages.push(ChatMessage::user(body));
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            team_id: self.init.team_id.clone(),
            name: self.init.name.clone(),
            role: self.role.name.clone(),
            status: self.status,
            model: self.model.clone(),
            task_id: self.task.as_ref().map(|t| t.id.clone()),
            cost_usd: self.cost_usd,
            tokens_used: self.tokens_used,
            failure_count: self.failure_count,
            message_count: self.messages.len(),
        }
    }

    async fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        self.update_roster().await;
        self.broadcast_status();
    }

    async fn update_roster(&self) {
        let _ = self
            .deps
            .context
            .update_agent(
                &self.init.team_id,
                &self.init.name,
                RosterEntry {
                    role: self.role.name.clone(),
                    status: self.status,
                    model: Some(self.model.clone()),
                },
            )
            .await;
    }

    fn broadcast_status(&self) {
        self.deps.fabric.broadcast(
            &topics::team(&self.init.team_id),
            &TeamEvent::AgentStatus {
                name: self.init.name.clone(),
                status: self.status,
            },
        );
    }
}

/// Wire a worker's mailbox into the team's topic namespace.
pub(crate) fn subscribe_agent_topics(
    deps: &TeamDeps,
    team_id: &str,
    name: &str,
) -> mpsc::UnboundedReceiver<TeamEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for topic in [
        topics::team(team_id),
        topics::agent(team_id, name),
        topics::context(team_id),
        topics::tasks(team_id),
        topics::decisions(team_id),
    ] {
        deps.fabric.subscribe_sender(&topic, tx.clone());
    }
    rx
}
