//! End-to-end scenarios across the teams runtime: task unblocking, query
//! hop limits, escalation, sub-team cascades, pairing, and debates.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use weft_core::WeftConfig;
use weft_providers::{CallOptions, ModelClient, ModelResponse};
use weft_store::{SqliteStore, Store};
use weft_teams::{
    run_debate, start_pair, stop_pair, AskOptions, DebateOptions, KeeperOptions,
    SpawnAgentOptions, TeamDeps, TeamsError, TeamsManager,
};
use weft_tools::{Tool, ToolContext, ToolOutput, ToolRegistry};
use weft_types::{
    topics, AgentStatus, ChatMessage, DebatePhase, DepType, NewTask, NodeFilter, NodeType,
    PairEventKind, PairPosition, TeamEvent, TokenUsage, ToolCall, ToolSchema,
};

/// Replays a queue of canned responses, then settles on short final answers.
struct ScriptedClient {
    script: Mutex<VecDeque<anyhow::Result<ModelResponse>>>,
}

impl ScriptedClient {
    fn new(script: Vec<anyhow::Result<ModelResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }

    fn final_ok(text: &str) -> anyhow::Result<ModelResponse> {
        Ok(ModelResponse::Final {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                total_cost: None,
            },
        })
    }

    fn tool_call(name: &str, args: serde_json::Value) -> anyhow::Result<ModelResponse> {
        Ok(ModelResponse::ToolCalls {
            calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.to_string(),
                arguments: args,
            }],
            usage: TokenUsage {
                input_tokens: 40,
                output_tokens: 10,
                total_cost: None,
            },
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn call(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _opts: &CallOptions,
    ) -> anyhow::Result<ModelResponse> {
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| ScriptedClient::final_ok("ok"))
    }
}

async fn manager_with(
    client: Arc<dyn ModelClient>,
    config: WeftConfig,
) -> TeamsManager {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    TeamsManager::new(TeamDeps::new(config, store, client))
}

async fn default_manager() -> TeamsManager {
    manager_with(ScriptedClient::new(Vec::new()), WeftConfig::default()).await
}

/// Wait for the next event matching the predicate, skipping everything else.
async fn expect_event<F>(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<TeamEvent>,
    mut pred: F,
) -> TeamEvent
where
    F: FnMut(&TeamEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ---------------------------------------------------------------------------
// S2 — task unblocking broadcasts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completing_a_blocker_unblocks_and_broadcasts() {
    let manager = default_manager().await;
    let team = manager.create_team("pipeline", None).await;
    let tasks = manager.tasks();

    let t1 = tasks
        .create_task(&team.team_id, NewTask {
            title: "write parser".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let t2 = tasks
        .create_task(&team.team_id, NewTask {
            title: "wire parser into cli".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    tasks
        .add_dependency(&t2.id, &t1.id, DepType::Blocks)
        .await
        .unwrap();

    let available = tasks.list_available(&team.team_id).await.unwrap();
    assert_eq!(
        available.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec![t1.id.as_str()]
    );

    let mut sub = manager
        .deps()
        .fabric
        .subscribe(&topics::tasks(&team.team_id));

    tasks
        .assign_task(&team.team_id, &t1.id, "coder")
        .await
        .unwrap();
    tasks
        .complete_task(&team.team_id, &t1.id, "done")
        .await
        .unwrap();

    let completed = expect_event(&mut sub.rx, |e| {
        matches!(e, TeamEvent::TaskCompleted { .. })
    })
    .await;
    match completed {
        TeamEvent::TaskCompleted { id, owner, result } => {
            assert_eq!(id, t1.id);
            assert_eq!(owner.as_deref(), Some("coder"));
            assert_eq!(result, "done");
        }
        _ => unreachable!(),
    }

    let unblocked = expect_event(&mut sub.rx, |e| {
        matches!(e, TeamEvent::TasksUnblocked { .. })
    })
    .await;
    match unblocked {
        TeamEvent::TasksUnblocked { ids } => assert_eq!(ids, vec![t2.id.clone()]),
        _ => unreachable!(),
    }

    let available = tasks.list_available(&team.team_id).await.unwrap();
    assert_eq!(
        available.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec![t2.id.as_str()]
    );

    // the task cache tracks the terminal status
    let cached = manager
        .deps()
        .context
        .get_cached_task(&team.team_id, &t1.id)
        .await
        .unwrap();
    assert_eq!(cached.status, weft_types::TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// S4 — query forwarding hop limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_forwarding_respects_hop_limit() {
    let manager = default_manager().await;
    let team = manager.create_team("routing", None).await;
    let queries = manager.queries();

    let query = queries
        .ask(
            &team.team_id,
            "alice",
            "Where is the session refreshed?",
            AskOptions {
                target: Some("bob".to_string()),
                max_hops: Some(3),
            },
        )
        .await
        .unwrap();

    queries.forward(&query.query_id, "bob", "carol", "n1").await.unwrap();
    queries.forward(&query.query_id, "carol", "dave", "n2").await.unwrap();
    queries.forward(&query.query_id, "dave", "eve", "n3").await.unwrap();

    let err = queries
        .forward(&query.query_id, "eve", "frank", "n4")
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::MaxHopsReached { .. }));

    // the rejected hop was not recorded
    let state = queries.get_query(&query.query_id).await.unwrap();
    assert_eq!(state.hops, vec!["bob", "carol", "dave"]);
    assert_eq!(state.enrichments, vec!["n1", "n2", "n3"]);
    assert!(state.hops.len() as u32 <= state.max_hops);
}

#[tokio::test]
async fn answers_reach_the_origin_agent_topic() {
    let manager = default_manager().await;
    let team = manager.create_team("routing", None).await;
    let mut origin_sub = manager
        .deps()
        .fabric
        .subscribe(&topics::agent(&team.team_id, "alice"));

    let query = manager
        .queries()
        .ask(&team.team_id, "alice", "anyone seen the flaky test?", AskOptions::default())
        .await
        .unwrap();
    manager
        .queries()
        .answer(&query.query_id, "bob", "it is the retry loop")
        .await
        .unwrap();

    let answer = expect_event(&mut origin_sub.rx, |e| {
        matches!(e, TeamEvent::QueryAnswer { .. })
    })
    .await;
    match answer {
        TeamEvent::QueryAnswer { from, answer, .. } => {
            assert_eq!(from, "bob");
            assert_eq!(answer, "it is the retry loop");
        }
        _ => unreachable!(),
    }

    let state = manager.queries().get_query(&query.query_id).await.unwrap();
    assert_eq!(state.answer.as_deref(), Some("it is the retry loop"));
    assert_eq!(state.hops, vec!["bob"]);
}

#[tokio::test]
async fn stale_queries_are_reaped_by_ttl() {
    let manager = default_manager().await;
    let team = manager.create_team("routing", None).await;
    manager
        .queries()
        .ask(&team.team_id, "alice", "q1", AskOptions::default())
        .await
        .unwrap();
    manager
        .queries()
        .ask(&team.team_id, "alice", "q2", AskOptions::default())
        .await
        .unwrap();

    assert_eq!(manager.queries().expire_stale(u64::MAX).await, 0);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(manager.queries().expire_stale(0).await, 2);
}

// ---------------------------------------------------------------------------
// S7 — sub-team cascade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dissolving_root_cascades_and_notifies_spawner() {
    let manager = default_manager().await;
    let root = manager.create_team("root", None).await;
    let mid = manager
        .create_sub_team(&root.team_id, "lead", "mid", None)
        .await
        .unwrap();
    let leaf = manager
        .create_sub_team(&mid.team_id, "lead", "leaf", None)
        .await
        .unwrap();
    assert_eq!(leaf.depth, 2);

    let registry = manager.deps().context.registry().clone();
    assert!(registry.exists(&mid.team_id).await);
    assert!(registry.exists(&leaf.team_id).await);

    let mut lead_sub = manager
        .deps()
        .fabric
        .subscribe(&topics::agent(&root.team_id, "lead"));

    manager.dissolve_team(&root.team_id).await.unwrap();

    assert!(!registry.exists(&root.team_id).await);
    assert!(!registry.exists(&mid.team_id).await);
    assert!(!registry.exists(&leaf.team_id).await);
    assert!(manager.get_team(&root.team_id).await.is_none());

    let completed = expect_event(&mut lead_sub.rx, |e| {
        matches!(e, TeamEvent::SubTeamCompleted { .. })
    })
    .await;
    match completed {
        TeamEvent::SubTeamCompleted { team_id } => assert_eq!(team_id, mid.team_id),
        _ => unreachable!(),
    }

    // dissolution is idempotent
    manager.dissolve_team(&root.team_id).await.unwrap();
}

#[tokio::test]
async fn sub_team_depth_is_capped() {
    let manager = default_manager().await;
    let root = manager.create_team("root", None).await;
    let mut parent = root.team_id.clone();
    for i in 0..3 {
        parent = manager
            .create_sub_team(&parent, "lead", &format!("level-{i}"), None)
            .await
            .unwrap()
            .team_id;
    }
    let err = manager
        .create_sub_team(&parent, "lead", "too-deep", None)
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::MaxDepthExceeded { depth: 4, max: 3 }));

    let err = manager
        .create_sub_team("missing-team", "lead", "orphan", None)
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::ParentNotFound(_)));
}

// ---------------------------------------------------------------------------
// Agent worker turns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_message_runs_a_turn_and_accounts_usage() {
    let client = ScriptedClient::new(vec![ScriptedClient::final_ok("all done")]);
    let manager = manager_with(client, WeftConfig::default()).await;
    let team = manager.create_team("build", None).await;

    let mut team_sub = manager.deps().fabric.subscribe(&topics::team(&team.team_id));

    let agent = manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();

    let reply = agent.send_message("implement the parser").await.unwrap();
    assert_eq!(reply, "all done");

    expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::AgentStatus { status: AgentStatus::Working, .. })
    })
    .await;
    expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::AgentStatus { status: AgentStatus::Idle, .. })
    })
    .await;

    let history = agent.get_history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "implement the parser");
    assert_eq!(history[1].content, "all done");

    // usage flowed into the cost tracker with pricing-derived cost
    let usage = manager
        .deps()
        .cost_tracker
        .get_agent_usage(&team.team_id, "coder-1")
        .await
        .unwrap();
    assert_eq!(usage.requests, 1);
    assert_eq!(usage.input_tokens, 100);
    let expected = weft_core::pricing::calculate_cost("zai:glm-5", 100, 50);
    assert!((usage.cost - expected).abs() < 1e-9);

    // and into the budget ledger
    let budget = manager
        .deps()
        .rate_limiter
        .get_team_budget(&team.team_id)
        .await
        .unwrap();
    assert!((budget.spent - expected).abs() < 1e-9);

    let snapshot = agent.get_status().await.unwrap();
    assert_eq!(snapshot.status, AgentStatus::Idle);
    assert_eq!(snapshot.tokens_used, 150);
}

struct EchoingTool;

#[async_trait]
impl Tool for EchoingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "file_read".to_string(),
            description: "read a file".to_string(),
            parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }
    }

    async fn run(&self, params: serde_json::Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::text(format!(
            "read {} for {}",
            params["path"].as_str().unwrap_or("?"),
            ctx.agent_name
        )))
    }
}

#[tokio::test]
async fn tool_calls_execute_and_feed_back_into_history() {
    let client = ScriptedClient::new(vec![
        ScriptedClient::tool_call("file_read", json!({"path": "src/lib.rs"})),
        ScriptedClient::final_ok("file looks fine"),
    ]);
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let tools = ToolRegistry::new();
    tools.register(Arc::new(EchoingTool)).await.unwrap();
    let deps = TeamDeps::new(WeftConfig::default(), store, client).with_tools(tools);
    let manager = TeamsManager::new(deps);

    let team = manager.create_team("build", None).await;
    let mut team_sub = manager.deps().fabric.subscribe(&topics::team(&team.team_id));
    let agent = manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();

    let reply = agent.send_message("check src/lib.rs").await.unwrap();
    assert_eq!(reply, "file looks fine");

    expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::ToolExecuting { tool, .. } if tool == "file_read")
    })
    .await;
    expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::ToolComplete { tool, ok: true, .. } if tool == "file_read")
    })
    .await;

    let history = agent.get_history().await.unwrap();
    let tool_message = history
        .iter()
        .find(|m| m.role == weft_types::MessageRole::Tool)
        .expect("tool result in history");
    assert_eq!(tool_message.content, "read src/lib.rs for coder-1");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_file_read"));
}

#[tokio::test]
async fn tools_outside_the_role_are_refused_as_errors() {
    let client = ScriptedClient::new(vec![
        // researcher has no file_write
        ScriptedClient::tool_call("file_write", json!({"path": "x", "content": "y"})),
        ScriptedClient::final_ok("understood"),
    ]);
    let manager = manager_with(client, WeftConfig::default()).await;
    let team = manager.create_team("research", None).await;
    let agent = manager
        .spawn_agent(&team.team_id, "scout", "researcher", SpawnAgentOptions::default())
        .await
        .unwrap();

    agent.send_message("try to write a file").await.unwrap();
    let history = agent.get_history().await.unwrap();
    let tool_message = history
        .iter()
        .find(|m| m.role == weft_types::MessageRole::Tool)
        .unwrap();
    assert!(tool_message.content.contains("not permitted"));
}

#[tokio::test]
async fn repeated_failures_escalate_once_and_recover() {
    let config: WeftConfig = serde_json::from_value(json!({
        "teams": {"models": {"escalation": [
            "zai:glm-5",
            "anthropic:claude-sonnet-4-6",
            "anthropic:claude-opus-4-6",
        ]}},
    }))
    .unwrap();
    let client = ScriptedClient::new(vec![
        Err(anyhow::anyhow!("model overloaded")),
        ScriptedClient::final_ok("recovered on the bigger model"),
    ]);
    let manager = manager_with(client, config).await;
    let team = manager.create_team("build", None).await;

    let mut team_sub = manager.deps().fabric.subscribe(&topics::team(&team.team_id));
    let agent = manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();

    // two failures already recorded for this task from earlier turns
    let task = manager
        .tasks()
        .create_task(&team.team_id, NewTask {
            title: "hard task".to_string(),
            description: "tricky".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    manager
        .deps()
        .model_router
        .record_failure(&team.team_id, "coder-1", &task.id)
        .await;
    agent.assign_task(task.clone());

    let reply = agent.send_message("try again").await.unwrap();
    assert_eq!(reply, "recovered on the bigger model");

    let escalation = expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::AgentEscalation { .. })
    })
    .await;
    match escalation {
        TeamEvent::AgentEscalation {
            old_model,
            new_model,
            ..
        } => {
            assert_eq!(old_model, "zai:glm-5");
            assert_eq!(new_model, "anthropic:claude-sonnet-4-6");
        }
        _ => unreachable!(),
    }

    let snapshot = agent.get_status().await.unwrap();
    assert_eq!(snapshot.model, "anthropic:claude-sonnet-4-6");
    assert_eq!(snapshot.failure_count, 1);

    let escalations = manager
        .deps()
        .cost_tracker
        .list_escalations(&team.team_id)
        .await;
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].task_id.as_deref(), Some(task.id.as_str()));
}

#[tokio::test]
async fn model_errors_without_escalation_surface_to_caller() {
    let client = ScriptedClient::new(vec![Err(anyhow::anyhow!("provider down"))]);
    // no escalation chain configured
    let manager = manager_with(client, WeftConfig::default()).await;
    let team = manager.create_team("build", None).await;
    let agent = manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();

    let err = agent.send_message("do the thing").await.unwrap_err();
    assert!(matches!(err, TeamsError::Model(_)));
    let snapshot = agent.get_status().await.unwrap();
    assert_eq!(snapshot.status, AgentStatus::Error);
}

#[tokio::test]
async fn peer_messages_surface_on_the_next_turn() {
    let manager = default_manager().await;
    let team = manager.create_team("build", None).await;
    let agent = manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();

    agent.peer_message("reviewer-1", "please rebase first");
    // give the worker loop a beat to drain its mailbox
    tokio::time::sleep(Duration::from_millis(20)).await;

    let history = agent.get_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "[Peer reviewer-1]: please rebase first");
}

#[tokio::test]
async fn duplicate_agent_names_are_rejected() {
    let manager = default_manager().await;
    let team = manager.create_team("build", None).await;
    manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();
    let err = manager
        .spawn_agent(&team.team_id, "coder-1", "tester", SpawnAgentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::DuplicateAgent { .. }));

    let err = manager
        .spawn_agent(&team.team_id, "coder-2", "wizard", SpawnAgentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::Role(_)));
}

#[tokio::test]
async fn role_budget_limits_apply_to_spawned_agents() {
    let config: WeftConfig = serde_json::from_value(json!({
        "teams": {"roles": {"coder": {"budget_limit": 0.25}}},
    }))
    .unwrap();
    let client = ScriptedClient::new(vec![ScriptedClient::final_ok("done")]);
    let manager = manager_with(client, config).await;
    let team = manager.create_team("budgeted", None).await;

    let agent = manager
        .spawn_agent(&team.team_id, "coder-1", "coder", SpawnAgentOptions::default())
        .await
        .unwrap();
    agent.send_message("small task").await.unwrap();

    let budget = manager
        .deps()
        .rate_limiter
        .get_team_budget(&team.team_id)
        .await
        .unwrap();
    assert_eq!(budget.agents["coder-1"].limit, 0.25);
}

#[tokio::test]
async fn templates_expand_counts_into_suffixed_agents() {
    let config: WeftConfig = serde_json::from_value(json!({
        "teams": {"templates": {"feature": {"agents": [
            {"name": "lead", "role": "lead"},
            {"name": "coder", "role": "coder", "count": 2},
        ]}}},
    }))
    .unwrap();
    let manager = manager_with(ScriptedClient::new(Vec::new()), config).await;
    let team = manager.create_team("feature-x", None).await;

    let handles = manager
        .spawn_from_template(&team.team_id, "feature")
        .await
        .unwrap();
    let names = handles.iter().map(|h| h.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["lead", "coder-1", "coder-2"]);

    let err = manager
        .spawn_from_template(&team.team_id, "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::TemplateNotFound(_)));
}

// ---------------------------------------------------------------------------
// Pair mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pair_sessions_seat_both_agents_and_stream_events() {
    let manager = default_manager().await;
    let team = manager.create_team("pairing", None).await;
    let deps = manager.deps();

    let err = start_pair(deps, &team.team_id, "ada", "ada", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, TeamsError::SameAgent(_)));

    let mut coder_sub = deps.fabric.subscribe(&topics::agent(&team.team_id, "ada"));
    let mut reviewer_sub = deps.fabric.subscribe(&topics::agent(&team.team_id, "grace"));
    let mut team_sub = deps.fabric.subscribe(&topics::team(&team.team_id));

    let pair_id = start_pair(deps, &team.team_id, "ada", "grace", json!({"focus": "parser"}))
        .await
        .unwrap();

    let seat = expect_event(&mut coder_sub.rx, |e| matches!(e, TeamEvent::PairStarted { .. })).await;
    match seat {
        TeamEvent::PairStarted { position, peer, .. } => {
            assert_eq!(position, PairPosition::Coder);
            assert_eq!(peer, "grace");
        }
        _ => unreachable!(),
    }
    let seat =
        expect_event(&mut reviewer_sub.rx, |e| matches!(e, TeamEvent::PairStarted { .. })).await;
    match seat {
        TeamEvent::PairStarted { position, peer, .. } => {
            assert_eq!(position, PairPosition::Reviewer);
            assert_eq!(peer, "ada");
        }
        _ => unreachable!(),
    }
    expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::PairSessionStarted { .. })
    })
    .await;

    let mut pair_sub = deps.fabric.subscribe(&topics::pair(&team.team_id, &pair_id));
    weft_teams::broadcast_pair_event(
        deps,
        &team.team_id,
        &pair_id,
        PairEventKind::FileEdited,
        "ada",
        json!({"path": "src/parser.rs"}),
    )
    .await
    .unwrap();
    let event = expect_event(&mut pair_sub.rx, |e| matches!(e, TeamEvent::PairEvent { .. })).await;
    match event {
        TeamEvent::PairEvent { event, from, .. } => {
            assert_eq!(event, PairEventKind::FileEdited);
            assert_eq!(from, "ada");
        }
        _ => unreachable!(),
    }

    stop_pair(deps, &team.team_id, &pair_id).await.unwrap();
    expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::PairSessionStopped { .. })
    })
    .await;

    // events against a stopped pair are refused
    let err = weft_teams::broadcast_pair_event(
        deps,
        &team.team_id,
        &pair_id,
        PairEventKind::ReviewApproved,
        "grace",
        json!({}),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TeamsError::PairNotFound(_)));
}

// ---------------------------------------------------------------------------
// Debate
// ---------------------------------------------------------------------------

/// A scripted participant living on its agent topic: proposes, critiques,
/// revises, and votes for a fixed choice.
fn scripted_debater(deps: &TeamDeps, team_id: &str, name: &str, vote_for: &str) {
    let fabric = deps.fabric.clone();
    let mut sub = fabric.subscribe(&topics::agent(team_id, name));
    let team_id = team_id.to_string();
    let name = name.to_string();
    let vote_for = vote_for.to_string();
    tokio::spawn(async move {
        while let Some(event) = sub.rx.recv().await {
            let response = match event {
                TeamEvent::DebatePropose { debate_id, topic, .. } => Some(TeamEvent::DebateResponse {
                    debate_id,
                    agent: name.clone(),
                    phase: DebatePhase::Proposal,
                    content: format!("{name}: plan for {topic}"),
                    target_node_id: None,
                    choice: None,
                }),
                TeamEvent::DebateCritique {
                    debate_id,
                    proposals,
                    ..
                } => Some(TeamEvent::DebateResponse {
                    debate_id,
                    agent: name.clone(),
                    phase: DebatePhase::Critique,
                    content: format!("{name}: looks incomplete"),
                    target_node_id: proposals.first().and_then(|p| p.node_id.clone()),
                    choice: None,
                }),
                TeamEvent::DebateRevise { debate_id, .. } => Some(TeamEvent::DebateResponse {
                    debate_id,
                    agent: name.clone(),
                    phase: DebatePhase::Revision,
                    content: format!("{name}: revised plan"),
                    target_node_id: None,
                    choice: None,
                }),
                TeamEvent::DebateVote { debate_id, .. } => Some(TeamEvent::DebateResponse {
                    debate_id,
                    agent: name.clone(),
                    phase: DebatePhase::Vote,
                    content: String::new(),
                    target_node_id: None,
                    choice: Some(vote_for.clone()),
                }),
                _ => None,
            };
            if let Some(response) = response {
                if let TeamEvent::DebateResponse { ref debate_id, .. } = response {
                    fabric.broadcast(&topics::debate(&team_id, debate_id), &response);
                }
            }
        }
    });
}

#[tokio::test]
async fn debate_collects_rounds_votes_and_records_nodes() {
    let manager = default_manager().await;
    let team = manager.create_team("debate", None).await;
    let deps = manager.deps();

    scripted_debater(deps, &team.team_id, "alice", "alice");
    scripted_debater(deps, &team.team_id, "bob", "alice");

    let outcome = run_debate(
        deps,
        &team.team_id,
        "storage engine choice",
        &["alice".to_string(), "bob".to_string()],
        DebateOptions {
            max_rounds: 1,
            round_timeout: Duration::from_secs(5),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.rounds_run, 1);
    assert_eq!(outcome.proposals.len(), 2);
    assert!(outcome
        .proposals
        .iter()
        .all(|p| p.content.contains("revised plan")));
    assert_eq!(outcome.votes.len(), 2);
    assert_eq!(outcome.winner.as_deref(), Some("alice"));
    assert!(outcome.consensus);

    // proposals and critiques persisted into the decision graph
    let options = deps
        .store
        .list_decision_nodes(&NodeFilter {
            node_type: Some(NodeType::Option),
            ..NodeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(options.len(), 2);
    let observations = deps
        .store
        .list_decision_nodes(&NodeFilter {
            node_type: Some(NodeType::Observation),
            ..NodeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(observations.len(), 2);
}

#[tokio::test]
async fn debates_need_at_least_two_participants() {
    let manager = default_manager().await;
    let team = manager.create_team("debate", None).await;
    let err = run_debate(
        manager.deps(),
        &team.team_id,
        "solo",
        &["alice".to_string()],
        DebateOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TeamsError::InsufficientParticipants(1)));
}

// ---------------------------------------------------------------------------
// Keepers through the manager
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawned_keepers_announce_themselves_and_enrich_queries() {
    let manager = default_manager().await;
    let team = manager.create_team("keepers", None).await;
    let mut team_sub = manager.deps().fabric.subscribe(&topics::team(&team.team_id));

    let keeper = manager
        .spawn_keeper(
            &team.team_id,
            KeeperOptions {
                topic: "auth session handling".to_string(),
                source_agent: "researcher".to_string(),
                messages: vec![ChatMessage::user("sessions refresh in session.rs")],
                ..KeeperOptions::default()
            },
        )
        .await
        .unwrap();

    let created = expect_event(&mut team_sub.rx, |e| {
        matches!(e, TeamEvent::KeeperCreated { .. })
    })
    .await;
    match created {
        TeamEvent::KeeperCreated { id, topic, source, .. } => {
            assert_eq!(id, keeper.id);
            assert_eq!(topic, "auth session handling");
            assert_eq!(source, "researcher");
        }
        _ => unreachable!(),
    }

    // a question overlapping the keeper topic picks up an enrichment
    let query = manager
        .queries()
        .ask(
            &team.team_id,
            "alice",
            "how does auth session refresh work?",
            AskOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(query.enrichments.len(), 1);
    assert!(query.enrichments[0].starts_with("[Context Keeper]: "));
}
