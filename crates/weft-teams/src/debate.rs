use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use weft_types::{
    topics, DebateCritiqueNote, DebatePhase, DebateProposal, DecisionEdge, DecisionNode, EdgeType,
    NodeType, TeamEvent,
};

use crate::error::TeamsError;
use crate::TeamDeps;

pub const DEFAULT_MAX_ROUNDS: u32 = 3;
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DebateOptions {
    pub max_rounds: u32,
    pub round_timeout: Duration,
}

impl Default for DebateOptions {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub debate_id: String,
    pub topic: String,
    pub rounds_run: u32,
    pub proposals: Vec<DebateProposal>,
    /// voter → choice
    pub votes: HashMap<String, String>,
    pub winner: Option<String>,
    pub consensus: bool,
}

struct PhaseResponse {
    content: String,
    target_node_id: Option<String>,
    choice: Option<String>,
}

/// Run a bounded propose/critique/revise/vote debate across the named
/// participants. Missing agents simply do not contribute: every collection
/// phase proceeds with whatever arrived before the round timeout.
pub async fn run_debate(
    deps: &TeamDeps,
    team_id: &str,
    topic: &str,
    participants: &[String],
    opts: DebateOptions,
) -> Result<DebateOutcome, TeamsError> {
    if participants.len() < 2 {
        return Err(TeamsError::InsufficientParticipants(participants.len()));
    }
    let debate_id = format!("deb_{}", Uuid::new_v4().simple());
    let debate_topic = topics::debate(team_id, &debate_id);
    // subscribe before the first prompt so no response can be missed
    let mut collector = deps.fabric.subscribe(&debate_topic);

    let mut proposals: HashMap<String, DebateProposal> = HashMap::new();
    let mut rounds_run = 0;

    for round in 1..=opts.max_rounds {
        rounds_run = round;

        for participant in participants {
            deps.fabric.send_to(
                team_id,
                participant,
                &TeamEvent::DebatePropose {
                    debate_id: debate_id.clone(),
                    round,
                    topic: topic.to_string(),
                },
            );
        }
        let responses = collect_phase(
            &mut collector.rx,
            &debate_id,
            DebatePhase::Proposal,
            participants,
            opts.round_timeout,
        )
        .await;

        for (agent, response) in responses {
            let node_id = log_node(
                deps,
                team_id,
                NodeType::Option,
                &format!("proposal by {agent}"),
                &response.content,
                &agent,
                &debate_id,
                round,
            )
            .await;
            proposals.insert(
                agent.clone(),
                DebateProposal {
                    agent,
                    content: response.content,
                    node_id,
                },
            );
        }

        // critique: each agent sees everyone else's proposals
        for participant in participants {
            let others = proposals
                .values()
                .filter(|p| &p.agent != participant)
                .cloned()
                .collect::<Vec<_>>();
            deps.fabric.send_to(
                team_id,
                participant,
                &TeamEvent::DebateCritique {
                    debate_id: debate_id.clone(),
                    round,
                    proposals: others,
                },
            );
        }
        let responses = collect_phase(
            &mut collector.rx,
            &debate_id,
            DebatePhase::Critique,
            participants,
            opts.round_timeout,
        )
        .await;

        let mut critiques = Vec::new();
        for (agent, response) in responses {
            let node_id = log_node(
                deps,
                team_id,
                NodeType::Observation,
                &format!("critique by {agent}"),
                &response.content,
                &agent,
                &debate_id,
                round,
            )
            .await;
            if let (Some(critique_node), Some(target)) = (&node_id, &response.target_node_id) {
                let edge = DecisionEdge {
                    from: critique_node.clone(),
                    to: target.clone(),
                    edge_type: EdgeType::Supports,
                    rationale: None,
                    weight: None,
                };
                if let Err(err) = deps.store.insert_decision_edge(&edge).await {
                    tracing::warn!(error = %err, "critique edge insert failed");
                }
            }
            critiques.push(DebateCritiqueNote {
                agent,
                content: response.content,
                target_node_id: response.target_node_id,
            });
        }

        // revise: each agent gets the critiques aimed at their proposal
        for participant in participants {
            let own_node = proposals.get(participant).and_then(|p| p.node_id.clone());
            let mine = critiques
                .iter()
                .filter(|c| c.target_node_id.is_some() && c.target_node_id == own_node)
                .cloned()
                .collect::<Vec<_>>();
            deps.fabric.send_to(
                team_id,
                participant,
                &TeamEvent::DebateRevise {
                    debate_id: debate_id.clone(),
                    round,
                    critiques: mine,
                },
            );
        }
        let responses = collect_phase(
            &mut collector.rx,
            &debate_id,
            DebatePhase::Revision,
            participants,
            opts.round_timeout,
        )
        .await;
        for (agent, response) in responses {
            if let Some(proposal) = proposals.get_mut(&agent) {
                if !response.content.trim().is_empty() {
                    proposal.content = response.content;
                }
            }
        }
    }

    // final vote over the surviving proposals
    let final_proposals = proposals.values().cloned().collect::<Vec<_>>();
    for participant in participants {
        deps.fabric.send_to(
            team_id,
            participant,
            &TeamEvent::DebateVote {
                debate_id: debate_id.clone(),
                proposals: final_proposals.clone(),
            },
        );
    }
    let responses = collect_phase(
        &mut collector.rx,
        &debate_id,
        DebatePhase::Vote,
        participants,
        opts.round_timeout,
    )
    .await;

    let mut votes = HashMap::new();
    for (agent, response) in responses {
        if let Some(choice) = response.choice {
            votes.insert(agent, choice);
        }
    }

    let mut tally: HashMap<&str, usize> = HashMap::new();
    for choice in votes.values() {
        *tally.entry(choice.as_str()).or_default() += 1;
    }
    let winner = tally
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(choice, _)| choice.to_string());
    let distinct = tally.len();
    let consensus = distinct <= 1 && votes.len() == participants.len();

    deps.fabric
        .unsubscribe(&collector.topic, collector.id);

    Ok(DebateOutcome {
        debate_id,
        topic: topic.to_string(),
        rounds_run,
        proposals: final_proposals,
        votes,
        winner,
        consensus,
    })
}

/// Drain one response per participant for the phase, or give up at the
/// timeout. Duplicates from the same agent are ignored.
async fn collect_phase(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<TeamEvent>,
    debate_id: &str,
    phase: DebatePhase,
    participants: &[String],
    timeout: Duration,
) -> HashMap<String, PhaseResponse> {
    let deadline = Instant::now() + timeout;
    let mut responses: HashMap<String, PhaseResponse> = HashMap::new();

    while responses.len() < participants.len() {
        let event = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => break,
        };
        let TeamEvent::DebateResponse {
            debate_id: response_debate,
            agent,
            phase: response_phase,
            content,
            target_node_id,
            choice,
        } = event
        else {
            continue;
        };
        if response_debate != debate_id
            || response_phase != phase
            || !participants.contains(&agent)
            || responses.contains_key(&agent)
        {
            continue;
        }
        responses.insert(
            agent,
            PhaseResponse {
                content,
                target_node_id,
                choice,
            },
        );
    }
    responses
}

#[allow(clippy::too_many_arguments)]
async fn log_node(
    deps: &TeamDeps,
    team_id: &str,
    node_type: NodeType,
    title: &str,
    description: &str,
    agent: &str,
    debate_id: &str,
    round: u32,
) -> Option<String> {
    let node = DecisionNode {
        id: format!("dn_{}", Uuid::new_v4().simple()),
        node_type,
        title: title.to_string(),
        description: description.to_string(),
        confidence: 50,
        status: "active".to_string(),
        session_id: None,
        agent_name: Some(agent.to_string()),
        metadata: Some(serde_json::json!({
            "team_id": team_id,
            "debate_id": debate_id,
            "round": round,
        })),
    };
    match deps.store.insert_decision_node(&node).await {
        Ok(()) => Some(node.id),
        Err(err) => {
            tracing::warn!(error = %err, "debate node insert failed");
            None
        }
    }
}
