use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use weft_types::{now_ms, topics, PairEventKind, PairPosition, TeamEvent};

use crate::error::TeamsError;
use crate::TeamDeps;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRecord {
    pub coder: String,
    pub reviewer: String,
    pub started_at: u64,
    #[serde(default)]
    pub opts: Value,
}

/// Start a coder/reviewer pairing session: both agents are told their seat,
/// the team hears about the session, and events flow on a dedicated topic.
pub async fn start_pair(
    deps: &TeamDeps,
    team_id: &str,
    coder: &str,
    reviewer: &str,
    opts: Value,
) -> Result<String, TeamsError> {
    if coder == reviewer {
        return Err(TeamsError::SameAgent(coder.to_string()));
    }
    let pair_id = format!("pair_{}", Uuid::new_v4().simple());
    let record = PairRecord {
        coder: coder.to_string(),
        reviewer: reviewer.to_string(),
        started_at: now_ms(),
        opts,
    };
    deps.context
        .set_pair(
            team_id,
            &pair_id,
            serde_json::to_value(&record).unwrap_or(Value::Null),
        )
        .await?;

    deps.fabric.send_to(
        team_id,
        coder,
        &TeamEvent::PairStarted {
            pair_id: pair_id.clone(),
            position: PairPosition::Coder,
            peer: reviewer.to_string(),
        },
    );
    deps.fabric.send_to(
        team_id,
        reviewer,
        &TeamEvent::PairStarted {
            pair_id: pair_id.clone(),
            position: PairPosition::Reviewer,
            peer: coder.to_string(),
        },
    );
    deps.fabric.broadcast(
        &topics::team(team_id),
        &TeamEvent::PairSessionStarted {
            pair_id: pair_id.clone(),
            coder: coder.to_string(),
            reviewer: reviewer.to_string(),
        },
    );
    Ok(pair_id)
}

pub async fn broadcast_pair_event(
    deps: &TeamDeps,
    team_id: &str,
    pair_id: &str,
    event: PairEventKind,
    from: &str,
    payload: Value,
) -> Result<(), TeamsError> {
    if deps.context.get_pair(team_id, pair_id).await.is_none() {
        return Err(TeamsError::PairNotFound(pair_id.to_string()));
    }
    deps.fabric.broadcast(
        &topics::pair(team_id, pair_id),
        &TeamEvent::PairEvent {
            pair_id: pair_id.to_string(),
            event,
            from: from.to_string(),
            payload,
            ts: now_ms(),
        },
    );
    Ok(())
}

pub async fn stop_pair(deps: &TeamDeps, team_id: &str, pair_id: &str) -> Result<(), TeamsError> {
    deps.context.remove_pair(team_id, pair_id).await?;
    let event = TeamEvent::PairSessionStopped {
        pair_id: pair_id.to_string(),
    };
    deps.fabric.broadcast(&topics::pair(team_id, pair_id), &event);
    deps.fabric.broadcast(&topics::team(team_id), &event);
    Ok(())
}
