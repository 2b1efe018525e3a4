use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use weft_types::{now_ms, topics, Query, TeamEvent, DEFAULT_MAX_HOPS};

use crate::error::TeamsError;
use crate::keeper::topic_overlap;
use crate::TeamDeps;

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub target: Option<String>,
    pub max_hops: Option<u32>,
}

/// Routes `ask → (forward)* → answer` traces between agents, enriching
/// questions with keeper context on the way in. Queries live until
/// [`QueryRouter::expire_stale`] reaps them.
pub struct QueryRouter {
    deps: TeamDeps,
    queries: Mutex<HashMap<String, Query>>,
}

impl QueryRouter {
    pub fn new(deps: TeamDeps) -> Self {
        Self {
            deps,
            queries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn ask(
        &self,
        team_id: &str,
        from: &str,
        question: &str,
        opts: AskOptions,
    ) -> Result<Query, TeamsError> {
        let enrichments = self.gather_enrichments(team_id, question).await;
        let query = Query {
            query_id: format!("q_{}", Uuid::new_v4().simple()),
            team_id: team_id.to_string(),
            origin: from.to_string(),
            question: question.to_string(),
            target: opts.target.clone(),
            hops: Vec::new(),
            enrichments: enrichments.clone(),
            answer: None,
            created_at: now_ms(),
            max_hops: opts.max_hops.unwrap_or(DEFAULT_MAX_HOPS),
        };
        self.queries
            .lock()
            .await
            .insert(query.query_id.clone(), query.clone());

        let event = TeamEvent::Query {
            query_id: query.query_id.clone(),
            from: from.to_string(),
            question: question.to_string(),
            enrichments,
        };
        match &opts.target {
            Some(target) => {
                self.deps.fabric.send_to(team_id, target, &event);
            }
            None => {
                self.deps.fabric.broadcast(&topics::team(team_id), &event);
            }
        }
        Ok(query)
    }

    /// Pass a query along to another agent, carrying any context the
    /// forwarder adds. The hop is only recorded when it fits the limit.
    pub async fn forward(
        &self,
        query_id: &str,
        from: &str,
        target: &str,
        enrichment: &str,
    ) -> Result<(), TeamsError> {
        let mut queries = self.queries.lock().await;
        let query = queries
            .get_mut(query_id)
            .ok_or_else(|| TeamsError::QueryNotFound(query_id.to_string()))?;

        if query.hops.len() as u32 + 1 > query.max_hops {
            return Err(TeamsError::MaxHopsReached {
                query_id: query_id.to_string(),
                max_hops: query.max_hops,
            });
        }
        query.hops.push(from.to_string());
        if !enrichment.trim().is_empty() {
            query.enrichments.push(enrichment.to_string());
        }

        let event = TeamEvent::Query {
            query_id: query.query_id.clone(),
            from: from.to_string(),
            question: query.question.clone(),
            enrichments: query.enrichments.clone(),
        };
        let team_id = query.team_id.clone();
        drop(queries);

        self.deps.fabric.send_to(&team_id, target, &event);
        Ok(())
    }

    /// Deliver an answer back to the originating agent's direct topic.
    pub async fn answer(
        &self,
        query_id: &str,
        from: &str,
        answer: &str,
    ) -> Result<(), TeamsError> {
        let mut queries = self.queries.lock().await;
        let query = queries
            .get_mut(query_id)
            .ok_or_else(|| TeamsError::QueryNotFound(query_id.to_string()))?;
        query.answer = Some(answer.to_string());
        query.hops.push(from.to_string());

        let event = TeamEvent::QueryAnswer {
            query_id: query.query_id.clone(),
            from: from.to_string(),
            answer: answer.to_string(),
            enrichments: query.enrichments.clone(),
        };
        let team_id = query.team_id.clone();
        let origin = query.origin.clone();
        drop(queries);

        self.deps.fabric.send_to(&team_id, &origin, &event);
        Ok(())
    }

    pub async fn get_query(&self, query_id: &str) -> Option<Query> {
        self.queries.lock().await.get(query_id).cloned()
    }

    /// Reap queries older than `ttl_ms`; returns how many were removed.
    pub async fn expire_stale(&self, ttl_ms: u64) -> usize {
        let now = now_ms();
        let mut queries = self.queries.lock().await;
        let before = queries.len();
        queries.retain(|_, query| now.saturating_sub(query.created_at) < ttl_ms);
        before - queries.len()
    }

    /// Best keeper answer for the question, prefixed for the receiving
    /// agent. Keeper failures never block routing.
    async fn gather_enrichments(&self, team_id: &str, question: &str) -> Vec<String> {
        let keepers = self.deps.keepers.list(team_id).await;
        let best = keepers
            .iter()
            .map(|k| (topic_overlap(&k.topic, question), k))
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score);
        let Some((_, keeper)) = best else {
            return Vec::new();
        };
        match keeper.smart_retrieve(question).await {
            Ok(context) if !context.trim().is_empty() => {
                vec![format!("[Context Keeper]: {context}")]
            }
            Ok(_) => Vec::new(),
            Err(err) => {
                tracing::debug!(error = %err, "keeper enrichment failed; routing without it");
                Vec::new()
            }
        }
    }
}
