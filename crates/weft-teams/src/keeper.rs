use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::Level;
use uuid::Uuid;

use weft_observability::{emit_event, ProcessKind, TelemetryEvent};
use weft_providers::{CallOptions, ModelClient};
use weft_store::Store;
use weft_types::{estimate_total_tokens, ChatMessage, KeeperRecord, KeeperStatus};

/// Keyword retrieval returns everything below this size.
const RETRIEVE_ALL_THRESHOLD: u64 = 10_000;
const RETRIEVE_TOP_K: usize = 10;

/// How a retrieval query should be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Question-shaped; worth a summarization pass.
    Question,
    /// Plain keyword lookup.
    Keyword,
}

/// Question-word prefix or a trailing `?`.
pub fn detect_mode(query: &str) -> RetrievalMode {
    let trimmed = query.trim();
    if trimmed.ends_with('?') {
        return RetrievalMode::Question;
    }
    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    const QUESTION_WORDS: &[&str] = &[
        "what", "when", "where", "who", "why", "how", "which", "is", "are", "can", "could",
        "should", "does", "do",
    ];
    if QUESTION_WORDS.contains(&first.as_str()) {
        RetrievalMode::Question
    } else {
        RetrievalMode::Keyword
    }
}

pub enum KeeperCommand {
    Store {
        messages: Vec<ChatMessage>,
        metadata: Option<Value>,
        reply: oneshot::Sender<u64>,
    },
    RetrieveAll {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    Retrieve {
        query: String,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    SmartRetrieve {
        query: String,
        reply: oneshot::Sender<String>,
    },
    GetState {
        reply: oneshot::Sender<KeeperRecord>,
    },
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Cheap clonable handle onto a keeper worker.
#[derive(Clone)]
pub struct KeeperHandle {
    pub id: String,
    pub team_id: String,
    pub topic: String,
    pub source_agent: String,
    tx: mpsc::UnboundedSender<KeeperCommand>,
}

impl KeeperHandle {
    pub async fn store(
        &self,
        messages: Vec<ChatMessage>,
        metadata: Option<Value>,
    ) -> anyhow::Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(KeeperCommand::Store {
            messages,
            metadata,
            reply,
        })?;
        Ok(rx.await?)
    }

    pub async fn retrieve_all(&self) -> anyhow::Result<Vec<ChatMessage>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(KeeperCommand::RetrieveAll { reply })?;
        Ok(rx.await?)
    }

    pub async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(KeeperCommand::Retrieve {
            query: query.to_string(),
            reply,
        })?;
        Ok(rx.await?)
    }

    pub async fn smart_retrieve(&self, query: &str) -> anyhow::Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(KeeperCommand::SmartRetrieve {
            query: query.to_string(),
            reply,
        })?;
        Ok(rx.await?)
    }

    pub async fn get_state(&self) -> anyhow::Result<KeeperRecord> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(KeeperCommand::GetState { reply })?;
        Ok(rx.await?)
    }

    pub async fn index_entry(&self) -> anyhow::Result<String> {
        Ok(self.get_state().await?.index_entry())
    }

    /// Graceful stop: flushes dirty state before the worker exits.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(KeeperCommand::Stop { reply: Some(reply) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Directory of live keepers per team.
#[derive(Clone, Default)]
pub struct KeeperRegistry {
    keepers: Arc<RwLock<HashMap<String, Vec<KeeperHandle>>>>,
}

impl KeeperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, handle: KeeperHandle) {
        self.keepers
            .write()
            .await
            .entry(handle.team_id.clone())
            .or_default()
            .push(handle);
    }

    /// Swap the entry with the same id, or add it. Used when a panicked
    /// keeper is respawned with a fresh mailbox.
    pub async fn replace(&self, handle: KeeperHandle) {
        let mut keepers = self.keepers.write().await;
        let list = keepers.entry(handle.team_id.clone()).or_default();
        match list.iter_mut().find(|k| k.id == handle.id) {
            Some(slot) => *slot = handle,
            None => list.push(handle),
        }
    }

    pub async fn contains(&self, team_id: &str, keeper_id: &str) -> bool {
        self.keepers
            .read()
            .await
            .get(team_id)
            .map(|list| list.iter().any(|k| k.id == keeper_id))
            .unwrap_or(false)
    }

    pub async fn list(&self, team_id: &str) -> Vec<KeeperHandle> {
        self.keepers
            .read()
            .await
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn index_entries(&self, team_id: &str) -> Vec<String> {
        let mut entries = Vec::new();
        for handle in self.list(team_id).await {
            if let Ok(entry) = handle.index_entry().await {
                entries.push(entry);
            }
        }
        entries
    }

    /// Stop and forget every keeper of a team; each flushes before exit.
    pub async fn stop_team(&self, team_id: &str) {
        let handles = self.keepers.write().await.remove(team_id);
        for handle in handles.unwrap_or_default() {
            handle.stop().await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeeperOptions {
    pub id: Option<String>,
    pub topic: String,
    pub source_agent: String,
    pub messages: Vec<ChatMessage>,
    pub metadata: Value,
    pub persist_debounce_ms: u64,
}

impl Default for KeeperOptions {
    fn default() -> Self {
        Self {
            id: None,
            topic: String::new(),
            source_agent: String::new(),
            messages: Vec::new(),
            metadata: Value::Null,
            persist_debounce_ms: 0,
        }
    }
}

struct KeeperWorker {
    record: KeeperRecord,
    store: Arc<dyn Store>,
    model_client: Arc<dyn ModelClient>,
    summary_model: String,
    debounce: Duration,
    dirty: bool,
}

/// Start a keeper worker. If the store already has a row for the id, the
/// persisted state wins over `opts` — a restarted keeper picks up exactly
/// where the previous incarnation flushed.
pub async fn start_keeper(
    store: Arc<dyn Store>,
    model_client: Arc<dyn ModelClient>,
    summary_model: String,
    team_id: &str,
    opts: KeeperOptions,
) -> anyhow::Result<KeeperHandle> {
    let (handle, _join) = spawn_keeper_worker(store, model_client, summary_model, team_id, opts)
        .await?;
    Ok(handle)
}

/// As [`start_keeper`], but hands back the worker's join handle so the
/// manager can apply transient-restart supervision.
pub(crate) async fn spawn_keeper_worker(
    store: Arc<dyn Store>,
    model_client: Arc<dyn ModelClient>,
    summary_model: String,
    team_id: &str,
    opts: KeeperOptions,
) -> anyhow::Result<(KeeperHandle, tokio::task::JoinHandle<()>)> {
    let id = opts
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (record, restored) = match store.fetch_keeper(&id).await? {
        Some(existing) => (existing, true),
        None => {
            let token_count = estimate_total_tokens(&opts.messages);
            let record = KeeperRecord {
                id: id.clone(),
                team_id: team_id.to_string(),
                topic: opts.topic.clone(),
                source_agent: opts.source_agent.clone(),
                messages: opts.messages.clone(),
                token_count,
                metadata: opts.metadata.clone(),
                status: KeeperStatus::Active,
                created_at: Utc::now(),
            };
            (record, false)
        }
    };

    let handle_meta = (
        record.id.clone(),
        record.team_id.clone(),
        record.topic.clone(),
        record.source_agent.clone(),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let worker = KeeperWorker {
        record,
        store,
        model_client,
        summary_model,
        debounce: Duration::from_millis(opts.persist_debounce_ms),
        // a brand-new keeper has state the store has never seen
        dirty: !restored,
    };
    let join = tokio::spawn(worker.run(rx));

    let (id, team_id, topic, source_agent) = handle_meta;
    Ok((
        KeeperHandle {
            id,
            team_id,
            topic,
            source_agent,
            tx,
        },
        join,
    ))
}

impl KeeperWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<KeeperCommand>) {
        // deadline of the coalesced pending flush, if one is scheduled
        let mut flush_at: Option<Instant> = None;
        loop {
            let deadline = flush_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        None => break,
                        Some(KeeperCommand::Stop { reply }) => {
                            if self.dirty {
                                self.flush().await;
                            }
                            if let Some(reply) = reply {
                                let _ = reply.send(());
                            }
                            return;
                        }
                        Some(cmd) => self.handle(cmd, &mut flush_at).await,
                    }
                }
                _ = tokio::time::sleep_until(deadline), if flush_at.is_some() => {
                    flush_at = None;
                    self.flush().await;
                }
            }
        }
        // channel closed without an explicit stop; still flush if dirty
        if self.dirty {
            self.flush().await;
        }
    }

    async fn handle(&mut self, cmd: KeeperCommand, flush_at: &mut Option<Instant>) {
        match cmd {
            KeeperCommand::Store {
                messages,
                metadata,
                reply,
            } => {
                self.record.messages.extend(messages);
                if let Some(metadata) = metadata {
                    merge_metadata(&mut self.record.metadata, metadata);
                }
                self.record.token_count = estimate_total_tokens(&self.record.messages);
                self.dirty = true;
                if self.debounce.is_zero() {
                    *flush_at = None;
                    self.flush().await;
                } else if flush_at.is_none() {
                    // coalesce: one flush per debounce window
                    *flush_at = Some(Instant::now() + self.debounce);
                }
                let _ = reply.send(self.record.token_count);
            }
            KeeperCommand::RetrieveAll { reply } => {
                let _ = reply.send(self.record.messages.clone());
            }
            KeeperCommand::Retrieve { query, reply } => {
                let _ = reply.send(self.keyword_retrieve(&query));
            }
            KeeperCommand::SmartRetrieve { query, reply } => {
                let _ = reply.send(self.smart_retrieve(&query).await);
            }
            KeeperCommand::GetState { reply } => {
                let _ = reply.send(self.record.clone());
            }
            KeeperCommand::Stop { .. } => unreachable!("handled by run loop"),
        }
    }

    fn keyword_retrieve(&self, query: &str) -> Vec<ChatMessage> {
        if self.record.token_count <= RETRIEVE_ALL_THRESHOLD {
            return self.record.messages.clone();
        }
        let query_words = word_set(query);
        let mut scored = self
            .record
            .messages
            .iter()
            .filter_map(|message| {
                let score = word_set(&message.content)
                    .intersection(&query_words)
                    .count();
                (score > 0).then(|| (score, message.clone()))
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(RETRIEVE_TOP_K)
            .map(|(_, message)| message)
            .collect()
    }

    /// Read-only: attempts an LLM summary for question-shaped queries and
    /// falls back to formatted keyword retrieval on any failure.
    async fn smart_retrieve(&self, query: &str) -> String {
        if detect_mode(query) == RetrievalMode::Question {
            match self.summarize(query).await {
                Ok(summary) if !summary.trim().is_empty() => return summary,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(keeper = %self.record.id, error = %err, "summarization failed; falling back to keywords");
                }
            }
        }
        format_messages(&self.keyword_retrieve(query))
    }

    async fn summarize(&self, query: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "Here are offloaded messages about {}:\n\n{}\n\nAnswer: {}",
            self.record.topic,
            format_messages(&self.keyword_retrieve(query)),
            query
        );
        let response = self
            .model_client
            .call(
                &self.summary_model,
                &[ChatMessage::user(prompt)],
                &[],
                &CallOptions::default(),
            )
            .await?;
        match response {
            weft_providers::ModelResponse::Final { text, .. } => Ok(text),
            weft_providers::ModelResponse::ToolCalls { .. } => {
                anyhow::bail!("summarizer returned tool calls")
            }
        }
    }

    async fn flush(&mut self) {
        match self.store.upsert_keeper(&self.record).await {
            Ok(()) => {
                self.dirty = false;
                emit_event(
                    Level::INFO,
                    ProcessKind::Teams,
                    TelemetryEvent {
                        team_id: Some(&self.record.team_id),
                        status: Some("ok"),
                        ..TelemetryEvent::new("keeper.persist", "teams.keeper")
                    },
                );
            }
            Err(err) => {
                tracing::warn!(keeper = %self.record.id, error = %err, "keeper persist failed");
            }
        }
    }
}

fn merge_metadata(base: &mut Value, overlay: Value) {
    match (base.as_object_mut(), overlay) {
        (Some(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                base_map.insert(key, value);
            }
        }
        (_, overlay) => *base = overlay,
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Word overlap between two texts; used for keeper relevance ranking.
pub fn topic_overlap(a: &str, b: &str) -> usize {
    word_set(a).intersection(&word_set(b)).count()
}

fn format_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
