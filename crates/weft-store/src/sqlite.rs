use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use weft_types::{
    AgentMetric, ChatMessage, DecisionEdge, DecisionNode, KeeperRecord, KeeperStatus, NodeFilter,
    NodeType, TaskCostSummary, TaskDependency, TaskStatus, TeamTask,
};

use crate::error::{StoreError, StoreResult};
use crate::port::Store;

/// SQLite-backed Persistence Port. One connection behind an async mutex;
/// WAL mode so readers in other processes are not starved.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn).await
    }

    /// In-memory database; used by tests and ephemeral teams.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(10))?;
        // PRAGMA journal_mode returns a row, so query_row and ignore it.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keepers (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                source_agent TEXT NOT NULL,
                messages TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_keepers_team ON keepers(team_id);

            CREATE TABLE IF NOT EXISTS team_tasks (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                owner TEXT,
                priority INTEGER NOT NULL DEFAULT 3,
                model_hint TEXT,
                role TEXT,
                task_type TEXT,
                result TEXT,
                cost_usd REAL NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                inserted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_team_tasks_team ON team_tasks(team_id);
            CREATE INDEX IF NOT EXISTS idx_team_tasks_owner ON team_tasks(team_id, owner);

            CREATE TABLE IF NOT EXISTS team_task_deps (
                task_id TEXT NOT NULL,
                depends_on_id TEXT NOT NULL,
                dep_type TEXT NOT NULL DEFAULT 'blocks',
                PRIMARY KEY (task_id, depends_on_id)
            );

            CREATE TABLE IF NOT EXISTS decision_nodes (
                id TEXT PRIMARY KEY,
                node_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                confidence INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                session_id TEXT,
                agent_name TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decision_edges (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                rationale TEXT,
                weight REAL,
                PRIMARY KEY (from_id, to_id, edge_type)
            );

            CREATE TABLE IF NOT EXISTS agent_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id TEXT NOT NULL,
                agent_name TEXT,
                task_id TEXT NOT NULL,
                success INTEGER NOT NULL,
                cost_usd REAL NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                model TEXT,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

fn parse_datetime(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::InvalidData(format!("bad timestamp `{raw}`: {err}")))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<(TeamTask, String, String, String)> {
    let status: String = row.get("status")?;
    let inserted_at: String = row.get("inserted_at")?;
    let updated_at: String = row.get("updated_at")?;
    let task = TeamTask {
        id: row.get("id")?,
        team_id: row.get("team_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::Pending,
        owner: row.get("owner")?,
        priority: row.get("priority")?,
        model_hint: row.get("model_hint")?,
        role: row.get("role")?,
        task_type: row.get("task_type")?,
        result: row.get("result")?,
        cost_usd: row.get("cost_usd")?,
        tokens_used: row.get::<_, i64>("tokens_used")?.max(0) as u64,
        inserted_at: Utc::now(),
        updated_at: Utc::now(),
    };
    Ok((task, status, inserted_at, updated_at))
}

fn finish_task(parts: (TeamTask, String, String, String)) -> StoreResult<TeamTask> {
    let (mut task, status, inserted_at, updated_at) = parts;
    task.status = TaskStatus::parse(&status)
        .ok_or_else(|| StoreError::InvalidData(format!("bad task status `{status}`")))?;
    task.inserted_at = parse_datetime(&inserted_at)?;
    task.updated_at = parse_datetime(&updated_at)?;
    Ok(task)
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<(DecisionNode, String, Option<String>)> {
    let node_type: String = row.get("node_type")?;
    let metadata: Option<String> = row.get("metadata")?;
    let node = DecisionNode {
        id: row.get("id")?,
        node_type: NodeType::Goal,
        title: row.get("title")?,
        description: row.get("description")?,
        confidence: row.get::<_, i64>("confidence")?.clamp(0, 100) as u8,
        status: row.get("status")?,
        session_id: row.get("session_id")?,
        agent_name: row.get("agent_name")?,
        metadata: None,
    };
    Ok((node, node_type, metadata))
}

fn finish_node(parts: (DecisionNode, String, Option<String>)) -> StoreResult<DecisionNode> {
    let (mut node, node_type, metadata) = parts;
    node.node_type = NodeType::parse(&node_type)
        .ok_or_else(|| StoreError::InvalidData(format!("bad node type `{node_type}`")))?;
    node.metadata = match metadata {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(node)
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_keeper(&self, record: &KeeperRecord) -> StoreResult<()> {
        let messages = serde_json::to_string(&record.messages)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO keepers (id, team_id, topic, source_agent, messages, token_count, metadata, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                topic = excluded.topic,
                source_agent = excluded.source_agent,
                messages = excluded.messages,
                token_count = excluded.token_count,
                metadata = excluded.metadata,
                status = excluded.status",
            params![
                record.id,
                record.team_id,
                record.topic,
                record.source_agent,
                messages,
                record.token_count as i64,
                metadata,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn fetch_keeper(&self, id: &str) -> StoreResult<Option<KeeperRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, team_id, topic, source_agent, messages, token_count, metadata, status, created_at
                 FROM keepers WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let Some((id, team_id, topic, source_agent, messages, token_count, metadata, status, created_at)) = row
        else {
            return Ok(None);
        };
        let messages: Vec<ChatMessage> = serde_json::from_str(&messages)?;
        let metadata = match metadata {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Null,
        };
        let status = KeeperStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidData(format!("bad keeper status `{status}`")))?;
        Ok(Some(KeeperRecord {
            id,
            team_id,
            topic,
            source_agent,
            messages,
            token_count: token_count.max(0) as u64,
            metadata,
            status,
            created_at: parse_datetime(&created_at)?,
        }))
    }

    async fn insert_task(&self, task: &TeamTask) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO team_tasks (id, team_id, title, description, status, owner, priority,
                                     model_hint, role, task_type, result, cost_usd, tokens_used,
                                     inserted_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                task.id,
                task.team_id,
                task.title,
                task.description,
                task.status.as_str(),
                task.owner,
                task.priority,
                task.model_hint,
                task.role,
                task.task_type,
                task.result,
                task.cost_usd,
                task.tokens_used as i64,
                task.inserted_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_task(&self, task: &TeamTask) -> StoreResult<TeamTask> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE team_tasks SET
                title = ?2, description = ?3, status = ?4, owner = ?5, priority = ?6,
                model_hint = ?7, role = ?8, task_type = ?9, result = ?10,
                cost_usd = ?11, tokens_used = ?12, updated_at = ?13
             WHERE id = ?1",
            params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.owner,
                task.priority,
                task.model_hint,
                task.role,
                task.task_type,
                task.result,
                task.cost_usd,
                task.tokens_used as i64,
                task.updated_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }
        Ok(task.clone())
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<TeamTask>> {
        let conn = self.conn.lock().await;
        let parts = conn
            .query_row(
                "SELECT * FROM team_tasks WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?;
        drop(conn);
        parts.map(finish_task).transpose()
    }

    async fn list_tasks_by_team(&self, team_id: &str) -> StoreResult<Vec<TeamTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM team_tasks WHERE team_id = ?1 ORDER BY priority ASC, inserted_at ASC",
        )?;
        let rows = stmt
            .query_map(params![team_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        rows.into_iter().map(finish_task).collect()
    }

    async fn list_tasks_by_agent(&self, team_id: &str, agent: &str) -> StoreResult<Vec<TeamTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM team_tasks WHERE team_id = ?1 AND owner = ?2
             ORDER BY priority ASC, inserted_at ASC",
        )?;
        let rows = stmt
            .query_map(params![team_id, agent], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        rows.into_iter().map(finish_task).collect()
    }

    async fn insert_task_dep(&self, dep: &TaskDependency) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO team_task_deps (task_id, depends_on_id, dep_type)
             VALUES (?1, ?2, ?3)",
            params![dep.task_id, dep.depends_on_id, dep.dep_type.as_str()],
        )?;
        Ok(())
    }

    async fn list_task_deps(&self, team_id: &str) -> StoreResult<Vec<TaskDependency>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT d.task_id, d.depends_on_id, d.dep_type
             FROM team_task_deps d
             JOIN team_tasks t ON t.id = d.task_id
             WHERE t.team_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![team_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        rows.into_iter()
            .map(|(task_id, depends_on_id, dep_type)| {
                let dep_type = weft_types::DepType::parse(&dep_type).ok_or_else(|| {
                    StoreError::InvalidData(format!("bad dep type `{dep_type}`"))
                })?;
                Ok(TaskDependency {
                    task_id,
                    depends_on_id,
                    dep_type,
                })
            })
            .collect()
    }

    async fn sum_task_cost_by_team(&self, team_id: &str) -> StoreResult<TaskCostSummary> {
        let conn = self.conn.lock().await;
        let summary = conn.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0), COALESCE(SUM(tokens_used), 0), COUNT(*)
             FROM team_tasks WHERE team_id = ?1 AND status = 'completed'",
            params![team_id],
            |row| {
                Ok(TaskCostSummary {
                    total_cost_usd: row.get(0)?,
                    total_tokens: row.get::<_, i64>(1)?.max(0) as u64,
                    task_count: row.get::<_, i64>(2)?.max(0) as u64,
                })
            },
        )?;
        Ok(summary)
    }

    async fn insert_decision_node(&self, node: &DecisionNode) -> StoreResult<()> {
        let metadata = node
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO decision_nodes (id, node_type, title, description, confidence, status,
                                         session_id, agent_name, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                node.id,
                node.node_type.as_str(),
                node.title,
                node.description,
                node.confidence as i64,
                node.status,
                node.session_id,
                node.agent_name,
                metadata,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn insert_decision_edge(&self, edge: &DecisionEdge) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO decision_edges (from_id, to_id, edge_type, rationale, weight)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                edge.from,
                edge.to,
                edge.edge_type.as_str(),
                edge.rationale,
                edge.weight,
            ],
        )?;
        Ok(())
    }

    async fn list_decision_nodes(&self, filter: &NodeFilter) -> StoreResult<Vec<DecisionNode>> {
        let mut sql = String::from(
            "SELECT id, node_type, title, description, confidence, status, session_id, agent_name, metadata
             FROM decision_nodes WHERE 1=1",
        );
        if filter.node_type.is_some() {
            sql.push_str(" AND node_type = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if filter.agent_name.is_some() {
            sql.push_str(" AND agent_name = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let conn = self.conn.lock().await;
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(node_type) = filter.node_type {
            args.push(Box::new(node_type.as_str().to_string()));
        }
        if let Some(status) = &filter.status {
            args.push(Box::new(status.clone()));
        }
        if let Some(session_id) = &filter.session_id {
            args.push(Box::new(session_id.clone()));
        }
        if let Some(agent_name) = &filter.agent_name {
            args.push(Box::new(agent_name.clone()));
        }
        if let Some(limit) = filter.limit {
            args.push(Box::new(limit as i64));
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), node_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        rows.into_iter().map(finish_node).collect()
    }

    async fn update_decision_node(&self, node: &DecisionNode) -> StoreResult<DecisionNode> {
        let metadata = node
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE decision_nodes SET
                node_type = ?2, title = ?3, description = ?4, confidence = ?5,
                status = ?6, session_id = ?7, agent_name = ?8, metadata = ?9
             WHERE id = ?1",
            params![
                node.id,
                node.node_type.as_str(),
                node.title,
                node.description,
                node.confidence as i64,
                node.status,
                node.session_id,
                node.agent_name,
                metadata,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("decision node {}", node.id)));
        }
        Ok(node.clone())
    }

    async fn insert_agent_metric(&self, metric: &AgentMetric) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agent_metrics (team_id, agent_name, task_id, success, cost_usd,
                                        tokens_used, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                metric.team_id,
                metric.agent_name,
                metric.task_id,
                metric.success as i64,
                metric.cost_usd,
                metric.tokens_used as i64,
                metric.model,
                metric.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{DepType, EdgeType};

    fn sample_task(id: &str, team: &str) -> TeamTask {
        TeamTask {
            id: id.to_string(),
            team_id: team.to_string(),
            title: format!("task {id}"),
            description: "".to_string(),
            status: TaskStatus::Pending,
            owner: None,
            priority: 3,
            model_hint: None,
            role: None,
            task_type: None,
            result: None,
            cost_usd: 0.0,
            tokens_used: 0,
            inserted_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn keeper_upsert_and_fetch_round_trip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let record = KeeperRecord {
            id: "k1".to_string(),
            team_id: "t1".to_string(),
            topic: "auth".to_string(),
            source_agent: "researcher".to_string(),
            messages: vec![ChatMessage::user("survive")],
            token_count: 6,
            metadata: serde_json::json!({"type": "keeper"}),
            status: KeeperStatus::Active,
            created_at: Utc::now(),
        };
        store.upsert_keeper(&record).await.unwrap();

        let fetched = store.fetch_keeper("k1").await.unwrap().unwrap();
        assert_eq!(fetched.messages, record.messages);
        assert_eq!(fetched.topic, "auth");
        assert_eq!(fetched.status, KeeperStatus::Active);

        // upsert replaces in place
        let mut updated = record.clone();
        updated.messages.push(ChatMessage::assistant("more"));
        store.upsert_keeper(&updated).await.unwrap();
        let fetched = store.fetch_keeper("k1").await.unwrap().unwrap();
        assert_eq!(fetched.messages.len(), 2);
    }

    #[tokio::test]
    async fn missing_keeper_is_none() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.fetch_keeper("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn task_crud_and_not_found_update() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut task = sample_task("t1", "team-a");
        store.insert_task(&task).await.unwrap();

        task.status = TaskStatus::Completed;
        task.result = Some("done".to_string());
        store.update_task(&task).await.unwrap();

        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.result.as_deref(), Some("done"));

        let ghost = sample_task("ghost", "team-a");
        assert!(matches!(
            store.update_task(&ghost).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tasks_list_in_priority_then_insertion_order() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut urgent = sample_task("b", "team-a");
        urgent.priority = 1;
        let normal = sample_task("a", "team-a");
        store.insert_task(&normal).await.unwrap();
        store.insert_task(&urgent).await.unwrap();

        let tasks = store.list_tasks_by_team("team-a").await.unwrap();
        assert_eq!(tasks[0].id, "b");
        assert_eq!(tasks[1].id, "a");
    }

    #[tokio::test]
    async fn deps_join_through_owning_team() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert_task(&sample_task("t1", "team-a")).await.unwrap();
        store.insert_task(&sample_task("t2", "team-a")).await.unwrap();
        store
            .insert_task_dep(&TaskDependency {
                task_id: "t2".to_string(),
                depends_on_id: "t1".to_string(),
                dep_type: DepType::Blocks,
            })
            .await
            .unwrap();

        let deps = store.list_task_deps("team-a").await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].dep_type, DepType::Blocks);
        assert!(store.list_task_deps("team-b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cost_summary_counts_completed_only() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut done = sample_task("t1", "team-a");
        done.status = TaskStatus::Completed;
        done.cost_usd = 0.25;
        done.tokens_used = 1_000;
        store.insert_task(&done).await.unwrap();
        store.insert_task(&sample_task("t2", "team-a")).await.unwrap();

        let summary = store.sum_task_cost_by_team("team-a").await.unwrap();
        assert_eq!(summary.task_count, 1);
        assert_eq!(summary.total_tokens, 1_000);
        assert!((summary.total_cost_usd - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn decision_nodes_filter_by_type_and_status() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let goal = DecisionNode {
            id: "n1".to_string(),
            node_type: NodeType::Goal,
            title: "ship v1".to_string(),
            description: "".to_string(),
            confidence: 80,
            status: "active".to_string(),
            session_id: None,
            agent_name: Some("lead".to_string()),
            metadata: None,
        };
        let option = DecisionNode {
            id: "n2".to_string(),
            node_type: NodeType::Option,
            title: "use sqlite".to_string(),
            description: "".to_string(),
            confidence: 60,
            status: "active".to_string(),
            session_id: None,
            agent_name: None,
            metadata: Some(serde_json::json!({"debate_id": "d1"})),
        };
        store.insert_decision_node(&goal).await.unwrap();
        store.insert_decision_node(&option).await.unwrap();
        store
            .insert_decision_edge(&DecisionEdge {
                from: "n2".to_string(),
                to: "n1".to_string(),
                edge_type: EdgeType::Supports,
                rationale: None,
                weight: None,
            })
            .await
            .unwrap();

        let goals = store
            .list_decision_nodes(&NodeFilter {
                node_type: Some(NodeType::Goal),
                status: Some("active".to_string()),
                ..NodeFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].id, "n1");

        let mut revised = goal.clone();
        revised.status = "superseded".to_string();
        store.update_decision_node(&revised).await.unwrap();
        let active_goals = store
            .list_decision_nodes(&NodeFilter {
                node_type: Some(NodeType::Goal),
                status: Some("active".to_string()),
                ..NodeFilter::default()
            })
            .await
            .unwrap();
        assert!(active_goals.is_empty());
    }

    #[tokio::test]
    async fn metrics_insert_does_not_fail() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .insert_agent_metric(&AgentMetric {
                team_id: "team-a".to_string(),
                agent_name: Some("coder".to_string()),
                task_id: "t1".to_string(),
                success: true,
                cost_usd: 0.02,
                tokens_used: 150,
                model: Some("zai:glm-5".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn keeper_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .upsert_keeper(&KeeperRecord {
                    id: "k1".to_string(),
                    team_id: "t1".to_string(),
                    topic: "auth".to_string(),
                    source_agent: "researcher".to_string(),
                    messages: vec![ChatMessage::user("survive")],
                    token_count: 6,
                    metadata: serde_json::Value::Null,
                    status: KeeperStatus::Active,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        let fetched = store.fetch_keeper("k1").await.unwrap().unwrap();
        assert_eq!(fetched.messages[0].content, "survive");
    }
}
