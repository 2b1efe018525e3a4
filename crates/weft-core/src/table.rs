use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// Typed key into a team's shared table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Agent(String),
    Discovery(u64),
    Claim { path: String, agent: String },
    Task(String),
    Meta,
    Pair(String),
    SubTeam(String),
}

/// One team's concurrent map. Values are opaque JSON; the structured view
/// lives in [`crate::context::SharedContext`].
pub struct TeamTable {
    entries: RwLock<HashMap<TableKey, Value>>,
    discovery_seq: AtomicU64,
}

impl TeamTable {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            discovery_seq: AtomicU64::new(0),
        }
    }

    pub async fn insert(&self, key: TableKey, value: Value) {
        self.entries.write().await.insert(key, value);
    }

    pub async fn get(&self, key: &TableKey) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &TableKey) -> Option<Value> {
        self.entries.write().await.remove(key)
    }

    pub async fn next_discovery_seq(&self) -> u64 {
        self.discovery_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Snapshot of every entry matching the predicate.
    pub async fn select<F>(&self, mut pred: F) -> Vec<(TableKey, Value)>
    where
        F: FnMut(&TableKey) -> bool,
    {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Atomically insert `value` under `key` unless `conflict` finds a
    /// matching existing entry; returns the conflicting pair if so.
    pub async fn insert_unless<F>(
        &self,
        key: TableKey,
        value: Value,
        mut conflict: F,
    ) -> Result<(), (TableKey, Value)>
    where
        F: FnMut(&TableKey, &Value) -> bool,
    {
        let mut entries = self.entries.write().await;
        if let Some((k, v)) = entries.iter().find(|(k, v)| conflict(k, v)) {
            return Err((k.clone(), v.clone()));
        }
        entries.insert(key, value);
        Ok(())
    }
}

/// Registry of team tables; a table exists exactly as long as its team.
#[derive(Clone, Default)]
pub struct TableRegistry {
    tables: Arc<RwLock<HashMap<String, Arc<TeamTable>>>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, team_id: &str) -> Arc<TeamTable> {
        let table = Arc::new(TeamTable::new());
        self.tables
            .write()
            .await
            .insert(team_id.to_string(), table.clone());
        table
    }

    pub async fn get(&self, team_id: &str) -> Option<Arc<TeamTable>> {
        self.tables.read().await.get(team_id).cloned()
    }

    pub async fn drop_table(&self, team_id: &str) -> bool {
        self.tables.write().await.remove(team_id).is_some()
    }

    pub async fn exists(&self, team_id: &str) -> bool {
        self.tables.read().await.contains_key(team_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn discovery_seq_is_monotonic_from_one() {
        let registry = TableRegistry::new();
        let table = registry.create("t1").await;
        assert_eq!(table.next_discovery_seq().await, 1);
        assert_eq!(table.next_discovery_seq().await, 2);
    }

    #[tokio::test]
    async fn insert_unless_rejects_on_conflict() {
        let registry = TableRegistry::new();
        let table = registry.create("t1").await;
        table
            .insert_unless(
                TableKey::Pair("p1".to_string()),
                json!({"coder": "a"}),
                |_, _| false,
            )
            .await
            .unwrap();
        let err = table
            .insert_unless(
                TableKey::Pair("p2".to_string()),
                json!({"coder": "a"}),
                |key, _| matches!(key, TableKey::Pair(_)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.0, TableKey::Pair("p1".to_string()));
    }

    #[tokio::test]
    async fn dropped_table_is_gone() {
        let registry = TableRegistry::new();
        registry.create("t1").await;
        assert!(registry.drop_table("t1").await);
        assert!(!registry.drop_table("t1").await);
        assert!(registry.get("t1").await.is_none());
    }
}
