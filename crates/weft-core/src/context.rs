use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use weft_types::{now_ms, Region, RegionClaim, RosterEntry, TaskSummary, TeamMeta};

use crate::table::{TableKey, TableRegistry};

#[derive(Debug, Error)]
pub enum ContextError {
    /// The team's table vanished (team dissolved mid-operation). Callers
    /// treat this as benign.
    #[error("team {0} not found")]
    TeamNotFound(String),
}

/// Result of a region claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Granted,
    Conflict { agent: String, region: Region },
}

/// A finding shared by one agent with the rest of the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub seq: u64,
    pub from: String,
    pub kind: String,
    pub content: Value,
    pub ts: u64,
}

/// Structured view over the team tables: roster, discoveries, region claims,
/// and the denormalized task cache. Read operations on a vanished table
/// return empty results; writes report [`ContextError::TeamNotFound`].
#[derive(Clone)]
pub struct SharedContext {
    registry: TableRegistry,
}

impl SharedContext {
    pub fn new(registry: TableRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Agent roster
    // ------------------------------------------------------------------

    pub async fn register_agent(
        &self,
        team_id: &str,
        name: &str,
        entry: RosterEntry,
    ) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        let value = serde_json::to_value(entry).unwrap_or(Value::Null);
        table.insert(TableKey::Agent(name.to_string()), value).await;
        Ok(())
    }

    pub async fn update_agent(
        &self,
        team_id: &str,
        name: &str,
        entry: RosterEntry,
    ) -> Result<(), ContextError> {
        self.register_agent(team_id, name, entry).await
    }

    pub async fn remove_agent(&self, team_id: &str, name: &str) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        table.remove(&TableKey::Agent(name.to_string())).await;
        Ok(())
    }

    pub async fn get_agent(&self, team_id: &str, name: &str) -> Option<RosterEntry> {
        let table = self.registry.get(team_id).await?;
        let value = table.get(&TableKey::Agent(name.to_string())).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn list_agents(&self, team_id: &str) -> Vec<(String, RosterEntry)> {
        let Some(table) = self.registry.get(team_id).await else {
            return Vec::new();
        };
        let mut rows = table
            .select(|key| matches!(key, TableKey::Agent(_)))
            .await
            .into_iter()
            .filter_map(|(key, value)| match key {
                TableKey::Agent(name) => serde_json::from_value(value).ok().map(|e| (name, e)),
                _ => None,
            })
            .collect::<Vec<(String, RosterEntry)>>();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    // ------------------------------------------------------------------
    // Discoveries
    // ------------------------------------------------------------------

    pub async fn add_discovery(
        &self,
        team_id: &str,
        from: &str,
        kind: &str,
        content: Value,
    ) -> Result<Discovery, ContextError> {
        let table = self.table(team_id).await?;
        let discovery = Discovery {
            seq: table.next_discovery_seq().await,
            from: from.to_string(),
            kind: kind.to_string(),
            content,
            ts: now_ms(),
        };
        let value = serde_json::to_value(&discovery).unwrap_or(Value::Null);
        table.insert(TableKey::Discovery(discovery.seq), value).await;
        Ok(discovery)
    }

    pub async fn list_discoveries(&self, team_id: &str, kind: Option<&str>) -> Vec<Discovery> {
        let Some(table) = self.registry.get(team_id).await else {
            return Vec::new();
        };
        let mut rows = table
            .select(|key| matches!(key, TableKey::Discovery(_)))
            .await
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value::<Discovery>(value).ok())
            .filter(|d| kind.map(|k| d.kind == k).unwrap_or(true))
            .collect::<Vec<_>>();
        rows.sort_by_key(|d| d.seq);
        rows
    }

    // ------------------------------------------------------------------
    // Region claims
    // ------------------------------------------------------------------

    /// Claim a file region for exclusive editing. Conflicts only with live
    /// claims by *other* agents whose region overlaps on the same path.
    pub async fn claim_region(
        &self,
        team_id: &str,
        agent: &str,
        path: &str,
        region: Region,
    ) -> Result<ClaimOutcome, ContextError> {
        let table = self.table(team_id).await?;
        let now = now_ms();
        let claim = RegionClaim {
            agent: agent.to_string(),
            path: path.to_string(),
            region: region.clone(),
            claimed_at: now,
        };
        let value = serde_json::to_value(&claim).unwrap_or(Value::Null);
        let key = TableKey::Claim {
            path: path.to_string(),
            agent: agent.to_string(),
        };

        let result = table
            .insert_unless(key, value, |existing_key, existing_value| {
                let TableKey::Claim {
                    path: other_path,
                    agent: other_agent,
                } = existing_key
                else {
                    return false;
                };
                if other_path != path || other_agent == agent {
                    return false;
                }
                let Ok(other) = serde_json::from_value::<RegionClaim>(existing_value.clone())
                else {
                    return false;
                };
                other.is_live(now) && other.region.overlaps(&region)
            })
            .await;

        match result {
            Ok(()) => Ok(ClaimOutcome::Granted),
            Err((_, value)) => {
                let other: RegionClaim =
                    serde_json::from_value(value).expect("conflict predicate parsed this claim");
                Ok(ClaimOutcome::Conflict {
                    agent: other.agent,
                    region: other.region,
                })
            }
        }
    }

    /// Releasing a claim that does not exist is fine.
    pub async fn release_region(
        &self,
        team_id: &str,
        agent: &str,
        path: &str,
    ) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        table
            .remove(&TableKey::Claim {
                path: path.to_string(),
                agent: agent.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn list_claims(&self, team_id: &str, path: &str) -> Vec<RegionClaim> {
        self.live_claims(team_id, Some(path)).await
    }

    pub async fn list_all_claims(&self, team_id: &str) -> Vec<RegionClaim> {
        self.live_claims(team_id, None).await
    }

    async fn live_claims(&self, team_id: &str, path: Option<&str>) -> Vec<RegionClaim> {
        let Some(table) = self.registry.get(team_id).await else {
            return Vec::new();
        };
        let now = now_ms();
        let mut rows = table
            .select(|key| match key {
                TableKey::Claim { path: p, .. } => path.map(|want| p == want).unwrap_or(true),
                _ => false,
            })
            .await
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value::<RegionClaim>(value).ok())
            .filter(|claim| claim.is_live(now))
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| (a.path.as_str(), a.agent.as_str()).cmp(&(b.path.as_str(), b.agent.as_str())));
        rows
    }

    // ------------------------------------------------------------------
    // Task cache
    // ------------------------------------------------------------------

    pub async fn cache_task(
        &self,
        team_id: &str,
        task_id: &str,
        summary: TaskSummary,
    ) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        let value = serde_json::to_value(summary).unwrap_or(Value::Null);
        table.insert(TableKey::Task(task_id.to_string()), value).await;
        Ok(())
    }

    pub async fn get_cached_task(&self, team_id: &str, task_id: &str) -> Option<TaskSummary> {
        let table = self.registry.get(team_id).await?;
        let value = table.get(&TableKey::Task(task_id.to_string())).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn list_cached_tasks(&self, team_id: &str) -> Vec<(String, TaskSummary)> {
        let Some(table) = self.registry.get(team_id).await else {
            return Vec::new();
        };
        let mut rows = table
            .select(|key| matches!(key, TableKey::Task(_)))
            .await
            .into_iter()
            .filter_map(|(key, value)| match key {
                TableKey::Task(id) => serde_json::from_value(value).ok().map(|s| (id, s)),
                _ => None,
            })
            .collect::<Vec<(String, TaskSummary)>>();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    // ------------------------------------------------------------------
    // Team metadata, pairs, sub-teams
    // ------------------------------------------------------------------

    pub async fn set_meta(&self, team_id: &str, meta: &TeamMeta) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        let value = serde_json::to_value(meta).unwrap_or(Value::Null);
        table.insert(TableKey::Meta, value).await;
        Ok(())
    }

    pub async fn get_meta(&self, team_id: &str) -> Option<TeamMeta> {
        let table = self.registry.get(team_id).await?;
        let value = table.get(&TableKey::Meta).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn set_pair(
        &self,
        team_id: &str,
        pair_id: &str,
        record: Value,
    ) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        table.insert(TableKey::Pair(pair_id.to_string()), record).await;
        Ok(())
    }

    pub async fn get_pair(&self, team_id: &str, pair_id: &str) -> Option<Value> {
        let table = self.registry.get(team_id).await?;
        table.get(&TableKey::Pair(pair_id.to_string())).await
    }

    pub async fn remove_pair(&self, team_id: &str, pair_id: &str) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        table.remove(&TableKey::Pair(pair_id.to_string())).await;
        Ok(())
    }

    pub async fn add_sub_team(&self, team_id: &str, child_id: &str) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        table
            .insert(TableKey::SubTeam(child_id.to_string()), Value::Bool(true))
            .await;
        Ok(())
    }

    pub async fn remove_sub_team(&self, team_id: &str, child_id: &str) -> Result<(), ContextError> {
        let table = self.table(team_id).await?;
        table.remove(&TableKey::SubTeam(child_id.to_string())).await;
        Ok(())
    }

    pub async fn list_sub_teams(&self, team_id: &str) -> Vec<String> {
        let Some(table) = self.registry.get(team_id).await else {
            return Vec::new();
        };
        let mut rows = table
            .select(|key| matches!(key, TableKey::SubTeam(_)))
            .await
            .into_iter()
            .filter_map(|(key, _)| match key {
                TableKey::SubTeam(id) => Some(id),
                _ => None,
            })
            .collect::<Vec<_>>();
        rows.sort();
        rows
    }

    async fn table(&self, team_id: &str) -> Result<std::sync::Arc<crate::table::TeamTable>, ContextError> {
        self.registry
            .get(team_id)
            .await
            .ok_or_else(|| ContextError::TeamNotFound(team_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::AgentStatus;

    async fn context_with_team(team_id: &str) -> SharedContext {
        let registry = TableRegistry::new();
        registry.create(team_id).await;
        SharedContext::new(registry)
    }

    fn lines(start: u32, end: u32) -> Region {
        Region::Lines { start, end }
    }

    #[tokio::test]
    async fn roster_round_trips_and_lists_sorted() {
        let ctx = context_with_team("t1").await;
        ctx.register_agent(
            "t1",
            "bob",
            RosterEntry {
                role: "coder".to_string(),
                status: AgentStatus::Idle,
                model: None,
            },
        )
        .await
        .unwrap();
        ctx.register_agent(
            "t1",
            "alice",
            RosterEntry {
                role: "lead".to_string(),
                status: AgentStatus::Working,
                model: Some("zai:glm-5".to_string()),
            },
        )
        .await
        .unwrap();

        let roster = ctx.list_agents("t1").await;
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].0, "alice");
        assert_eq!(roster[1].0, "bob");
        assert_eq!(ctx.get_agent("t1", "bob").await.unwrap().role, "coder");
    }

    #[tokio::test]
    async fn discoveries_are_sequenced_and_filterable() {
        let ctx = context_with_team("t1").await;
        ctx.add_discovery("t1", "alice", "insight", json!("uses sqlite"))
            .await
            .unwrap();
        ctx.add_discovery("t1", "bob", "blocker", json!("flaky test"))
            .await
            .unwrap();
        ctx.add_discovery("t1", "alice", "insight", json!("has WAL"))
            .await
            .unwrap();

        let all = ctx.list_discoveries("t1", None).await;
        assert_eq!(all.iter().map(|d| d.seq).collect::<Vec<_>>(), vec![1, 2, 3]);

        let insights = ctx.list_discoveries("t1", Some("insight")).await;
        assert_eq!(insights.len(), 2);
        assert!(insights.iter().all(|d| d.from == "alice"));
    }

    #[tokio::test]
    async fn claim_conflict_resolves_after_release() {
        let ctx = context_with_team("t1").await;

        let granted = ctx
            .claim_region("t1", "A", "lib/x.rs", lines(1, 15))
            .await
            .unwrap();
        assert_eq!(granted, ClaimOutcome::Granted);

        let conflict = ctx
            .claim_region("t1", "B", "lib/x.rs", lines(10, 20))
            .await
            .unwrap();
        assert_eq!(
            conflict,
            ClaimOutcome::Conflict {
                agent: "A".to_string(),
                region: lines(1, 15),
            }
        );

        ctx.release_region("t1", "A", "lib/x.rs").await.unwrap();
        let retry = ctx
            .claim_region("t1", "B", "lib/x.rs", lines(10, 20))
            .await
            .unwrap();
        assert_eq!(retry, ClaimOutcome::Granted);
    }

    #[tokio::test]
    async fn self_reclaim_never_conflicts() {
        let ctx = context_with_team("t1").await;
        ctx.claim_region("t1", "A", "lib/x.rs", Region::WholeFile)
            .await
            .unwrap();
        let again = ctx
            .claim_region("t1", "A", "lib/x.rs", lines(5, 9))
            .await
            .unwrap();
        assert_eq!(again, ClaimOutcome::Granted);
    }

    #[tokio::test]
    async fn claims_on_different_paths_are_independent() {
        let ctx = context_with_team("t1").await;
        ctx.claim_region("t1", "A", "lib/x.rs", Region::WholeFile)
            .await
            .unwrap();
        let other = ctx
            .claim_region("t1", "B", "lib/y.rs", Region::WholeFile)
            .await
            .unwrap();
        assert_eq!(other, ClaimOutcome::Granted);
        assert_eq!(ctx.list_claims("t1", "lib/x.rs").await.len(), 1);
        assert_eq!(ctx.list_all_claims("t1").await.len(), 2);
    }

    #[tokio::test]
    async fn expired_claims_are_invisible_and_non_blocking() {
        let ctx = context_with_team("t1").await;
        let table = ctx.registry().get("t1").await.unwrap();
        let stale = RegionClaim {
            agent: "A".to_string(),
            path: "lib/x.rs".to_string(),
            region: Region::WholeFile,
            claimed_at: now_ms() - weft_types::CLAIM_TTL_MS,
        };
        table
            .insert(
                TableKey::Claim {
                    path: "lib/x.rs".to_string(),
                    agent: "A".to_string(),
                },
                serde_json::to_value(&stale).unwrap(),
            )
            .await;

        assert!(ctx.list_claims("t1", "lib/x.rs").await.is_empty());
        let outcome = ctx
            .claim_region("t1", "B", "lib/x.rs", Region::WholeFile)
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Granted);
    }

    #[tokio::test]
    async fn release_on_missing_claim_is_ok() {
        let ctx = context_with_team("t1").await;
        ctx.release_region("t1", "A", "lib/none.rs").await.unwrap();
    }

    #[tokio::test]
    async fn vanished_table_reads_are_benign() {
        let ctx = SharedContext::new(TableRegistry::new());
        assert!(ctx.list_agents("gone").await.is_empty());
        assert!(ctx.list_all_claims("gone").await.is_empty());
        assert!(ctx.list_discoveries("gone", None).await.is_empty());
        assert!(matches!(
            ctx.claim_region("gone", "A", "x", Region::WholeFile).await,
            Err(ContextError::TeamNotFound(_))
        ));
    }

    #[tokio::test]
    async fn task_cache_round_trips() {
        let ctx = context_with_team("t1").await;
        ctx.cache_task(
            "t1",
            "task-1",
            TaskSummary {
                title: "wire the parser".to_string(),
                status: weft_types::TaskStatus::Pending,
                owner: None,
            },
        )
        .await
        .unwrap();
        let cached = ctx.get_cached_task("t1", "task-1").await.unwrap();
        assert_eq!(cached.title, "wire the parser");
        assert_eq!(ctx.list_cached_tasks("t1").await.len(), 1);
    }
}
