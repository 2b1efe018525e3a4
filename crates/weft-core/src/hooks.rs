//! Collaborator hooks feeding the agent system prompt.
//!
//! Project rules (a WEFT.md file, an org policy service) and the repo map
//! come from outside the core. Both hooks are optional; failures are logged
//! and the prompt section is skipped.

use std::sync::Arc;

use futures::future::BoxFuture;

#[derive(Debug, Clone)]
pub struct RulesContext {
    pub project_path: String,
}

#[derive(Debug, Clone)]
pub struct RepoMapContext {
    pub project_path: String,
    /// Rough token ceiling for the returned map.
    pub token_budget: u64,
}

pub trait ProjectRulesHook: Send + Sync {
    fn project_rules(
        &self,
        ctx: RulesContext,
    ) -> BoxFuture<'static, anyhow::Result<Option<String>>>;
}

pub trait RepoMapHook: Send + Sync {
    fn repo_map(&self, ctx: RepoMapContext) -> BoxFuture<'static, anyhow::Result<Option<String>>>;
}

#[derive(Clone, Default)]
pub struct CollaboratorHooks {
    pub project_rules: Option<Arc<dyn ProjectRulesHook>>,
    pub repo_map: Option<Arc<dyn RepoMapHook>>,
}

impl CollaboratorHooks {
    pub fn none() -> Self {
        Self::default()
    }

    pub async fn fetch_project_rules(&self, project_path: &str) -> Option<String> {
        let hook = self.project_rules.as_ref()?;
        match hook
            .project_rules(RulesContext {
                project_path: project_path.to_string(),
            })
            .await
        {
            Ok(rules) => rules.filter(|r| !r.trim().is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "project rules hook failed; skipping");
                None
            }
        }
    }

    pub async fn fetch_repo_map(&self, project_path: &str, token_budget: u64) -> Option<String> {
        let hook = self.repo_map.as_ref()?;
        match hook
            .repo_map(RepoMapContext {
                project_path: project_path.to_string(),
                token_budget,
            })
            .await
        {
            Ok(map) => map.filter(|m| !m.trim().is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "repo map hook failed; skipping");
                None
            }
        }
    }
}
