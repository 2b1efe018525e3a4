use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use crate::rate_limiter::LimiterConfig;
use crate::roles::RoleOverride;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_team_budget")]
    pub max_per_team_usd: f64,
    #[serde(default = "default_agent_budget")]
    pub max_per_agent_usd: f64,
    /// When set, a budget-exceeded turn aborts instead of warning.
    #[serde(default)]
    pub hard_abort: bool,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            max_per_team_usd: default_team_budget(),
            max_per_agent_usd: default_agent_budget(),
            hard_abort: false,
        }
    }
}

fn default_team_budget() -> f64 {
    5.00
}

fn default_agent_budget() -> f64 {
    1.00
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsSection {
    /// Ordered escalation chain of `provider:model` strings. Fewer than two
    /// entries disables escalation.
    #[serde(default)]
    pub escalation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateAgent {
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamTemplate {
    #[serde(default)]
    pub agents: Vec<TemplateAgent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperSection {
    #[serde(default)]
    pub persist_debounce_ms: u64,
}

impl Default for KeeperSection {
    fn default() -> Self {
        Self {
            persist_debounce_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsSection {
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub templates: HashMap<String, TeamTemplate>,
    #[serde(default)]
    pub roles: HashMap<String, RoleOverride>,
    #[serde(default = "default_max_depth")]
    pub max_sub_team_depth: u32,
    #[serde(default)]
    pub keeper: KeeperSection,
}

fn default_max_depth() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_model")]
    pub default: String,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            default: default_model(),
        }
    }
}

fn default_model() -> String {
    "zai:glm-5".to_string()
}

/// The typed view over the merged configuration layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub teams: TeamsSection,
}

impl WeftConfig {
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            team_budget_usd: self.teams.budget.max_per_team_usd,
            agent_budget_usd: self.teams.budget.max_per_agent_usd,
            buckets: HashMap::new(),
        }
    }

    pub fn escalation_chain(&self) -> Vec<String> {
        if self.teams.models.escalation.len() >= 2 {
            self.teams.models.escalation.clone()
        } else {
            Vec::new()
        }
    }

    pub fn role_override(&self, name: &str) -> Option<&RoleOverride> {
        self.teams.roles.get(name)
    }

    pub fn template(&self, name: &str) -> Option<&TeamTemplate> {
        self.teams.templates.get(name)
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    runtime: Value,
}

/// Layered JSON configuration: global file, project file, environment, then
/// runtime patches, deep-merged in that order.
#[derive(Clone)]
pub struct ConfigStore {
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn load(global_path: &Path, project_path: &Path) -> anyhow::Result<Self> {
        let global = read_json_file(global_path)
            .await
            .unwrap_or_else(|_| empty_object());
        let project = read_json_file(project_path)
            .await
            .unwrap_or_else(|_| empty_object());
        Ok(Self {
            layers: Arc::new(RwLock::new(ConfigLayers {
                global,
                project,
                env: env_layer(),
                runtime: empty_object(),
            })),
        })
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            layers: Arc::new(RwLock::new(ConfigLayers {
                project: value,
                ..ConfigLayers::default()
            })),
        }
    }

    pub fn empty() -> Self {
        Self::from_value(empty_object())
    }

    pub async fn get(&self) -> WeftConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        merged
    }

    pub async fn patch_runtime(&self, patch: Value) -> WeftConfig {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.runtime, &patch);
        }
        self.get().await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Environment overrides for the handful of keys operators set per shell.
fn env_layer() -> Value {
    let mut layer = empty_object();
    if let Ok(model) = std::env::var("WEFT_MODEL_DEFAULT") {
        if !model.trim().is_empty() {
            deep_merge(
                &mut layer,
                &serde_json::json!({"model": {"default": model.trim()}}),
            );
        }
    }
    if let Ok(budget) = std::env::var("WEFT_TEAM_BUDGET_USD") {
        if let Ok(value) = budget.trim().parse::<f64>() {
            deep_merge(
                &mut layer,
                &serde_json::json!({"teams": {"budget": {"max_per_team_usd": value}}}),
            );
        }
    }
    if let Ok(budget) = std::env::var("WEFT_AGENT_BUDGET_USD") {
        if let Ok(value) = budget.trim().parse::<f64>() {
            deep_merge(
                &mut layer,
                &serde_json::json!({"teams": {"budget": {"max_per_agent_usd": value}}}),
            );
        }
    }
    layer
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

// keep PathBuf in the public signature surface for callers building paths
pub fn default_global_config_path(home: &Path) -> PathBuf {
    home.join(".weft").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let config = WeftConfig::default();
        assert_eq!(config.teams.budget.max_per_team_usd, 5.00);
        assert_eq!(config.teams.budget.max_per_agent_usd, 1.00);
        assert!(!config.teams.budget.hard_abort);
        assert_eq!(config.teams.max_sub_team_depth, 3);
        assert_eq!(config.teams.keeper.persist_debounce_ms, 0);
        assert_eq!(config.model.default, "zai:glm-5");
        assert!(config.escalation_chain().is_empty());
    }

    #[test]
    fn deep_merge_overrides_leaves_and_keeps_siblings() {
        let mut base = json!({"teams": {"budget": {"max_per_team_usd": 5.0}, "max_sub_team_depth": 3}});
        deep_merge(
            &mut base,
            &json!({"teams": {"budget": {"max_per_team_usd": 9.5}}}),
        );
        assert_eq!(base["teams"]["budget"]["max_per_team_usd"], 9.5);
        assert_eq!(base["teams"]["max_sub_team_depth"], 3);
    }

    #[tokio::test]
    async fn runtime_patch_wins_over_project_layer() {
        let store = ConfigStore::from_value(json!({"model": {"default": "zai:glm-4.5"}}));
        assert_eq!(store.get().await.model.default, "zai:glm-4.5");
        let config = store
            .patch_runtime(json!({"model": {"default": "anthropic:claude-sonnet-4-6"}}))
            .await;
        assert_eq!(config.model.default, "anthropic:claude-sonnet-4-6");
    }

    #[tokio::test]
    async fn short_escalation_chains_disable_escalation() {
        let store = ConfigStore::from_value(
            json!({"teams": {"models": {"escalation": ["zai:glm-5"]}}}),
        );
        assert!(store.get().await.escalation_chain().is_empty());

        let store = ConfigStore::from_value(json!({"teams": {"models": {"escalation": [
            "zai:glm-5", "anthropic:claude-sonnet-4-6"
        ]}}}));
        assert_eq!(store.get().await.escalation_chain().len(), 2);
    }

    #[tokio::test]
    async fn templates_and_roles_deserialize() {
        let store = ConfigStore::from_value(json!({
            "teams": {
                "templates": {
                    "feature": {"agents": [
                        {"name": "lead", "role": "lead"},
                        {"name": "coder", "role": "coder", "count": 2},
                    ]},
                },
                "roles": {
                    "coder": {"max_iterations": 30},
                },
            },
        }));
        let config = store.get().await;
        let template = config.template("feature").unwrap();
        assert_eq!(template.agents.len(), 2);
        assert_eq!(template.agents[1].count, Some(2));
        assert_eq!(
            config.role_override("coder").unwrap().max_iterations,
            Some(30)
        );
    }
}
