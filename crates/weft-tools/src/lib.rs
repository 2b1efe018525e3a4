use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use weft_types::ToolSchema;

/// Default per-tool invocation timeout.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Every tool name the role catalog may reference. Implementations are
/// external; the registry refuses names outside this table.
pub const KNOWN_TOOLS: &[&str] = &[
    "file_read",
    "file_write",
    "file_edit",
    "file_search",
    "content_search",
    "directory_list",
    "shell",
    "git",
    "decision_log",
    "decision_query",
    "sub_agent",
    "lsp_diagnostics",
    "team_spawn",
    "team_assign",
    "team_progress",
    "team_dissolve",
    "peer_message",
    "peer_discovery",
    "peer_claim_region",
    "peer_review",
    "peer_create_task",
    "peer_ask_question",
    "peer_answer_question",
    "peer_forward_question",
    "context_retrieve",
    "context_offload",
];

/// Peer-communication tools granted to every role.
pub const PEER_TOOLS: &[&str] = &[
    "peer_message",
    "peer_discovery",
    "peer_claim_region",
    "peer_review",
    "peer_create_task",
    "peer_ask_question",
    "peer_answer_question",
    "peer_forward_question",
    "context_retrieve",
    "context_offload",
];

pub fn is_known_tool(name: &str) -> bool {
    KNOWN_TOOLS.contains(&name)
}

/// Invocation context injected by the agent on every call. `agent_snapshot`
/// carries any state the tool needs from the calling agent (e.g. the message
/// slice for `context_offload`); tools must never call back into the agent.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_path: String,
    pub session_id: Option<String>,
    pub team_id: String,
    pub agent_name: String,
    pub agent_snapshot: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: String,
    pub metadata: Value,
}

impl ToolOutput {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            metadata: Value::Null,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn run(&self, params: Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSchemaValidationError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ToolSchemaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid tool schema `{}` at `{}`: {}",
            self.tool_name, self.path, self.reason
        )
    }
}

impl std::error::Error for ToolSchemaValidationError {}

pub fn validate_tool_schema(schema: &ToolSchema) -> Result<(), ToolSchemaValidationError> {
    validate_schema_node(&schema.name, "$", &schema.parameters)
}

fn validate_schema_node(
    tool_name: &str,
    path: &str,
    value: &Value,
) -> Result<(), ToolSchemaValidationError> {
    let Some(obj) = value.as_object() else {
        if let Some(arr) = value.as_array() {
            for (idx, item) in arr.iter().enumerate() {
                validate_schema_node(tool_name, &format!("{path}[{idx}]"), item)?;
            }
        }
        return Ok(());
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("array") && !obj.contains_key("items") {
        return Err(ToolSchemaValidationError {
            tool_name: tool_name.to_string(),
            path: path.to_string(),
            reason: "array schema missing items".to_string(),
        });
    }

    for (key, child) in obj {
        validate_schema_node(tool_name, &format!("{path}.{key}"), child)?;
    }
    Ok(())
}

/// Name-indexed tool registry shared by every agent in a process. Names must
/// come from [`KNOWN_TOOLS`]; schemas are validated at registration.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) -> anyhow::Result<()> {
        let schema = tool.schema();
        if !is_known_tool(&schema.name) {
            anyhow::bail!("refusing to register unknown tool `{}`", schema.name);
        }
        validate_tool_schema(&schema)?;
        self.tools.write().await.insert(schema.name.clone(), tool);
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Schemas for the requested names, in request order. Unregistered or
    /// unknown names are skipped; the caller's role already filtered them.
    pub async fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        let tools = self.tools.read().await;
        names
            .iter()
            .filter_map(|name| tools.get(name).map(|t| t.schema()))
            .collect()
    }

    /// Invoke a tool with the default timeout. Unknown and unregistered
    /// names are refused; timeouts surface as errors so the caller can feed
    /// them back to the model as a tool error message.
    pub async fn invoke(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        self.invoke_with_timeout(name, params, ctx, TOOL_TIMEOUT)
            .await
    }

    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
        timeout: Duration,
    ) -> anyhow::Result<ToolOutput> {
        if !is_known_tool(name) {
            anyhow::bail!("unknown tool: {name}");
        }
        let tool = {
            let tools = self.tools.read().await;
            tools.get(name).cloned()
        };
        let Some(tool) = tool else {
            anyhow::bail!("tool `{name}` is not registered");
        };
        match tokio::time::timeout(timeout, tool.run(params, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, "tool invocation timed out");
                anyhow::bail!("tool `{name}` timed out after {}s", timeout.as_secs())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedTool {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.to_string(),
                description: "test tool".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn run(&self, _params: Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
            tokio::time::sleep(self.delay).await;
            Ok(ToolOutput::text(format!(
                "ran as {} in {}",
                ctx.agent_name, ctx.team_id
            )))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            project_path: "/tmp/project".to_string(),
            session_id: None,
            team_id: "team-a".to_string(),
            agent_name: "coder".to_string(),
            agent_snapshot: None,
        }
    }

    #[tokio::test]
    async fn registry_runs_registered_tool_with_context() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(FixedTool {
                name: "file_read",
                delay: Duration::ZERO,
            }))
            .await
            .unwrap();

        let output = registry.invoke("file_read", json!({}), &ctx()).await.unwrap();
        assert_eq!(output.result, "ran as coder in team-a");
    }

    #[tokio::test]
    async fn unknown_tool_names_are_refused() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("rm_rf_everything", json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));

        let err = registry
            .register(Arc::new(FixedTool {
                name: "not_in_table",
                delay: Duration::ZERO,
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn slow_tool_times_out_as_error() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(FixedTool {
                name: "shell",
                delay: Duration::from_secs(5),
            }))
            .await
            .unwrap();

        let err = registry
            .invoke_with_timeout("shell", json!({}), &ctx(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn array_schemas_require_items() {
        let bad = ToolSchema {
            name: "file_search".to_string(),
            description: "".to_string(),
            parameters: json!({"type": "array"}),
        };
        assert!(validate_tool_schema(&bad).is_err());

        let good = ToolSchema {
            name: "file_search".to_string(),
            description: "".to_string(),
            parameters: json!({"type": "array", "items": {"type": "string"}}),
        };
        assert!(validate_tool_schema(&good).is_ok());
    }
}
