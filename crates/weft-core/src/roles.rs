use serde::{Deserialize, Serialize};
use thiserror::Error;

use weft_tools::{is_known_tool, PEER_TOOLS};

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("unknown role `{0}`")]
    UnknownRole(String),

    #[error("role `{role}` references unknown tool `{tool}`")]
    UnknownTool { role: String, tool: String },
}

/// Resolved configuration an agent runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub tools: Vec<String>,
    pub max_iterations: u32,
    pub system_prompt: String,
    pub model_tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
}

/// Per-role overrides loaded from `teams.roles.<name>` config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
}

pub const BUILTIN_ROLES: &[&str] = &["lead", "researcher", "coder", "reviewer", "tester"];

fn with_peer_tools(extra: &[&str]) -> Vec<String> {
    let mut tools: Vec<String> = extra.iter().map(|t| t.to_string()).collect();
    tools.extend(PEER_TOOLS.iter().map(|t| t.to_string()));
    tools
}

/// The five built-in roles with least-privilege tool subsets.
pub fn builtin_role(name: &str) -> Option<RoleConfig> {
    let role = match name {
        "lead" => RoleConfig {
            name: "lead".to_string(),
            tools: weft_tools::KNOWN_TOOLS.iter().map(|t| t.to_string()).collect(),
            max_iterations: 25,
            system_prompt: "You are the team lead. Break work into tasks, delegate to the \
                            right teammates, track progress, and resolve cross-agent \
                            conflicts. Prefer assigning work over doing it yourself."
                .to_string(),
            model_tier: "default".to_string(),
            budget_limit: None,
        },
        "researcher" => RoleConfig {
            name: "researcher".to_string(),
            tools: with_peer_tools(&[
                "file_read",
                "file_search",
                "content_search",
                "directory_list",
                "decision_query",
            ]),
            max_iterations: 15,
            system_prompt: "You are a researcher. Read the codebase, answer questions with \
                            evidence, and share findings as discoveries. You never modify \
                            files."
                .to_string(),
            model_tier: "default".to_string(),
            budget_limit: None,
        },
        "coder" => RoleConfig {
            name: "coder".to_string(),
            tools: with_peer_tools(&[
                "file_read",
                "file_write",
                "file_edit",
                "file_search",
                "content_search",
                "directory_list",
                "shell",
                "git",
                "lsp_diagnostics",
                "decision_log",
            ]),
            max_iterations: 20,
            system_prompt: "You are a coder. Claim the region you are editing before \
                            writing, keep changes minimal and tested, and log significant \
                            decisions."
                .to_string(),
            model_tier: "default".to_string(),
            budget_limit: None,
        },
        "reviewer" => RoleConfig {
            name: "reviewer".to_string(),
            tools: with_peer_tools(&[
                "file_read",
                "file_search",
                "content_search",
                "directory_list",
                "lsp_diagnostics",
                "decision_query",
            ]),
            max_iterations: 15,
            system_prompt: "You are a reviewer. Inspect diffs and surrounding code for \
                            correctness, clarity, and missed edge cases. You never modify \
                            files; report findings to the author."
                .to_string(),
            model_tier: "default".to_string(),
            budget_limit: None,
        },
        "tester" => RoleConfig {
            name: "tester".to_string(),
            tools: with_peer_tools(&[
                "file_read",
                "file_search",
                "content_search",
                "directory_list",
                "shell",
                "lsp_diagnostics",
            ]),
            max_iterations: 20,
            system_prompt: "You are a tester. Run the test suite, reproduce reported \
                            failures, and report results with exact commands and output. \
                            You never modify source files."
                .to_string(),
            model_tier: "default".to_string(),
            budget_limit: None,
        },
        _ => return None,
    };
    Some(role)
}

/// Resolve a role by name: built-in, optionally overridden from config, or a
/// fully custom config-defined role. Tool names outside the static table are
/// refused.
pub fn resolve_role(name: &str, overrides: Option<&RoleOverride>) -> Result<RoleConfig, RoleError> {
    let base = builtin_role(name);
    let Some(overrides) = overrides else {
        return base.ok_or_else(|| RoleError::UnknownRole(name.to_string()));
    };

    let mut role = base.unwrap_or_else(|| RoleConfig {
        name: name.to_string(),
        tools: with_peer_tools(&[]),
        max_iterations: 15,
        system_prompt: format!("You are a {name} on a software team."),
        model_tier: "default".to_string(),
        budget_limit: None,
    });

    if let Some(tools) = &overrides.tools {
        for tool in tools {
            if !is_known_tool(tool) {
                return Err(RoleError::UnknownTool {
                    role: name.to_string(),
                    tool: tool.clone(),
                });
            }
        }
        role.tools = tools.clone();
    }
    if let Some(max_iterations) = overrides.max_iterations {
        role.max_iterations = max_iterations;
    }
    if let Some(system_prompt) = &overrides.system_prompt {
        role.system_prompt = system_prompt.clone();
    }
    if let Some(model_tier) = &overrides.model_tier {
        role.model_tier = model_tier.clone();
    }
    if overrides.budget_limit.is_some() {
        role.budget_limit = overrides.budget_limit;
    }
    Ok(role)
}
