use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptor handed to the Model Client so the provider can surface the
/// tool to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-Schema object describing the parameters.
    pub parameters: Value,
}
