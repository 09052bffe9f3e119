//! LLM-facing tool registry.
//!
//! Flattens per-server listings into one tool list. A lone server's tools
//! keep their names; with several servers each tool is advertised as
//! `<server_id>_<tool_name>` and resolved back through an index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crate::mcp::types::McpTool;

/// A tool as advertised to the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Name the LLM sees; unique within one registry.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: Value,
    /// Server owning the tool.
    pub server_id: String,
    /// Name the owning server knows the tool by.
    pub remote_name: String,
}

/// How the namespaced schema's `required` list is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredPolicy {
    /// Every declared property is required.
    #[default]
    AllProperties,
    /// Keep the schema's own `required` list.
    Declared,
}

/// Flattened tool list plus the routing index back to servers.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    // advertised name -> position in `tools`
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build the registry from per-server listings.
    ///
    /// A single server's tools are advertised verbatim. With several
    /// servers every tool is advertised as `<server_id>_<tool>` with a
    /// `[<server_id>] ` description prefix.
    pub fn build(listings: Vec<(String, Vec<McpTool>)>, policy: RequiredPolicy) -> Self {
        let namespaced = listings.len() > 1;
        let mut registry = Self::default();

        for (server_id, tools) in listings {
            for tool in tools {
                let descriptor = if namespaced {
                    ToolDescriptor {
                        name: format!("{server_id}_{}", tool.name),
                        description: format!(
                            "[{server_id}] {}",
                            tool.description.as_deref().unwrap_or_default()
                        ),
                        input_schema: namespaced_schema(&tool.input_schema, policy),
                        server_id: server_id.clone(),
                        remote_name: tool.name,
                    }
                } else {
                    ToolDescriptor {
                        name: tool.name.clone(),
                        description: tool.description.unwrap_or_default(),
                        input_schema: tool.input_schema,
                        server_id: server_id.clone(),
                        remote_name: tool.name,
                    }
                };

                registry.insert(descriptor);
            }
        }

        registry
    }

    fn insert(&mut self, descriptor: ToolDescriptor) {
        if let Some(&existing) = self.index.get(&descriptor.name) {
            tracing::warn!(
                tool = %descriptor.name,
                kept_server = %self.tools[existing].server_id,
                dropped_server = %descriptor.server_id,
                "Duplicate tool name, keeping the first"
            );
            return;
        }
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
    }

    /// Advertised tools, in server then listing order.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up an advertised name.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Number of advertised tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tool is advertised.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Rewrite a schema to `{type, properties: {k: {type, description}}, required}`.
fn namespaced_schema(schema: &Value, policy: RequiredPolicy) -> Value {
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let slim: Map<String, Value> = properties
        .iter()
        .map(|(name, prop)| {
            let mut out = Map::new();
            for key in ["type", "description"] {
                if let Some(v) = prop.get(key) {
                    out.insert(key.to_string(), v.clone());
                }
            }
            (name.clone(), Value::Object(out))
        })
        .collect();

    let required: Vec<Value> = match policy {
        RequiredPolicy::AllProperties => properties.keys().cloned().map(Value::String).collect(),
        RequiredPolicy::Declared => schema
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    };

    json!({
        "type": "object",
        "properties": slim,
        "required": required,
    })
}
