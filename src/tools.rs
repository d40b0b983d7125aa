//! # Tool definitions
//!
//! A [`Tool`] pairs a [`ToolDefinition`] (what the model is told about the tool)
//! with an async [`ToolHandler`] (what actually runs). Tools are registered in a
//! [`ToolRegistry`](crate::ToolRegistry), which owns validation, timeouts and the
//! client/server runtime split.
//!
//! ## Schema notation
//!
//! Parameters may be given in three forms, all normalized to the JSON Schema
//! object the chat-completions API expects:
//!
//! - **Simple notation**: `{"location": "string", "units": "string"}`
//! - **Typed properties**: `{"limit": {"type": "integer", "optional": true}}`
//! - **Full JSON Schema**: anything with both `type` and `properties`, passed through
//!
//! ## Example
//!
//! ```rust,no_run
//! use streamchat::{tool, ToolRuntime};
//! use serde_json::json;
//!
//! let weather = tool("get_weather", "Get the current weather for a city")
//!     .param("city", "string")
//!     .runtime(ToolRuntime::Client)
//!     .build(|args| async move {
//!         let city = args["city"].as_str().unwrap_or("unknown");
//!         Ok(json!({"city": city, "temp_c": 21}))
//!     });
//!
//! assert_eq!(weather.name(), "get_weather");
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased async tool handler.
///
/// Takes the validated JSON arguments and resolves to a JSON outcome. Stored
/// behind an `Arc` so that tools clone cheaply and handlers can be moved onto
/// spawned tasks.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Where a tool is allowed to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRuntime {
    /// Only in the client-side registry
    Client,
    /// Only in the server-side registry
    Server,
    /// Either side
    #[default]
    Hybrid,
}

impl ToolRuntime {
    /// Whether a tool with this runtime may run on `side`
    pub fn permits(self, side: ToolRuntime) -> bool {
        self == ToolRuntime::Hybrid || self == side
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolRuntime::Client => "client",
            ToolRuntime::Server => "server",
            ToolRuntime::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation hints for UIs listing the tool. Never sent to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUiMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Everything about a tool except its implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique key within a registry
    pub name: String,
    pub description: String,
    /// JSON Schema (object form) for the arguments
    pub parameters: Value,
    /// Preferred runtime; registration falls back to `Hybrid` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<ToolRuntime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<ToolUiMetadata>,
}

impl ToolDefinition {
    /// Creates a definition, normalizing `parameters` to full JSON Schema
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: convert_schema_to_openai(parameters),
            runtime: None,
            ui: None,
        }
    }

    /// The `tools[]` entry advertised to the model
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// A tool definition together with its handler
#[derive(Clone)]
pub struct Tool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

impl Tool {
    /// Creates a tool from a schema in any supported notation and an async handler.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_definition(ToolDefinition::new(name, description, input_schema), handler)
    }

    /// Creates a tool from an existing definition.
    pub fn from_definition<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            definition,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Runs the handler directly, without validation or timeout.
    ///
    /// Prefer [`ToolRegistry::execute`](crate::ToolRegistry::execute), which
    /// applies both.
    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    pub fn to_openai_format(&self) -> Value {
        self.definition.to_openai_format()
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.definition.parameters
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn handler(&self) -> ToolHandler {
        Arc::clone(&self.handler)
    }

    pub(crate) fn into_parts(self) -> (ToolDefinition, ToolHandler) {
        (self.definition, self.handler)
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.definition.name)
            .field("description", &self.definition.description)
            .field("parameters", &self.definition.parameters)
            .field("runtime", &self.definition.runtime)
            .finish()
    }
}

/// Normalizes the supported schema notations into a JSON Schema object.
///
/// In the typed-property form, `optional: true` or `required: false` leave a
/// property out of `required`, as does a `default`. Everything else is required.
pub(crate) fn convert_schema_to_openai(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        });
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        match param_type {
            Value::String(type_str) => {
                properties.insert(param_name.clone(), type_to_json_schema(type_str));
                required.push(param_name.clone());
            }
            Value::Object(prop) => {
                let mut prop = prop.clone();
                let is_optional = prop
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let is_required = prop.remove("required").and_then(|v| v.as_bool());
                let has_default = prop.contains_key("default");

                properties.insert(param_name.clone(), Value::Object(prop));

                match is_required {
                    Some(true) => required.push(param_name.clone()),
                    Some(false) => {}
                    None if is_optional || has_default => {}
                    None => required.push(param_name.clone()),
                }
            }
            other => {
                log::warn!(
                    "ignoring parameter '{}' with unsupported schema {}",
                    param_name,
                    other
                );
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

/// Maps a shorthand type name to a JSON Schema type. Unknown names become `string`.
fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// Builder returned by [`tool`]
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
    runtime: Option<ToolRuntime>,
    ui: Option<ToolUiMetadata>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
            runtime: None,
            ui: None,
        }
    }

    /// Replaces the whole parameter schema
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Adds one required parameter in simple notation.
    ///
    /// Resets the schema if a non-object schema was set earlier.
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if !self.schema.is_object() {
            self.schema = Value::Object(serde_json::Map::new());
        }
        if let Some(obj) = self.schema.as_object_mut() {
            obj.insert(name.to_string(), Value::String(type_str.to_string()));
        }
        self
    }

    pub fn runtime(mut self, runtime: ToolRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn ui(mut self, ui: ToolUiMetadata) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut definition = ToolDefinition::new(self.name, self.description, self.schema);
        definition.runtime = self.runtime;
        definition.ui = self.ui;
        Tool::from_definition(definition, handler)
    }
}

/// Starts building a tool.
///
/// ```rust,no_run
/// use streamchat::tool;
/// use serde_json::json;
///
/// let add = tool("add", "Add two numbers")
///     .param("a", "number")
///     .param("b", "number")
///     .build(|args| async move {
///         let a = args["a"].as_f64().unwrap_or(0.0);
///         let b = args["b"].as_f64().unwrap_or(0.0);
///         Ok(json!({"result": a + b}))
///     });
/// ```
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}
