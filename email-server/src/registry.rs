//! Tool Registry: static tool descriptors and name-keyed dispatch
//!
//! Invocation pipeline: look up tool → required-field check → defaults →
//! JSON Schema type check → handler. Every failure along the way comes back
//! as a `ToolOutcome`, never as an error to the transport.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::MailError;

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Object,
}

impl ParamKind {
    fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Object => "object",
        }
    }
}

/// Value used when an optional parameter is omitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    None,
    Str(&'static str),
    EmptyObject,
}

/// One declared tool parameter
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: ParamDefault,
}

impl ParamSpec {
    fn default_value(&self) -> Option<Value> {
        match self.default {
            ParamDefault::None => None,
            ParamDefault::Str(s) => Some(Value::String(s.to_string())),
            ParamDefault::EmptyObject => Some(Value::Object(Map::new())),
        }
    }

    fn schema(&self) -> Value {
        let mut prop = json!({
            "type": self.kind.as_str(),
            "description": self.description,
        });
        if let Some(default) = self.default_value() {
            prop["default"] = default;
        }
        if self.kind == ParamKind::Object {
            prop["additionalProperties"] = Value::Bool(true);
        }
        prop
    }
}

/// Static description of an invocable capability
#[derive(Debug)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// Leads the failure text when the handler faults, e.g. "Error sending email"
    pub fault_prefix: &'static str,
    pub params: &'static [ParamSpec],
}

impl ToolDescriptor {
    /// Required parameter names, in declaration order
    pub fn required(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().filter(|p| p.required).map(|p| p.name)
    }

    pub fn optional(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().filter(|p| !p.required).map(|p| p.name)
    }

    /// JSON Schema rendered from the parameter list
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.schema()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required().collect::<Vec<_>>(),
        })
    }

    /// Required parameters that are absent, null, or the empty string
    pub fn missing_required(&self, args: &Map<String, Value>) -> Vec<String> {
        self.required()
            .filter(|name| match args.get(*name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            })
            .map(str::to_string)
            .collect()
    }

    /// Fill omitted or null optional parameters with their defaults. A null
    /// optional parameter without a default is treated as omitted.
    pub fn apply_defaults(&self, args: &mut Map<String, Value>) {
        for param in self.params.iter().filter(|p| !p.required) {
            if !args.get(param.name).map_or(true, Value::is_null) {
                continue;
            }
            match param.default_value() {
                Some(default) => {
                    args.insert(param.name.to_string(), default);
                }
                None => {
                    args.remove(param.name);
                }
            }
        }
    }

    /// Failure outcome for a handler that faulted
    pub fn fault(&self, message: impl std::fmt::Display) -> ToolOutcome {
        ToolOutcome::failure(format!("{}: {message}", self.fault_prefix))
    }
}

// Wire shape used by MCP `tools/list`
impl Serialize for ToolDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ToolDescriptor", 3)?;
        s.serialize_field("name", self.name)?;
        s.serialize_field("description", self.description)?;
        s.serialize_field("inputSchema", &self.input_schema())?;
        s.end()
    }
}

/// Result of a tool invocation as shown to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// MCP `CallToolResult` shape
    pub fn to_call_result(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

impl From<MailError> for ToolOutcome {
    fn from(err: MailError) -> Self {
        ToolOutcome::failure(err.to_string())
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;

/// A tool handler: receives validated arguments with defaults applied
pub type ToolHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

struct RegisteredTool {
    descriptor: &'static ToolDescriptor,
    validator: jsonschema::Validator,
    handler: ToolHandler,
}

/// Name-keyed tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schema once up front
    pub fn register_tool(
        &mut self,
        descriptor: &'static ToolDescriptor,
        handler: ToolHandler,
    ) -> Result<(), MailError> {
        let validator = jsonschema::validator_for(&descriptor.input_schema()).map_err(|e| {
            MailError::Internal(format!("Invalid schema for tool {}: {e}", descriptor.name))
        })?;
        info!("Registered tool: {}", descriptor.name);
        self.tools.insert(
            descriptor.name,
            RegisteredTool {
                descriptor,
                validator,
                handler,
            },
        );
        Ok(())
    }

    pub fn list_tools(&self) -> Vec<&'static ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor).collect()
    }

    pub fn get_tool(&self, name: &str) -> Option<&'static ToolDescriptor> {
        self.tools.get(name).map(|t| t.descriptor)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Validate arguments for `name` and return them with defaults applied.
    /// Performs no I/O.
    pub fn prepare(&self, name: &str, arguments: Value) -> Result<Value, MailError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| MailError::UnknownTool(name.to_string()))?;

        let mut args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(MailError::InvalidArguments(format!(
                    "arguments must be an object, got {}",
                    json_type(&other)
                )))
            }
        };

        let missing = tool.descriptor.missing_required(&args);
        if !missing.is_empty() {
            return Err(MailError::Validation { missing });
        }

        tool.descriptor.apply_defaults(&mut args);
        let instance = Value::Object(args);

        let problems: Vec<String> = tool
            .validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(MailError::InvalidArguments(problems.join("; ")));
        }

        Ok(instance)
    }

    /// Invoke a tool by name. Faults inside the handler, panics included, are
    /// reported as failure outcomes.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolOutcome {
        let instance = match self.prepare(name, arguments) {
            Ok(instance) => instance,
            Err(err) => {
                warn!("Rejected call to {name}: {err}");
                return err.into();
            }
        };

        // prepare() already proved the tool exists
        let Some(tool) = self.tools.get(name) else {
            return MailError::UnknownTool(name.to_string()).into();
        };

        debug!("Invoking tool {name}");
        match tokio::spawn((tool.handler)(instance)).await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    join_err.to_string()
                };
                warn!("Tool {name} crashed: {message}");
                tool.descriptor.fault(message)
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
