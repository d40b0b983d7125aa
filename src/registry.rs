//! Tool registry: storage, validation and timed execution of tools.
//!
//! Two registries exist per process, one per [`ExecutionSide`]. They share one
//! implementation, [`ToolRegistry<S>`], and differ only in which
//! [`ToolRuntime`]s they accept at execution time:
//!
//! ```text
//!                 ┌─────────────── ToolRegistry<ClientSide> ── client_registry()
//! ToolRegistry<S> ┤
//!                 └─────────────── ToolRegistry<ServerSide> ── server_registry()
//! ```
//!
//! [`ToolRegistry::execute`] never returns `Err`: every failure (unknown tool,
//! wrong runtime, bad JSON, schema violation, timeout, handler error or panic)
//! becomes an [`ExecutionResult`] with `error` set, so the caller can hand the
//! text back to the model.

use crate::tools::{Tool, ToolDefinition, ToolHandler, ToolRuntime};
use crate::types::ToolCall;
use crate::{Error, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

/// Default per-tool execution budget
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Marker for the side of the wire a registry executes on
pub trait ExecutionSide: Send + Sync + 'static {
    /// The runtime this side satisfies
    const RUNTIME: ToolRuntime;
}

/// Tools executed in the chat client process
#[derive(Debug, Clone, Copy)]
pub struct ClientSide;

/// Tools executed by a backend on behalf of the client
#[derive(Debug, Clone, Copy)]
pub struct ServerSide;

impl ExecutionSide for ClientSide {
    const RUNTIME: ToolRuntime = ToolRuntime::Client;
}

impl ExecutionSide for ServerSide {
    const RUNTIME: ToolRuntime = ToolRuntime::Server;
}

/// Options for [`ToolRegistry::register`]
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Overrides the definition's runtime
    pub runtime: Option<ToolRuntime>,
    pub timeout: Duration,
    pub enabled: bool,
    /// Replace an existing tool of the same name instead of failing
    pub override_existing: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            runtime: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            enabled: true,
            override_existing: false,
        }
    }
}

impl RegisterOptions {
    pub fn runtime(mut self, runtime: ToolRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn timeout_ms(mut self, millis: u64) -> Self {
        self.timeout = Duration::from_millis(millis);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn override_existing(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn timeout(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Text to feed back to the model, and whether it describes a failure
    pub fn to_tool_content(&self) -> (String, bool) {
        match (&self.error, &self.result) {
            (Some(error), _) => (format!("Error: {}", error), true),
            (None, Some(result)) => (result.clone(), false),
            (None, None) => (String::new(), false),
        }
    }
}

/// Read-only snapshot of a registered tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub definition: ToolDefinition,
    pub runtime: ToolRuntime,
    pub enabled: bool,
    pub timeout_ms: u64,
    pub last_error: Option<String>,
}

/// Change notification delivered to [`ToolRegistry::subscribe`] listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Registered { name: String, replaced: bool },
    Unregistered { name: String },
    EnabledChanged { name: String, enabled: bool },
}

pub type ChangeListener = Arc<dyn Fn(&RegistryChange) + Send + Sync>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
    validator: JSONSchema,
    runtime: ToolRuntime,
    enabled: AtomicBool,
    timeout: Duration,
    last_error: Mutex<Option<String>>,
}

impl RegisteredTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            definition: self.definition.clone(),
            runtime: self.runtime,
            enabled: self.enabled.load(Ordering::Relaxed),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            last_error: self.last_error(),
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fail(&self, result: ExecutionResult) -> ExecutionResult {
        if let Some(error) = &result.error {
            log::warn!("tool '{}' failed: {}", self.definition.name, error);
            *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
        }
        result
    }
}

/// Registry of tools executable on side `S`.
///
/// Mutation goes through an `RwLock`; [`execute`](Self::execute) only holds the
/// read lock long enough to clone the entry out, so handlers never run under it.
pub struct ToolRegistry<S: ExecutionSide> {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
    listeners: RwLock<Vec<ChangeListener>>,
    enforce_enabled: bool,
    _side: PhantomData<fn() -> S>,
}

impl<S: ExecutionSide> Default for ToolRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ExecutionSide> std::fmt::Debug for ToolRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("side", &S::RUNTIME)
            .field("tools", &self.names())
            .field("enforce_enabled", &self.enforce_enabled)
            .finish()
    }
}

impl<S: ExecutionSide> ToolRegistry<S> {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            enforce_enabled: false,
            _side: PhantomData,
        }
    }

    /// A registry whose `execute` refuses disabled tools
    pub fn enforcing_enabled() -> Self {
        Self {
            enforce_enabled: true,
            ..Self::new()
        }
    }

    /// The runtime this registry executes as
    pub fn side(&self) -> ToolRuntime {
        S::RUNTIME
    }

    /// Registers a definition and its handler.
    ///
    /// # Errors
    ///
    /// [`Error::Registry`] when the name is already taken (and
    /// `override_existing` is unset), the name is empty, or the parameter
    /// schema does not compile.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: ToolHandler,
        options: RegisterOptions,
    ) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(Error::registry("tool name must not be empty"));
        }

        let validator = JSONSchema::compile(&definition.parameters).map_err(|e| {
            Error::registry(format!(
                "invalid parameter schema for tool '{}': {}",
                definition.name, e
            ))
        })?;

        let name = definition.name.clone();
        let runtime = options
            .runtime
            .or(definition.runtime)
            .unwrap_or(ToolRuntime::Hybrid);
        let entry = Arc::new(RegisteredTool {
            definition,
            handler,
            validator,
            runtime,
            enabled: AtomicBool::new(options.enabled),
            timeout: options.timeout,
            last_error: Mutex::new(None),
        });

        let replaced = {
            let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
            if tools.contains_key(&name) && !options.override_existing {
                return Err(Error::registry(format!(
                    "tool '{}' is already registered",
                    name
                )));
            }
            tools.insert(name.clone(), entry).is_some()
        };

        log::debug!(
            "registered tool '{}' (runtime {}, replaced: {})",
            name,
            runtime,
            replaced
        );
        self.notify(&RegistryChange::Registered { name, replaced });
        Ok(())
    }

    /// Registers a [`Tool`] built with [`tool`](crate::tool)
    pub fn register_tool(&self, tool: Tool, options: RegisterOptions) -> Result<()> {
        let (definition, handler) = tool.into_parts();
        self.register(definition, handler, options)
    }

    /// Removes a tool. Returns whether it was present.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            self.notify(&RegistryChange::Unregistered {
                name: name.to_string(),
            });
        }
        removed
    }

    /// Flips the enabled flag. Returns whether the tool exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let Some(entry) = self.entry(name) else {
            return false;
        };
        let previous = entry.enabled.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            self.notify(&RegistryChange::EnabledChanged {
                name: name.to_string(),
                enabled,
            });
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<ToolInfo> {
        self.entry(name).map(|entry| entry.info())
    }

    /// All tools, sorted by name
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.info())
            .collect();
        infos.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        infos
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_error(&self, name: &str) -> Option<String> {
        self.entry(name).and_then(|entry| entry.last_error())
    }

    /// Enabled tools this side may run, in the `tools[]` format, sorted by name
    pub fn advertised_tools(&self) -> Vec<Value> {
        self.list()
            .into_iter()
            .filter(|info| info.enabled && info.runtime.permits(S::RUNTIME))
            .map(|info| info.definition.to_openai_format())
            .collect()
    }

    /// Adds a listener called after every registration change
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&RegistryChange) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Executes a tool against raw JSON argument text.
    ///
    /// Empty (or whitespace-only) arguments are treated as `{}`. The handler
    /// runs on its own task, raced against the tool's timeout; when the timer
    /// wins the task is aborted and its outcome discarded.
    pub async fn execute(&self, name: &str, arguments: &str) -> ExecutionResult {
        let Some(tool) = self.entry(name) else {
            log::warn!("execution requested for unknown tool '{}'", name);
            return ExecutionResult::failure(format!("tool '{}' is not registered", name));
        };

        if !tool.runtime.permits(S::RUNTIME) {
            return tool.fail(ExecutionResult::failure(format!(
                "wrong runtime: tool '{}' is {}-only and cannot run on the {} side",
                name,
                tool.runtime,
                S::RUNTIME
            )));
        }

        if self.enforce_enabled && !tool.enabled.load(Ordering::Relaxed) {
            return tool.fail(ExecutionResult::failure(format!(
                "tool '{}' is disabled",
                name
            )));
        }

        let args: Value = if arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(arguments) {
                Ok(args) => args,
                Err(e) => {
                    return tool.fail(ExecutionResult::failure(format!(
                        "invalid JSON arguments for tool '{}': {}",
                        name, e
                    )));
                }
            }
        };

        if let Err(errors) = tool.validator.validate(&args) {
            let details: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    let path = if path.is_empty() { "$".to_string() } else { path };
                    format!("{}: {}", path, e)
                })
                .collect();
            return tool.fail(ExecutionResult::failure(format!(
                "invalid arguments for tool '{}': {}",
                name,
                details.join("; ")
            )));
        }

        log::debug!("executing tool '{}'", name);
        let mut task = tokio::spawn((tool.handler)(args));

        match tokio::time::timeout(tool.timeout, &mut task).await {
            Err(_) => {
                task.abort();
                tool.fail(ExecutionResult::timeout(format!(
                    "tool '{}' timed out after {}ms",
                    name,
                    tool.timeout.as_millis()
                )))
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    format!("tool '{}' panicked: {}", name, panic_message(join_error))
                } else {
                    format!("tool '{}' was cancelled", name)
                };
                tool.fail(ExecutionResult::failure(reason))
            }
            Ok(Ok(Err(e))) => tool.fail(ExecutionResult::failure(format!(
                "tool '{}' failed: {}",
                name, e
            ))),
            Ok(Ok(Ok(value))) => {
                log::debug!("tool '{}' completed", name);
                ExecutionResult::success(match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
            }
        }
    }

    fn entry(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn notify(&self, change: &RegistryChange) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(change);
        }
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Process-wide client-side registry
pub fn client_registry() -> Arc<ToolRegistry<ClientSide>> {
    static REGISTRY: OnceLock<Arc<ToolRegistry<ClientSide>>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(ToolRegistry::new())))
}

/// Process-wide server-side registry
pub fn server_registry() -> Arc<ToolRegistry<ServerSide>> {
    static REGISTRY: OnceLock<Arc<ToolRegistry<ServerSide>>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(ToolRegistry::new())))
}

/// What the turn loop needs from a tool source
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tool entries to advertise in the request
    fn advertised_tools(&self) -> Vec<Value>;

    /// Runs one finalized tool call
    async fn execute_call(&self, call: &ToolCall) -> ExecutionResult;
}

#[async_trait]
impl<S: ExecutionSide> ToolExecutor for ToolRegistry<S> {
    fn advertised_tools(&self) -> Vec<Value> {
        ToolRegistry::advertised_tools(self)
    }

    async fn execute_call(&self, call: &ToolCall) -> ExecutionResult {
        self.execute(&call.function.name, &call.function.arguments)
            .await
    }
}
