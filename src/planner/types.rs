use super::reducer::Reducer;
use crate::routing::RoutingError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Inter-node message envelope.
///
/// `type` selects the step. `id` and `task` are set when the message is one
/// task of a session running on another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub dataset: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRef>,
}

impl Message {
    pub fn new(kind: &str, dataset: &str, body: Value) -> Self {
        Self {
            kind: kind.to_string(),
            dataset: dataset.to_string(),
            body,
            key: None,
            id: None,
            task: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Correlates a dispatched task with the session waiting for its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub index: usize,
    /// Node (`host:port/tag`) owning the session.
    pub reply_to: String,
    /// Output names the handler must report back.
    pub outputs: Vec<String>,
}

/// One output value delivered to a session as input `input`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub id: String,
    pub input: String,
    #[serde(default)]
    pub value: Value,
    /// Set when the producing handler failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Type-erased step handler. Returns an object keyed by output name.
pub type StepHandlerFn = Arc<dyn Fn(Message) -> StepFuture + Send + Sync>;

/// Where a completed output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRoute {
    /// Back to the original caller.
    Reply,
    /// Planned as a new message of the named step.
    Step(String),
    /// Delivered as a partial result to the session with the same id on another node.
    Address(String),
}

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub name: String,
    pub reducer: Reducer,
    pub routes: Vec<OutputRoute>,
}

/// A declared, named operation.
///
/// Built once at startup and shared through the registry.
#[derive(Clone)]
pub struct StepDefinition {
    pub name: String,
    /// Plugin the step belongs to. A dataset only serves steps of the
    /// plugins it lists; `None` marks a step every dataset serves.
    pub plugin: Option<String>,
    pub write: bool,
    pub handler: StepHandlerFn,
    /// Body fields the step needs from an upstream step.
    pub inputs: Vec<String>,
    pub outputs: Vec<StepOutput>,
}

impl StepDefinition {
    pub fn new<F, Fut>(name: &str, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: StepHandlerFn =
            Arc::new(move |message: Message| Box::pin(handler(message)) as StepFuture);
        Self {
            name: name.to_string(),
            plugin: None,
            write: false,
            handler,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn input(mut self, name: &str) -> Self {
        self.inputs.push(name.to_string());
        self
    }

    pub fn output(mut self, name: &str, reducer: Reducer, routes: Vec<OutputRoute>) -> Self {
        self.outputs.push(StepOutput {
            name: name.to_string(),
            reducer,
            routes,
        });
        self
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|output| output.name.clone()).collect()
    }
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("write", &self.write)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Concrete execution graph for one message.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub step: String,
    pub message: Message,
    pub tasks: Vec<TaskSpec>,
}

impl TaskGraph {
    pub fn roots(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter().filter(|task| task.is_root())
    }
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub index: usize,
    pub kind: TaskKind,
    /// Input names consumed; empty for root tasks.
    pub inputs: Vec<String>,
    pub expected: usize,
    /// Reducer per input name.
    pub reducers: Vec<(String, Reducer)>,
    /// Output name to descendant routes, run once the task is done.
    pub descendants: Vec<(String, Vec<Descendant>)>,
    /// Completion replies to the original caller.
    pub post: bool,
}

impl TaskSpec {
    pub fn is_root(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn reducer_for(&self, input: &str) -> Reducer {
        self.reducers
            .iter()
            .find(|(name, _)| name == input)
            .map(|(_, reducer)| *reducer)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Run the step handler on `destination`.
    Execute { destination: String, message: Message },
    /// Accumulate handler outputs.
    Gather,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descendant {
    Step(String),
    Address(String),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("step {step} requires input {input:?} in the message body")]
    MissingInput { step: String, input: String },

    #[error(transparent)]
    Routing(#[from] RoutingError),
}
