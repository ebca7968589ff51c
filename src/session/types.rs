use crate::planner::{Descendant, Message, PlanError, TaskSpec};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Done,
}

/// Run-time state of one task of a session.
#[derive(Debug, Clone)]
pub struct Task {
    pub spec: TaskSpec,
    pub state: TaskState,
    pub received: usize,
    /// Accumulated value per input name.
    pub values: Map<String, Value>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            state: TaskState::Pending,
            received: 0,
            values: Map::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn consumes(&self, input: &str) -> bool {
        self.spec.inputs.iter().any(|name| name == input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Value merged into `consumers` pending tasks, `completed` of which finished.
    Consumed { consumers: usize, completed: usize },
    /// No pending task consumes the input.
    Orphaned,
}

/// Side effects a session asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Execute { destination: String, message: Message },
    Reply(Value),
    Dispatch {
        output: String,
        value: Value,
        descendant: Descendant,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} timed out")]
    Timeout(SessionId),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("dispatcher is not running")]
    DispatcherStopped,
}
