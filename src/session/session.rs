//! Scatter/gather state machine for one in-flight request.
//!
//! A session owns every task of one task graph. Root tasks are dispatched by
//! `start` and count as done right away; their outputs come back through
//! `receive` in any order. A task finishes exactly once, when its received
//! count first reaches its expected count.

use super::types::*;
use crate::planner::{Descendant, Message, TaskGraph, TaskKind};

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Collaborator performing the effects a session decides on.
pub trait SessionDispatcher {
    /// Runs a root task on `destination`.
    fn execute(&mut self, session: &SessionId, destination: &str, message: Message);

    /// Answers the original caller.
    fn reply(&mut self, session: &SessionId, result: Value);

    /// Sends a completed output along one descendant route.
    fn dispatch(&mut self, session: &SessionId, output: &str, value: Value, descendant: &Descendant);
}

/// `SessionDispatcher` that records effects for the caller to perform later.
#[derive(Debug, Default)]
pub struct EffectBuffer {
    effects: Vec<Effect>,
}

impl EffectBuffer {
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

impl SessionDispatcher for EffectBuffer {
    fn execute(&mut self, _session: &SessionId, destination: &str, message: Message) {
        self.effects.push(Effect::Execute {
            destination: destination.to_string(),
            message,
        });
    }

    fn reply(&mut self, _session: &SessionId, result: Value) {
        self.effects.push(Effect::Reply(result));
    }

    fn dispatch(&mut self, _session: &SessionId, output: &str, value: Value, descendant: &Descendant) {
        self.effects.push(Effect::Dispatch {
            output: output.to_string(),
            value,
            descendant: descendant.clone(),
        });
    }
}

pub struct Session {
    id: SessionId,
    message: Message,
    tasks: Vec<Task>,
    n_done: usize,
    deadline: Instant,
}

impl Session {
    pub fn new(id: SessionId, graph: TaskGraph, timeout: Duration) -> Self {
        Self {
            id,
            message: graph.message,
            tasks: graph.tasks.into_iter().map(Task::new).collect(),
            n_done: 0,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The message the session was planned from.
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Dispatches every root task and marks it done. Returns how many were dispatched.
    pub fn start(&mut self, dispatcher: &mut dyn SessionDispatcher) -> usize {
        let mut started = 0;
        for task in self.tasks.iter_mut() {
            if !task.is_pending() || !task.spec.is_root() {
                continue;
            }
            if let TaskKind::Execute {
                destination,
                message,
            } = &task.spec.kind
            {
                let mut message = message.clone();
                message.id = Some(self.id.0.clone());
                dispatcher.execute(&self.id, destination, message);
            }
            task.state = TaskState::Done;
            task.received = task.spec.expected;
            self.n_done += 1;
            started += 1;
        }
        started
    }

    /// Merges one arriving value into every pending task consuming `name`.
    pub fn receive(
        &mut self,
        name: &str,
        value: Value,
        dispatcher: &mut dyn SessionDispatcher,
    ) -> ReceiveOutcome {
        let consumers: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.is_pending() && task.consumes(name))
            .map(|(position, _)| position)
            .collect();

        if consumers.is_empty() {
            tracing::warn!(
                "Dropping orphaned result for session {}: no pending task consumes {:?}",
                self.id,
                name
            );
            return ReceiveOutcome::Orphaned;
        }

        let mut completed = 0;
        for &position in &consumers {
            let task = &mut self.tasks[position];
            let reducer = task.spec.reducer_for(name);
            let current = task.values.get_mut(name).map(Value::take);
            let merged = reducer.reduce(current, value.clone());
            task.values.insert(name.to_string(), merged);
            task.received += 1;

            if task.received < task.spec.expected {
                continue;
            }

            task.state = TaskState::Done;
            let result = Value::Object(task.values.clone());
            if task.spec.post {
                dispatcher.reply(&self.id, result.clone());
            }
            for (output, routes) in &task.spec.descendants {
                let output_value = result.get(output).cloned().unwrap_or(Value::Null);
                for route in routes {
                    dispatcher.dispatch(&self.id, output, output_value.clone(), route);
                }
            }
            self.n_done += 1;
            completed += 1;
        }

        ReceiveOutcome::Consumed {
            consumers: consumers.len(),
            completed,
        }
    }

    /// True once every task is done.
    pub fn is_done(&self) -> bool {
        self.n_done == self.tasks.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len() - self.n_done
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}
