//! Step Registry
//!
//! Maps step names (the `type` of a message) to their declared definitions.
//! Plugins register at startup; the planner resolves a message's step here once
//! per message instead of dispatching by name on every task.

use super::reducer::Reducer;
use super::types::*;

use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::Arc;

pub struct StepRegistry {
    steps: DashMap<String, Arc<StepDefinition>>,
}

impl StepRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `definition` under its name.
    ///
    /// Registration is append-only: a second definition for the same name is
    /// ignored and `false` is returned.
    pub fn register(&self, definition: StepDefinition) -> bool {
        match self.steps.entry(definition.name.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!("Step already registered, ignoring: {}", definition.name);
                false
            }
            Entry::Vacant(slot) => {
                tracing::info!("Registered step: {}", definition.name);
                slot.insert(Arc::new(definition));
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<StepDefinition>> {
        self.steps.get(name).map(|entry| entry.value().clone())
    }

    /// Runs the handler of the message's step.
    ///
    /// # Returns
    /// * `Ok(value)` with the handler's outputs keyed by output name.
    /// * `Err` if the handler failed or no step is registered for the message type.
    pub async fn execute(&self, message: Message) -> Result<Value> {
        let Some(definition) = self.get(&message.kind) else {
            let error = format!("Unknown step: {}", message.kind);
            tracing::error!("{}", error);
            return Err(anyhow::anyhow!(error));
        };

        tracing::debug!(
            "Executing step '{}' for dataset {} (body size: {} bytes)",
            definition.name,
            message.dataset,
            message.body.to_string().len()
        );

        (definition.handler)(message).await
    }

    pub fn list_steps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Steps every node serves.
///
/// `ping` is a read answered by each slice of one replica with `{"pong": true}`,
/// a cheap end-to-end check of routing, dispatch and gathering.
pub fn register_builtin_steps(registry: &StepRegistry) {
    registry.register(
        StepDefinition::new("ping", |_| async { Ok(serde_json::json!({"pong": true})) })
            .output("pong", Reducer::And, vec![OutputRoute::Reply]),
    );
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self {
            steps: DashMap::new(),
        }
    }
}
