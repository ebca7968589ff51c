//! Local execution of dispatched tasks.
//!
//! A task message carries its session id and a `TaskRef`. Running it means
//! calling the step handler and turning the handler's outputs into one
//! `PartialResult` per declared output name.

use crate::planner::{Message, PartialResult, StepRegistry};

use serde_json::Value;

/// Runs `message` through its step handler.
///
/// A failing handler yields results carrying the error so the waiting session
/// can abort instead of stalling.
pub async fn run_task(registry: &StepRegistry, message: Message) -> Vec<PartialResult> {
    let (Some(id), Some(task)) = (message.id.clone(), message.task.clone()) else {
        tracing::warn!("Ignoring task message without session id: {}", message.kind);
        return Vec::new();
    };
    let kind = message.kind.clone();

    match registry.execute(message).await {
        Ok(value) => split_outputs(&id, &task.outputs, value),
        Err(error) => {
            tracing::error!("Task {} of session {} ({}) failed: {:#}", task.index, id, kind, error);
            task.outputs
                .iter()
                .map(|output| PartialResult {
                    id: id.clone(),
                    input: output.clone(),
                    value: Value::Null,
                    error: Some(error.to_string()),
                })
                .collect()
        }
    }
}

/// One result per output. A handler with a single output may return the bare value.
fn split_outputs(id: &str, outputs: &[String], value: Value) -> Vec<PartialResult> {
    let bare = outputs.len() == 1 && !value.as_object().is_some_and(|map| map.contains_key(&outputs[0]));
    outputs
        .iter()
        .map(|output| PartialResult {
            id: id.to_string(),
            input: output.clone(),
            value: if bare {
                value.clone()
            } else {
                value.get(output).cloned().unwrap_or(Value::Null)
            },
            error: None,
        })
        .collect()
}
