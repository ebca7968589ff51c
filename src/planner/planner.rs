//! Message-to-task-graph planning.

use super::registry::StepRegistry;
use super::types::*;
use crate::catalog::CatalogModel;
use crate::routing::{ReplicaSelection, RouteRequest, Router};

use std::sync::Arc;

/// Expands a message into the task graph of its registered step.
///
/// The graph has one root task per destination, each running the step
/// handler there, plus a single gather task collecting every destination's
/// outputs. Destinations follow the step's write flag:
/// - write with a key: every copy of the partition owning the key,
/// - write without a key: every copy of every partition,
/// - read: one copy of every partition, picked at random.
pub struct ExecutionPlanner {
    registry: Arc<StepRegistry>,
    router: Arc<Router>,
    local_node: String,
}

impl ExecutionPlanner {
    pub fn new(registry: Arc<StepRegistry>, router: Arc<Router>, local_node: &str) -> Self {
        Self {
            registry,
            router,
            local_node: local_node.to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn plan(&self, catalog: &CatalogModel, message: &Message) -> Result<TaskGraph, PlanError> {
        tracing::trace!("plan: start dataset={} type={}", message.dataset, message.kind);

        let definition = self
            .registry
            .get(&message.kind)
            .ok_or_else(|| PlanError::UnsupportedMessageType(message.kind.clone()))?;

        // Unknown datasets are left to the router to report
        if let (Some(plugin), Some(dataset)) =
            (&definition.plugin, catalog.dataset(&message.dataset))
            && !dataset.plugins.iter().any(|enabled| enabled == plugin)
        {
            tracing::debug!(
                "plan: dataset {} does not enable plugin {} for {}",
                message.dataset,
                plugin,
                message.kind
            );
            return Err(PlanError::UnsupportedMessageType(message.kind.clone()));
        }

        for input in &definition.inputs {
            if message.body.get(input).is_none() {
                return Err(PlanError::MissingInput {
                    step: definition.name.clone(),
                    input: input.clone(),
                });
            }
        }

        let request = route_request_for(&definition, message);
        let destinations = self.router.route(catalog, &request)?;
        let outputs = definition.output_names();

        let mut tasks: Vec<TaskSpec> = destinations
            .into_iter()
            .enumerate()
            .map(|(index, destination)| {
                let mut bound = message.clone();
                bound.task = Some(TaskRef {
                    index,
                    reply_to: self.local_node.clone(),
                    outputs: outputs.clone(),
                });
                TaskSpec {
                    index,
                    kind: TaskKind::Execute {
                        destination,
                        message: bound,
                    },
                    inputs: Vec::new(),
                    expected: 1,
                    reducers: Vec::new(),
                    descendants: Vec::new(),
                    post: false,
                }
            })
            .collect();

        if !outputs.is_empty() {
            let gather = gather_task(&definition, tasks.len());
            tasks.push(gather);
        }

        tracing::trace!(
            "plan: done dataset={} type={} tasks={}",
            message.dataset,
            message.kind,
            tasks.len()
        );

        Ok(TaskGraph {
            step: definition.name.clone(),
            message: message.clone(),
            tasks,
        })
    }
}

fn route_request_for(definition: &StepDefinition, message: &Message) -> RouteRequest {
    match (definition.write, &message.key) {
        (true, Some(key)) => {
            RouteRequest::scatter_all(&message.dataset, message.body.clone()).with_key(key.clone())
        }
        (true, None) => RouteRequest::broadcast_all(&message.dataset),
        (false, _) => {
            RouteRequest::broadcast_all(&message.dataset).with_replica(ReplicaSelection::Random)
        }
    }
}

/// Task waiting for every output of every root task.
fn gather_task(definition: &StepDefinition, n_roots: usize) -> TaskSpec {
    let mut descendants = Vec::new();
    let mut post = false;
    for output in &definition.outputs {
        let mut routes = Vec::new();
        for route in &output.routes {
            match route {
                OutputRoute::Reply => post = true,
                OutputRoute::Step(step) => routes.push(Descendant::Step(step.clone())),
                OutputRoute::Address(address) => routes.push(Descendant::Address(address.clone())),
            }
        }
        if !routes.is_empty() {
            descendants.push((output.name.clone(), routes));
        }
    }

    TaskSpec {
        index: n_roots,
        kind: TaskKind::Gather,
        inputs: definition.output_names(),
        expected: n_roots * definition.outputs.len(),
        reducers: definition
            .outputs
            .iter()
            .map(|output| (output.name.clone(), output.reducer))
            .collect(),
        descendants,
        post,
    }
}
