//! Session Dispatcher
//!
//! Single event loop owning every active session of this node.
//!
//! ## Responsibilities
//! 1. **Planning**: incoming messages are planned against the catalog snapshot
//!    current at arrival; the session keeps using that plan.
//! 2. **Dispatch**: root tasks for local addresses run on this node, the rest go
//!    through the `Transport`.
//! 3. **Gathering**: partial results are fed to their session; completion replies
//!    to the caller and starts descendant steps.
//! 4. **Eviction**: a periodic sweep drops sessions past their deadline and
//!    answers their callers with a timeout.
//!
//! Sessions are only touched from the loop task, so they need no locks.

use super::executor::run_task;
use super::session::{EffectBuffer, Session};
use super::types::*;
use crate::catalog::CatalogStore;
use crate::planner::{Descendant, ExecutionPlanner, Message, PartialResult};
use crate::transport::{Delivery, Transport, is_local};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const COMMAND_BUFFER: usize = 1024;

type Caller = oneshot::Sender<Result<Value, SessionError>>;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// This node's name (`host:port/tag`).
    pub local_node: String,
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
}

pub enum DispatcherCommand {
    Submit { message: Message, reply: Caller },
    Deliver(PartialResult),
    ActiveSessions { reply: oneshot::Sender<usize> },
}

/// Cloneable entry point into the dispatcher loop.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    /// Plans and runs `message`, resolving with the reply of its session.
    pub async fn submit(&self, message: Message) -> Result<Value, SessionError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Submit { message, reply })
            .await
            .map_err(|_| SessionError::DispatcherStopped)?;
        response.await.map_err(|_| SessionError::DispatcherStopped)?
    }

    /// Hands a partial result to its session.
    pub async fn deliver(&self, result: PartialResult) -> Result<(), SessionError> {
        self.sender
            .send(DispatcherCommand::Deliver(result))
            .await
            .map_err(|_| SessionError::DispatcherStopped)
    }

    pub async fn active_sessions(&self) -> Result<usize, SessionError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::ActiveSessions { reply })
            .await
            .map_err(|_| SessionError::DispatcherStopped)?;
        response.await.map_err(|_| SessionError::DispatcherStopped)
    }
}

struct ActiveSession {
    session: Session,
    caller: Option<Caller>,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    catalog: Arc<CatalogStore>,
    planner: Arc<ExecutionPlanner>,
    transport: Arc<dyn Transport>,
    sessions: HashMap<SessionId, ActiveSession>,
    receiver: mpsc::Receiver<DispatcherCommand>,
    loopback: mpsc::WeakSender<DispatcherCommand>,
}

impl Dispatcher {
    /// Starts the loop on the current runtime.
    ///
    /// The loop stops once every handle is dropped.
    pub fn spawn(
        config: DispatcherConfig,
        catalog: Arc<CatalogStore>,
        planner: Arc<ExecutionPlanner>,
        transport: Arc<dyn Transport>,
    ) -> DispatcherHandle {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let dispatcher = Self {
            config,
            catalog,
            planner,
            transport,
            sessions: HashMap::new(),
            receiver,
            loopback: sender.downgrade(),
        };
        tokio::spawn(dispatcher.run());
        DispatcherHandle { sender }
    }

    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        tracing::info!(
            "Session dispatcher started for {} (timeout {:?})",
            self.config.local_node,
            self.config.session_timeout
        );

        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }

        tracing::info!("Session dispatcher stopped");
    }

    fn handle(&mut self, command: DispatcherCommand) {
        match command {
            DispatcherCommand::Submit { message, reply } => self.start_session(message, Some(reply)),
            DispatcherCommand::Deliver(result) => self.deliver(result),
            DispatcherCommand::ActiveSessions { reply } => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn start_session(&mut self, message: Message, caller: Option<Caller>) {
        let catalog = self.catalog.current();
        let graph = match self.planner.plan(&catalog, &message) {
            Ok(graph) => graph,
            Err(error) => {
                tracing::warn!("Cannot plan {} for {}: {}", message.kind, message.dataset, error);
                if let Some(caller) = caller {
                    let _ = caller.send(Err(error.into()));
                }
                return;
            }
        };

        let id = SessionId::new();
        let mut session = Session::new(id.clone(), graph, self.config.session_timeout);
        let mut effects = EffectBuffer::default();
        let started = session.start(&mut effects);
        tracing::debug!(
            "Session {} started for {} with {} root tasks",
            id,
            message.kind,
            started
        );

        self.sessions.insert(id.clone(), ActiveSession { session, caller });
        self.apply(&id, effects.into_effects());
    }

    fn deliver(&mut self, result: PartialResult) {
        let id = SessionId(result.id.clone());
        let Some(active) = self.sessions.get_mut(&id) else {
            tracing::warn!(
                "Dropping result {:?} for unknown session {}",
                result.input,
                result.id
            );
            return;
        };

        if let Some(error) = result.error {
            tracing::warn!("Session {} aborted: {}", id, error);
            if let Some(caller) = self.sessions.remove(&id).and_then(|active| active.caller) {
                let _ = caller.send(Err(SessionError::TaskFailed(error)));
            }
            return;
        }

        let mut effects = EffectBuffer::default();
        active.session.receive(&result.input, result.value, &mut effects);
        self.apply(&id, effects.into_effects());
    }

    /// Performs a session's effects and releases it once it is done.
    fn apply(&mut self, id: &SessionId, effects: Vec<Effect>) {
        let mut next_steps = Vec::new();

        for effect in effects {
            match effect {
                Effect::Execute {
                    destination,
                    message,
                } => self.execute(destination, message),
                Effect::Reply(value) => {
                    if let Some(caller) = self
                        .sessions
                        .get_mut(id)
                        .and_then(|active| active.caller.take())
                    {
                        let _ = caller.send(Ok(value));
                    }
                }
                Effect::Dispatch {
                    output,
                    value,
                    descendant: Descendant::Address(address),
                } => self.forward(
                    address,
                    PartialResult {
                        id: id.0.clone(),
                        input: output,
                        value,
                        error: None,
                    },
                ),
                Effect::Dispatch {
                    output,
                    value,
                    descendant: Descendant::Step(step),
                } => {
                    if let Some(active) = self.sessions.get(id) {
                        let origin = active.session.message();
                        let mut body = Map::new();
                        body.insert(output, value);
                        next_steps.push(Message {
                            kind: step,
                            dataset: origin.dataset.clone(),
                            body: Value::Object(body),
                            key: origin.key.clone(),
                            id: None,
                            task: None,
                        });
                    }
                }
            }
        }

        let finished = self
            .sessions
            .get(id)
            .is_some_and(|active| active.session.is_done());
        let mut caller = None;
        if finished && let Some(active) = self.sessions.remove(id) {
            tracing::debug!("Session {} complete", id);
            caller = active.caller;
        }

        // A caller nobody answered yet waits for the first descendant step instead.
        for message in next_steps {
            self.start_session(message, caller.take());
        }
        if let Some(caller) = caller {
            let _ = caller.send(Ok(Value::Null));
        }
    }

    fn execute(&self, destination: String, message: Message) {
        if is_local(&destination, &self.config.local_node) {
            let registry = self.planner.registry().clone();
            let loopback = self.loopback.clone();
            tokio::spawn(async move {
                let results = run_task(&registry, message).await;
                let Some(sender) = loopback.upgrade() else {
                    return;
                };
                for result in results {
                    if sender.send(DispatcherCommand::Deliver(result)).await.is_err() {
                        return;
                    }
                }
            });
            return;
        }

        let transport = self.transport.clone();
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            match transport.send_message(&destination, &message).await {
                Ok(Delivery::Sent) => {}
                Ok(Delivery::Buffered) => {
                    tracing::warn!("Task for {} buffered until the peer is reachable", destination);
                }
                Err(error) => {
                    tracing::error!("Failed to send task to {}: {:#}", destination, error);
                    let (Some(sender), Some(id)) = (loopback.upgrade(), message.id) else {
                        return;
                    };
                    let failure = PartialResult {
                        id,
                        input: String::new(),
                        value: Value::Null,
                        error: Some(format!("cannot reach {}: {}", destination, error)),
                    };
                    let _ = sender.send(DispatcherCommand::Deliver(failure)).await;
                }
            }
        });
    }

    fn forward(&self, destination: String, result: PartialResult) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(error) = transport.send_result(&destination, &result).await {
                tracing::error!("Failed to forward result to {}: {:#}", destination, error);
            }
        });
    }

    fn sweep(&mut self, now: Instant) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, active)| active.session.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(active) = self.sessions.remove(&id) {
                tracing::warn!(
                    "Session {} ({}) expired with {} pending tasks",
                    id,
                    active.session.message().kind,
                    active.session.pending_tasks()
                );
                if let Some(caller) = active.caller {
                    let _ = caller.send(Err(SessionError::Timeout(id)));
                }
            }
        }
    }
}
