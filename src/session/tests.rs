//! Session Module Tests
//!
//! ## Test Scopes
//! - **State machine**: exactly-once completion, orphan handling, descendants.
//! - **Dispatcher**: end-to-end requests over local and remote destinations,
//!   failures and deadline eviction.

#[cfg(test)]
mod tests {
    use crate::catalog::{self, CatalogStore};
    use crate::planner::*;
    use crate::routing::Router;
    use crate::session::*;
    use crate::transport::{Delivery, Transport};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    const LOCAL: &str = "h1:10031/droonga";

    fn gather_graph(inputs: &[&str], expected: usize, reducer: Reducer) -> TaskGraph {
        let root = |index: usize, destination: &str| TaskSpec {
            index,
            kind: TaskKind::Execute {
                destination: destination.to_string(),
                message: Message::new("count", "Default", json!({})),
            },
            inputs: Vec::new(),
            expected: 1,
            reducers: Vec::new(),
            descendants: Vec::new(),
            post: false,
        };
        let gather = TaskSpec {
            index: 2,
            kind: TaskKind::Gather,
            inputs: inputs.iter().map(|name| name.to_string()).collect(),
            expected,
            reducers: inputs.iter().map(|name| (name.to_string(), reducer)).collect(),
            descendants: vec![(
                inputs[0].to_string(),
                vec![Descendant::Step("report".to_string())],
            )],
            post: true,
        };
        TaskGraph {
            step: "count".to_string(),
            message: Message::new("count", "Default", json!({})),
            tasks: vec![
                root(0, "h1:10031/droonga.000"),
                root(1, "h2:10031/droonga.000"),
                gather,
            ],
        }
    }

    fn started_session(graph: TaskGraph) -> Session {
        let mut session = Session::new(SessionId::new(), graph, Duration::from_secs(60));
        session.start(&mut EffectBuffer::default());
        session
    }

    fn replies(buffer: &EffectBuffer) -> Vec<Value> {
        buffer
            .effects()
            .iter()
            .filter_map(|effect| match effect {
                Effect::Reply(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    // ============================================================
    // TEST 1: Session state machine
    // ============================================================

    #[test]
    fn test_start_dispatches_roots_with_session_id() {
        let mut session = Session::new(
            SessionId::from("s-1"),
            gather_graph(&["total"], 2, Reducer::Sum),
            Duration::from_secs(60),
        );
        let mut buffer = EffectBuffer::default();

        let started = session.start(&mut buffer);

        assert_eq!(started, 2);
        assert_eq!(session.pending_tasks(), 1);
        assert!(!session.is_done());
        let destinations: Vec<&str> = buffer
            .effects()
            .iter()
            .map(|effect| match effect {
                Effect::Execute {
                    destination,
                    message,
                } => {
                    assert_eq!(message.id.as_deref(), Some("s-1"));
                    destination.as_str()
                }
                other => panic!("unexpected effect {:?}", other),
            })
            .collect();
        assert_eq!(destinations, vec!["h1:10031/droonga.000", "h2:10031/droonga.000"]);
    }

    #[test]
    fn test_completion_exactly_once_in_any_order() {
        let arrivals = [("a", json!(1)), ("b", json!(2)), ("c", json!(3))];
        let orders = [[0, 1, 2], [2, 0, 1], [1, 2, 0]];
        let mut merged_results = Vec::new();

        for order in orders {
            let mut session = started_session(gather_graph(&["a", "b", "c"], 3, Reducer::Sum));
            let mut buffer = EffectBuffer::default();

            for (step, &position) in order.iter().enumerate() {
                let (name, value) = &arrivals[position];
                let outcome = session.receive(name, value.clone(), &mut buffer);
                let expected_completed = usize::from(step == 2);
                assert_eq!(
                    outcome,
                    ReceiveOutcome::Consumed {
                        consumers: 1,
                        completed: expected_completed
                    }
                );
            }

            let completions = replies(&buffer);
            assert_eq!(completions.len(), 1, "order {:?}", order);
            assert!(session.is_done());
            merged_results.push(completions[0].clone());
        }

        assert!(merged_results.iter().all(|merged| merged == &json!({"a": 1, "b": 2, "c": 3})));
    }

    #[test]
    fn test_same_input_reduced_regardless_of_order() {
        for values in [[1, 2, 3], [3, 1, 2], [2, 3, 1]] {
            let mut session = started_session(gather_graph(&["total"], 3, Reducer::Sum));
            let mut buffer = EffectBuffer::default();

            for value in values {
                session.receive("total", json!(value), &mut buffer);
            }

            assert_eq!(replies(&buffer), vec![json!({"total": 6})]);
        }
    }

    #[test]
    fn test_orphaned_results_are_dropped() {
        let mut session = started_session(gather_graph(&["total"], 1, Reducer::Sum));
        let mut buffer = EffectBuffer::default();

        // Nobody consumes this input
        assert_eq!(
            session.receive("unknown", json!(1), &mut buffer),
            ReceiveOutcome::Orphaned
        );
        assert!(buffer.effects().is_empty());

        session.receive("total", json!(5), &mut buffer);
        assert!(session.is_done());

        // Late arrival after the consumer completed
        let before = buffer.effects().len();
        assert_eq!(
            session.receive("total", json!(7), &mut buffer),
            ReceiveOutcome::Orphaned
        );
        assert_eq!(buffer.effects().len(), before);
        assert_eq!(replies(&buffer), vec![json!({"total": 5})]);
    }

    #[test]
    fn test_descendants_receive_output_slice() {
        let mut session = started_session(gather_graph(&["total", "nodes"], 2, Reducer::Sum));
        let mut buffer = EffectBuffer::default();

        session.receive("nodes", json!(4), &mut buffer);
        session.receive("total", json!(9), &mut buffer);

        assert!(buffer.effects().contains(&Effect::Dispatch {
            output: "total".to_string(),
            value: json!(9),
            descendant: Descendant::Step("report".to_string()),
        }));
    }

    #[test]
    fn test_session_deadline() {
        let session = Session::new(
            SessionId::new(),
            gather_graph(&["total"], 1, Reducer::Sum),
            Duration::from_millis(0),
        );
        assert!(session.is_expired(Instant::now()));

        let session = Session::new(
            SessionId::new(),
            gather_graph(&["total"], 1, Reducer::Sum),
            Duration::from_secs(60),
        );
        assert!(!session.is_expired(Instant::now()));
    }

    // ============================================================
    // TEST 2: run_task
    // ============================================================

    #[tokio::test]
    async fn test_run_task_splits_outputs() {
        let registry = StepRegistry::new();
        registry.register(StepDefinition::new("stats", |_| async {
            Ok(json!({"count": 3, "hits": ["x"]}))
        }));

        let mut message = Message::new("stats", "Default", json!({}));
        message.id = Some("s-9".to_string());
        message.task = Some(TaskRef {
            index: 0,
            reply_to: LOCAL.to_string(),
            outputs: vec!["count".to_string(), "hits".to_string()],
        });

        let results = run_task(&registry, message).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].input, "count");
        assert_eq!(results[0].value, json!(3));
        assert_eq!(results[1].value, json!(["x"]));
        assert!(results.iter().all(|result| result.id == "s-9" && result.error.is_none()));
    }

    #[tokio::test]
    async fn test_run_task_reports_failures() {
        let registry = StepRegistry::new();
        registry.register(StepDefinition::new("broken", |_| async {
            Err(anyhow::anyhow!("disk full"))
        }));

        let mut message = Message::new("broken", "Default", json!({}));
        message.id = Some("s-9".to_string());
        message.task = Some(TaskRef {
            index: 0,
            reply_to: LOCAL.to_string(),
            outputs: vec!["success".to_string()],
        });

        let results = run_task(&registry, message).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_deref().unwrap().contains("disk full"));

        // Messages without a session are ignored
        let results = run_task(&registry, Message::new("broken", "Default", json!({}))).await;
        assert!(results.is_empty());
    }

    // ============================================================
    // TEST 3: Dispatcher
    // ============================================================

    #[derive(Default)]
    struct RecordingTransport {
        messages: Mutex<Vec<(String, Message)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_message(&self, destination: &str, message: &Message) -> anyhow::Result<Delivery> {
            if self.fail {
                return Err(anyhow::anyhow!("connection refused"));
            }
            self.messages
                .lock()
                .await
                .push((destination.to_string(), message.clone()));
            Ok(Delivery::Sent)
        }

        async fn send_result(&self, _destination: &str, _result: &PartialResult) -> anyhow::Result<Delivery> {
            Ok(Delivery::Sent)
        }
    }

    impl RecordingTransport {
        async fn wait_for(&self, count: usize) -> Vec<(String, Message)> {
            for _ in 0..400 {
                {
                    let messages = self.messages.lock().await;
                    if messages.len() >= count {
                        return messages.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("expected {} outbound messages", count);
        }
    }

    fn store(hosts: &[&str]) -> Arc<CatalogStore> {
        let replicas: Vec<Value> = hosts
            .iter()
            .map(|host| {
                json!({
                    "slices": [
                        { "label": "slice000", "volume": { "address": format!("{}:10031/droonga.000", host) } },
                        { "label": "slice001", "volume": { "address": format!("{}:10031/droonga.001", host) } }
                    ]
                })
            })
            .collect();
        let model = catalog::load(&json!({
            "version": 2,
            "effectiveDate": "2014-02-28T00:00:00Z",
            "datasets": { "Default": { "nWorkers": 1, "plugins": [], "replicas": replicas } }
        }))
        .unwrap();
        CatalogStore::new(model)
    }

    fn registry() -> Arc<StepRegistry> {
        let registry = StepRegistry::new();
        registry.register(
            StepDefinition::new("watch.feed", |_| async { Ok(json!({"success": true})) })
                .write(true)
                .output("success", Reducer::And, vec![OutputRoute::Reply]),
        );
        registry.register(
            StepDefinition::new("count", |_| async { Ok(json!({"total": 1})) })
                .write(true)
                .output("total", Reducer::Sum, vec![OutputRoute::Step("report".to_string())]),
        );
        registry.register(
            StepDefinition::new("report", |message| async move {
                let total = message.body["total"].as_i64().unwrap_or(0);
                Ok(json!({"report": total * 10}))
            })
            .input("total")
            .output("report", Reducer::Replace, vec![OutputRoute::Reply]),
        );
        registry.register(
            StepDefinition::new("broken", |_| async { Err(anyhow::anyhow!("index corrupted")) })
                .output("success", Reducer::And, vec![OutputRoute::Reply]),
        );
        registry
    }

    fn spawn_dispatcher(
        hosts: &[&str],
        transport: Arc<RecordingTransport>,
        timeout: Duration,
    ) -> DispatcherHandle {
        let planner = ExecutionPlanner::new(registry(), Arc::new(Router::with_seed(3)), LOCAL);
        Dispatcher::spawn(
            DispatcherConfig {
                local_node: LOCAL.to_string(),
                session_timeout: timeout,
                sweep_interval: Duration::from_millis(10),
            },
            store(hosts),
            Arc::new(planner),
            transport,
        )
    }

    #[tokio::test]
    async fn test_dispatcher_local_request() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = spawn_dispatcher(&["h1"], transport.clone(), Duration::from_secs(5));

        let result = handle
            .submit(Message::new("watch.feed", "Default", json!({})))
            .await
            .unwrap();

        assert_eq!(result, json!({"success": true}));
        assert!(transport.messages.lock().await.is_empty());
        assert_eq!(handle.active_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_gathers_remote_results() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = spawn_dispatcher(&["h1", "h2"], transport.clone(), Duration::from_secs(5));

        let submitter = handle.clone();
        let pending = tokio::spawn(async move {
            submitter
                .submit(Message::new("watch.feed", "Default", json!({})))
                .await
        });

        // Two slices live on h2 and go through the transport
        let sent = transport.wait_for(2).await;
        assert!(sent.iter().all(|(destination, _)| destination.starts_with("h2:")));
        assert_eq!(handle.active_sessions().await.unwrap(), 1);

        for (_, message) in sent {
            handle
                .deliver(PartialResult {
                    id: message.id.clone().unwrap(),
                    input: "success".to_string(),
                    value: json!(true),
                    error: None,
                })
                .await
                .unwrap();
        }

        let result = pending.await.unwrap().unwrap();
        assert_eq!(result, json!({"success": true}));
    }

    #[tokio::test]
    async fn test_dispatcher_chains_descendant_steps() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = spawn_dispatcher(&["h1"], transport, Duration::from_secs(5));

        let result = handle
            .submit(Message::new("count", "Default", json!({})))
            .await
            .unwrap();

        // Two slices each count 1, the report step multiplies the total
        assert_eq!(result, json!({"report": 20}));
    }

    #[tokio::test]
    async fn test_dispatcher_unsupported_type() {
        let handle = spawn_dispatcher(&["h1"], Arc::default(), Duration::from_secs(5));

        let result = handle.submit(Message::new("nope", "Default", json!({}))).await;

        assert!(matches!(
            result,
            Err(SessionError::Plan(PlanError::UnsupportedMessageType(_)))
        ));
    }

    #[tokio::test]
    async fn test_dispatcher_handler_failure_aborts_session() {
        let handle = spawn_dispatcher(&["h1"], Arc::default(), Duration::from_secs(5));

        let result = handle.submit(Message::new("broken", "Default", json!({}))).await;

        assert!(matches!(result, Err(SessionError::TaskFailed(error)) if error.contains("index corrupted")));
        assert_eq!(handle.active_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_unreachable_peer_fails_request() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let handle = spawn_dispatcher(&["h1", "h2"], transport, Duration::from_secs(5));

        let result = handle.submit(Message::new("watch.feed", "Default", json!({}))).await;

        assert!(matches!(result, Err(SessionError::TaskFailed(error)) if error.contains("h2:10031")));
    }

    #[tokio::test]
    async fn test_dispatcher_evicts_stalled_sessions() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = spawn_dispatcher(&["h1", "h2"], transport, Duration::from_millis(50));

        let result = handle.submit(Message::new("watch.feed", "Default", json!({}))).await;

        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert_eq!(handle.active_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_ignores_unknown_session_results() {
        let handle = spawn_dispatcher(&["h1"], Arc::default(), Duration::from_secs(5));

        handle
            .deliver(PartialResult {
                id: "no-such-session".to_string(),
                input: "success".to_string(),
                value: json!(true),
                error: None,
            })
            .await
            .unwrap();

        // The loop keeps serving requests
        let result = handle
            .submit(Message::new("watch.feed", "Default", json!({})))
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true}));
    }
}
