//! End-to-end scenarios driven through the full application: command queue
//! in, transport records out.

use gantry_core::{ClientId, InteractionId};
use gantry_engine::{
    ParamSpec, Profile, RunNode, SystemBus, TestCaseArgs, TestCaseBody, TestCaseBuilder,
};
use gantry_server::{AppConfig, Application};
use gantry_state::{CommandMessage, RecordingTransport, Transport, UiResponseMessage};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

type NodeTap = Arc<Mutex<Vec<Arc<RunNode>>>>;

struct ClosureProfile {
    build: Box<dyn Fn(&SystemBus) -> Vec<Arc<RunNode>> + Send + Sync>,
}

impl Profile for ClosureProfile {
    fn test_case_list(&self, bus: &SystemBus) -> Vec<Arc<RunNode>> {
        (self.build)(bus)
    }
}

fn profile_of(
    build: impl Fn(&SystemBus) -> Vec<Arc<RunNode>> + Send + Sync + 'static,
) -> ClosureProfile {
    ClosureProfile {
        build: Box::new(build),
    }
}

/// Boot the app, connect a controller, and issue loadTC.
async fn start_run(profile: ClosureProfile) -> (Application, Arc<RecordingTransport>, ClientId) {
    let transport = Arc::new(RecordingTransport::new());
    let app = Application::new(
        Arc::new(profile),
        Arc::clone(&transport) as Arc<dyn Transport>,
        &AppConfig::default(),
    );
    let controller = ClientId::new();
    transport.set_control_client(controller);
    app.connect(controller).await;
    app.command_sender()
        .send(CommandMessage::new("loadTC", json!({})))
        .await
        .unwrap();
    (app, transport, controller)
}

async fn wait_for(transport: &RecordingTransport, what: &str, check: impl Fn(&[Value]) -> bool) {
    let waited = timeout(Duration::from_secs(10), async {
        loop {
            if check(&transport.broadcasts()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn wait_for_termination(transport: &RecordingTransport) {
    wait_for(transport, "testRunTermination", |messages| {
        messages
            .iter()
            .any(|m| m["event_type"] == "testRunTermination")
    })
    .await;
}

fn case_id(node: &Arc<RunNode>) -> String {
    node.id().as_hex()
}

fn index_of(messages: &[Value], event_type: &str, tc_id: &str) -> Option<usize> {
    messages.iter().position(|m| {
        m["event_type"] == event_type
            && (m["payload"]["tc_id"] == tc_id || m["payload"]["id"] == tc_id)
    })
}

fn count_of(messages: &[Value], event_type: &str, tc_id: &str) -> usize {
    messages
        .iter()
        .filter(|m| {
            m["event_type"] == event_type
                && (m["payload"]["tc_id"] == tc_id || m["payload"]["id"] == tc_id)
        })
        .count()
}

/// A body that reports full progress and returns the given value.
fn progress_then(value: Value) -> TestCaseBody {
    TestCaseBody::from_async(move |args: TestCaseArgs| {
        let value = value.clone();
        async move {
            let model = args.model()?;
            model.update_progress(100).await?;
            Ok(value)
        }
    })
}

fn tap(nodes: &NodeTap, node: Arc<RunNode>) -> Arc<RunNode> {
    nodes.lock().unwrap().push(Arc::clone(&node));
    node
}

#[tokio::test]
async fn test_linear_three_case_run() {
    let nodes: NodeTap = Arc::new(Mutex::new(Vec::new()));
    let nodes_clone = Arc::clone(&nodes);
    let profile = profile_of(move |bus| {
        let a = TestCaseBuilder::new("A", progress_then(json!(true)))
            .with_param(ParamSpec::model("dm"))
            .build(bus);
        let b = TestCaseBuilder::new("B", progress_then(json!(true)))
            .with_param(ParamSpec::model("dm"))
            .build(bus);
        let c = TestCaseBuilder::new("C", progress_then(json!(true)))
            .with_param(ParamSpec::model("dm"))
            .build(bus);
        b.add_dependency(&a).unwrap();
        c.add_dependency(&b).unwrap();
        [&a, &b, &c]
            .into_iter()
            .map(|n| tap(&nodes_clone, Arc::clone(n)))
            .collect()
    });

    let (app, transport, _controller) = start_run(profile).await;
    wait_for_termination(&transport).await;

    let messages = transport.broadcasts();
    let ids: Vec<String> = nodes.lock().unwrap().iter().map(case_id).collect();
    let termination = messages
        .iter()
        .position(|m| m["event_type"] == "testRunTermination")
        .unwrap();

    for id in &ids {
        let new_tc = index_of(&messages, "newTC", id).unwrap();
        let execution = index_of(&messages, "newExecution", id).unwrap();
        let progress = messages
            .iter()
            .position(|m| {
                m["event_type"] == "progressUpdate"
                    && m["payload"]["tc_id"] == id.as_str()
                    && m["payload"]["progress"] == 100
            })
            .unwrap();
        assert!(new_tc < execution, "newTC must precede newExecution");
        assert!(execution < progress, "execution must precede progress");
        assert!(progress < termination, "all case events precede termination");
        assert_eq!(count_of(&messages, "testCaseFail", id), 0);
    }

    // dependency order: A executes before B, B before C
    let exec_a = index_of(&messages, "newExecution", &ids[0]).unwrap();
    let exec_b = index_of(&messages, "newExecution", &ids[1]).unwrap();
    let exec_c = index_of(&messages, "newExecution", &ids[2]).unwrap();
    assert!(exec_a < exec_b && exec_b < exec_c);

    app.shutdown().await;
}

#[tokio::test]
async fn test_diamond_with_parameter_passing() {
    let nodes: NodeTap = Arc::new(Mutex::new(Vec::new()));
    let nodes_clone = Arc::clone(&nodes);
    let profile = profile_of(move |bus| {
        let a = TestCaseBuilder::new(
            "A",
            TestCaseBody::from_async(|_args| async { Ok(json!(2)) }),
        )
        .with_parameter_label("a")
        .build(bus);
        let b = TestCaseBuilder::new(
            "B",
            TestCaseBody::from_async(|_args| async { Ok(json!(3)) }),
        )
        .with_parameter_label("b")
        .build(bus);
        let c = TestCaseBuilder::new(
            "C",
            TestCaseBody::from_async(|args: TestCaseArgs| async move {
                let a = args.value("a").as_i64().unwrap_or(0);
                let b = args.value("b").as_i64().unwrap_or(0);
                Ok(json!(a + b))
            }),
        )
        .with_param(ParamSpec::label("a"))
        .with_param(ParamSpec::label("b"))
        .build(bus);
        c.add_dependency(&a).unwrap();
        c.add_dependency(&b).unwrap();
        [&a, &b, &c]
            .into_iter()
            .map(|n| tap(&nodes_clone, Arc::clone(n)))
            .collect()
    });

    let (app, transport, _controller) = start_run(profile).await;
    wait_for_termination(&transport).await;

    let nodes = nodes.lock().unwrap().clone();
    assert_eq!(nodes[2].result(), Some(json!(5)));

    // C's execution starts only after both inputs cleared
    let messages = transport.broadcasts();
    let exec_a = index_of(&messages, "newExecution", &case_id(&nodes[0])).unwrap();
    let exec_b = index_of(&messages, "newExecution", &case_id(&nodes[1])).unwrap();
    let exec_c = index_of(&messages, "newExecution", &case_id(&nodes[2])).unwrap();
    assert!(exec_c > exec_a && exec_c > exec_b);

    app.shutdown().await;
}

#[tokio::test]
async fn test_retry_then_success() {
    let nodes: NodeTap = Arc::new(Mutex::new(Vec::new()));
    let nodes_clone = Arc::clone(&nodes);
    let attempts = Arc::new(AtomicUsize::new(0));
    let profile = profile_of(move |bus| {
        let attempts = Arc::clone(&attempts);
        let x = TestCaseBuilder::new(
            "X",
            TestCaseBody::from_async(move |_args| {
                let attempts = Arc::clone(&attempts);
                async move {
                    let first = attempts.fetch_add(1, Ordering::SeqCst) == 0;
                    Ok(json!(!first))
                }
            }),
        )
        .with_auto_retry(1)
        .build(bus);
        vec![tap(&nodes_clone, x)]
    });

    let (app, transport, _controller) = start_run(profile).await;
    wait_for_termination(&transport).await;

    let messages = transport.broadcasts();
    let id = case_id(&nodes.lock().unwrap()[0]);
    assert_eq!(count_of(&messages, "newExecution", &id), 2);
    assert_eq!(count_of(&messages, "testCaseFail", &id), 0);

    let executions: Vec<i64> = messages
        .iter()
        .filter(|m| m["event_type"] == "newExecution" && m["payload"]["tc_id"] == id.as_str())
        .map(|m| m["payload"]["execution_id"].as_i64().unwrap())
        .collect();
    assert_eq!(executions, vec![0, 1]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_retry_exhausted_quarantine_then_retest() {
    let nodes: NodeTap = Arc::new(Mutex::new(Vec::new()));
    let nodes_clone = Arc::clone(&nodes);
    let profile = profile_of(move |bus| {
        let y = TestCaseBuilder::new(
            "Y",
            TestCaseBody::from_async(|_args| async { Ok(json!(false)) }),
        )
        .with_auto_retry(0)
        .build(bus);
        vec![tap(&nodes_clone, y)]
    });

    let (app, transport, _controller) = start_run(profile).await;
    let id = {
        let waited = timeout(Duration::from_secs(10), async {
            while nodes.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "profile never loaded");
        case_id(&nodes.lock().unwrap()[0])
    };

    let id_clone = id.clone();
    wait_for(&transport, "first testCaseFail", move |messages| {
        count_of(messages, "testCaseFail", &id_clone) == 1
    })
    .await;

    let messages = transport.broadcasts();
    assert_eq!(count_of(&messages, "newTC", &id), 1);
    assert_eq!(count_of(&messages, "newExecution", &id), 1);
    // the quarantined case blocks the terminal node
    assert!(
        !messages
            .iter()
            .any(|m| m["event_type"] == "testRunTermination")
    );

    app.command_sender()
        .send(CommandMessage::new("retest", json!({ "tc_id": id })))
        .await
        .unwrap();

    let id_clone = id.clone();
    wait_for(&transport, "retest lifecycle", move |messages| {
        count_of(messages, "newTC", &id_clone) == 2
            && count_of(messages, "newExecution", &id_clone) == 2
            && count_of(messages, "testCaseFail", &id_clone) == 2
    })
    .await;

    // execution ids stay monotonic across lifecycles
    let messages = transport.broadcasts();
    let executions: Vec<i64> = messages
        .iter()
        .filter(|m| m["event_type"] == "newExecution" && m["payload"]["tc_id"] == id.as_str())
        .map(|m| m["payload"]["execution_id"].as_i64().unwrap())
        .collect();
    assert_eq!(executions, vec![0, 1]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_user_prompt_rendezvous() {
    let nodes: NodeTap = Arc::new(Mutex::new(Vec::new()));
    let nodes_clone = Arc::clone(&nodes);
    let profile = profile_of(move |bus| {
        let p = TestCaseBuilder::new(
            "P",
            TestCaseBody::from_async(|args: TestCaseArgs| async move {
                let model = args.model()?;
                let answer = model.user_input_request("pick one").await;
                Ok(answer)
            }),
        )
        .with_param(ParamSpec::model("dm"))
        .build(bus);
        vec![tap(&nodes_clone, p)]
    });

    let (app, transport, controller) = start_run(profile).await;

    // the prompt surfaces on the controller's connection
    let prompt = timeout(Duration::from_secs(10), async {
        loop {
            let prompts = transport.sent_to(controller);
            if let Some(prompt) = prompts
                .iter()
                .find(|m| m["event_type"] == "prompt")
                .cloned()
            {
                break prompt;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("prompt never delivered");

    assert_eq!(prompt["type"], "app_state");
    assert_eq!(prompt["payload"]["message"], "pick one");
    assert_eq!(prompt["payload"]["prompt_type"], "input_request");

    let interaction_id =
        InteractionId::parse(prompt["payload"]["id"].as_str().unwrap()).unwrap();
    app.ui_response_sender()
        .send(UiResponseMessage {
            id: interaction_id,
            response: json!("ok"),
        })
        .await
        .unwrap();

    wait_for_termination(&transport).await;
    assert_eq!(nodes.lock().unwrap()[0].result(), Some(json!("ok")));

    app.shutdown().await;
}

#[tokio::test]
async fn test_view_session_initial_replay() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let gate_clone = Arc::clone(&gate);
    let profile = profile_of(move |bus| {
        let make = |name: &str| {
            let gate = Arc::clone(&gate_clone);
            TestCaseBuilder::new(
                name,
                TestCaseBody::from_async(move |_args| {
                    let gate = Arc::clone(&gate);
                    async move {
                        let _permit = gate.acquire().await;
                        Ok(json!(true))
                    }
                }),
            )
            .build(bus)
        };
        vec![make("A"), make("B")]
    });

    let (app, transport, _controller) = start_run(profile).await;

    // both cases announced and in flight
    wait_for(&transport, "both executions", |messages| {
        messages
            .iter()
            .filter(|m| m["event_type"] == "newExecution")
            .count()
            == 2
    })
    .await;

    let viewer = ClientId::new();
    app.connect(viewer).await;

    let replayed = transport.sent_to(viewer);
    assert_eq!(replayed.len(), 2, "one newTC per existing case");
    for message in &replayed {
        assert_eq!(message["type"], "tc_data");
        assert_eq!(message["event_type"], "newTC");
        assert_eq!(message["payload"]["tc_state"], "processing");
        assert!(message["payload"]["executions"].is_object());
    }

    gate.add_permits(2);
    wait_for_termination(&transport).await;

    app.shutdown().await;
}
