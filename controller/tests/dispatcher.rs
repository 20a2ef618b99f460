//! Dispatcher scenarios against the in-memory backends, with a scripted
//! invoker loop standing in for a real worker pool.

use serde_json::json;
use std::sync::Arc;
use whisk_controller::activation::Activation;
use whisk_controller::broker::messages::{
    Capacity, HeartbeatMessage, InvocationMessage, InvokerStatus, ResultMessage,
};
use whisk_controller::broker::{MessageBroker, MessageId, STREAM_INVOCATIONS, STREAM_RESULTS};
use whisk_controller::controller::Controller;
use whisk_controller::dispatcher::{InvokeOptions, InvokeOutcome};
use whisk_controller::entity::{Action, Exec, Limits, Namespace, Rule, RuleStatus, Trigger};
use whisk_controller::{Bytes, Error, config, params};

const KIND: &str = "python:3.12";

fn test_namespace(name: &str) -> Namespace {
    Namespace {
        name: name.into(),
        uuid: uuid::Uuid::new_v4(),
        owner: "owner@example.com".into(),
        description: None,
        limits: params::Map::new(),
        auth_uuid: uuid::Uuid::new_v4(),
        auth_key: "secret".into(),
    }
}

fn code_action(namespace: &str, name: &str, timeout: u32) -> Action {
    Action {
        namespace: namespace.into(),
        package: None,
        name: name.into(),
        version: String::new(),
        publish: false,
        exec: Exec::Code {
            kind: KIND.into(),
            main: Some("main".into()),
            binary: false,
            image: None,
        },
        limits: Limits {
            timeout,
            ..Limits::default()
        },
        parameters: params::Map::new(),
        annotations: params::Map::new(),
        code_hash: None,
    }
}

fn healthy_heartbeat(invoker_id: &str) -> HeartbeatMessage {
    HeartbeatMessage {
        invoker_id: invoker_id.into(),
        timestamp: time::OffsetDateTime::now_utc(),
        capacity: Capacity {
            total_memory: 8192,
            available_memory: 4096,
            warm_containers: 1,
            busy_containers: 0,
            prewarm_containers: 1,
            supported_runtimes: vec![KIND.into()],
        },
        status: InvokerStatus::Healthy,
    }
}

async fn setup() -> Controller {
    let controller = Controller::new(&config::Config::default());
    controller.start().await.unwrap();
    controller
        .store()
        .create_namespace(test_namespace("ns1"))
        .await
        .unwrap();
    controller
}

async fn create_action(controller: &Controller, name: &str, timeout: u32) {
    controller
        .store()
        .put_action(
            code_action("ns1", name, timeout),
            Some(Bytes::from_static(b"def main(args): return args")),
            false,
        )
        .await
        .unwrap();
}

/// Consumes the invocation stream and answers with scripted results keyed
/// by action name.
fn spawn_invoker(broker: Arc<dyn MessageBroker>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_id = MessageId::zero();
        loop {
            let Ok(messages) = broker
                .read_blocking(
                    STREAM_INVOCATIONS,
                    &last_id,
                    std::time::Duration::from_millis(100),
                    16,
                )
                .await
            else {
                return;
            };

            for message in messages {
                last_id = message.id.clone();
                let Ok(invocation) = InvocationMessage::from_fields(&message.fields) else {
                    continue;
                };

                let args = invocation.params.as_object().cloned().unwrap_or_default();
                let short_name = invocation
                    .action
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();

                let (success, result) = match short_name.as_str() {
                    "hello" => (true, json!({"greet": args.get("name").cloned().unwrap_or(json!(null))})),
                    "inc" => (
                        true,
                        json!({"v": args.get("v").and_then(|v| v.as_i64()).unwrap_or(0) + 1}),
                    ),
                    "double" => (
                        true,
                        json!({"v": args.get("v").and_then(|v| v.as_i64()).unwrap_or(0) * 2}),
                    ),
                    "fail" => (false, json!({"error": "boom"})),
                    // Echo for fan-out assertions
                    _ => (true, json!({"params": invocation.params})),
                };

                let result = ResultMessage {
                    activation_id: invocation.activation_id,
                    status_code: if success { 200 } else { 502 },
                    response: whisk_controller::activation::Response { success, result },
                    logs: vec![format!("ran {short_name}")],
                    duration: 7,
                    invoker_id: Some("invoker0".into()),
                    annotations: params::Map::new(),
                };
                broker
                    .publish(STREAM_RESULTS, &result.to_fields().unwrap())
                    .await
                    .unwrap();
            }
        }
    })
}

async fn wait_terminal(controller: &Controller, id: &uuid::Uuid) -> Activation {
    for _ in 0..100 {
        if let Ok(record) = controller.store().activation("ns1", id).await {
            if record.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("activation {id} never finalized");
}

#[tokio::test]
async fn blocking_invocation_returns_result() {
    let controller = setup().await;
    let _invoker = spawn_invoker(controller.broker().clone());
    controller
        .registry()
        .apply_heartbeat(healthy_heartbeat("invoker0"));
    create_action(&controller, "hello", 60_000).await;

    let mut body = params::Map::new();
    body.insert("name".into(), json!("pat"));

    let outcome = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "hello",
            body.clone(),
            InvokeOptions {
                blocking: true,
                result_only: true,
                ..Default::default()
            },
            "owner@example.com",
        )
        .await
        .unwrap();

    let InvokeOutcome::Result(result) = outcome else {
        panic!("expected a bare result");
    };
    assert_eq!(result, json!({"greet": "pat"}));

    // The full record shape, via a second call without result_only
    let outcome = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "hello",
            body,
            InvokeOptions {
                blocking: true,
                ..Default::default()
            },
            "owner@example.com",
        )
        .await
        .unwrap();
    let InvokeOutcome::Completed(record) = outcome else {
        panic!("expected a record");
    };
    assert!(record.response.success);
    assert_eq!(record.status_code, 200);
    assert_eq!(record.name, "/ns1/hello");
    assert!(record.end.unwrap() >= record.start);
    assert_eq!(
        record.duration.unwrap(),
        7,
        "invoker-reported duration wins"
    );
    assert_eq!(record.annotations["kind"], json!(KIND));

    controller.shutdown().await;
}

#[tokio::test]
async fn non_blocking_invocation_finalizes_in_background() {
    let controller = setup().await;
    let _invoker = spawn_invoker(controller.broker().clone());
    controller
        .registry()
        .apply_heartbeat(healthy_heartbeat("invoker0"));
    create_action(&controller, "hello", 60_000).await;

    let outcome = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "hello",
            params::Map::new(),
            InvokeOptions::default(),
            "owner@example.com",
        )
        .await
        .unwrap();

    let InvokeOutcome::Accepted { activation_id } = outcome else {
        panic!("expected an accepted handoff");
    };

    // Pending record is visible immediately (write-before-publish)
    assert!(
        controller
            .store()
            .activation("ns1", &activation_id)
            .await
            .is_ok()
    );

    let record = wait_terminal(&controller, &activation_id).await;
    assert!(record.response.success);

    controller.shutdown().await;
}

#[tokio::test]
async fn sequence_chains_components_and_links_causes() {
    let controller = setup().await;
    let _invoker = spawn_invoker(controller.broker().clone());
    controller
        .registry()
        .apply_heartbeat(healthy_heartbeat("invoker0"));
    create_action(&controller, "inc", 60_000).await;
    create_action(&controller, "double", 60_000).await;

    let mut seq = code_action("ns1", "seq", 60_000);
    seq.exec = Exec::Sequence {
        components: vec!["/ns1/inc".parse().unwrap(), "/ns1/double".parse().unwrap()],
    };
    controller
        .store()
        .put_action(seq, None, false)
        .await
        .unwrap();

    let mut body = params::Map::new();
    body.insert("v".into(), json!(3));

    let outcome = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "seq",
            body,
            InvokeOptions {
                blocking: true,
                ..Default::default()
            },
            "owner@example.com",
        )
        .await
        .unwrap();

    let InvokeOutcome::Completed(parent) = outcome else {
        panic!("expected a record");
    };
    assert_eq!(parent.response.result, json!({"v": 8}), "(3 + 1) * 2");
    assert_eq!(parent.cause, None);
    assert_eq!(parent.annotations["kind"], json!("sequence"));

    // Parent logs are the component activation ids, in execution order
    assert_eq!(parent.logs.len(), 2);
    let first: uuid::Uuid = parent.logs[0].parse().unwrap();
    let second: uuid::Uuid = parent.logs[1].parse().unwrap();

    let inc = controller.store().activation("ns1", &first).await.unwrap();
    let double = controller.store().activation("ns1", &second).await.unwrap();
    assert_eq!(inc.name, "/ns1/inc");
    assert_eq!(double.name, "/ns1/double");
    assert_eq!(inc.cause, Some(parent.activation_id));
    assert_eq!(double.cause, Some(parent.activation_id));
    assert!(inc.end.unwrap() <= double.end.unwrap(), "inc finalized first");

    controller.shutdown().await;
}

#[tokio::test]
async fn sequence_stops_at_first_failure() {
    let controller = setup().await;
    let _invoker = spawn_invoker(controller.broker().clone());
    controller
        .registry()
        .apply_heartbeat(healthy_heartbeat("invoker0"));
    create_action(&controller, "fail", 60_000).await;
    create_action(&controller, "inc", 60_000).await;

    let mut seq = code_action("ns1", "seq", 60_000);
    seq.exec = Exec::Sequence {
        components: vec!["/ns1/fail".parse().unwrap(), "/ns1/inc".parse().unwrap()],
    };
    controller
        .store()
        .put_action(seq, None, false)
        .await
        .unwrap();

    let outcome = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "seq",
            params::Map::new(),
            InvokeOptions {
                blocking: true,
                ..Default::default()
            },
            "owner@example.com",
        )
        .await
        .unwrap();

    let InvokeOutcome::Completed(parent) = outcome else {
        panic!("expected a record");
    };
    assert!(!parent.response.success);
    assert_eq!(parent.status_code, 502);
    assert_eq!(parent.logs.len(), 1, "second component never ran");

    controller.shutdown().await;
}

#[tokio::test]
async fn trigger_fans_out_to_active_rules_only() {
    let controller = setup().await;
    let _invoker = spawn_invoker(controller.broker().clone());
    controller
        .registry()
        .apply_heartbeat(healthy_heartbeat("invoker0"));
    create_action(&controller, "echo-a", 60_000).await;
    create_action(&controller, "echo-b", 60_000).await;
    create_action(&controller, "echo-c", 60_000).await;

    let mut trigger = Trigger {
        namespace: "ns1".into(),
        name: "t1".into(),
        version: String::new(),
        publish: false,
        parameters: params::Map::new(),
        annotations: params::Map::new(),
        feed: None,
    };
    trigger.parameters.insert("x".into(), json!(1));
    controller
        .store()
        .put_trigger(trigger, false)
        .await
        .unwrap();

    for (name, action, status) in [
        ("r1", "echo-a", RuleStatus::Active),
        ("r2", "echo-b", RuleStatus::Active),
        ("r3", "echo-c", RuleStatus::Inactive),
    ] {
        controller
            .store()
            .put_rule(
                Rule {
                    namespace: "ns1".into(),
                    name: name.into(),
                    version: String::new(),
                    trigger: "t1".into(),
                    action: action.into(),
                    status,
                },
                false,
            )
            .await
            .unwrap();
    }

    let mut event = params::Map::new();
    event.insert("y".into(), json!(2));

    let activation_ids = controller
        .dispatcher()
        .fire_trigger("ns1", "t1", event, "owner@example.com")
        .await
        .unwrap();
    assert_eq!(activation_ids.len(), 2);

    for id in &activation_ids {
        let record = wait_terminal(&controller, id).await;
        assert!(record.name == "/ns1/echo-a" || record.name == "/ns1/echo-b");
        // Trigger defaults merged under the event payload
        assert_eq!(
            record.response.result["params"],
            json!({"x": 1, "y": 2}),
            "defaults merged with caller params"
        );
    }

    // The inactive rule's action never ran
    let filter = whisk_controller::activation::ActivationFilter {
        name: Some("echo-c".into()),
        limit: 10,
        ..Default::default()
    };
    assert!(
        controller
            .store()
            .list_activations("ns1", &filter)
            .await
            .unwrap()
            .is_empty()
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn blocking_invocation_times_out_without_invoker_response() {
    let controller = setup().await;
    // Healthy invoker in the registry, but nothing consumes the stream
    controller
        .registry()
        .apply_heartbeat(healthy_heartbeat("invoker0"));
    create_action(&controller, "hello", 200).await;

    let started = tokio::time::Instant::now();
    let result = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "hello",
            params::Map::new(),
            InvokeOptions {
                blocking: true,
                ..Default::default()
            },
            "owner@example.com",
        )
        .await;

    let Err(Error::Timeout(activation_id)) = result else {
        panic!("expected a timeout");
    };
    assert!(
        started.elapsed() < std::time::Duration::from_millis(500),
        "unblocked well within the margin"
    );

    let record = controller
        .store()
        .activation("ns1", &activation_id)
        .await
        .unwrap();
    assert_eq!(record.status_code, 504);
    assert!(!record.response.success);
    assert!(
        record.response.result["error"]
            .as_str()
            .unwrap()
            .contains("timed out")
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn no_eligible_invoker_is_service_unavailable() {
    let controller = setup().await;
    create_action(&controller, "hello", 60_000).await;

    let result = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "hello",
            params::Map::new(),
            InvokeOptions {
                blocking: true,
                ..Default::default()
            },
            "owner@example.com",
        )
        .await;
    assert!(matches!(result, Err(Error::ServiceUnavailable(_))));

    // The only activation in the namespace carries the 503
    let filter = whisk_controller::activation::ActivationFilter {
        limit: 10,
        ..Default::default()
    };
    let records = controller
        .store()
        .list_activations("ns1", &filter)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code, 503);
    assert!(!records[0].response.success);

    controller.shutdown().await;
}

#[tokio::test]
async fn unknown_action_has_no_side_effects() {
    let controller = setup().await;

    let result = controller
        .dispatcher()
        .invoke_action(
            "ns1",
            "missing",
            params::Map::new(),
            InvokeOptions::default(),
            "owner@example.com",
        )
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let filter = whisk_controller::activation::ActivationFilter {
        limit: 10,
        ..Default::default()
    };
    assert!(
        controller
            .store()
            .list_activations("ns1", &filter)
            .await
            .unwrap()
            .is_empty()
    );

    controller.shutdown().await;
}
