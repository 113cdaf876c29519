//! End-to-end lifecycle scenarios against a live store.
//!
//! Every test connects to the store named by `REDIS_URL` (default
//! `redis://127.0.0.1:6379`) and skips with a message when it is not
//! reachable. The harness arms `notify-keyspace-events` itself, so a
//! stock store works.

use action_engine::{
    Action, ActionConfiguration, ActionStatus, Engine, EngineConfig, EngineError, Environment,
    StoreClient,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn store_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Connect to the test store, arming keyspace notifications; `None`
/// skips the test when no store is reachable.
async fn connect_store() -> Option<StoreClient> {
    match StoreClient::connect(&store_url(), 0).await {
        Ok(store) => {
            store
                .config_set("notify-keyspace-events", "AKE")
                .await
                .expect("could not arm keyspace notifications");
            Some(store)
        }
        Err(e) => {
            eprintln!("Skipping integration test (store not available): {e}");
            None
        }
    }
}

/// An engine with a unique default queue so tests do not contend.
fn test_engine(label: &str) -> Engine {
    let queue = format!("TestQueue:{}:{}", label, Uuid::now_v7().simple());
    Engine::new(
        EngineConfig::new()
            .with_store_url(store_url())
            .with_engine_name(format!("TestEngine:{label}"))
            .with_default_queue(queue)
            .with_environment(Environment::Testing),
    )
    .expect("engine construction")
}

fn configuration(action_name: &str, signature: &[&str]) -> ActionConfiguration {
    ActionConfiguration {
        action_name: action_name.to_string(),
        action_signature: signature.iter().map(|s| s.to_string()).collect(),
        action_alternative_signature: None,
        argument_configuration_by_argument_name: HashMap::new(),
        context_name: "Self".to_string(),
        file_path: "tests/action_lifecycle.rs".to_string(),
        method_name: action_name.to_string(),
        event_name: None,
        action_name_to_extend: None,
    }
}

fn message(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn poll_status(store: &StoreClient, key: &str, expected: ActionStatus) -> bool {
    for _ in 0..100 {
        if let Ok(Some(raw)) = store.hash_get_field(key, "status").await {
            if raw.parse::<ActionStatus>() == Ok(expected) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn simple_call_resolves_and_completes_the_hash() {
    let Some(store) = connect_store().await else {
        return;
    };

    let engine = test_engine("simple");
    engine.register_handler_fn("ExecuteSimpleDummy", |_context, _arguments| async {
        Ok(json!({"AID": "x"}))
    });
    engine
        .store_action_configuration(&configuration("ExecuteSimpleDummy", &[]))
        .await
        .unwrap();

    // Known id up front so the per-action status channel can be watched
    let action = Action::new("ExecuteSimpleDummy", Map::new(), engine.origin(), "u1");
    let action_key = action.key();
    let status_channel = format!("Action:{}", action.id());

    let mut events = engine.subscribe_events();
    engine
        .subscribe_to_event_channel_by_name(&status_channel)
        .await
        .unwrap();

    let queue = engine.config().default_queue_name.clone();
    engine
        .publish_action_to_queue_by_name(&queue, action)
        .await
        .unwrap();

    // A status event is emitted on the per-action channel
    let received = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("status event")
        .unwrap();
    assert_eq!(received.channel, status_channel);
    assert_eq!(received.event.name(), "ActionStatusUpdated");
    assert_eq!(received.event.message()["action_status"], "completed");
    assert_eq!(received.event.message()["action_final_message"]["AID"], "x");

    assert!(poll_status(&store, &action_key, ActionStatus::Completed).await);

    // The hash carries a TTL from its last write
    let ttl = store.time_to_live_ms(&action_key).await.unwrap();
    assert!(ttl > 0 && ttl <= 3_600_000);

    engine.destroy().await;
}

#[tokio::test]
async fn publish_and_await_resolves_with_the_final_message() {
    if connect_store().await.is_none() {
        return;
    }

    let engine = test_engine("await");
    engine.register_handler_fn(
        "ExecuteSimpleDummyWithArguments",
        |_context, arguments| async move {
            Ok(json!({"AID1": arguments[0], "AID2": arguments[1]}))
        },
    );

    let mut config = configuration("ExecuteSimpleDummyWithArguments", &["AID1", "AID2"]);
    config.argument_configuration_by_argument_name = HashMap::from([
        ("AID1".to_string(), "string".to_string()),
        ("AID2".to_string(), "string".to_string()),
    ]);
    engine.store_action_configuration(&config).await.unwrap();

    let final_message = engine
        .publish_action_by_name_and_handle_response(
            "ExecuteSimpleDummyWithArguments",
            message(&[("AID1", json!("a")), ("AID2", json!("b"))]),
            "u1",
        )
        .await
        .unwrap();

    assert_eq!(final_message["AID1"], "a");
    assert_eq!(final_message["AID2"], "b");

    engine.destroy().await;
}

#[tokio::test]
async fn missing_argument_rejects_and_fails_the_hash() {
    let Some(store) = connect_store().await else {
        return;
    };

    let engine = test_engine("missing-arg");
    engine.register_handler_fn(
        "ExecuteSimpleDummyWithArguments",
        |_context, arguments| async move {
            Ok(json!({"AID1": arguments[0], "AID2": arguments[1]}))
        },
    );
    engine
        .store_action_configuration(&configuration(
            "ExecuteSimpleDummyWithArguments",
            &["AID1", "AID2"],
        ))
        .await
        .unwrap();

    let error = engine
        .publish_action_by_name_and_handle_response(
            "ExecuteSimpleDummyWithArguments",
            message(&[("AID1", json!("a"))]),
            "u1",
        )
        .await
        .unwrap_err();
    assert!(matches!(error, EngineError::UndefinedContext(_)));

    // The failure is persisted into the action hash before the reject
    let action = Action::new(
        "ExecuteSimpleDummyWithArguments",
        message(&[("AID1", json!("a"))]),
        engine.origin(),
        "u1",
    );
    let action_key = action.key();
    let queue = engine.config().default_queue_name.clone();
    engine
        .publish_action_to_queue_by_name(&queue, action)
        .await
        .unwrap();

    assert!(poll_status(&store, &action_key, ActionStatus::Failed).await);
    let final_message = store
        .hash_get_field(&action_key, "final_message")
        .await
        .unwrap()
        .unwrap();
    let final_message: Value = serde_json::from_str(&final_message).unwrap();
    assert_eq!(final_message["error"]["kind"], "undefined_context");

    engine.destroy().await;
}

#[tokio::test]
async fn alternative_signature_is_selected() {
    if connect_store().await.is_none() {
        return;
    }

    let engine = test_engine("alt-signature");
    engine.register_handler_fn(
        "ExecuteSimpleDummyWithComplexSignature",
        |_context, arguments| async move {
            Ok(json!({"AID1": arguments[0], "AID3": arguments[1]}))
        },
    );

    let mut config = configuration(
        "ExecuteSimpleDummyWithComplexSignature",
        &["AID1", "AID2"],
    );
    config.action_alternative_signature =
        Some(vec!["AID1".to_string(), "AID3".to_string()]);
    engine.store_action_configuration(&config).await.unwrap();

    let final_message = engine
        .publish_action_by_name_and_handle_response(
            "ExecuteSimpleDummyWithComplexSignature",
            message(&[("AID1", json!("a")), ("AID3", json!([true]))]),
            "u1",
        )
        .await
        .unwrap();

    assert_eq!(final_message["AID1"], "a");
    assert_eq!(final_message["AID3"], json!([true]));

    engine.destroy().await;
}

#[tokio::test]
async fn events_fan_out_and_retention_index_is_trimmed() {
    let Some(store) = connect_store().await else {
        return;
    };

    let publisher = test_engine("event-pub");
    let subscriber = test_engine("event-sub");

    let channel = format!("room:{}", Uuid::now_v7().simple());
    let mut received = subscriber.subscribe_events();
    subscriber
        .subscribe_to_event_channel_by_name(&channel)
        .await
        .unwrap();

    // A stale retention entry is removed by the next publish
    publisher.await_ready().await.unwrap();
    let stale_score = (chrono::Utc::now().timestamp_millis() - 60_000) as f64;
    store
        .sorted_set_add(&channel, "Event:Stale:0", stale_score)
        .await
        .unwrap();

    let event = action_engine::Event::new(
        "RoomEntered",
        json!({"room": "lobby"}),
        publisher.origin(),
    );
    let event_key = event.key();
    let created_ms = event.meta().created_at.timestamp_millis();
    publisher
        .publish_event_to_channel_by_name(&channel, event)
        .await
        .unwrap();

    // The concurrent subscriber observes the event on the channel
    let channel_event = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("published event")
        .unwrap();
    assert_eq!(channel_event.channel, channel);
    assert_eq!(channel_event.event.name(), "RoomEntered");
    assert_eq!(channel_event.event.message()["room"], "lobby");

    // The event hash exists with a TTL
    let stored = store.hash_get_all(&event_key).await.unwrap();
    assert_eq!(stored.get("name").map(String::as_str), Some("RoomEntered"));
    assert!(store.time_to_live_ms(&event_key).await.unwrap() > 0);

    // Retention index: score is publish-time plus five minutes, stale
    // entries are gone
    let members = store.sorted_set_members(&channel).await.unwrap();
    assert!(!members.iter().any(|(member, _)| member == "Event:Stale:0"));
    let (_, score) = members
        .iter()
        .find(|(member, _)| member == &event_key)
        .expect("retention entry");
    assert_eq!(*score as i64, created_ms + 300_000);

    publisher.destroy().await;
    subscriber.destroy().await;
}

#[tokio::test]
async fn queue_binding_invariant_holds_for_stored_configurations() {
    if connect_store().await.is_none() {
        return;
    }

    let engine = test_engine("invariant");
    engine.await_ready().await.unwrap();
    engine
        .store_action_configuration(&configuration("InvariantDummy", &[]))
        .await
        .unwrap();

    // Every stored action name maps to a queue in the registered set
    let store = StoreClient::connect(&store_url(), 0).await.unwrap();
    let queue = store
        .hash_get_field("ActionQueueNameByActionName", "InvariantDummy")
        .await
        .unwrap()
        .expect("queue binding");
    assert_eq!(queue, engine.config().default_queue_name);
    assert!(store
        .set_is_member("ActionQueueNameSet", &queue)
        .await
        .unwrap());

    engine.destroy().await;
}

#[tokio::test]
async fn enqueue_onto_unregistered_queue_fails_undefined_context() {
    if connect_store().await.is_none() {
        return;
    }

    let engine = test_engine("unregistered-queue");
    let action = Action::new("AnyAction", Map::new(), engine.origin(), "u1");
    let error = engine
        .publish_action_to_queue_by_name("NoSuchQueue", action)
        .await
        .unwrap_err();
    assert!(matches!(error, EngineError::UndefinedContext(_)));

    engine.destroy().await;
}

#[tokio::test]
async fn queue_subscription_is_idempotent() {
    if connect_store().await.is_none() {
        return;
    }

    let engine = test_engine("idempotent-sub");
    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    engine.register_handler_fn("CountingDummy", move |_context, _arguments| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"counted": true}))
        }
    });
    engine
        .store_action_configuration(&configuration("CountingDummy", &[]))
        .await
        .unwrap();

    // A second installation must not produce a second consumer
    let queue = engine.config().default_queue_name.clone();
    engine.subscribe_to_action_queue_update(&queue).await.unwrap();
    engine.subscribe_to_action_queue_update(&queue).await.unwrap();

    engine
        .publish_action_by_name_and_handle_response("CountingDummy", Map::new(), "u1")
        .await
        .unwrap();

    // Allow any duplicate retrieval to surface before counting
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    engine.destroy().await;
}
