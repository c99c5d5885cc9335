//! End-to-end delivery scenarios under paused Tokio time.

mod common;

use std::time::Duration;

use common::harness;
use courier_core::app::DeliveryConfig;
use courier_core::domain::{
    AttemptFailure, ErrorKind, EventType, Priority, SettingValue, SubmitOptions, payload,
};
use courier_core::impls::{SimulatedTransport, Step};
use courier_core::queue::QueueDepth;
use serde_json::json;
use tokio::time::Instant;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn within(actual: Duration, nominal_ms: u64) -> bool {
    let lo = ms(nominal_ms * 9 / 10);
    let hi = ms(nominal_ms * 11 / 10);
    actual >= lo && actual <= hi
}

#[tokio::test(start_paused = true)]
async fn server_error_then_timeout_then_success() {
    let transport = SimulatedTransport::scripted([
        Step::Fail(AttemptFailure::http_status(500, "boom")),
        Step::Hang,
        Step::Ok,
    ]);
    let h = harness(DeliveryConfig::default(), transport);

    let handle = h.orchestrator.submit(
        "save-settings",
        payload([("menu_bg", "#ff0000")]),
        SubmitOptions::default(),
    );
    let id = handle.request_id();
    let data = handle.await.expect("delivered on third attempt");
    assert_eq!(data["saved"]["menu_bg"], "#ff0000");

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 3);
    // first retry after ~1s, second ~2s after the 10s timeout expired
    assert!(within(calls[1].at - calls[0].at, 1000), "{:?}", calls[1].at - calls[0].at);
    let second_gap = calls[2].at - calls[1].at - ms(10_000);
    assert!(within(second_gap, 2000), "{second_gap:?}");

    let retrying = h.events_of(EventType::Retrying);
    assert_eq!(retrying.len(), 2);
    assert_eq!(retrying[0].detail["code"], "http_500");
    assert_eq!(retrying[1].detail["code"], "timeout");
    assert_eq!(
        h.events.kinds_for(id),
        vec![
            EventType::Queued,
            EventType::Retrying,
            EventType::Retrying,
            EventType::Succeeded
        ]
    );

    let m = h.orchestrator.metrics();
    assert_eq!(m.transport_calls, 3);
    assert_eq!(m.retries, 2);
    assert_eq!(m.succeeded, 1);
    assert_eq!(m.depth, QueueDepth::default());
}

#[tokio::test(start_paused = true)]
async fn sixth_request_waits_for_a_free_slot() {
    let transport = SimulatedTransport::always_ok().with_latency(ms(100));
    let h = harness(DeliveryConfig::default(), transport);
    let start = Instant::now();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            h.orchestrator.submit(
                "save-settings",
                payload([(format!("key_{i}"), SettingValue::from(i as i64))]),
                SubmitOptions::default(),
            )
        })
        .collect();

    assert_eq!(
        h.orchestrator.depth(),
        QueueDepth {
            pending: 1,
            active: 5,
            retrying: 0
        }
    );

    tokio::time::sleep(ms(50)).await;
    assert_eq!(h.transport.call_count(), 5);

    tokio::time::sleep(ms(100)).await;
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 6);
    assert_eq!(calls[5].at - start, ms(100));

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn newer_value_for_same_key_supersedes_older() {
    let h = harness(DeliveryConfig::default(), SimulatedTransport::always_ok());

    let white = h.orchestrator.submit("save-settings", payload([("menu_bg", "#fff")]), SubmitOptions::default());
    let black = h.orchestrator.submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default());
    let white_id = white.request_id();

    let black_result = black.await.unwrap();
    let white_result = white.await.unwrap();
    assert_eq!(white_result, black_result);

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["menu_bg"], SettingValue::from("#000"));
    assert_eq!(h.events.kinds_for(white_id), vec![EventType::Queued, EventType::Superseded]);
    assert_eq!(h.orchestrator.metrics().superseded, 1);
}

#[tokio::test(start_paused = true)]
async fn pending_save_is_superseded_while_endpoint_is_busy() {
    let config = DeliveryConfig {
        max_concurrent: 1,
        ..DeliveryConfig::default()
    };
    let h = harness(config, SimulatedTransport::always_ok().with_latency(ms(300)));

    let blocker = h.orchestrator.submit("load-settings", payload([("scope", "all")]), SubmitOptions::default());
    let white = h.orchestrator.submit("save-settings", payload([("menu_bg", "#fff")]), SubmitOptions::default());
    tokio::time::sleep(ms(200)).await;
    let black = h.orchestrator.submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default());

    blocker.await.unwrap();
    let black_result = black.await.unwrap();
    assert_eq!(white.await.unwrap(), black_result);

    let menu_calls: Vec<_> = h
        .transport
        .calls()
        .into_iter()
        .filter(|c| c.payload.contains_key("menu_bg"))
        .collect();
    assert_eq!(menu_calls.len(), 1);
    assert_eq!(menu_calls[0].payload["menu_bg"], SettingValue::from("#000"));
}

#[tokio::test(start_paused = true)]
async fn partial_overlap_drops_the_older_save() {
    let config = DeliveryConfig {
        max_concurrent: 1,
        ..DeliveryConfig::default()
    };
    let h = harness(config, SimulatedTransport::always_ok().with_latency(ms(300)));

    let blocker = h.orchestrator.submit("load-settings", payload([("scope", "all")]), SubmitOptions::default());
    let older = h.orchestrator.submit(
        "save-settings",
        payload([("menu_bg", "#fff"), ("menu_fg", "#111")]),
        SubmitOptions::default(),
    );
    let newer = h.orchestrator.submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default());

    blocker.await.unwrap();
    let newer_result = newer.await.unwrap();
    assert_eq!(older.await.unwrap(), newer_result);

    let saves: Vec<_> = h
        .transport
        .calls()
        .into_iter()
        .filter(|c| c.action.as_str() == "save-settings")
        .collect();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].payload, payload([("menu_bg", "#000")]));
    assert_eq!(h.orchestrator.metrics().superseded, 1);
}

#[tokio::test(start_paused = true)]
async fn idle_endpoint_delivers_each_save_in_turn() {
    let h = harness(DeliveryConfig::default(), SimulatedTransport::always_ok().with_latency(ms(50)));

    h.orchestrator
        .submit("save-settings", payload([("menu_bg", "#fff")]), SubmitOptions::default())
        .await
        .unwrap();
    h.orchestrator
        .submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default())
        .await
        .unwrap();

    let sent: Vec<_> = h.transport.calls().into_iter().map(|c| c.payload["menu_bg"].clone()).collect();
    assert_eq!(sent, vec![SettingValue::from("#fff"), SettingValue::from("#000")]);
    assert_eq!(h.orchestrator.metrics().superseded, 0);
}

#[tokio::test(start_paused = true)]
async fn partial_overlap_is_merged_when_enabled() {
    let config = DeliveryConfig {
        max_concurrent: 1,
        merge_partial_overlaps: true,
        ..DeliveryConfig::default()
    };
    let h = harness(config, SimulatedTransport::always_ok().with_latency(ms(50)));

    let _blocker = h.orchestrator.submit("load-settings", payload([("scope", "all")]), SubmitOptions::default());
    let older = h.orchestrator.submit(
        "save-settings",
        payload([("menu_bg", "#fff"), ("menu_fg", "#111")]),
        SubmitOptions::default(),
    );
    let newer = h.orchestrator.submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default());

    let merged = newer.await.unwrap();
    assert_eq!(older.await.unwrap(), merged);
    assert_eq!(merged["saved"], json!({"menu_bg": "#000", "menu_fg": "#111"}));
}

#[tokio::test(start_paused = true)]
async fn identical_requests_collapse_into_one_call() {
    let h = harness(DeliveryConfig::default(), SimulatedTransport::always_ok().with_latency(ms(20)));

    let a = h.orchestrator.submit("load-settings", payload([("scope", "menu")]), SubmitOptions::default());
    let b = h.orchestrator.submit("load-settings", payload([("scope", "menu")]), SubmitOptions::default());
    assert_eq!(a.request_id(), b.request_id());

    let (ra, rb) = tokio::join!(a, b);
    assert_eq!(ra.unwrap(), rb.unwrap());
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.events_of(EventType::Deduplicated).len(), 1);

    // settled inside the window: served from the cached outcome
    let c = h.orchestrator.submit("load-settings", payload([("scope", "menu")]), SubmitOptions::default());
    c.await.unwrap();
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.orchestrator.metrics().deduplicated, 2);
}

#[tokio::test(start_paused = true)]
async fn retries_exhaust_after_three_calls() {
    let transport = SimulatedTransport::scripted([
        Step::Fail(AttemptFailure::http_status(503, "down")),
        Step::Fail(AttemptFailure::http_status(503, "down")),
        Step::Fail(AttemptFailure::http_status(503, "still down")),
    ]);
    let h = harness(DeliveryConfig::default(), transport);

    let handle = h.orchestrator.submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default());
    let id = handle.request_id();
    let err = handle.await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.attempts, 3);
    assert_eq!(err.last_error_code.as_deref(), Some("http_503"));
    assert_eq!(err.message, "still down");
    assert_eq!(err.history.len(), 3);
    assert_eq!(h.transport.call_count(), 3);

    let kinds = h.events.kinds_for(id);
    assert_eq!(kinds.iter().filter(|k| k.is_terminal()).count(), 1);
    assert_eq!(kinds.last(), Some(&EventType::Failed));
    assert_eq!(h.events_of(EventType::Retrying).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn client_error_is_not_retried() {
    let transport = SimulatedTransport::scripted([Step::Fail(AttemptFailure::http_status(400, "bad key"))]);
    let h = harness(DeliveryConfig::default(), transport);

    let err = h
        .orchestrator
        .submit("save-settings", payload([("menu_bg", "nope")]), SubmitOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Client);
    assert_eq!(err.attempts, 1);
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_hint_sets_the_delay() {
    let transport = SimulatedTransport::scripted([Step::Fail(
        AttemptFailure::http_status(429, "slow down").with_retry_after(ms(4500)),
    )]);
    let h = harness(DeliveryConfig::default(), transport);

    h.orchestrator
        .submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default())
        .await
        .unwrap();
    let calls = h.transport.calls();
    assert_eq!(calls[1].at - calls[0].at, ms(4500));
}

#[tokio::test(start_paused = true)]
async fn priority_order_behind_a_busy_slot() {
    let config = DeliveryConfig {
        max_concurrent: 1,
        ..DeliveryConfig::default()
    };
    let h = harness(config, SimulatedTransport::always_ok().with_latency(ms(10)));

    let mut handles = vec![h.orchestrator.submit("load-settings", payload([("scope", "all")]), SubmitOptions::default())];
    for (name, priority) in [("low", Priority::Low), ("normal", Priority::Normal), ("high", Priority::High)] {
        handles.push(h.orchestrator.submit(
            "load-settings",
            payload([("scope", name)]),
            SubmitOptions::default().priority(priority),
        ));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let order: Vec<_> = h
        .transport
        .calls()
        .into_iter()
        .map(|c| c.payload["scope"].clone())
        .collect();
    assert_eq!(
        order,
        ["all", "high", "normal", "low"].map(SettingValue::from).to_vec()
    );
}

#[tokio::test(start_paused = true)]
async fn full_queue_rejects_immediately() {
    let config = DeliveryConfig {
        max_concurrent: 1,
        max_queue_size: 2,
        ..DeliveryConfig::default()
    };
    let h = harness(config, SimulatedTransport::always_ok().with_latency(ms(100)));

    let a = h.orchestrator.submit("load-settings", payload([("n", "1")]), SubmitOptions::default());
    let b = h.orchestrator.submit("load-settings", payload([("n", "2")]), SubmitOptions::default());
    let err = h
        .orchestrator
        .submit("load-settings", payload([("n", "3")]), SubmitOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);

    a.await.unwrap();
    b.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_action_is_invalid() {
    let h = harness(DeliveryConfig::default(), SimulatedTransport::always_ok());
    let err = h
        .orchestrator
        .submit("  ", payload([("menu_bg", "#000")]), SubmitOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn snapshot_failures_do_not_stop_delivery() {
    let h = harness(DeliveryConfig::default(), SimulatedTransport::always_ok());
    h.store.fail_saves(true);

    h.orchestrator
        .submit("save-settings", payload([("menu_bg", "#000")]), SubmitOptions::default())
        .await
        .unwrap();
    h.orchestrator.flush().await;
    assert_eq!(h.store.save_count(), 0);
}
