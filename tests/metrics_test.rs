//! Tests for metrics emitted by the call layer and the client interceptor.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::convert::Infallible;
use std::sync::Arc;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tonic::service::Interceptor;
use tower::{Layer, ServiceExt, service_fn};

use bifrost::{
    Authentication, BearerTokenAuth, ClientSettings, ComponentId, Extensions, ServerSettings,
    TelemetrySettings, telemetry,
};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Value of `label` on the first series named `name`.
fn label(snapshot: &SnapshotVec, name: &str, label: &str) -> Option<String> {
    snapshot
        .iter()
        .find(|(key, _, _, _)| key.key().name() == name)
        .and_then(|(key, _, _, _)| {
            key.key()
                .labels()
                .find(|l| l.key() == label)
                .map(|l| l.value().to_string())
        })
}

fn bearer_host() -> Extensions {
    Extensions::new().with(
        ComponentId::new("bearertokenauth"),
        Arc::new(BearerTokenAuth::new("s3cret")),
    )
}

/// Send one request through a server compiled from `settings`.
async fn serve_one(settings: &ServerSettings, authorization: Option<&str>) {
    let options = settings
        .to_server_options(&bearer_host(), &TelemetrySettings::new("receiver"))
        .unwrap();
    let handler = service_fn(|_request: http::Request<()>| async {
        Ok::<_, Infallible>(http::Response::new(String::new()))
    });

    let mut request = http::Request::builder().uri("/grpc.health.v1.Health/Check");
    if let Some(value) = authorization {
        request = request.header("authorization", value);
    }
    options
        .layer()
        .layer(handler)
        .oneshot(request.body(()).unwrap())
        .await
        .unwrap();
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn accepted_call_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(serve_one(&ServerSettings::default(), None))
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::SERVER_CALLS_TOTAL), 1);
    assert_eq!(
        counter_total(&snapshot, telemetry::SERVER_REJECTED_CALLS_TOTAL),
        0
    );
    assert!(
        has_histogram(&snapshot, telemetry::SERVER_CALL_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
    assert_eq!(
        label(&snapshot, telemetry::SERVER_CALLS_TOTAL, "status").as_deref(),
        Some("ok")
    );
    assert_eq!(
        label(&snapshot, telemetry::SERVER_CALLS_TOTAL, "component").as_deref(),
        Some("receiver")
    );
    assert_eq!(
        label(&snapshot, telemetry::SERVER_CALLS_TOTAL, "method").as_deref(),
        Some("/grpc.health.v1.Health/Check")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn rejected_call_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let settings = ServerSettings {
        auth: Some(Authentication::new(ComponentId::new("bearertokenauth"))),
        ..Default::default()
    };

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(serve_one(&settings, Some("Bearer nope")))
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_total(&snapshot, telemetry::SERVER_REJECTED_CALLS_TOTAL),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::SERVER_CALLS_TOTAL), 1);
    assert_eq!(
        label(&snapshot, telemetry::SERVER_CALLS_TOTAL, "status").as_deref(),
        Some("unauthenticated")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn authenticated_call_is_not_counted_as_rejected() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let settings = ServerSettings {
        auth: Some(Authentication::new(ComponentId::new("bearertokenauth"))),
        ..Default::default()
    };

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(serve_one(&settings, Some("Bearer s3cret")))
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::SERVER_REJECTED_CALLS_TOTAL),
        0
    );
    assert_eq!(counter_total(&snapshot, telemetry::SERVER_CALLS_TOTAL), 1);
}

#[test]
fn client_calls_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let options = ClientSettings::default()
        .to_dial_options(&bearer_host(), &TelemetrySettings::new("exporter"))
        .unwrap();
    metrics::with_local_recorder(&recorder, || {
        let mut interceptor = options.interceptor();
        for _ in 0..3 {
            interceptor.call(tonic::Request::new(())).unwrap();
        }
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CLIENT_CALLS_TOTAL), 3);
    assert_eq!(
        label(&snapshot, telemetry::CLIENT_CALLS_TOTAL, "component").as_deref(),
        Some("exporter")
    );
}

#[test]
fn no_recorder_is_a_noop() {
    let options = ClientSettings::default()
        .to_dial_options(&bearer_host(), &TelemetrySettings::default())
        .unwrap();
    assert!(options.interceptor().call(tonic::Request::new(())).is_ok());
}
