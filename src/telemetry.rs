//! Telemetry handle and metric name constants.
//!
//! Hosts pass a [`TelemetrySettings`] into the option compilers; bifrost
//! does not inspect it beyond using its component name as a metric label and
//! its span as the parent of per-call spans. Consumers install their own
//! `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `bifrost_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `component` — name of the host component that owns the client or server
//! - `method` — full gRPC method path (e.g. "/grpc.health.v1.Health/Check")
//! - `status` — gRPC status code name (e.g. "ok", "unauthenticated")

use tracing::Span;

/// Total inbound calls handled by a compiled server.
///
/// Labels: `component`, `method`, `status`.
pub const SERVER_CALLS_TOTAL: &str = "bifrost_server_calls_total";

/// Inbound call duration in seconds, up to the response headers.
///
/// Labels: `component`, `method`.
pub const SERVER_CALL_DURATION_SECONDS: &str = "bifrost_server_call_duration_seconds";

/// Total inbound calls rejected by an interceptor before dispatch.
///
/// Labels: `component`, `method`.
pub const SERVER_REJECTED_CALLS_TOTAL: &str = "bifrost_server_rejected_calls_total";

/// Total outgoing calls made through a compiled client.
///
/// Labels: `component`.
pub const CLIENT_CALLS_TOTAL: &str = "bifrost_client_calls_total";

/// Instrumentation context handed to the option compilers.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// Value of the `component` metric label.
    pub component: String,
    /// Parent of every per-call span.
    pub span: Span,
}

impl TelemetrySettings {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            span: Span::current(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self::new("bifrost")
    }
}
