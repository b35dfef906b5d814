//! Tower layer that runs the interceptor chain for every inbound call.
//!
//! Rejected calls never reach the service: they are answered with a
//! trailers-only gRPC response carrying the interceptor's status.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use tonic::{Code, Status};
use tower::{Layer, Service};
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::interceptor::{CallContext, InterceptorChain};
use crate::telemetry::{self, TelemetrySettings};

const GRPC_STATUS: &str = "grpc-status";

/// Installs a [`CallService`] around the server's routes.
#[derive(Debug, Clone)]
pub struct CallLayer {
    chain: InterceptorChain,
    component: Arc<str>,
    span: Span,
}

impl CallLayer {
    pub fn new(chain: InterceptorChain, telemetry: TelemetrySettings) -> Self {
        Self {
            chain,
            component: telemetry.component.into(),
            span: telemetry.span,
        }
    }
}

impl<S> Layer<S> for CallLayer {
    type Service = CallService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallService {
            inner,
            chain: self.chain.clone(),
            component: self.component.clone(),
            span: self.span.clone(),
        }
    }
}

/// Runs the interceptor chain, then the wrapped service, inside a
/// per-call `grpc.server` span.
#[derive(Debug, Clone)]
pub struct CallService<S> {
    inner: S,
    chain: InterceptorChain,
    component: Arc<str>,
    span: Span,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for CallService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let start = Instant::now();
        let (mut parts, body) = request.into_parts();
        let method = parts.uri.path().to_string();
        let component = self.component.clone();
        let span = info_span!(
            parent: &self.span,
            "grpc.server",
            method = %method,
            component = %component,
        );

        let verdict = span.in_scope(|| self.chain.run(&mut CallContext::new(&mut parts)));
        if let Err(status) = verdict {
            span.in_scope(|| debug!(code = ?status.code(), message = status.message(), "call rejected"));
            metrics::counter!(telemetry::SERVER_REJECTED_CALLS_TOTAL,
                "component" => component.to_string(),
                "method" => method.clone(),
            )
            .increment(1);
            record_call(&component, method, status.code(), start);
            return Box::pin(async move { Ok(rejection(status)) });
        }

        let request = http::Request::from_parts(parts, body);
        Box::pin(
            async move {
                let result = inner.call(request).await;
                let code = match &result {
                    Ok(response) => response_code(response),
                    Err(_) => Code::Internal,
                };
                record_call(&component, method, code, start);
                result
            }
            .instrument(span),
        )
    }
}

/// Trailers-only response carrying `status`.
fn rejection<B: Default>(status: Status) -> http::Response<B> {
    let mut response = http::Response::new(B::default());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    if let Err(e) = status.add_header(headers) {
        warn!(error = %e, "failed to encode rejection status");
        headers.insert(GRPC_STATUS, HeaderValue::from(Code::Internal as i32));
    }
    response
}

/// Status visible when the response headers are sent; calls that fail
/// later report it in trailers and count as `ok` here.
fn response_code<B>(response: &http::Response<B>) -> Code {
    response
        .headers()
        .get(GRPC_STATUS)
        .map(|v| Code::from_bytes(v.as_bytes()))
        .unwrap_or(Code::Ok)
}

fn record_call(component: &str, method: String, code: Code, start: Instant) {
    metrics::counter!(telemetry::SERVER_CALLS_TOTAL,
        "component" => component.to_owned(),
        "method" => method.clone(),
        "status" => code_name(code),
    )
    .increment(1);
    metrics::histogram!(telemetry::SERVER_CALL_DURATION_SECONDS,
        "component" => component.to_owned(),
        "method" => method,
    )
    .record(start.elapsed().as_secs_f64());
}

fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "cancelled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}
