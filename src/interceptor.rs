//! Server call interceptors.
//!
//! An interceptor sees every inbound call before it is dispatched to the
//! service handler. It may enrich the call's request-scoped state (the HTTP
//! request extensions, which tonic hands to handlers as
//! [`tonic::Request::extensions`]) or reject the call with a [`Status`].
//!
//! tonic routes unary and streaming calls through the same HTTP/2 service, so
//! a single chain covers both call kinds. For streaming calls the enriched
//! extensions stay attached to the `Request<Streaming<_>>` for the whole
//! lifetime of the call.

use std::fmt;
use std::sync::Arc;

use http::request::Parts;
use http::{Extensions, HeaderMap};
use tonic::Status;

use crate::identity::ClientInfo;

/// Request-scoped view of an inbound call.
pub struct CallContext<'a> {
    parts: &'a mut Parts,
}

impl<'a> CallContext<'a> {
    pub fn new(parts: &'a mut Parts) -> Self {
        Self { parts }
    }

    /// Full gRPC method path, e.g. `/grpc.health.v1.Health/Check`.
    pub fn method(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// A request header as text; `None` if absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// Caller identity recorded so far (empty if none).
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo::from_extensions(&self.parts.extensions)
    }
}

/// Hook run for every inbound call before dispatch.
pub trait ServerInterceptor: Send + Sync + 'static {
    fn intercept(&self, call: &mut CallContext<'_>) -> Result<(), Status>;
}

/// Ordered interceptors; the first rejection stops the chain.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn ServerInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn ServerInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run every interceptor in order.
    pub fn run(&self, call: &mut CallContext<'_>) -> Result<(), Status> {
        self.interceptors
            .iter()
            .try_for_each(|interceptor| interceptor.intercept(call))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
