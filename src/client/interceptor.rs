//! Per-call client interceptor.

use std::fmt;
use std::sync::Arc;

use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::auth::PerRpcCredentials;
use crate::telemetry;

/// Attaches configured headers and per-RPC credentials to every outgoing call.
///
/// Runs once per call, so credentials are re-applied after a reconnect.
#[derive(Clone)]
pub struct ClientInterceptor {
    headers: Arc<[(AsciiMetadataKey, AsciiMetadataValue)]>,
    credentials: Option<Arc<dyn PerRpcCredentials>>,
    component: Arc<str>,
}

impl ClientInterceptor {
    pub(super) fn new(
        headers: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
        credentials: Option<Arc<dyn PerRpcCredentials>>,
        component: String,
    ) -> Self {
        Self {
            headers: headers.into(),
            credentials,
            component: component.into(),
        }
    }
}

impl Interceptor for ClientInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        for (key, value) in self.headers.iter() {
            metadata.insert(key.clone(), value.clone());
        }
        // Credentials go last so configured headers cannot override them.
        if let Some(credentials) = &self.credentials {
            credentials.inject(metadata)?;
        }

        metrics::counter!(telemetry::CLIENT_CALLS_TOTAL,
            "component" => self.component.to_string(),
        )
        .increment(1);
        Ok(request)
    }
}

impl fmt::Debug for ClientInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<_> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ClientInterceptor")
            .field("headers", &headers)
            .field("credentials", &self.credentials.is_some())
            .field("component", &self.component)
            .finish()
    }
}
