//! Static bearer-token authenticator.

use std::fmt;
use std::sync::Arc;

use tonic::Status;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

use super::{AuthError, ClientAuthenticator, PerRpcCredentials, ServerAuthenticator};
use crate::extension::Extension;
use crate::interceptor::CallContext;

const AUTHORIZATION: &str = "authorization";
const SCHEME: &str = "Bearer ";

/// Shared-secret authentication through the `authorization` header.
///
/// Usable as both a client and a server authenticator. Clients send
/// `authorization: Bearer <token>`; servers reject any call that does not
/// carry exactly that value.
#[derive(Clone)]
pub struct BearerTokenAuth {
    /// Full `authorization` value, `Bearer <token>`.
    header: String,
    require_transport_security: bool,
}

impl BearerTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            header: format!("{SCHEME}{}", token.into()),
            require_transport_security: false,
        }
    }

    /// Refuse to send the token over a plaintext transport.
    pub fn with_transport_security(mut self, required: bool) -> Self {
        self.require_transport_security = required;
        self
    }
}

// Keep the token out of logs.
impl fmt::Debug for BearerTokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerTokenAuth")
            .field("token", &"<redacted>")
            .field(
                "require_transport_security",
                &self.require_transport_security,
            )
            .finish()
    }
}

impl Extension for BearerTokenAuth {
    fn client_authenticator(self: Arc<Self>) -> Option<Arc<dyn ClientAuthenticator>> {
        Some(self)
    }

    fn server_authenticator(self: Arc<Self>) -> Option<Arc<dyn ServerAuthenticator>> {
        Some(self)
    }
}

impl ClientAuthenticator for BearerTokenAuth {
    fn per_rpc_credentials(&self) -> Result<Arc<dyn PerRpcCredentials>, AuthError> {
        let value: AsciiMetadataValue = self
            .header
            .parse()
            .map_err(|_| AuthError::Credentials("bearer token is not valid ASCII".to_string()))?;
        Ok(Arc::new(BearerCredentials {
            value,
            require_transport_security: self.require_transport_security,
        }))
    }
}

impl ServerAuthenticator for BearerTokenAuth {
    fn authenticate(&self, call: &mut CallContext<'_>) -> Result<(), Status> {
        match call.header(AUTHORIZATION) {
            None => Err(Status::unauthenticated("missing authorization header")),
            Some(value) if constant_time_eq(value.as_bytes(), self.header.as_bytes()) => Ok(()),
            Some(_) => Err(Status::unauthenticated("invalid bearer token")),
        }
    }
}

/// Compares every byte of `expected` whatever `given` holds, so timing does
/// not reveal how much of the token matched.
fn constant_time_eq(given: &[u8], expected: &[u8]) -> bool {
    let mut diff = u8::from(given.len() != expected.len());
    for (i, e) in expected.iter().enumerate() {
        diff |= given.get(i).copied().unwrap_or(!e) ^ e;
    }
    diff == 0
}

struct BearerCredentials {
    value: AsciiMetadataValue,
    require_transport_security: bool,
}

impl PerRpcCredentials for BearerCredentials {
    fn inject(&self, metadata: &mut MetadataMap) -> Result<(), Status> {
        metadata.insert(AUTHORIZATION, self.value.clone());
        Ok(())
    }

    fn require_transport_security(&self) -> bool {
        self.require_transport_security
    }
}
