//! Authenticator resolution.
//!
//! Settings refer to authenticators indirectly, by [`ComponentId`]. At
//! compile time the id is looked up in the host's extension registry and
//! the entry is checked for the capability the caller needs:
//!
//! - clients need a [`ClientAuthenticator`], which hands out
//!   [`PerRpcCredentials`] attached to every outgoing call;
//! - servers need a [`ServerAuthenticator`], which validates every inbound
//!   call before dispatch.
//!
//! # Resolution failures
//!
//! ```text
//! host.extensions() == None        → BifrostError::NoExtensionsAvailable
//! id not registered                → AuthError::NotFound
//! registered, capability missing   → AuthError::WrongCapability
//! ```
//!
//! The last two are wrapped in [`BifrostError::Authenticator`] naming the id.

mod bearer;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::extension::{ComponentId, Extension, Host};
use crate::interceptor::{CallContext, ServerInterceptor};
use crate::{BifrostError, Result};

pub use bearer::BearerTokenAuth;

/// Why an authenticator reference could not be used.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authenticator not found")]
    NotFound,

    #[error("requested authenticator is not a {0} authenticator")]
    WrongCapability(Capability),

    #[error("failed to obtain per-RPC credentials: {0}")]
    Credentials(String),
}

/// Authenticator capability requested from an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Client,
    Server,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Client => f.write_str("client"),
            Capability::Server => f.write_str("server"),
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Authentication material attached to each outgoing call.
///
/// Invoked once per call, including calls made after a reconnect.
pub trait PerRpcCredentials: Send + Sync {
    /// Add authentication metadata to an outgoing call.
    fn inject(&self, metadata: &mut MetadataMap) -> std::result::Result<(), Status>;

    /// Whether these credentials may only travel over an encrypted transport.
    fn require_transport_security(&self) -> bool;
}

/// Client-side authenticator capability.
pub trait ClientAuthenticator: Send + Sync {
    fn per_rpc_credentials(&self) -> std::result::Result<Arc<dyn PerRpcCredentials>, AuthError>;
}

/// Server-side authenticator capability.
pub trait ServerAuthenticator: Send + Sync {
    /// Validate an inbound call. Returning an error rejects the call.
    fn authenticate(&self, call: &mut CallContext<'_>) -> std::result::Result<(), Status>;
}

// ============================================================================
// Resolution
// ============================================================================

/// Reference to an authenticator registered with the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Authentication {
    pub authenticator: ComponentId,
}

impl Authentication {
    pub fn new(authenticator: ComponentId) -> Self {
        Self { authenticator }
    }

    /// Resolve the reference to a client authenticator.
    pub fn client_authenticator(&self, host: &dyn Host) -> Result<Arc<dyn ClientAuthenticator>> {
        self.lookup(host)?
            .client_authenticator()
            .ok_or_else(|| self.error(AuthError::WrongCapability(Capability::Client)))
    }

    /// Resolve the reference to a server authenticator.
    pub fn server_authenticator(&self, host: &dyn Host) -> Result<Arc<dyn ServerAuthenticator>> {
        self.lookup(host)?
            .server_authenticator()
            .ok_or_else(|| self.error(AuthError::WrongCapability(Capability::Server)))
    }

    /// Resolve the reference to the per-call credentials of its client authenticator.
    pub fn per_rpc_credentials(&self, host: &dyn Host) -> Result<Arc<dyn PerRpcCredentials>> {
        self.client_authenticator(host)?
            .per_rpc_credentials()
            .map_err(|e| self.error(e))
    }

    /// Resolve the reference to an interceptor that authenticates inbound calls.
    pub fn server_interceptor(&self, host: &dyn Host) -> Result<Arc<dyn ServerInterceptor>> {
        let authenticator = self.server_authenticator(host)?;
        Ok(Arc::new(AuthInterceptor { authenticator }))
    }

    fn lookup(&self, host: &dyn Host) -> Result<Arc<dyn Extension>> {
        let extensions = host
            .extensions()
            .ok_or(BifrostError::NoExtensionsAvailable)?;
        extensions
            .get(&self.authenticator)
            .ok_or_else(|| self.error(AuthError::NotFound))
    }

    fn error(&self, source: AuthError) -> BifrostError {
        BifrostError::Authenticator {
            id: self.authenticator.clone(),
            source,
        }
    }
}

/// Runs a [`ServerAuthenticator`] as part of the server interceptor chain.
struct AuthInterceptor {
    authenticator: Arc<dyn ServerAuthenticator>,
}

impl ServerInterceptor for AuthInterceptor {
    fn intercept(&self, call: &mut CallContext<'_>) -> std::result::Result<(), Status> {
        self.authenticator.authenticate(call)
    }
}
