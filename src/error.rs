//! Bifrost error types

use std::io;

use crate::auth::AuthError;
use crate::extension::ComponentId;
use crate::net::Transport;
use crate::tls::TlsError;

/// Bifrost error types
///
/// Compilation of client or server options fails atomically: the first error
/// is returned and no partial option list is produced.
#[derive(Debug, thiserror::Error)]
pub enum BifrostError {
    // Transport security
    #[error("failed to load TLS config: {0}")]
    TlsConfig(#[from] TlsError),

    // Client settings
    #[error("invalid balancer_name: {0}")]
    InvalidBalancerName(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    // Authentication
    /// The host does not expose an extension registry at all.
    #[error("no extensions configuration available")]
    NoExtensionsAvailable,

    /// The authenticator reference could not be turned into a usable authenticator.
    #[error("failed to resolve authenticator \"{id}\": {source}")]
    Authenticator {
        id: ComponentId,
        #[source]
        source: AuthError,
    },

    #[error("authenticator \"{0}\" requires transport security, but the client is insecure")]
    CredentialsRequireTransportSecurity(ComponentId),

    // Network
    #[error("failed to listen on {transport} endpoint {endpoint:?}: {source}")]
    ListenerBind {
        transport: Transport,
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BifrostError {
    /// The authenticator failure behind this error, if any.
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            BifrostError::Authenticator { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for Bifrost operations
pub type Result<T> = std::result::Result<T, BifrostError>;
