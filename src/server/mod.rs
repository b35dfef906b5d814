//! gRPC server settings, their compilation into server options, and the
//! listener factory.
//!
//! ```rust,no_run
//! use bifrost::extension::NopHost;
//! use bifrost::server::ServerSettings;
//! use bifrost::telemetry::TelemetrySettings;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings: ServerSettings = toml::from_str(r#"
//!     endpoint = "127.0.0.1:4317"
//!     max_recv_msg_size_mib = 4
//! "#)?;
//!
//! let options = settings.to_server_options(&NopHost, &TelemetrySettings::new("receiver"))?;
//! let listener = settings.to_listener().await?;
//! let (_reporter, health) = tonic_health::server::health_reporter();
//!
//! options
//!     .builder()?
//!     .add_service(health)
//!     .serve_with_incoming(options.incoming(listener))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod layer;

use std::io;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;
use tonic::transport::Server;
use tower::layer::util::{Identity, Stack};
use tracing::{debug, warn};

use crate::auth::Authentication;
use crate::extension::Host;
use crate::identity::ClientInfoInterceptor;
use crate::interceptor::InterceptorChain;
use crate::keepalive::{KeepaliveEnforcementPolicy, KeepaliveServerConfig, KeepaliveServerParameters};
use crate::net::{Connection, Listener, NetAddr};
use crate::telemetry::TelemetrySettings;
use crate::tls::{ServerCredentials, TlsServerSettings};
use crate::Result;

pub use layer::{CallLayer, CallService};

const MIB: usize = 1024 * 1024;

/// Settings of a gRPC server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Where to listen.
    #[serde(flatten)]
    pub net: NetAddr,
    /// Transport security; absent means plaintext.
    pub tls: Option<TlsServerSettings>,
    /// Largest accepted message in MiB; 0 keeps the transport default.
    pub max_recv_msg_size_mib: u64,
    /// Concurrent streams per connection; 0 keeps the transport default.
    pub max_concurrent_streams: u32,
    /// Socket receive buffer size in bytes for accepted connections.
    pub read_buffer_size: usize,
    /// Socket send buffer size in bytes for accepted connections.
    pub write_buffer_size: usize,
    pub keepalive: Option<KeepaliveServerConfig>,
    pub auth: Option<Authentication>,
}

/// A single compiled server option.
#[derive(Debug, Clone)]
pub enum ServerOption {
    Credentials(ServerCredentials),
    KeepaliveParams(KeepaliveServerParameters),
    KeepaliveEnforcementPolicy(KeepaliveEnforcementPolicy),
    Instrumentation(TelemetrySettings),
    Interceptors(InterceptorChain),
    /// In bytes.
    MaxRecvMsgSize(usize),
    MaxConcurrentStreams(u32),
    ReadBufferSize(usize),
    WriteBufferSize(usize),
}

impl ServerOption {
    /// Stable name of the option kind.
    pub fn name(&self) -> &'static str {
        match self {
            ServerOption::Credentials(_) => "credentials",
            ServerOption::KeepaliveParams(_) => "keepalive_params",
            ServerOption::KeepaliveEnforcementPolicy(_) => "keepalive_enforcement_policy",
            ServerOption::Instrumentation(_) => "instrumentation",
            ServerOption::Interceptors(_) => "interceptors",
            ServerOption::MaxRecvMsgSize(_) => "max_recv_msg_size",
            ServerOption::MaxConcurrentStreams(_) => "max_concurrent_streams",
            ServerOption::ReadBufferSize(_) => "read_buffer_size",
            ServerOption::WriteBufferSize(_) => "write_buffer_size",
        }
    }
}

impl ServerSettings {
    /// Compile the settings into ordered server options.
    ///
    /// TLS is resolved before the authenticator; the first failure is
    /// returned and no options are produced. Option order: credentials,
    /// keepalive parameters, keepalive enforcement, instrumentation,
    /// interceptor chain, max receive size, max concurrent streams, read
    /// buffer, write buffer. Instrumentation and the interceptor chain are
    /// always present; the chain always starts with identity propagation.
    pub fn to_server_options(
        &self,
        host: &dyn Host,
        telemetry: &TelemetrySettings,
    ) -> Result<ServerOptions> {
        let credentials = self
            .tls
            .as_ref()
            .map(TlsServerSettings::load_credentials)
            .transpose()?;

        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(ClientInfoInterceptor));
        if let Some(auth) = &self.auth {
            chain.push(auth.server_interceptor(host)?);
        }

        let mut options = Vec::new();
        if let Some(credentials) = credentials {
            options.push(ServerOption::Credentials(credentials));
        }
        if let Some(keepalive) = &self.keepalive {
            if let Some(params) = keepalive.server_parameters {
                options.push(ServerOption::KeepaliveParams(params));
            }
            if let Some(policy) = keepalive.enforcement_policy {
                options.push(ServerOption::KeepaliveEnforcementPolicy(policy));
            }
        }
        options.push(ServerOption::Instrumentation(telemetry.clone()));
        options.push(ServerOption::Interceptors(chain));
        if self.max_recv_msg_size_mib > 0 {
            let bytes = usize::try_from(self.max_recv_msg_size_mib)
                .ok()
                .and_then(|mib| mib.checked_mul(MIB))
                .unwrap_or(usize::MAX);
            options.push(ServerOption::MaxRecvMsgSize(bytes));
        }
        if self.max_concurrent_streams > 0 {
            options.push(ServerOption::MaxConcurrentStreams(self.max_concurrent_streams));
        }
        if self.read_buffer_size > 0 {
            options.push(ServerOption::ReadBufferSize(self.read_buffer_size));
        }
        if self.write_buffer_size > 0 {
            options.push(ServerOption::WriteBufferSize(self.write_buffer_size));
        }

        debug!(
            endpoint = %self.net.endpoint,
            transport = %self.net.transport,
            component = %telemetry.component,
            options = options.len(),
            "compiled server options"
        );
        Ok(ServerOptions { options })
    }

    /// Bind the configured endpoint.
    pub async fn to_listener(&self) -> Result<Listener> {
        self.net.listen().await
    }
}

/// Ordered server options produced by [`ServerSettings::to_server_options`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    options: Vec<ServerOption>,
}

impl ServerOptions {
    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerOption> {
        self.options.iter()
    }

    pub fn as_slice(&self) -> &[ServerOption] {
        &self.options
    }

    pub fn credentials(&self) -> Option<&ServerCredentials> {
        self.iter().find_map(|o| match o {
            ServerOption::Credentials(c) => Some(c),
            _ => None,
        })
    }

    pub fn interceptors(&self) -> Option<&InterceptorChain> {
        self.iter().find_map(|o| match o {
            ServerOption::Interceptors(c) => Some(c),
            _ => None,
        })
    }

    pub fn telemetry(&self) -> Option<&TelemetrySettings> {
        self.iter().find_map(|o| match o {
            ServerOption::Instrumentation(t) => Some(t),
            _ => None,
        })
    }

    /// Byte limit to pass to a generated service's `max_decoding_message_size`.
    pub fn max_decoding_message_size(&self) -> Option<usize> {
        self.iter().find_map(|o| match o {
            ServerOption::MaxRecvMsgSize(n) => Some(*n),
            _ => None,
        })
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.iter().find_map(|o| match o {
            ServerOption::MaxConcurrentStreams(n) => Some(*n),
            _ => None,
        })
    }

    pub fn read_buffer_size(&self) -> usize {
        self.iter()
            .find_map(|o| match o {
                ServerOption::ReadBufferSize(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn write_buffer_size(&self) -> usize {
        self.iter()
            .find_map(|o| match o {
                ServerOption::WriteBufferSize(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// The call layer running the interceptor chain with instrumentation.
    pub fn layer(&self) -> CallLayer {
        let chain = self.interceptors().cloned().unwrap_or_default();
        let telemetry = self.telemetry().cloned().unwrap_or_default();
        CallLayer::new(chain, telemetry)
    }

    /// A tonic server builder with every option applied.
    ///
    /// The receive size limit cannot be set server-wide: pass
    /// [`max_decoding_message_size`](Self::max_decoding_message_size) to every
    /// generated service, or tonic's 4 MiB default applies.
    ///
    /// Fails if TLS was configured without a server certificate and key.
    pub fn builder(&self) -> Result<Server<Stack<CallLayer, Identity>>> {
        let mut server = Server::builder();
        for option in self.iter() {
            server = match option {
                ServerOption::Credentials(credentials) => {
                    server.tls_config(credentials.tls_config()?)?
                }
                ServerOption::KeepaliveParams(params) => params.apply(server),
                ServerOption::KeepaliveEnforcementPolicy(policy) => {
                    policy.report_unenforced();
                    server
                }
                ServerOption::MaxConcurrentStreams(n) => server.max_concurrent_streams(*n),
                ServerOption::MaxRecvMsgSize(bytes) => {
                    warn!(
                        max_recv_msg_size = bytes,
                        "receive size limit must be set on each service with max_decoding_message_size"
                    );
                    server
                }
                // Applied by the layer or accepted sockets.
                ServerOption::Instrumentation(_)
                | ServerOption::Interceptors(_)
                | ServerOption::ReadBufferSize(_)
                | ServerOption::WriteBufferSize(_) => server,
            };
        }
        Ok(server.layer(self.layer()))
    }

    /// Inbound connections from `listener`, with socket buffer sizes applied.
    pub fn incoming(&self, listener: Listener) -> BoxStream<'static, io::Result<Connection>> {
        let (read, write) = (self.read_buffer_size(), self.write_buffer_size());
        stream::unfold(listener, move |listener| async move {
            let accepted = listener.accept().await.inspect(|conn| {
                conn.set_buffer_sizes(read, write);
            });
            Some((accepted, listener))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::NopHost;

    #[test]
    fn max_recv_size_is_converted_to_bytes() {
        let settings = ServerSettings {
            max_recv_msg_size_mib: 4,
            ..Default::default()
        };
        let options = settings
            .to_server_options(&NopHost, &TelemetrySettings::default())
            .unwrap();
        assert_eq!(options.max_decoding_message_size(), Some(4 * MIB));
    }

    #[test]
    fn builder_accepts_receive_size_limit() {
        let settings = ServerSettings {
            max_recv_msg_size_mib: 16,
            ..Default::default()
        };
        let options = settings
            .to_server_options(&NopHost, &TelemetrySettings::default())
            .unwrap();
        assert!(options.builder().is_ok());
        // Still available for the generated services.
        assert_eq!(options.max_decoding_message_size(), Some(16 * MIB));
    }

    #[test]
    fn identity_interceptor_always_installed() {
        let options = ServerSettings::default()
            .to_server_options(&NopHost, &TelemetrySettings::default())
            .unwrap();
        assert_eq!(options.interceptors().map(InterceptorChain::len), Some(1));
    }
}
