//! Compiled client options and channel construction.

use std::fmt;
#[cfg(unix)]
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(unix)]
use http::Uri;
use http::uri::Authority;
use hyper_util::client::legacy::connect::HttpConnector;
#[cfg(unix)]
use hyper_util::rt::TokioIo;
use tonic::codec::CompressionEncoding;
use tonic::codegen::InterceptedService;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::{Channel, Endpoint};
#[cfg(unix)]
use tower::service_fn;
use tracing::{debug, warn};

use super::{BalancerPolicy, ClientInterceptor};
use crate::auth::PerRpcCredentials;
use crate::keepalive::KeepaliveClientConfig;
use crate::telemetry::TelemetrySettings;
use crate::tls::ClientCredentials;
use crate::{BifrostError, Result};

/// A single compiled client option.
#[derive(Clone)]
pub enum DialOption {
    TransportCredentials(ClientCredentials),
    Keepalive(KeepaliveClientConfig),
    PerRpcCredentials(Arc<dyn PerRpcCredentials>),
    Instrumentation(TelemetrySettings),
    Compression(CompressionEncoding),
    Headers(Vec<(AsciiMetadataKey, AsciiMetadataValue)>),
    Balancer(BalancerPolicy),
    ReadBufferSize(usize),
    WriteBufferSize(usize),
    WaitForReady(bool),
}

impl DialOption {
    /// Stable name of the option kind.
    pub fn name(&self) -> &'static str {
        match self {
            DialOption::TransportCredentials(_) => "transport_credentials",
            DialOption::Keepalive(_) => "keepalive",
            DialOption::PerRpcCredentials(_) => "per_rpc_credentials",
            DialOption::Instrumentation(_) => "instrumentation",
            DialOption::Compression(_) => "compression",
            DialOption::Headers(_) => "headers",
            DialOption::Balancer(_) => "balancer",
            DialOption::ReadBufferSize(_) => "read_buffer_size",
            DialOption::WriteBufferSize(_) => "write_buffer_size",
            DialOption::WaitForReady(_) => "wait_for_ready",
        }
    }
}

impl fmt::Debug for DialOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialOption::TransportCredentials(c) => {
                f.debug_tuple("TransportCredentials").field(c).finish()
            }
            DialOption::Keepalive(k) => f.debug_tuple("Keepalive").field(k).finish(),
            DialOption::PerRpcCredentials(c) => f
                .debug_struct("PerRpcCredentials")
                .field(
                    "require_transport_security",
                    &c.require_transport_security(),
                )
                .finish_non_exhaustive(),
            DialOption::Instrumentation(t) => f.debug_tuple("Instrumentation").field(t).finish(),
            DialOption::Compression(c) => f.debug_tuple("Compression").field(c).finish(),
            DialOption::Headers(h) => {
                let names: Vec<_> = h.iter().map(|(k, _)| k.as_str()).collect();
                f.debug_tuple("Headers").field(&names).finish()
            }
            DialOption::Balancer(b) => f.debug_tuple("Balancer").field(b).finish(),
            DialOption::ReadBufferSize(n) => f.debug_tuple("ReadBufferSize").field(n).finish(),
            DialOption::WriteBufferSize(n) => f.debug_tuple("WriteBufferSize").field(n).finish(),
            DialOption::WaitForReady(w) => f.debug_tuple("WaitForReady").field(w).finish(),
        }
    }
}

/// Ordered dial options produced by [`ClientSettings::to_dial_options`](super::ClientSettings::to_dial_options).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    options: Vec<DialOption>,
    server_name: Option<String>,
}

impl ClientOptions {
    pub(super) fn new(options: Vec<DialOption>, server_name: Option<String>) -> Self {
        Self {
            options,
            server_name,
        }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DialOption> {
        self.options.iter()
    }

    pub fn as_slice(&self) -> &[DialOption] {
        &self.options
    }

    pub fn credentials(&self) -> Option<&ClientCredentials> {
        self.iter().find_map(|o| match o {
            DialOption::TransportCredentials(c) => Some(c),
            _ => None,
        })
    }

    pub fn keepalive(&self) -> Option<&KeepaliveClientConfig> {
        self.iter().find_map(|o| match o {
            DialOption::Keepalive(k) => Some(k),
            _ => None,
        })
    }

    pub fn per_rpc_credentials(&self) -> Option<&Arc<dyn PerRpcCredentials>> {
        self.iter().find_map(|o| match o {
            DialOption::PerRpcCredentials(c) => Some(c),
            _ => None,
        })
    }

    pub fn telemetry(&self) -> Option<&TelemetrySettings> {
        self.iter().find_map(|o| match o {
            DialOption::Instrumentation(t) => Some(t),
            _ => None,
        })
    }

    /// Encoding to pass to a generated client's `send_compressed`.
    pub fn compression(&self) -> Option<CompressionEncoding> {
        self.iter().find_map(|o| match o {
            DialOption::Compression(c) => Some(*c),
            _ => None,
        })
    }

    pub fn balancer(&self) -> BalancerPolicy {
        self.iter()
            .find_map(|o| match o {
                DialOption::Balancer(b) => Some(*b),
                _ => None,
            })
            .unwrap_or(BalancerPolicy::PickFirst)
    }

    pub fn read_buffer_size(&self) -> usize {
        self.iter()
            .find_map(|o| match o {
                DialOption::ReadBufferSize(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn write_buffer_size(&self) -> usize {
        self.iter()
            .find_map(|o| match o {
                DialOption::WriteBufferSize(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn wait_for_ready(&self) -> bool {
        self.iter().any(|o| matches!(o, DialOption::WaitForReady(true)))
    }

    /// Per-call interceptor: headers, per-RPC credentials and call metrics.
    pub fn interceptor(&self) -> ClientInterceptor {
        let headers = self
            .iter()
            .find_map(|o| match o {
                DialOption::Headers(h) => Some(h.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let component = self
            .telemetry()
            .map(|t| t.component.clone())
            .unwrap_or_default();
        ClientInterceptor::new(headers, self.per_rpc_credentials().cloned(), component)
    }

    /// Open a channel to `target` and attach the call interceptor.
    pub async fn dial(&self, target: &str) -> Result<InterceptedService<Channel, ClientInterceptor>> {
        let channel = self.connect(target).await?;
        Ok(InterceptedService::new(channel, self.interceptor()))
    }

    /// Open a channel to `target`.
    ///
    /// Without wait-for-ready the first connection attempt is made eagerly
    /// and its failure is returned; with it the channel connects on first use.
    pub async fn connect(&self, target: &str) -> Result<Channel> {
        let credentials = self.credentials().ok_or_else(|| {
            BifrostError::Configuration("client options carry no transport credentials".into())
        })?;

        let channel = match Target::parse(target)? {
            Target::Unix(path) => {
                if self.balancer() != BalancerPolicy::PickFirst {
                    warn!(
                        endpoint = target,
                        balancer = %self.balancer(),
                        "balancer policy ignored for unix socket targets"
                    );
                }
                self.connect_unix(credentials, path, target).await?
            }
            Target::Tcp(authority) => match self.balancer() {
                BalancerPolicy::PickFirst => {
                    self.connect_tcp(credentials, &authority, target).await?
                }
                BalancerPolicy::RoundRobin => {
                    self.balance_tcp(credentials, &authority, target).await?
                }
            },
        };
        debug!(endpoint = target, balancer = %self.balancer(), "channel ready");
        Ok(channel)
    }

    fn endpoint(&self, credentials: &ClientCredentials, uri: String, target: &str) -> Result<Endpoint> {
        let mut endpoint =
            Endpoint::from_shared(uri).map_err(|e| BifrostError::InvalidEndpoint {
                endpoint: target.to_string(),
                reason: e.to_string(),
            })?;
        if let ClientCredentials::Tls(config) = credentials {
            endpoint = endpoint.tls_config(config.clone())?;
        }
        if let Some(keepalive) = self.keepalive() {
            endpoint = keepalive.apply(endpoint);
        }
        Ok(endpoint)
    }

    async fn connect_tcp(
        &self,
        credentials: &ClientCredentials,
        authority: &str,
        target: &str,
    ) -> Result<Channel> {
        let endpoint = self.endpoint(
            credentials,
            format!("{}://{authority}", credentials.scheme()),
            target,
        )?;

        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_nodelay(true);
        if self.read_buffer_size() > 0 {
            connector.set_recv_buffer_size(Some(self.read_buffer_size()));
        }
        if self.write_buffer_size() > 0 {
            connector.set_send_buffer_size(Some(self.write_buffer_size()));
        }

        if self.wait_for_ready() {
            return Ok(endpoint.connect_with_connector_lazy(connector));
        }
        endpoint
            .connect_with_connector(connector)
            .await
            .map_err(|source| connect_error(target, source))
    }

    #[cfg(unix)]
    async fn connect_unix(
        &self,
        credentials: &ClientCredentials,
        path: PathBuf,
        target: &str,
    ) -> Result<Channel> {
        // The URI only feeds the HTTP/2 :authority; the connector ignores it.
        let uri = match credentials {
            ClientCredentials::Insecure => "http://localhost".to_string(),
            ClientCredentials::Tls(_) => "https://localhost".to_string(),
        };
        let endpoint = self.endpoint(credentials, uri, target)?;

        let (read, write) = (self.read_buffer_size(), self.write_buffer_size());
        let connector = service_fn(move |_: Uri| {
            let path = path.clone();
            async move { connect_unix_socket(path, read, write).await }
        });

        if self.wait_for_ready() {
            return Ok(endpoint.connect_with_connector_lazy(connector));
        }
        endpoint
            .connect_with_connector(connector)
            .await
            .map_err(|source| connect_error(target, source))
    }

    #[cfg(not(unix))]
    async fn connect_unix(
        &self,
        _credentials: &ClientCredentials,
        _path: PathBuf,
        target: &str,
    ) -> Result<Channel> {
        Err(BifrostError::InvalidEndpoint {
            endpoint: target.to_string(),
            reason: "unix sockets are not supported on this platform".to_string(),
        })
    }

    /// One endpoint per resolved address, balanced by tonic.
    ///
    /// Socket buffer sizes are not applied on this path.
    async fn balance_tcp(
        &self,
        credentials: &ClientCredentials,
        authority: &str,
        target: &str,
    ) -> Result<Channel> {
        let invalid = |reason: String| BifrostError::InvalidEndpoint {
            endpoint: target.to_string(),
            reason,
        };
        let host = authority
            .parse::<Authority>()
            .map_err(|e| invalid(e.to_string()))?
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let addrs: Vec<_> = tokio::net::lookup_host(authority)
            .await
            .map_err(|e| invalid(e.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(invalid("no addresses resolved".to_string()));
        }

        // Addresses are dialed by IP; verify certificates against the host name.
        let credentials = match credentials {
            ClientCredentials::Tls(config) if self.server_name.is_none() => {
                ClientCredentials::Tls(config.clone().domain_name(host))
            }
            other => other.clone(),
        };

        let endpoints = addrs
            .iter()
            .map(|addr| {
                self.endpoint(
                    &credentials,
                    format!("{}://{addr}", credentials.scheme()),
                    target,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            endpoint = target,
            addresses = endpoints.len(),
            "balancing calls round robin"
        );
        Ok(Channel::balance_list(endpoints.into_iter()))
    }
}

fn connect_error(target: &str, source: tonic::transport::Error) -> BifrostError {
    BifrostError::Connect {
        endpoint: target.to_string(),
        source,
    }
}

#[cfg(unix)]
async fn connect_unix_socket(
    path: PathBuf,
    read: usize,
    write: usize,
) -> io::Result<TokioIo<tokio::net::UnixStream>> {
    let stream = tokio::net::UnixStream::connect(&path).await?;
    crate::net::set_socket_buffers(socket2::SockRef::from(&stream), read, write);
    Ok(TokioIo::new(stream))
}

/// Where a client endpoint points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// `host:port` to resolve and dial over TCP.
    Tcp(String),
    Unix(PathBuf),
}

impl Target {
    fn parse(endpoint: &str) -> Result<Self> {
        let invalid = |reason: &str| BifrostError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(invalid("endpoint is empty"));
        }

        if let Some(path) = endpoint
            .strip_prefix("unix://")
            .or_else(|| endpoint.strip_prefix("unix:"))
        {
            if path.is_empty() {
                return Err(invalid("unix socket path is empty"));
            }
            return Ok(Target::Unix(PathBuf::from(path)));
        }

        let authority = if let Some(rest) = endpoint.strip_prefix("dns:") {
            // dns:[//resolver/]host:port
            match rest.strip_prefix("//") {
                Some(with_resolver) => with_resolver
                    .split_once('/')
                    .map(|(_, host)| host)
                    .unwrap_or(with_resolver),
                None => rest,
            }
        } else if let Some((_, rest)) = endpoint
            .split_once("://")
            .filter(|(scheme, _)| matches!(*scheme, "http" | "https"))
        {
            rest.trim_end_matches('/')
        } else {
            endpoint
        };

        if authority.is_empty() {
            return Err(invalid("missing host"));
        }
        Ok(Target::Tcp(authority.to_string()))
    }
}
