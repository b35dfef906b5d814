//! gRPC client settings and their compilation into dial options.
//!
//! [`ClientSettings::to_dial_options`] validates the settings and produces a
//! [`ClientOptions`] value: an ordered list of [`DialOption`]s that can be
//! turned into a tonic [`Channel`](tonic::transport::Channel) with
//! [`ClientOptions::connect`].
//!
//! ```rust,no_run
//! use bifrost::client::ClientSettings;
//! use bifrost::extension::NopHost;
//! use bifrost::telemetry::TelemetrySettings;
//!
//! # async fn run() -> bifrost::Result<()> {
//! let settings: ClientSettings = toml::from_str(r#"
//!     endpoint = "localhost:4317"
//!     compression = "gzip"
//!     tls = { insecure = true }
//! "#).expect("valid settings");
//!
//! let options = settings.to_dial_options(&NopHost, &TelemetrySettings::new("exporter"))?;
//! let channel = options.dial(&settings.endpoint).await?;
//! # let _ = channel;
//! # Ok(())
//! # }
//! ```

mod interceptor;
mod options;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tracing::debug;

use crate::auth::Authentication;
use crate::extension::Host;
use crate::keepalive::KeepaliveClientConfig;
use crate::telemetry::TelemetrySettings;
use crate::tls::TlsClientSettings;
use crate::{BifrostError, Result};

pub use interceptor::ClientInterceptor;
pub use options::{ClientOptions, DialOption};

/// Settings of a gRPC client connection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Target to connect to: `host:port`, `dns:///host:port`,
    /// `http(s)://host:port`, `unix:<path>` or `unix://<path>`.
    pub endpoint: String,
    /// Metadata sent with every call.
    pub headers: BTreeMap<String, String>,
    pub compression: Compression,
    pub tls: TlsClientSettings,
    pub keepalive: Option<KeepaliveClientConfig>,
    /// Socket receive buffer size in bytes; 0 keeps the OS default.
    pub read_buffer_size: usize,
    /// Socket send buffer size in bytes; 0 keeps the OS default.
    pub write_buffer_size: usize,
    /// Wait for the connection instead of failing calls while it is down.
    pub wait_for_ready: bool,
    /// Load balancing policy; empty selects the transport default.
    pub balancer_name: String,
    pub auth: Option<Authentication>,
}

/// Message compression for outgoing calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    #[serde(alias = "")]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// The tonic encoding, `None` when compression is disabled.
    pub fn encoding(self) -> Option<CompressionEncoding> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some(CompressionEncoding::Gzip),
            Compression::Zstd => Some(CompressionEncoding::Zstd),
        }
    }
}

/// Load balancing policies understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerPolicy {
    /// Single connection to the first reachable address.
    PickFirst,
    /// Spread calls over every resolved address.
    RoundRobin,
}

impl BalancerPolicy {
    pub fn name(self) -> &'static str {
        match self {
            BalancerPolicy::PickFirst => "pick_first",
            BalancerPolicy::RoundRobin => "round_robin",
        }
    }
}

impl FromStr for BalancerPolicy {
    type Err = BifrostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pick_first" => Ok(BalancerPolicy::PickFirst),
            "round_robin" => Ok(BalancerPolicy::RoundRobin),
            other => Err(BifrostError::InvalidBalancerName(other.to_string())),
        }
    }
}

impl fmt::Display for BalancerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ClientSettings {
    /// Compile the settings into ordered dial options.
    ///
    /// Validation runs TLS, balancer, authenticator, then headers; the first
    /// failure is returned and no options are produced. Option order:
    /// transport credentials, keepalive, per-RPC credentials,
    /// instrumentation, compression, headers, balancer, read buffer, write
    /// buffer, wait-for-ready. Credentials and instrumentation are always
    /// present.
    pub fn to_dial_options(
        &self,
        host: &dyn Host,
        telemetry: &TelemetrySettings,
    ) -> Result<ClientOptions> {
        let credentials = self.tls.load_credentials()?;
        let balancer = self.balancer()?;

        let per_rpc = match &self.auth {
            Some(auth) => {
                let creds = auth.per_rpc_credentials(host)?;
                if creds.require_transport_security() && !credentials.is_secure() {
                    return Err(BifrostError::CredentialsRequireTransportSecurity(
                        auth.authenticator.clone(),
                    ));
                }
                Some(creds)
            }
            None => None,
        };

        let headers = self.metadata()?;

        let mut options = vec![DialOption::TransportCredentials(credentials)];
        if let Some(keepalive) = self.keepalive {
            options.push(DialOption::Keepalive(keepalive));
        }
        if let Some(creds) = per_rpc {
            options.push(DialOption::PerRpcCredentials(creds));
        }
        options.push(DialOption::Instrumentation(telemetry.clone()));
        if let Some(encoding) = self.compression.encoding() {
            options.push(DialOption::Compression(encoding));
        }
        if !headers.is_empty() {
            options.push(DialOption::Headers(headers));
        }
        if let Some(policy) = balancer {
            options.push(DialOption::Balancer(policy));
        }
        if self.read_buffer_size > 0 {
            options.push(DialOption::ReadBufferSize(self.read_buffer_size));
        }
        if self.write_buffer_size > 0 {
            options.push(DialOption::WriteBufferSize(self.write_buffer_size));
        }
        if self.wait_for_ready {
            options.push(DialOption::WaitForReady(true));
        }

        debug!(
            endpoint = %self.endpoint,
            component = %telemetry.component,
            options = options.len(),
            "compiled client dial options"
        );
        Ok(ClientOptions::new(
            options,
            self.tls.server_name().map(str::to_string),
        ))
    }

    /// Compile the settings and connect to [`endpoint`](Self::endpoint).
    pub async fn connect(
        &self,
        host: &dyn Host,
        telemetry: &TelemetrySettings,
    ) -> Result<tonic::codegen::InterceptedService<tonic::transport::Channel, ClientInterceptor>>
    {
        self.to_dial_options(host, telemetry)?
            .dial(&self.endpoint)
            .await
    }

    fn balancer(&self) -> Result<Option<BalancerPolicy>> {
        if self.balancer_name.is_empty() {
            return Ok(None);
        }
        self.balancer_name.parse().map(Some)
    }

    fn metadata(&self) -> Result<Vec<(AsciiMetadataKey, AsciiMetadataValue)>> {
        self.headers
            .iter()
            .map(|(name, value)| {
                let invalid = |reason: String| BifrostError::InvalidHeader {
                    name: name.clone(),
                    reason,
                };
                let key = AsciiMetadataKey::from_bytes(name.as_bytes())
                    .map_err(|e| invalid(e.to_string()))?;
                let value = AsciiMetadataValue::try_from(value.as_str())
                    .map_err(|e| invalid(e.to_string()))?;
                Ok((key, value))
            })
            .collect()
    }
}
