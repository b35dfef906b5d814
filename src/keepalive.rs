//! Keepalive settings for clients and servers.
//!
//! Pure data-to-option mapping: an absent descriptor produces no option and
//! the transport's defaults apply. Durations are read from configuration as
//! (fractional) seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tonic::transport::{Endpoint, Server};
use tracing::warn;

/// Client keepalive: HTTP/2 PING behaviour of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeepaliveClientConfig {
    /// Interval between pings when the connection is idle.
    #[serde(deserialize_with = "seconds")]
    pub time: Option<Duration>,
    /// How long to wait for a ping acknowledgement before closing the connection.
    #[serde(deserialize_with = "seconds")]
    pub timeout: Option<Duration>,
    /// Keep pinging while no call is active.
    pub permit_without_stream: bool,
}

/// Server keepalive. Both groups are independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeepaliveServerConfig {
    pub server_parameters: Option<KeepaliveServerParameters>,
    pub enforcement_policy: Option<KeepaliveEnforcementPolicy>,
}

/// Connection lifetime and ping parameters enforced by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeepaliveServerParameters {
    #[serde(deserialize_with = "seconds")]
    pub max_connection_idle: Option<Duration>,
    #[serde(deserialize_with = "seconds")]
    pub max_connection_age: Option<Duration>,
    #[serde(deserialize_with = "seconds")]
    pub max_connection_age_grace: Option<Duration>,
    #[serde(deserialize_with = "seconds")]
    pub time: Option<Duration>,
    #[serde(deserialize_with = "seconds")]
    pub timeout: Option<Duration>,
}

/// Policy the server applies to client pings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeepaliveEnforcementPolicy {
    /// Minimum interval a client should wait between pings.
    #[serde(deserialize_with = "seconds")]
    pub min_time: Option<Duration>,
    /// Whether pings are allowed while no call is active.
    pub permit_without_stream: bool,
}

impl KeepaliveClientConfig {
    pub(crate) fn apply(&self, mut endpoint: Endpoint) -> Endpoint {
        if let Some(time) = self.time {
            endpoint = endpoint.http2_keep_alive_interval(time);
        }
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        endpoint.keep_alive_while_idle(self.permit_without_stream)
    }
}

impl KeepaliveServerParameters {
    pub(crate) fn apply<L>(&self, mut server: Server<L>) -> Server<L> {
        if self.time.is_some() {
            server = server.http2_keepalive_interval(self.time);
        }
        if self.timeout.is_some() {
            server = server.http2_keepalive_timeout(self.timeout);
        }
        if let Some(age) = self.max_connection_age {
            server = server.max_connection_age(age);
        }
        if self.max_connection_idle.is_some() || self.max_connection_age_grace.is_some() {
            warn!(
                max_connection_idle = ?self.max_connection_idle,
                max_connection_age_grace = ?self.max_connection_age_grace,
                "keepalive idle and grace limits are not enforced by the transport"
            );
        }
        server
    }
}

impl KeepaliveEnforcementPolicy {
    pub(crate) fn report_unenforced(&self) {
        warn!(
            min_time = ?self.min_time,
            permit_without_stream = self.permit_without_stream,
            "keepalive enforcement policy is not enforced by the transport"
        );
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<f64>::deserialize(deserializer)?;
    secs.map(|s| {
        Duration::try_from_secs_f64(s).map_err(|e| serde::de::Error::custom(format!("{s}s: {e}")))
    })
    .transpose()
}
