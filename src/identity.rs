//! Caller identity propagation.
//!
//! Every compiled server runs [`ClientInfoInterceptor`] as the first link of
//! its interceptor chain. It derives a [`ClientInfo`] for the call and stores
//! it in the request extensions, where later interceptors (authenticators)
//! and the service handler read it back.
//!
//! # Precedence
//!
//! ```text
//! transport peer address known  → ClientInfo { addr: peer }   (replaces any upstream value)
//! no peer, upstream ClientInfo  → upstream value unchanged
//! neither                       → ClientInfo::default()
//! ```
//!
//! The record is replaced as a whole, never merged field by field.

use http::Extensions;
use tonic::Status;
use tonic::transport::server::{TcpConnectInfo, TlsConnectInfo};

use crate::interceptor::{CallContext, ServerInterceptor};
use crate::net::{Address, PeerInfo};

/// Network identity of the caller of a single inbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Address the call arrived from, when known.
    pub addr: Option<Address>,
}

impl ClientInfo {
    pub fn new(addr: impl Into<Address>) -> Self {
        Self {
            addr: Some(addr.into()),
        }
    }

    /// Identity recorded for a call; empty if none was recorded.
    ///
    /// ```ignore
    /// async fn check(&self, request: Request<HealthCheckRequest>) -> Result<Response<_>, Status> {
    ///     let caller = ClientInfo::from_request(&request);
    ///     tracing::info!(addr = ?caller.addr, "health check");
    ///     ...
    /// }
    /// ```
    pub fn from_request<T>(request: &tonic::Request<T>) -> Self {
        Self::from_extensions(request.extensions())
    }

    /// Identity stored in request-scoped extensions; empty if absent.
    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions.get::<ClientInfo>().cloned().unwrap_or_default()
    }
}

/// Compute the identity for a call from its request-scoped extensions.
///
/// Pure: the caller decides where the result is stored.
pub fn context_with_client(extensions: &Extensions) -> ClientInfo {
    match peer_addr(extensions) {
        Some(addr) => ClientInfo { addr: Some(addr) },
        None => ClientInfo::from_extensions(extensions),
    }
}

/// Transport-negotiated peer address of the connection carrying the call.
fn peer_addr(extensions: &Extensions) -> Option<Address> {
    if let Some(peer) = extensions.get::<PeerInfo>() {
        return Some(peer.remote_addr.clone());
    }
    if let Some(tls) = extensions.get::<TlsConnectInfo<PeerInfo>>() {
        return Some(tls.get_ref().remote_addr.clone());
    }
    if let Some(tcp) = extensions.get::<TcpConnectInfo>() {
        return tcp.remote_addr().map(Address::Inet);
    }
    extensions
        .get::<TlsConnectInfo<TcpConnectInfo>>()
        .and_then(|tls| tls.get_ref().remote_addr())
        .map(Address::Inet)
}

/// Stores the caller's [`ClientInfo`] in the request extensions. Never rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientInfoInterceptor;

impl ServerInterceptor for ClientInfoInterceptor {
    fn intercept(&self, call: &mut CallContext<'_>) -> Result<(), Status> {
        let info = context_with_client(call.extensions());
        call.extensions_mut().insert(info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn peer_replaces_upstream_value() {
        let mut ext = Extensions::new();
        ext.insert(ClientInfo::new(addr("5.6.7.8:1000")));
        ext.insert(PeerInfo::new(addr("1.2.3.4:2000"), None));

        assert_eq!(
            context_with_client(&ext),
            ClientInfo::new(addr("1.2.3.4:2000"))
        );
    }

    #[test]
    fn upstream_value_kept_without_peer() {
        let mut ext = Extensions::new();
        ext.insert(ClientInfo::new(addr("5.6.7.8:1000")));

        assert_eq!(
            context_with_client(&ext),
            ClientInfo::new(addr("5.6.7.8:1000"))
        );
    }

    #[test]
    fn empty_without_any_source() {
        assert_eq!(context_with_client(&Extensions::new()), ClientInfo::default());
    }
}
