//! Bifrost - declarative gRPC connection settings for tonic
//!
//! This crate turns static connection configuration (endpoint, transport
//! security, keepalive, compression, balancing policy, authenticator
//! reference) into ready-to-use tonic clients and servers, and records the
//! verified network identity of every inbound call.
//!
//! - [`ClientSettings::to_dial_options`] compiles client settings into an
//!   ordered [`ClientOptions`] list and connects a channel from it.
//! - [`ServerSettings::to_server_options`] compiles server settings into an
//!   ordered [`ServerOptions`] list, which configures a tonic server builder
//!   with the identity and authentication interceptors installed.
//! - [`ServerSettings::to_listener`] binds a TCP or unix socket endpoint.
//! - [`ClientInfo::from_request`] gives handlers the caller's address.
//!
//! Authenticators are resolved indirectly through a host-provided
//! [`Extensions`] registry.
//!
//! # Server Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bifrost::{BearerTokenAuth, ComponentId, Extensions, ServerSettings, TelemetrySettings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Extensions::new().with(
//!     ComponentId::new("bearertokenauth"),
//!     Arc::new(BearerTokenAuth::new("s3cret")),
//! );
//!
//! let settings: ServerSettings = toml::from_str(r#"
//!     endpoint = "127.0.0.1:4317"
//!     auth = { authenticator = "bearertokenauth" }
//! "#)?;
//!
//! let options = settings.to_server_options(&host, &TelemetrySettings::new("receiver"))?;
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

pub mod auth;
pub mod client;
#[cfg(feature = "cli")]
pub mod config;
pub mod error;
pub mod extension;
pub mod identity;
pub mod interceptor;
pub mod keepalive;
pub mod net;
pub mod server;
pub mod telemetry;
pub mod tls;

// Re-export main types at crate root
pub use auth::{Authentication, BearerTokenAuth};
pub use client::{ClientOptions, ClientSettings, Compression, DialOption};
pub use error::{BifrostError, Result};
pub use extension::{ComponentId, Extension, Extensions, Host, NopHost};
pub use identity::ClientInfo;
pub use net::{Address, Listener, NetAddr, Transport};
pub use server::{ServerOption, ServerOptions, ServerSettings};
pub use telemetry::TelemetrySettings;
