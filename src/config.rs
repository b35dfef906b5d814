//! Configuration file for the `bifrost` binary.
//!
//! ```toml
//! [server]
//! endpoint = "127.0.0.1:4317"
//! auth = { authenticator = "bearertokenauth" }
//!
//! [client]
//! endpoint = "127.0.0.1:4317"
//! tls = { insecure = true }
//! auth = { authenticator = "bearertokenauth" }
//!
//! [extensions.bearertokenauth]
//! token = "s3cret"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::auth::BearerTokenAuth;
use crate::client::ClientSettings;
use crate::extension::{ComponentId, Extensions};
use crate::server::ServerSettings;
use crate::{BifrostError, Result};

/// Extension type served by [`BearerTokenAuth`].
pub const BEARER_TOKEN_AUTH: &str = "bearertokenauth";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Option<ServerSettings>,
    pub client: Option<ClientSettings>,
    /// Extensions keyed by component id (`type` or `type/name`).
    pub extensions: BTreeMap<ComponentId, BearerTokenConfig>,
}

/// Settings of a bearer-token authenticator.
#[derive(Debug, Clone, Deserialize)]
pub struct BearerTokenConfig {
    pub token: String,
    #[serde(default)]
    pub require_transport_security: bool,
}

impl Config {
    /// Load and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BifrostError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            BifrostError::Configuration(msg) => {
                BifrostError::Configuration(format!("{path:?}: {msg}"))
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BifrostError::Configuration(format!("Failed to parse config: {e}")))
    }

    /// Build the extension registry described by `[extensions]`.
    pub fn host(&self) -> Result<Extensions> {
        let mut extensions = Extensions::new();
        for (id, config) in &self.extensions {
            if id.kind() != BEARER_TOKEN_AUTH {
                return Err(BifrostError::Configuration(format!(
                    "unsupported extension type {:?} for {id}",
                    id.kind()
                )));
            }
            let auth = BearerTokenAuth::new(config.token.clone())
                .with_transport_security(config.require_transport_security);
            extensions.insert(id.clone(), Arc::new(auth));
        }
        Ok(extensions)
    }
}
