//! Transport security settings and credential loading.
//!
//! Turns certificate, key and CA file references into credentials the
//! transport can use, for either role:
//!
//! - [`TlsClientSettings::load_credentials`] yields [`ClientCredentials`],
//!   which is either the explicit insecure marker or a tonic client TLS config.
//! - [`TlsServerSettings::load_credentials`] yields [`ServerCredentials`],
//!   optionally requiring client certificates (mutual TLS).
//!
//! All PEM material is read and parsed up front, so a bad path or a corrupt
//! file fails compilation rather than the first handshake. Loading is
//! synchronous, local file I/O and is never retried.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// Errors raised while turning TLS settings into credentials.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to load CA CertPool: {0}")]
    CaPool(#[source] PemError),

    #[error("failed to load client CA CertPool: {0}")]
    ClientCaPool(#[source] PemError),

    #[error("for auth via TLS, either both certificate and key must be supplied, or neither")]
    CertKeyMismatch,

    #[error("failed to load TLS cert and key: {0}")]
    KeyPair(#[source] PemError),

    #[error("insecure_skip_verify is not supported by the transport")]
    SkipVerifyUnsupported,

    #[error("server TLS requires both a certificate and a key")]
    MissingServerIdentity,
}

/// Failure to read or parse a single PEM file.
#[derive(Debug, thiserror::Error)]
pub enum PemError {
    #[error("failed to load {kind} {}: {source}", .path.display())]
    Read {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {kind} {}: {reason}", .path.display())]
    Parse {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },
}

// ============================================================================
// Settings
// ============================================================================

/// Certificate material shared by the client and server roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// CA bundle used to verify the remote side.
    pub ca_file: Option<PathBuf>,
    /// Certificate presented to the remote side.
    pub cert_file: Option<PathBuf>,
    /// Private key matching `cert_file`.
    pub key_file: Option<PathBuf>,
}

/// Client-side transport security.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsClientSettings {
    #[serde(flatten)]
    pub tls: TlsSettings,
    /// Disable transport security entirely (only honoured without CA or certificate).
    pub insecure: bool,
    /// Skip verification of the server certificate.
    pub insecure_skip_verify: bool,
    /// Name used to verify the server certificate instead of the endpoint host.
    pub server_name_override: Option<String>,
}

/// Server-side transport security.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsServerSettings {
    #[serde(flatten)]
    pub tls: TlsSettings,
    /// CA bundle used to verify client certificates. Setting it enables mutual TLS.
    pub client_ca_file: Option<PathBuf>,
}

// ============================================================================
// Credentials
// ============================================================================

/// Transport credentials for a client connection.
#[derive(Debug, Clone)]
pub enum ClientCredentials {
    /// Plaintext HTTP/2.
    Insecure,
    /// TLS with the given configuration.
    Tls(ClientTlsConfig),
}

impl ClientCredentials {
    /// Whether connections made with these credentials are encrypted.
    pub fn is_secure(&self) -> bool {
        matches!(self, ClientCredentials::Tls(_))
    }

    /// URI scheme matching the credentials.
    pub fn scheme(&self) -> &'static str {
        match self {
            ClientCredentials::Insecure => "http",
            ClientCredentials::Tls(_) => "https",
        }
    }
}

/// Transport credentials for a server.
#[derive(Debug, Clone)]
pub struct ServerCredentials {
    identity: Option<Identity>,
    client_ca: Option<Certificate>,
}

impl ServerCredentials {
    /// Whether a server certificate and key were loaded.
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Whether clients must present a certificate signed by the client CA.
    pub fn requires_client_auth(&self) -> bool {
        self.client_ca.is_some()
    }

    /// Build the tonic server TLS config.
    ///
    /// Fails when no certificate was configured: the transport cannot
    /// complete a handshake without a server identity.
    pub fn tls_config(&self) -> Result<ServerTlsConfig, TlsError> {
        let identity = self
            .identity
            .clone()
            .ok_or(TlsError::MissingServerIdentity)?;
        let mut config = ServerTlsConfig::new().identity(identity);
        if let Some(ca) = &self.client_ca {
            config = config.client_ca_root(ca.clone());
        }
        Ok(config)
    }
}

/// Loaded CA and key pair, before role-specific assembly.
struct Material {
    ca: Option<Certificate>,
    identity: Option<Identity>,
}

impl TlsSettings {
    /// Load the CA bundle, then the certificate and key pair.
    ///
    /// The CA is checked before the pairing invariant, matching the order in
    /// which errors are reported to operators.
    fn load(&self) -> Result<Material, TlsError> {
        let ca = non_empty(&self.ca_file)
            .map(|path| load_ca(path).map_err(TlsError::CaPool))
            .transpose()?;

        let identity = match (non_empty(&self.cert_file), non_empty(&self.key_file)) {
            (Some(cert), Some(key)) => Some(load_key_pair(cert, key).map_err(TlsError::KeyPair)?),
            (None, None) => None,
            _ => return Err(TlsError::CertKeyMismatch),
        };

        Ok(Material { ca, identity })
    }

    fn has_ca_or_cert(&self) -> bool {
        non_empty(&self.ca_file).is_some() || non_empty(&self.cert_file).is_some()
    }
}

impl TlsClientSettings {
    /// Resolve client transport credentials.
    ///
    /// `insecure` without any CA or certificate short-circuits to
    /// [`ClientCredentials::Insecure`] without touching the filesystem.
    pub fn load_credentials(&self) -> Result<ClientCredentials, TlsError> {
        if self.insecure && !self.tls.has_ca_or_cert() {
            return Ok(ClientCredentials::Insecure);
        }

        let material = self.tls.load()?;
        if self.insecure_skip_verify {
            return Err(TlsError::SkipVerifyUnsupported);
        }

        let mut config = ClientTlsConfig::new();
        config = match material.ca {
            Some(ca) => config.ca_certificate(ca),
            None => config.with_native_roots(),
        };
        if let Some(identity) = material.identity {
            config = config.identity(identity);
        }
        if let Some(name) = self.server_name() {
            config = config.domain_name(name);
        }
        Ok(ClientCredentials::Tls(config))
    }

    /// Explicit verification name, if one is configured.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name_override
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

impl TlsServerSettings {
    /// Resolve server transport credentials, including the client CA for mutual TLS.
    pub fn load_credentials(&self) -> Result<ServerCredentials, TlsError> {
        let material = self.tls.load()?;
        let client_ca = non_empty(&self.client_ca_file)
            .map(|path| load_ca(path).map_err(TlsError::ClientCaPool))
            .transpose()?;

        Ok(ServerCredentials {
            identity: material.identity,
            client_ca,
        })
    }
}

// ============================================================================
// PEM loading
// ============================================================================

fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

fn read_pem(kind: &'static str, path: &Path) -> Result<Vec<u8>, PemError> {
    fs::read(path).map_err(|source| PemError::Read {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// Read a PEM file and check it holds at least one well-formed certificate.
fn read_certificates(kind: &'static str, path: &Path) -> Result<Vec<u8>, PemError> {
    let pem = read_pem(kind, path)?;
    let parse_error = |reason: String| PemError::Parse {
        kind,
        path: path.to_path_buf(),
        reason,
    };

    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| parse_error(e.to_string()))?;
    if certs.is_empty() {
        return Err(parse_error("no PEM-encoded certificate found".to_string()));
    }
    Ok(pem)
}

fn load_ca(path: &Path) -> Result<Certificate, PemError> {
    read_certificates("CA", path).map(Certificate::from_pem)
}

fn load_key_pair(cert: &Path, key: &Path) -> Result<Identity, PemError> {
    let cert_pem = read_certificates("certificate", cert)?;
    let key_pem = read_pem("private key", key)?;
    PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| PemError::Parse {
        kind: "private key",
        path: key.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Identity::from_pem(cert_pem, key_pem))
}
