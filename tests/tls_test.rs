//! Tests for transport security resolution.
//!
//! Certificates are generated per test with rcgen; nothing touches the
//! network.

mod common;

use std::path::PathBuf;

use bifrost::tls::{ClientCredentials, TlsClientSettings, TlsError, TlsServerSettings, TlsSettings};
use bifrost::{BifrostError, ClientSettings, NopHost, ServerSettings, TelemetrySettings};
use common::TestPki;

fn missing() -> Option<PathBuf> {
    Some(PathBuf::from("/doesnt/exist"))
}

// ============================================================================
// Client
// ============================================================================

#[test]
fn insecure_without_material_reads_no_files() {
    let settings = TlsClientSettings {
        insecure: true,
        ..Default::default()
    };
    let creds = settings.load_credentials().unwrap();
    assert!(matches!(creds, ClientCredentials::Insecure));
    assert_eq!(creds.scheme(), "http");
}

#[test]
fn insecure_with_ca_still_loads_the_ca() {
    let settings = TlsClientSettings {
        tls: TlsSettings {
            ca_file: missing(),
            ..Default::default()
        },
        insecure: true,
        ..Default::default()
    };
    let err = settings.load_credentials().unwrap_err();
    assert!(matches!(err, TlsError::CaPool(_)));
}

#[test]
fn default_client_uses_tls() {
    let creds = TlsClientSettings::default().load_credentials().unwrap();
    assert!(creds.is_secure());
    assert_eq!(creds.scheme(), "https");
}

#[test]
fn client_with_ca_and_key_pair() {
    let pki = TestPki::new();
    let settings = TlsClientSettings {
        tls: TlsSettings {
            ca_file: Some(pki.ca.clone()),
            cert_file: Some(pki.client_cert.clone()),
            key_file: Some(pki.client_key.clone()),
        },
        server_name_override: Some("localhost".to_string()),
        ..Default::default()
    };
    assert!(settings.load_credentials().unwrap().is_secure());
}

#[test]
fn client_missing_ca_is_reported_with_path() {
    let settings = ClientSettings {
        endpoint: "localhost:1234".to_string(),
        tls: TlsClientSettings {
            tls: TlsSettings {
                ca_file: missing(),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };
    let err = settings
        .to_dial_options(&NopHost, &TelemetrySettings::default())
        .unwrap_err();
    assert!(
        err.to_string().starts_with(
            "failed to load TLS config: failed to load CA CertPool: failed to load CA /doesnt/exist:"
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn cert_without_key_is_rejected_before_reading_it() {
    for (cert_file, key_file) in [(missing(), None), (None, missing())] {
        let settings = TlsClientSettings {
            tls: TlsSettings {
                ca_file: None,
                cert_file,
                key_file,
            },
            ..Default::default()
        };
        let err = settings.load_credentials().unwrap_err();
        assert!(matches!(err, TlsError::CertKeyMismatch));
        assert_eq!(
            err.to_string(),
            "for auth via TLS, either both certificate and key must be supplied, or neither"
        );
    }
}

#[test]
fn garbage_pem_is_a_parse_error() {
    let pki = TestPki::new();
    let bogus = pki.write("bogus.pem", "not a certificate");
    let settings = TlsClientSettings {
        tls: TlsSettings {
            ca_file: Some(bogus),
            ..Default::default()
        },
        ..Default::default()
    };
    let err = settings.load_credentials().unwrap_err();
    assert!(
        err.to_string().contains("failed to parse CA"),
        "unexpected error: {err}"
    );
}

#[test]
fn key_file_without_key_is_a_key_pair_error() {
    let pki = TestPki::new();
    let settings = TlsClientSettings {
        tls: TlsSettings {
            cert_file: Some(pki.client_cert.clone()),
            // A certificate where the key should be.
            key_file: Some(pki.client_cert.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    let err = settings.load_credentials().unwrap_err();
    assert!(matches!(err, TlsError::KeyPair(_)));
}

#[test]
fn skip_verify_is_rejected() {
    let settings = TlsClientSettings {
        insecure_skip_verify: true,
        ..Default::default()
    };
    assert!(matches!(
        settings.load_credentials(),
        Err(TlsError::SkipVerifyUnsupported)
    ));
}

// ============================================================================
// Server
// ============================================================================

fn server_error(tls: TlsServerSettings) -> BifrostError {
    let settings = ServerSettings {
        net: bifrost::NetAddr::tcp("127.0.0.1:1234"),
        tls: Some(tls),
        ..Default::default()
    };
    settings
        .to_server_options(&NopHost, &TelemetrySettings::default())
        .unwrap_err()
}

#[test]
fn server_tls_errors() {
    let cases = [
        (
            TlsServerSettings {
                tls: TlsSettings {
                    ca_file: missing(),
                    ..Default::default()
                },
                ..Default::default()
            },
            "failed to load TLS config: failed to load CA CertPool: failed to load CA /doesnt/exist:",
        ),
        (
            TlsServerSettings {
                tls: TlsSettings {
                    cert_file: missing(),
                    ..Default::default()
                },
                ..Default::default()
            },
            "failed to load TLS config: for auth via TLS, either both certificate and key must be supplied, or neither",
        ),
        (
            TlsServerSettings {
                client_ca_file: missing(),
                ..Default::default()
            },
            "failed to load TLS config: failed to load client CA CertPool: failed to load CA /doesnt/exist:",
        ),
    ];

    for (tls, expected) in cases {
        let err = server_error(tls);
        assert!(matches!(err, BifrostError::TlsConfig(_)));
        assert!(
            err.to_string().starts_with(expected),
            "expected {expected:?}, got {err}"
        );
    }
}

#[test]
fn server_mutual_tls_credentials() {
    let pki = TestPki::new();
    let settings = TlsServerSettings {
        tls: TlsSettings {
            ca_file: None,
            cert_file: Some(pki.server_cert.clone()),
            key_file: Some(pki.server_key.clone()),
        },
        client_ca_file: Some(pki.ca.clone()),
    };
    let creds = settings.load_credentials().unwrap();
    assert!(creds.has_identity());
    assert!(creds.requires_client_auth());
    assert!(creds.tls_config().is_ok());
}

#[test]
fn server_without_identity_cannot_build_tls_config() {
    let creds = TlsServerSettings::default().load_credentials().unwrap();
    assert!(!creds.has_identity());
    assert!(matches!(
        creds.tls_config(),
        Err(TlsError::MissingServerIdentity)
    ));
}
