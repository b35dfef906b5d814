//! Shared fixtures: a throwaway PKI and an in-process health server.

#![allow(dead_code)]

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bifrost::{Address, ClientInfo, Host, ServerSettings, TelemetrySettings};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::codec::CompressionEncoding;
use tower::{Layer, Service};

// ============================================================================
// PKI
// ============================================================================

/// CA, server and client certificates written to a temporary directory.
pub struct TestPki {
    pub dir: TempDir,
    pub ca: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "bifrost test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let (server_cert, server_key) =
            leaf(&ca, &ca_key, "localhost", ExtendedKeyUsagePurpose::ServerAuth);
        let (client_cert, client_key) =
            leaf(&ca, &ca_key, "bifrost-client", ExtendedKeyUsagePurpose::ClientAuth);

        let write = |name: &str, pem: String| {
            let path = dir.path().join(name);
            fs::write(&path, pem).unwrap();
            path
        };

        Self {
            ca: write("ca.pem", ca.pem()),
            server_cert: write("server.pem", server_cert),
            server_key: write("server.key", server_key),
            client_cert: write("client.pem", client_cert),
            client_key: write("client.key", client_key),
            dir,
        }
    }

    /// Write arbitrary content next to the generated material.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn leaf(
    ca: &Certificate,
    ca_key: &KeyPair,
    name: &str,
    usage: ExtendedKeyUsagePurpose,
) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params.extended_key_usages = vec![usage];
    let cert = params.signed_by(&key, ca, ca_key).unwrap();
    (cert.pem(), key.serialize_pem())
}

// ============================================================================
// Server
// ============================================================================

/// A health server running in the background.
pub struct TestServer {
    /// Bound address of the listener.
    pub addr: Address,
    /// Identity observed for every call, in arrival order.
    pub seen: Arc<Mutex<Vec<ClientInfo>>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl TestServer {
    /// Client endpoint for a TCP server.
    pub fn endpoint(&self) -> String {
        match &self.addr {
            Address::Inet(addr) => addr.to_string(),
            Address::Unix(Some(path)) => format!("unix://{}", path.display()),
            Address::Unix(None) => panic!("unnamed unix listener"),
        }
    }

    pub fn seen(&self) -> Vec<ClientInfo> {
        self.seen.lock().unwrap().clone()
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

/// Compile `settings`, bind its listener and serve the health service.
///
/// Handler-side identity is captured by a layer installed inside the
/// compiled call layer, right in front of the service.
pub async fn start_server(settings: &ServerSettings, host: &dyn Host) -> TestServer {
    let options = settings
        .to_server_options(host, &TelemetrySettings::new("test-server"))
        .unwrap();
    let listener = settings.to_listener().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let (_reporter, health) = tonic_health::server::health_reporter();
    let health = health
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd);

    let router = options
        .builder()
        .unwrap()
        .layer(RecordLayer { seen: recorder })
        .add_service(health);

    let (tx, rx) = oneshot::channel::<()>();
    let incoming = options.incoming(listener);
    let handle = tokio::spawn(router.serve_with_incoming_shutdown(incoming, async {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        seen,
        shutdown: Some(tx),
        handle,
    }
}

/// Records the request-scoped [`ClientInfo`] the service is about to see.
#[derive(Clone)]
struct RecordLayer {
    seen: Arc<Mutex<Vec<ClientInfo>>>,
}

impl<S> Layer<S> for RecordLayer {
    type Service = RecordService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecordService {
            inner,
            seen: self.seen.clone(),
        }
    }
}

#[derive(Clone)]
struct RecordService<S> {
    inner: S,
    seen: Arc<Mutex<Vec<ClientInfo>>>,
}

impl<S, B> Service<http::Request<B>> for RecordService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        self.seen
            .lock()
            .unwrap()
            .push(ClientInfo::from_extensions(request.extensions()));
        self.inner.call(request)
    }
}
