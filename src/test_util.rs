//! Shared fixtures for the in-crate tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

use crate::async_tls::ClientTlsSettings;
use crate::cert_gen::{DEFAULT_SUBJECT_ALT_NAMES, generate_identity};
use crate::kx_policy::KeyExchangePolicy;
use crate::tls_channel::TlsChannel;
use crate::tls_context::{DEFAULT_SERVER_NAME, TlsContext};

pub struct TestIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let identity = generate_identity(DEFAULT_SUBJECT_ALT_NAMES).unwrap();
        Self {
            cert_pem: identity.cert_pem,
            key_pem: identity.key_pem,
        }
    }
}

/// Writes `<stem>.crt` and `<stem>.key` into `dir`.
pub fn write_identity(dir: &Path, stem: &str, identity: &TestIdentity) -> (PathBuf, PathBuf) {
    let cert_path = dir.join(format!("{stem}.crt"));
    let key_path = dir.join(format!("{stem}.key"));
    std::fs::write(&cert_path, &identity.cert_pem).unwrap();
    std::fs::write(&key_path, &identity.key_pem).unwrap();
    (cert_path, key_path)
}

/// A server identity on disk whose certificate is also the trust anchor.
pub struct TestPki {
    _dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = write_identity(dir.path(), "srv", &TestIdentity::generate());
        Self {
            _dir: dir,
            cert_path,
            key_path,
        }
    }

    pub fn server_context(&self) -> Arc<TlsContext> {
        TlsContext::new_server(&self.cert_path, &self.key_path).unwrap()
    }

    /// No trust anchor, peer certificate not verified.
    pub fn client_context(&self) -> Arc<TlsContext> {
        TlsContext::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
        .unwrap()
    }

    pub fn verifying_client_context(&self) -> Arc<TlsContext> {
        TlsContext::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: Some(self.cert_path.clone()),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
        .unwrap()
    }
}

/// Two ends of a loopback TCP connection, client first.
pub async fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), server.unwrap().0)
}

/// Client and server channels with the handshake done. The contexts are only
/// held by the channels.
pub async fn established_pair(pki: &TestPki) -> (TlsChannel, TlsChannel) {
    let client_ctx = pki.client_context();
    let server_ctx = pki.server_context();
    let (client_stream, server_stream) = connected_pair().await;
    let mut client = TlsChannel::wrap(&client_ctx, client_stream).unwrap();
    let mut server = TlsChannel::wrap(&server_ctx, server_stream).unwrap();
    let (c, s) = tokio::join!(client.connect(), server.accept());
    c.unwrap();
    s.unwrap();
    (client, server)
}
