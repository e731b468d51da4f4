use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::kx_policy::{KeyExchangeGroup, KeyExchangePolicy};

/// An established, encrypted byte stream produced by a handshake.
pub trait SecureStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// The group the handshake actually used.
    fn negotiated_group(&self) -> Option<KeyExchangeGroup>;

    fn protocol_version(&self) -> Option<&'static str>;
}

/// Responder-side settings.
#[derive(Debug, Clone)]
pub struct ServerTlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub policy: KeyExchangePolicy,
}

/// Initiator-side settings. Without `ca_cert_path` the peer certificate is
/// not verified.
#[derive(Debug, Clone)]
pub struct ClientTlsSettings {
    pub ca_cert_path: Option<PathBuf>,
    pub server_name: String,
    pub policy: KeyExchangePolicy,
}

/// One concrete handshake engine. Implementations are selected at build time,
/// see [`crate::tls_backend::get_tls_backend`].
pub trait TlsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_acceptor(&self, settings: &ServerTlsSettings) -> Result<Box<dyn TlsAcceptor>>;

    fn create_connector(&self, settings: &ClientTlsSettings) -> Result<Box<dyn TlsConnector>>;
}

#[async_trait]
pub trait TlsAcceptor: Send + Sync {
    async fn accept(&self, stream: TcpStream) -> Result<Box<dyn SecureStream>>;
}

#[async_trait]
pub trait TlsConnector: Send + Sync {
    async fn connect(&self, stream: TcpStream) -> Result<Box<dyn SecureStream>>;
}
