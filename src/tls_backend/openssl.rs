use std::ffi::{CStr, c_char};
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use foreign_types::ForeignTypeRef;
use log::{debug, error};
use openssl::error::ErrorStack;
use openssl::ssl::{
    Ssl, SslContext, SslContextBuilder, SslFiletype, SslMethod, SslRef, SslVerifyMode,
    SslVersion,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::async_tls::{
    ClientTlsSettings, SecureStream, ServerTlsSettings, TlsAcceptor, TlsBackend, TlsConnector,
};
use crate::error::{Result, TlsError};
use crate::kx_policy::{KeyExchangeGroup, KeyExchangePolicy};

fn config_error(what: &str) -> impl FnOnce(ErrorStack) -> TlsError + '_ {
    move |e| {
        error!("[openssl] {what} failed: {e}");
        TlsError::Config(format!("{what}: {e}"))
    }
}

fn allocation_error(what: &str) -> impl FnOnce(ErrorStack) -> TlsError + '_ {
    move |e| TlsError::Allocation(format!("{what}: {e}"))
}

// Added in OpenSSL 3.5, not bound by openssl-sys yet.
unsafe extern "C" {
    fn SSL_get0_group_name(s: *mut openssl_sys::SSL) -> *const c_char;
}

/// The group the engine reports for the completed handshake.
fn negotiated_group(ssl: &SslRef) -> Option<KeyExchangeGroup> {
    // SAFETY: `ssl` is a live SSL object; the returned string is owned by
    // OpenSSL and only borrowed for the duration of this call.
    let name = unsafe {
        let ptr = SSL_get0_group_name(ssl.as_ptr());
        if ptr.is_null() {
            return None;
        }
        CStr::from_ptr(ptr)
    };
    KeyExchangeGroup::from_name(&name.to_string_lossy())
}

struct OpensslStream {
    inner: SslStream<TcpStream>,
}

impl AsyncRead for OpensslStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for OpensslStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl SecureStream for OpensslStream {
    fn negotiated_group(&self) -> Option<KeyExchangeGroup> {
        negotiated_group(self.inner.ssl())
    }

    fn protocol_version(&self) -> Option<&'static str> {
        Some(self.inner.ssl().version_str())
    }
}

struct OpensslAcceptor {
    context: SslContext,
}

#[async_trait]
impl TlsAcceptor for OpensslAcceptor {
    async fn accept(&self, stream: TcpStream) -> Result<Box<dyn SecureStream>> {
        let ssl = Ssl::new(&self.context).map_err(allocation_error("SSL_new"))?;
        let mut inner = SslStream::new(ssl, stream).map_err(allocation_error("SSL_set_fd"))?;
        Pin::new(&mut inner)
            .accept()
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))?;
        Ok(Box::new(OpensslStream { inner }))
    }
}

struct OpensslConnector {
    context: SslContext,
    server_name: String,
    verify: bool,
}

#[async_trait]
impl TlsConnector for OpensslConnector {
    async fn connect(&self, stream: TcpStream) -> Result<Box<dyn SecureStream>> {
        let mut ssl = Ssl::new(&self.context).map_err(allocation_error("SSL_new"))?;

        let server_ip = self.server_name.parse::<IpAddr>().ok();
        if server_ip.is_none() {
            ssl.set_hostname(&self.server_name)
                .map_err(|e| TlsError::Handshake(format!("could not set SNI: {e}")))?;
        }
        if self.verify {
            let param = ssl.param_mut();
            let result = match server_ip {
                Some(ip) => param.set_ip(ip),
                None => param.set_host(&self.server_name),
            };
            result.map_err(|e| TlsError::Handshake(format!("could not set peer name: {e}")))?;
        }

        let mut inner = SslStream::new(ssl, stream).map_err(allocation_error("SSL_set_fd"))?;
        Pin::new(&mut inner)
            .connect()
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))?;
        Ok(Box::new(OpensslStream { inner }))
    }
}

pub struct OpensslBackend;

impl OpensslBackend {
    pub fn new() -> Self {
        debug!("initializing openssl");
        openssl::init();
        Self
    }
}

/// TLS 1.3 only, offering exactly the policy's groups.
fn create_context_builder(
    method: SslMethod,
    policy: &KeyExchangePolicy,
) -> Result<SslContextBuilder> {
    let mut builder = SslContext::builder(method).map_err(allocation_error("SSL_CTX_new"))?;
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_3))
        .map_err(config_error("set min protocol version"))?;
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_3))
        .map_err(config_error("set max protocol version"))?;

    let groups = policy
        .offered_groups()
        .iter()
        .map(|g| g.name())
        .collect::<Vec<_>>()
        .join(":");
    builder
        .set_groups_list(&groups)
        .map_err(config_error("set groups"))?;
    debug!("[openssl] groups set: {groups}");

    Ok(builder)
}

impl TlsBackend for OpensslBackend {
    fn name(&self) -> &'static str {
        "openssl"
    }

    fn create_acceptor(&self, settings: &ServerTlsSettings) -> Result<Box<dyn TlsAcceptor>> {
        let mut builder = create_context_builder(SslMethod::tls_server(), &settings.policy)?;
        builder
            .set_certificate_chain_file(&settings.cert_path)
            .map_err(config_error("load certificate"))?;
        builder
            .set_private_key_file(&settings.key_path, SslFiletype::PEM)
            .map_err(config_error("load private key"))?;
        builder.check_private_key().map_err(|e| {
            error!("[openssl] load cert/key failed: {e}");
            TlsError::Config(format!(
                "private key {} does not match certificate {}: {e}",
                settings.key_path.display(),
                settings.cert_path.display()
            ))
        })?;

        Ok(Box::new(OpensslAcceptor {
            context: builder.build(),
        }))
    }

    fn create_connector(&self, settings: &ClientTlsSettings) -> Result<Box<dyn TlsConnector>> {
        let mut builder = create_context_builder(SslMethod::tls_client(), &settings.policy)?;
        let verify = match settings.ca_cert_path {
            Some(ref ca_path) => {
                builder
                    .set_ca_file(ca_path)
                    .map_err(config_error("load CA"))?;
                builder.set_verify(SslVerifyMode::PEER);
                true
            }
            None => {
                builder.set_verify(SslVerifyMode::NONE);
                false
            }
        };

        Ok(Box::new(OpensslConnector {
            context: builder.build(),
            server_name: settings.server_name.clone(),
            verify,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestIdentity, connected_pair, write_identity};

    fn server_settings(dir: &std::path::Path) -> ServerTlsSettings {
        let (cert_path, key_path) = write_identity(dir, "srv", &TestIdentity::generate());
        ServerTlsSettings {
            cert_path,
            key_path,
            policy: KeyExchangePolicy::default(),
        }
    }

    #[test]
    fn test_acceptor_rejects_mismatched_key() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, _) = write_identity(dir.path(), "srv", &TestIdentity::generate());
        let (_, other_key_path) = write_identity(dir.path(), "other", &TestIdentity::generate());

        let result = OpensslBackend::new().create_acceptor(&ServerTlsSettings {
            cert_path,
            key_path: other_key_path,
            policy: KeyExchangePolicy::default(),
        });
        match result {
            Err(TlsError::Config(msg)) => assert!(msg.contains("does not match"), "{msg}"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("mismatched cert/key must not produce an acceptor"),
        }
    }

    #[test]
    fn test_connector_rejects_malformed_trust_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("ca.crt");
        std::fs::write(&ca_path, "not a certificate").unwrap();

        let result = OpensslBackend::new().create_connector(&ClientTlsSettings {
            ca_cert_path: Some(ca_path),
            server_name: "localhost".to_string(),
            policy: KeyExchangePolicy::default(),
        });
        assert!(matches!(result, Err(TlsError::Config(_))));
    }

    #[tokio::test]
    async fn test_engine_reports_observed_group() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OpensslBackend::new();
        let acceptor = backend
            .create_acceptor(&server_settings(dir.path()))
            .unwrap();
        let connector = backend
            .create_connector(&ClientTlsSettings {
                ca_cert_path: None,
                server_name: "localhost".to_string(),
                policy: KeyExchangePolicy::default(),
            })
            .unwrap();

        let (client_stream, server_stream) = connected_pair().await;
        let (c, s) = tokio::join!(
            connector.connect(client_stream),
            acceptor.accept(server_stream)
        );
        let (client, server) = (c.unwrap(), s.unwrap());
        assert_eq!(client.negotiated_group(), Some(KeyExchangeGroup::MlKem768));
        assert_eq!(server.negotiated_group(), Some(KeyExchangeGroup::MlKem768));
        assert_eq!(client.protocol_version(), Some("TLSv1.3"));
    }

    #[tokio::test]
    async fn test_classical_and_hybrid_client_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let acceptor = OpensslBackend::new()
            .create_acceptor(&server_settings(dir.path()))
            .unwrap();

        let (client_stream, server_stream) = connected_pair().await;
        let server = tokio::spawn(async move { acceptor.accept(server_stream).await.map(|_| ()) });

        // Offers everything except the one group the server accepts.
        let mut builder = SslContext::builder(SslMethod::tls_client()).unwrap();
        builder
            .set_min_proto_version(Some(SslVersion::TLS1_3))
            .unwrap();
        builder.set_groups_list("X25519:X25519MLKEM768").unwrap();
        builder.set_verify(SslVerifyMode::NONE);
        let ssl = Ssl::new(&builder.build()).unwrap();
        let mut client = SslStream::new(ssl, client_stream).unwrap();
        let client_result = Pin::new(&mut client).connect().await;

        assert!(client_result.is_err());
        assert!(matches!(
            server.await.unwrap(),
            Err(TlsError::Handshake(_))
        ));
    }
}
