use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use log::{debug, error};
use rustls::crypto::{CryptoProvider, SupportedKxGroup, aws_lc_rs};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::net::TcpStream;

use crate::async_tls::{
    ClientTlsSettings, SecureStream, ServerTlsSettings, TlsAcceptor, TlsBackend, TlsConnector,
};
use crate::error::{Result, TlsError};
use crate::kx_policy::{KeyExchangeGroup, KeyExchangePolicy};

static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn negotiated_group(conn: &rustls::CommonState) -> Option<KeyExchangeGroup> {
    conn.negotiated_key_exchange_group()
        .and_then(|group| KeyExchangeGroup::from_iana_code(u16::from(group.name())))
}

fn protocol_version(conn: &rustls::CommonState) -> Option<&'static str> {
    match conn.protocol_version()? {
        rustls::ProtocolVersion::TLSv1_3 => Some("TLSv1.3"),
        rustls::ProtocolVersion::TLSv1_2 => Some("TLSv1.2"),
        _ => Some("unknown"),
    }
}

impl SecureStream for tokio_rustls::client::TlsStream<TcpStream> {
    fn negotiated_group(&self) -> Option<KeyExchangeGroup> {
        negotiated_group(self.get_ref().1)
    }

    fn protocol_version(&self) -> Option<&'static str> {
        protocol_version(self.get_ref().1)
    }
}

impl SecureStream for tokio_rustls::server::TlsStream<TcpStream> {
    fn negotiated_group(&self) -> Option<KeyExchangeGroup> {
        negotiated_group(self.get_ref().1)
    }

    fn protocol_version(&self) -> Option<&'static str> {
        protocol_version(self.get_ref().1)
    }
}

#[async_trait]
impl TlsAcceptor for tokio_rustls::TlsAcceptor {
    async fn accept(&self, stream: TcpStream) -> Result<Box<dyn SecureStream>> {
        tokio_rustls::TlsAcceptor::accept(self, stream)
            .await
            .map(|s| Box::new(s) as Box<dyn SecureStream>)
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

struct RustlsConnector {
    connector: tokio_rustls::TlsConnector,
    server_name: ServerName<'static>,
}

#[async_trait]
impl TlsConnector for RustlsConnector {
    async fn connect(&self, stream: TcpStream) -> Result<Box<dyn SecureStream>> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
            .map(|s| Box::new(s) as Box<dyn SecureStream>)
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

pub struct RustlsBackend;

impl RustlsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TlsBackend for RustlsBackend {
    fn name(&self) -> &'static str {
        "rustls"
    }

    fn create_acceptor(&self, settings: &ServerTlsSettings) -> Result<Box<dyn TlsAcceptor>> {
        let config = create_server_config(settings)?;
        let acceptor: tokio_rustls::TlsAcceptor = Arc::new(config).into();
        Ok(Box::new(acceptor))
    }

    fn create_connector(&self, settings: &ClientTlsSettings) -> Result<Box<dyn TlsConnector>> {
        let server_name = ServerName::try_from(settings.server_name.clone()).map_err(|e| {
            TlsError::Config(format!(
                "invalid server name {}: {e}",
                settings.server_name
            ))
        })?;
        let config = create_client_config(settings)?;
        Ok(Box::new(RustlsConnector {
            connector: Arc::new(config).into(),
            server_name,
        }))
    }
}

fn get_base_provider() -> &'static CryptoProvider {
    static INSTANCE: OnceLock<CryptoProvider> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        debug!("initializing aws-lc-rs crypto provider");
        aws_lc_rs::default_provider()
    })
}

fn kx_group_for(group: KeyExchangeGroup) -> Result<&'static dyn SupportedKxGroup> {
    match group {
        KeyExchangeGroup::MlKem768 => Ok(aws_lc_rs::kx_group::MLKEM768),
        other => Err(TlsError::Config(format!(
            "rustls backend cannot offer {other} on its own"
        ))),
    }
}

/// A provider whose only key exchange groups are the ones the policy allows.
fn create_provider(policy: &KeyExchangePolicy) -> Result<Arc<CryptoProvider>> {
    let mut provider = get_base_provider().clone();
    provider.kx_groups = policy
        .offered_groups()
        .iter()
        .map(|group| kx_group_for(*group))
        .collect::<Result<Vec<_>>>()?;

    let offered: Vec<u16> = provider
        .kx_groups
        .iter()
        .map(|g| u16::from(g.name()))
        .collect();
    let expected: Vec<u16> = policy
        .offered_groups()
        .iter()
        .map(|g| g.iana_code())
        .collect();
    if offered != expected {
        return Err(TlsError::Config(format!(
            "provider offers groups {offered:04x?}, expected {expected:04x?}"
        )));
    }

    debug!("groups set: {}", policy.group());
    Ok(Arc::new(provider))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| {
            TlsError::Config(format!(
                "could not read certificates from {}: {e}",
                path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(TlsError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| {
        TlsError::Config(format!(
            "could not read private key from {}: {e}",
            path.display()
        ))
    })
}

fn create_server_config(settings: &ServerTlsSettings) -> Result<rustls::ServerConfig> {
    let provider = create_provider(&settings.policy)?;
    let certs = load_certs(&settings.cert_path)?;
    let privkey = load_private_key(&settings.key_path)?;

    let signing_key = provider
        .key_provider
        .load_private_key(privkey.clone_key())
        .map_err(|e| TlsError::Config(format!("unsupported private key: {e}")))?;
    rustls::sign::CertifiedKey::new(certs.clone(), signing_key)
        .keys_match()
        .map_err(|e| {
            error!("[rustls] load cert/key failed: {e}");
            TlsError::Config(format!(
                "private key {} does not match certificate {}: {e}",
                settings.key_path.display(),
                settings.cert_path.display()
            ))
        })?;

    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|e| TlsError::Config(format!("unsupported protocol configuration: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, privkey)
        .map_err(|e| TlsError::Config(format!("bad certificate/key: {e}")))?;
    // Every connection runs a full ML-KEM-768 exchange.
    config.send_tls13_tickets = 0;

    Ok(config)
}

fn create_client_config(settings: &ClientTlsSettings) -> Result<rustls::ClientConfig> {
    let provider = create_provider(&settings.policy)?;
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|e| TlsError::Config(format!("unsupported protocol configuration: {e}")))?;

    let mut config = match settings.ca_cert_path {
        Some(ref ca_path) => {
            let mut root_store = rustls::RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                root_store.add(cert).map_err(|e| {
                    TlsError::Config(format!(
                        "invalid trust anchor in {}: {e}",
                        ca_path.display()
                    ))
                })?;
            }
            let verifier = rustls::client::WebPkiServerVerifier::builder_with_provider(
                Arc::new(root_store),
                provider,
            )
            .build()
            .map_err(|e| TlsError::Config(format!("could not build verifier: {e}")))?;
            builder.with_webpki_verifier(verifier).with_no_client_auth()
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DisabledVerifier {
                supported_algs: provider.signature_verification_algorithms,
            }))
            .with_no_client_auth(),
    };
    config.resumption = rustls::client::Resumption::disabled();

    Ok(config)
}

#[derive(Debug)]
struct DisabledVerifier {
    supported_algs: rustls::crypto::WebPkiSupportedAlgorithms,
}

impl rustls::client::danger::ServerCertVerifier for DisabledVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}
