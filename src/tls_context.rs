//! Long-lived TLS configuration from which channels are created.
//!
//! A [`TlsContext`] is immutable once built and shared by reference counting:
//! the driver holds one handle, and every [`crate::tls_channel::TlsChannel`]
//! holds another. Engine state is released when the last handle goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, warn};

use crate::async_tls::{ClientTlsSettings, ServerTlsSettings, TlsAcceptor, TlsConnector};
use crate::error::Result;
use crate::kx_policy::{KeyExchangeGroup, KeyExchangePolicy};
use crate::tls_backend::get_tls_backend;
use crate::tls_channel::ChannelRole;

/// Trust anchor looked up by [`TlsContext::new_client`], relative to the
/// working directory.
pub const DEFAULT_CA_CERT_PATH: &str = "cert/ca.crt";

pub const DEFAULT_SERVER_NAME: &str = "localhost";

pub(crate) enum ContextEngine {
    Server(Box<dyn TlsAcceptor>),
    Client(Box<dyn TlsConnector>),
}

pub struct TlsContext {
    engine: ContextEngine,
    group: KeyExchangeGroup,
    verify_peer: bool,
    backend_name: &'static str,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("role", &self.role())
            .field("group", &self.group)
            .field("verify_peer", &self.verify_peer)
            .field("backend", &self.backend_name)
            .finish()
    }
}

impl TlsContext {
    /// Responder context with the default policy.
    pub fn new_server(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Arc<Self>> {
        Self::new_server_with_settings(ServerTlsSettings {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
            policy: KeyExchangePolicy::default(),
        })
    }

    pub fn new_server_with_settings(settings: ServerTlsSettings) -> Result<Arc<Self>> {
        let backend = get_tls_backend();
        let acceptor = backend.create_acceptor(&settings).inspect_err(|e| {
            error!(
                "[{}] could not create server context from {} and {}: {e}",
                backend.name(),
                settings.cert_path.display(),
                settings.key_path.display()
            );
        })?;

        debug!(
            "created {} server context (group {})",
            backend.name(),
            settings.policy.group()
        );

        Ok(Arc::new(Self {
            engine: ContextEngine::Server(acceptor),
            group: settings.policy.group(),
            verify_peer: false,
            backend_name: backend.name(),
        }))
    }

    /// Initiator context with the default policy. Peer verification is on
    /// only if [`DEFAULT_CA_CERT_PATH`] exists.
    pub fn new_client() -> Result<Arc<Self>> {
        Self::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: Some(PathBuf::from(DEFAULT_CA_CERT_PATH)),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
    }

    /// A `ca_cert_path` that does not exist disables verification rather
    /// than failing; one that exists but cannot be parsed is an error.
    pub fn new_client_with_settings(mut settings: ClientTlsSettings) -> Result<Arc<Self>> {
        if let Some(ref ca_path) = settings.ca_cert_path {
            if !ca_path.exists() {
                warn!(
                    "trust anchor {} not found, server certificate will not be verified",
                    ca_path.display()
                );
                settings.ca_cert_path = None;
            }
        } else {
            warn!("no trust anchor configured, server certificate will not be verified");
        }

        let backend = get_tls_backend();
        let connector = backend.create_connector(&settings).inspect_err(|e| {
            error!("[{}] could not create client context: {e}", backend.name());
        })?;

        let verify_peer = settings.ca_cert_path.is_some();
        debug!(
            "created {} client context (group {}, verify_peer {verify_peer})",
            backend.name(),
            settings.policy.group()
        );

        Ok(Arc::new(Self {
            engine: ContextEngine::Client(connector),
            group: settings.policy.group(),
            verify_peer,
            backend_name: backend.name(),
        }))
    }

    /// Drops the caller's handle. Channels already created keep their own
    /// handle and stay usable until they are closed.
    pub fn free(self: Arc<Self>) {
        debug!(
            "freeing {:?} context handle ({} remaining)",
            self.role(),
            Arc::strong_count(&self) - 1
        );
    }

    pub fn role(&self) -> ChannelRole {
        match self.engine {
            ContextEngine::Server(_) => ChannelRole::Responder,
            ContextEngine::Client(_) => ChannelRole::Initiator,
        }
    }

    #[inline]
    pub fn key_exchange_group(&self) -> KeyExchangeGroup {
        self.group
    }

    /// Always false for server contexts.
    #[inline]
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    #[inline]
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub(crate) fn engine(&self) -> &ContextEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, TlsError};
    use crate::kx_policy::PolicyError;
    use crate::test_util::{TestIdentity, write_identity};

    #[test]
    fn test_server_context_from_valid_identity() {
        let dir = tempfile::tempdir().unwrap();
        let identity = TestIdentity::generate();
        let (cert_path, key_path) = write_identity(dir.path(), "srv", &identity);

        let ctx = TlsContext::new_server(&cert_path, &key_path).unwrap();
        assert_eq!(ctx.role(), ChannelRole::Responder);
        assert_eq!(ctx.key_exchange_group(), KeyExchangeGroup::MlKem768);
        assert!(!ctx.verify_peer());
        ctx.free();
    }

    #[test]
    fn test_server_context_rejects_mismatched_key() {
        let dir = tempfile::tempdir().unwrap();
        let identity = TestIdentity::generate();
        let other = TestIdentity::generate();
        let (cert_path, _) = write_identity(dir.path(), "srv", &identity);
        let (_, other_key) = write_identity(dir.path(), "other", &other);

        let err = TlsContext::new_server(&cert_path, &other_key).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_server_context_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = TlsContext::new_server(dir.path().join("nope.crt"), dir.path().join("nope.key"))
            .unwrap_err();
        assert!(matches!(err, TlsError::Config(_)), "{err}");
    }

    #[test]
    fn test_client_context_without_trust_anchor_disables_verification() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TlsContext::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: Some(dir.path().join("ca.crt")),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
        .unwrap();
        assert_eq!(ctx.role(), ChannelRole::Initiator);
        assert!(!ctx.verify_peer());
    }

    #[test]
    fn test_client_context_with_trust_anchor_enables_verification() {
        let dir = tempfile::tempdir().unwrap();
        let identity = TestIdentity::generate();
        let (cert_path, _) = write_identity(dir.path(), "ca", &identity);

        let ctx = TlsContext::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: Some(cert_path),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
        .unwrap();
        assert!(ctx.verify_peer());
    }

    #[test]
    fn test_client_context_rejects_malformed_trust_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("ca.crt");
        let bogus = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        std::fs::write(&ca_path, bogus).unwrap();

        let err = TlsContext::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: Some(ca_path),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_hybrid_policy_never_reaches_a_context() {
        let err = KeyExchangePolicy::from_names(&["X25519MLKEM768"])
            .map_err(TlsError::from)
            .unwrap_err();
        assert!(matches!(err, TlsError::Policy(PolicyError::HybridGroup(_))));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_contexts_are_independent() {
        // No server context exists in this test.
        let client = TlsContext::new_client_with_settings(ClientTlsSettings {
            ca_cert_path: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            policy: KeyExchangePolicy::default(),
        })
        .unwrap();
        assert_eq!(Arc::strong_count(&client), 1);
        client.free();
    }
}
