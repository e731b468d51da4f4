#[cfg(all(feature = "backend-openssl", feature = "backend-rustls"))]
compile_error!("only one of backend-openssl or backend-rustls can be enabled.");

#[cfg(not(any(feature = "backend-openssl", feature = "backend-rustls")))]
compile_error!("one of backend-openssl or backend-rustls must be enabled.");

#[cfg(feature = "backend-openssl")]
mod openssl;

#[cfg(feature = "backend-rustls")]
mod rustls;

#[cfg(feature = "backend-openssl")]
fn create_tls_backend() -> openssl::OpensslBackend {
    openssl::OpensslBackend::new()
}

#[cfg(feature = "backend-rustls")]
fn create_tls_backend() -> rustls::RustlsBackend {
    rustls::RustlsBackend::new()
}

use std::sync::{Arc, OnceLock};

use crate::async_tls::TlsBackend;

/// The process-wide engine. Engine initialization runs once, on first use.
pub fn get_tls_backend() -> Arc<dyn TlsBackend> {
    static INSTANCE: OnceLock<Arc<dyn TlsBackend>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(create_tls_backend()))
        .clone()
}
