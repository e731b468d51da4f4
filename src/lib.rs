//! pqecho - TLS 1.3 echo client and server restricted to ML-KEM-768.
//!
//! The handshake engine is chosen at build time with the `backend-rustls`
//! (default) or `backend-openssl` feature. Either way the rest of the crate
//! only sees the traits in [`async_tls`] and the two handle types:
//!
//! - [`tls_context::TlsContext`]: immutable configuration, shared as `Arc`
//! - [`tls_channel::TlsChannel`]: one connection, owned by one task
//!
//! Every context offers exactly one key exchange group, see [`kx_policy`].

pub mod async_tls;
pub mod cert_gen;
pub mod config;
pub mod echo_client;
pub mod echo_server;
pub mod error;
pub mod kx_policy;
pub mod socket_util;
pub mod tls_backend;
pub mod tls_channel;
pub mod tls_context;

#[cfg(test)]
mod test_util;
