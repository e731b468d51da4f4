use std::fmt;

use thiserror::Error;

use crate::kx_policy::PolicyError;
use crate::tls_channel::{ChannelRole, HandshakeState};

/// Coarse failure classes. Drivers use these to decide whether a failure only
/// ends one connection or ends the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad paths, unreadable or mismatched identity, rejected algorithm policy.
    Configuration,
    /// The engine or the process ran out of something.
    Allocation,
    /// The peer rejected us, or we rejected the peer.
    Handshake,
    /// Transport failure after the channel was established.
    Io,
    /// The caller used a channel in a state or role that does not allow it.
    Usage,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Allocation => "allocation",
            ErrorClass::Handshake => "handshake",
            ErrorClass::Io => "io",
            ErrorClass::Usage => "usage",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("key exchange policy rejected: {0}")]
    Policy(#[from] PolicyError),
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel is not established (state: {0})")]
    NotEstablished(HandshakeState),
    #[error("{actual} channel cannot perform the {expected} handshake")]
    WrongRole {
        expected: ChannelRole,
        actual: ChannelRole,
    },
    #[error("handshake was already attempted (state: {0})")]
    HandshakeAlreadyAttempted(HandshakeState),
}

impl TlsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TlsError::Config(_) | TlsError::Policy(_) => ErrorClass::Configuration,
            TlsError::Allocation(_) => ErrorClass::Allocation,
            TlsError::Handshake(_) => ErrorClass::Handshake,
            TlsError::Io(_) => ErrorClass::Io,
            TlsError::NotEstablished(_)
            | TlsError::WrongRole { .. }
            | TlsError::HandshakeAlreadyAttempted(_) => ErrorClass::Usage,
        }
    }

    /// True when the failure can only affect the connection it happened on.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Handshake | ErrorClass::Io | ErrorClass::Usage
        )
    }
}

impl From<TlsError> for std::io::Error {
    fn from(e: TlsError) -> Self {
        let kind = match &e {
            TlsError::Io(inner) => inner.kind(),
            TlsError::Config(_) | TlsError::Policy(_) => std::io::ErrorKind::InvalidInput,
            TlsError::Allocation(_) => std::io::ErrorKind::OutOfMemory,
            TlsError::Handshake(_) => std::io::ErrorKind::ConnectionAborted,
            TlsError::NotEstablished(_) => std::io::ErrorKind::NotConnected,
            TlsError::WrongRole { .. } | TlsError::HandshakeAlreadyAttempted(_) => {
                std::io::ErrorKind::InvalidInput
            }
        };
        std::io::Error::new(kind, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TlsError>;
