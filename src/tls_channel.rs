//! One secure connection over one TCP stream.
//!
//! ```text
//! Unstarted --handshake ok--> Established --close--> (released)
//! Unstarted --handshake err-> Failed      --close--> (released)
//! ```
//!
//! `InProgress` is only observable when the handshake future is dropped before
//! it finishes, e.g. by a timeout in the caller. Such a channel can only be
//! closed.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::async_tls::SecureStream;
use crate::error::{Result, TlsError};
use crate::kx_policy::KeyExchangeGroup;
use crate::tls_context::{ContextEngine, TlsContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unstarted,
    InProgress,
    Established,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeState::Unstarted => "unstarted",
            HandshakeState::InProgress => "in progress",
            HandshakeState::Established => "established",
            HandshakeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Connecting side (client).
    Initiator,
    /// Accepting side (server).
    Responder,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Initiator => f.write_str("initiator"),
            ChannelRole::Responder => f.write_str("responder"),
        }
    }
}

enum Transport {
    Plain(TcpStream),
    Secure(Box<dyn SecureStream>),
    // The stream was handed to the engine and not given back.
    Consumed,
}

pub struct TlsChannel {
    context: Arc<TlsContext>,
    state: HandshakeState,
    transport: Transport,
    peer_addr: Option<SocketAddr>,
}

impl fmt::Debug for TlsChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsChannel")
            .field("role", &self.role())
            .field("state", &self.state)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl TlsChannel {
    /// Binds `stream` to `context`. The channel owns the stream from here on,
    /// and its role is the context's role.
    pub fn wrap(context: &Arc<TlsContext>, stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr().ok();
        debug!(
            "wrapping {} stream from {peer_addr:?}",
            context.role()
        );
        Ok(Self {
            context: context.clone(),
            state: HandshakeState::Unstarted,
            transport: Transport::Plain(stream),
            peer_addr,
        })
    }

    /// Responder handshake.
    pub async fn accept(&mut self) -> Result<()> {
        self.check_handshake_allowed(ChannelRole::Responder)?;
        self.drive_handshake().await
    }

    /// Initiator handshake.
    pub async fn connect(&mut self) -> Result<()> {
        self.check_handshake_allowed(ChannelRole::Initiator)?;
        self.drive_handshake().await
    }

    /// Runs [`accept`](Self::accept) or [`connect`](Self::connect) depending
    /// on the role.
    pub async fn handshake(&mut self) -> Result<()> {
        match self.role() {
            ChannelRole::Responder => self.accept().await,
            ChannelRole::Initiator => self.connect().await,
        }
    }

    fn check_handshake_allowed(&self, expected: ChannelRole) -> Result<()> {
        let actual = self.role();
        if actual != expected {
            return Err(TlsError::WrongRole { expected, actual });
        }
        if self.state != HandshakeState::Unstarted {
            return Err(TlsError::HandshakeAlreadyAttempted(self.state));
        }
        Ok(())
    }

    async fn drive_handshake(&mut self) -> Result<()> {
        let stream = match std::mem::replace(&mut self.transport, Transport::Consumed) {
            Transport::Plain(stream) => stream,
            other => {
                self.transport = other;
                return Err(TlsError::HandshakeAlreadyAttempted(self.state));
            }
        };

        self.state = HandshakeState::InProgress;
        // Any non-success from the engine is a failed handshake, there is
        // no retry.
        let result = match self.context.engine() {
            ContextEngine::Server(acceptor) => acceptor.accept(stream).await,
            ContextEngine::Client(connector) => connector.connect(stream).await,
        };

        match result {
            Ok(secure) => {
                debug!(
                    "{} handshake with {:?} established ({:?}, group {:?})",
                    self.role(),
                    self.peer_addr,
                    secure.protocol_version(),
                    secure.negotiated_group()
                );
                self.transport = Transport::Secure(secure);
                self.state = HandshakeState::Established;
                Ok(())
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(match e {
                    TlsError::Io(io) => TlsError::Handshake(io.to_string()),
                    other => other,
                })
            }
        }
    }

    fn established_stream(&mut self) -> Result<&mut Box<dyn SecureStream>> {
        match (&mut self.transport, self.state) {
            (Transport::Secure(stream), HandshakeState::Established) => Ok(stream),
            (_, state) => Err(TlsError::NotEstablished(state)),
        }
    }

    /// Reads decrypted application data. `Ok(0)` means the peer closed the
    /// connection. May return fewer bytes than `buf` holds.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.established_stream()?;
        Ok(stream.read(buf).await?)
    }

    /// Encrypts and sends application data. May accept fewer bytes than
    /// `buf` holds; the caller decides whether to send the rest.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.established_stream()?;
        let n = stream.write(buf).await?;
        stream.flush().await?;
        Ok(n)
    }

    /// Sends a close notification if possible, then releases the engine
    /// session and the socket.
    pub async fn close(mut self) {
        match std::mem::replace(&mut self.transport, Transport::Consumed) {
            Transport::Secure(mut stream) => {
                if let Err(e) = stream.shutdown().await {
                    debug!("close notify to {:?} failed: {e}", self.peer_addr);
                }
            }
            Transport::Plain(_) | Transport::Consumed => {}
        }
        debug!(
            "closed {} channel to {:?} (state {})",
            self.role(),
            self.peer_addr,
            self.state
        );
    }

    #[inline]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    #[inline]
    pub fn role(&self) -> ChannelRole {
        self.context.role()
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    pub fn negotiated_group(&self) -> Option<KeyExchangeGroup> {
        match self.transport {
            Transport::Secure(ref stream) => stream.negotiated_group(),
            _ => None,
        }
    }

    pub fn protocol_version(&self) -> Option<&'static str> {
        match self.transport {
            Transport::Secure(ref stream) => stream.protocol_version(),
            _ => None,
        }
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    #[inline]
    pub fn context(&self) -> &Arc<TlsContext> {
        &self.context
    }
}
