//! Sequential echo server over [`TlsChannel`].
//!
//! Connections are served one at a time, in accept order. A failure on one
//! connection is logged and the loop moves on to the next.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_HANDSHAKE_TIMEOUT_SECS, ServerConfig};
use crate::error::{Result, TlsError};
use crate::tls_channel::TlsChannel;
use crate::tls_context::TlsContext;

/// Pause after a failed accept so a persistent error such as EMFILE does not
/// spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EchoServerOptions {
    pub handshake_timeout: Option<Duration>,
    pub buffer_size: usize,
    /// Copy every echoed byte to stdout.
    pub mirror_to_stdout: bool,
}

impl Default for EchoServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS)),
            buffer_size: DEFAULT_BUFFER_SIZE,
            mirror_to_stdout: true,
        }
    }
}

impl From<&ServerConfig> for EchoServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            buffer_size: config.buffer_size,
            mirror_to_stdout: true,
        }
    }
}

/// Never returns unless accepting itself fails persistently; per-connection
/// failures are only logged.
pub async fn run_echo_server(
    listener: TcpListener,
    context: Arc<TlsContext>,
    options: EchoServerOptions,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(
            "echo server listening on {addr} ({} backend, group {})",
            context.backend_name(),
            context.key_exchange_group()
        );
    }

    loop {
        let (stream, addr) = accept_with_backoff(|| listener.accept()).await;

        match serve_connection(&context, stream, &options).await {
            Ok(echoed) => {
                debug!("{}:{} finished, echoed {echoed} bytes", addr.ip(), addr.port());
            }
            Err(e) => {
                error!(
                    "{}:{} finished with {} error: {e}",
                    addr.ip(),
                    addr.port(),
                    e.class()
                );
            }
        }
    }
}

async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(v) => return v,
            Err(e) => {
                error!("Accept failed: {e}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Handshake, echo until the peer closes, then close. Returns the number of
/// bytes echoed.
pub async fn serve_connection(
    context: &Arc<TlsContext>,
    stream: TcpStream,
    options: &EchoServerOptions,
) -> Result<u64> {
    let mut channel = TlsChannel::wrap(context, stream)?;
    let peer_addr = channel.peer_addr();

    if let Err(e) = handshake_with_timeout(&mut channel, options.handshake_timeout, peer_addr).await
    {
        channel.close().await;
        return Err(e);
    }
    debug!(
        "{peer_addr:?}: established with group {:?}",
        channel.negotiated_group()
    );

    let result = echo_loop(&mut channel, options).await;
    channel.close().await;
    result
}

async fn handshake_with_timeout(
    channel: &mut TlsChannel,
    handshake_timeout: Option<Duration>,
    peer_addr: Option<SocketAddr>,
) -> Result<()> {
    match handshake_timeout {
        Some(duration) => match timeout(duration, channel.accept()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{peer_addr:?}: handshake timed out after {duration:?}");
                Err(TlsError::Handshake(format!(
                    "timed out after {}s",
                    duration.as_secs()
                )))
            }
        },
        None => channel.accept().await,
    }
}

async fn echo_loop(channel: &mut TlsChannel, options: &EchoServerOptions) -> Result<u64> {
    let mut buf = vec![0u8; options.buffer_size];
    let mut stdout = tokio::io::stdout();
    let mut total: u64 = 0;

    loop {
        let n = channel.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }

        let mut sent = 0;
        while sent < n {
            let written = channel.write(&buf[sent..n]).await?;
            if written == 0 {
                return Err(TlsError::Io(std::io::ErrorKind::WriteZero.into()));
            }
            sent += written;
        }
        total += n as u64;

        if options.mirror_to_stdout {
            // Diagnostics only, a broken stdout does not end the connection.
            if let Err(e) = mirror(&mut stdout, &buf[..n]).await {
                debug!("failed to mirror echoed bytes to stdout: {e}");
            }
        }
    }
}

async fn mirror<W: AsyncWrite + Unpin>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    out.write_all(bytes).await?;
    out.flush().await
}
