//! Line-oriented echo client over [`TlsChannel`].

use std::sync::Arc;

use log::{debug, error};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{Result, TlsError};
use crate::tls_channel::TlsChannel;
use crate::tls_context::TlsContext;

pub const ECHO_PREFIX: &[u8] = b"echo: ";

#[derive(Debug, Clone)]
pub struct EchoClientOptions {
    /// Upper bound for one line and for one response read.
    pub buffer_size: usize,
    /// Send a single line and stop (`client --one-shot`).
    pub one_shot: bool,
}

impl Default for EchoClientOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            one_shot: false,
        }
    }
}

/// Connects to `host:port` and completes the Initiator handshake. On a
/// handshake failure the channel is closed before the error is returned.
pub async fn connect_channel(
    context: &Arc<TlsContext>,
    host: &str,
    port: u16,
) -> Result<TlsChannel> {
    let stream = TcpStream::connect((host, port)).await.map_err(|e| {
        error!("could not connect to {host} port {port}: {e}");
        TlsError::Io(e)
    })?;
    let mut channel = TlsChannel::wrap(context, stream)?;
    if let Err(e) = channel.connect().await {
        error!("handshake with {host} port {port} failed: {e}");
        channel.close().await;
        return Err(e);
    }
    debug!(
        "connected to {:?} using {:?}",
        channel.peer_addr(),
        channel.negotiated_group()
    );
    Ok(channel)
}

/// Sends `input` one line at a time and writes each response to `output`
/// prefixed with `echo: `. A response is whatever a single read returns, so
/// a long line can come back split across prompts.
///
/// Stops when input is exhausted or the server closes; the channel is closed
/// in every case. Returns the number of lines sent.
pub async fn run_echo_client<R, W>(
    mut channel: TlsChannel,
    mut input: R,
    mut output: W,
    options: &EchoClientOptions,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = echo_lines(&mut channel, &mut input, &mut output, options).await;
    channel.close().await;
    result
}

async fn echo_lines<R, W>(
    channel: &mut TlsChannel,
    input: &mut R,
    output: &mut W,
    options: &EchoClientOptions,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(options.buffer_size);
    let mut response = vec![0u8; options.buffer_size];
    let mut lines_sent: u64 = 0;

    loop {
        line.clear();
        let n = read_line_bounded(input, &mut line, options.buffer_size).await?;
        if n == 0 {
            break;
        }

        let mut sent = 0;
        while sent < line.len() {
            let written = channel.write(&line[sent..]).await?;
            if written == 0 {
                return Err(TlsError::Io(std::io::ErrorKind::WriteZero.into()));
            }
            sent += written;
        }
        lines_sent += 1;

        let received = channel.read(&mut response).await?;
        if received == 0 {
            debug!("server closed the connection");
            break;
        }
        output.write_all(ECHO_PREFIX).await?;
        output.write_all(&response[..received]).await?;
        output.flush().await?;

        if options.one_shot {
            break;
        }
    }

    Ok(lines_sent)
}

/// Like `read_until(b'\n')` but stops after `limit` bytes, leaving the rest
/// of an over-long line for the next call.
async fn read_line_bounded<R>(input: &mut R, line: &mut Vec<u8>, limit: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = input.fill_buf().await?;
        if available.is_empty() {
            return Ok(line.len());
        }
        let room = limit - line.len();
        let chunk = &available[..available.len().min(room)];
        let (taken, done) = match chunk.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (chunk.len(), line.len() + chunk.len() == limit),
        };
        line.extend_from_slice(&chunk[..taken]);
        input.consume(taken);
        if done {
            return Ok(line.len());
        }
    }
}
