//! Per-connection session: read, reassemble, persist, acknowledge.
//!
//! A session cycles through three states:
//!
//! ```text
//!            data              no frame left
//! Reading ─────────► Draining ──────────────► Reading
//!    │                   │
//!    │ EOF / shutdown    │ sink or socket error
//!    ▼                   ▼
//!  Closed ◄──────────────┘
//! ```
//!
//! While draining, every extracted frame is persisted and only then
//! ACKed, one frame at a time. Leftover bytes that fail the precheck past
//! the discard threshold are answered with a single NEK and dropped. Any
//! persistence or socket error ends the session; the device has to
//! reconnect to resume.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::protocol::{DecoderConfig, FrameDecoder, DEFAULT_CONTROL_VERSION};
use crate::shutdown::Shutdown;
use crate::sink::ReadingSink;
use crate::writer::AckWriter;

/// Per-session settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Bytes requested per read.
    pub read_chunk_size: usize,
    pub decoder: DecoderConfig,
    /// Version byte for ACK/NEK frames.
    pub control_version: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: crate::config::DEFAULT_READ_CHUNK_SIZE,
            decoder: DecoderConfig::default(),
            control_version: DEFAULT_CONTROL_VERSION,
        }
    }
}

impl From<&GatewayConfig> for SessionConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            read_chunk_size: config.read_chunk_size,
            decoder: config.decoder,
            control_version: config.control_version,
        }
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side (zero-byte read).
    PeerClosed,
    /// The shutdown signal fired.
    Shutdown,
}

/// Counters reported when a session ends cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub acks: u64,
    pub neks: u64,
    pub bytes_read: u64,
    pub bytes_discarded: u64,
    pub close_reason: CloseReason,
}

#[derive(Debug, Default)]
struct Counters {
    frames: u64,
    bytes_read: u64,
    bytes_discarded: u64,
}

/// One device connection.
pub struct ConnectionSession<S> {
    stream: S,
    sink: Arc<dyn ReadingSink>,
    config: SessionConfig,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, sink: Arc<dyn ReadingSink>, config: SessionConfig) -> Self {
        Self {
            stream,
            sink,
            config,
        }
    }

    /// Run until the peer disconnects, shutdown fires, or an error occurs.
    ///
    /// The stream is shut down and dropped on every exit path.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<SessionSummary> {
        let (mut reader, write_half) = tokio::io::split(self.stream);
        let mut acks = AckWriter::with_version(write_half, self.config.control_version);
        let mut decoder = FrameDecoder::with_config(self.config.decoder);
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        let mut counters = Counters::default();

        let outcome: Result<CloseReason> = loop {
            if shutdown.is_triggered() {
                break Ok(CloseReason::Shutdown);
            }

            let n = tokio::select! {
                biased;
                _ = shutdown.recv() => break Ok(CloseReason::Shutdown),
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break Ok(CloseReason::PeerClosed),
                    Ok(n) => n,
                    Err(e) => break Err(e.into()),
                },
            };

            counters.bytes_read += n as u64;
            decoder.feed(&buf[..n]);

            if let Err(e) = drain(&mut decoder, &mut acks, self.sink.as_ref(), &mut counters).await
            {
                break Err(e);
            }
        };

        if let Err(e) = acks.shutdown().await {
            tracing::debug!("socket shutdown failed: {}", e);
        }

        let close_reason = outcome?;
        let summary = SessionSummary {
            frames: counters.frames,
            acks: acks.acks_sent(),
            neks: acks.neks_sent(),
            bytes_read: counters.bytes_read,
            bytes_discarded: counters.bytes_discarded,
            close_reason,
        };
        tracing::debug!(?summary, "session closed");
        Ok(summary)
    }
}

/// Extract, persist and ACK every complete frame, then NEK leftover garbage.
async fn drain<W>(
    decoder: &mut FrameDecoder,
    acks: &mut AckWriter<W>,
    sink: &dyn ReadingSink,
    counters: &mut Counters,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match decoder.try_extract() {
            Ok(Some((frame, consumed))) => {
                let reading = frame.to_reading();
                tracing::debug!(
                    device = %reading.device_id,
                    timestamp = %reading.timestamp,
                    water_level = reading.water_level,
                    rainfall = reading.rainfall,
                    consumed,
                    "frame decoded"
                );
                sink.insert_reading(&reading).await?;
                acks.ack().await?;
                counters.frames += 1;
                continue;
            }
            Ok(None) => {
                if !decoder.needs_resync() {
                    return Ok(());
                }
                tracing::warn!(buffered = decoder.len(), "invalid packet, sending NEK");
            }
            Err(e) => {
                tracing::warn!(buffered = decoder.len(), "malformed frame ({}), sending NEK", e);
            }
        }

        acks.nek().await?;
        counters.bytes_discarded += decoder.resync() as u64;
    }
}
