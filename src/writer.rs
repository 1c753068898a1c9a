//! ACK/NEK control frame writer.
//!
//! Each triggering event produces exactly one write of a 9-byte control
//! frame followed by a flush. There are no sequence numbers; a device
//! correlates responses with its frames by order alone.
//!
//! ```text
//! frame ingested ──► ack() ──► 02 01 09 00 00 00 81 00 03
//! buffer dropped ──► nek() ──► 02 01 09 00 00 00 F0 00 03
//! ```

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::protocol::{encode_control_frame, ControlKind, DEFAULT_CONTROL_VERSION};

/// Writes control frames to the write half of a connection.
pub struct AckWriter<W> {
    writer: W,
    version: u8,
    acks: u64,
    neks: u64,
}

impl<W> AckWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer using the default control frame version.
    pub fn new(writer: W) -> Self {
        Self::with_version(writer, DEFAULT_CONTROL_VERSION)
    }

    /// Create a writer stamping `version` into every control frame.
    pub fn with_version(writer: W, version: u8) -> Self {
        Self {
            writer,
            version,
            acks: 0,
            neks: 0,
        }
    }

    /// Confirm ingestion of one frame.
    pub async fn ack(&mut self) -> Result<()> {
        self.send(ControlKind::Ack).await
    }

    /// Reject unparsable input.
    pub async fn nek(&mut self) -> Result<()> {
        self.send(ControlKind::Nek).await
    }

    /// Write one control frame and flush.
    pub async fn send(&mut self, kind: ControlKind) -> Result<()> {
        let bytes = encode_control_frame(kind, self.version);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;

        match kind {
            ControlKind::Ack => self.acks += 1,
            ControlKind::Nek => self.neks += 1,
        }
        tracing::trace!(?kind, "control frame sent");
        Ok(())
    }

    /// ACKs written so far.
    #[inline]
    pub fn acks_sent(&self) -> u64 {
        self.acks
    }

    /// NEKs written so far.
    #[inline]
    pub fn neks_sent(&self) -> u64 {
        self.neks
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
