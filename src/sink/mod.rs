//! Persistence sink for decoded readings.
//!
//! The session hands every decoded frame to a [`ReadingSink`] and waits for
//! the insert to finish before acknowledging the frame. Each call is one
//! independent transaction: a failure rolls back that reading only and is
//! returned to the caller. Readings carry no idempotency key, so a frame
//! delivered twice is stored twice.
//!
//! # Example
//!
//! ```ignore
//! use hydrolink::sink::{MemorySink, Reading, ReadingSink};
//!
//! let sink = MemorySink::new();
//! let reading = Reading::new("20240101000000", "000000000000", 1.5, 0.0);
//! sink.insert_reading(&reading).await?;
//! assert_eq!(sink.readings().await, vec![reading]);
//! ```

mod memory;
mod sqlite;

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

pub use memory::MemorySink;
pub use sqlite::{SqliteSink, RAIN_TABLE, WATER_LEVEL_TABLE};

/// Boxed future returned by sink operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One row pair to persist: both channels of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// `yyyyMMddHHmmss`, empty when the device sent an impossible date.
    pub timestamp: String,
    pub device_id: String,
    pub water_level: f32,
    pub rainfall: f32,
}

impl Reading {
    pub fn new(
        timestamp: impl Into<String>,
        device_id: impl Into<String>,
        water_level: f32,
        rainfall: f32,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            device_id: device_id.into(),
            water_level,
            rainfall,
        }
    }
}

/// Transactional destination for readings.
pub trait ReadingSink: Send + Sync + 'static {
    /// Store both channels of `reading` atomically.
    fn insert_reading<'a>(&'a self, reading: &'a Reading) -> BoxFuture<'a, Result<()>>;
}
