//! In-process sink, used for dry runs and tests.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::{BoxFuture, Reading, ReadingSink};
use crate::error::{GatewayError, Result};

#[derive(Debug, Default)]
struct Inner {
    readings: Vec<Reading>,
    /// Reject inserts once this many readings are stored.
    capacity: Option<usize>,
}

/// Stores readings in memory. Cheap to clone; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that accepts `n` readings and fails every insert after that.
    pub fn failing_after(n: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                readings: Vec::new(),
                capacity: Some(n),
            })),
        }
    }

    /// Snapshot of the stored readings in insertion order.
    pub async fn readings(&self) -> Vec<Reading> {
        self.inner.lock().await.readings.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.readings.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.readings.is_empty()
    }
}

impl ReadingSink for MemorySink {
    fn insert_reading<'a>(&'a self, reading: &'a Reading) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if let Some(cap) = inner.capacity {
                if inner.readings.len() >= cap {
                    return Err(GatewayError::Persistence(format!(
                        "memory sink full after {} readings",
                        cap
                    )));
                }
            }
            inner.readings.push(reading.clone());
            Ok(())
        })
    }
}
