//! # hydrolink
//!
//! TCP ingestion gateway for remote water-level and rainfall sensors.
//!
//! Field devices keep a TCP connection open and push binary telemetry
//! frames. Each connection gets its own session that reassembles frames
//! from the byte stream, stores the readings through a [`sink::ReadingSink`],
//! and answers every frame with a 9-byte ACK, or a NEK when the buffered
//! input cannot be parsed.
//!
//! ## Architecture
//!
//! ```text
//! socket ─► FrameDecoder ─► Frame ─► ConnectionSession ─► ReadingSink
//!                                          │
//!                                          └─► AckWriter ─► socket
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hydrolink::{shutdown, sink::SqliteSink, GatewayConfig, TelemetryServer};
//!
//! #[tokio::main]
//! async fn main() -> hydrolink::Result<()> {
//!     let config = GatewayConfig::default();
//!     let sink = Arc::new(SqliteSink::open(&config.database_path)?);
//!     let server = TelemetryServer::from_config(&config, sink).await?;
//!
//!     let (trigger, rx) = shutdown::channel();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         trigger.trigger();
//!     });
//!     server.run(rx).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod transport;
pub mod writer;

pub use config::{ConfigProvider, GatewayConfig, JsonConfig};
pub use error::{GatewayError, Result};
pub use session::{CloseReason, ConnectionSession, SessionConfig, SessionSummary};
pub use transport::TelemetryServer;
pub use writer::AckWriter;
