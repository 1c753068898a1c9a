//! TCP acceptor spawning one session per device connection.
//!
//! The accept loop does no protocol work. It races every `accept` against
//! the shutdown signal, logs accept errors and keeps going, and hands each
//! connection to its own task. Sessions share nothing but the sink and the
//! connection counter.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hydrolink::{shutdown, sink::MemorySink, TelemetryServer, SessionConfig};
//!
//! let (trigger, rx) = shutdown::channel();
//! let server = TelemetryServer::bind(
//!     "127.0.0.1:1993".parse()?,
//!     Arc::new(MemorySink::new()),
//!     SessionConfig::default(),
//! )
//! .await?;
//! tokio::spawn(server.run(rx));
//! // ...
//! trigger.trigger();
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::Instrument;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::session::{ConnectionSession, SessionConfig};
use crate::shutdown::Shutdown;
use crate::sink::ReadingSink;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Live view of how many sessions are running.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCount {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl ConnectionCount {
    #[inline]
    pub fn get(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until no session is running, or `timeout` elapses.
    ///
    /// Returns `true` when the count reached zero.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.idle.notified();
                if self.get() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    fn enter(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            count: self.clone(),
        }
    }
}

/// Decrements the count when a session task ends.
struct ConnectionGuard {
    count: ConnectionCount,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.count.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.count.idle.notify_waiters();
        }
    }
}

/// Listening socket plus everything a session needs.
pub struct TelemetryServer {
    listener: TcpListener,
    sink: Arc<dyn ReadingSink>,
    session_config: SessionConfig,
    admission: Option<Arc<Semaphore>>,
    connections: ConnectionCount,
}

impl TelemetryServer {
    /// Bind the listening socket. Connections are not limited.
    pub async fn bind(
        addr: SocketAddr,
        sink: Arc<dyn ReadingSink>,
        session_config: SessionConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            sink,
            session_config,
            admission: None,
            connections: ConnectionCount::default(),
        })
    }

    /// Bind using gateway settings, including the connection limit.
    pub async fn from_config(config: &GatewayConfig, sink: Arc<dyn ReadingSink>) -> Result<Self> {
        let server = Self::bind(config.bind_addr, sink, SessionConfig::from(config)).await?;
        Ok(server.with_max_connections(config.max_connections))
    }

    /// Refuse connections beyond `limit` concurrent sessions.
    pub fn with_max_connections(mut self, limit: Option<usize>) -> Self {
        self.admission = limit.map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for observing the number of running sessions.
    pub fn connections(&self) -> ConnectionCount {
        self.connections.clone()
    }

    /// Accept connections until shutdown fires, then close the listener.
    ///
    /// Running sessions receive the same signal and wind down on their own.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "TCP server started");

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let accepted = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_session(stream, peer, &shutdown),
                Err(e) => {
                    tracing::error!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::info!("TCP server stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, shutdown: &Shutdown) {
        let permit: Option<OwnedSemaphorePermit> = match &self.admission {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(p) => Some(p),
                Err(_) => {
                    tracing::warn!(%peer, "connection limit reached, refusing client");
                    return;
                }
            },
            None => None,
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {}", e);
        }

        let session = ConnectionSession::new(stream, Arc::clone(&self.sink), self.session_config);
        let guard = self.connections.enter();
        let shutdown = shutdown.clone();
        let span = tracing::info_span!("session", %peer);

        tokio::spawn(
            async move {
                // held until the session ends
                let _permit = permit;
                let _guard = guard;

                tracing::info!("client connected");
                match session.run(shutdown).await {
                    Ok(summary) => tracing::info!(
                        frames = summary.frames,
                        neks = summary.neks,
                        reason = ?summary.close_reason,
                        "client disconnected"
                    ),
                    Err(e) => tracing::error!("session terminated: {}", e),
                }
            }
            .instrument(span),
        );
    }
}
