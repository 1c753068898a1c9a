//! hydrolink gateway binary.
//!
//! Usage: `hydrolink [config.json]` (defaults to `appsettings.json`).
//! Log verbosity follows `RUST_LOG`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hydrolink::shutdown;
use hydrolink::sink::SqliteSink;
use hydrolink::{GatewayConfig, JsonConfig, Result, TelemetryServer};

const DEFAULT_CONFIG_PATH: &str = "appsettings.json";

/// How long running sessions get to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = match "hydrolink=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Loading configuration from {:?}", Path::new(&config_path));
    let provider = JsonConfig::load(&config_path)?;
    let config = GatewayConfig::from_provider(&provider)?;

    let sink = Arc::new(SqliteSink::open(&config.database_path)?);
    info!("Readings stored in {}", config.database_path);

    let server = TelemetryServer::from_config(&config, sink).await?;
    info!("Listening on {}", server.local_addr()?);
    let connections = server.connections();

    let (trigger, rx) = shutdown::channel();
    let mut serve = tokio::spawn(server.run(rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
            trigger.trigger();
        }
        finished = &mut serve => {
            return finished.unwrap_or_else(|e| {
                error!("server task failed: {}", e);
                Ok(())
            });
        }
    }

    let served = match serve.await {
        Ok(result) => result,
        Err(e) => {
            error!("server task failed: {}", e);
            Ok(())
        }
    };

    // sessions stop reading on the same signal; let in-flight inserts finish and ACK
    if !connections.wait_idle(SHUTDOWN_GRACE).await {
        warn!(
            remaining = connections.get(),
            "sessions still running after {:?}, exiting anyway", SHUTDOWN_GRACE
        );
    }
    served
}
