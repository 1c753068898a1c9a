//! Gateway configuration.
//!
//! Settings are looked up by colon-separated keys (`Settings:Tcp:Port`)
//! through a [`ConfigProvider`]. [`JsonConfig`] reads a JSON document and
//! lets environment variables override individual keys, with `:` replaced
//! by `__` (`SETTINGS__TCP__PORT=2000`).
//!
//! ```json
//! {
//!   "Settings": {
//!     "Tcp": { "Port": 1993, "MaxConnections": 512 },
//!     "Protocol": { "DecodeMode": "lenient", "ResyncPolicy": "discard_all" },
//!     "Database": { "Path": "hydrolink.db" }
//!   }
//! }
//! ```
//!
//! The typed [`GatewayConfig`] is built once and passed to the components
//! that need it.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::protocol::{
    DecodeMode, DecoderConfig, ResyncPolicy, DEFAULT_CONTROL_VERSION, DEFAULT_MAX_FRAME_SIZE,
};

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 1993;

/// Default socket read size per call.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Default SQLite database path.
pub const DEFAULT_DATABASE_PATH: &str = "hydrolink.db";

/// Keys understood by [`GatewayConfig::from_provider`].
pub mod keys {
    pub const TCP_PORT: &str = "Settings:Tcp:Port";
    pub const TCP_BIND_ADDRESS: &str = "Settings:Tcp:BindAddress";
    pub const TCP_READ_CHUNK_SIZE: &str = "Settings:Tcp:ReadChunkSize";
    pub const TCP_MAX_CONNECTIONS: &str = "Settings:Tcp:MaxConnections";
    pub const DECODE_MODE: &str = "Settings:Protocol:DecodeMode";
    pub const RESYNC_POLICY: &str = "Settings:Protocol:ResyncPolicy";
    pub const MAX_FRAME_SIZE: &str = "Settings:Protocol:MaxFrameSize";
    pub const CONTROL_VERSION: &str = "Settings:Protocol:ControlVersion";
    pub const DATABASE_PATH: &str = "Settings:Database:Path";
}

/// Read access to configuration values.
pub trait ConfigProvider {
    /// Raw string value, if the key is present.
    fn get_str(&self, key: &str) -> Option<String>;

    /// Integer value, or `default` when missing or not a number.
    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_str(key)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    /// String value, or `default` when missing.
    fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }
}

/// JSON document with environment overrides.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    root: Value,
    overrides: HashMap<String, String>,
}

impl JsonConfig {
    /// Parse a JSON document; no environment overrides.
    pub fn parse(json: &str) -> Result<Self> {
        Ok(Self {
            root: serde_json::from_str(json)?,
            overrides: HashMap::new(),
        })
    }

    /// Load a JSON file and apply process environment overrides.
    ///
    /// A missing file yields an empty document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            Self::parse(&text)?
        } else {
            tracing::info!("config file {:?} not found, using defaults", path);
            Self::default()
        };
        Ok(config.with_env_overrides(std::env::vars()))
    }

    /// Add overrides from `NAME__PART=value` style variables.
    ///
    /// Names are matched case-insensitively against lookup keys.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if name.contains("__") {
                self.overrides
                    .insert(name.replace("__", ":").to_ascii_lowercase(), value);
            }
        }
        self
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        key.split(':')
            .try_fold(&self.root, |node, part| node.get(part))
    }
}

impl ConfigProvider for JsonConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        if let Some(v) = self.overrides.get(&key.to_ascii_lowercase()) {
            return Some(v.clone());
        }
        match self.lookup(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Typed gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the acceptor binds to.
    pub bind_addr: SocketAddr,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Connection admission limit; `None` accepts without bound.
    pub max_connections: Option<usize>,
    pub decoder: DecoderConfig,
    /// Version byte stamped into ACK/NEK frames.
    pub control_version: u8,
    pub database_path: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_connections: None,
            decoder: DecoderConfig::default(),
            control_version: DEFAULT_CONTROL_VERSION,
            database_path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build typed settings, validating each value.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self> {
        let port = provider.get_int(keys::TCP_PORT, i64::from(DEFAULT_PORT));
        let port = u16::try_from(port)
            .map_err(|_| GatewayError::Config(format!("port out of range: {}", port)))?;

        let ip: IpAddr = provider
            .get_str_or(keys::TCP_BIND_ADDRESS, "0.0.0.0")
            .parse()
            .map_err(|e| GatewayError::Config(format!("bad bind address: {}", e)))?;

        let read_chunk_size = positive(
            provider.get_int(keys::TCP_READ_CHUNK_SIZE, DEFAULT_READ_CHUNK_SIZE as i64),
            keys::TCP_READ_CHUNK_SIZE,
        )?;

        let max_connections = match provider.get_int(keys::TCP_MAX_CONNECTIONS, 0) {
            n if n <= 0 => None,
            n => Some(n as usize),
        };

        let mode: DecodeMode =
            parse_choice(keys::DECODE_MODE, &provider.get_str_or(keys::DECODE_MODE, "lenient"))?;
        let resync: ResyncPolicy = parse_choice(
            keys::RESYNC_POLICY,
            &provider.get_str_or(keys::RESYNC_POLICY, "discard_all"),
        )?;
        let max_frame_size = positive(
            provider.get_int(keys::MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE as i64),
            keys::MAX_FRAME_SIZE,
        )?;

        let version = provider.get_int(keys::CONTROL_VERSION, i64::from(DEFAULT_CONTROL_VERSION));
        let control_version = u8::try_from(version)
            .map_err(|_| GatewayError::Config(format!("control version out of range: {}", version)))?;

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            read_chunk_size,
            max_connections,
            decoder: DecoderConfig {
                mode,
                resync,
                max_frame_size,
            },
            control_version,
            database_path: provider.get_str_or(keys::DATABASE_PATH, DEFAULT_DATABASE_PATH),
        })
    }
}

fn positive(value: i64, key: &str) -> Result<usize> {
    if value <= 0 {
        return Err(GatewayError::Config(format!("{} must be positive, got {}", key, value)));
    }
    Ok(value as usize)
}

/// Parse a snake_case enum setting, ignoring case.
fn parse_choice<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_value(Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| GatewayError::Config(format!("unknown value for {}: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let provider = JsonConfig::parse("{}").unwrap();
        let config = GatewayConfig::from_provider(&provider).unwrap();

        assert_eq!(config.bind_addr.port(), 1993);
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.decoder.mode, DecodeMode::Lenient);
        assert_eq!(config.decoder.resync, ResyncPolicy::DiscardAll);
        assert_eq!(config.control_version, 0x01);
        assert_eq!(config.database_path, "hydrolink.db");
    }

    #[test]
    fn test_nested_keys() {
        let provider = JsonConfig::parse(
            r#"{"Settings":{"Tcp":{"Port":5000,"MaxConnections":8},
                "Protocol":{"DecodeMode":"strict","ResyncPolicy":"scan_to_header","ControlVersion":40},
                "Database":{"Path":"/var/lib/hydro.db"}}}"#,
        )
        .unwrap();
        let config = GatewayConfig::from_provider(&provider).unwrap();

        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.max_connections, Some(8));
        assert_eq!(config.decoder.mode, DecodeMode::Strict);
        assert_eq!(config.decoder.resync, ResyncPolicy::ScanToHeader);
        assert_eq!(config.control_version, 0x28);
        assert_eq!(config.database_path, "/var/lib/hydro.db");
    }

    #[test]
    fn test_get_int_default_on_missing_or_garbage() {
        let provider = JsonConfig::parse(r#"{"A":{"B":"nope"}}"#).unwrap();
        assert_eq!(provider.get_int("A:B", 7), 7);
        assert_eq!(provider.get_int("A:C", 9), 9);
        assert_eq!(provider.get_int("X:Y:Z", -1), -1);
    }

    #[test]
    fn test_env_override_wins() {
        let provider = JsonConfig::parse(r#"{"Settings":{"Tcp":{"Port":5000}}}"#)
            .unwrap()
            .with_env_overrides(vec![
                ("SETTINGS__TCP__PORT".to_string(), "6000".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ]);
        assert_eq!(provider.get_int(keys::TCP_PORT, 0), 6000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_port = JsonConfig::parse(r#"{"Settings":{"Tcp":{"Port":70000}}}"#).unwrap();
        assert!(GatewayConfig::from_provider(&bad_port).is_err());

        let bad_mode =
            JsonConfig::parse(r#"{"Settings":{"Protocol":{"DecodeMode":"sloppy"}}}"#).unwrap();
        assert!(GatewayConfig::from_provider(&bad_mode).is_err());

        let bad_chunk =
            JsonConfig::parse(r#"{"Settings":{"Tcp":{"ReadChunkSize":0}}}"#).unwrap();
        assert!(GatewayConfig::from_provider(&bad_chunk).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            JsonConfig::parse("{not json"),
            Err(GatewayError::Json(_))
        ));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let provider = JsonConfig::load("/nonexistent/hydrolink-config.json").unwrap();
        assert_eq!(provider.get_int("Settings:Tcp:ReadChunkSize", 4096), 4096);
    }
}
