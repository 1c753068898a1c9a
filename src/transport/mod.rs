//! Transport layer - TCP listener and connection admission.

mod listener;

pub use listener::{ConnectionCount, TelemetryServer};
