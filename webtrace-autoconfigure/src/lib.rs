//! Configuration model and conditional wiring of the OpenTelemetry SDK for HTTP servers.

#![warn(unreachable_pub)]

mod autoconfigure;
pub mod configuration;
#[cfg(feature = "otlp")]
mod otlp;

pub use autoconfigure::AutoConfigured;
pub use autoconfigure::autoconfigure;
pub use configuration::Configuration;
pub use configuration::ConfigurationError;
