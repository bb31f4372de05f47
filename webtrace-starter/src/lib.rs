//! Traces an HTTP server with OpenTelemetry from a single configuration file.
//!
//! ```ignore
//! let telemetry = webtrace_starter::init_from_file("telemetry.yaml")?;
//! let app = Router::new()
//!     .route("/users/{id}", get(user))
//!     .layer(telemetry.http_server_layer());
//! ```
//!
//! [`init`] installs the global propagator, the global tracer provider and a `tracing`
//! subscriber. Keep the returned [`TelemetryGuard`] alive for as long as spans should be
//! exported; dropping it flushes and shuts the provider down.

#![warn(unreachable_pub)]

use std::path::Path;

use displaydoc::Display;
use opentelemetry::InstrumentationScope;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracer;
use opentelemetry_sdk::trace::SdkTracerProvider;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::util::TryInitError;
pub use webtrace_autoconfigure as autoconfigure;
use webtrace_autoconfigure::AutoConfigured;
pub use webtrace_autoconfigure::Configuration;
pub use webtrace_autoconfigure::ConfigurationError;
use webtrace_autoconfigure::configuration::LogFormat;
pub use webtrace_http as http;
use webtrace_http::HttpServerTelemetryLayer;
pub use webtrace_semconv as semconv;

/// Error starting telemetry.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum StartError {
    /// {0}
    Configuration(#[from] ConfigurationError),
    /// could not parse log filter: {0}
    LogFilter(#[from] ParseError),
    /// could not install the tracing subscriber: {0}
    Subscriber(#[from] TryInitError),
}

/// Keeps the tracer provider alive.
#[must_use = "dropping the guard shuts telemetry down"]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    http_server_layer: HttpServerTelemetryLayer<SdkTracer>,
}

impl TelemetryGuard {
    /// Server instrumentation configured from `instrumentation.http.server`.
    pub fn http_server_layer(&self) -> HttpServerTelemetryLayer<SdkTracer> {
        self.http_server_layer.clone()
    }

    /// `None` when telemetry is disabled.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(error) = provider.shutdown() {
                tracing::error!(%error, "failed to shut down the tracer provider");
            }
        }
    }
}

/// Loads `path`, applies the `OTEL_*` environment variables and calls [`init`].
pub fn init_from_file(path: impl AsRef<Path>) -> Result<TelemetryGuard, StartError> {
    let configuration = Configuration::from_file(path)?.with_env_overrides()?;
    init(&configuration)
}

/// Installs telemetry as described by `configuration`.
///
/// Fails if a global `tracing` subscriber is already set; nothing global is changed in that
/// case.
pub fn init(configuration: &Configuration) -> Result<TelemetryGuard, StartError> {
    let AutoConfigured {
        enabled,
        tracer_provider,
        propagator,
        http_server_layer,
    } = webtrace_autoconfigure::autoconfigure(configuration)?;

    let filter = log_filter(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &configuration.logging.level,
    )?;
    let fmt = match configuration.logging.format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };
    let opentelemetry = enabled.then(|| {
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer_with_scope(
            InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
                .with_version(env!("CARGO_PKG_VERSION"))
                .build(),
        ))
    });

    tracing_subscriber::registry()
        .with(fmt)
        .with(opentelemetry)
        .with(filter)
        .try_init()?;

    if !enabled {
        tracing::info!("telemetry disabled, only logging is installed");
        return Ok(TelemetryGuard {
            tracer_provider: None,
            http_server_layer,
        });
    }

    global::set_text_map_propagator(propagator);
    global::set_tracer_provider(tracer_provider.clone());
    tracing::info!(
        service.name = configuration.telemetry.service_name.as_deref().unwrap_or_default(),
        "telemetry initialized"
    );

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        http_server_layer,
    })
}

// `RUST_LOG` wins over the configured level, but only when it is set; an invalid value is an
// error rather than a silent fallback.
fn log_filter(env: Option<String>, level: &str) -> Result<EnvFilter, ParseError> {
    match env.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_new(level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_prefers_the_environment() {
        let filter = log_filter(Some("webtrace=trace".to_string()), "info").unwrap();
        assert_eq!(filter.to_string().to_lowercase(), "webtrace=trace");

        let filter = log_filter(None, "warn").unwrap();
        assert_eq!(filter.to_string().to_lowercase(), "warn");

        let filter = log_filter(Some("  ".to_string()), "debug").unwrap();
        assert_eq!(filter.to_string().to_lowercase(), "debug");
    }

    #[test]
    fn invalid_environment_filter_is_an_error() {
        assert!(log_filter(Some("webtrace=loud".to_string()), "info").is_err());
        assert!(log_filter(None, "webtrace=loud").is_err());
    }
}
