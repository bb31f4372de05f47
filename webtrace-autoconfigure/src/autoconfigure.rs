//! Builds the SDK components a [`Configuration`] asks for.
//!
//! Exporters are only available when the matching cargo feature is compiled in: `logging-exporter`
//! for the stdout exporter and `otlp` for the OTLP exporter. Enabling an exporter without its
//! feature is a [`ConfigurationError::ExporterUnavailable`].

use opentelemetry::KeyValue;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::BaggagePropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracer;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::trace::TracerProviderBuilder;
use opentelemetry_zipkin::B3Encoding;
use webtrace_http::HttpServerExtractor;
use webtrace_http::HttpServerTelemetryLayer;
use webtrace_http::HttpTypesAttributesGetter;
use webtrace_http::instrumentation_scope;

use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::configuration::HttpServerInstrumentation;
use crate::configuration::Propagator;
use crate::configuration::Telemetry;

/// Everything the starter installs.
pub struct AutoConfigured {
    /// Whether telemetry is enabled at all. A disabled configuration still carries a provider,
    /// without any exporter, that must not be installed globally.
    pub enabled: bool,
    pub tracer_provider: SdkTracerProvider,
    pub propagator: TextMapCompositePropagator,
    pub http_server_layer: HttpServerTelemetryLayer<SdkTracer>,
}

pub fn autoconfigure(configuration: &Configuration) -> Result<AutoConfigured, ConfigurationError> {
    let telemetry = &configuration.telemetry;
    if !telemetry.enabled {
        tracing::info!("telemetry is disabled");
        let tracer_provider = SdkTracerProvider::builder().build();
        let http_server_layer = http_server_layer(
            &configuration.instrumentation.http.server,
            &tracer_provider,
        )
        .enabled(false);
        return Ok(AutoConfigured {
            enabled: false,
            tracer_provider,
            propagator: TextMapCompositePropagator::new(Vec::new()),
            http_server_layer,
        });
    }

    let tracer_provider = tracer_provider(telemetry)?;
    let http_server_layer = http_server_layer(
        &configuration.instrumentation.http.server,
        &tracer_provider,
    );
    tracing::debug!(
        enabled = http_server_layer.is_enabled(),
        "configured HTTP server instrumentation"
    );
    Ok(AutoConfigured {
        enabled: true,
        tracer_provider,
        propagator: propagator(&telemetry.propagators),
        http_server_layer,
    })
}

pub(crate) fn resource(telemetry: &Telemetry) -> Resource {
    let mut builder = Resource::builder().with_attributes(
        telemetry
            .resource
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
    );
    if let Some(service_name) = &telemetry.service_name {
        builder = builder.with_service_name(service_name.clone());
    }
    builder.build()
}

fn tracer_provider(telemetry: &Telemetry) -> Result<SdkTracerProvider, ConfigurationError> {
    let mut builder = SdkTracerProvider::builder().with_resource(resource(telemetry));
    if telemetry.exporters.logging.enabled {
        builder = with_logging_exporter(builder)?;
    }
    if telemetry.exporters.otlp.enabled {
        builder = with_otlp_exporter(builder, telemetry)?;
    }
    if !telemetry.exporters.logging.enabled && !telemetry.exporters.otlp.enabled {
        tracing::warn!("telemetry is enabled but no exporter is; spans will be dropped");
    }
    Ok(builder.build())
}

#[cfg(feature = "logging-exporter")]
fn with_logging_exporter(
    builder: TracerProviderBuilder,
) -> Result<TracerProviderBuilder, ConfigurationError> {
    tracing::info!("exporting spans to stdout");
    Ok(builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default()))
}

#[cfg(not(feature = "logging-exporter"))]
fn with_logging_exporter(
    _builder: TracerProviderBuilder,
) -> Result<TracerProviderBuilder, ConfigurationError> {
    Err(ConfigurationError::ExporterUnavailable {
        exporter: "logging",
        feature: "logging-exporter",
    })
}

#[cfg(feature = "otlp")]
fn with_otlp_exporter(
    builder: TracerProviderBuilder,
    telemetry: &Telemetry,
) -> Result<TracerProviderBuilder, ConfigurationError> {
    let exporter = crate::otlp::span_exporter(&telemetry.exporters.otlp)?;
    Ok(builder.with_batch_exporter(exporter))
}

#[cfg(not(feature = "otlp"))]
fn with_otlp_exporter(
    _builder: TracerProviderBuilder,
    _telemetry: &Telemetry,
) -> Result<TracerProviderBuilder, ConfigurationError> {
    Err(ConfigurationError::ExporterUnavailable {
        exporter: "otlp",
        feature: "otlp",
    })
}

pub(crate) fn propagator(propagators: &[Propagator]) -> TextMapCompositePropagator {
    let propagators = propagators
        .iter()
        .map(|propagator| -> Box<dyn TextMapPropagator + Send + Sync> {
            match propagator {
                Propagator::TraceContext => Box::new(TraceContextPropagator::new()),
                Propagator::Baggage => Box::new(BaggagePropagator::new()),
                Propagator::B3 => Box::new(opentelemetry_zipkin::Propagator::with_encoding(
                    B3Encoding::SingleHeader,
                )),
                Propagator::B3Multi => Box::new(opentelemetry_zipkin::Propagator::with_encoding(
                    B3Encoding::MultipleHeader,
                )),
                Propagator::Jaeger => Box::new(opentelemetry_jaeger_propagator::Propagator::new()),
            }
        })
        .collect();
    TextMapCompositePropagator::new(propagators)
}

fn http_server_layer(
    config: &HttpServerInstrumentation,
    tracer_provider: &SdkTracerProvider,
) -> HttpServerTelemetryLayer<SdkTracer> {
    let extractor = HttpServerExtractor::builder(HttpTypesAttributesGetter::INSTANCE)
        .captured_request_headers(&config.captured_request_headers)
        .captured_response_headers(&config.captured_response_headers)
        .known_methods(config.known_methods.iter().cloned())
        .prefer_forwarded_url_scheme(config.prefer_forwarded_url_scheme)
        .build();
    HttpServerTelemetryLayer::with_tracer(tracer_provider.tracer_with_scope(instrumentation_scope()))
        .extractor(extractor)
        .enabled(config.enabled)
}
