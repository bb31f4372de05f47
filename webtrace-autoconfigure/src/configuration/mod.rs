//! Logic for loading configuration in to an object model
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use webtrace_semconv::extractor::DEFAULT_KNOWN_METHODS;

#[cfg(test)]
mod tests;

pub const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
pub const OTEL_PROPAGATORS: &str = "OTEL_PROPAGATORS";
pub const OTEL_TRACES_EXPORTER: &str = "OTEL_TRACES_EXPORTER";
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
pub const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
pub const OTEL_INSTRUMENTATION_HTTP_SERVER_ENABLED: &str =
    "OTEL_INSTRUMENTATION_HTTP_SERVER_ENABLED";
pub const OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_REQUEST: &str =
    "OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_REQUEST";
pub const OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_RESPONSE: &str =
    "OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_RESPONSE";
pub const OTEL_INSTRUMENTATION_HTTP_KNOWN_METHODS: &str = "OTEL_INSTRUMENTATION_HTTP_KNOWN_METHODS";
pub const OTEL_INSTRUMENTATION_HTTP_PREFER_FORWARDED_URL_SCHEME: &str =
    "OTEL_INSTRUMENTATION_HTTP_PREFER_FORWARDED_URL_SCHEME";

const DEFAULT_OTLP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read configuration file {path}: {error}
    CannotReadFile { path: String, error: std::io::Error },
    /// could not deserialize configuration: {0}
    Deserialize(serde_yaml::Error),
    /// invalid value '{value}' for environment variable {name}
    InvalidEnvironment { name: &'static str, value: String },
    /// unknown propagator '{0}', expected one of: tracecontext, baggage, b3, b3multi, jaeger, none
    UnknownPropagator(String),
    /// the {exporter} exporter is enabled but this build lacks the `{feature}` feature
    ExporterUnavailable {
        exporter: &'static str,
        feature: &'static str,
    },
    /// could not build the {exporter} exporter: {error}
    ExporterBuild {
        exporter: &'static str,
        error: String,
    },
    /// invalid OTLP endpoint '{endpoint}': {error}
    InvalidEndpoint { endpoint: String, error: String },
}

/// The full configuration of the telemetry starter.
///
/// Every section is optional; an empty document yields the defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// OpenTelemetry SDK settings
    pub telemetry: Telemetry,

    /// Library instrumentation settings
    pub instrumentation: Instrumentation,

    /// Log output of the process
    pub logging: Logging,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Telemetry {
    /// Disabling telemetry keeps the instrumentation in place but records nothing
    pub enabled: bool,

    /// Value of the `service.name` resource attribute
    pub service_name: Option<String>,

    /// Extra resource attributes
    pub resource: BTreeMap<String, String>,

    /// Context propagation formats, in injection order
    pub propagators: Vec<Propagator>,

    /// Span exporters
    pub exporters: Exporters,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: None,
            resource: BTreeMap::new(),
            propagators: vec![Propagator::TraceContext, Propagator::Baggage],
            exporters: Exporters::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Propagator {
    /// W3C trace context
    TraceContext,
    /// W3C baggage
    Baggage,
    /// Zipkin B3, single `b3` header
    B3,
    /// Zipkin B3, one `X-B3-*` header per field
    B3Multi,
    /// Jaeger `uber-trace-id`
    Jaeger,
}

impl Propagator {
    fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "tracecontext" => Ok(Self::TraceContext),
            "baggage" => Ok(Self::Baggage),
            "b3" => Ok(Self::B3),
            "b3multi" => Ok(Self::B3Multi),
            "jaeger" => Ok(Self::Jaeger),
            _ => Err(ConfigurationError::UnknownPropagator(value.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Exporters {
    /// Prints finished spans to stdout
    pub logging: LoggingExporter,

    /// Sends finished spans to an OTLP collector
    pub otlp: Otlp,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingExporter {
    /// Enable the stdout exporter
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Otlp {
    /// Enable otlp
    pub enabled: bool,

    /// The endpoint to send data to; defaults to the local collector for the protocol
    pub endpoint: Option<String>,

    /// The protocol to use when sending data
    pub protocol: Protocol,

    /// Export timeout in human-readable format; defaults to 10s
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,
}

impl Default for Otlp {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            protocol: Protocol::default(),
            timeout: DEFAULT_OTLP_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Grpc,
    Http,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Instrumentation {
    pub http: HttpInstrumentation,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct HttpInstrumentation {
    pub server: HttpServerInstrumentation,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct HttpServerInstrumentation {
    /// Record a span for every handled request
    pub enabled: bool,

    /// Request headers recorded as `http.request.header.<name>` attributes
    pub captured_request_headers: Vec<String>,

    /// Response headers recorded as `http.response.header.<name>` attributes
    pub captured_response_headers: Vec<String>,

    /// Take `url.scheme` from `Forwarded` or `X-Forwarded-Proto` when present
    pub prefer_forwarded_url_scheme: bool,

    /// Methods reported as is; anything else is reported as `_OTHER`
    pub known_methods: Vec<String>,
}

impl Default for HttpServerInstrumentation {
    fn default() -> Self {
        Self {
            enabled: true,
            captured_request_headers: Vec::new(),
            captured_response_headers: Vec::new(),
            prefer_forwarded_url_scheme: false,
            known_methods: DEFAULT_KNOWN_METHODS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Logging {
    /// Filter directives used when `RUST_LOG` is not set
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Configuration {
    /// Parses a YAML (or JSON) document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(ConfigurationError::Deserialize)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|error| ConfigurationError::CannotReadFile {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Applies the standard `OTEL_*` environment variables from the process environment.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigurationError> {
        self.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    /// Applies the standard `OTEL_*` environment variables as returned by `lookup`.
    ///
    /// Variables that are unset or empty leave the configuration untouched.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigurationError> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup(OTEL_SDK_DISABLED) {
            self.telemetry.enabled = !parse_bool(OTEL_SDK_DISABLED, value)?;
        }
        if let Some(value) = lookup(OTEL_SERVICE_NAME) {
            self.telemetry.service_name = Some(value);
        }
        if let Some(value) = lookup(OTEL_PROPAGATORS) {
            let names = parse_list(&value);
            self.telemetry.propagators = if names == ["none"] {
                Vec::new()
            } else {
                names
                    .iter()
                    .map(|name| Propagator::parse(name))
                    .collect::<Result<_, _>>()?
            };
        }
        if let Some(value) = lookup(OTEL_TRACES_EXPORTER) {
            let exporters = &mut self.telemetry.exporters;
            exporters.logging.enabled = false;
            exporters.otlp.enabled = false;
            for name in parse_list(&value) {
                match name.as_str() {
                    "otlp" => exporters.otlp.enabled = true,
                    "logging" | "console" => exporters.logging.enabled = true,
                    "none" => {}
                    _ => {
                        return Err(ConfigurationError::InvalidEnvironment {
                            name: OTEL_TRACES_EXPORTER,
                            value,
                        });
                    }
                }
            }
        }
        if let Some(value) = lookup(OTEL_EXPORTER_OTLP_ENDPOINT) {
            self.telemetry.exporters.otlp.endpoint = Some(value);
        }
        if let Some(value) = lookup(OTEL_EXPORTER_OTLP_PROTOCOL) {
            self.telemetry.exporters.otlp.protocol = match value.trim() {
                "grpc" => Protocol::Grpc,
                "http/protobuf" => Protocol::Http,
                _ => {
                    return Err(ConfigurationError::InvalidEnvironment {
                        name: OTEL_EXPORTER_OTLP_PROTOCOL,
                        value,
                    });
                }
            };
        }
        if let Some(value) = lookup(OTEL_EXPORTER_OTLP_TIMEOUT) {
            // milliseconds, as for every OTEL_*_TIMEOUT variable
            let millis = value.trim().parse::<u64>().map_err(|_| {
                ConfigurationError::InvalidEnvironment {
                    name: OTEL_EXPORTER_OTLP_TIMEOUT,
                    value: value.clone(),
                }
            })?;
            self.telemetry.exporters.otlp.timeout = Duration::from_millis(millis);
        }

        let server = &mut self.instrumentation.http.server;
        if let Some(value) = lookup(OTEL_INSTRUMENTATION_HTTP_SERVER_ENABLED) {
            server.enabled = parse_bool(OTEL_INSTRUMENTATION_HTTP_SERVER_ENABLED, value)?;
        }
        if let Some(value) = lookup(OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_REQUEST) {
            server.captured_request_headers = parse_list(&value);
        }
        if let Some(value) = lookup(OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_RESPONSE) {
            server.captured_response_headers = parse_list(&value);
        }
        if let Some(value) = lookup(OTEL_INSTRUMENTATION_HTTP_KNOWN_METHODS) {
            server.known_methods = parse_list(&value);
        }
        if let Some(value) = lookup(OTEL_INSTRUMENTATION_HTTP_PREFER_FORWARDED_URL_SCHEME) {
            server.prefer_forwarded_url_scheme =
                parse_bool(OTEL_INSTRUMENTATION_HTTP_PREFER_FORWARDED_URL_SCHEME, value)?;
        }
        Ok(())
    }

    /// JSON schema of the configuration document, for editor support.
    pub fn schema() -> RootSchema {
        SchemaSettings::draft07()
            .with(|s| {
                s.inline_subschemas = false;
            })
            .into_generator()
            .into_root_schema_for::<Configuration>()
    }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigurationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigurationError::InvalidEnvironment { name, value }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
