//! OTLP span exporter construction.
use std::str::FromStr;

use http::Uri;
use http::uri::PathAndQuery;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_otlp::WithExportConfig;

use crate::configuration::ConfigurationError;
use crate::configuration::Otlp;
use crate::configuration::Protocol;

const DEFAULT_GRPC_ENDPOINT: &str = "http://127.0.0.1:4317";
const DEFAULT_HTTP_ENDPOINT: &str = "http://127.0.0.1:4318";
const DEFAULT_HTTP_ENDPOINT_PATH: &str = "/v1/traces";

pub(crate) fn span_exporter(config: &Otlp) -> Result<SpanExporter, ConfigurationError> {
    let exporter = match config.protocol {
        Protocol::Grpc => {
            let endpoint = endpoint(config.endpoint.as_deref(), DEFAULT_GRPC_ENDPOINT)?;
            tracing::info!(%endpoint, timeout = ?config.timeout, "exporting spans over OTLP/gRPC");
            SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.to_string())
                .with_timeout(config.timeout)
                .build()
        }
        Protocol::Http => {
            let endpoint = add_missing_path(endpoint(
                config.endpoint.as_deref(),
                DEFAULT_HTTP_ENDPOINT,
            )?)?;
            tracing::info!(%endpoint, timeout = ?config.timeout, "exporting spans over OTLP/HTTP");
            SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint.to_string())
                .with_timeout(config.timeout)
                .build()
        }
    };
    exporter.map_err(|error| ConfigurationError::ExporterBuild {
        exporter: "otlp",
        error: error.to_string(),
    })
}

fn endpoint(configured: Option<&str>, default: &str) -> Result<Uri, ConfigurationError> {
    let endpoint = configured.unwrap_or(default);
    let invalid = |error: String| ConfigurationError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        error,
    };
    let uri = Uri::from_str(endpoint).map_err(|e| invalid(e.to_string()))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(invalid("expected an absolute URL such as http://host:port".to_string()));
    }
    Ok(uri)
}

// The HTTP exporter uses the endpoint as is, so the signal path has to be present.
fn add_missing_path(endpoint: Uri) -> Result<Uri, ConfigurationError> {
    if endpoint.path().ends_with(DEFAULT_HTTP_ENDPOINT_PATH) {
        return Ok(endpoint);
    }
    let path = endpoint.path().trim_end_matches('/');
    let path_and_query = match endpoint.query() {
        Some(query) => format!("{path}{DEFAULT_HTTP_ENDPOINT_PATH}?{query}"),
        None => format!("{path}{DEFAULT_HTTP_ENDPOINT_PATH}"),
    };
    let invalid = |error: String| ConfigurationError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        error,
    };
    let path_and_query =
        PathAndQuery::from_str(&path_and_query).map_err(|e| invalid(e.to_string()))?;
    let mut parts = endpoint.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|e| invalid(e.to_string()))
}
