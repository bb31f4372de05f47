use std::collections::HashMap;
use std::io::Write;

use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| vars.get(name).cloned()
}

#[test]
fn empty_document_is_the_default() {
    assert_eq!(Configuration::from_yaml("").unwrap(), Configuration::default());
    assert_eq!(
        Configuration::from_yaml("---\n{}\n").unwrap(),
        Configuration::default()
    );
}

#[test]
fn defaults() {
    let config = Configuration::default();
    assert!(config.telemetry.enabled);
    assert_eq!(config.telemetry.service_name, None);
    assert_eq!(
        config.telemetry.propagators,
        vec![Propagator::TraceContext, Propagator::Baggage]
    );
    assert!(!config.telemetry.exporters.logging.enabled);
    assert!(!config.telemetry.exporters.otlp.enabled);
    assert_eq!(config.telemetry.exporters.otlp.protocol, Protocol::Grpc);
    assert_eq!(config.telemetry.exporters.otlp.timeout, Duration::from_secs(10));

    let server = &config.instrumentation.http.server;
    assert!(server.enabled);
    assert!(!server.prefer_forwarded_url_scheme);
    assert!(server.captured_request_headers.is_empty());
    assert_eq!(server.known_methods.len(), 9);
    assert!(server.known_methods.iter().any(|m| m == "PATCH"));

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Text);
}

#[test]
fn full_document() {
    let config = Configuration::from_yaml(
        r#"
telemetry:
  service_name: checkout
  resource:
    deployment.environment: prod
  propagators: [baggage]
  exporters:
    logging:
      enabled: true
    otlp:
      enabled: true
      endpoint: http://collector:4318
      protocol: http
      timeout: 1m 30s
instrumentation:
  http:
    server:
      captured_request_headers: [X-Request-Id]
      prefer_forwarded_url_scheme: true
      known_methods: [GET, POST]
logging:
  level: webtrace=debug,info
  format: json
"#,
    )
    .unwrap();

    assert_eq!(config.telemetry.service_name.as_deref(), Some("checkout"));
    assert_eq!(
        config.telemetry.resource.get("deployment.environment").map(String::as_str),
        Some("prod")
    );
    assert_eq!(config.telemetry.propagators, vec![Propagator::Baggage]);
    let otlp = &config.telemetry.exporters.otlp;
    assert!(otlp.enabled);
    assert_eq!(otlp.endpoint.as_deref(), Some("http://collector:4318"));
    assert_eq!(otlp.protocol, Protocol::Http);
    assert_eq!(otlp.timeout, Duration::from_secs(90));
    assert!(config.telemetry.exporters.logging.enabled);

    let server = &config.instrumentation.http.server;
    assert!(server.enabled);
    assert_eq!(server.captured_request_headers, vec!["X-Request-Id"]);
    assert!(server.prefer_forwarded_url_scheme);
    assert_eq!(server.known_methods, vec!["GET", "POST"]);

    assert_eq!(config.logging.level, "webtrace=debug,info");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[rstest]
#[case("telemetry:\n  unknown: true\n")]
#[case("instrumentation:\n  http:\n    client: {}\n")]
#[case("telemetry:\n  propagators: [xray]\n")]
#[case("telemetry:\n  exporters:\n    otlp:\n      protocol: thrift\n")]
#[case("telemetry:\n  exporters:\n    otlp:\n      timeout: soon\n")]
fn invalid_documents_are_rejected(#[case] yaml: &str) {
    assert!(matches!(
        Configuration::from_yaml(yaml),
        Err(ConfigurationError::Deserialize(_))
    ));
}

#[test]
fn from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "telemetry:\n  service_name: from-file").unwrap();
    let config = Configuration::from_file(file.path()).unwrap();
    assert_eq!(config.telemetry.service_name.as_deref(), Some("from-file"));
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let error = Configuration::from_file(dir.path().join("missing.yaml")).unwrap_err();
    assert!(matches!(error, ConfigurationError::CannotReadFile { .. }));
}

#[test]
fn env_overrides() {
    let mut config = Configuration::default();
    config
        .apply_env_overrides(env(&[
            (OTEL_SERVICE_NAME, "orders"),
            (OTEL_PROPAGATORS, "baggage, tracecontext"),
            (OTEL_TRACES_EXPORTER, "otlp"),
            (OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4318"),
            (OTEL_EXPORTER_OTLP_PROTOCOL, "http/protobuf"),
            (OTEL_EXPORTER_OTLP_TIMEOUT, "2500"),
            (OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_REQUEST, "x-a, x-b"),
            (OTEL_INSTRUMENTATION_HTTP_CAPTURE_HEADERS_SERVER_RESPONSE, "content-type"),
            (OTEL_INSTRUMENTATION_HTTP_KNOWN_METHODS, "GET,POST,PURGE"),
            (OTEL_INSTRUMENTATION_HTTP_PREFER_FORWARDED_URL_SCHEME, "TRUE"),
        ]))
        .unwrap();

    assert_eq!(config.telemetry.service_name.as_deref(), Some("orders"));
    assert_eq!(
        config.telemetry.propagators,
        vec![Propagator::Baggage, Propagator::TraceContext]
    );
    let otlp = &config.telemetry.exporters.otlp;
    assert!(otlp.enabled);
    assert!(!config.telemetry.exporters.logging.enabled);
    assert_eq!(otlp.endpoint.as_deref(), Some("http://collector:4318"));
    assert_eq!(otlp.protocol, Protocol::Http);
    assert_eq!(otlp.timeout, Duration::from_millis(2500));

    let server = &config.instrumentation.http.server;
    assert_eq!(server.captured_request_headers, vec!["x-a", "x-b"]);
    assert_eq!(server.captured_response_headers, vec!["content-type"]);
    assert_eq!(server.known_methods, vec!["GET", "POST", "PURGE"]);
    assert!(server.prefer_forwarded_url_scheme);
}

#[test]
fn env_overrides_leave_unset_values_alone() {
    let mut config = Configuration::from_yaml("telemetry:\n  service_name: kept\n").unwrap();
    config
        .apply_env_overrides(env(&[(OTEL_SERVICE_NAME, "  ")]))
        .unwrap();
    assert_eq!(config.telemetry.service_name.as_deref(), Some("kept"));
}

#[test]
fn zipkin_and_jaeger_propagators() {
    let config =
        Configuration::from_yaml("telemetry:\n  propagators: [b3multi, jaeger]\n").unwrap();
    assert_eq!(
        config.telemetry.propagators,
        vec![Propagator::B3Multi, Propagator::Jaeger]
    );

    let mut config = Configuration::default();
    config
        .apply_env_overrides(env(&[(OTEL_PROPAGATORS, "b3, tracecontext, jaeger")]))
        .unwrap();
    assert_eq!(
        config.telemetry.propagators,
        vec![Propagator::B3, Propagator::TraceContext, Propagator::Jaeger]
    );
}

#[test]
fn sdk_disabled() {
    let mut config = Configuration::default();
    config
        .apply_env_overrides(env(&[(OTEL_SDK_DISABLED, "true")]))
        .unwrap();
    assert!(!config.telemetry.enabled);
}

#[test]
fn none_values() {
    let mut config = Configuration::from_yaml(
        "telemetry:\n  exporters:\n    logging:\n      enabled: true\n",
    )
    .unwrap();
    config
        .apply_env_overrides(env(&[
            (OTEL_PROPAGATORS, "none"),
            (OTEL_TRACES_EXPORTER, "none"),
        ]))
        .unwrap();
    assert!(config.telemetry.propagators.is_empty());
    assert!(!config.telemetry.exporters.logging.enabled);
}

#[test]
fn invalid_env_values() {
    let error = Configuration::default()
        .apply_env_overrides(env(&[(OTEL_SDK_DISABLED, "yes")]))
        .unwrap_err();
    assert_snapshot!(error.to_string(), @"invalid value 'yes' for environment variable OTEL_SDK_DISABLED");

    let error = Configuration::default()
        .apply_env_overrides(env(&[(OTEL_PROPAGATORS, "tracecontext,xray")]))
        .unwrap_err();
    assert_snapshot!(error.to_string(), @"unknown propagator 'xray', expected one of: tracecontext, baggage, b3, b3multi, jaeger, none");

    let error = Configuration::default()
        .apply_env_overrides(env(&[(OTEL_TRACES_EXPORTER, "zipkin")]))
        .unwrap_err();
    assert_snapshot!(error.to_string(), @"invalid value 'zipkin' for environment variable OTEL_TRACES_EXPORTER");

    let error = Configuration::default()
        .apply_env_overrides(env(&[(OTEL_EXPORTER_OTLP_TIMEOUT, "10s")]))
        .unwrap_err();
    assert!(matches!(
        error,
        ConfigurationError::InvalidEnvironment {
            name: OTEL_EXPORTER_OTLP_TIMEOUT,
            ..
        }
    ));
}

#[test]
fn schema_describes_every_section() {
    let schema = serde_json::to_value(Configuration::schema()).unwrap();
    let properties = schema["properties"].as_object().unwrap();
    assert!(properties.contains_key("telemetry"));
    assert!(properties.contains_key("instrumentation"));
    assert!(properties.contains_key("logging"));
    assert!(schema["definitions"]["Otlp"]["properties"]["timeout"].is_object());
}
