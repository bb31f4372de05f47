//! Extraction of [HTTP server attributes] from a framework's request and response.
//!
//! [HTTP server attributes]: https://opentelemetry.io/docs/specs/semconv/http/http-spans/#http-server

use std::collections::HashSet;
use std::error::Error;
use std::marker::PhantomData;

use opentelemetry::Array;
use opentelemetry::KeyValue;
use opentelemetry::StringValue;
use opentelemetry::Value;
use opentelemetry::trace::Status;
use opentelemetry_semantic_conventions::attribute::CLIENT_ADDRESS;
use opentelemetry_semantic_conventions::attribute::ERROR_TYPE;
use opentelemetry_semantic_conventions::attribute::HTTP_REQUEST_METHOD;
use opentelemetry_semantic_conventions::attribute::HTTP_REQUEST_METHOD_ORIGINAL;
use opentelemetry_semantic_conventions::attribute::HTTP_RESPONSE_STATUS_CODE;
use opentelemetry_semantic_conventions::attribute::HTTP_ROUTE;
use opentelemetry_semantic_conventions::attribute::NETWORK_PEER_ADDRESS;
use opentelemetry_semantic_conventions::attribute::NETWORK_PEER_PORT;
use opentelemetry_semantic_conventions::attribute::NETWORK_PROTOCOL_NAME;
use opentelemetry_semantic_conventions::attribute::NETWORK_PROTOCOL_VERSION;
use opentelemetry_semantic_conventions::attribute::SERVER_ADDRESS;
use opentelemetry_semantic_conventions::attribute::SERVER_PORT;
use opentelemetry_semantic_conventions::attribute::URL_PATH;
use opentelemetry_semantic_conventions::attribute::URL_QUERY;
use opentelemetry_semantic_conventions::attribute::URL_SCHEME;
use opentelemetry_semantic_conventions::attribute::USER_AGENT_ORIGINAL;

use crate::forwarded::extract_client_ip_from_forwarded_for_header;
use crate::forwarded::extract_client_ip_from_forwarded_header;
use crate::forwarded::extract_proto_from_forwarded_header;
use crate::forwarded::extract_proto_from_forwarded_proto_header;
use crate::getter::HttpServerAttributesGetter;

/// Replacement value for methods and error types outside the known set.
pub const OTHER: &str = "_OTHER";

/// The methods defined by RFC 9110 and RFC 5789.
pub const DEFAULT_KNOWN_METHODS: [&str; 9] = [
    "CONNECT", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT", "TRACE",
];

/// Turns the values exposed by an [`HttpServerAttributesGetter`] into span attributes.
pub struct HttpServerAttributesExtractor<Req, Resp, G> {
    getter: G,
    captured_request_headers: Vec<String>,
    captured_response_headers: Vec<String>,
    known_methods: HashSet<String>,
    prefer_forwarded_url_scheme: bool,
    _phantom: PhantomData<fn(&Req, &Resp)>,
}

impl<Req, Resp, G> HttpServerAttributesExtractor<Req, Resp, G>
where
    G: HttpServerAttributesGetter<Req, Resp>,
{
    /// Creates an extractor with the default configuration.
    pub fn new(getter: G) -> Self {
        Self::builder(getter).build()
    }

    pub fn builder(getter: G) -> HttpServerAttributesExtractorBuilder<Req, Resp, G> {
        HttpServerAttributesExtractorBuilder {
            getter,
            captured_request_headers: Vec::new(),
            captured_response_headers: Vec::new(),
            known_methods: None,
            prefer_forwarded_url_scheme: false,
            _phantom: PhantomData,
        }
    }

    /// Attributes known when the request arrives.
    pub fn on_start(&self, request: &Req) -> Vec<KeyValue> {
        let mut attributes = Vec::with_capacity(16);

        let method = self.getter.http_request_method(request);
        if self.known_methods.contains(&method) {
            attributes.push(KeyValue::new(HTTP_REQUEST_METHOD, method));
        } else {
            attributes.push(KeyValue::new(HTTP_REQUEST_METHOD, OTHER));
            attributes.push(KeyValue::new(HTTP_REQUEST_METHOD_ORIGINAL, method));
        }

        let scheme = self
            .forwarded_proto(request)
            .unwrap_or_else(|| self.getter.url_scheme(request));
        push_non_empty(&mut attributes, URL_PATH, self.getter.url_path(request));
        push_non_empty(&mut attributes, URL_QUERY, self.getter.url_query(request));

        if let Some(user_agent) = self.getter.http_request_header_value(request, "user-agent") {
            attributes.push(KeyValue::new(USER_AGENT_ORIGINAL, user_agent));
        }

        if let Some(route) = self.getter.http_route(request) {
            push_non_empty(&mut attributes, HTTP_ROUTE, route);
        }

        if let Some(client_address) = self.client_address(request) {
            attributes.push(KeyValue::new(CLIENT_ADDRESS, client_address));
        }

        let (server_address, server_port) = self.server_address_and_port(request);
        if let Some(server_address) = server_address {
            attributes.push(KeyValue::new(SERVER_ADDRESS, server_address));
        }
        if let Some(port) = server_port.filter(|port| !is_default_port(&scheme, *port)) {
            attributes.push(KeyValue::new(SERVER_PORT, i64::from(port)));
        }

        if let Some(peer_address) = self.getter.network_peer_address(request) {
            attributes.push(KeyValue::new(NETWORK_PEER_ADDRESS, peer_address));
        }
        if let Some(peer_port) = self.getter.network_peer_port(request) {
            attributes.push(KeyValue::new(NETWORK_PEER_PORT, i64::from(peer_port)));
        }
        if let Some(protocol) = self
            .getter
            .network_protocol_name(request)
            .filter(|name| !name.eq_ignore_ascii_case("http"))
        {
            attributes.push(KeyValue::new(NETWORK_PROTOCOL_NAME, protocol));
        }
        if let Some(version) = self.getter.network_protocol_version(request) {
            attributes.push(KeyValue::new(NETWORK_PROTOCOL_VERSION, version));
        }

        push_non_empty(&mut attributes, URL_SCHEME, scheme);

        for name in &self.captured_request_headers {
            let values = self.getter.http_request_header(request, name);
            if !values.is_empty() {
                attributes.push(header_attribute("http.request.header", name, values));
            }
        }

        attributes
    }

    /// Attributes known once the request has been handled.
    ///
    /// `response` is `None` when no response was produced, in which case no status code is
    /// recorded.
    pub fn on_end(
        &self,
        request: &Req,
        response: Option<&Resp>,
        error: Option<&(dyn Error + 'static)>,
        route: Option<&str>,
    ) -> Vec<KeyValue> {
        let mut attributes = Vec::with_capacity(4);

        let status = response
            .and_then(|response| self.getter.http_response_status_code(request, response, error));
        if let Some(status) = status {
            attributes.push(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(status)));
        }

        match status {
            Some(status) if status >= 500 => {
                attributes.push(KeyValue::new(ERROR_TYPE, status.to_string()));
            }
            _ if error.is_some() => attributes.push(KeyValue::new(ERROR_TYPE, OTHER)),
            _ => {}
        }

        if let Some(response) = response {
            for name in &self.captured_response_headers {
                let values = self.getter.http_response_header(request, response, name);
                if !values.is_empty() {
                    attributes.push(header_attribute("http.response.header", name, values));
                }
            }
        }

        if let Some(route) = route.filter(|route| !route.is_empty()) {
            attributes.push(KeyValue::new(HTTP_ROUTE, route.to_string()));
        }

        attributes
    }

    /// `{method} {route}`, or the method alone when the route is unknown. Unknown methods are
    /// reported as `HTTP`.
    pub fn span_name(&self, request: &Req, route: Option<&str>) -> String {
        let method = self.getter.http_request_method(request);
        let method = if self.known_methods.contains(&method) {
            method
        } else {
            "HTTP".to_string()
        };
        match route.filter(|route| !route.is_empty()) {
            Some(route) => format!("{method} {route}"),
            None => method,
        }
    }

    fn forwarded_proto(&self, request: &Req) -> Option<String> {
        if !self.prefer_forwarded_url_scheme {
            return None;
        }
        let forwarded = self.getter.http_request_header_value(request, "forwarded");
        if let Some(proto) = forwarded
            .as_deref()
            .and_then(extract_proto_from_forwarded_header)
        {
            return Some(proto.to_string());
        }
        let forwarded_proto = self
            .getter
            .http_request_header_value(request, "x-forwarded-proto");
        forwarded_proto
            .as_deref()
            .and_then(extract_proto_from_forwarded_proto_header)
            .map(str::to_string)
    }

    fn client_address(&self, request: &Req) -> Option<String> {
        let forwarded = self.getter.http_request_header_value(request, "forwarded");
        if let Some(ip) = forwarded
            .as_deref()
            .and_then(extract_client_ip_from_forwarded_header)
        {
            return Some(ip.to_string());
        }
        let forwarded_for = self.getter.http_request_header_value(request, "x-forwarded-for");
        if let Some(ip) = forwarded_for
            .as_deref()
            .and_then(extract_client_ip_from_forwarded_for_header)
        {
            return Some(ip.to_string());
        }
        self.getter.network_peer_address(request)
    }

    fn server_address_and_port(&self, request: &Req) -> (Option<String>, Option<u16>) {
        let host = self.getter.http_request_header_value(request, "host");
        match host.as_deref().and_then(split_host_and_port) {
            Some((address, port)) => (
                Some(address.to_string()),
                port.or_else(|| self.getter.server_port(request)),
            ),
            None => (
                self.getter.server_address(request),
                self.getter.server_port(request),
            ),
        }
    }
}

/// Builder for [`HttpServerAttributesExtractor`].
pub struct HttpServerAttributesExtractorBuilder<Req, Resp, G> {
    getter: G,
    captured_request_headers: Vec<String>,
    captured_response_headers: Vec<String>,
    known_methods: Option<HashSet<String>>,
    prefer_forwarded_url_scheme: bool,
    _phantom: PhantomData<fn(&Req, &Resp)>,
}

impl<Req, Resp, G> HttpServerAttributesExtractorBuilder<Req, Resp, G>
where
    G: HttpServerAttributesGetter<Req, Resp>,
{
    /// Request headers recorded as `http.request.header.<name>`.
    pub fn captured_request_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.captured_request_headers = lowercase(headers);
        self
    }

    /// Response headers recorded as `http.response.header.<name>`.
    pub fn captured_response_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.captured_response_headers = lowercase(headers);
        self
    }

    /// Methods reported verbatim. Anything else is reported as `_OTHER`.
    pub fn known_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Take `url.scheme` from `Forwarded`/`X-Forwarded-Proto` before the request URI.
    pub fn prefer_forwarded_url_scheme(mut self, prefer: bool) -> Self {
        self.prefer_forwarded_url_scheme = prefer;
        self
    }

    pub fn build(self) -> HttpServerAttributesExtractor<Req, Resp, G> {
        HttpServerAttributesExtractor {
            getter: self.getter,
            captured_request_headers: self.captured_request_headers,
            captured_response_headers: self.captured_response_headers,
            known_methods: self.known_methods.unwrap_or_else(|| {
                DEFAULT_KNOWN_METHODS
                    .iter()
                    .map(|method| method.to_string())
                    .collect()
            }),
            prefer_forwarded_url_scheme: self.prefer_forwarded_url_scheme,
            _phantom: PhantomData,
        }
    }
}

/// Span status for a server span: 5xx responses and failures without a response are errors,
/// client errors are not.
pub fn span_status(status: Option<u16>, error: Option<&(dyn Error + 'static)>) -> Status {
    match (status, error) {
        (Some(status), _) if status >= 500 => Status::error(""),
        (None, Some(error)) => Status::error(error.to_string()),
        _ => Status::Unset,
    }
}

fn push_non_empty(attributes: &mut Vec<KeyValue>, key: &'static str, value: String) {
    if !value.is_empty() {
        attributes.push(KeyValue::new(key, value));
    }
}

fn header_attribute(prefix: &str, name: &str, values: Vec<String>) -> KeyValue {
    let values: Vec<StringValue> = values.into_iter().map(StringValue::from).collect();
    KeyValue::new(format!("{prefix}.{name}"), Value::Array(Array::from(values)))
}

fn lowercase<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    (scheme == "http" && port == 80) || (scheme == "https" && port == 443)
}

// `example.com:8080`, `[::1]:8080`, `10.0.0.1`
fn split_host_and_port(host: &str) -> Option<(&str, Option<u16>)> {
    let host = host.trim();
    if let Some(bracketed) = host.strip_prefix('[') {
        let end = bracketed.find(']')?;
        let port = bracketed[end + 1..]
            .strip_prefix(':')
            .and_then(|port| port.parse().ok());
        return Some((&bracketed[..end], port)).filter(|(address, _)| !address.is_empty());
    }
    let (address, port) = match host.rsplit_once(':') {
        Some((address, port)) => (address, port.parse().ok()),
        None => (host, None),
    };
    (!address.is_empty()).then_some((address, port))
}
