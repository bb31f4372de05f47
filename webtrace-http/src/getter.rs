//! [`HttpServerAttributesGetter`] for the `http` crate's request and response types.

use std::error::Error;

use http::HeaderMap;
use http::Request;
use http::Response;
use http::Version;
use webtrace_semconv::HttpRoute;
use webtrace_semconv::HttpServerAttributesGetter;

use crate::connection::ConnectionInfo;

/// Reads attributes from [`http::Request`] and [`http::Response`].
///
/// Header values are split on `,` and trimmed, so `X: a, b` yields `["a", "b"]`. The unsplit
/// value stays available through `http_request_header_value`. Values that are not valid UTF-8
/// are skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTypesAttributesGetter;

impl HttpTypesAttributesGetter {
    pub const INSTANCE: HttpTypesAttributesGetter = HttpTypesAttributesGetter;
}

impl<ReqBody, ResBody> HttpServerAttributesGetter<Request<ReqBody>, Response<ResBody>>
    for HttpTypesAttributesGetter
{
    fn http_request_method(&self, request: &Request<ReqBody>) -> String {
        request.method().as_str().to_string()
    }

    fn http_request_header(&self, request: &Request<ReqBody>, name: &str) -> Vec<String> {
        header_values(request.headers(), name)
    }

    fn http_request_header_value(&self, request: &Request<ReqBody>, name: &str) -> Option<String> {
        let values: Vec<&str> = request
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    fn http_response_status_code(
        &self,
        _request: &Request<ReqBody>,
        response: &Response<ResBody>,
        _error: Option<&(dyn Error + 'static)>,
    ) -> Option<u16> {
        Some(response.status().as_u16())
    }

    fn http_response_header(
        &self,
        _request: &Request<ReqBody>,
        response: &Response<ResBody>,
        name: &str,
    ) -> Vec<String> {
        header_values(response.headers(), name)
    }

    fn url_scheme(&self, request: &Request<ReqBody>) -> String {
        if let Some(scheme) = request.uri().scheme_str() {
            return scheme.to_string();
        }
        let tls = request
            .extensions()
            .get::<ConnectionInfo>()
            .is_some_and(|info| info.tls);
        if tls { "https" } else { "http" }.to_string()
    }

    fn url_path(&self, request: &Request<ReqBody>) -> String {
        request.uri().path().to_string()
    }

    fn url_query(&self, request: &Request<ReqBody>) -> String {
        request.uri().query().unwrap_or_default().to_string()
    }

    fn http_route(&self, request: &Request<ReqBody>) -> Option<String> {
        request.extensions().get::<HttpRoute>()?.route()
    }

    fn network_protocol_name(&self, _request: &Request<ReqBody>) -> Option<String> {
        Some("http".to_string())
    }

    fn network_protocol_version(&self, request: &Request<ReqBody>) -> Option<String> {
        let version = match request.version() {
            Version::HTTP_09 => "0.9",
            Version::HTTP_10 => "1.0",
            Version::HTTP_11 => "1.1",
            Version::HTTP_2 => "2",
            Version::HTTP_3 => "3",
            _ => return None,
        };
        Some(version.to_string())
    }

    fn network_peer_address(&self, request: &Request<ReqBody>) -> Option<String> {
        let info = request.extensions().get::<ConnectionInfo>()?;
        info.peer_address.map(|address| address.ip().to_string())
    }

    fn network_peer_port(&self, request: &Request<ReqBody>) -> Option<u16> {
        let info = request.extensions().get::<ConnectionInfo>()?;
        info.peer_address.map(|address| address.port())
    }

    fn server_address(&self, request: &Request<ReqBody>) -> Option<String> {
        if let Some(host) = request.uri().host() {
            return Some(host.trim_start_matches('[').trim_end_matches(']').to_string());
        }
        let info = request.extensions().get::<ConnectionInfo>()?;
        info.server_address.map(|address| address.ip().to_string())
    }

    fn server_port(&self, request: &Request<ReqBody>) -> Option<u16> {
        if let Some(port) = request.uri().port_u16() {
            return Some(port);
        }
        let info = request.extensions().get::<ConnectionInfo>()?;
        info.server_address.map(|address| address.port())
    }
}

fn header_values(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
