//! The accessor contract between a web framework and the HTTP server extractor.

use std::error::Error;

/// Read-only accessors over a framework's request and response types.
///
/// Implementations translate framework-native fields into the values the
/// [`HttpServerAttributesExtractor`](crate::HttpServerAttributesExtractor) turns into
/// attributes. Every method is a projection of state the framework already holds: absent
/// fields yield an empty list or `None`, never a sentinel value.
pub trait HttpServerAttributesGetter<Req, Resp> {
    /// The HTTP method exactly as carried by the request.
    fn http_request_method(&self, request: &Req) -> String;

    /// All values of the named request header, in order. Empty when the header is absent.
    fn http_request_header(&self, request: &Req, name: &str) -> Vec<String>;

    /// The named request header as it was sent, repeated fields joined with `, `. `None` when
    /// the header is absent.
    ///
    /// Used for headers whose value must not be split, such as `User-Agent`. The default joins
    /// [`http_request_header`](Self::http_request_header), which is only faithful when that
    /// method does not split values itself.
    fn http_request_header_value(&self, request: &Req, name: &str) -> Option<String> {
        let values = self.http_request_header(request, name);
        (!values.is_empty()).then(|| values.join(", "))
    }

    /// The response status, or `None` when no status has been assigned.
    fn http_response_status_code(
        &self,
        request: &Req,
        response: &Resp,
        error: Option<&(dyn Error + 'static)>,
    ) -> Option<u16>;

    /// All values of the named response header, in order. Empty when the header is absent.
    fn http_response_header(&self, request: &Req, response: &Resp, name: &str) -> Vec<String>;

    /// The URI scheme, such as `http` or `https`.
    fn url_scheme(&self, request: &Req) -> String;

    /// The URI path, without the query component.
    fn url_path(&self, request: &Req) -> String;

    /// The URI query, without the path or the leading `?`. Possibly empty.
    fn url_query(&self, request: &Req) -> String;

    /// The matched route template, when the framework has already resolved it.
    fn http_route(&self, _request: &Req) -> Option<String> {
        None
    }

    fn network_protocol_name(&self, _request: &Req) -> Option<String> {
        None
    }

    fn network_protocol_version(&self, _request: &Req) -> Option<String> {
        None
    }

    fn network_peer_address(&self, _request: &Req) -> Option<String> {
        None
    }

    fn network_peer_port(&self, _request: &Req) -> Option<u16> {
        None
    }

    /// The local server address, used when the request carries no `Host` header.
    fn server_address(&self, _request: &Req) -> Option<String> {
        None
    }

    fn server_port(&self, _request: &Req) -> Option<u16> {
        None
    }
}
