//! Parsing of `Forwarded` (RFC 7239), `X-Forwarded-For` and `X-Forwarded-Proto` values.
//!
//! Every function takes a single header value and returns a slice of it. Malformed input
//! yields `None`.

/// Extracts the `proto=` directive of a `Forwarded` header value.
pub fn extract_proto_from_forwarded_header(forwarded: &str) -> Option<&str> {
    let proto = find_directive(forwarded, "proto")?;
    let proto = proto.trim_matches('"').trim();
    (!proto.is_empty()).then_some(proto)
}

/// Extracts the scheme from an `X-Forwarded-Proto` header value.
pub fn extract_proto_from_forwarded_proto_header(forwarded_proto: &str) -> Option<&str> {
    let proto = forwarded_proto.split(',').next()?.trim();
    (!proto.is_empty()).then_some(proto)
}

/// Extracts the client address from the `for=` directive of a `Forwarded` header value.
pub fn extract_client_ip_from_forwarded_header(forwarded: &str) -> Option<&str> {
    find_directive(forwarded, "for").and_then(extract_ip)
}

/// Extracts the originating client address from an `X-Forwarded-For` header value.
pub fn extract_client_ip_from_forwarded_for_header(forwarded_for: &str) -> Option<&str> {
    forwarded_for.split(',').next().and_then(extract_ip)
}

fn find_directive<'a>(forwarded: &'a str, name: &str) -> Option<&'a str> {
    forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then_some(value.trim())
        })
}

// Strips quotes, IPv6 brackets and a trailing port.
fn extract_ip(value: &str) -> Option<&str> {
    let value = value.trim().trim_matches('"').trim();
    let ip = if let Some(bracketed) = value.strip_prefix('[') {
        &bracketed[..bracketed.find(']')?]
    } else if value.matches(':').count() == 1 {
        value.split(':').next()?
    } else {
        value
    };
    (!ip.is_empty()).then_some(ip)
}
