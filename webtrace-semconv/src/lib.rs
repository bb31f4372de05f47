//! OpenTelemetry semantic conventions for HTTP servers.
//!
//! A framework integration implements [`HttpServerAttributesGetter`] for its own request and
//! response types; [`HttpServerAttributesExtractor`] turns those accessors into span
//! attributes, and [`HttpRoute`] carries the matched route from wherever it is resolved back
//! to the server span.

#![warn(unreachable_pub)]

pub mod extractor;
pub mod forwarded;
mod getter;
pub mod route;

pub use extractor::HttpServerAttributesExtractor;
pub use extractor::HttpServerAttributesExtractorBuilder;
pub use extractor::span_status;
pub use getter::HttpServerAttributesGetter;
pub use route::HttpRoute;
pub use route::HttpRouteSource;
