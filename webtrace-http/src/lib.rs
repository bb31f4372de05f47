//! Server span instrumentation for services built on the `http` crate and tower.
//!
//! Wrap a service in [`HttpServerTelemetryLayer`] to get one `SERVER` span per request,
//! named and attributed following the OpenTelemetry HTTP semantic conventions. Routers report
//! the matched route through [`record_route`].

#![warn(unreachable_pub)]

mod connection;
mod getter;
mod layer;

pub use connection::ConnectionInfo;
pub use connection::InjectConnectionInfo;
pub use connection::InjectConnectionInfoLayer;
pub use getter::HttpTypesAttributesGetter;
pub use layer::HttpServerExtractor;
pub use layer::HttpServerTelemetry;
pub use layer::HttpServerTelemetryLayer;
pub use layer::ResponseFuture;
pub use layer::instrumentation_scope;
pub use layer::record_route;
pub use webtrace_semconv::HttpRoute;
pub use webtrace_semconv::HttpRouteSource;
