//! Tower middleware creating one OpenTelemetry server span per request.
//!
//! See [`Layer`] and [`Service`] for more details.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use displaydoc::Display;
use http::Request;
use http::Response;
use opentelemetry::InstrumentationScope;
use opentelemetry::global;
use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::SpanKind;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::trace::Tracer;
use opentelemetry_http::HeaderExtractor;
use pin_project_lite::pin_project;
use thiserror::Error;
use tower::Layer;
use tower_service::Service;
use webtrace_semconv::HttpRoute;
use webtrace_semconv::HttpRouteSource;
use webtrace_semconv::HttpServerAttributesExtractor;
use webtrace_semconv::span_status;

use crate::getter::HttpTypesAttributesGetter;

/// The extractor used by [`HttpServerTelemetryLayer`]. It runs on body-less copies of the
/// request and response heads.
pub type HttpServerExtractor =
    HttpServerAttributesExtractor<Request<()>, Response<()>, HttpTypesAttributesGetter>;

pub(crate) const INSTRUMENTATION_NAME: &str = "webtrace-http";

/// The instrumentation scope spans from this crate are reported under.
pub fn instrumentation_scope() -> InstrumentationScope {
    InstrumentationScope::builder(INSTRUMENTATION_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .build()
}

/// Offers `route` to the [`HttpRoute`] the telemetry layer attached to `request`.
///
/// Returns whether the span's route changed. Requests that did not go through the layer are
/// left untouched.
pub fn record_route<B>(request: &Request<B>, source: HttpRouteSource, route: &str) -> bool {
    request
        .extensions()
        .get::<HttpRoute>()
        .is_some_and(|holder| holder.update(source, route))
}

/// [`Layer`] wrapping services in [`HttpServerTelemetry`].
pub struct HttpServerTelemetryLayer<T = BoxedTracer> {
    tracer: Arc<T>,
    extractor: Arc<HttpServerExtractor>,
    enabled: bool,
}

impl HttpServerTelemetryLayer {
    /// Uses a tracer from the global tracer provider. The provider must be installed before
    /// the layer is created.
    pub fn new() -> Self {
        Self::with_tracer(global::tracer_with_scope(instrumentation_scope()))
    }
}

impl Default for HttpServerTelemetryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HttpServerTelemetryLayer<T> {
    pub fn with_tracer(tracer: T) -> Self {
        Self {
            tracer: Arc::new(tracer),
            extractor: Arc::new(HttpServerExtractor::new(HttpTypesAttributesGetter::INSTANCE)),
            enabled: true,
        }
    }

    /// Replaces the default attribute extractor.
    pub fn extractor(mut self, extractor: HttpServerExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// A disabled layer forwards requests untouched.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl<T> Clone for HttpServerTelemetryLayer<T> {
    fn clone(&self) -> Self {
        Self {
            tracer: self.tracer.clone(),
            extractor: self.extractor.clone(),
            enabled: self.enabled,
        }
    }
}

impl<T> fmt::Debug for HttpServerTelemetryLayer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerTelemetryLayer")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl<S, T> Layer<S> for HttpServerTelemetryLayer<T> {
    type Service = HttpServerTelemetry<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpServerTelemetry {
            inner,
            tracer: self.tracer.clone(),
            extractor: self.extractor.clone(),
            enabled: self.enabled,
        }
    }
}

/// [`Service`] recording a server span around each request.
pub struct HttpServerTelemetry<S, T = BoxedTracer> {
    inner: S,
    tracer: Arc<T>,
    extractor: Arc<HttpServerExtractor>,
    enabled: bool,
}

impl<S: Clone, T> Clone for HttpServerTelemetry<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            tracer: self.tracer.clone(),
            extractor: self.extractor.clone(),
            enabled: self.enabled,
        }
    }
}

impl<S, T, ReqBody, ResBody> Service<Request<ReqBody>> for HttpServerTelemetry<S, T>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        if !self.enabled {
            return ResponseFuture {
                inner: self.inner.call(request),
                span: None,
            };
        }

        let parent = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(request.headers()))
        });
        let mut head = request_head(&request);
        let route = HttpRoute::new(self.extractor.span_name(&head, None));
        request.extensions_mut().insert(route.clone());
        head.extensions_mut().insert(route.clone());

        let span = self
            .tracer
            .span_builder(route.span_name())
            .with_kind(SpanKind::Server)
            .with_attributes(self.extractor.on_start(&head))
            .start_with_context(self.tracer.as_ref(), &parent);
        let otel_cx = parent.with_span(span);

        let inner = {
            let _guard = otel_cx.clone().attach();
            self.inner.call(request)
        };

        ResponseFuture {
            inner,
            span: Some(ServerSpan {
                otel_cx,
                head,
                route,
                extractor: self.extractor.clone(),
            }),
        }
    }
}

pin_project! {
    /// Response future for [`HttpServerTelemetry`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        span: Option<ServerSpan>,
    }

    impl<F> PinnedDrop for ResponseFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            if let Some(span) = this.project().span.take() {
                span.cancel();
            }
        }
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: fmt::Display,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = match this.span {
            Some(span) => {
                let _guard = span.otel_cx.clone().attach();
                ready!(this.inner.poll(cx))
            }
            None => ready!(this.inner.poll(cx)),
        };
        if let Some(span) = this.span.take() {
            span.finish(&result);
        }
        Poll::Ready(result)
    }
}

/// {0}
#[derive(Debug, Display, Error)]
struct ServiceError(String);

struct ServerSpan {
    otel_cx: opentelemetry::Context,
    head: Request<()>,
    route: HttpRoute,
    extractor: Arc<HttpServerExtractor>,
}

impl ServerSpan {
    fn finish<ResBody, E: fmt::Display>(self, result: &Result<Response<ResBody>, E>) {
        let span = self.otel_cx.span();
        let route = self.route.route();
        let (attributes, status) = match result {
            Ok(response) => {
                let head = response_head(response);
                tracing::debug!(
                    method = %self.head.method(),
                    path = self.head.uri().path(),
                    status = response.status().as_u16(),
                    "request handled"
                );
                (
                    self.extractor
                        .on_end(&self.head, Some(&head), None, route.as_deref()),
                    span_status(Some(response.status().as_u16()), None),
                )
            }
            Err(error) => {
                let error = ServiceError(error.to_string());
                tracing::debug!(
                    method = %self.head.method(),
                    path = self.head.uri().path(),
                    error = %error,
                    "request failed"
                );
                (
                    self.extractor
                        .on_end(&self.head, None, Some(&error), route.as_deref()),
                    span_status(None, Some(&error)),
                )
            }
        };
        span.set_attributes(attributes);
        span.set_status(status);
        if route.is_some() {
            span.update_name(self.route.span_name());
        }
        span.end();
    }

    // The response future was dropped before completing.
    fn cancel(self) {
        tracing::debug!(
            method = %self.head.method(),
            path = self.head.uri().path(),
            "request cancelled"
        );
        let span = self.otel_cx.span();
        let route = self.route.route();
        span.set_attributes(
            self.extractor
                .on_end(&self.head, None, None, route.as_deref()),
        );
        if route.is_some() {
            span.update_name(self.route.span_name());
        }
        span.end();
    }
}

fn request_head<B>(request: &Request<B>) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = request.method().clone();
    *head.uri_mut() = request.uri().clone();
    *head.version_mut() = request.version();
    *head.headers_mut() = request.headers().clone();
    *head.extensions_mut() = request.extensions().clone();
    head
}

fn response_head<B>(response: &Response<B>) -> Response<()> {
    let mut head = Response::new(());
    *head.status_mut() = response.status();
    *head.version_mut() = response.version();
    *head.headers_mut() = response.headers().clone();
    head
}
