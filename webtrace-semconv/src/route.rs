//! Tracking of the `http.route` value while a request is processed.
//!
//! The matched route is rarely known when a server span starts. An [`HttpRoute`] is created
//! alongside the span, handed down the stack (usually through request extensions), and
//! updated by whichever layer resolves the route. The most specific source wins.

use std::sync::Arc;

use parking_lot::Mutex;

/// Where a route value comes from. Later stages of request processing know more specific
/// routes and take precedence over earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpRouteSource {
    /// A middleware wrapping the whole router.
    Middleware,
    /// The router that dispatched the request.
    Router,
    /// The handler selected by the router.
    Handler,
    /// A handler nested inside another handler.
    NestedHandler,
}

impl HttpRouteSource {
    fn order(self) -> u8 {
        match self {
            HttpRouteSource::Middleware => 1,
            HttpRouteSource::Router => 2,
            HttpRouteSource::Handler => 3,
            HttpRouteSource::NestedHandler => 4,
        }
    }

    // When false the same source may replace its own value with a longer route.
    fn use_first(self) -> bool {
        !matches!(
            self,
            HttpRouteSource::Middleware | HttpRouteSource::NestedHandler
        )
    }
}

#[derive(Debug, Default)]
struct RouteState {
    method: Option<String>,
    route: Option<String>,
    updated_by_source_order: u8,
}

/// Shared, per request holder of the best known route.
#[derive(Clone, Debug, Default)]
pub struct HttpRoute {
    state: Arc<Mutex<RouteState>>,
}

impl HttpRoute {
    /// `method` is used as given in [`HttpRoute::span_name`], so callers pass the method already
    /// normalized for span names.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RouteState {
                method: Some(method.into()),
                ..Default::default()
            })),
        }
    }

    /// Offers a route from `source`. Returns whether the stored route changed.
    pub fn update(&self, source: HttpRouteSource, route: &str) -> bool {
        self.update_with(source, || Some(route.to_string()))
    }

    /// Like [`HttpRoute::update`], but only computes the route when `source` is allowed to
    /// replace the current value.
    pub fn update_with<F>(&self, source: HttpRouteSource, route: F) -> bool
    where
        F: FnOnce() -> Option<String>,
    {
        let mut state = self.state.lock();
        let only_if_better = !source.use_first() && source.order() == state.updated_by_source_order;
        if source.order() <= state.updated_by_source_order && !only_if_better {
            return false;
        }
        let Some(route) = route().filter(|route| !route.is_empty()) else {
            return false;
        };
        if only_if_better {
            let current = state.route.as_deref().map_or(0, str::len);
            if route.len() <= current {
                return false;
            }
        }
        state.route = Some(route);
        state.updated_by_source_order = source.order();
        true
    }

    pub fn route(&self) -> Option<String> {
        self.state.lock().route.clone()
    }

    /// `{method} {route}`, or whichever of the two is known.
    pub fn span_name(&self) -> String {
        let state = self.state.lock();
        match (state.method.as_deref(), state.route.as_deref()) {
            (Some(method), Some(route)) => format!("{method} {route}"),
            (Some(method), None) => method.to_string(),
            (None, Some(route)) => route.to_string(),
            (None, None) => "HTTP".to_string(),
        }
    }
}
