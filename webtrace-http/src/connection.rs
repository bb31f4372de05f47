//! Connection level facts that are not part of an [`http::Request`].

use std::net::SocketAddr;
use std::task::Context;
use std::task::Poll;

use tower::Layer;
use tower_service::Service;

/// Request extension describing the connection a request arrived on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer_address: Option<SocketAddr>,
    pub server_address: Option<SocketAddr>,
    /// Whether the connection is TLS terminated by this server.
    pub tls: bool,
}

/// [`Layer`] inserting a fixed [`ConnectionInfo`] into every request.
///
/// Servers usually build one per accepted connection.
#[derive(Clone, Debug)]
pub struct InjectConnectionInfoLayer {
    connection_info: ConnectionInfo,
}

impl InjectConnectionInfoLayer {
    pub fn new(connection_info: ConnectionInfo) -> Self {
        Self { connection_info }
    }
}

impl<S> Layer<S> for InjectConnectionInfoLayer {
    type Service = InjectConnectionInfo<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectConnectionInfo::new(inner, self.connection_info.clone())
    }
}

#[derive(Clone, Debug)]
pub struct InjectConnectionInfo<S> {
    inner: S,
    connection_info: ConnectionInfo,
}

impl<S> InjectConnectionInfo<S> {
    pub fn new(service: S, connection_info: ConnectionInfo) -> Self {
        InjectConnectionInfo {
            inner: service,
            connection_info,
        }
    }
}

impl<S, B> Service<http::Request<B>> for InjectConnectionInfo<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        req.extensions_mut().insert(self.connection_info.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::ServiceBuilder;
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn inserts_connection_info() {
        let info = ConnectionInfo {
            peer_address: Some("127.0.0.1:40000".parse().unwrap()),
            server_address: Some("127.0.0.1:8080".parse().unwrap()),
            tls: true,
        };
        let service = ServiceBuilder::new()
            .layer(InjectConnectionInfoLayer::new(info.clone()))
            .service_fn(|request: http::Request<()>| async move {
                Ok::<_, Infallible>(request.extensions().get::<ConnectionInfo>().cloned())
            });
        let seen = service
            .oneshot(http::Request::new(()))
            .await
            .unwrap();
        assert_eq!(seen, Some(info));
    }
}
