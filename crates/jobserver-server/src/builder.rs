use std::future::Future;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use log::debug;
use tokio::net::TcpListener;

pub struct ServerBuilder {
    name: &'static str,
    router: Router,
}

impl ServerBuilder {
    pub fn new(name: &'static str) -> Self {
        let router = Router::new().route("/health", get(|| async { "SERVING" }));
        Self { name, router }
    }

    pub fn add_routes(mut self, routes: Router) -> Self {
        self.router = self.router.merge(routes);
        self
    }

    pub async fn serve<F>(
        self,
        // The listener is bound by the caller so that an ephemeral port can be reported
        // before the server starts accepting connections.
        listener: TcpListener,
        signal: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = self.name;
        let router = self.router.layer(middleware::from_fn(
            move |request: Request, next: Next| log_request(name, request, next),
        ));
        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}

async fn log_request(name: &'static str, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let response = next.run(request).await;
    debug!(
        "{name} {method} {uri} {} in {}ms",
        response.status(),
        start.elapsed().as_millis()
    );
    response
}
