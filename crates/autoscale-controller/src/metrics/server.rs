use core::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use error_stack::Report;
use poem::get;
use poem::handler;
use poem::http::StatusCode;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::web::Data;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Response;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::ControllerMetrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, derive_more::Display)]
pub enum MetricsServerError {
    #[display("metrics server on {addr} failed: {message}")]
    Serve { addr: String, message: String },
}

impl Error for MetricsServerError {}

/// Flag flipped once the controllers are running.
#[derive(Clone, Default)]
struct Readiness(Arc<AtomicBool>);

#[handler]
fn metrics_endpoint(Data(metrics): Data<&ControllerMetrics>) -> Response {
    match metrics.encode() {
        Ok(body) => Response::builder().content_type(TEXT_FORMAT).body(body),
        Err(report) => {
            error!("failed to encode metrics: {report:?}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(report.current_context().to_string())
        }
    }
}

#[handler]
fn healthz() -> &'static str {
    "ok"
}

#[handler]
fn readyz(Data(readiness): Data<&Readiness>) -> Response {
    if readiness.0.load(Ordering::Acquire) {
        Response::builder().body("ok")
    } else {
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body("starting")
    }
}

/// Serves `/metrics`, `/healthz` and `/readyz`.
pub struct MetricsServer {
    metrics: ControllerMetrics,
    listen_addr: String,
    readiness: Readiness,
}

impl MetricsServer {
    pub fn new(metrics: ControllerMetrics, listen_addr: impl Into<String>) -> Self {
        Self {
            metrics,
            listen_addr: listen_addr.into(),
            readiness: Readiness::default(),
        }
    }

    /// Returns a closure that marks the process ready.
    pub fn ready_handle(&self) -> impl Fn() + Send + Sync + 'static {
        let flag = Arc::clone(&self.readiness.0);
        move || flag.store(true, Ordering::Release)
    }

    fn routes(&self) -> impl Endpoint {
        Route::new()
            .at("/metrics", get(metrics_endpoint))
            .at("/healthz", get(healthz))
            .at("/readyz", get(readyz))
            .data(self.metrics.clone())
            .data(self.readiness.clone())
            .with(Tracing)
    }

    /// Runs until `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`MetricsServerError::Serve`] if binding or serving fails
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Report<MetricsServerError>> {
        info!("starting metrics server on {}", self.listen_addr);
        let app = self.routes();
        let server = Server::new(TcpListener::bind(self.listen_addr.clone()));

        tokio::select! {
            result = server.run(app) => result.map_err(|e| {
                Report::new(MetricsServerError::Serve {
                    addr: self.listen_addr.clone(),
                    message: e.to_string(),
                })
            }),
            _ = cancel.cancelled() => {
                info!("metrics server shutting down");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use poem::test::TestClient;
    use test_log::test;

    use super::*;

    fn server() -> MetricsServer {
        MetricsServer::new(ControllerMetrics::new().unwrap(), "127.0.0.1:0")
    }

    #[test(tokio::test)]
    async fn serves_prometheus_text() {
        let server = server();
        server.metrics.record_reconcile("Deployment");
        let client = TestClient::new(server.routes());

        let response = client.get("/metrics").send().await;

        response.assert_status_is_ok();
        response.assert_content_type(TEXT_FORMAT);
        let body = response.0.into_body().into_string().await.unwrap();
        assert!(body.contains("infraflow_autoscaler_reconcile_total{kind=\"Deployment\"} 1"));
    }

    #[test(tokio::test)]
    async fn readiness_follows_flag() {
        let server = server();
        let mark_ready = server.ready_handle();
        let client = TestClient::new(server.routes());

        client
            .get("/readyz")
            .send()
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
        mark_ready();
        client.get("/readyz").send().await.assert_status_is_ok();
        client.get("/healthz").send().await.assert_text("ok").await;
    }

    #[test(tokio::test)]
    async fn stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = server().run(cancel).await;

        assert!(result.is_ok());
    }
}
