//! SFTP Exporter Web - HTTP endpoint exposing the exporter metrics.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use sftp_exporter_core::ExporterMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

const INDEX: &str = "<html><head><title>SFTP Exporter</title></head>\
<body><h1>SFTP Exporter</h1><p><a href=\"/metrics\">Metrics</a></p></body></html>";

/// Build the router serving `/metrics` and a small index page.
pub fn router(metrics: Arc<ExporterMetrics>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn render_metrics(State(metrics): State<Arc<ExporterMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

/// Serve the metrics endpoint on `addr` until the server fails.
pub async fn serve(addr: SocketAddr, metrics: Arc<ExporterMetrics>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Metrics available on http://{}/metrics", addr);

    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
