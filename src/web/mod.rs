//! Web layer: the scrape endpoint and a minimal index page.
//!
//! The exposition layer only ever reads the store; samplers never push into
//! the web layer.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::scheduler::ShutdownReceiver;
use crate::store::StreamStore;

pub mod exporter;

pub use exporter::Exporter;

const INDEX_PAGE: &str = r#"<html>
<head><title>FLV Probe</title></head>
<body>
<h1>FLV Probe</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#;

#[derive(Clone)]
struct AppState {
    exporter: Arc<Exporter>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(listen_addr: &str, store: StreamStore) -> Result<Self> {
        let exporter = Arc::new(Exporter::new(store)?);
        let state = AppState { exporter };

        let app = Router::new()
            .route("/", get(index))
            .route("/metrics", get(metrics))
            .with_state(state);

        let addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {listen_addr:?}"))?;

        Ok(Self { app, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the shutdown channel fires; in-flight scrapes complete.
    pub async fn serve(self, mut shutdown: ShutdownReceiver) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "exposition endpoint listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        Ok(())
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Scrape handler: gauges are refreshed from the store on every request, so
/// a scrape always sees the latest committed cycle.
async fn metrics(State(state): State<AppState>) -> Response {
    debug!("metrics scrape");
    match state.exporter.render().await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
