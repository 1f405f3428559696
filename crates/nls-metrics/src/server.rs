//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "HTTP endpoint serving scrapes, health and a banner."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::TEXT_FORMAT;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::scrape::SnapshotCollector;

#[derive(Clone)]
struct AppState {
    collector: Arc<SnapshotCollector>,
    banner: Arc<str>,
}

fn router(collector: Arc<SnapshotCollector>, metrics_path: &str) -> Router {
    let state = AppState {
        collector,
        banner: format!("nvidia-license-server-exporter\nscrape metrics at {metrics_path}\n").into(),
    };
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/healthz", get(healthz))
        .fallback(banner)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Spawn the HTTP server exposing scrapes at `metrics_path`.
pub fn spawn_http_server(
    collector: Arc<SnapshotCollector>,
    addr: SocketAddr,
    metrics_path: &str,
) -> Result<MetricsServer> {
    if !metrics_path.starts_with('/') {
        anyhow::bail!("metrics path {metrics_path:?} must start with '/'");
    }
    let app = router(collector, metrics_path);

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, path = metrics_path, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.collector.encode().await {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

async fn healthz() -> &'static str {
    "ok\n"
}

async fn banner(State(state): State<AppState>) -> String {
    state.banner.to_string()
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}
