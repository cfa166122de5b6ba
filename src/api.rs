// api.rs - Enumeration engine HTTP API
// Purpose: axum router over the scan engine (state, networks, streaming scan,
//          graph, download), wrapped in token auth, rate limiting and CORS

use crate::auth::{TokenAuth, print_token_banner, require_token};
use crate::engine::Engine;
use crate::graph::{Graph, build_graph, resolve_gateway};
use crate::model::unix_now;
use crate::nmap::{self, NetworkList};
use crate::rate_limiter::{RateLimiter, limit_requests};
use crate::store::load_scan;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::stream::{self, StreamExt};
use ipnet::IpNet;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Deserialize)]
pub struct ScanInput {
    #[serde(default)]
    pub network: String,
}

/// Non-strict CIDR parse: host bits are masked off, a bare address is a /32 (or /128)
pub fn validate_cidr(input: &str) -> Option<IpNet> {
    let input = input.trim();
    input
        .parse::<IpNet>()
        .ok()
        .or_else(|| input.parse::<IpAddr>().ok().map(IpNet::from))
        .map(|net| net.trunc())
}

fn error_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

async fn home() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "API is running"}))
}

async fn get_state(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.state())
}

async fn list_networks(State(engine): State<Arc<Engine>>) -> Json<NetworkList> {
    match nmap::list_networks(engine.shell(), engine.logger()).await {
        Ok(list) => Json(list),
        Err(e) => {
            engine.logger().error(format!("Error listing networks: {}", e));
            Json(NetworkList::default())
        }
    }
}

async fn start_scan(State(engine): State<Arc<Engine>>, Json(input): Json<ScanInput>) -> Response {
    if input.network.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, json!({"error": "Network CIDR required"}));
    }

    let Some(network) = validate_cidr(&input.network) else {
        engine.logger().error(format!("Invalid network CIDR: {}", input.network));
        return error_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "Invalid network CIDR", "format": "x.x.x.x/x"}),
        );
    };
    let network = network.to_string();

    let Some(guard) = engine.try_begin() else {
        return error_response(StatusCode::CONFLICT, json!({"error": "Scan already in progress"}));
    };
    engine.logger().info(format!("Starting scan on validated network: {}", network));

    let (subscription, lines) = engine.logger().subscribe();
    let worker = Arc::clone(&engine);
    let target = network.clone();
    tokio::spawn(async move {
        if let Err(e) = worker.run_scan(guard, &target).await {
            worker.logger().error(format!("Scan of {} failed: {:#}", target, e));
        }
        worker.logger().unsubscribe(subscription);
    });

    let body = stream::once(async move { format!("Initiating scan of {}...\n", network) })
        .chain(stream::unfold(lines, |mut lines| async move {
            lines.recv().await.map(|line| (line, lines))
        }))
        .chain(stream::once(async { "Scan complete. Results saved to database.\n".to_string() }))
        .map(Ok::<_, Infallible>);

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=scan_log_{}.txt", unix_now() as u64),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn get_graph(State(engine): State<Arc<Engine>>) -> Json<Graph> {
    let results = &engine.config().results_file;
    if !results.exists() {
        return Json(Graph::default());
    }

    let scan = match load_scan(results) {
        Ok(scan) => scan,
        Err(e) => {
            engine.logger().error(format!("Error loading scan results: {:#}", e));
            return Json(Graph::default());
        }
    };

    let iflist = match nmap::run_nmap(engine.shell(), engine.logger(), &["--iflist".to_string()]).await {
        Ok(stdout) => Some(stdout),
        Err(e) => {
            engine.logger().error(format!("Error finding gateway: {}", e));
            None
        }
    };
    let gateway = resolve_gateway(iflist.as_deref(), &scan);
    if let Some(gateway) = &gateway {
        engine.logger().debug(format!("Gateway: {}", gateway));
    }

    Json(build_graph(&scan, gateway.as_deref()))
}

async fn download(State(engine): State<Arc<Engine>>) -> Response {
    let results = &engine.config().results_file;
    let Ok(content) = tokio::fs::read(results).await else {
        engine.logger().warn("Download request failed: No scan results found");
        return error_response(StatusCode::NOT_FOUND, json!({"error": "No scan results found"}));
    };

    let filename = format!("netenum_scan_{}.json", unix_now() as u64);
    engine.logger().info(format!("Sending scan results download as {}", filename));
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
            (header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Disposition".to_string()),
        ],
        content,
    )
        .into_response()
}

fn routes() -> Router<Arc<Engine>> {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/networks", get(list_networks))
        .route("/scan", post(start_scan))
        .route("/graph", get(get_graph))
        .route("/download", get(download))
}

/// Any origin, method and header; response headers are left as the handlers set them
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Every endpoint at the root and under /api/v1
pub fn create_router(engine: Arc<Engine>, auth: Arc<TokenAuth>, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/v1", get(home))
        .route("/api/v1/", get(home))
        .merge(routes())
        .nest("/api/v1", routes())
        .with_state(engine)
        .layer(axum::middleware::from_fn_with_state(auth, require_token))
        .layer(axum::middleware::from_fn_with_state(limiter, limit_requests))
        .layer(cors_layer())
}

pub async fn start_api_server(engine: Arc<Engine>, token: String) -> anyhow::Result<()> {
    let config = engine.config().clone();
    let logger = engine.logger().clone();

    let mut auth = TokenAuth::new(vec![token.clone()], config.auth_exclude_paths.clone(), logger.clone());
    if let Some(ttl) = config.token_ttl_secs {
        auth = auth.with_expiry(&token, unix_now() + ttl as f64);
        logger.info(format!("API token expires in {} seconds", ttl));
    }
    let auth = Arc::new(auth);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_requests, config.rate_limit_window_secs));
    let app = create_router(engine, auth, limiter);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_token_banner(&token);
    logger.success(format!("API server listening on http://{}", addr));

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(logger.clone()))
        .await?;

    logger.success("API server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(logger: crate::logger::Logger) {
    use tokio::signal;

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => logger.warn("Received Ctrl+C, shutting down"),
        _ = terminate => logger.warn("Received SIGTERM, shutting down"),
    }
}
