#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
mod executor;
mod structures;

use std::{net::SocketAddr, str::FromStr, time::Duration};

use axum::{
    Router,
    extract::{Path, Request, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::structures::{LatencyResponse, MCPingResponse, QueryStatusResponse};

#[macro_use]
extern crate tracing;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PING_TIMEOUT_MS: u64 = 1000;
const DEFAULT_REQUEST_DEADLINE_MS: u64 = 5000;

/// Time budgets for one API request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Socket timeout for each exchange with the server.
    pub ping_timeout: Duration,
    /// When the whole request gives up, retries included.
    pub deadline: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            deadline: Duration::from_millis(DEFAULT_REQUEST_DEADLINE_MS),
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error("invalid value {1:?} for {0}")]
    InvalidVar(&'static str, String),
    #[error("invalid log directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, StartupError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| StartupError::InvalidVar(name, value)),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    start_tracing()?;
    let port: u16 = env_or("PORT", DEFAULT_PORT)?;
    let limits = Limits {
        ping_timeout: Duration::from_millis(env_or("PING_TIMEOUT_MS", DEFAULT_PING_TIMEOUT_MS)?),
        deadline: Duration::from_millis(env_or(
            "REQUEST_DEADLINE_MS",
            DEFAULT_REQUEST_DEADLINE_MS,
        )?),
    };

    let socket_address = SocketAddr::from(([0, 0, 0, 0], port));
    let tcp = TcpListener::bind(socket_address).await?;
    info!(%socket_address, ?limits, "listening");
    axum::serve(tcp, app(limits))
        .with_graceful_shutdown(vss::shutdown_signal())
        .await?;
    Ok(())
}

fn app(limits: Limits) -> Router {
    Router::new()
        .route("/api/:address", get(handle_java_ping))
        .route("/api/java/:address", get(handle_java_ping))
        .route("/api/java/:address/ping", get(handle_java_latency))
        .route("/api/java/:address/icon.png", get(handle_java_icon))
        .route("/api/bedrock/:address", get(handle_bedrock_ping))
        .route("/api/query/:address", get(handle_query))
        .route("/api/legacy/:address", get(handle_legacy_ping))
        .layer(axum::middleware::from_fn(noindex_cache))
        .layer(TraceLayer::new_for_http())
        .with_state(limits)
}

static ROBOTS_NAME: HeaderName = HeaderName::from_static("x-robots-tag");
static ROBOTS_VALUE: HeaderValue = HeaderValue::from_static("noindex");
static CACHE_CONTROL_AGE: HeaderValue = HeaderValue::from_static("s-maxage=30");

async fn noindex_cache(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(ROBOTS_NAME.clone(), ROBOTS_VALUE.clone());
    resp.headers_mut()
        .insert(CACHE_CONTROL, CACHE_CONTROL_AGE.clone());
    resp
}

async fn handle_java_ping(
    State(limits): State<Limits>,
    Path(address): Path<String>,
) -> Result<Json<MCPingResponse>, Failure> {
    executor::ping_java(address, limits).await.map(Json)
}

async fn handle_java_latency(
    State(limits): State<Limits>,
    Path(address): Path<String>,
) -> Result<Json<LatencyResponse>, Failure> {
    executor::ping_java_latency(address, limits).await.map(Json)
}

async fn handle_java_icon(
    State(limits): State<Limits>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, Failure> {
    static PNG_CTYPE: HeaderValue = HeaderValue::from_static("image/png");

    let icon = executor::java_icon(address, limits).await?;
    Ok(([(CONTENT_TYPE, PNG_CTYPE.clone())], icon))
}

async fn handle_bedrock_ping(
    State(limits): State<Limits>,
    Path(address): Path<String>,
) -> Result<Json<MCPingResponse>, Failure> {
    executor::ping_bedrock(address, limits).await.map(Json)
}

async fn handle_query(
    State(limits): State<Limits>,
    Path(address): Path<String>,
) -> Result<Json<QueryStatusResponse>, Failure> {
    executor::query(address, limits).await.map(Json)
}

async fn handle_legacy_ping(
    State(limits): State<Limits>,
    Path(address): Path<String>,
) -> Result<Json<MCPingResponse>, Failure> {
    executor::ping_legacy(address, limits).await.map(Json)
}

#[derive(thiserror::Error, Debug)]
pub enum Failure {
    #[error("Error connecting to the server: {0}")]
    ConnectionFailed(#[from] mcprobe::Error),
    #[error("Timed out connecting to the server")]
    TimedOut,
    #[error("The server has no icon")]
    NoIcon,
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = match self {
            Self::ConnectionFailed(mcprobe::Error::InvalidAddress) => StatusCode::BAD_REQUEST,
            Self::ConnectionFailed(_) | Self::TimedOut => StatusCode::OK,
            Self::NoIcon => StatusCode::NOT_FOUND,
        };
        error!(error = ?self, "Error processing request");
        let ser = ErrorSerialization {
            error: self.to_string(),
        };
        (status, Json(ser)).into_response()
    }
}

#[derive(serde::Serialize)]
pub struct ErrorSerialization {
    error: String,
}

pub struct Json<T: Serialize>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        static JSON_CTYPE: HeaderValue = HeaderValue::from_static("application/json;charset=utf-8");

        let body = serde_json::to_vec_pretty(&self.0).unwrap_or_else(|_| {
            r#"{"error": "JSON Serialization failed, please make a bug report"}"#
                .as_bytes()
                .to_vec()
        });
        ([(CONTENT_TYPE, JSON_CTYPE.clone())], body).into_response()
    }
}

fn start_tracing() -> Result<(), StartupError> {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("mcprobe_api=info".parse()?)
        .with_env_var("LOG")
        .from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
    Ok(())
}
