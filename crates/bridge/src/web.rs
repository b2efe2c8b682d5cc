use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::bridge::{BridgeHandle, SubmitError};
use crate::command::{Command, CommandError};
use crate::dashboard::DashboardStatus;

#[derive(Clone)]
pub struct WebState {
    pub status: watch::Receiver<DashboardStatus>,
    pub handle: BridgeHandle,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
}

#[derive(Debug, Deserialize)]
struct TargetRequest {
    mac: String,
}

#[derive(Debug, Serialize)]
struct ApiResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/command", post(api_command))
        .route("/api/target", post(api_target))
        .with_state(state)
}

async fn api_status(State(state): State<WebState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn api_command(
    State(state): State<WebState>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let command: Command = match req.command.parse() {
        Ok(c) => c,
        Err(e) => return respond(Err(SubmitError::Command(e))),
    };
    respond(state.handle.submit(command).await)
}

async fn api_target(
    State(state): State<WebState>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    respond(state.handle.set_target(req.mac).await)
}

fn respond(result: Result<(), SubmitError>) -> (StatusCode, Json<ApiResult>) {
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResult {
                ok: true,
                error: None,
            }),
        ),
        Err(e) => {
            let code = match &e {
                SubmitError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                SubmitError::Command(CommandError::NotConnected) => StatusCode::CONFLICT,
                SubmitError::Command(_) => StatusCode::BAD_REQUEST,
            };
            (
                code,
                Json(ApiResult {
                    ok: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: WebState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
