//! HTTP API for the browser extension.
//!
//! Serves the loopback-only endpoints the extension polls and posts to:
//! `/status`, `/data`, `/launch/<tool>`, `/capture`, `/session`, `/captcha`.
//! Every reply carries `Access-Control-Allow-Origin: *` so extension pages
//! can call the daemon cross-origin.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use log::{info, warn};
use serde_json::{json, Value};
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use crate::bridge::relay::Hub;
use crate::bridge::types::RelayMessage;
use crate::capture::types::CapturedRequest;
use crate::capture::CaptureProcessor;
use crate::controller::tool_supervisor::ToolSupervisor;
use crate::error_handling::types::BridgeError;
use crate::session_management::types::SessionUpdate;
use crate::session_management::{CaptchaChallenge, SessionManager};

/// API error payload
#[derive(serde::Serialize)]
struct ApiError {
    message: String,
}

/// CAPTCHA services the daemon knows how to route to. Only manual solving
/// is wired up; the others are advertised so the extension can offer them.
const CAPTCHA_SERVICES: [&str; 3] = ["manual", "2captcha", "anticaptcha"];

struct ServerState {
    hub: Arc<Hub>,
    processor: Arc<CaptureProcessor>,
    sessions: Arc<SessionManager>,
    supervisor: Arc<ToolSupervisor>,
    auto_captcha: bool,
}

/// Web server for the extension-facing HTTP API
pub struct BridgeServer {
    state: Arc<ServerState>,
}

impl BridgeServer {
    pub fn new(
        hub: Arc<Hub>,
        processor: Arc<CaptureProcessor>,
        sessions: Arc<SessionManager>,
        supervisor: Arc<ToolSupervisor>,
        auto_captcha: bool,
    ) -> Self {
        Self {
            state: Arc::new(ServerState {
                hub,
                processor,
                sessions,
                supervisor,
                auto_captcha,
            }),
        }
    }

    /// Start the web server on the given port, loopback only. Consumes the
    /// server; it runs until the process exits.
    pub async fn start(self, port: u16) -> Result<(), BridgeError> {
        let state_for_status = self.state.clone();
        let state_for_data = self.state.clone();
        let state_for_launch = self.state.clone();
        let state_for_capture = self.state.clone();
        let state_for_session = self.state.clone();
        let state_for_captcha = self.state.clone();

        // GET /status -> daemon liveness and tool flags
        let status = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let state = state_for_status.clone();
                async move {
                    let body = json!({
                        "status": "active",
                        "tools": state.hub.tools_snapshot(),
                        "sessions": state.sessions.session_count().await,
                        "timestamp": Utc::now().to_rfc3339(),
                    });
                    Ok::<_, Rejection>(cors_json(&body, StatusCode::OK))
                }
            });

        // GET /data -> session snapshot for the extension
        let data = warp::path("data")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let state = state_for_data.clone();
                async move {
                    let body = json!({
                        "sessions": state.sessions.sessions_by_domain().await,
                        "active_tools": state.hub.tools_snapshot(),
                        "captcha_services": CAPTCHA_SERVICES,
                        "controller": state.supervisor.status().await,
                        "timestamp": Utc::now().to_rfc3339(),
                    });
                    Ok::<_, Rejection>(cors_json(&body, StatusCode::OK))
                }
            });

        // GET /launch/:tool -> start a desktop tool
        let launch = warp::path!("launch" / String)
            .and(warp::get())
            .and_then(move |tool: String| {
                let state = state_for_launch.clone();
                async move {
                    let success = match state.supervisor.launch_tool(&tool).await {
                        Ok(launched) => launched,
                        Err(e) => {
                            warn!("Launch of {} failed: {}", tool, e);
                            false
                        }
                    };
                    let body = json!({ "success": success, "tool": tool });
                    Ok::<_, Rejection>(cors_json(&body, StatusCode::OK))
                }
            });

        // POST /capture -> batch of captured requests from the extension
        let capture = warp::path("capture")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::bytes())
            .and_then(move |body: Bytes| {
                let state = state_for_capture.clone();
                async move {
                    let payload: Value = match serde_json::from_slice(&body) {
                        Ok(v) => v,
                        Err(e) => return Ok::<_, Rejection>(invalid_json(e)),
                    };
                    let raw = payload["requests"].as_array().cloned().unwrap_or_default();
                    let requests: Vec<CapturedRequest> = raw
                        .iter()
                        .filter_map(|item| serde_json::from_value(item.clone()).ok())
                        .collect();
                    state.processor.process_batch(&requests).await;
                    if !raw.is_empty() {
                        state.hub.broadcast(&RelayMessage::new_captures(raw.len()));
                    }
                    // A capture batch can carry a CAPTCHA alongside the requests.
                    if state.auto_captcha && payload["captcha"].is_object() {
                        let challenge: CaptchaChallenge =
                            serde_json::from_value(payload["captcha"].clone())
                                .unwrap_or_default();
                        let solution = state.sessions.solve_captcha(&challenge).await;
                        state
                            .hub
                            .broadcast(&RelayMessage::captcha_solution(solution.as_deref()));
                    }
                    let body = json!({ "received": true, "count": raw.len() });
                    Ok::<_, Rejection>(cors_json(&body, StatusCode::OK))
                }
            });

        // POST /session -> partial session update
        let session = warp::path("session")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::bytes())
            .and_then(move |body: Bytes| {
                let state = state_for_session.clone();
                async move {
                    let payload: Value = match serde_json::from_slice(&body) {
                        Ok(v) => v,
                        Err(e) => return Ok::<_, Rejection>(invalid_json(e)),
                    };
                    if let Some(session_id) = payload["session_id"].as_str() {
                        let update: SessionUpdate =
                            serde_json::from_value(payload.clone()).unwrap_or_default();
                        match state.sessions.update_session(session_id, update).await {
                            Ok(true) => {}
                            Ok(false) => warn!("Session update for unknown id {}", session_id),
                            Err(e) => warn!("Session update failed for {}: {}", session_id, e),
                        }
                    }
                    Ok::<_, Rejection>(cors_json(&json!({ "success": true }), StatusCode::OK))
                }
            });

        // POST /captcha -> solve a challenge, null when unsolved
        let captcha = warp::path("captcha")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::bytes())
            .and_then(move |body: Bytes| {
                let state = state_for_captcha.clone();
                async move {
                    let payload: Value = match serde_json::from_slice(&body) {
                        Ok(v) => v,
                        Err(e) => return Ok::<_, Rejection>(invalid_json(e)),
                    };
                    let challenge: CaptchaChallenge =
                        serde_json::from_value(payload["captcha"].clone()).unwrap_or_default();
                    let solution = state.sessions.solve_captcha(&challenge).await;
                    Ok::<_, Rejection>(cors_json(
                        &json!({ "solution": solution }),
                        StatusCode::OK,
                    ))
                }
            });

        // Compose routes
        let routes = status
            .or(data)
            .or(launch)
            .or(capture)
            .or(session)
            .or(captcha)
            .boxed();

        // Start server (warp 0.4), loopback only
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        info!("Bridge API listening on http://{}", addr);
        warp::serve(routes).run(addr).await;

        Ok(())
    }
}

fn cors_json(body: &Value, status: StatusCode) -> warp::reply::Response {
    reply::with_header(
        reply::with_status(reply::json(body), status),
        "Access-Control-Allow-Origin",
        "*",
    )
    .into_response()
}

fn invalid_json(err: serde_json::Error) -> warp::reply::Response {
    reply::with_header(
        reply::with_status(
            reply::json(&ApiError {
                message: format!("Invalid JSON payload: {}", err),
            }),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        "Access-Control-Allow-Origin",
        "*",
    )
    .into_response()
}
