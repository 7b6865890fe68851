//! HTTP handlers for the tool service
//!
//! Every solve request runs one repair loop; nothing is kept between calls.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{ProblemHints, ProblemSpec, SolveSummary};
use crate::repair::RepairEngine;

use super::rpc::{
    INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR, RpcError, RpcRequest, RpcResponse, TOOL_ANSWER, TOOL_HEALTH,
    TOOL_SOLVE, ToolCallParams, tool_list,
};

pub const BANNER: &str = "oragent tool server is running. Use JSON-RPC for API calls.";
pub const HEALTH: &str = "oragent server is running and healthy!";

/// Body of `POST /solve` and the arguments of the solve tools
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolveRequest {
    #[serde(alias = "question", alias = "statement")]
    pub user_question: String,

    #[serde(default, alias = "model_name")]
    pub model_id: Option<String>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub hints: ProblemHints,
}

/// Why a request was not served
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Shared state of the service
pub struct AppState {
    engine: Arc<RepairEngine>,
    limiter: Arc<Semaphore>,
    default_model: String,
    default_max_attempts: u32,
    max_attempts_cap: u32,
}

impl AppState {
    pub fn new(engine: Arc<RepairEngine>, config: &Config) -> Self {
        debug!(
            max_concurrent = config.server.max_concurrent_requests,
            cap = config.server.max_attempts_cap,
            "AppState::new: called"
        );
        Self {
            engine,
            limiter: Arc::new(Semaphore::new(config.server.max_concurrent_requests.max(1))),
            default_model: config.llm.model.clone(),
            default_max_attempts: config.repair.max_attempts,
            max_attempts_cap: config.server.max_attempts_cap,
        }
    }

    /// Budget for one request: caller override or default, within 1..=cap
    pub fn effective_max_attempts(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_attempts)
            .clamp(1, self.max_attempts_cap.max(1))
    }

    /// Run one repair loop and flatten its result
    pub async fn solve(&self, request: SolveRequest) -> Result<SolveSummary, ServiceError> {
        let statement = request.user_question.trim();
        if statement.is_empty() {
            return Err(ServiceError::InvalidInput("user_question must not be empty".to_string()));
        }

        let model_id = request
            .model_id
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string();
        let max_attempts = self.effective_max_attempts(request.max_attempts);
        let problem = ProblemSpec::new(statement).with_hints(request.hints);
        debug!(problem_id = %problem.id, %model_id, max_attempts, "AppState::solve: called");

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;

        let result = self.engine.solve(&problem, max_attempts, &model_id).await;
        info!(
            "Request {} finished: solved={}, attempts={}",
            problem.id,
            result.is_solved(),
            result.attempts_used()
        );
        Ok(result.summary())
    }
}

pub async fn banner() -> &'static str {
    BANNER
}

pub async fn health() -> &'static str {
    HEALTH
}

/// `POST /solve`
pub async fn solve(State(state): State<Arc<AppState>>, Json(request): Json<SolveRequest>) -> Response {
    debug!("solve handler: called");
    match state.solve(request).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e @ ServiceError::InvalidInput(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"status": "failed", "error": e.to_string()}))).into_response()
        }
        Err(e @ ServiceError::Unavailable(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "failed", "error": e.to_string()})),
        )
            .into_response(),
    }
}

/// `POST /` and `POST /tools/call`
pub async fn jsonrpc(State(state): State<Arc<AppState>>, body: String) -> Json<RpcResponse> {
    Json(dispatch(&state, &body).await)
}

/// Decode and answer one JSON-RPC request
pub async fn dispatch(state: &AppState, body: &str) -> RpcResponse {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "dispatch: parse error");
            return RpcResponse::failure(Value::Null, RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)));
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "dispatch: invalid request");
            return RpcResponse::failure(id, RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e)));
        }
    };

    debug!(method = %request.method, id = %request.id, "dispatch: called");
    match request.method.as_str() {
        "ping" => RpcResponse::success(request.id, json!("pong")),
        "tools/list" => RpcResponse::success(request.id, tool_list()),
        "tools/call" => call_tool(state, request.id, request.params).await,
        other => RpcResponse::failure(request.id, RpcError::method_not_found(other)),
    }
}

async fn call_tool(state: &AppState, id: Value, params: Value) -> RpcResponse {
    let params: ToolCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return RpcResponse::failure(id, RpcError::invalid_params(format!("tools/call: {}", e))),
    };
    debug!(tool = %params.name, "call_tool: called");

    match params.name.as_str() {
        TOOL_ANSWER | TOOL_SOLVE => {
            let request: SolveRequest = match serde_json::from_value(params.arguments) {
                Ok(request) => request,
                Err(e) => return RpcResponse::failure(id, RpcError::invalid_params(format!("{}: {}", params.name, e))),
            };
            match state.solve(request).await {
                Ok(summary) => match serde_json::to_value(&summary) {
                    Ok(result) => RpcResponse::success(id, result),
                    Err(e) => RpcResponse::failure(id, RpcError::new(INTERNAL_ERROR, format!("Internal error: {}", e))),
                },
                Err(ServiceError::InvalidInput(message)) => RpcResponse::failure(id, RpcError::invalid_params(message)),
                Err(e @ ServiceError::Unavailable(_)) => {
                    warn!("Tool call refused: {}", e);
                    RpcResponse::failure(id, RpcError::new(INTERNAL_ERROR, e.to_string()))
                }
            }
        }
        TOOL_HEALTH => RpcResponse::success(id, json!(HEALTH)),
        other => RpcResponse::failure(id, RpcError::method_not_found(other)),
    }
}
