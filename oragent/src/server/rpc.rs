//! JSON-RPC 2.0 message types for the tool-call surface
//!
//! Requests arrive as a single JSON object; the response always echoes `id`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Tool that runs one repair loop (original name)
pub const TOOL_ANSWER: &str = "get_operation_research_problem_answer";
/// Same tool under its short name
pub const TOOL_SOLVE: &str = "solve_problem";
pub const TOOL_HEALTH: &str = "health_check";

/// Incoming request
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method {} not found", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

/// Outgoing response: exactly one of `result` / `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Tools advertised by `tools/list`
pub fn tool_list() -> Value {
    let solve_params = json!({
        "user_question": {"type": "string", "description": "The optimization problem in natural language"},
        "model_name": {"type": "string", "description": "Model id to use (e.g. gpt-4o, claude-sonnet-4, gemini-1.5-pro, ollama:qwen2.5)"},
        "max_attempts": {"type": "integer", "description": "Maximum number of generate/execute attempts"}
    });
    json!([
        {
            "name": TOOL_ANSWER,
            "description": "Use the agent to solve the optimization problem",
            "parameters": solve_params
        },
        {
            "name": TOOL_SOLVE,
            "description": "Solve an optimization problem and return the answer and the program that produced it",
            "parameters": solve_params
        },
        {
            "name": TOOL_HEALTH,
            "description": "Simple health check to verify the server is running",
            "parameters": {}
        }
    ])
}
