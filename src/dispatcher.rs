// src/dispatcher.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::engine::{ExecutionRequest, MatlabEngine};
use crate::protocol::{
    Capabilities, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, Message,
    ServerInfo, Tool, ToolCallParams, ToolCallResult, INTERNAL_ERROR, INVALID_PARAMS,
    METHOD_NOT_FOUND, PROTOCOL_VERSION,
};

pub const TOOL_EXECUTE: &str = "execute_code";
pub const TOOL_GENERATE: &str = "generate_code";

// Routes decoded messages to handlers. The only state beyond the engine
// handle is the availability latch: false until a probe succeeds, then true
// for the rest of the process. A racy double-probe just writes `true` twice.
pub struct Dispatcher {
    engine: Arc<MatlabEngine>,
    engine_ready: AtomicBool,
}

impl Dispatcher {
    pub fn new(engine: Arc<MatlabEngine>) -> Self {
        Self {
            engine,
            engine_ready: AtomicBool::new(false),
        }
    }

    // Single entry point for both transports. Requests always produce a
    // response; notifications and stray responses produce None.
    pub async fn dispatch(&self, message: Message) -> Option<JsonRpcResponse> {
        match message {
            Message::Request(request) => Some(self.handle_request(request).await),
            Message::Notification(notification) => {
                debug!(method = %notification.method, "notification received, no reply");
                None
            }
            Message::Response(response) => {
                // A server should never be sent responses; log and drop.
                warn!(id = %response.id, "ignoring unexpected response message");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, "handling request");
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            other => {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        }
    }

    fn handle_initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        // Echo the client's protocol version when it sends one.
        let protocol_version = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(PROTOCOL_VERSION)
            .to_string();

        let result = InitializeResult {
            protocol_version,
            capabilities: Capabilities::empty(),
            server_info: ServerInfo::current(),
        };
        serialize_result(id, result)
    }

    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        serialize_result(
            id,
            ListToolsResult {
                tools: tool_definitions(),
            },
        )
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            Ok(None) | Err(_) => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "tools/call requires params with a tool name and arguments",
                );
            }
        };

        match params.name.as_str() {
            TOOL_EXECUTE => self.call_execute(id, &params.arguments).await,
            TOOL_GENERATE => self.call_generate(id, &params.arguments).await,
            other => {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown tool: {other}"))
            }
        }
    }

    async fn call_execute(&self, id: Value, arguments: &Value) -> JsonRpcResponse {
        let code = match required_string(arguments, "code") {
            Some(code) => code,
            None => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "Missing required parameter: code",
                );
            }
        };

        // Availability gate: once confirmed, never re-probed. While the
        // engine looks unavailable, every call re-probes so a late MATLAB
        // install is eventually picked up.
        if !self.engine_ready.load(Ordering::Acquire) {
            if self.engine.is_available().await {
                info!(binary = %self.engine.binary(), "MATLAB availability confirmed");
                self.engine_ready.store(true, Ordering::Release);
            } else {
                // Not a protocol error: the agent should see this as tool
                // output it can react to.
                let text = format!(
                    "MATLAB is not available (binary: {}). \
                     Set MATLAB_PATH to a working MATLAB executable and try again.",
                    self.engine.binary()
                );
                return serialize_result(id, ToolCallResult::text(text, true));
            }
        }

        let request = ExecutionRequest {
            code,
            save_script: bool_arg(arguments, "saveScript"),
            script_path: string_arg(arguments, "scriptPath").map(PathBuf::from),
        };
        let result = self.engine.execute(request).await;

        let is_error = result.error.is_some();
        let mut text = String::new();
        if !result.output.is_empty() {
            text.push_str("Output:\n");
            text.push_str(&result.output);
        }
        if let Some(error) = &result.error {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str("Error:\n");
            text.push_str(error);
        }
        if text.is_empty() {
            text.push_str("Execution completed with no output.");
        }
        if let Some(path) = &result.script_path {
            text.push_str(&format!("\n\nScript saved to: {}", path.display()));
        }

        serialize_result(id, ToolCallResult::text(text, is_error))
    }

    async fn call_generate(&self, id: Value, arguments: &Value) -> JsonRpcResponse {
        let description = match required_string(arguments, "description") {
            Some(description) => description,
            None => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "Missing required parameter: description",
                );
            }
        };

        let code = self.engine.generate_placeholder_code(&description);

        let mut text = code.clone();
        if bool_arg(arguments, "saveScript") {
            let dest = string_arg(arguments, "scriptPath")
                .unwrap_or_else(crate::engine::default_saved_script_name);
            if let Err(e) = tokio::fs::write(&dest, &code).await {
                // Unexpected I/O failure, not an engine outcome: internal
                // error with the original message as diagnostic data.
                return JsonRpcResponse::error_with_data(
                    id,
                    INTERNAL_ERROR,
                    format!("Failed to save generated script to {dest}"),
                    json!(e.to_string()),
                );
            }
            text.push_str(&format!("\n\nScript saved to: {dest}"));
        }

        serialize_result(id, ToolCallResult::text(text, false))
    }
}

// The fixed tool set. Immutable for the process lifetime.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: TOOL_EXECUTE.to_string(),
            description: "Execute MATLAB code in batch mode and return the captured output"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "MATLAB code to execute"
                    },
                    "saveScript": {
                        "type": "boolean",
                        "description": "Save the executed script to disk"
                    },
                    "scriptPath": {
                        "type": "string",
                        "description": "Where to save the script (defaults to a timestamped name)"
                    }
                },
                "required": ["code"]
            }),
        },
        Tool {
            name: TOOL_GENERATE.to_string(),
            description: "Generate a MATLAB script template from a natural-language description"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": "string",
                        "description": "What the generated script should do"
                    },
                    "saveScript": {
                        "type": "boolean",
                        "description": "Save the generated script to disk"
                    },
                    "scriptPath": {
                        "type": "string",
                        "description": "Where to save the script (defaults to a timestamped name)"
                    }
                },
                "required": ["description"]
            }),
        },
    ]
}

fn serialize_result<T: serde::Serialize>(id: Value, result: T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error_with_data(
            id,
            INTERNAL_ERROR,
            "Internal serialization error",
            json!(e.to_string()),
        ),
    }
}

fn required_string(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn bool_arg(arguments: &Value, key: &str) -> bool {
    arguments.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
