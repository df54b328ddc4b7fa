//! MCP server: JSON-RPC 2.0 over stdio
//!
//! Implements the protocol surface MCP clients expect (`initialize`,
//! `tools/list`, `tools/call`, `ping`). Protocol-level problems become
//! JSON-RPC errors; tool execution failures are returned as tool content
//! with `isError` set, which is what clients render to the model.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use bridge_core::{McpError, VaultError};

use crate::handlers::{ToolCallArgs, ToolHandler};
use crate::registry::ToolRegistry;
use crate::state::SharedBridgeState;

/// MCP protocol revision we implement
const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and expect no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// Error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const COMPANY_NOT_FOUND: i32 = -32000;
    pub const CREDENTIALS_INVALID: i32 = -32001;
    pub const TOKEN_EXPIRED: i32 = -32002;
    pub const LOCKED_OUT: i32 = -32003;
    pub const UPSTREAM_ERROR: i32 = -32010;
}

/// Map a bridge error onto the wire code used in tool error payloads
fn error_code(err: &McpError) -> i32 {
    match err {
        McpError::ToolNotFound(_) => error_codes::METHOD_NOT_FOUND,
        McpError::InvalidArguments(_) => error_codes::INVALID_PARAMS,
        McpError::Credential(VaultError::CompanyNotFound(_))
        | McpError::Credential(VaultError::NoDefaultCompany) => error_codes::COMPANY_NOT_FOUND,
        McpError::Credential(VaultError::TokenExpired(_)) => error_codes::TOKEN_EXPIRED,
        McpError::Credential(VaultError::LockedOut(_, _)) => error_codes::LOCKED_OUT,
        McpError::Credential(_) => error_codes::CREDENTIALS_INVALID,
        McpError::Upstream(_) => error_codes::UPSTREAM_ERROR,
        McpError::Transport(_) => error_codes::INTERNAL_ERROR,
    }
}

/// MCP bridge server
pub struct McpServer {
    registry: ToolRegistry,
    handler: ToolHandler,
    server_name: String,
}

impl McpServer {
    pub fn new(state: SharedBridgeState) -> Self {
        let registry = ToolRegistry::for_adapter(state.adapter());
        let server_name = format!("{}-bridge", state.adapter().name());

        Self {
            registry,
            handler: ToolHandler::new(state),
            server_name,
        }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("handling request: {}", request.method);

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            _ => JsonRpcResponse::error(
                request.id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!(server = %self.server_name, "MCP server initializing");

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": self.server_name,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools: Vec<Value> = self
            .registry
            .get_all()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema
                })
            })
            .collect();

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(p) => p,
            None => {
                return JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, "Missing params");
            }
        };

        let tool_name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => {
                return JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, "Missing tool name");
            }
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let args = match ToolCallArgs::from_value(arguments) {
            Ok(a) => a,
            Err(e) => {
                return JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, e.to_string());
            }
        };

        match self.handler.handle(&tool_name, args).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result.content).unwrap_or_default();
                JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": false
                    }),
                )
            }
            Err(e) => {
                // Tool failures travel as content so the client shows them
                // to the model instead of dropping the turn
                let code = error_code(&e);
                JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": format!("[{code}] {e}") }],
                        "isError": true
                    }),
                )
            }
        }
    }

    /// Serve requests line-by-line on stdio. Logging must go to stderr;
    /// stdout belongs to the protocol.
    pub async fn run_stdio(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!(server = %self.server_name, "starting MCP server on stdio");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            debug!("received: {}", line);

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    let response = JsonRpcResponse::error(
                        None,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {e}"),
                    );
                    write_response(&mut stdout, &response).await?;
                    continue;
                }
            };

            if request.is_notification() {
                debug!("notification: {}", request.method);
                continue;
            }

            let response = self.handle_request(request).await;
            write_response(&mut stdout, &response).await?;
        }

        Ok(())
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> Result<(), Box<dyn std::error::Error>> {
    let response_str = serde_json::to_string(response)?;
    debug!("sending: {}", response_str);
    stdout.write_all(response_str.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

/// Run the MCP server until stdin closes
pub async fn run_server(state: SharedBridgeState) -> Result<(), Box<dyn std::error::Error>> {
    let server = McpServer::new(state);
    server.run_stdio().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{adapter_for, ErpAdapter};
    use crate::state::create_shared_state;
    use bridge_core::{NewCompany, SecretFields};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_server(dir: &TempDir) -> McpServer {
        let adapter: Arc<dyn ErpAdapter> = Arc::from(adapter_for("omie").unwrap());
        let state = create_shared_state(dir.path().to_path_buf(), adapter, "test-passphrase")
            .await
            .unwrap();

        {
            let mut secrets = SecretFields::new();
            secrets.insert("app_key", "K1");
            secrets.insert("app_secret", "S1");
            let mut vault = state.vault().write().await;
            vault
                .add_company(NewCompany {
                    key: Some("acme".to_string()),
                    name: "Acme Ltda".to_string(),
                    secrets,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        McpServer::new(state)
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(json!(1)),
        }
    }

    #[test]
    fn test_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.method, "tools/list");
        assert!(!request.is_notification());

        let json = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert!(request.is_notification());
    }

    #[test]
    fn test_response_shapes() {
        let ok = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));
        assert!(ok.result.is_some());
        assert!(ok.error.is_none());

        let err = JsonRpcResponse::error(Some(json!(1)), -32600, "Invalid request");
        assert!(err.result.is_none());
        assert_eq!(err.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_initialize() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server.handle_request(request("initialize", None)).await;
        let result = response.result.unwrap();

        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "omie-bridge");
    }

    #[tokio::test]
    async fn test_tools_list_includes_adapter_and_builtin() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server.handle_request(request("tools/list", None)).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();

        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        assert!(names.contains(&"listar_empresas"));
        assert!(names.contains(&"consultar_clientes"));
        assert!(names.contains(&"incluir_conta_pagar"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server.handle_request(request("resources/list", None)).await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_companies_tool() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({"name": "listar_empresas", "arguments": {}})),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);

        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("acme"));
        assert!(text.contains("Acme Ltda"));
        // Secrets never reach tool output
        assert!(!text.contains("K1"));
        assert!(!text.contains("S1"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_error() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({"name": "consultar_estoque", "arguments": {}})),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_company_is_tool_error() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({
                    "name": "consultar_clientes",
                    "arguments": {"company_key": "ghost"}
                })),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains(&error_codes::COMPANY_NOT_FOUND.to_string()));
    }

    #[tokio::test]
    async fn test_missing_tool_name_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir).await;

        let response = server
            .handle_request(request("tools/call", Some(json!({"arguments": {}}))))
            .await;

        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }
}
