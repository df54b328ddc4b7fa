//! Tool dispatch: resolve credentials, forward to the ERP adapter
//!
//! Every ERP tool accepts an optional `company_key` argument; when absent
//! the vault falls back to the default company. Credential failures
//! propagate with the vault's error text so the client sees why the call
//! was refused.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use bridge_core::{McpError, McpResult};

use crate::registry::TOOL_LIST_COMPANIES;
use crate::state::SharedBridgeState;

/// Tool call arguments as received from `tools/call`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallArgs {
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl ToolCallArgs {
    pub fn from_value(value: Value) -> McpResult<Self> {
        match value {
            Value::Object(args) => Ok(Self { args }),
            Value::Null => Ok(Self::default()),
            _ => Err(McpError::InvalidArguments(
                "arguments must be an object".to_string(),
            )),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.args.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn require_string(&self, key: &str) -> McpResult<String> {
        self.get_string(key)
            .ok_or_else(|| McpError::InvalidArguments(format!("missing required argument: {key}")))
    }
}

/// Tool execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Company that served the request, when one was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_key: Option<String>,
}

impl ToolResult {
    pub fn success(content: Value) -> Self {
        Self {
            success: true,
            content,
            error: None,
            company_key: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Value::Null,
            error: Some(message.into()),
            company_key: None,
        }
    }

    pub fn with_company(mut self, company_key: impl Into<String>) -> Self {
        self.company_key = Some(company_key.into());
        self
    }
}

/// Handles tool calls against the shared state
pub struct ToolHandler {
    state: SharedBridgeState,
}

impl ToolHandler {
    pub fn new(state: SharedBridgeState) -> Self {
        Self { state }
    }

    pub async fn handle(&self, tool_name: &str, args: ToolCallArgs) -> McpResult<ToolResult> {
        if tool_name == TOOL_LIST_COMPANIES {
            return self.handle_list_companies().await;
        }

        if !self.state.adapter().has_tool(tool_name) {
            return Err(McpError::ToolNotFound(tool_name.to_string()));
        }

        let company_key = args.get_string("company_key");

        // Decrypted for this call only; the vault audits the access
        let creds = self.state.credentials(company_key.as_deref()).await?;

        let result = self
            .state
            .adapter()
            .call(tool_name, &args.args, &creds)
            .await?;

        tracing::debug!(tool = tool_name, company = %creds.company_key, "tool call served");

        Ok(ToolResult::success(result).with_company(creds.company_key.clone()))
    }

    /// Built-in tool: vault companies, clear metadata only
    async fn handle_list_companies(&self) -> McpResult<ToolResult> {
        let companies = self.state.list_companies().await;
        let default_company = self.state.default_company().await;

        let listing: Vec<Value> = companies
            .iter()
            .map(|c| {
                json!({
                    "key": c.key,
                    "name": c.name,
                    "provider": c.provider.to_string(),
                    "active": c.active,
                    "security_level": c.security_level,
                    "token_expired": c.token_expired,
                    "has_credentials": c.has_credentials,
                })
            })
            .collect();

        Ok(ToolResult::success(json!({
            "companies": listing,
            "count": listing.len(),
            "default_company": default_company,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_from_value() {
        let args = ToolCallArgs::from_value(json!({"company_key": "acme", "top": 10})).unwrap();
        assert_eq!(args.get_string("company_key"), Some("acme".to_string()));
        assert_eq!(args.get_string("top"), None); // not a string
        assert_eq!(args.get_string("missing"), None);

        assert!(ToolCallArgs::from_value(json!(null)).is_ok());
        assert!(ToolCallArgs::from_value(json!("nope")).is_err());
    }

    #[test]
    fn test_require_string() {
        let args = ToolCallArgs::from_value(json!({"present": "value"})).unwrap();
        assert!(args.require_string("present").is_ok());
        assert!(args.require_string("missing").is_err());
    }

    #[test]
    fn test_tool_result_shapes() {
        let ok = ToolResult::success(json!({"data": 1})).with_company("acme");
        assert!(ok.success);
        assert_eq!(ok.company_key, Some("acme".to_string()));

        let err = ToolResult::error("boom");
        assert!(!err.success);
        assert_eq!(err.error, Some("boom".to_string()));
    }
}
