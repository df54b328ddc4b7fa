//! Tool registry for the bridge server
//!
//! Holds the JSON-Schema definitions advertised through `tools/list`:
//! the selected adapter's ERP tools plus the built-in company-management
//! tools every bridge exposes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::adapter::ErpAdapter;

/// Name of the built-in tool listing vault companies
pub const TOOL_LIST_COMPANIES: &str = "listar_empresas";

/// Tool definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Input schema (JSON Schema)
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool registry
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    /// Deterministic listing order
    order: Vec<String>,
}

impl ToolRegistry {
    /// Registry for one adapter: built-in tools first, ERP tools after
    pub fn for_adapter(adapter: &dyn ErpAdapter) -> Self {
        let mut registry = Self::default();
        registry.register_builtin_tools();
        for tool in adapter.tools() {
            registry.register(tool);
        }
        registry
    }

    fn register_builtin_tools(&mut self) {
        self.register(ToolDefinition {
            name: TOOL_LIST_COMPANIES.to_string(),
            description:
                "Lista as empresas cadastradas no cofre de credenciais (metadados, nunca segredos)"
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        });
    }

    /// Register a tool, replacing any previous definition with the same name
    pub fn register(&mut self, tool: ToolDefinition) {
        if !self.tools.contains_key(&tool.name) {
            self.order.push(tool.name.clone());
        }
        self.tools.insert(tool.name.clone(), tool);
    }

    /// All tool definitions in registration order
    pub fn get_all(&self) -> Vec<&ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapter_for;

    #[test]
    fn test_registry_for_omie() {
        let adapter = adapter_for("omie").unwrap();
        let registry = ToolRegistry::for_adapter(adapter.as_ref());

        assert!(registry.exists(TOOL_LIST_COMPANIES));
        assert!(registry.exists("consultar_clientes"));
        assert!(registry.exists("alterar_fornecedor"));
        assert!(!registry.exists("consultar_centros_custo"));
    }

    #[test]
    fn test_registry_for_nibo() {
        let adapter = adapter_for("nibo").unwrap();
        let registry = ToolRegistry::for_adapter(adapter.as_ref());

        assert!(registry.exists(TOOL_LIST_COMPANIES));
        assert!(registry.exists("consultar_centros_custo"));
        assert!(!registry.exists("alterar_fornecedor"));
    }

    #[test]
    fn test_listing_is_ordered_and_complete() {
        let adapter = adapter_for("omie").unwrap();
        let registry = ToolRegistry::for_adapter(adapter.as_ref());

        let tools = registry.get_all();
        assert_eq!(tools[0].name, TOOL_LIST_COMPANIES);
        assert_eq!(tools.len(), registry.tool_names().len());

        for tool in tools {
            assert!(!tool.description.is_empty());
            assert!(tool.input_schema.is_object());
        }
    }
}
