//! ERP adapters: one strategy trait, one implementation per provider
//!
//! Each adapter owns its tool table and knows how to turn a tool call plus
//! decrypted credentials into the provider's wire format. The Omie API is
//! RPC-style (a single POST envelope carrying `call`/`app_key`/`app_secret`),
//! Nibo is plain REST with an `ApiToken` header and OData-ish list
//! parameters.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

use bridge_core::{Credentials, McpError, McpResult, Provider, VaultError};

use crate::registry::ToolDefinition;

/// Outbound request timeout; there is no retry layer on top
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Nibo caps page sizes at 500
const NIBO_MAX_TOP: u64 = 500;

/// Strategy object the bridge server is parameterized with
#[async_trait]
pub trait ErpAdapter: Send + Sync {
    /// Short adapter name ("omie", "nibo"), used in serverInfo and logs
    fn name(&self) -> &'static str;

    /// Provider whose credentials this adapter expects
    fn provider(&self) -> Provider;

    /// Tool table exposed through `tools/list`
    fn tools(&self) -> Vec<ToolDefinition>;

    fn has_tool(&self, tool: &str) -> bool;

    /// Execute one tool call against the ERP API
    async fn call(
        &self,
        tool: &str,
        args: &Map<String, Value>,
        creds: &Credentials,
    ) -> McpResult<Value>;
}

/// Build the adapter for a provider name
pub fn adapter_for(name: &str) -> McpResult<Box<dyn ErpAdapter>> {
    match name {
        "omie" => Ok(Box::new(OmieAdapter::new()?)),
        "nibo" => Ok(Box::new(NiboAdapter::new()?)),
        other => Err(McpError::InvalidArguments(format!(
            "unknown ERP adapter: {other}"
        ))),
    }
}

fn http_client() -> McpResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!("erpbridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| McpError::Transport(e.to_string()))
}

fn request_error(e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Upstream("request timed out".to_string())
    } else {
        McpError::Upstream(e.to_string())
    }
}

fn missing_credential_field(creds: &Credentials, field: &str) -> McpError {
    McpError::Credential(VaultError::InvalidCredentials(
        creds.company_key.clone(),
        format!("missing secret field: {field}"),
    ))
}

/// The standard optional argument carried by every bridge tool
fn company_key_schema() -> Value {
    json!({
        "type": "string",
        "description": "Company key in the credential store; omit to use the default company"
    })
}

// ---------------------------------------------------------------------------
// Omie
// ---------------------------------------------------------------------------

struct OmieTool {
    name: &'static str,
    description: &'static str,
    endpoint: &'static str,
    call: &'static str,
}

/// The dozen CRUD calls every Omie integration ends up needing
const OMIE_TOOLS: &[OmieTool] = &[
    OmieTool {
        name: "consultar_categorias",
        description: "Lista categorias cadastradas (paginado via param.pagina / param.registros_por_pagina)",
        endpoint: "geral/categorias/",
        call: "ListarCategorias",
    },
    OmieTool {
        name: "consultar_departamentos",
        description: "Lista departamentos cadastrados",
        endpoint: "geral/departamentos/",
        call: "ListarDepartamentos",
    },
    OmieTool {
        name: "consultar_tipos_documento",
        description: "Pesquisa tipos de documento",
        endpoint: "geral/tpdoc/",
        call: "PesquisarTipoDocumento",
    },
    OmieTool {
        name: "consultar_contas_pagar",
        description: "Lista contas a pagar",
        endpoint: "financas/contapagar/",
        call: "ListarContasPagar",
    },
    OmieTool {
        name: "consultar_contas_receber",
        description: "Lista contas a receber",
        endpoint: "financas/contareceber/",
        call: "ListarContasReceber",
    },
    OmieTool {
        name: "consultar_clientes",
        description: "Lista clientes cadastrados",
        endpoint: "geral/clientes/",
        call: "ListarClientes",
    },
    OmieTool {
        name: "consultar_fornecedores",
        description: "Lista fornecedores cadastrados",
        endpoint: "geral/fornecedores/",
        call: "ListarFornecedores",
    },
    OmieTool {
        name: "incluir_cliente",
        description: "Cadastra um novo cliente (param segue o layout IncluirCliente)",
        endpoint: "geral/clientes/",
        call: "IncluirCliente",
    },
    OmieTool {
        name: "incluir_fornecedor",
        description: "Cadastra um novo fornecedor",
        endpoint: "geral/fornecedores/",
        call: "IncluirFornecedor",
    },
    OmieTool {
        name: "incluir_conta_pagar",
        description: "Inclui uma conta a pagar",
        endpoint: "financas/contapagar/",
        call: "IncluirContaPagar",
    },
    OmieTool {
        name: "incluir_conta_receber",
        description: "Inclui uma conta a receber",
        endpoint: "financas/contareceber/",
        call: "IncluirContaReceber",
    },
    OmieTool {
        name: "alterar_cliente",
        description: "Altera um cliente existente",
        endpoint: "geral/clientes/",
        call: "AlterarCliente",
    },
    OmieTool {
        name: "alterar_fornecedor",
        description: "Altera um fornecedor existente",
        endpoint: "geral/fornecedores/",
        call: "AlterarFornecedor",
    },
];

pub struct OmieAdapter {
    client: reqwest::Client,
}

impl OmieAdapter {
    pub fn new() -> McpResult<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    /// The Omie envelope: a one-element array with call name, app
    /// credentials, and the parameter object wrapped in a list
    fn build_payload(call: &str, app_key: &str, app_secret: &str, param: &Value) -> Value {
        json!([{
            "call": call,
            "app_key": app_key,
            "app_secret": app_secret,
            "param": [param]
        }])
    }
}

#[async_trait]
impl ErpAdapter for OmieAdapter {
    fn name(&self) -> &'static str {
        "omie"
    }

    fn provider(&self) -> Provider {
        Provider::Omie
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        OMIE_TOOLS
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.to_string(),
                description: t.description.to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "company_key": company_key_schema(),
                        "param": {
                            "type": "object",
                            "description": format!("Parameter object passed to the Omie call {}", t.call)
                        }
                    },
                    "required": []
                }),
            })
            .collect()
    }

    fn has_tool(&self, tool: &str) -> bool {
        OMIE_TOOLS.iter().any(|t| t.name == tool)
    }

    async fn call(
        &self,
        tool: &str,
        args: &Map<String, Value>,
        creds: &Credentials,
    ) -> McpResult<Value> {
        let spec = OMIE_TOOLS
            .iter()
            .find(|t| t.name == tool)
            .ok_or_else(|| McpError::ToolNotFound(tool.to_string()))?;

        let param = match args.get("param") {
            None => json!({}),
            Some(v) if v.is_object() => v.clone(),
            Some(_) => {
                return Err(McpError::InvalidArguments(
                    "'param' must be an object".to_string(),
                ))
            }
        };

        let app_key = creds
            .field("app_key")
            .ok_or_else(|| missing_credential_field(creds, "app_key"))?;
        let app_secret = creds
            .field("app_secret")
            .ok_or_else(|| missing_credential_field(creds, "app_secret"))?;

        let url = format!(
            "{}/{}",
            creds.base_url.trim_end_matches('/'),
            spec.endpoint
        );
        let payload = Self::build_payload(spec.call, app_key, app_secret, &param);

        tracing::debug!(%url, call = spec.call, "omie request");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Upstream(format!("HTTP {status}: {body}")));
        }

        let value: Value = response.json().await.map_err(request_error)?;

        // The API answers with the same one-element envelope
        match value.as_array().and_then(|a| a.first()) {
            Some(first) => Ok(first.clone()),
            None => Ok(value),
        }
    }
}

// ---------------------------------------------------------------------------
// Nibo
// ---------------------------------------------------------------------------

enum NiboRequest {
    /// GET with OData-style list parameters
    List,
    /// POST with a JSON body taken from the `data` argument
    Create,
}

struct NiboTool {
    name: &'static str,
    description: &'static str,
    resource: &'static str,
    request: NiboRequest,
}

const NIBO_TOOLS: &[NiboTool] = &[
    NiboTool {
        name: "consultar_clientes",
        description: "Lista clientes (skip/top/orderby/filter)",
        resource: "clients",
        request: NiboRequest::List,
    },
    NiboTool {
        name: "consultar_fornecedores",
        description: "Lista fornecedores",
        resource: "suppliers",
        request: NiboRequest::List,
    },
    NiboTool {
        name: "consultar_contas_pagar",
        description: "Lista agendamentos de pagamento",
        resource: "schedules/debit",
        request: NiboRequest::List,
    },
    NiboTool {
        name: "consultar_contas_receber",
        description: "Lista agendamentos de recebimento",
        resource: "schedules/credit",
        request: NiboRequest::List,
    },
    NiboTool {
        name: "consultar_categorias",
        description: "Lista categorias",
        resource: "categories",
        request: NiboRequest::List,
    },
    NiboTool {
        name: "consultar_centros_custo",
        description: "Lista centros de custo",
        resource: "costcenters",
        request: NiboRequest::List,
    },
    NiboTool {
        name: "incluir_cliente",
        description: "Cadastra um cliente (body em 'data')",
        resource: "clients",
        request: NiboRequest::Create,
    },
    NiboTool {
        name: "incluir_fornecedor",
        description: "Cadastra um fornecedor",
        resource: "suppliers",
        request: NiboRequest::Create,
    },
    NiboTool {
        name: "incluir_conta_pagar",
        description: "Inclui um agendamento de pagamento",
        resource: "schedules/debit",
        request: NiboRequest::Create,
    },
    NiboTool {
        name: "incluir_conta_receber",
        description: "Inclui um agendamento de recebimento",
        resource: "schedules/credit",
        request: NiboRequest::Create,
    },
];

pub struct NiboAdapter {
    client: reqwest::Client,
}

impl NiboAdapter {
    pub fn new() -> McpResult<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    /// Nibo namespaces every resource under /empresas/v1/
    fn build_url(base_url: &str, resource: &str) -> String {
        format!(
            "{}/empresas/v1/{}",
            base_url.trim_end_matches('/'),
            resource.trim_start_matches('/')
        )
    }

    /// OData-ish list parameters. The API requires $orderby whenever $skip
    /// is used and caps $top at 500.
    fn list_params(args: &Map<String, Value>) -> Vec<(String, String)> {
        let mut params = Vec::new();

        let top = args
            .get("top")
            .and_then(Value::as_u64)
            .unwrap_or(50)
            .min(NIBO_MAX_TOP);
        params.push(("$top".to_string(), top.to_string()));

        let skip = args.get("skip").and_then(Value::as_u64).unwrap_or(0);
        let orderby = args.get("orderby").and_then(Value::as_str);
        if skip > 0 {
            params.push(("$skip".to_string(), skip.to_string()));
            params.push(("$orderby".to_string(), orderby.unwrap_or("name").to_string()));
        } else if let Some(orderby) = orderby {
            params.push(("$orderby".to_string(), orderby.to_string()));
        }

        if let Some(filter) = args.get("filter").and_then(Value::as_str) {
            params.push(("$filter".to_string(), filter.to_string()));
        }

        params
    }
}

#[async_trait]
impl ErpAdapter for NiboAdapter {
    fn name(&self) -> &'static str {
        "nibo"
    }

    fn provider(&self) -> Provider {
        Provider::Nibo
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        NIBO_TOOLS
            .iter()
            .map(|t| {
                let input_schema = match t.request {
                    NiboRequest::List => json!({
                        "type": "object",
                        "properties": {
                            "company_key": company_key_schema(),
                            "skip": { "type": "integer", "description": "Records to skip" },
                            "top": { "type": "integer", "description": "Page size, max 500" },
                            "orderby": { "type": "string", "description": "Sort field" },
                            "filter": { "type": "string", "description": "OData filter expression" }
                        },
                        "required": []
                    }),
                    NiboRequest::Create => json!({
                        "type": "object",
                        "properties": {
                            "company_key": company_key_schema(),
                            "data": { "type": "object", "description": "Resource payload" }
                        },
                        "required": ["data"]
                    }),
                };
                ToolDefinition {
                    name: t.name.to_string(),
                    description: t.description.to_string(),
                    input_schema,
                }
            })
            .collect()
    }

    fn has_tool(&self, tool: &str) -> bool {
        NIBO_TOOLS.iter().any(|t| t.name == tool)
    }

    async fn call(
        &self,
        tool: &str,
        args: &Map<String, Value>,
        creds: &Credentials,
    ) -> McpResult<Value> {
        let spec = NIBO_TOOLS
            .iter()
            .find(|t| t.name == tool)
            .ok_or_else(|| McpError::ToolNotFound(tool.to_string()))?;

        let api_token = creds
            .field("api_token")
            .ok_or_else(|| missing_credential_field(creds, "api_token"))?;

        let url = Self::build_url(&creds.base_url, spec.resource);
        tracing::debug!(%url, tool, "nibo request");

        let request = match spec.request {
            NiboRequest::List => {
                let mut params = Self::list_params(args);
                // The token also travels as a query parameter, as the API docs ask
                params.push(("apitoken".to_string(), api_token.to_string()));
                self.client.get(&url).query(&params)
            }
            NiboRequest::Create => {
                let data = args
                    .get("data")
                    .filter(|v| v.is_object())
                    .ok_or_else(|| {
                        McpError::InvalidArguments("'data' must be an object".to_string())
                    })?;
                self.client
                    .post(&url)
                    .query(&[("apitoken", api_token)])
                    .json(data)
            }
        };

        let response = request
            .header("ApiToken", api_token)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Upstream(format!("HTTP {status}: {body}")));
        }

        response.json().await.map_err(request_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::SecretFields;

    fn omie_creds(base_url: &str) -> Credentials {
        let mut fields = SecretFields::new();
        fields.insert("app_key", "K1");
        fields.insert("app_secret", "S1");
        Credentials {
            company_key: "acme".to_string(),
            name: "Acme".to_string(),
            provider: Provider::Omie,
            base_url: base_url.to_string(),
            security_level: "standard".to_string(),
            token_expires_at: None,
            fields,
        }
    }

    fn nibo_creds(base_url: &str) -> Credentials {
        let mut fields = SecretFields::new();
        fields.insert("api_token", "tok-123");
        fields.insert("company_id", "42");
        Credentials {
            company_key: "acme".to_string(),
            name: "Acme".to_string(),
            provider: Provider::Nibo,
            base_url: base_url.to_string(),
            security_level: "standard".to_string(),
            token_expires_at: None,
            fields,
        }
    }

    #[test]
    fn test_omie_payload_shape() {
        let payload = OmieAdapter::build_payload("ListarClientes", "K1", "S1", &json!({"pagina": 1}));

        let envelope = payload.as_array().unwrap();
        assert_eq!(envelope.len(), 1);
        assert_eq!(envelope[0]["call"], "ListarClientes");
        assert_eq!(envelope[0]["app_key"], "K1");
        assert_eq!(envelope[0]["param"][0]["pagina"], 1);
    }

    #[test]
    fn test_nibo_url_and_params() {
        let url = NiboAdapter::build_url("https://api.nibo.com.br", "schedules/debit");
        assert_eq!(url, "https://api.nibo.com.br/empresas/v1/schedules/debit");

        let mut args = Map::new();
        args.insert("skip".to_string(), json!(10));
        args.insert("top".to_string(), json!(9999));
        let params = NiboAdapter::list_params(&args);

        // $top capped, $orderby forced alongside $skip
        assert!(params.contains(&("$top".to_string(), "500".to_string())));
        assert!(params.contains(&("$skip".to_string(), "10".to_string())));
        assert!(params.contains(&("$orderby".to_string(), "name".to_string())));
    }

    #[test]
    fn test_tool_tables() {
        let omie = OmieAdapter::new().unwrap();
        assert!(omie.has_tool("consultar_clientes"));
        assert!(omie.has_tool("incluir_conta_receber"));
        assert!(!omie.has_tool("consultar_centros_custo"));
        assert_eq!(omie.tools().len(), OMIE_TOOLS.len());

        let nibo = NiboAdapter::new().unwrap();
        assert!(nibo.has_tool("consultar_centros_custo"));
        assert!(!nibo.has_tool("alterar_cliente"));
    }

    #[test]
    fn test_adapter_for() {
        assert!(adapter_for("omie").is_ok());
        assert!(adapter_for("nibo").is_ok());
        assert!(adapter_for("sap").is_err());
    }

    #[tokio::test]
    async fn test_omie_call_happy_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/geral/clientes/")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"clientes_cadastro": [], "total_de_registros": 0}]"#)
            .create_async()
            .await;

        let adapter = OmieAdapter::new().unwrap();
        let creds = omie_creds(&server.url());
        let result = adapter
            .call("consultar_clientes", &Map::new(), &creds)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result["total_de_registros"], 0);
    }

    #[tokio::test]
    async fn test_omie_upstream_error_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/geral/clientes/")
            .with_status(500)
            .with_body("SOAP-ERROR")
            .create_async()
            .await;

        let adapter = OmieAdapter::new().unwrap();
        let creds = omie_creds(&server.url());
        let err = adapter
            .call("consultar_clientes", &Map::new(), &creds)
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_nibo_call_sends_token_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/empresas/v1/clients")
            .match_header("ApiToken", "tok-123")
            .match_query(mockito::Matcher::UrlEncoded("$top".into(), "50".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items": []}"#)
            .create_async()
            .await;

        let adapter = NiboAdapter::new().unwrap();
        let creds = nibo_creds(&server.url());
        let result = adapter
            .call("consultar_clientes", &Map::new(), &creds)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(result["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nibo_create_requires_data() {
        let adapter = NiboAdapter::new().unwrap();
        let creds = nibo_creds("https://api.nibo.com.br");

        let err = adapter
            .call("incluir_cliente", &Map::new(), &creds)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments(_)));
    }
}
