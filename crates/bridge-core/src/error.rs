//! Error types for credential store operations

use thiserror::Error;

/// Errors that can occur while operating on the credential store
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("company not found: {0}")]
    CompanyNotFound(String),

    #[error("no company specified and no default company configured")]
    NoDefaultCompany,

    #[error("company already exists: {0}")]
    DuplicateCompany(String),

    #[error("invalid credentials for company '{0}': {1}")]
    InvalidCredentials(String, String),

    #[error("token expired for company '{0}' - manual renewal required")]
    TokenExpired(String),

    #[error("too many failed attempts for company '{0}' - locked out for {1} seconds")]
    LockedOut(String, u64),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("key derivation error: {0}")]
    KeyDerivationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("audit log error: {0}")]
    AuditError(String),
}

/// Errors during MCP bridge operations
#[derive(Error, Debug)]
pub enum McpError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Credential(#[from] VaultError),

    #[error("upstream API error: {0}")]
    Upstream(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type VaultResult<T> = Result<T, VaultError>;
pub type McpResult<T> = Result<T, McpError>;
