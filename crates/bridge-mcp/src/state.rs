//! Shared state for the bridge server
//!
//! Owns the credential vault (behind a lock, since accesses mutate failure
//! counters and may re-persist) and the selected ERP adapter.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use bridge_core::{
    AuditLog, CompanySummary, CredentialVault, Credentials, JsonFileRepository, McpResult,
};

use crate::adapter::ErpAdapter;

/// Vault plus adapter, shared across request handling
pub struct BridgeState {
    vault: RwLock<CredentialVault>,
    adapter: Arc<dyn ErpAdapter>,
}

impl BridgeState {
    pub async fn new(
        base_dir: PathBuf,
        adapter: Arc<dyn ErpAdapter>,
        passphrase: &str,
    ) -> McpResult<Self> {
        let repo = Box::new(JsonFileRepository::new(&base_dir));
        let audit = AuditLog::new(&base_dir);
        let vault = CredentialVault::open(repo, audit, passphrase).await?;

        Ok(Self {
            vault: RwLock::new(vault),
            adapter,
        })
    }

    /// Resolve credentials through the vault (audited there)
    pub async fn credentials(&self, company_key: Option<&str>) -> McpResult<Credentials> {
        let mut vault = self.vault.write().await;
        Ok(vault.get_credentials(company_key).await?)
    }

    pub async fn list_companies(&self) -> Vec<CompanySummary> {
        self.vault.read().await.list_companies()
    }

    pub async fn default_company(&self) -> Option<String> {
        self.vault.read().await.default_company().map(String::from)
    }

    pub fn adapter(&self) -> &dyn ErpAdapter {
        self.adapter.as_ref()
    }

    /// Lock the vault for administrative mutations
    pub fn vault(&self) -> &RwLock<CredentialVault> {
        &self.vault
    }
}

/// Thread-safe state handle
pub type SharedBridgeState = Arc<BridgeState>;

/// Open the vault at `base_dir` and wire it to the named adapter
pub async fn create_shared_state(
    base_dir: PathBuf,
    adapter: Arc<dyn ErpAdapter>,
    passphrase: &str,
) -> McpResult<SharedBridgeState> {
    let state = BridgeState::new(base_dir, adapter, passphrase).await?;
    Ok(Arc::new(state))
}
