//! The credential vault: encrypt, persist, retrieve, audit
//!
//! An explicit store object owned by the caller - no global state. Every
//! mutation is followed by a full re-persist through the repository, and
//! every credential access (success or failure) lands in the audit trail
//! before the result propagates.

use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::audit::{AccessOutcome, AuditEvent, AuditLog};
use crate::crypto::{EncryptedBlob, MasterKey};
use crate::error::{VaultError, VaultResult};
use crate::models::{
    CompanyRecord, CompanySummary, CompanyUpdate, Credentials, KdfParams, NewCompany, Provider,
    SecurityPolicy, StoreFile,
};
use crate::repository::CredentialRepository;

/// Placeholder key used in audit entries when no company could be resolved
const UNRESOLVED_KEY: &str = "(default)";

#[derive(Debug, Default)]
struct FailedAttempts {
    count: u32,
    locked_until: Option<Instant>,
}

/// Multi-tenant credential vault backed by a pluggable repository
pub struct CredentialVault {
    repo: Box<dyn CredentialRepository>,
    master: MasterKey,
    store: StoreFile,
    audit: AuditLog,
    attempts: HashMap<String, FailedAttempts>,
}

impl CredentialVault {
    /// Open an existing store, or create an empty one when the backend has
    /// none yet. The master key is derived from the store's own KDF
    /// parameters, so a fresh store gets a fresh random salt.
    pub async fn open(
        repo: Box<dyn CredentialRepository>,
        audit: AuditLog,
        passphrase: &str,
    ) -> VaultResult<Self> {
        let store = if repo.exists().await {
            repo.load().await?
        } else {
            let store = StoreFile::empty(KdfParams::generate());
            repo.save(&store).await?;
            tracing::info!(location = %repo.describe(), "created new credential store");
            if let Err(e) = audit
                .record(AuditEvent::StoreCreated {
                    location: repo.describe(),
                })
                .await
            {
                tracing::warn!("audit write failed: {e}");
            }
            store
        };

        let master = MasterKey::derive(passphrase.as_bytes(), &store.kdf)?;

        Ok(Self {
            repo,
            master,
            store,
            audit,
            attempts: HashMap::new(),
        })
    }

    /// Register a new company and persist immediately.
    ///
    /// Returns the company key: the explicit one when supplied (rejecting
    /// collisions), otherwise a slug generated from the display name.
    pub async fn add_company(&mut self, new: NewCompany) -> VaultResult<String> {
        let key = match new.key {
            Some(k) => {
                if self.store.company_exists(&k) {
                    return Err(VaultError::DuplicateCompany(k));
                }
                k
            }
            None => self.unique_key(&slugify(&new.name)),
        };

        let provider = Provider::detect(&new.secrets);
        let blob = self.master.encrypt_fields(&new.secrets)?;

        let now = Utc::now();
        let record = CompanyRecord {
            name: new.name,
            provider,
            base_url: new
                .base_url
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            active: true,
            security_level: new.security_level.unwrap_or_else(|| "standard".to_string()),
            token_expires_at: None,
            token_timeout_minutes: new.token_timeout_minutes.unwrap_or(60),
            created_at: now,
            updated_at: now,
            nonce: blob.nonce,
            credentials_encrypted: blob.ciphertext,
        };

        let name = record.name.clone();
        self.store.companies.insert(key.clone(), record);
        self.persist().await?;

        self.record_event(AuditEvent::CompanyAdded {
            company_key: key.clone(),
            name,
            provider: provider.to_string(),
        })
        .await;
        tracing::info!(company = %key, %provider, "company registered");

        Ok(key)
    }

    /// Resolve and decrypt credentials for a company.
    ///
    /// Falls back to the default company when no key is given. The secret
    /// fields are decrypted for this access only; the store keeps holding
    /// the encrypted blob.
    pub async fn get_credentials(&mut self, company_key: Option<&str>) -> VaultResult<Credentials> {
        let key = match company_key {
            Some(k) => k.to_string(),
            None => {
                if self.store.security.require_company_selection {
                    self.log_access(UNRESOLVED_KEY, None, AccessOutcome::Invalid)
                        .await;
                    return Err(VaultError::ConfigError(
                        "security policy requires an explicit company selection".to_string(),
                    ));
                }
                match &self.store.default_company {
                    Some(k) => k.clone(),
                    None => {
                        self.log_access(UNRESOLVED_KEY, None, AccessOutcome::NotFound)
                            .await;
                        return Err(VaultError::NoDefaultCompany);
                    }
                }
            }
        };

        let record = match self.store.company(&key) {
            Some(r) => r.clone(),
            None => {
                self.log_access(&key, None, AccessOutcome::NotFound).await;
                return Err(VaultError::CompanyNotFound(key));
            }
        };

        if let Some(remaining) = self.lockout_remaining(&key) {
            self.log_access(&key, Some(&record.name), AccessOutcome::LockedOut)
                .await;
            return Err(VaultError::LockedOut(key, remaining));
        }

        // Deactivated companies always fail, whatever the token state
        if !record.active {
            self.register_failure(&key);
            self.log_access(&key, Some(&record.name), AccessOutcome::Invalid)
                .await;
            return Err(VaultError::InvalidCredentials(
                key,
                "company is deactivated".to_string(),
            ));
        }

        if !record.has_credentials() {
            self.register_failure(&key);
            self.log_access(&key, Some(&record.name), AccessOutcome::Invalid)
                .await;
            return Err(VaultError::InvalidCredentials(
                key,
                "no secret fields stored".to_string(),
            ));
        }

        let blob = EncryptedBlob {
            nonce: record.nonce.clone(),
            ciphertext: record.credentials_encrypted.clone(),
        };
        let fields = match self.master.decrypt_fields(&blob) {
            Ok(f) => f,
            Err(e) => {
                self.register_failure(&key);
                self.log_access(&key, Some(&record.name), AccessOutcome::Invalid)
                    .await;
                return Err(e);
            }
        };

        let missing = fields.missing_fields(record.provider.required_fields());
        if !missing.is_empty() {
            self.register_failure(&key);
            self.log_access(&key, Some(&record.name), AccessOutcome::Invalid)
                .await;
            return Err(VaultError::InvalidCredentials(
                key,
                format!("missing secret fields: {}", missing.join(", ")),
            ));
        }

        let mut token_expires_at = record.token_expires_at;
        if record.is_token_expired() {
            if self.store.security.auto_refresh_tokens {
                // Policy default: extend the window and re-persist
                if let Some(stored) = self.store.company_mut(&key) {
                    stored.refresh_token_expiration();
                    token_expires_at = stored.token_expires_at;
                }
                self.persist().await?;
                if let Some(expires_at) = token_expires_at {
                    self.record_event(AuditEvent::TokenRefreshed {
                        company_key: key.clone(),
                        expires_at,
                    })
                    .await;
                }
                tracing::info!(company = %key, "expired token window renewed");
            } else {
                self.register_failure(&key);
                self.log_access(&key, Some(&record.name), AccessOutcome::Expired)
                    .await;
                return Err(VaultError::TokenExpired(key));
            }
        }

        self.clear_failures(&key);
        self.log_access(&key, Some(&record.name), AccessOutcome::Success)
            .await;

        Ok(Credentials {
            company_key: key,
            name: record.name,
            provider: record.provider,
            base_url: record.base_url,
            security_level: record.security_level,
            token_expires_at,
            fields,
        })
    }

    /// Apply a partial update to a company and persist
    pub async fn update_company(&mut self, key: &str, update: CompanyUpdate) -> VaultResult<()> {
        if !self.store.company_exists(key) {
            return Err(VaultError::CompanyNotFound(key.to_string()));
        }

        // Encrypt before taking the record borrow
        let reencrypted = match &update.secrets {
            Some(secrets) => Some((self.master.encrypt_fields(secrets)?, Provider::detect(secrets))),
            None => None,
        };

        if let Some(record) = self.store.company_mut(key) {
            if let Some(name) = update.name {
                record.name = name;
            }
            if let Some(base_url) = update.base_url {
                record.base_url = base_url;
            }
            if let Some(active) = update.active {
                record.active = active;
            }
            if let Some(level) = update.security_level {
                record.security_level = level;
            }
            if let Some(timeout) = update.token_timeout_minutes {
                record.token_timeout_minutes = timeout;
            }
            if let Some((blob, provider)) = reencrypted {
                record.nonce = blob.nonce;
                record.credentials_encrypted = blob.ciphertext;
                record.provider = provider;
            }
            record.updated_at = Utc::now();
        }

        self.persist().await?;
        self.record_event(AuditEvent::CompanyUpdated {
            company_key: key.to_string(),
        })
        .await;
        tracing::info!(company = %key, "company updated");

        Ok(())
    }

    /// Soft-delete: the record stays for audit continuity, access is refused
    pub async fn deactivate_company(&mut self, key: &str) -> VaultResult<()> {
        match self.store.company_mut(key) {
            Some(record) => {
                record.active = false;
                record.updated_at = Utc::now();
            }
            None => return Err(VaultError::CompanyNotFound(key.to_string())),
        }

        self.persist().await?;
        self.record_event(AuditEvent::CompanyDeactivated {
            company_key: key.to_string(),
        })
        .await;
        tracing::warn!(company = %key, "company deactivated");

        Ok(())
    }

    pub async fn set_default_company(&mut self, key: &str) -> VaultResult<()> {
        if !self.store.company_exists(key) {
            return Err(VaultError::CompanyNotFound(key.to_string()));
        }

        self.store.default_company = Some(key.to_string());
        self.persist().await?;
        self.record_event(AuditEvent::DefaultCompanyChanged {
            company_key: key.to_string(),
        })
        .await;
        tracing::info!(company = %key, "default company set");

        Ok(())
    }

    /// Clear-metadata summaries of every registered company
    pub fn list_companies(&self) -> Vec<CompanySummary> {
        self.store
            .companies
            .iter()
            .map(|(key, record)| CompanySummary {
                key: key.clone(),
                name: record.name.clone(),
                provider: record.provider,
                active: record.active,
                security_level: record.security_level.clone(),
                token_expired: record.is_token_expired(),
                has_credentials: record.has_credentials(),
            })
            .collect()
    }

    /// A single company's clear metadata
    pub fn company(&self, key: &str) -> VaultResult<&CompanyRecord> {
        self.store
            .company(key)
            .ok_or_else(|| VaultError::CompanyNotFound(key.to_string()))
    }

    pub fn default_company(&self) -> Option<&str> {
        self.store.default_company.as_deref()
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.store.security
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn store_location(&self) -> String {
        self.repo.describe()
    }

    async fn persist(&self) -> VaultResult<()> {
        self.repo.save(&self.store).await
    }

    /// Audit a credential access. Controlled by the `log_access_attempts`
    /// policy flag; write failures are reported but never block the access.
    async fn log_access(&self, key: &str, name: Option<&str>, outcome: AccessOutcome) {
        if !self.store.security.log_access_attempts {
            return;
        }
        self.record_event(AuditEvent::CredentialAccess {
            company_key: key.to_string(),
            company_name: name.map(str::to_string),
            outcome,
        })
        .await;
    }

    async fn record_event(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!("audit write failed: {e}");
        }
    }

    fn register_failure(&mut self, key: &str) {
        let policy = &self.store.security;
        let entry = self.attempts.entry(key.to_string()).or_default();
        entry.count += 1;
        if entry.count >= policy.max_failed_attempts {
            entry.count = 0;
            entry.locked_until =
                Some(Instant::now() + Duration::from_secs(policy.lockout_duration_minutes * 60));
            tracing::warn!(company = %key, "lockout engaged after repeated failures");
        }
    }

    fn clear_failures(&mut self, key: &str) {
        self.attempts.remove(key);
    }

    fn lockout_remaining(&self, key: &str) -> Option<u64> {
        let until = self.attempts.get(key)?.locked_until?;
        let now = Instant::now();
        if now < until {
            Some((until - now).as_secs().max(1))
        } else {
            None
        }
    }

    fn unique_key(&self, base: &str) -> String {
        if !self.store.company_exists(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.store.company_exists(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Company key generated from a display name: lowercase alphanumerics with
/// single dashes between words
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "company".to_string()
    } else {
        slug
    }
}
