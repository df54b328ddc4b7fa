//! Data models for company credentials and the persisted store

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

/// ERP provider a company's credentials belong to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Omie,
    Nibo,
    Generic,
}

impl Provider {
    /// Detect the provider from the secret fields a company was registered with
    pub fn detect(fields: &SecretFields) -> Self {
        if fields.contains("app_key") && fields.contains("app_secret") {
            Provider::Omie
        } else if fields.contains("api_token") {
            Provider::Nibo
        } else {
            Provider::Generic
        }
    }

    /// Secret fields that must be present and non-empty for credentials to be usable
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Provider::Omie => &["app_key", "app_secret"],
            Provider::Nibo => &["api_token", "company_id"],
            Provider::Generic => &["api_key"],
        }
    }

    /// Base URL used when a company doesn't override it
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Omie => "https://app.omie.com.br/api/v1/",
            Provider::Nibo => "https://api.nibo.com.br",
            Provider::Generic => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Omie => "omie",
            Provider::Nibo => "nibo",
            Provider::Generic => "generic",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret key/value material for one company (app keys, API tokens).
///
/// Values are wiped from memory when the struct is dropped. The persisted
/// form is always the encrypted blob produced by [`crate::crypto::MasterKey`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretFields(BTreeMap<String, String>);

impl std::fmt::Debug for SecretFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "***")))
            .finish()
    }
}

impl SecretFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Missing or empty fields out of `required`
    pub fn missing_fields(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|f| self.get(f).map(str::trim).unwrap_or("").is_empty())
            .map(|f| f.to_string())
            .collect()
    }
}

impl Drop for SecretFields {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

impl FromIterator<(String, String)> for SecretFields {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One company's record as held in the store.
///
/// Metadata is clear for inspection; the secret fields live only in the
/// `credentials_encrypted` blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub name: String,
    pub provider: Provider,
    pub base_url: String,
    pub active: bool,
    #[serde(default = "default_security_level")]
    pub security_level: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_timeout")]
    pub token_timeout_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// AES-GCM nonce, base64
    pub nonce: String,
    /// Encrypted secret fields, base64
    pub credentials_encrypted: String,
}

fn default_security_level() -> String {
    "standard".to_string()
}

fn default_token_timeout() -> i64 {
    60
}

impl CompanyRecord {
    /// Check if the access token is past its expiry. No expiry set means valid.
    pub fn is_token_expired(&self) -> bool {
        self.token_expires_at
            .map(|exp| Utc::now() > exp)
            .unwrap_or(false)
    }

    /// Push the expiry out by the company's timeout window
    pub fn refresh_token_expiration(&mut self) {
        let now = Utc::now();
        self.token_expires_at = Some(now + Duration::minutes(self.token_timeout_minutes));
        self.updated_at = now;
    }

    /// Whether an encrypted blob is present at all
    pub fn has_credentials(&self) -> bool {
        !self.credentials_encrypted.is_empty()
    }
}

/// Input for registering a new company
#[derive(Debug, Clone, Default)]
pub struct NewCompany {
    /// Explicit company key; generated from the name when omitted
    pub key: Option<String>,
    pub name: String,
    pub secrets: SecretFields,
    pub base_url: Option<String>,
    pub security_level: Option<String>,
    pub token_timeout_minutes: Option<i64>,
}

/// Partial update for an existing company. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CompanyUpdate {
    pub name: Option<String>,
    pub secrets: Option<SecretFields>,
    pub base_url: Option<String>,
    pub active: Option<bool>,
    pub security_level: Option<String>,
    pub token_timeout_minutes: Option<i64>,
}

/// Decrypted credentials returned by a successful vault access.
///
/// Holds the only plaintext copy of the secret fields; dropped (and wiped)
/// as soon as the caller is done with the request.
#[derive(Debug)]
pub struct Credentials {
    pub company_key: String,
    pub name: String,
    pub provider: Provider,
    pub base_url: String,
    pub security_level: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub fields: SecretFields,
}

impl Credentials {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }
}

/// Clear-metadata view of a company for listings. Never carries secret values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanySummary {
    pub key: String,
    pub name: String,
    pub provider: Provider,
    pub active: bool,
    pub security_level: String,
    pub token_expired: bool,
    pub has_credentials: bool,
}

/// Global security policy, persisted in clear in the store file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityPolicy {
    pub auto_refresh_tokens: bool,
    pub log_access_attempts: bool,
    pub max_failed_attempts: u32,
    pub lockout_duration_minutes: u64,
    pub require_company_selection: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            auto_refresh_tokens: true,
            log_access_attempts: true,
            max_failed_attempts: 3,
            lockout_duration_minutes: 15,
            require_company_selection: false,
        }
    }
}

/// Key-derivation parameters stored alongside the companies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    /// Random per-store salt, base64
    pub salt: String,
}

/// The persisted store document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    pub kdf: KdfParams,
    pub companies: BTreeMap<String, CompanyRecord>,
    pub default_company: Option<String>,
    #[serde(default)]
    pub security: SecurityPolicy,
}

impl StoreFile {
    pub const CURRENT_VERSION: u32 = 2;

    /// Empty store with fresh KDF parameters
    pub fn empty(kdf: KdfParams) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            kdf,
            companies: BTreeMap::new(),
            default_company: None,
            security: SecurityPolicy::default(),
        }
    }

    pub fn company(&self, key: &str) -> Option<&CompanyRecord> {
        self.companies.get(key)
    }

    pub fn company_mut(&mut self, key: &str) -> Option<&mut CompanyRecord> {
        self.companies.get_mut(key)
    }

    pub fn company_exists(&self, key: &str) -> bool {
        self.companies.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn omie_fields() -> SecretFields {
        let mut fields = SecretFields::new();
        fields.insert("app_key", "K1");
        fields.insert("app_secret", "S1");
        fields
    }

    #[test]
    fn test_provider_detection() {
        assert_eq!(Provider::detect(&omie_fields()), Provider::Omie);

        let mut nibo = SecretFields::new();
        nibo.insert("api_token", "tok");
        nibo.insert("company_id", "42");
        assert_eq!(Provider::detect(&nibo), Provider::Nibo);

        let mut generic = SecretFields::new();
        generic.insert("api_key", "k");
        assert_eq!(Provider::detect(&generic), Provider::Generic);
    }

    #[test]
    fn test_missing_fields() {
        let mut fields = omie_fields();
        assert!(fields.missing_fields(&["app_key", "app_secret"]).is_empty());

        fields.insert("app_secret", "  ");
        assert_eq!(
            fields.missing_fields(&["app_key", "app_secret"]),
            vec!["app_secret".to_string()]
        );
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let mut record = CompanyRecord {
            name: "Acme".to_string(),
            provider: Provider::Omie,
            base_url: Provider::Omie.default_base_url().to_string(),
            active: true,
            security_level: "standard".to_string(),
            token_expires_at: Some(now - Duration::minutes(5)),
            token_timeout_minutes: 60,
            created_at: now,
            updated_at: now,
            nonce: String::new(),
            credentials_encrypted: String::new(),
        };
        assert!(record.is_token_expired());

        record.refresh_token_expiration();
        assert!(!record.is_token_expired());

        record.token_expires_at = None;
        assert!(!record.is_token_expired());
    }

    #[test]
    fn test_secret_fields_roundtrip_serde() {
        let fields = omie_fields();
        let json = serde_json::to_string(&fields).unwrap();
        let back: SecretFields = serde_json::from_str(&json).unwrap();
        assert_eq!(fields, back);
    }

    #[test]
    fn test_store_file_defaults() {
        // Older files may omit the security block entirely
        let json = r#"{
            "version": 2,
            "kdf": {"algorithm": "pbkdf2-hmac-sha256", "iterations": 100000, "salt": "AAAA"},
            "companies": {},
            "default_company": null
        }"#;
        let store: StoreFile = serde_json::from_str(json).unwrap();
        assert!(store.security.auto_refresh_tokens);
        assert_eq!(store.security.max_failed_attempts, 3);
    }
}
