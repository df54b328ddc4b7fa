//! Audit trail for credential store operations
//!
//! Every access to credentials - success or failure - and every admin
//! mutation is recorded as one JSON line with a timestamp, the company
//! key/name involved, and the outcome. Entries never contain secret
//! values, so the log is stored in clear for inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Audit log file name
const AUDIT_FILE: &str = "audit.log";

/// Maximum audit entries before rotation
const MAX_ENTRIES: usize = 10000;

/// Outcome of a credential access attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessOutcome {
    Success,
    NotFound,
    Invalid,
    Expired,
    LockedOut,
}

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum AuditEvent {
    /// A new store was created on disk
    StoreCreated {
        /// Backend description (path, not contents)
        location: String,
    },

    /// Credentials were requested for a company
    CredentialAccess {
        company_key: String,
        company_name: Option<String>,
        outcome: AccessOutcome,
    },

    /// An expired token window was extended automatically
    TokenRefreshed {
        company_key: String,
        expires_at: DateTime<Utc>,
    },

    /// A company was registered
    CompanyAdded {
        company_key: String,
        name: String,
        provider: String,
    },

    /// A company's record was modified
    CompanyUpdated {
        company_key: String,
    },

    /// A company was deactivated (soft delete)
    CompanyDeactivated {
        company_key: String,
    },

    /// The default company pointer changed
    DefaultCompanyChanged {
        company_key: String,
    },
}

/// Single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Append-only JSON-lines audit log
pub struct AuditLog {
    base_dir: PathBuf,
}

impl AuditLog {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    fn audit_file_path(&self) -> PathBuf {
        self.base_dir.join(AUDIT_FILE)
    }

    /// Record an event. Also emits a tracing line so operators see the
    /// trail without opening the file.
    pub async fn record(&self, event: AuditEvent) -> VaultResult<()> {
        let entry = AuditEntry::new(event);

        tracing::info!(
            audit = %serde_json::to_string(&entry.event).unwrap_or_default(),
            "audit"
        );

        self.append_entry(&entry).await
    }

    async fn append_entry(&self, entry: &AuditEntry) -> VaultResult<()> {
        let audit_path = self.audit_file_path();

        if let Some(parent) = audit_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .await?;

        let line = serde_json::to_string(entry)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Read entries, newest last, honouring optional limit/since filters
    pub async fn read_entries(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> VaultResult<Vec<AuditEntry>> {
        let audit_path = self.audit_file_path();

        if !audit_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&audit_path).await?;
        let mut entries = Vec::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let entry: AuditEntry = serde_json::from_str(line)
                .map_err(|e| VaultError::AuditError(format!("corrupt audit line: {e}")))?;

            if let Some(since_time) = since {
                if entry.timestamp < since_time {
                    continue;
                }
            }

            entries.push(entry);
        }

        if let Some(max) = limit {
            let skip = entries.len().saturating_sub(max);
            entries.drain(..skip);
        }

        Ok(entries)
    }

    /// All recorded events for one company
    pub async fn company_history(&self, company_key: &str) -> VaultResult<Vec<AuditEntry>> {
        let all_entries = self.read_entries(None, None).await?;

        Ok(all_entries
            .into_iter()
            .filter(|e| match &e.event {
                AuditEvent::CredentialAccess { company_key: k, .. }
                | AuditEvent::TokenRefreshed { company_key: k, .. }
                | AuditEvent::CompanyAdded { company_key: k, .. }
                | AuditEvent::CompanyUpdated { company_key: k }
                | AuditEvent::CompanyDeactivated { company_key: k }
                | AuditEvent::DefaultCompanyChanged { company_key: k } => k == company_key,
                AuditEvent::StoreCreated { .. } => false,
            })
            .collect())
    }

    pub async fn count_entries(&self) -> VaultResult<usize> {
        let audit_path = self.audit_file_path();

        if !audit_path.exists() {
            return Ok(0);
        }

        let content = fs::read_to_string(&audit_path).await?;
        Ok(content.lines().filter(|l| !l.trim().is_empty()).count())
    }

    /// Move the log aside once it exceeds the entry cap
    pub async fn rotate_if_needed(&self) -> VaultResult<bool> {
        let count = self.count_entries().await?;

        if count > MAX_ENTRIES {
            let audit_path = self.audit_file_path();
            let archive_path = self
                .base_dir
                .join(format!("audit-{}.log", Utc::now().format("%Y%m%d-%H%M%S")));

            fs::rename(&audit_path, &archive_path).await?;
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_log() -> (AuditLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = AuditLog::new(temp_dir.path());
        (log, temp_dir)
    }

    fn access(company_key: &str, outcome: AccessOutcome) -> AuditEvent {
        AuditEvent::CredentialAccess {
            company_key: company_key.to_string(),
            company_name: Some("Acme".to_string()),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_record_and_read() {
        let (log, _temp) = setup_log();

        log.record(access("acme", AccessOutcome::Success)).await.unwrap();

        let entries = log.read_entries(None, None).await.unwrap();
        assert_eq!(entries.len(), 1);

        match &entries[0].event {
            AuditEvent::CredentialAccess {
                company_key,
                outcome,
                ..
            } => {
                assert_eq!(company_key, "acme");
                assert_eq!(*outcome, AccessOutcome::Success);
            }
            _ => panic!("wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_failures_are_recorded_too() {
        let (log, _temp) = setup_log();

        log.record(access("ghost", AccessOutcome::NotFound)).await.unwrap();
        log.record(access("acme", AccessOutcome::Expired)).await.unwrap();

        let entries = log.read_entries(None, None).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_read_with_limit_keeps_newest() {
        let (log, _temp) = setup_log();

        for i in 0..5 {
            log.record(access(&format!("c{i}"), AccessOutcome::Success))
                .await
                .unwrap();
        }

        let entries = log.read_entries(Some(2), None).await.unwrap();
        assert_eq!(entries.len(), 2);

        match &entries[1].event {
            AuditEvent::CredentialAccess { company_key, .. } => assert_eq!(company_key, "c4"),
            _ => panic!("wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_company_history() {
        let (log, _temp) = setup_log();

        log.record(access("acme", AccessOutcome::Success)).await.unwrap();
        log.record(access("other", AccessOutcome::Success)).await.unwrap();
        log.record(AuditEvent::CompanyDeactivated {
            company_key: "acme".to_string(),
        })
        .await
        .unwrap();

        let history = log.company_history("acme").await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_count() {
        let (log, _temp) = setup_log();

        assert_eq!(log.count_entries().await.unwrap(), 0);
        log.record(access("acme", AccessOutcome::Success)).await.unwrap();
        log.record(access("acme", AccessOutcome::Invalid)).await.unwrap();
        assert_eq!(log.count_entries().await.unwrap(), 2);
    }
}
