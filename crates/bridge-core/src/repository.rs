//! Persistence backends for the credential store
//!
//! The store talks to a [`CredentialRepository`] so the JSON-on-disk
//! backend can be swapped for a real secret manager without touching the
//! vault logic. The file backend uses atomic writes (temp file + rename)
//! and keeps a backup of the previous version.
//!
//! Known limitation carried from the original system: there is no
//! cross-process locking, so concurrent writers can race on the file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{VaultError, VaultResult};
use crate::models::StoreFile;

/// Default store directory name under the home directory
const STORE_DIR: &str = ".erpbridge";

/// Store file name
const STORE_FILE: &str = "credentials.json";

/// Backup file name
const BACKUP_FILE: &str = "credentials.json.backup";

/// Environment variable overriding the store directory
pub const STORE_DIR_ENV: &str = "ERPBRIDGE_DIR";

/// Abstraction over where the encrypted store document lives
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Whether a store document already exists in this backend
    async fn exists(&self) -> bool;

    /// Load the store document
    async fn load(&self) -> VaultResult<StoreFile>;

    /// Persist the full store document
    async fn save(&self, store: &StoreFile) -> VaultResult<()>;

    /// Human-readable location, for logs and audit entries
    fn describe(&self) -> String;
}

/// Resolve the store directory: `ERPBRIDGE_DIR` if set, else `~/.erpbridge`
pub fn default_store_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(STORE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORE_DIR)
}

/// JSON-file backend
pub struct JsonFileRepository {
    base_dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.base_dir.join(STORE_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.base_dir.join(BACKUP_FILE)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the store directory with owner-only permissions
    async fn ensure_dir(&self) -> VaultResult<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).await?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o700);
                std::fs::set_permissions(&self.base_dir, perms)?;
            }
        }
        Ok(())
    }

    async fn write_store_file(&self, path: &Path, store: &StoreFile) -> VaultResult<()> {
        let data = serde_json::to_vec_pretty(store)?;

        let mut file = fs::File::create(path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for JsonFileRepository {
    async fn exists(&self) -> bool {
        self.store_path().exists()
    }

    async fn load(&self) -> VaultResult<StoreFile> {
        let store_path = self.store_path();

        if !store_path.exists() {
            return Err(VaultError::ConfigError(format!(
                "store file not found: {}",
                store_path.display()
            )));
        }

        let data = fs::read(&store_path).await?;
        let store: StoreFile = serde_json::from_slice(&data)?;

        if store.version > StoreFile::CURRENT_VERSION {
            return Err(VaultError::ConfigError(format!(
                "store version {} is newer than supported version {}",
                store.version,
                StoreFile::CURRENT_VERSION
            )));
        }

        Ok(store)
    }

    async fn save(&self, store: &StoreFile) -> VaultResult<()> {
        self.ensure_dir().await?;

        let store_path = self.store_path();
        let backup_path = self.backup_path();

        if store_path.exists() {
            if backup_path.exists() {
                fs::remove_file(&backup_path).await?;
            }
            fs::copy(&store_path, &backup_path).await?;
        }

        let temp_path = store_path.with_extension("json.tmp");
        self.write_store_file(&temp_path, store).await?;
        fs::rename(&temp_path, &store_path).await?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.store_path().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KdfParams;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path());

        assert!(!repo.exists().await);

        let store = StoreFile::empty(KdfParams::generate());
        repo.save(&store).await.unwrap();
        assert!(repo.exists().await);

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.version, StoreFile::CURRENT_VERSION);
        assert!(loaded.companies.is_empty());
        assert_eq!(loaded.kdf.salt, store.kdf.salt);
    }

    #[tokio::test]
    async fn test_backup_created_on_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path());

        let store = StoreFile::empty(KdfParams::generate());
        repo.save(&store).await.unwrap();
        assert!(!repo.backup_path().exists());

        let mut updated = store.clone();
        updated.default_company = Some("acme".to_string());
        repo.save(&updated).await.unwrap();

        assert!(repo.backup_path().exists());

        // The backup holds the previous version
        let backup_data = std::fs::read(repo.backup_path()).unwrap();
        let backup: StoreFile = serde_json::from_slice(&backup_data).unwrap();
        assert_eq!(backup.default_company, None);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path());

        assert!(repo.load().await.is_err());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path());

        let mut store = StoreFile::empty(KdfParams::generate());
        store.version = StoreFile::CURRENT_VERSION + 1;
        repo.save(&store).await.unwrap();

        assert!(repo.load().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("store").as_path());

        let store = StoreFile::empty(KdfParams::generate());
        repo.save(&store).await.unwrap();

        let mode = std::fs::metadata(repo.store_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
