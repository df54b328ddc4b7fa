//! Key derivation and secret-blob encryption
//!
//! - PBKDF2-HMAC-SHA256 stretches the master passphrase into the store key
//! - AES-256-GCM encrypts each company's secret fields as one JSON blob
//! - Derived key material is zeroized when no longer needed

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};
use crate::models::{KdfParams, SecretFields};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the per-store KDF salt in bytes
pub const SALT_SIZE: usize = 32;

/// PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// KDF identifier written into the store file
pub const KDF_ALGORITHM: &str = "pbkdf2-hmac-sha256";

/// Environment variable seeding the master passphrase
pub const MASTER_PASSWORD_ENV: &str = "ERPBRIDGE_MASTER_PASSWORD";

/// Development fallback when the environment variable is unset.
/// Unsafe for anything but local experiments.
const DEV_MASTER_PASSWORD: &str = "erpbridge-dev-master-2025";

/// Encrypted secret-field blob in its persisted (base64) form
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub nonce: String,
    pub ciphertext: String,
}

/// Symmetric store key derived from the master passphrase
pub struct MasterKey {
    key: Secret<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// Derive the store key from a passphrase and the store's KDF parameters
    pub fn derive(passphrase: &[u8], kdf: &KdfParams) -> VaultResult<Self> {
        if kdf.algorithm != KDF_ALGORITHM {
            return Err(VaultError::KeyDerivationError(format!(
                "unsupported KDF algorithm: {}",
                kdf.algorithm
            )));
        }

        let salt = decode_salt(&kdf.salt)?;

        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(passphrase, &salt, kdf.iterations, &mut key);

        let secret = Secret::new(key);
        key.zeroize();

        Ok(Self { key: secret })
    }

    /// Encrypt a company's secret fields into a persisted blob
    pub fn encrypt_fields(&self, fields: &SecretFields) -> VaultResult<EncryptedBlob> {
        let mut plaintext = serde_json::to_vec(fields)?;

        let cipher = Aes256Gcm::new_from_slice(self.key.expose_secret())
            .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

        plaintext.zeroize();

        Ok(EncryptedBlob {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    /// Decrypt a persisted blob back into the secret fields
    pub fn decrypt_fields(&self, blob: &EncryptedBlob) -> VaultResult<SecretFields> {
        let nonce_bytes = BASE64
            .decode(&blob.nonce)
            .map_err(|e| VaultError::DecryptionError(e.to_string()))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(VaultError::DecryptionError(format!(
                "invalid nonce length: {}",
                nonce_bytes.len()
            )));
        }

        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| VaultError::DecryptionError(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(self.key.expose_secret())
            .map_err(|e| VaultError::DecryptionError(e.to_string()))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut plaintext = cipher.decrypt(nonce, ciphertext.as_slice()).map_err(|_| {
            VaultError::DecryptionError(
                "decryption failed - wrong master passphrase or corrupted store".to_string(),
            )
        })?;

        let fields: SecretFields = serde_json::from_slice(&plaintext)?;
        plaintext.zeroize();

        Ok(fields)
    }
}

impl KdfParams {
    /// Fresh parameters with a random salt, for newly created stores
    pub fn generate() -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            iterations: PBKDF2_ITERATIONS,
            salt: BASE64.encode(generate_salt()),
        }
    }
}

/// Read the master passphrase from the environment, falling back to the
/// development default (with a warning).
pub fn master_passphrase_from_env() -> String {
    match std::env::var(MASTER_PASSWORD_ENV) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            tracing::warn!(
                "{} not set - using the insecure development passphrase",
                MASTER_PASSWORD_ENV
            );
            DEV_MASTER_PASSWORD.to_string()
        }
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

fn decode_salt(encoded: &str) -> VaultResult<Vec<u8>> {
    let salt = BASE64
        .decode(encoded)
        .map_err(|e| VaultError::KeyDerivationError(format!("invalid salt: {e}")))?;
    if salt.is_empty() {
        return Err(VaultError::KeyDerivationError("empty salt".to_string()));
    }
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> SecretFields {
        let mut fields = SecretFields::new();
        fields.insert("app_key", "K1");
        fields.insert("app_secret", "S1");
        fields.insert("extra", "value with spaces and ç");
        fields
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let kdf = KdfParams::generate();

        let key1 = MasterKey::derive(b"passphrase", &kdf).unwrap();
        let key2 = MasterKey::derive(b"passphrase", &kdf).unwrap();

        assert_eq!(key1.key.expose_secret(), key2.key.expose_secret());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let kdf = KdfParams::generate();
        let key = MasterKey::derive(b"passphrase", &kdf).unwrap();

        let fields = sample_fields();
        let blob = key.encrypt_fields(&fields).unwrap();
        let decrypted = key.decrypt_fields(&blob).unwrap();

        assert_eq!(fields, decrypted);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let kdf = KdfParams::generate();
        let key1 = MasterKey::derive(b"passphrase-one", &kdf).unwrap();
        let key2 = MasterKey::derive(b"passphrase-two", &kdf).unwrap();

        let blob = key1.encrypt_fields(&sample_fields()).unwrap();
        assert!(key2.decrypt_fields(&blob).is_err());
    }

    #[test]
    fn test_nonces_are_unique_per_encryption() {
        let kdf = KdfParams::generate();
        let key = MasterKey::derive(b"passphrase", &kdf).unwrap();

        let fields = sample_fields();
        let blob1 = key.encrypt_fields(&fields).unwrap();
        let blob2 = key.encrypt_fields(&fields).unwrap();

        assert_ne!(blob1.nonce, blob2.nonce);
        assert_ne!(blob1.ciphertext, blob2.ciphertext);
    }

    #[test]
    fn test_unsupported_kdf_rejected() {
        let mut kdf = KdfParams::generate();
        kdf.algorithm = "argon2id".to_string();
        assert!(MasterKey::derive(b"pw", &kdf).is_err());
    }

    #[test]
    fn test_salt_uniqueness() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let kdf = KdfParams::generate();
        let key = MasterKey::derive(b"passphrase", &kdf).unwrap();

        let mut blob = key.encrypt_fields(&sample_fields()).unwrap();
        blob.ciphertext = BASE64.encode(b"not the real ciphertext");
        assert!(key.decrypt_fields(&blob).is_err());
    }
}
