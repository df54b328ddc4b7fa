//! Bridge Core - encrypted multi-tenant credential storage
//!
//! This crate provides:
//! - AES-256-GCM encryption of per-company API secrets at rest
//! - PBKDF2-HMAC-SHA256 key derivation from a master passphrase
//! - Multi-tenant credential selection with a default-company pointer
//! - Token-expiry tracking with policy-driven auto-renewal
//! - Lockout after repeated failed accesses
//! - A JSON-lines audit trail of every access and mutation

pub mod audit;
pub mod crypto;
pub mod error;
pub mod models;
pub mod repository;
pub mod vault;

pub use audit::*;
pub use crypto::*;
pub use error::*;
pub use models::*;
pub use repository::*;
pub use vault::*;
