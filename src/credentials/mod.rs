//! Credential management
//!
//! - `CredentialStore` - identity, sealed host-keyed credentials, repository settings
//! - `CredentialCipher` - AES-256-GCM sealing of credential blobs
//! - `KeyVault` - where the sealing key lives
//! - `host_from_url` - remote URL to host resolution

mod cipher;
mod host;
mod store;
mod types;
mod vault;

pub use cipher::*;
pub use host::*;
pub use store::*;
pub use types::*;
pub use vault::*;
