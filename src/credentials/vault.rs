//! Storage for the credential encryption key
//!
//! The key is created once on first use and reused afterwards. Implementations
//! cache it so concurrent readers never race on creation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{debug, info};

use super::cipher::{CredentialCipher, KeyBytes};
use crate::error::CredentialError;

/// Source of the process-wide credential key
pub trait KeyVault: Send + Sync {
    /// Return the key, creating and persisting it if it does not exist yet
    fn load_or_create(&self) -> Result<KeyBytes, CredentialError>;
}

/// Key kept in a private file (mode 0600 on unix)
pub struct FileKeyVault {
    path: PathBuf,
    cached: Mutex<Option<KeyBytes>>,
}

impl FileKeyVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_key(&self) -> Result<Option<KeyBytes>, CredentialError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| CredentialError::KeyUnavailable(e.to_string()))?;
        let bytes = STANDARD
            .decode(content.trim())
            .map_err(|_| CredentialError::KeyUnavailable("key file is corrupt".to_string()))?;
        let key: KeyBytes = bytes
            .try_into()
            .map_err(|_| CredentialError::KeyUnavailable("key has the wrong length".to_string()))?;
        Ok(Some(key))
    }

    fn write_key(&self, key: &KeyBytes) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CredentialError::KeyUnavailable(e.to_string()))?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&self.path)
            .map_err(|e| CredentialError::KeyUnavailable(e.to_string()))?;
        file.write_all(STANDARD.encode(key).as_bytes())
            .map_err(|e| CredentialError::KeyUnavailable(e.to_string()))?;
        Ok(())
    }
}

impl KeyVault for FileKeyVault {
    fn load_or_create(&self) -> Result<KeyBytes, CredentialError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| CredentialError::KeyUnavailable("key cache poisoned".to_string()))?;
        if let Some(key) = *cached {
            return Ok(key);
        }

        let key = match self.read_key()? {
            Some(key) => {
                debug!("Loaded credential key from {:?}", self.path);
                key
            }
            None => {
                let key = CredentialCipher::generate_key();
                self.write_key(&key)?;
                info!("Created credential key at {:?}", self.path);
                key
            }
        };

        *cached = Some(key);
        Ok(key)
    }
}

/// Key that lives only as long as the process
pub struct EphemeralKeyVault {
    key: KeyBytes,
}

impl EphemeralKeyVault {
    pub fn new() -> Self {
        Self {
            key: CredentialCipher::generate_key(),
        }
    }
}

impl Default for EphemeralKeyVault {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyVault for EphemeralKeyVault {
    fn load_or_create(&self) -> Result<KeyBytes, CredentialError> {
        Ok(self.key)
    }
}
