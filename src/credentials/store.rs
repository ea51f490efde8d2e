//! Credential store: identity, host-keyed credentials and repository settings
//!
//! Lookup failures of any kind (missing entry, corrupt blob, wrong key) are
//! reported as `None` so callers cannot tell absent from corrupt.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::cipher::CredentialCipher;
use super::host::host_from_url;
use super::types::{Credentials, Identity, PushDefault, RepositorySettings, clamp_fetch_interval};
use super::vault::KeyVault;
use crate::config::PreferenceStore;
use crate::error::Result;

const KEY_USER_NAME: &str = "git.user.name";
const KEY_USER_EMAIL: &str = "git.user.email";
const KEY_DEFAULT_CREDENTIALS: &str = "credentials.default";
const KEY_HOST_CREDENTIALS_PREFIX: &str = "credentials.host.";
const KEY_AUTO_FETCH: &str = "settings.auto_fetch";
const KEY_FETCH_INTERVAL: &str = "settings.fetch_interval_minutes";
const KEY_PUSH_DEFAULT: &str = "settings.push_default";
const KEY_PULL_REBASE: &str = "settings.pull_rebase";

/// Encrypted credential and settings persistence
pub struct CredentialStore {
    preferences: PreferenceStore,
    vault: Arc<dyn KeyVault>,
}

impl CredentialStore {
    pub fn new(preferences: PreferenceStore, vault: Arc<dyn KeyVault>) -> Self {
        Self { preferences, vault }
    }

    // Identity

    pub fn set_identity(&self, name: &str, email: &str) -> Result<()> {
        self.preferences.set_string(KEY_USER_NAME, name.trim())?;
        self.preferences.set_string(KEY_USER_EMAIL, email.trim())?;
        Ok(())
    }

    /// Stored identity, blank fields when unset
    pub fn identity(&self) -> Identity {
        Identity {
            name: self.preferences.get_string(KEY_USER_NAME).unwrap_or_default(),
            email: self.preferences.get_string(KEY_USER_EMAIL).unwrap_or_default(),
        }
    }

    // Credentials

    #[instrument(skip_all)]
    pub fn save_default_credentials(&self, credentials: &Credentials) -> Result<()> {
        let sealed = self.cipher()?.seal(credentials)?;
        self.preferences.set_string(KEY_DEFAULT_CREDENTIALS, sealed)?;
        debug!("Saved default credentials");
        Ok(())
    }

    #[instrument(skip(self, credentials))]
    pub fn save_host_credentials(&self, host: &str, credentials: &Credentials) -> Result<()> {
        let sealed = self.cipher()?.seal(credentials)?;
        self.preferences.set_string(&host_key(host), sealed)?;
        debug!("Saved credentials for host");
        Ok(())
    }

    pub fn remove_default_credentials(&self) -> Result<()> {
        self.preferences.remove(KEY_DEFAULT_CREDENTIALS)
    }

    pub fn remove_host_credentials(&self, host: &str) -> Result<()> {
        self.preferences.remove(&host_key(host))
    }

    /// Default credentials, if any
    pub fn default_credentials(&self) -> Option<Credentials> {
        self.unseal_key(KEY_DEFAULT_CREDENTIALS)
    }

    /// Host-specific credentials, falling back to the defaults
    pub fn credentials_for_host(&self, host: &str) -> Option<Credentials> {
        self.unseal_key(&host_key(host))
            .or_else(|| self.default_credentials())
    }

    /// Credentials for the host of a remote URL
    ///
    /// URLs whose host cannot be determined get the default credentials.
    pub fn credentials_for_url(&self, url: &str) -> Option<Credentials> {
        match host_from_url(url) {
            Some(host) => self.credentials_for_host(&host),
            None => {
                debug!("No host in remote URL, using default credentials");
                self.default_credentials()
            }
        }
    }

    /// Bearer token for a hosted service API at `url`
    pub fn bearer_token_for(&self, url: &str) -> Option<String> {
        self.credentials_for_url(url)
            .map(|c| c.password().to_string())
            .filter(|token| !token.is_empty())
    }

    // Settings

    pub fn set_auto_fetch(&self, enabled: bool) -> Result<()> {
        self.preferences.set_bool(KEY_AUTO_FETCH, enabled)
    }

    /// Store the fetch interval, clamped to 5..=60 minutes. Returns the stored value.
    pub fn set_fetch_interval_minutes(&self, minutes: i64) -> Result<i64> {
        let clamped = clamp_fetch_interval(minutes);
        self.preferences.set_i64(KEY_FETCH_INTERVAL, clamped)?;
        Ok(clamped)
    }

    pub fn set_push_default(&self, mode: PushDefault) -> Result<()> {
        self.preferences.set_string(KEY_PUSH_DEFAULT, mode.as_str())
    }

    pub fn set_pull_rebase(&self, rebase: bool) -> Result<()> {
        self.preferences.set_bool(KEY_PULL_REBASE, rebase)
    }

    pub fn repository_settings(&self) -> RepositorySettings {
        let defaults = RepositorySettings::default();
        RepositorySettings {
            auto_fetch: self
                .preferences
                .get_bool(KEY_AUTO_FETCH)
                .unwrap_or(defaults.auto_fetch),
            fetch_interval_minutes: self
                .preferences
                .get_i64(KEY_FETCH_INTERVAL)
                .map(clamp_fetch_interval)
                .unwrap_or(defaults.fetch_interval_minutes),
            push_default: self
                .preferences
                .get_string(KEY_PUSH_DEFAULT)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.push_default),
            pull_rebase: self
                .preferences
                .get_bool(KEY_PULL_REBASE)
                .unwrap_or(defaults.pull_rebase),
        }
    }

    fn cipher(&self) -> Result<CredentialCipher> {
        let key = self.vault.load_or_create()?;
        Ok(CredentialCipher::new(&key))
    }

    fn unseal_key(&self, key: &str) -> Option<Credentials> {
        let sealed = self.preferences.get_string(key)?;
        let cipher = match self.cipher() {
            Ok(cipher) => cipher,
            Err(e) => {
                warn!("Credential key unavailable: {}", e);
                return None;
            }
        };
        match cipher.unseal(&sealed) {
            Ok(credentials) => Some(credentials),
            Err(_) => {
                warn!("Stored credentials could not be decrypted; ignoring them");
                None
            }
        }
    }
}

/// Preference key for a host: a hash so the file does not list hostnames
fn host_key(host: &str) -> String {
    let normalized = host.trim().to_lowercase();
    format!(
        "{}{:016x}",
        KEY_HOST_CREDENTIALS_PREFIX,
        xxh3_64(normalized.as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::vault::{EphemeralKeyVault, FileKeyVault};
    use tempfile::TempDir;

    fn store() -> CredentialStore {
        CredentialStore::new(PreferenceStore::in_memory(), Arc::new(EphemeralKeyVault::new()))
    }

    #[test]
    fn test_fallback_order() {
        let store = store();
        assert_eq!(store.credentials_for_host("github.com"), None);

        let host = Credentials::new("gh-user", "gh-token");
        let default = Credentials::new("default-user", "default-token");
        store.save_host_credentials("github.com", &host).unwrap();
        store.save_default_credentials(&default).unwrap();

        assert_eq!(store.credentials_for_host("github.com"), Some(host.clone()));
        assert_eq!(store.credentials_for_host("GitHub.com"), Some(host));
        assert_eq!(store.credentials_for_host("gitlab.com"), Some(default));
    }

    #[test]
    fn test_url_lookup() {
        let store = store();
        let host = Credentials::new("gh-user", "gh-token");
        let default = Credentials::new("default-user", "default-token");
        store.save_host_credentials("github.com", &host).unwrap();
        store.save_default_credentials(&default).unwrap();

        assert_eq!(
            store.credentials_for_url("git@github.com:owner/repo.git"),
            Some(host.clone())
        );
        assert_eq!(
            store.credentials_for_url("https://github.com/owner/repo.git"),
            Some(host)
        );
        assert_eq!(store.credentials_for_url("%%% garbage"), Some(default));
    }

    #[test]
    fn test_remove_credentials() {
        let store = store();
        store
            .save_host_credentials("github.com", &Credentials::new("u", "p"))
            .unwrap();
        store.remove_host_credentials("github.com").unwrap();
        assert_eq!(store.credentials_for_host("github.com"), None);

        store.save_default_credentials(&Credentials::new("u", "p")).unwrap();
        store.remove_default_credentials().unwrap();
        assert_eq!(store.default_credentials(), None);
    }

    #[test]
    fn test_corrupt_blob_reads_as_absent() {
        let store = store();
        store
            .preferences
            .set_string(KEY_DEFAULT_CREDENTIALS, "AAAAAAAAAAAAAAAAAAAAAAAAAAAA")
            .unwrap();
        assert_eq!(store.default_credentials(), None);
    }

    #[test]
    fn test_wrong_key_reads_as_absent() {
        let temp = TempDir::new().unwrap();
        let prefs = temp.path().join("preferences.json");

        let first = CredentialStore::new(
            PreferenceStore::load_from(&prefs).unwrap(),
            Arc::new(FileKeyVault::new(temp.path().join("a.key"))),
        );
        first
            .save_default_credentials(&Credentials::new("u", "p"))
            .unwrap();

        let second = CredentialStore::new(
            PreferenceStore::load_from(&prefs).unwrap(),
            Arc::new(FileKeyVault::new(temp.path().join("b.key"))),
        );
        assert_eq!(second.default_credentials(), None);
    }

    #[test]
    fn test_persisted_across_instances() {
        let temp = TempDir::new().unwrap();
        let prefs = temp.path().join("preferences.json");
        let key = temp.path().join("credential.key");
        let creds = Credentials::new("u", "p");

        CredentialStore::new(
            PreferenceStore::load_from(&prefs).unwrap(),
            Arc::new(FileKeyVault::new(&key)),
        )
        .save_host_credentials("gitlab.com", &creds)
        .unwrap();

        let reopened = CredentialStore::new(
            PreferenceStore::load_from(&prefs).unwrap(),
            Arc::new(FileKeyVault::new(&key)),
        );
        assert_eq!(reopened.credentials_for_host("gitlab.com"), Some(creds));

        let raw = std::fs::read_to_string(&prefs).unwrap();
        assert!(!raw.contains("gitlab.com"));
    }

    #[test]
    fn test_identity() {
        let store = store();
        assert_eq!(store.identity(), Identity::default());

        store.set_identity(" Ada ", "ada@example.com").unwrap();
        let identity = store.identity();
        assert_eq!(identity.name, "Ada");
        assert_eq!(identity.email, "ada@example.com");
    }

    #[test]
    fn test_fetch_interval_clamp_persists() {
        let store = store();
        for (input, expected) in [(-5, 5), (5, 5), (40, 40), (60, 60), (9999, 60)] {
            assert_eq!(store.set_fetch_interval_minutes(input).unwrap(), expected);
            assert_eq!(store.repository_settings().fetch_interval_minutes, expected);
        }
    }

    #[test]
    fn test_settings_defaults_and_updates() {
        let store = store();
        assert_eq!(store.repository_settings(), RepositorySettings::default());

        store.set_auto_fetch(true).unwrap();
        store.set_push_default(PushDefault::Simple).unwrap();
        store.set_pull_rebase(true).unwrap();

        let settings = store.repository_settings();
        assert!(settings.auto_fetch);
        assert_eq!(settings.push_default, PushDefault::Simple);
        assert!(settings.pull_rebase);
    }

    #[test]
    fn test_bearer_token() {
        let store = store();
        assert_eq!(store.bearer_token_for("https://api.github.com"), None);
        store
            .save_host_credentials("api.github.com", &Credentials::new("x", "tok"))
            .unwrap();
        assert_eq!(
            store.bearer_token_for("https://api.github.com/repos").as_deref(),
            Some("tok")
        );
    }
}
