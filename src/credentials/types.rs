//! Credential, identity and repository settings types

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Lower bound of the auto-fetch interval, in minutes
pub const MIN_FETCH_INTERVAL_MINUTES: i64 = 5;

/// Upper bound of the auto-fetch interval, in minutes
pub const MAX_FETCH_INTERVAL_MINUTES: i64 = 60;

/// Default auto-fetch interval, in minutes
pub const DEFAULT_FETCH_INTERVAL_MINUTES: i64 = 15;

/// Username and password (or token) for a git host
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username && self.password() == other.password()
    }
}

impl Eq for Credentials {}

/// Commit author identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    /// Both name and email are set
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.email.trim().is_empty()
    }
}

/// `push.default` mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushDefault {
    #[default]
    Current,
    Matching,
    Simple,
}

impl PushDefault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Matching => "matching",
            Self::Simple => "simple",
        }
    }
}

impl fmt::Display for PushDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushDefault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "matching" => Ok(Self::Matching),
            "simple" => Ok(Self::Simple),
            other => Err(format!("unknown push default '{}'", other)),
        }
    }
}

/// Per-user repository behaviour settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub auto_fetch: bool,
    pub fetch_interval_minutes: i64,
    pub push_default: PushDefault,
    pub pull_rebase: bool,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            auto_fetch: false,
            fetch_interval_minutes: DEFAULT_FETCH_INTERVAL_MINUTES,
            push_default: PushDefault::Current,
            pull_rebase: false,
        }
    }
}

/// Clamp a fetch interval into the supported range
pub fn clamp_fetch_interval(minutes: i64) -> i64 {
    minutes.clamp(MIN_FETCH_INTERVAL_MINUTES, MAX_FETCH_INTERVAL_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("octocat", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("octocat"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_push_default_parse() {
        assert_eq!("simple".parse::<PushDefault>(), Ok(PushDefault::Simple));
        assert_eq!(" Matching ".parse::<PushDefault>(), Ok(PushDefault::Matching));
        assert!("upstream".parse::<PushDefault>().is_err());
        assert_eq!(PushDefault::default().as_str(), "current");
    }

    #[test]
    fn test_clamp_fetch_interval() {
        assert_eq!(clamp_fetch_interval(-5), 5);
        assert_eq!(clamp_fetch_interval(5), 5);
        assert_eq!(clamp_fetch_interval(40), 40);
        assert_eq!(clamp_fetch_interval(60), 60);
        assert_eq!(clamp_fetch_interval(9999), 60);
    }

    #[test]
    fn test_identity_completeness() {
        assert!(!Identity::default().is_complete());
        let identity = Identity {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        assert!(identity.is_complete());
    }
}
