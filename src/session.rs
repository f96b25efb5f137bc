//! Credentials and persisted portal session state
//!
//! This module owns the account credentials lookup and the on-disk session
//! store that lets a still-valid login survive process restarts. The persisted
//! record is replaced wholesale on every re-login, never partially mutated.

use crate::config::CezConfig;
use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default fallback TTL when no cookie carries an expiry
pub const DEFAULT_SESSION_TTL_HOURS: u64 = 6;

/// One opaque session token from the portal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,

    /// Cookie value
    pub value: String,

    /// Expiry as Unix epoch seconds; absent or non-positive means session-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

impl Cookie {
    /// Create a session-scoped cookie without an expiry
    pub fn new<S: Into<String>>(name: S, value: S) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
        }
    }
}

/// Render cookies into a `Cookie` request header value: `X=Y; A=B`
pub fn cookie_header(cookies: &[Cookie]) -> String {
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| !c.name.is_empty())
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    pairs.join("; ")
}

/// Account credentials, supplied per login attempt
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account email
    pub email: String,

    /// Account password
    pub password: String,
}

/// Resolves credentials from the environment or the configuration file
pub struct CredentialsProvider {
    config: CezConfig,
    env_prefix: String,
}

impl CredentialsProvider {
    /// Create a provider backed by the given configuration section
    pub fn new(config: CezConfig) -> Self {
        Self {
            config,
            env_prefix: "CEZ".to_string(),
        }
    }

    /// Create a provider with a custom environment prefix
    pub fn with_env_prefix(config: CezConfig, env_prefix: &str) -> Self {
        Self {
            config,
            env_prefix: env_prefix.to_string(),
        }
    }

    /// Resolve credentials; environment variables take precedence
    pub fn get_credentials(&self) -> Result<Credentials> {
        let env_email = std::env::var(format!("{}_EMAIL", self.env_prefix)).unwrap_or_default();
        let env_password =
            std::env::var(format!("{}_PASSWORD", self.env_prefix)).unwrap_or_default();
        if !env_email.is_empty() && !env_password.is_empty() {
            return Ok(Credentials {
                email: env_email,
                password: env_password,
            });
        }

        if !self.config.email.is_empty() && !self.config.password.is_empty() {
            return Ok(Credentials {
                email: self.config.email.clone(),
                password: self.config.password.clone(),
            });
        }

        Err(ElektraError::CredentialsMissing)
    }
}

/// Persisted authenticated session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Session tokens proving the authenticated browser session
    pub cookies: Vec<Cookie>,

    /// When the session was established
    pub created_at: DateTime<Utc>,

    /// Earliest cookie expiry, or created_at plus the fallback TTL
    pub expires_at: Option<DateTime<Utc>>,
}

/// On-disk store for the last-known authenticated session
pub struct SessionStore {
    path: PathBuf,
    ttl: Duration,
    logger: crate::logging::StructuredLogger,
}

impl SessionStore {
    /// Create a store persisting at the given path with the given fallback TTL
    pub fn new<P: AsRef<Path>>(path: P, ttl_hours: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ttl: Duration::hours(ttl_hours as i64),
            logger: get_logger("session"),
        }
    }

    /// Path of the persisted state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read persisted state; missing, unreadable, or structurally invalid
    /// data yields `None`, never an error
    pub fn load(&self) -> Option<SessionState> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return None,
        };
        match serde_json::from_str::<SessionState>(&contents) {
            Ok(state) => Some(state),
            Err(e) => {
                self.logger
                    .warn(&format!("Discarding invalid session state file: {}", e));
                None
            }
        }
    }

    /// Compute expiry, persist atomically, and return the new state
    pub fn save(&self, cookies: Vec<Cookie>, now: DateTime<Utc>) -> Result<SessionState> {
        let expires_at = self.compute_expiry(&cookies, now);
        let state = SessionState {
            cookies,
            created_at: now,
            expires_at,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(&state)?;
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.path)?;
        self.logger.debug("Saved session state to disk");

        Ok(state)
    }

    /// Whether the state is no longer usable at the reference instant
    pub fn is_expired(&self, state: &SessionState, now: DateTime<Utc>) -> bool {
        match state.expires_at {
            Some(expires_at) => now >= expires_at,
            None => now >= state.created_at + self.ttl,
        }
    }

    /// Earliest positive cookie expiry, or created_at plus the fallback TTL
    fn compute_expiry(&self, cookies: &[Cookie], created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let earliest = cookies
            .iter()
            .filter_map(|c| c.expires)
            .filter(|&e| e > 0.0)
            .filter_map(|e| Utc.timestamp_opt(e as i64, 0).single())
            .min();
        match earliest {
            Some(expiry) => Some(expiry),
            None => Some(created_at + self.ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("session_state.json"), 6)
    }

    fn sample_cookies() -> Vec<Cookie> {
        vec![
            Cookie::new("JSESSIONID", "abc123"),
            Cookie {
                name: "MEPAS".to_string(),
                value: "xyz".to_string(),
                expires: Some(1_900_000_000.0),
            },
        ]
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let cookies = sample_cookies();
        assert_eq!(cookie_header(&cookies), "JSESSIONID=abc123; MEPAS=xyz");
        assert_eq!(cookie_header(&[]), "");
    }

    #[test]
    fn cookie_header_skips_nameless() {
        let cookies = vec![Cookie::new("", "ghost"), Cookie::new("a", "b")];
        assert_eq!(cookie_header(&cookies), "a=b");
    }

    #[test]
    fn save_uses_earliest_cookie_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap();
        let cookies = vec![
            Cookie {
                name: "a".to_string(),
                value: "1".to_string(),
                expires: Some(1_900_000_100.0),
            },
            Cookie {
                name: "b".to_string(),
                value: "2".to_string(),
                expires: Some(1_900_000_000.0),
            },
            // Session-scoped cookies do not contribute an expiry
            Cookie::new("c", "3"),
        ];

        let state = store.save(cookies, now).unwrap();
        assert_eq!(
            state.expires_at,
            Utc.timestamp_opt(1_900_000_000, 0).single()
        );
    }

    #[test]
    fn save_falls_back_to_ttl_without_cookie_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap();

        let state = store.save(vec![Cookie::new("a", "1")], now).unwrap();
        assert_eq!(state.expires_at, Some(now + Duration::hours(6)));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap();

        let saved = store.save(sample_cookies(), now).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.cookies, saved.cookies);
        assert_eq!(loaded.created_at, saved.created_at);
        assert_eq!(loaded.expires_at, saved.expires_at);
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().is_none());
    }

    #[test]
    fn load_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_none());

        std::fs::write(store.path(), r#"{"cookies": "wrong shape"}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn is_expired_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let created = Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap();

        let with_expiry = SessionState {
            cookies: Vec::new(),
            created_at: created,
            expires_at: Some(created + Duration::hours(1)),
        };
        assert!(!store.is_expired(&with_expiry, created + Duration::minutes(59)));
        assert!(store.is_expired(&with_expiry, created + Duration::hours(1)));
        assert!(store.is_expired(&with_expiry, created + Duration::hours(2)));

        let without_expiry = SessionState {
            cookies: Vec::new(),
            created_at: created,
            expires_at: None,
        };
        assert!(!store.is_expired(&without_expiry, created + Duration::hours(5)));
        assert!(store.is_expired(&without_expiry, created + Duration::hours(6)));
    }

    #[test]
    fn credentials_from_config() {
        let provider = CredentialsProvider::with_env_prefix(
            crate::config::CezConfig {
                email: "user@example.com".to_string(),
                password: "secret".to_string(),
            },
            "ELEKTRA_TEST_CFG",
        );
        let creds = provider.get_credentials().unwrap();
        assert_eq!(creds.email, "user@example.com");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn credentials_env_takes_precedence() {
        unsafe {
            std::env::set_var("ELEKTRA_TEST_ENV_EMAIL", "env@example.com");
            std::env::set_var("ELEKTRA_TEST_ENV_PASSWORD", "envpass");
        }
        let provider = CredentialsProvider::with_env_prefix(
            crate::config::CezConfig {
                email: "user@example.com".to_string(),
                password: "secret".to_string(),
            },
            "ELEKTRA_TEST_ENV",
        );
        let creds = provider.get_credentials().unwrap();
        assert_eq!(creds.email, "env@example.com");
        assert_eq!(creds.password, "envpass");
        unsafe {
            std::env::remove_var("ELEKTRA_TEST_ENV_EMAIL");
            std::env::remove_var("ELEKTRA_TEST_ENV_PASSWORD");
        }
    }

    #[test]
    fn credentials_missing_is_distinct() {
        let provider = CredentialsProvider::with_env_prefix(
            crate::config::CezConfig::default(),
            "ELEKTRA_TEST_NONE",
        );
        assert!(matches!(
            provider.get_credentials(),
            Err(ElektraError::CredentialsMissing)
        ));
    }
}
