//! Bearer-token gate.
//!
//! The expected token comes from a [`SecretSource`] and is cached for the
//! settings TTL. A static fallback token (`API_AUTH_TOKEN`) seeds the cache;
//! with no secret source configured it is used forever.
//!
//! State machine:
//! - `NoToken` → refresh on the next validation
//! - `Cached { fetched_at: None }` (seeded) → refresh if a source exists
//! - `Cached { fetched_at: Some(t) }` → refresh once `t + ttl` has passed
//!
//! The lock is released while a refresh runs, so a slow secret store delays
//! only the requests that need the new value. Two requests may refresh at once;
//! the last one to finish wins.

use crate::config::Settings;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret '{name}' not found")]
    NotFound { name: String },

    #[error("failed to read secret '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A named-secret store.
pub trait SecretSource: Send + Sync {
    fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}

/// Secrets mounted as files: `{dir}/{name}`, surrounding whitespace trimmed.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    dir: PathBuf,
}

impl FileSecretSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SecretSource for FileSecretSource {
    fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        // Names are single path components
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(SecretError::NotFound {
                name: name.to_string(),
            });
        }

        match fs::read_to_string(self.dir.join(name)) {
            Ok(raw) => Ok(raw.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SecretError::NotFound {
                name: name.to_string(),
            }),
            Err(source) => Err(SecretError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingCredentials,

    #[error("Invalid bearer token")]
    InvalidToken,

    #[error("Auth token unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Cached {
        value: String,
        /// `None` for the seeded fallback token.
        fetched_at: Option<Instant>,
    },
}

pub struct TokenProvider {
    secret_name: String,
    ttl: Duration,
    source: Option<Arc<dyn SecretSource>>,
    state: Mutex<TokenState>,
}

impl TokenProvider {
    pub fn new(
        secret_name: impl Into<String>,
        ttl: Duration,
        fallback: Option<String>,
        source: Option<Arc<dyn SecretSource>>,
    ) -> Self {
        let state = match fallback {
            Some(value) => TokenState::Cached {
                value,
                fetched_at: None,
            },
            None => TokenState::NoToken,
        };
        Self {
            secret_name: secret_name.into(),
            ttl,
            source,
            state: Mutex::new(state),
        }
    }

    /// Fallback token from `API_AUTH_TOKEN`; file secrets from `SECRET_DIR` when set.
    pub fn from_settings(settings: &Settings) -> Self {
        let source = settings
            .secret_dir
            .as_ref()
            .map(|dir| Arc::new(FileSecretSource::new(dir)) as Arc<dyn SecretSource>);
        Self::new(
            settings.api_auth_secret_name.clone(),
            settings.cache_ttl,
            settings.api_auth_fallback.clone(),
            source,
        )
    }

    pub fn state(&self) -> TokenState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current expected token, refreshing it first when due.
    pub fn expected_token(&self) -> Result<String, AuthError> {
        let cached = self.state();
        let value = match &cached {
            TokenState::Cached { value, fetched_at } if !self.should_refresh(*fetched_at) => {
                value.clone()
            }
            _ => self.refresh()?,
        };

        if value.is_empty() {
            return Err(AuthError::Unavailable("expected token is empty".to_string()));
        }
        Ok(value)
    }

    /// Check an `Authorization` header value.
    pub fn validate(&self, authorization: Option<&str>) -> Result<(), AuthError> {
        let presented = authorization
            .and_then(bearer_credentials)
            .ok_or(AuthError::MissingCredentials)?;
        let expected = self.expected_token()?;

        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    fn should_refresh(&self, fetched_at: Option<Instant>) -> bool {
        if self.source.is_none() {
            return false;
        }
        match fetched_at {
            None => true,
            Some(t) => t.elapsed() >= self.ttl,
        }
    }

    fn refresh(&self) -> Result<String, AuthError> {
        let Some(source) = &self.source else {
            return Err(AuthError::Unavailable(
                "no token configured and no secret source".to_string(),
            ));
        };

        let value = source.get_secret(&self.secret_name).map_err(|e| {
            warn!(secret = %self.secret_name, error = %e, "auth token refresh failed");
            AuthError::Unavailable(e.to_string())
        })?;

        debug!(secret = %self.secret_name, "auth token refreshed");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = TokenState::Cached {
            value: value.clone(),
            fetched_at: Some(Instant::now()),
        };
        Ok(value)
    }
}

/// Credentials of a `Bearer` authorization header (scheme case-insensitive).
fn bearer_credentials(header: &str) -> Option<&str> {
    let (scheme, credentials) = header.trim().split_once(' ')?;
    let credentials = credentials.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !credentials.is_empty()).then_some(credentials)
}
