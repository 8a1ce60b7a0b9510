//! Credential cache
//!
//! Wraps a [`CredentialProvider`] so that every credential it hands out is
//! written to the configuration before use, and so that a missing credential
//! triggers an interactive login exactly once.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;
use crate::error::{KelError, Result};

/// Credentials closer than this to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 10;

/// Bearer credential issued by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expiry: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
            None => false,
        }
    }

    /// Value for an `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Failure reported by a credential provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The credential used for refresh is no longer accepted
    Expired,
    Failed(String),
}

/// Exchanges user secrets or refresh tokens for bearer credentials.
pub trait CredentialProvider {
    /// Issuer identity; the cache key in the configuration
    fn id(&self) -> &str;

    fn exchange(
        &self,
        principal: &str,
        secret: &str,
    ) -> std::result::Result<Credential, ProviderError>;

    fn refresh(&self, credential: &Credential) -> std::result::Result<Credential, ProviderError>;
}

/// Source of interactive login input.
pub trait Prompter {
    fn principal(&self) -> std::io::Result<String>;
    fn secret(&self) -> std::io::Result<String>;
}

/// Persisting decorator around a [`CredentialProvider`].
pub struct CredentialCache<'a, P, Q> {
    provider: P,
    prompter: Q,
    store: &'a ConfigStore,
    current: Mutex<Option<Credential>>,
}

impl<'a, P: CredentialProvider, Q: Prompter> CredentialCache<'a, P, Q> {
    pub fn new(provider: P, prompter: Q, store: &'a ConfigStore) -> Self {
        Self {
            provider,
            prompter,
            store,
            current: Mutex::new(None),
        }
    }

    /// A usable credential, logging in or refreshing as needed.
    pub fn token(&self) -> Result<Credential> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        let cached = match current.clone() {
            Some(credential) => Some(credential),
            None => self
                .store
                .read(|config| config.tokens.get(self.provider.id()).cloned()),
        };

        let credential = match cached {
            Some(credential) if !credential.is_expired(Utc::now()) => {
                *current = Some(credential.clone());
                return Ok(credential);
            }
            Some(expired) => self.refresh_or_login(&expired)?,
            None => self.login()?,
        };

        let id = self.provider.id().to_string();
        let saved = credential.clone();
        self.store.update(move |config| {
            config.tokens.insert(id, saved);
            Ok(())
        })?;
        *current = Some(credential.clone());

        Ok(credential)
    }

    fn refresh_or_login(&self, expired: &Credential) -> Result<Credential> {
        if expired.refresh_token.is_none() {
            return self.login();
        }
        match self.provider.refresh(expired) {
            Ok(credential) => {
                tracing::debug!(provider = self.provider.id(), "refreshed credential");
                Ok(credential)
            }
            Err(ProviderError::Expired) => {
                tracing::info!(provider = self.provider.id(), "session expired; logging in again");
                self.login()
            }
            Err(ProviderError::Failed(message)) => Err(KelError::Credential(message)),
        }
    }

    fn login(&self) -> Result<Credential> {
        let principal = self.prompter.principal()?;
        let secret = self.prompter.secret()?;
        self.provider
            .exchange(principal.trim(), &secret)
            .map_err(|e| match e {
                ProviderError::Expired => {
                    KelError::Credential("credentials were rejected".to_string())
                }
                ProviderError::Failed(message) => KelError::Credential(message),
            })
    }
}
