//! OAuth2 password-grant provider
//!
//! Blocking implementation of [`CredentialProvider`] against an OAuth2 token
//! endpoint using the resource-owner password and refresh-token grants.

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::credential::{Credential, CredentialProvider, ProviderError};

pub const DEFAULT_TOKEN_URL: &str = "https://identity.gondor.io/oauth/token/";
pub const DEFAULT_CLIENT_ID: &str = "KtcICiPMAII8FAeArUoDB97zmjqltllyUDev8HOS";

const USER_AGENT: &str = concat!("kel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct PasswordGrantProvider {
    id: String,
    token_url: String,
    client_id: String,
}

impl PasswordGrantProvider {
    /// The provider id is the token endpoint's host.
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        let token_url = token_url.into();
        let id = provider_id(&token_url);
        Self {
            id,
            token_url,
            client_id: client_id.into(),
        }
    }

    fn request(
        &self,
        form: &[(&str, &str)],
        expired_on_reject: bool,
    ) -> Result<Credential, ProviderError> {
        let response = ureq::post(&self.token_url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json")
            .send_form(form);

        match response {
            Ok(resp) => {
                let token: TokenResponse = resp
                    .into_json()
                    .map_err(|e| ProviderError::Failed(format!("invalid token response: {}", e)))?;
                Ok(Credential {
                    access_token: token.access_token,
                    token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
                    refresh_token: token.refresh_token,
                    expiry: token
                        .expires_in
                        .map(|secs| Utc::now() + Duration::seconds(secs)),
                })
            }
            Err(ureq::Error::Status(400 | 401, _)) if expired_on_reject => {
                Err(ProviderError::Expired)
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(ProviderError::Failed(format!("HTTP {}: {}", code, body)))
            }
            Err(e) => Err(ProviderError::Failed(e.to_string())),
        }
    }
}

impl CredentialProvider for PasswordGrantProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn exchange(&self, principal: &str, secret: &str) -> Result<Credential, ProviderError> {
        self.request(
            &[
                ("grant_type", "password"),
                ("client_id", &self.client_id),
                ("username", principal),
                ("password", secret),
            ],
            false,
        )
    }

    fn refresh(&self, credential: &Credential) -> Result<Credential, ProviderError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(ProviderError::Expired)?;
        let mut refreshed = self.request(
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("refresh_token", refresh_token),
            ],
            true,
        )?;
        // Servers may omit the refresh token when it is unchanged.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.to_string());
        }
        Ok(refreshed)
    }
}

fn provider_id(token_url: &str) -> String {
    let without_scheme = token_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(token_url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_is_host() {
        assert_eq!(provider_id(DEFAULT_TOKEN_URL), "identity.gondor.io");
        assert_eq!(provider_id("http://localhost:9000/token"), "localhost:9000");
        assert_eq!(provider_id("auth.example.com"), "auth.example.com");
    }

    #[test]
    fn test_refresh_without_token_is_expired() {
        let provider = PasswordGrantProvider::new("http://127.0.0.1:1/token", "client");
        let credential = Credential::bearer("t");
        assert_eq!(provider.refresh(&credential), Err(ProviderError::Expired));
    }
}
