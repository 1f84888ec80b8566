use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use log::debug;
use reqwest::Client;
use serde::Deserialize;

/// The caller behind a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Resolves bearer tokens to users.
///
/// `Ok(None)` means the token was checked and rejected; `Err` means the
/// provider could not be asked.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>>;
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

/// Delegates token validation to Supabase Auth (`GET /auth/v1/user`).
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseAuth {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl Authenticator for SupabaseAuth {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to reach auth provider")?;

        match response.status() {
            status if status.is_success() => {
                let user = response
                    .json::<AuthUser>()
                    .await
                    .context("Failed to parse auth provider response")?;
                Ok(Some(user))
            }
            status => {
                debug!("Auth provider rejected token with status {}", status);
                Ok(None)
            }
        }
    }
}
