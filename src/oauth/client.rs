//! Usage: Identity-provider client (authorization URL, code exchange, silent refresh).
//!
//! Endpoints follow the Microsoft identity platform v2.0 layout under the
//! configured authority host: `{authority}/{tenant}/oauth2/v2.0/{authorize,token}`.

use crate::domain::config::Config;
use crate::domain::token_cache::{TokenCache, TokenContext, RESERVED_SCOPES};
use crate::oauth::pkce::{PkcePair, CHALLENGE_METHOD};
use crate::oauth::token_exchange::{
    exchange_authorization_code, refresh_access_token, TokenExchangeRequest, TokenRefreshRequest,
};
use crate::shared::error::{AppError, AppResult, AuthError};
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use std::fmt;
use std::time::Duration;

/// Bearer token handed to the caller. Formatting never reveals the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    pub fn into_secret(self) -> String {
        self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken({})", mask_token(&self.0))
    }
}

/// Configured scopes followed by the reserved ones, de-duplicated, order preserved.
pub(crate) fn request_scopes(config: &Config) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let all = config
        .scopes
        .iter()
        .map(String::as_str)
        .chain(RESERVED_SCOPES.iter().copied());
    for scope in all {
        let scope = scope.trim();
        if scope.is_empty() || out.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
            continue;
        }
        out.push(scope.to_string());
    }
    out
}

pub(crate) fn authorize_endpoint(config: &Config) -> String {
    format!(
        "{}/{}/oauth2/v2.0/authorize",
        config.authority_host(),
        config.tenant_id.trim()
    )
}

pub(crate) fn token_endpoint(config: &Config) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        config.authority_host(),
        config.tenant_id.trim()
    )
}

/// Host part of the authority; cache entries are keyed by it.
pub(crate) fn authority_environment(config: &Config) -> AppResult<String> {
    let url = reqwest::Url::parse(config.authority_host()).map_err(|e| {
        format!(
            "SYSTEM_ERROR: invalid authority host {}: {e}",
            config.authority_host()
        )
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| "SYSTEM_ERROR: authority host has no host name".to_string())?;
    Ok(host.to_ascii_lowercase())
}

pub struct AuthorizationClient {
    http: reqwest::Client,
}

impl AuthorizationClient {
    pub fn new() -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("oauth2ms/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| format!("SYSTEM_ERROR: oauth client init failed: {e}"))?;
        Ok(Self { http })
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Deterministic for identical inputs. `cache` only contributes a `login_hint`.
    pub fn build_authorization_url(
        &self,
        config: &Config,
        cache: &TokenCache,
        state: &str,
        redirect_uri: &str,
        pkce: &PkcePair,
    ) -> AppResult<String> {
        let endpoint = authorize_endpoint(config);
        let mut url = reqwest::Url::parse(&endpoint)
            .map_err(|e| format!("SYSTEM_ERROR: invalid oauth auth url {endpoint}: {e}"))?;
        {
            let scope = request_scopes(config).join(" ");
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", config.client_id.trim());
            query.append_pair("response_type", "code");
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("scope", &scope);
            query.append_pair("state", state);
            query.append_pair("code_challenge", &pkce.challenge);
            query.append_pair("code_challenge_method", CHALLENGE_METHOD);
            query.append_pair("client_info", "1");
            if let Some(hint) = Self::current_username(cache) {
                query.append_pair("login_hint", &hint);
            }
        }
        Ok(url.to_string())
    }

    /// Redeem an authorization code and record the result in `cache`.
    pub async fn exchange_code(
        &self,
        config: &Config,
        cache: &mut TokenCache,
        code: &str,
        redirect_uri: &str,
        pkce: &PkcePair,
    ) -> AppResult<AccessToken> {
        let token_uri = token_endpoint(config);
        let environment = authority_environment(config)?;
        let scopes = request_scopes(config);
        let scope = scopes.join(" ");

        let response = exchange_authorization_code(
            &self.http,
            &TokenExchangeRequest {
                token_uri: &token_uri,
                client_id: &config.client_id,
                client_secret: &config.client_secret,
                code,
                redirect_uri,
                code_verifier: &pkce.verifier,
                scope: &scope,
            },
        )
        .await?;

        let account = cache.add_token_response(
            &TokenContext {
                client_id: &config.client_id,
                environment: &environment,
                realm: &config.tenant_id,
                requested_scopes: &config.scopes,
            },
            &response,
            now_unix_seconds(),
        );
        tracing::info!(
            username = %account.username,
            access_token = %mask_token(&response.access_token),
            "authorization code redeemed"
        );
        Ok(AccessToken::new(response.access_token))
    }

    /// Token for the first cached account without user interaction, or `None` when the
    /// interactive flow is required.
    pub async fn refresh_silently(
        &self,
        config: &Config,
        cache: &mut TokenCache,
    ) -> Option<AccessToken> {
        match self.try_refresh_silently(config, cache).await {
            Ok(token) => Some(token),
            Err(err) => {
                tracing::info!(code = err.code(), "silent refresh unavailable: {}", err);
                None
            }
        }
    }

    async fn try_refresh_silently(
        &self,
        config: &Config,
        cache: &mut TokenCache,
    ) -> AppResult<AccessToken> {
        let unavailable = |reason: String| AppError::from(AuthError::SilentRefreshUnavailable(reason));

        let account = cache
            .first_account()
            .ok_or_else(|| unavailable("token cache has no account".to_string()))?;

        let now = now_unix_seconds();
        if let Some(token) = cache.find_access_token(&account, &config.client_id, &config.scopes, now) {
            tracing::debug!(username = %account.username, "using cached access token");
            return Ok(AccessToken::new(token));
        }

        let refresh_token = cache
            .find_refresh_token(&account, &config.client_id)
            .ok_or_else(|| unavailable("no refresh token cached for account".to_string()))?;

        let token_uri = token_endpoint(config);
        let scope = request_scopes(config).join(" ");
        let response = refresh_access_token(
            &self.http,
            &TokenRefreshRequest {
                token_uri: &token_uri,
                client_id: &config.client_id,
                client_secret: &config.client_secret,
                refresh_token: &refresh_token,
                scope: &scope,
            },
        )
        .await
        .map_err(|e| unavailable(e.to_string()))?;

        cache.add_token_response(
            &TokenContext {
                client_id: &config.client_id,
                environment: &account.environment,
                realm: &account.realm,
                requested_scopes: &config.scopes,
            },
            &response,
            now_unix_seconds(),
        );
        tracing::debug!(username = %account.username, "access token refreshed");
        Ok(AccessToken::new(response.access_token))
    }

    /// Username of the first cached account (used for XOAUTH2 encoding).
    pub fn current_username(cache: &TokenCache) -> Option<String> {
        cache
            .first_account()
            .map(|account| account.username)
            .filter(|name| !name.trim().is_empty())
    }
}
