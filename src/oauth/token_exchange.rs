//! Usage: OAuth token endpoint helpers (authorization_code + refresh_token grants).

use crate::shared::error::{AppResult, AuthError};
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use serde_json::Value;

#[derive(Debug, Clone)]
pub(crate) struct TokenExchangeRequest<'a> {
    pub(crate) token_uri: &'a str,
    pub(crate) client_id: &'a str,
    pub(crate) client_secret: &'a str,
    pub(crate) code: &'a str,
    pub(crate) redirect_uri: &'a str,
    pub(crate) code_verifier: &'a str,
    pub(crate) scope: &'a str,
}

#[derive(Debug, Clone)]
pub(crate) struct TokenRefreshRequest<'a> {
    pub(crate) token_uri: &'a str,
    pub(crate) client_id: &'a str,
    pub(crate) client_secret: &'a str,
    pub(crate) refresh_token: &'a str,
    pub(crate) scope: &'a str,
}

/// Successful token endpoint response. `access_token` is guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    pub(crate) refresh_token: Option<String>,
    pub(crate) id_token: Option<String>,
    pub(crate) client_info: Option<String>,
    /// Space separated scopes actually granted, when the provider reports them.
    pub(crate) scope: Option<String>,
    pub(crate) expires_at: Option<i64>,
    pub(crate) ext_expires_at: Option<i64>,
}

fn push_secret(form: &mut Vec<(&'static str, String)>, secret: &str) {
    let secret = secret.trim();
    if !secret.is_empty() {
        form.push(("client_secret", secret.to_string()));
    }
}

pub(crate) async fn exchange_authorization_code(
    client: &reqwest::Client,
    req: &TokenExchangeRequest<'_>,
) -> AppResult<TokenResponse> {
    let mut form: Vec<(&'static str, String)> = vec![
        ("grant_type", "authorization_code".to_string()),
        ("client_id", req.client_id.trim().to_string()),
        ("code", req.code.trim().to_string()),
        ("redirect_uri", req.redirect_uri.trim().to_string()),
        ("scope", req.scope.to_string()),
        ("code_verifier", req.code_verifier.trim().to_string()),
        ("client_info", "1".to_string()),
    ];
    push_secret(&mut form, req.client_secret);

    tracing::debug!(token_uri = %req.token_uri, "redeeming authorization code");
    let response = client
        .post(req.token_uri.trim())
        .form(&form)
        .send()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: oauth token exchange request failed: {e}"))?;

    parse_token_response(response).await
}

pub(crate) async fn refresh_access_token(
    client: &reqwest::Client,
    req: &TokenRefreshRequest<'_>,
) -> AppResult<TokenResponse> {
    let mut form: Vec<(&'static str, String)> = vec![
        ("grant_type", "refresh_token".to_string()),
        ("client_id", req.client_id.trim().to_string()),
        ("refresh_token", req.refresh_token.trim().to_string()),
        ("scope", req.scope.to_string()),
        ("client_info", "1".to_string()),
    ];
    push_secret(&mut form, req.client_secret);

    tracing::debug!(
        token_uri = %req.token_uri,
        refresh_token = %mask_token(req.refresh_token),
        "redeeming refresh token"
    );
    let response = client
        .post(req.token_uri.trim())
        .form(&form)
        .send()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: oauth refresh request failed: {e}"))?;

    parse_token_response(response).await
}

async fn parse_token_response(response: reqwest::Response) -> AppResult<TokenResponse> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: oauth token response read failed: {e}"))?;

    if !status.is_success() {
        let (error_code, error_message) = parse_oauth_error_details(&body);
        let mut msg = format!("status={}", status.as_u16());
        if let Some(code) = error_code {
            msg.push_str(" code=");
            msg.push_str(code.as_str());
        }
        if let Some(detail) = error_message {
            msg.push_str(" message=");
            msg.push_str(detail.chars().take(240).collect::<String>().as_str());
        }
        msg.push_str(" body=");
        msg.push_str(sanitize_oauth_error_body_snippet(&body).as_str());
        return Err(AuthError::ProviderRejected { response: msg }.into());
    }

    parse_token_body(&body, now_unix_seconds())
}

pub(crate) fn parse_token_body(body: &str, now: i64) -> AppResult<TokenResponse> {
    let value: Value = serde_json::from_str(body).map_err(|e| AuthError::ProviderRejected {
        response: format!(
            "token response json invalid ({e}): {}",
            sanitize_oauth_error_body_snippet(body)
        ),
    })?;

    let access_token = non_empty_str(&value, "access_token").ok_or_else(|| {
        AuthError::ProviderRejected {
            response: sanitize_oauth_error_body_snippet(body),
        }
    })?;

    let expires_at = |key: &str| {
        value
            .get(key)
            .and_then(parse_i64_lossy)
            .filter(|v| *v > 0)
            .map(|v| now.saturating_add(v))
    };

    Ok(TokenResponse {
        access_token,
        refresh_token: non_empty_str(&value, "refresh_token"),
        id_token: non_empty_str(&value, "id_token"),
        client_info: non_empty_str(&value, "client_info"),
        scope: non_empty_str(&value, "scope"),
        expires_at: expires_at("expires_in"),
        ext_expires_at: expires_at("ext_expires_in"),
    })
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc == "code"
        || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_oauth_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(500).collect();
        }
    }
    body.chars().take(500).collect()
}

fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let code = non_empty_str(&value, "error");
    let message = non_empty_str(&value, "error_description");
    (code, message)
}
