//! Usage: Decode id_token claims and `client_info` to identify the signed-in account.
//!
//! Signatures are not verified: the values only label cache entries and feed the
//! XOAUTH2 username, they are never used for an authorization decision.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct IdTokenClaims {
    #[serde(default)]
    pub(crate) oid: Option<String>,
    #[serde(default)]
    pub(crate) sub: Option<String>,
    #[serde(default)]
    pub(crate) tid: Option<String>,
    #[serde(default)]
    pub(crate) preferred_username: Option<String>,
    #[serde(default)]
    pub(crate) upn: Option<String>,
    #[serde(default)]
    pub(crate) email: Option<String>,
}

impl IdTokenClaims {
    pub(crate) fn username(&self) -> Option<&str> {
        [&self.preferred_username, &self.upn, &self.email]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    pub(crate) fn object_id(&self) -> Option<&str> {
        self.oid
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ClientInfo {
    pub(crate) uid: String,
    pub(crate) utid: String,
}

impl ClientInfo {
    pub(crate) fn home_account_id(&self) -> String {
        format!("{}.{}", self.uid, self.utid)
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim().trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub(crate) fn decode_id_token(jwt: &str) -> Option<IdTokenClaims> {
    let payload = jwt.split('.').nth(1)?;
    decode_segment(payload)
}

pub(crate) fn decode_client_info(raw: &str) -> Option<ClientInfo> {
    decode_segment(raw)
}

#[cfg(test)]
pub(crate) fn encode_test_segment(value: &serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}
