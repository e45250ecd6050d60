//! Usage: Serializable token cache (accounts + access/refresh/id tokens) stored as an opaque blob.
//!
//! The document uses the sectioned layout of MSAL-family caches (`Account`,
//! `AccessToken`, `RefreshToken`, `IdToken`, `AppMetadata`). Sections and
//! fields this crate does not understand are carried through untouched, so a
//! cache written by another MSAL client survives a load/save cycle.

use crate::oauth::id_token::{decode_client_info, decode_id_token};
use crate::oauth::token_exchange::TokenResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Scopes the identity platform adds to every request; never used to match cached tokens.
pub(crate) const RESERVED_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

/// Access tokens this close to expiry are treated as expired.
pub(crate) const EXPIRY_SKEW_SECS: i64 = 5 * 60;

const AUTHORITY_TYPE: &str = "MSSTS";
const FALLBACK_HOME_ACCOUNT_ID: &str = "anonymous";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(rename = "Account", default)]
    accounts: BTreeMap<String, AccountEntry>,
    #[serde(rename = "AccessToken", default)]
    access_tokens: BTreeMap<String, CredentialEntry>,
    #[serde(rename = "RefreshToken", default)]
    refresh_tokens: BTreeMap<String, CredentialEntry>,
    #[serde(rename = "IdToken", default)]
    id_tokens: BTreeMap<String, CredentialEntry>,
    #[serde(rename = "AppMetadata", default)]
    app_metadata: BTreeMap<String, Value>,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AccountEntry {
    home_account_id: String,
    environment: String,
    realm: String,
    #[serde(default)]
    local_account_id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    authority_type: String,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CredentialEntry {
    credential_type: String,
    secret: String,
    home_account_id: String,
    environment: String,
    client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cached_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extended_expires_on: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl CredentialEntry {
    fn belongs_to(&self, account: &CachedAccount, client_id: &str) -> bool {
        self.home_account_id == account.home_account_id
            && self.environment.eq_ignore_ascii_case(&account.environment)
            && self.client_id == client_id
    }
}

/// Public view of one cached account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAccount {
    pub home_account_id: String,
    pub environment: String,
    pub realm: String,
    pub username: String,
}

/// Where a token response came from; needed to key the cache entries.
#[derive(Debug, Clone)]
pub(crate) struct TokenContext<'a> {
    pub(crate) client_id: &'a str,
    pub(crate) environment: &'a str,
    pub(crate) realm: &'a str,
    pub(crate) requested_scopes: &'a [String],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenCache {
    doc: CacheDocument,
    state_changed: bool,
}

fn account_key(home_account_id: &str, environment: &str, realm: &str) -> String {
    format!("{home_account_id}-{environment}-{realm}").to_lowercase()
}

fn credential_key(
    home_account_id: &str,
    environment: &str,
    credential_type: &str,
    client_id: &str,
    realm: &str,
    target: &str,
) -> String {
    format!("{home_account_id}-{environment}-{credential_type}-{client_id}-{realm}-{target}")
        .to_lowercase()
}

/// Scopes that take part in cache matching, lowercased and without reserved scopes.
pub(crate) fn significant_scopes<'a>(scopes: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for scope in scopes {
        let scope = scope.trim().to_ascii_lowercase();
        if scope.is_empty() || RESERVED_SCOPES.contains(&scope.as_str()) || out.contains(&scope) {
            continue;
        }
        out.push(scope);
    }
    out
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a blob produced by [`TokenCache::serialize`]. The result reports no state change.
    pub fn deserialize(blob: &str) -> Result<Self, serde_json::Error> {
        let doc = if blob.trim().is_empty() {
            CacheDocument::default()
        } else {
            serde_json::from_str(blob)?
        };
        Ok(Self {
            doc,
            state_changed: false,
        })
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.doc)
    }

    /// True once a token response has been added since this cache was created or loaded.
    pub fn has_state_changed(&self) -> bool {
        self.state_changed
    }

    pub fn accounts(&self) -> Vec<CachedAccount> {
        self.doc
            .accounts
            .values()
            .map(|entry| CachedAccount {
                home_account_id: entry.home_account_id.clone(),
                environment: entry.environment.clone(),
                realm: entry.realm.clone(),
                username: entry.username.clone(),
            })
            .collect()
    }

    pub fn first_account(&self) -> Option<CachedAccount> {
        self.accounts().into_iter().next()
    }

    /// Cached access token covering `scopes` that stays valid for at least [`EXPIRY_SKEW_SECS`].
    pub(crate) fn find_access_token(
        &self,
        account: &CachedAccount,
        client_id: &str,
        scopes: &[String],
        now: i64,
    ) -> Option<String> {
        let wanted = significant_scopes(scopes.iter().map(String::as_str));
        self.doc
            .access_tokens
            .values()
            .filter(|entry| entry.belongs_to(account, client_id))
            .filter(|entry| {
                entry
                    .realm
                    .as_deref()
                    .map_or(true, |realm| realm.eq_ignore_ascii_case(&account.realm))
            })
            .filter(|entry| {
                let granted =
                    significant_scopes(entry.target.as_deref().unwrap_or("").split_whitespace());
                wanted.iter().all(|scope| granted.contains(scope))
            })
            .filter(|entry| {
                entry
                    .expires_on
                    .as_deref()
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .is_some_and(|expires_on| expires_on > now.saturating_add(EXPIRY_SKEW_SECS))
            })
            .map(|entry| entry.secret.clone())
            .next()
    }

    pub(crate) fn find_refresh_token(&self, account: &CachedAccount, client_id: &str) -> Option<String> {
        self.doc
            .refresh_tokens
            .values()
            .filter(|entry| entry.belongs_to(account, client_id))
            .map(|entry| entry.secret.clone())
            .find(|secret| !secret.trim().is_empty())
    }

    /// Record a successful token response and return the account it belongs to.
    pub(crate) fn add_token_response(
        &mut self,
        ctx: &TokenContext<'_>,
        response: &TokenResponse,
        now: i64,
    ) -> CachedAccount {
        let claims = response.id_token.as_deref().and_then(decode_id_token);
        let previous = self.first_account();

        let home_account_id = response
            .client_info
            .as_deref()
            .and_then(decode_client_info)
            .map(|info| info.home_account_id())
            .or_else(|| {
                let claims = claims.as_ref()?;
                let oid = claims.object_id()?;
                Some(match claims.tid.as_deref() {
                    Some(tid) => format!("{oid}.{tid}"),
                    None => oid.to_string(),
                })
            })
            .or_else(|| previous.as_ref().map(|a| a.home_account_id.clone()))
            .unwrap_or_else(|| FALLBACK_HOME_ACCOUNT_ID.to_string());

        let realm = claims
            .as_ref()
            .and_then(|c| c.tid.clone())
            .unwrap_or_else(|| ctx.realm.to_string());
        let username = claims
            .as_ref()
            .and_then(|c| c.username().map(str::to_string))
            .or_else(|| {
                previous
                    .as_ref()
                    .filter(|a| a.home_account_id == home_account_id)
                    .map(|a| a.username.clone())
            })
            .unwrap_or_default();
        let local_account_id = claims
            .as_ref()
            .and_then(|c| c.object_id().map(str::to_string))
            .unwrap_or_default();
        let environment = ctx.environment.to_string();

        self.doc.accounts.insert(
            account_key(&home_account_id, &environment, &realm),
            AccountEntry {
                home_account_id: home_account_id.clone(),
                environment: environment.clone(),
                realm: realm.clone(),
                local_account_id,
                username: username.clone(),
                authority_type: AUTHORITY_TYPE.to_string(),
                extra: BTreeMap::new(),
            },
        );

        let account = CachedAccount {
            home_account_id,
            environment,
            realm,
            username,
        };

        let target = response.scope.clone().unwrap_or_else(|| {
            significant_scopes(ctx.requested_scopes.iter().map(String::as_str)).join(" ")
        });
        self.doc.access_tokens.retain(|_, entry| {
            !(entry.belongs_to(&account, ctx.client_id)
                && entry.realm.as_deref() == Some(account.realm.as_str()))
        });
        self.doc.access_tokens.insert(
            credential_key(
                &account.home_account_id,
                &account.environment,
                "accesstoken",
                ctx.client_id,
                &account.realm,
                &target,
            ),
            CredentialEntry {
                credential_type: "AccessToken".to_string(),
                secret: response.access_token.clone(),
                home_account_id: account.home_account_id.clone(),
                environment: account.environment.clone(),
                client_id: ctx.client_id.to_string(),
                realm: Some(account.realm.clone()),
                target: Some(target),
                cached_at: Some(now.to_string()),
                expires_on: response.expires_at.map(|v| v.to_string()),
                extended_expires_on: response
                    .ext_expires_at
                    .or(response.expires_at)
                    .map(|v| v.to_string()),
                extra: BTreeMap::new(),
            },
        );

        if let Some(refresh_token) = response.refresh_token.as_deref() {
            self.doc.refresh_tokens.insert(
                credential_key(
                    &account.home_account_id,
                    &account.environment,
                    "refreshtoken",
                    ctx.client_id,
                    "",
                    "",
                ),
                CredentialEntry {
                    credential_type: "RefreshToken".to_string(),
                    secret: refresh_token.to_string(),
                    home_account_id: account.home_account_id.clone(),
                    environment: account.environment.clone(),
                    client_id: ctx.client_id.to_string(),
                    realm: None,
                    target: None,
                    cached_at: None,
                    expires_on: None,
                    extended_expires_on: None,
                    extra: BTreeMap::new(),
                },
            );
        }

        if let Some(id_token) = response.id_token.as_deref() {
            self.doc.id_tokens.insert(
                credential_key(
                    &account.home_account_id,
                    &account.environment,
                    "idtoken",
                    ctx.client_id,
                    &account.realm,
                    "",
                ),
                CredentialEntry {
                    credential_type: "IdToken".to_string(),
                    secret: id_token.to_string(),
                    home_account_id: account.home_account_id.clone(),
                    environment: account.environment.clone(),
                    client_id: ctx.client_id.to_string(),
                    realm: Some(account.realm.clone()),
                    target: None,
                    cached_at: None,
                    expires_on: None,
                    extended_expires_on: None,
                    extra: BTreeMap::new(),
                },
            );
        }

        self.doc.app_metadata.insert(
            format!("appmetadata-{}-{}", account.environment, ctx.client_id).to_lowercase(),
            serde_json::json!({
                "client_id": ctx.client_id,
                "environment": account.environment,
            }),
        );

        self.state_changed = true;
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::id_token::encode_test_segment;
    use serde_json::json;

    const CLIENT_ID: &str = "client-123";

    fn scopes() -> Vec<String> {
        vec!["https://outlook.office.com/IMAP.AccessAsUser.All".to_string()]
    }

    fn ctx(scopes: &[String]) -> TokenContext<'_> {
        TokenContext {
            client_id: CLIENT_ID,
            environment: "login.microsoftonline.com",
            realm: "common",
            requested_scopes: scopes,
        }
    }

    fn response(access_token: &str, expires_at: i64) -> TokenResponse {
        let id_token = format!(
            "{}.{}.sig",
            encode_test_segment(&json!({"alg": "none"})),
            encode_test_segment(&json!({
                "preferred_username": "alice@example.com",
                "oid": "oid-1",
                "tid": "tenant-1"
            }))
        );
        TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: Some("rt-1".to_string()),
            id_token: Some(id_token),
            client_info: Some(encode_test_segment(&json!({"uid": "oid-1", "utid": "tenant-1"}))),
            scope: Some("https://outlook.office.com/IMAP.AccessAsUser.All".to_string()),
            expires_at: Some(expires_at),
            ext_expires_at: None,
        }
    }

    #[test]
    fn empty_cache_has_no_accounts_and_no_changes() {
        let cache = TokenCache::new();
        assert!(cache.first_account().is_none());
        assert!(!cache.has_state_changed());
    }

    #[test]
    fn adding_a_response_creates_account_and_marks_change() {
        let scopes = scopes();
        let mut cache = TokenCache::new();
        let account = cache.add_token_response(&ctx(&scopes), &response("at-1", 10_000), 1_000);

        assert!(cache.has_state_changed());
        assert_eq!(account.home_account_id, "oid-1.tenant-1");
        assert_eq!(account.realm, "tenant-1");
        assert_eq!(account.username, "alice@example.com");
        assert_eq!(cache.first_account(), Some(account.clone()));
        assert_eq!(cache.find_refresh_token(&account, CLIENT_ID).as_deref(), Some("rt-1"));
    }

    #[test]
    fn access_token_lookup_honours_expiry_skew_and_scopes() {
        let scopes = scopes();
        let mut cache = TokenCache::new();
        let account = cache.add_token_response(&ctx(&scopes), &response("at-1", 10_000), 1_000);

        assert_eq!(
            cache.find_access_token(&account, CLIENT_ID, &scopes, 1_000).as_deref(),
            Some("at-1")
        );
        assert!(cache
            .find_access_token(&account, CLIENT_ID, &scopes, 10_000 - EXPIRY_SKEW_SECS)
            .is_none());

        let other = vec!["https://outlook.office.com/SMTP.Send".to_string()];
        assert!(cache.find_access_token(&account, CLIENT_ID, &other, 1_000).is_none());
        assert!(cache.find_access_token(&account, "other-client", &scopes, 1_000).is_none());
    }

    #[test]
    fn newer_response_replaces_access_token() {
        let scopes = scopes();
        let mut cache = TokenCache::new();
        cache.add_token_response(&ctx(&scopes), &response("at-1", 10_000), 1_000);
        let account = cache.add_token_response(&ctx(&scopes), &response("at-2", 20_000), 2_000);

        assert_eq!(cache.accounts().len(), 1);
        assert_eq!(
            cache.find_access_token(&account, CLIENT_ID, &scopes, 2_000).as_deref(),
            Some("at-2")
        );
    }

    #[test]
    fn serialize_round_trip_resets_change_flag_and_keeps_unknown_sections() {
        let scopes = scopes();
        let mut cache = TokenCache::new();
        cache.add_token_response(&ctx(&scopes), &response("at-1", 10_000), 1_000);
        let blob = cache.serialize().expect("serialize");

        let mut value: Value = serde_json::from_str(&blob).expect("json");
        value["Vendor"] = json!({"k": "v"});
        let blob = value.to_string();

        let restored = TokenCache::deserialize(&blob).expect("deserialize");
        assert!(!restored.has_state_changed());
        assert_eq!(restored.accounts(), cache.accounts());

        let again: Value =
            serde_json::from_str(&restored.serialize().expect("serialize")).expect("json");
        assert_eq!(again["Vendor"], json!({"k": "v"}));
    }

    #[test]
    fn significant_scopes_drop_reserved_and_duplicates() {
        let out = significant_scopes(["openid", "Mail.Read", "mail.read", "offline_access", ""]);
        assert_eq!(out, vec!["mail.read".to_string()]);
    }
}
