//! Usage: Persisted credential record (config snapshot + serialized token cache).

use crate::domain::config::Config;
use crate::domain::token_cache::TokenCache;
use crate::shared::error::ConfigError;
use serde_json::{Map, Value};
use std::path::Path;

const KEY_TOKEN_CACHE: &str = "token_cache";

/// What `credentials.bin` holds: every config key, the derived `redirect_uri`,
/// and the token cache as a JSON *string*.
#[derive(Debug)]
pub struct CredentialFile {
    pub config: Config,
    pub token_cache: TokenCache,
}

impl CredentialFile {
    pub fn new(config: Config, token_cache: TokenCache) -> Self {
        Self {
            config,
            token_cache,
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut map: Map<String, Value> = self.config.to_json_map();
        map.insert(
            KEY_TOKEN_CACHE.to_string(),
            Value::String(self.token_cache.serialize()?),
        );
        serde_json::to_string(&Value::Object(map))
    }

    /// Parse decrypted file text.
    ///
    /// Returns `Ok(None)` when the record has no usable `token_cache`, which
    /// the session treats like a missing file.
    pub fn parse(text: &str, source: &Path) -> Result<Option<Self>, ConfigError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Malformed {
            path: source.to_path_buf(),
            cause: e.to_string(),
        })?;

        let blob = match value.get(KEY_TOKEN_CACHE) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.as_str(),
            _ => {
                tracing::debug!(path = %source.display(), "credential file has no token cache");
                return Ok(None);
            }
        };

        let config = Config::from_value(&value)?;
        let token_cache = TokenCache::deserialize(blob).map_err(|e| ConfigError::Malformed {
            path: source.to_path_buf(),
            cause: format!("token cache: {e}"),
        })?;

        Ok(Some(Self {
            config,
            token_cache,
        }))
    }
}
