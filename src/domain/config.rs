//! Usage: Typed run configuration (validation, redirect URI derivation, JSON round-trip).

use crate::shared::error::{AppResult, ConfigError, REQUIRED_CONFIG_KEYS};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_REDIRECT_TIMEOUT_SECS: u64 = 120;

const KEY_AUTHORITY_HOST: &str = "authority_host";
const KEY_REDIRECT_TIMEOUT_SECS: &str = "redirect_timeout_secs";
const KEY_REDIRECT_URI: &str = "redirect_uri";
const KEY_TOKEN_CACHE: &str = "token_cache";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub redirect_host: String,
    pub redirect_port: u16,
    /// Already normalized, see [`normalize_redirect_path`].
    pub redirect_path: String,
    pub authority_host: Option<String>,
    pub redirect_timeout_secs: Option<u64>,
    extra: Map<String, Value>,
}

/// Strip one trailing `/` unless the path is exactly `/`.
pub fn normalize_redirect_path(path: &str) -> String {
    if path != "/" {
        if let Some(stripped) = path.strip_suffix('/') {
            return stripped.to_string();
        }
    }
    path.to_string()
}

pub(crate) fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn invalid(detail: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        detail: detail.into(),
    }
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String, ConfigError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("`{key}` must be a string")))
}

fn parse_port(value: &Value) -> Result<u16, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid("`redirect_port` must be a port number between 0 and 65535"))
}

fn parse_scopes(value: &Value) -> Result<Vec<String>, ConfigError> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid("`scopes` must be an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid("`scopes` must be an array of strings"))
        })
        .collect()
}

impl Config {
    /// Validate a loosely-typed JSON object into a `Config`.
    ///
    /// All required keys are checked before any of them is interpreted, so the
    /// error lists every missing key at once.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("config must be a JSON object"))?;

        let missing: Vec<&str> = REQUIRED_CONFIG_KEYS
            .iter()
            .copied()
            .filter(|key| obj.get(*key).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("missing keys: {}", missing.join(", "))));
        }

        let redirect_path = required_str(obj, "redirect_path")?;
        if !redirect_path.starts_with('/') {
            return Err(invalid("`redirect_path` must start with '/'"));
        }

        let authority_host = match obj.get(KEY_AUTHORITY_HOST) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim().trim_end_matches('/').to_string()),
            Some(_) => return Err(invalid(format!("`{KEY_AUTHORITY_HOST}` must be a string"))),
        };
        let redirect_timeout_secs = match obj.get(KEY_REDIRECT_TIMEOUT_SECS) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                invalid(format!(
                    "`{KEY_REDIRECT_TIMEOUT_SECS}` must be a non-negative integer"
                ))
            })?),
        };

        let extra = obj
            .iter()
            .filter(|(key, _)| {
                !REQUIRED_CONFIG_KEYS.contains(&key.as_str())
                    && !matches!(
                        key.as_str(),
                        KEY_AUTHORITY_HOST
                            | KEY_REDIRECT_TIMEOUT_SECS
                            | KEY_REDIRECT_URI
                            | KEY_TOKEN_CACHE
                    )
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            tenant_id: required_str(obj, "tenant_id")?,
            client_id: required_str(obj, "client_id")?,
            client_secret: required_str(obj, "client_secret")?,
            scopes: parse_scopes(&obj["scopes"])?,
            redirect_host: required_str(obj, "redirect_host")?,
            redirect_port: parse_port(&obj["redirect_port"])?,
            redirect_path: normalize_redirect_path(&redirect_path),
            authority_host,
            redirect_timeout_secs,
            extra,
        })
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("SYSTEM_ERROR: failed to read {}: {e}", path.display()))?;
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            invalid(format!("{} is not valid JSON: {e}", path.display()))
        })?;
        Ok(Self::from_value(&value)?)
    }

    pub fn redirect_uri(&self) -> String {
        self.redirect_uri_for_port(self.redirect_port)
    }

    /// Redirect URI for the port the listener actually bound (differs only when configured as 0).
    pub fn redirect_uri_for_port(&self, port: u16) -> String {
        format!(
            "http://{}{}",
            format_host_port(&self.redirect_host, port),
            self.redirect_path
        )
    }

    pub fn authority_host(&self) -> &str {
        self.authority_host
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    /// `None` means wait for the redirect forever.
    pub fn redirect_timeout(&self) -> Option<Duration> {
        match self
            .redirect_timeout_secs
            .unwrap_or(DEFAULT_REDIRECT_TIMEOUT_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// JSON object written into the credential file (includes the derived `redirect_uri`).
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("tenant_id".into(), Value::from(self.tenant_id.as_str()));
        map.insert("client_id".into(), Value::from(self.client_id.as_str()));
        map.insert(
            "client_secret".into(),
            Value::from(self.client_secret.as_str()),
        );
        map.insert(
            "scopes".into(),
            Value::Array(self.scopes.iter().map(|s| Value::from(s.as_str())).collect()),
        );
        map.insert(
            "redirect_host".into(),
            Value::from(self.redirect_host.as_str()),
        );
        map.insert(
            "redirect_port".into(),
            Value::from(self.redirect_port.to_string()),
        );
        map.insert(
            "redirect_path".into(),
            Value::from(self.redirect_path.as_str()),
        );
        map.insert(KEY_REDIRECT_URI.into(), Value::from(self.redirect_uri()));
        if let Some(host) = self.authority_host.as_deref() {
            map.insert(KEY_AUTHORITY_HOST.into(), Value::from(host));
        }
        if let Some(secs) = self.redirect_timeout_secs {
            map.insert(KEY_REDIRECT_TIMEOUT_SECS.into(), Value::from(secs));
        }
        map
    }
}
