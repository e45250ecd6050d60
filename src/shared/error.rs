//! Usage: Unified error model (maps internal failures to `CODE: message` strings).

use std::path::PathBuf;
use std::time::Duration;

pub type AppResult<T> = Result<T, AppError>;

/// Keys every config file must define, in the order they are reported.
pub const REQUIRED_CONFIG_KEYS: [&str; 7] = [
    "tenant_id",
    "client_id",
    "redirect_host",
    "redirect_port",
    "redirect_path",
    "scopes",
    "client_secret",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "CONFIG_MISSING: couldn't find configuration file; config file must be at: {} (current value of $XDG_CONFIG_HOME is {xdg_config_home})",
        .expected.display()
    )]
    Missing {
        expected: PathBuf,
        xdg_config_home: String,
    },

    #[error(
        "CONFIG_INVALID: {detail}; config must contain the keys: {}",
        REQUIRED_CONFIG_KEYS.join(", ")
    )]
    Invalid { detail: String },

    #[error(
        "CONFIG_MALFORMED: {} is not a valid json file or it is encrypted ({cause}); maybe add/remove the --encrypt-using-fingerprint argument?",
        .path.display()
    )]
    Malformed { path: PathBuf, cause: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("AUTH_CAPTURE_FAILED: {0}")]
    CaptureFailed(String),

    #[error("AUTH_CAPTURE_TIMEOUT: no authorization redirect received within {}s", .0.as_secs())]
    CaptureTimeout(Duration),

    #[error("AUTH_PROVIDER_REJECTED: something went wrong during authorization; server returned: {response}")]
    ProviderRejected { response: String },

    /// Never surfaced to the user: it only routes the session back to the interactive flow.
    #[error("AUTH_SILENT_REFRESH_UNAVAILABLE: {0}")]
    SilentRefreshUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{code}: {message}")]
    System { code: String, message: String },
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::System {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Config(ConfigError::Missing { .. }) => "CONFIG_MISSING",
            Self::Config(ConfigError::Invalid { .. }) => "CONFIG_INVALID",
            Self::Config(ConfigError::Malformed { .. }) => "CONFIG_MALFORMED",
            Self::Auth(AuthError::CaptureFailed(_)) => "AUTH_CAPTURE_FAILED",
            Self::Auth(AuthError::CaptureTimeout(_)) => "AUTH_CAPTURE_TIMEOUT",
            Self::Auth(AuthError::ProviderRejected { .. }) => "AUTH_PROVIDER_REJECTED",
            Self::Auth(AuthError::SilentRefreshUnavailable(_)) => "AUTH_SILENT_REFRESH_UNAVAILABLE",
            Self::System { code, .. } => code,
        }
    }
}

fn split_code_message(raw: &str) -> Option<(&str, &str)> {
    let msg = raw.trim();
    let msg = msg.strip_prefix("Error:").unwrap_or(msg).trim();
    if msg.is_empty() {
        return None;
    }

    let (maybe_code, rest) = msg.split_once(':')?;
    let code = maybe_code.trim();
    if code.is_empty() {
        return None;
    }
    let mut chars = code.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_') {
        return None;
    }
    Some((code, rest.trim()))
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        if let Some((code, rest)) = split_code_message(&value) {
            let message = if rest.is_empty() { value.trim() } else { rest };
            return AppError::new(code.to_string(), message.to_string());
        }
        AppError::new("INTERNAL_ERROR", value)
    }
}

impl From<&'static str> for AppError {
    fn from(value: &'static str) -> Self {
        AppError::from(value.to_string())
    }
}

impl From<AppError> for String {
    fn from(value: AppError) -> Self {
        value.to_string()
    }
}
