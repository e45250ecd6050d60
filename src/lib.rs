pub mod app;
pub mod domain;
pub mod infra;
pub mod oauth;
pub mod shared;

pub use app::cli::Cli;
pub use app::session::{Session, SessionOptions, SessionState};
pub use shared::error::{AppError, AppResult, AuthError, ConfigError};

use infra::encryption::{EncryptionBackend, GpgBackend};
use oauth::browser::{PrintUrl, SystemBrowser, UserAgent};
use oauth::client::AuthorizationClient;

/// Resolve CLI options into a session and run it once, returning the line for stdout.
pub async fn run(cli: Cli) -> AppResult<String> {
    let credentials_path = match cli.credentials_file {
        Some(path) => path,
        None => infra::app_paths::default_credentials_file().ok_or_else(|| {
            AppError::new(
                "SYSTEM_ERROR",
                "cannot locate the credential file: neither $XDG_DATA_HOME nor $HOME is set",
            )
        })?,
    };

    let gpg = cli
        .encrypt_using_fingerprint
        .map(|recipient| GpgBackend::new(recipient, cli.gpg_home));
    let encryption = gpg.as_ref().map(|b| b as &dyn EncryptionBackend);

    let user_agent: &dyn UserAgent = if cli.no_browser {
        &PrintUrl
    } else {
        &SystemBrowser
    };

    let options = SessionOptions {
        config_path: cli.config,
        credentials_path,
        encode_xoauth2: cli.encode_xoauth2,
        redirect_timeout_secs: cli.redirect_timeout,
    };
    tracing::debug!(
        credentials = %options.credentials_path.display(),
        encrypted = encryption.is_some(),
        "starting session"
    );

    let mut session = Session::new(options, AuthorizationClient::new()?, user_agent, encryption);
    session.run().await
}
