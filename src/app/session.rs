//! Usage: One token acquisition, from credential load to the emitted output line.
//!
//! State flow:
//! - `NoCredentials` -> `SilentRefreshing` when a usable credential file exists, else `Authorizing`
//! - `SilentRefreshing` -> `TokenReady` on success, `Authorizing` on a miss
//! - `Authorizing` -> `Authorized` -> `TokenReady`
//! - `TokenReady` -> `Persisted` (only if the cache changed) -> `Emitted`
//!
//! Any error moves to `Failed` and aborts; the interactive flow is never retried.

use crate::domain::config::Config;
use crate::domain::credentials::CredentialFile;
use crate::domain::token_cache::TokenCache;
use crate::domain::xoauth2::encode_xoauth2;
use crate::infra::encryption::EncryptionBackend;
use crate::infra::{app_paths, credential_store};
use crate::oauth::browser::UserAgent;
use crate::oauth::callback_server::{bind_redirect_listener, wait_for_redirect};
use crate::oauth::client::{AccessToken, AuthorizationClient};
use crate::oauth::pkce::PkcePair;
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::new_state_token;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoCredentials,
    Authorizing,
    Authorized,
    SilentRefreshing,
    TokenReady,
    Persisted,
    Emitted,
    /// Carries the error code of the failure.
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Explicit config file; `None` searches the XDG config locations.
    pub config_path: Option<PathBuf>,
    pub credentials_path: PathBuf,
    pub encode_xoauth2: bool,
    /// Overrides the config's `redirect_timeout_secs`; `Some(0)` waits forever.
    pub redirect_timeout_secs: Option<u64>,
}

pub struct Session<'a> {
    options: SessionOptions,
    client: AuthorizationClient,
    user_agent: &'a dyn UserAgent,
    encryption: Option<&'a dyn EncryptionBackend>,
    state: SessionState,
}

/// Result of a successful acquisition, before it is persisted.
struct Acquired {
    config: Config,
    cache: TokenCache,
    token: AccessToken,
}

impl<'a> Session<'a> {
    pub fn new(
        options: SessionOptions,
        client: AuthorizationClient,
        user_agent: &'a dyn UserAgent,
        encryption: Option<&'a dyn EncryptionBackend>,
    ) -> Self {
        Self {
            options,
            client,
            user_agent,
            encryption,
            state: SessionState::NoCredentials,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Run the flow once and return the line to print (raw token or XOAUTH2 string).
    pub async fn run(&mut self) -> AppResult<String> {
        match self.run_inner().await {
            Ok(line) => Ok(line),
            Err(err) => {
                self.transition(SessionState::Failed(err.code().to_string()));
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self) -> AppResult<String> {
        let stored = credential_store::load(&self.options.credentials_path, self.encryption)?;

        let acquired = match stored {
            Some(CredentialFile {
                config,
                mut token_cache,
            }) => {
                self.transition(SessionState::SilentRefreshing);
                match self.client.refresh_silently(&config, &mut token_cache).await {
                    Some(token) => Acquired {
                        config,
                        cache: token_cache,
                        token,
                    },
                    None => self.authorize(Some(&token_cache)).await?,
                }
            }
            None => self.authorize(None).await?,
        };
        self.transition(SessionState::TokenReady);

        let Acquired {
            config,
            cache,
            token,
        } = acquired;

        if cache.has_state_changed() {
            let record = CredentialFile::new(config, cache);
            credential_store::save(&self.options.credentials_path, &record, self.encryption)?;
            self.transition(SessionState::Persisted);
            self.finish(token, &record.token_cache)
        } else {
            tracing::debug!("token cache unchanged, credential file left as is");
            self.finish(token, &cache)
        }
    }

    fn finish(&mut self, token: AccessToken, cache: &TokenCache) -> AppResult<String> {
        let line = if self.options.encode_xoauth2 {
            let username = AuthorizationClient::current_username(cache).ok_or_else(|| {
                AppError::new(
                    "AUTH_NO_ACCOUNT",
                    "token cache has no account username to encode for XOAUTH2",
                )
            })?;
            encode_xoauth2(&username, token.secret())
        } else {
            token.into_secret()
        };
        self.transition(SessionState::Emitted);
        Ok(line)
    }

    fn load_config(&self) -> AppResult<Config> {
        let path = match self.options.config_path.as_ref() {
            Some(path) if path.is_file() => path.clone(),
            Some(path) => return Err(app_paths::missing_config(path.clone()).into()),
            None => app_paths::find_config_file()?,
        };
        tracing::debug!(path = %path.display(), "loading config");
        Config::from_file(&path)
    }

    fn redirect_timeout(&self, config: &Config) -> Option<Duration> {
        match self.options.redirect_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => config.redirect_timeout(),
        }
    }

    /// Interactive authorization-code grant. `previous` only supplies a login hint.
    async fn authorize(&mut self, previous: Option<&TokenCache>) -> AppResult<Acquired> {
        self.transition(SessionState::Authorizing);

        let config = self.load_config()?;
        let mut cache = TokenCache::new();
        let state = new_state_token();
        let pkce = PkcePair::generate();

        let listener = bind_redirect_listener(&config.redirect_host, config.redirect_port).await?;
        let redirect_uri = config.redirect_uri_for_port(listener.port());
        let url = self.client.build_authorization_url(
            &config,
            previous.unwrap_or(&cache),
            &state,
            &redirect_uri,
            &pkce,
        )?;
        tracing::info!(redirect_uri = %redirect_uri, "waiting for authorization redirect");

        self.user_agent.navigate(&url)?;
        let captured = wait_for_redirect(listener, self.redirect_timeout(&config)).await?;
        let code = captured.authorization_code(&config.redirect_path, &state)?;

        let token = self
            .client
            .exchange_code(&config, &mut cache, &code, &redirect_uri, &pkce)
            .await?;
        self.transition(SessionState::Authorized);

        Ok(Acquired {
            config,
            cache,
            token,
        })
    }
}
