#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use axum::extract::{Form, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oauth2ms_lib::infra::encryption::EncryptionBackend;
use oauth2ms_lib::oauth::browser::UserAgent;
use oauth2ms_lib::oauth::client::AuthorizationClient;
use oauth2ms_lib::{AppResult, Session, SessionOptions};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const USERNAME: &str = "alice@example.com";
pub const GOOD_CODE: &str = "auth-code-ok";
pub const SCOPE: &str = "https://outlook.office.com/IMAP.AccessAsUser.All";

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn save_once(&mut self, key: &'static str) {
        if self.saved.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.saved.push((key, std::env::var_os(key)));
    }

    fn set_var(&mut self, key: &'static str, value: impl Into<OsString>) {
        self.save_once(key);
        std::env::set_var(key, value.into());
    }

    fn remove_var(&mut self, key: &'static str) {
        self.save_once(key);
        std::env::remove_var(key);
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

/// Isolated HOME with every XDG variable cleared; restores the environment on drop.
pub struct TestEnv {
    _lock: MutexGuard<'static, ()>,
    env: EnvRestore,
    home: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let lock = env_lock();
        let home = tempfile::tempdir().expect("tempdir");

        let mut env = EnvRestore::default();
        let home_os = home.path().as_os_str().to_os_string();
        env.set_var("HOME", home_os.clone());
        env.set_var("USERPROFILE", home_os);
        env.remove_var("XDG_CONFIG_HOME");
        env.remove_var("XDG_CONFIG_DIRS");
        env.remove_var("XDG_DATA_HOME");

        Self {
            _lock: lock,
            env,
            home,
        }
    }

    pub fn set_var(&mut self, key: &'static str, value: impl Into<OsString>) {
        self.env.set_var(key, value);
    }

    pub fn home_dir(&self) -> &Path {
        self.home.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct IdpBehavior {
    pub expires_in: i64,
    pub reject_refresh: bool,
}

impl Default for IdpBehavior {
    fn default() -> Self {
        Self {
            expires_in: 3600,
            reject_refresh: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub tenant: String,
    pub form: HashMap<String, String>,
}

impl TokenRequest {
    pub fn grant_type(&self) -> &str {
        self.form.get("grant_type").map(String::as_str).unwrap_or("")
    }
}

#[derive(Default)]
struct IdpState {
    behavior: Mutex<IdpBehavior>,
    requests: Mutex<Vec<TokenRequest>>,
    issued: Mutex<usize>,
}

pub fn encode_segment(value: &Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

pub fn fake_id_token() -> String {
    format!(
        "{}.{}.sig",
        encode_segment(&json!({"alg": "none", "typ": "JWT"})),
        encode_segment(&json!({
            "oid": "oid-1",
            "tid": "tid-1",
            "preferred_username": USERNAME
        }))
    )
}

fn error_body(error: &str, description: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": error, "error_description": description})),
    )
}

async fn token_endpoint(
    State(state): State<Arc<IdpState>>,
    UrlPath(tenant): UrlPath<String>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let behavior = state.behavior.lock().expect("behavior").clone();
    state.requests.lock().expect("requests").push(TokenRequest {
        tenant,
        form: form.clone(),
    });

    let grant_type = form.get("grant_type").map(String::as_str).unwrap_or("");
    let accepted = match grant_type {
        "authorization_code" => {
            form.get("code").map(String::as_str) == Some(GOOD_CODE)
                && form.get("code_verifier").is_some_and(|v| v.len() >= 43)
                && form.contains_key("redirect_uri")
        }
        "refresh_token" => {
            !behavior.reject_refresh
                && form
                    .get("refresh_token")
                    .is_some_and(|v| v.starts_with("rt-"))
        }
        _ => false,
    };
    if !accepted {
        return error_body("invalid_grant", "AADSTS70000: the provided grant is invalid");
    }

    let n = {
        let mut issued = state.issued.lock().expect("issued");
        *issued += 1;
        *issued
    };
    (
        StatusCode::OK,
        Json(json!({
            "token_type": "Bearer",
            "scope": format!("{SCOPE} openid profile offline_access"),
            "expires_in": behavior.expires_in,
            "ext_expires_in": behavior.expires_in,
            "access_token": format!("at-{n}"),
            "refresh_token": format!("rt-{n}"),
            "id_token": fake_id_token(),
            "client_info": encode_segment(&json!({"uid": "oid-1", "utid": "tid-1"})),
        })),
    )
}

/// Local stand-in for the identity provider's v2.0 token endpoint.
pub struct FakeIdp {
    pub base_url: String,
    state: Arc<IdpState>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeIdp {
    pub async fn start() -> Self {
        let state = Arc::new(IdpState::default());
        let app = Router::new()
            .route("/:tenant/oauth2/v2.0/token", post(token_endpoint))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake idp");
        let addr = listener.local_addr().expect("fake idp addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn set_behavior(&self, behavior: IdpBehavior) {
        *self.state.behavior.lock().expect("behavior") = behavior;
    }

    pub fn requests(&self) -> Vec<TokenRequest> {
        self.state.requests.lock().expect("requests").clone()
    }
}

impl Drop for FakeIdp {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Plays the browser: on navigation it sends the redirect the provider would issue.
pub struct RedirectingAgent {
    code: String,
    navigations: Cell<usize>,
    last_url: RefCell<Option<String>>,
}

impl RedirectingAgent {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            navigations: Cell::new(0),
            last_url: RefCell::new(None),
        }
    }

    pub fn navigations(&self) -> usize {
        self.navigations.get()
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.borrow().clone()
    }

    pub fn last_param(&self, key: &str) -> Option<String> {
        let url = reqwest::Url::parse(&self.last_url()?).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

impl UserAgent for RedirectingAgent {
    fn navigate(&self, url: &str) -> AppResult<()> {
        self.navigations.set(self.navigations.get() + 1);
        *self.last_url.borrow_mut() = Some(url.to_string());

        let parsed = reqwest::Url::parse(url).expect("authorization url");
        let param = |key: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .expect("authorization url param")
        };
        let mut redirect = reqwest::Url::parse(&param("redirect_uri")).expect("redirect_uri");
        redirect
            .query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &param("state"))
            .append_pair("session_state", "s-1");

        tokio::spawn(async move {
            let _ = reqwest::get(redirect).await;
        });
        Ok(())
    }
}

pub struct ReverseCipher;

pub const CIPHER_ARMOR: &str = "-----TEST CIPHER-----\n";

impl EncryptionBackend for ReverseCipher {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        Ok(format!(
            "{CIPHER_ARMOR}{}",
            plaintext.chars().rev().collect::<String>()
        ))
    }

    fn decrypt(&self, ciphertext: &str) -> AppResult<String> {
        ciphertext
            .strip_prefix(CIPHER_ARMOR)
            .map(|body| body.chars().rev().collect())
            .ok_or_else(|| "ENCRYPTION_ERROR: input was not produced by the test cipher".into())
    }
}

/// Workspace with a config pointing at `authority_host` and an ephemeral redirect port.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new(authority_host: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = json!({
            "tenant_id": "contoso",
            "client_id": "client-123",
            "client_secret": "s3cret",
            "scopes": [SCOPE],
            "redirect_host": "127.0.0.1",
            "redirect_port": 0,
            "redirect_path": "/getToken/",
            "authority_host": authority_host,
            "redirect_timeout_secs": 10
        });
        std::fs::write(dir.path().join("config.json"), config.to_string()).expect("write config");
        Self { dir }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.path().join("data").join("credentials.bin")
    }

    pub fn options(&self, encode_xoauth2: bool) -> SessionOptions {
        SessionOptions {
            config_path: Some(self.config_path()),
            credentials_path: self.credentials_path(),
            encode_xoauth2,
            redirect_timeout_secs: None,
        }
    }

    pub fn credentials_text(&self) -> Option<String> {
        std::fs::read_to_string(self.credentials_path()).ok()
    }

    pub async fn run(
        &self,
        agent: &dyn UserAgent,
        encryption: Option<&dyn EncryptionBackend>,
        encode_xoauth2: bool,
    ) -> AppResult<String> {
        let client = AuthorizationClient::new()?;
        let mut session = Session::new(self.options(encode_xoauth2), client, agent, encryption);
        session.run().await
    }
}
