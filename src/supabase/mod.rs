//! Adapters for a hosted Supabase project.
//!
//! - [`auth::GoTrueAuth`]: identity over `/auth/v1`
//! - [`rest::PostgrestStore`]: rows over `/rest/v1`
//! - [`realtime::RealtimeFeed`]: inserts over the `/realtime/v1` socket
//!
//! All three share one [`ProjectClient`], which holds the HTTP client and
//! the locally stored session. Requests carry the project's anon key and,
//! once signed in, the user's access token.

pub mod auth;
pub mod realtime;
pub mod rest;
pub mod retry;

use std::sync::{Arc, RwLock};

use reqwest::{Client, Method, RequestBuilder};
use url::Url;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::session::Session;

pub use auth::GoTrueAuth;
pub use realtime::RealtimeFeed;
pub use rest::PostgrestStore;
pub use retry::RetryPolicy;

/// Connection to one Supabase project, shared by the adapters.
#[derive(Clone)]
pub struct ProjectClient {
    http: Client,
    base: Url,
    anon_key: Arc<Zeroizing<String>>,
    session: Arc<RwLock<Option<Session>>>,
    retry: RetryPolicy,
}

impl ProjectClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let base = Url::parse(&format!("{}/", config.supabase_url.trim_end_matches('/')))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid SUPABASE_URL: {}", e)))?;

        let http = Client::builder()
            .use_rustls_tls()
            .timeout(config.http_timeout)
            .user_agent(concat!("carebloom/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            anon_key: Arc::new(Zeroizing::new(config.anon_key.clone())),
            session: Arc::new(RwLock::new(None)),
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn anon_key(&self) -> &str {
        self.anon_key.as_str()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// `path` is relative to the project root, e.g. `rest/v1/notifications`.
    pub fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid endpoint '{}': {}", path, e)))
    }

    /// Request with the project headers. Bearer is the session's access
    /// token when signed in, the anon key otherwise.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.request_as(method, url, &self.bearer())
    }

    pub fn request_as(&self, method: Method, url: Url, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", self.anon_key.as_str())
            .bearer_auth(bearer)
    }

    pub fn bearer(&self) -> String {
        self.session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.to_string())
    }

    pub fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_session(&self, session: Option<Session>) -> Option<Session> {
        let mut slot = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, session)
    }
}

/// The three adapters over one project.
#[derive(Clone)]
pub struct Supabase {
    pub auth: Arc<GoTrueAuth>,
    pub rest: Arc<PostgrestStore>,
    pub realtime: Arc<RealtimeFeed>,
}

impl Supabase {
    pub fn connect(config: &Config) -> Result<Self, AppError> {
        let project = ProjectClient::new(config)?;
        tracing::debug!(url = %project.base_url(), "supabase project client ready");
        Ok(Self {
            auth: Arc::new(GoTrueAuth::new(project.clone())),
            rest: Arc::new(PostgrestStore::new(project.clone())),
            realtime: Arc::new(RealtimeFeed::new(project, config.http_timeout)),
        })
    }
}
