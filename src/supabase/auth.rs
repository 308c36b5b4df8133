use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::ProjectClient;
use crate::backend::IdentityProvider;
use crate::errors::AppError;
use crate::models::session::{Session, User};

/// Error body shapes GoTrue uses across versions.
#[derive(Debug, Default, Deserialize)]
struct GoTrueError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub(crate) async fn identity_error(response: Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: GoTrueError = serde_json::from_str(&body).unwrap_or_default();

    let message = parsed
        .msg
        .or(parsed.error_description)
        .or(parsed.message)
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        });

    AppError::Identity {
        status: Some(status.as_u16()),
        code: parsed.error_code.or(parsed.error),
        message,
    }
}

/// Identity provider backed by the project's GoTrue service.
///
/// The session lives in memory on the shared [`ProjectClient`]; it is not
/// persisted across processes.
pub struct GoTrueAuth {
    project: ProjectClient,
}

impl GoTrueAuth {
    pub fn new(project: ProjectClient) -> Self {
        Self { project }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AppError> {
        let mut url = self.project.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");

        let anon = self.project.anon_key().to_string();
        let response = self
            .project
            .request_as(Method::POST, url, &anon)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(identity_error(response).await);
        }

        let session: Session = response.json().await?;
        self.project.set_session(Some(session.clone()));
        Ok(session)
    }
}

/// Sign-up answers with a session when autoconfirm is on, with the bare
/// user otherwise.
fn signup_user(body: &Value) -> Result<Option<User>, AppError> {
    if let Some(user) = body.get("user").filter(|u| !u.is_null()) {
        return Ok(Some(serde_json::from_value(user.clone())?));
    }
    if body.get("id").is_some_and(|id| !id.is_null()) {
        return Ok(Some(serde_json::from_value(body.clone())?));
    }
    Ok(None)
}

#[async_trait]
impl IdentityProvider for GoTrueAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        let url = self.project.endpoint("auth/v1/signup")?;
        let anon = self.project.anon_key().to_string();
        let response = self
            .project
            .request_as(Method::POST, url, &anon)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(identity_error(response).await);
        }

        let body: Value = response.json().await?;
        if body.get("access_token").is_some_and(Value::is_string) {
            let session: Session = serde_json::from_value(body.clone())?;
            self.project.set_session(Some(session));
        }
        let user = signup_user(&body)?;
        debug!(email, created = user.is_some(), "sign-up answered");
        Ok(user)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let mut url = self.project.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let anon = self.project.anon_key().to_string();
        let response = self
            .project
            .request_as(Method::POST, url, &anon)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(identity_error(response).await);
        }

        let session: Session = response.json().await?;
        self.project.set_session(Some(session.clone()));
        info!(user_id = %session.user.id, "session established");
        Ok(session)
    }

    /// The stored session. An expired one is refreshed when it carries a
    /// refresh token, dropped otherwise.
    async fn session(&self) -> Result<Option<Session>, AppError> {
        let Some(session) = self.project.session() else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        match session.refresh_token.as_deref() {
            Some(token) => match self.refresh(token).await {
                Ok(fresh) => {
                    debug!(user_id = %fresh.user.id, "session refreshed");
                    Ok(Some(fresh))
                }
                Err(e) => {
                    warn!(user_id = %session.user.id, error = %e, "session refresh failed, signing out locally");
                    self.project.set_session(None);
                    Ok(None)
                }
            },
            None => {
                self.project.set_session(None);
                Ok(None)
            }
        }
    }

    async fn user(&self) -> Result<Option<User>, AppError> {
        let Some(session) = self.session().await? else {
            return Ok(None);
        };

        let url = self.project.endpoint("auth/v1/user")?;
        let response = self
            .project
            .request_as(Method::GET, url, &session.access_token)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(Some(response.json().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!(user_id = %session.user.id, "access token rejected, clearing session");
                self.project.set_session(None);
                Ok(None)
            }
            _ => Err(identity_error(response).await),
        }
    }

    /// Drops the local session first, then revokes it server-side.
    async fn sign_out(&self) -> Result<(), AppError> {
        let Some(session) = self.project.set_session(None) else {
            return Ok(());
        };

        let url = self.project.endpoint("auth/v1/logout")?;
        let response = self
            .project
            .request_as(Method::POST, url, &session.access_token)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => {
                info!(user_id = %session.user.id, "signed out");
                Ok(())
            }
            // Already invalid upstream; the local sign-out stands.
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(identity_error(response).await),
        }
    }
}
