use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::session::{Authenticator, InstagramSession, SessionError, SessionResult};
use super::{IG_APP_ID, INSTAGRAM_BASE};

/// Logs in through the public web login form.
pub struct WebLoginAuthenticator {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    two_factor_required: bool,
    #[serde(default)]
    checkpoint_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WebLoginAuthenticator {
    pub fn new(user_agent: &str) -> SessionResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SessionError::Login(err.to_string()))?;
        Ok(Self {
            client,
            base_url: INSTAGRAM_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn bootstrap_csrf(&self) -> SessionResult<String> {
        let url = format!("{}/accounts/login/", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SessionError::Login(err.to_string()))?;
        response_cookies(response.headers())
            .remove("csrftoken")
            .ok_or_else(|| SessionError::Login("login page did not set csrftoken".into()))
    }
}

#[async_trait]
impl Authenticator for WebLoginAuthenticator {
    async fn login(&self, username: &str, password: &str) -> SessionResult<InstagramSession> {
        let csrf = self.bootstrap_csrf().await?;
        let enc_password = format!("#PWD_INSTAGRAM_BROWSER:0:{}:{}", Utc::now().timestamp(), password);
        let body = format!(
            "username={}&enc_password={}&queryParams=%7B%7D&optIntoOneTap=false",
            urlencoding::encode(username),
            urlencoding::encode(&enc_password)
        );
        let url = format!("{}/api/v1/web/accounts/login/ajax/", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-CSRFToken", &csrf)
            .header("X-IG-App-ID", IG_APP_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Referer", format!("{}/accounts/login/", self.base_url))
            .header("Cookie", format!("csrftoken={csrf}"))
            .body(body)
            .send()
            .await
            .map_err(|err| SessionError::Login(err.to_string()))?;

        let mut cookies = response_cookies(response.headers());
        let status = response.status();
        let payload: LoginResponse = response
            .json()
            .await
            .map_err(|err| SessionError::Login(format!("unexpected login response ({status}): {err}")))?;

        if payload.two_factor_required {
            return Err(SessionError::Login("two-factor authentication required".into()));
        }
        if let Some(checkpoint) = payload.checkpoint_url {
            warn!(username, checkpoint = %checkpoint, "instagram login hit a checkpoint");
            return Err(SessionError::Login("account checkpoint required".into()));
        }
        if !payload.authenticated {
            return Err(SessionError::Login(
                payload
                    .message
                    .unwrap_or_else(|| "credentials rejected".to_string()),
            ));
        }
        cookies.entry("csrftoken".to_string()).or_insert(csrf);
        debug!(username, cookies = cookies.len(), "instagram login succeeded");
        Ok(InstagramSession::new(username, cookies))
    }
}

fn response_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(_, value)| !value.is_empty() && value != "\"\"")
        .collect()
}
