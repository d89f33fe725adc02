use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::gateway::{GatewayError, GatewayResult};
use crate::config::ConfigError;

const AUTHORIZE_URL: &str = "https://www.amocrm.ru/oauth";
const BUTTON_SCRIPT: &str = "https://www.amocrm.ru/auth/button.min.js";

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp, seconds.
    pub expires: i64,
    pub base_domain: String,
}

impl AccessToken {
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires.saturating_sub(now) <= margin_secs
    }
}

/// JSON file holding the last issued token.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<AccessToken>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, token: &AccessToken) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(token)?)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    redirect_uri: &'a str,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

/// Talks to the CRM's OAuth 2.0 endpoints for one registered integration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    origin: Option<String>,
}

impl OAuthClient {
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            http: Client::new(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            origin: None,
        }
    }

    /// Sends token and account requests to `origin` instead of the account domain.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into().trim_end_matches('/').to_string());
        self
    }

    fn url(&self, base_domain: &str, path: &str) -> String {
        match &self.origin {
            Some(origin) => format!("{}{}", origin, path),
            None => format!("https://{}{}", base_domain, path),
        }
    }

    pub fn authorize_url(&self, state: &str) -> String {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("state", state),
            ("mode", "post_message"),
        ];
        match Url::parse_with_params(AUTHORIZE_URL, &params) {
            Ok(url) => url.to_string(),
            Err(_) => AUTHORIZE_URL.to_string(),
        }
    }

    /// The CRM's "install integration" button, opening consent in a popup.
    pub fn button_html(&self, state: &str) -> String {
        format!(
            concat!(
                "<div><script class=\"amocrm_oauth\" charset=\"utf-8\" ",
                "data-client-id=\"{client_id}\" data-title=\"Установить интеграцию\" ",
                "data-compact=\"true\" data-class-name=\"className\" data-color=\"default\" ",
                "data-state=\"{state}\" data-error-callback=\"handleOauthError\" ",
                "data-mode=\"popup\" src=\"{src}\"></script></div>"
            ),
            client_id = html_escape(&self.client_id),
            state = html_escape(state),
            src = BUTTON_SCRIPT,
        )
    }

    /// Name of the account the token was issued for.
    pub async fn account_name(&self, token: &AccessToken) -> GatewayResult<String> {
        let url = self.url(&token.base_domain, "/api/v4/account");
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", token.access_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let account: AccountResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("account: {}", e)))?;
        Ok(account.name)
    }

    pub async fn exchange_code(&self, base_domain: &str, code: &str) -> GatewayResult<AccessToken> {
        let request = TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "authorization_code",
            code: Some(code),
            refresh_token: None,
            redirect_uri: &self.redirect_uri,
        };
        self.request_token(base_domain, &request).await
    }

    pub async fn refresh(&self, token: &AccessToken) -> GatewayResult<AccessToken> {
        let request = TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "refresh_token",
            code: None,
            refresh_token: Some(&token.refresh_token),
            redirect_uri: &self.redirect_uri,
        };
        self.request_token(&token.base_domain, &request).await
    }

    async fn request_token(
        &self,
        base_domain: &str,
        request: &TokenRequest<'_>,
    ) -> GatewayResult<AccessToken> {
        let url = self.url(base_domain, "/oauth2/access_token");

        let response = self.http.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Unauthorized(format!(
                "token endpoint answered {}: {}",
                status, body
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("token response: {}", e)))?;

        Ok(AccessToken {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires: chrono::Utc::now().timestamp() + body.expires_in,
            base_domain: base_domain.to_string(),
        })
    }
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

type TokenCallback = Box<dyn Fn(&AccessToken) + Send + Sync>;

/// The current CRM credential: loaded at startup, injected into the REST
/// client, refreshed on demand and handed to `on_refresh` for persistence.
pub struct Credentials {
    oauth: OAuthClient,
    token: Mutex<Option<AccessToken>>,
    on_refresh: Option<TokenCallback>,
}

impl Credentials {
    pub fn new(oauth: OAuthClient, token: Option<AccessToken>) -> Self {
        Self {
            oauth,
            token: Mutex::new(token),
            on_refresh: None,
        }
    }

    /// Called with every newly issued token, including installed ones.
    pub fn on_refresh(mut self, callback: impl Fn(&AccessToken) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Box::new(callback));
        self
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    pub async fn install(&self, token: AccessToken) {
        log::info!("Installing CRM token for {}", token.base_domain);
        self.notify(&token);
        *self.token.lock().await = Some(token);
    }

    /// A token valid for at least the refresh margin.
    pub async fn bearer(&self) -> GatewayResult<AccessToken> {
        let mut guard = self.token.lock().await;
        let token = guard.as_ref().ok_or_else(|| {
            GatewayError::Unauthorized("no access token installed".to_string())
        })?;

        if !token.expires_within(chrono::Utc::now().timestamp(), REFRESH_MARGIN_SECS) {
            return Ok(token.clone());
        }

        log::info!("Refreshing CRM access token for {}", token.base_domain);
        let fresh = self.oauth.refresh(token).await?;
        self.notify(&fresh);
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    fn notify(&self, token: &AccessToken) {
        if let Some(callback) = &self.on_refresh {
            callback(token);
        }
    }
}
