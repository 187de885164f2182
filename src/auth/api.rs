//! HTTP authentication endpoints
//!
//! `POST {api}/auth/login` with credentials returns a token and session,
//! `POST {api}/auth/validate` with a token returns a falsy value for an
//! invalid session or a truthy one (boolean or session record) otherwise.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::auth::session::ClientSession;
use crate::auth::AuthError;
use crate::config::ClientConfig;
use crate::constants::auth::{LOGIN_PATH, VALIDATE_PATH};

/// Login form data
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub user: u32,
    pub password: String,
}

/// Token as returned by login, either a bare string or `{ "token": ... }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TokenField {
    Plain(String),
    Wrapped { token: String },
}

impl TokenField {
    fn into_string(self) -> String {
        match self {
            TokenField::Plain(token) | TokenField::Wrapped { token } => token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLoginResponse {
    token: TokenField,
    session: ClientSession,
}

/// Successful login
#[derive(Debug, Clone, PartialEq)]
pub struct LoginResponse {
    pub token: String,
    pub session: ClientSession,
}

impl From<RawLoginResponse> for LoginResponse {
    fn from(raw: RawLoginResponse) -> Self {
        Self {
            token: raw.token.into_string(),
            session: raw.session,
        }
    }
}

/// Validation answer, depending on server version
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValidateResponse {
    Flag(bool),
    Session(ClientSession),
}

impl ValidateResponse {
    pub fn is_valid(&self) -> bool {
        match self {
            ValidateResponse::Flag(valid) => *valid,
            ValidateResponse::Session(_) => true,
        }
    }

    pub fn session(&self) -> Option<&ClientSession> {
        match self {
            ValidateResponse::Session(session) => Some(session),
            ValidateResponse::Flag(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

/// Error body returned by the API
#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

/// Authentication endpoint contract
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Submit credentials, returns the opaque token and session claims
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError>;

    /// Validate a token; `None` means the server answered with null
    async fn validate(&self, token: &str) -> Result<Option<ValidateResponse>, AuthError>;
}

/// reqwest-backed auth endpoints
pub struct HttpAuthApi {
    client: Client,
    login_url: Url,
    validate_url: Url,
}

impl HttpAuthApi {
    pub fn new(login_url: Url, validate_url: Url) -> Self {
        Self {
            client: Client::new(),
            login_url,
            validate_url,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, AuthError> {
        let login_url = config
            .api_url(LOGIN_PATH)
            .map_err(|e| AuthError::Http(e.to_string()))?;
        let validate_url = config
            .api_url(VALIDATE_PATH)
            .map_err(|e| AuthError::Http(e.to_string()))?;
        Ok(Self::new(login_url, validate_url))
    }

    async fn rejection(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorMessage>(&body) {
            Ok(error) => AuthError::Rejected(error.message),
            Err(_) => {
                warn!("Auth API error without message: {} - {}", status, body);
                AuthError::Rejected(format!("Request failed ({})", status))
            }
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError> {
        debug!("Sending login request for user {}", credentials.user);

        let response = self
            .client
            .post(self.login_url.clone())
            .json(credentials)
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let raw: RawLoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(raw.into())
    }

    async fn validate(&self, token: &str) -> Result<Option<ValidateResponse>, AuthError> {
        let response = self
            .client
            .post(self.validate_url.clone())
            .json(&ValidateRequest { token })
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}
