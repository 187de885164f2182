use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::api::{AuthApi, Credentials};
use crate::auth::token::TokenStore;
use crate::auth::AuthError;

/// Session claims as sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSession {
    pub user_id: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role_game: bool,
    #[serde(default)]
    pub role_admin: bool,
}

/// Cached authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Not checked yet, or invalidated
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Default)]
struct SessionState {
    auth: AuthState,
    claims: Option<ClientSession>,
}

/// Session controller
///
/// Owns the cached auth flag and session claims. The lock is only held for
/// reads and writes of the cache, never across a request.
pub struct SessionController {
    api: Arc<dyn AuthApi>,
    tokens: Arc<dyn TokenStore>,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub fn new(api: Arc<dyn AuthApi>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            api,
            tokens,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Log in with the given credentials
    ///
    /// On success the token is persisted and the session becomes
    /// authenticated. On failure the cached state is left untouched.
    pub async fn login(&self, credentials: &Credentials) -> Result<ClientSession, AuthError> {
        let response = match self.api.login(credentials).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Login failed for user {}: {}", credentials.user, e);
                return Err(e);
            }
        };

        self.tokens.set(&response.token)?;

        let mut state = self.state.lock();
        state.auth = AuthState::Authenticated;
        state.claims = Some(response.session.clone());
        info!("Logged in as user {}", response.session.user_id);

        Ok(response.session)
    }

    /// Forget the persisted token
    ///
    /// The server session is not invalidated here; the next validation
    /// runs without a token and resolves unauthenticated.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.tokens.clear()?;
        let mut state = self.state.lock();
        state.auth = AuthState::Unknown;
        state.claims = None;
        info!("Logged out");
        Ok(())
    }

    /// Cached auth flag, validating with the server only when unknown
    pub async fn is_auth(&self) -> Result<bool, AuthError> {
        match self.auth_state() {
            AuthState::Authenticated => Ok(true),
            AuthState::Unauthenticated => Ok(false),
            AuthState::Unknown => self.check_auth().await,
        }
    }

    /// Validate the stored token with the server and update the cache
    ///
    /// Without a stored token this resolves `false` without a request.
    pub async fn check_auth(&self) -> Result<bool, AuthError> {
        let token = match self.tokens.get() {
            Some(token) => token,
            None => {
                debug!("No session token stored, not authenticated");
                self.set_unauthenticated();
                return Ok(false);
            }
        };

        let response = self.api.validate(&token).await?;
        let valid = response.as_ref().map_or(false, |r| r.is_valid());

        let mut state = self.state.lock();
        if valid {
            state.auth = AuthState::Authenticated;
            if let Some(session) = response.as_ref().and_then(|r| r.session()) {
                state.claims = Some(session.clone());
            }
        } else {
            debug!("Server rejected session token");
            state.auth = AuthState::Unauthenticated;
            state.claims = None;
        }

        Ok(valid)
    }

    /// Apply a `session` push from the socket
    ///
    /// A record marks the session authenticated, `None` invalidates it.
    pub fn apply_session(&self, session: Option<ClientSession>) {
        let mut state = self.state.lock();
        match session {
            Some(session) => {
                debug!("Received session for user {}", session.user_id);
                state.auth = AuthState::Authenticated;
                state.claims = Some(session);
            }
            None => {
                debug!("Received empty session, auth state reset");
                state.auth = AuthState::Unknown;
                state.claims = None;
            }
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.state.lock().auth
    }

    pub fn claims(&self) -> Option<ClientSession> {
        self.state.lock().claims.clone()
    }

    /// Current token, sent as the socket handshake
    pub fn token(&self) -> Option<String> {
        self.tokens.get()
    }

    pub fn has_role_game(&self) -> bool {
        self.state
            .lock()
            .claims
            .as_ref()
            .map_or(false, |c| c.role_game)
    }

    pub fn has_role_admin(&self) -> bool {
        self.state
            .lock()
            .claims
            .as_ref()
            .map_or(false, |c| c.role_admin)
    }

    fn set_unauthenticated(&self) {
        let mut state = self.state.lock();
        state.auth = AuthState::Unauthenticated;
        state.claims = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::api::{LoginResponse, ValidateResponse};
    use crate::auth::token::MemoryTokenStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn game_session(user_id: u32) -> ClientSession {
        ClientSession {
            user_id,
            name: Some(format!("Team {}", user_id)),
            role_game: true,
            role_admin: false,
        }
    }

    /// Auth API fake counting round-trips
    #[derive(Default)]
    pub(crate) struct FakeAuthApi {
        pub logins: AtomicUsize,
        pub validations: AtomicUsize,
        pub valid_token: Option<String>,
        pub answer_with_session: bool,
    }

    impl FakeAuthApi {
        pub(crate) fn accepting(token: &str) -> Self {
            Self {
                valid_token: Some(token.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AuthApi for FakeAuthApi {
        async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            match (&self.valid_token, credentials.password.as_str()) {
                (Some(token), "secret") => Ok(LoginResponse {
                    token: token.clone(),
                    session: game_session(credentials.user),
                }),
                _ => Err(AuthError::Rejected("Incorrect password".to_string())),
            }
        }

        async fn validate(&self, token: &str) -> Result<Option<ValidateResponse>, AuthError> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            if self.valid_token.as_deref() != Some(token) {
                return Ok(None);
            }
            if self.answer_with_session {
                Ok(Some(ValidateResponse::Session(game_session(1))))
            } else {
                Ok(Some(ValidateResponse::Flag(true)))
            }
        }
    }

    fn controller(api: Arc<FakeAuthApi>, tokens: Arc<MemoryTokenStore>) -> SessionController {
        SessionController::new(api, tokens)
    }

    #[tokio::test]
    async fn test_login_success() {
        let api = Arc::new(FakeAuthApi::accepting("tok"));
        let tokens = Arc::new(MemoryTokenStore::new());
        let session = controller(api, tokens.clone());

        let credentials = Credentials {
            user: 2,
            password: "secret".to_string(),
        };
        let claims = session.login(&credentials).await.unwrap();

        assert_eq!(claims.user_id, 2);
        assert_eq!(tokens.get().as_deref(), Some("tok"));
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert!(session.has_role_game());
        assert!(!session.has_role_admin());
    }

    #[tokio::test]
    async fn test_login_failure_leaves_state() {
        let api = Arc::new(FakeAuthApi::accepting("tok"));
        let tokens = Arc::new(MemoryTokenStore::new());
        let session = controller(api, tokens.clone());

        let credentials = Credentials {
            user: 2,
            password: "wrong".to_string(),
        };
        let err = session.login(&credentials).await.unwrap_err();

        assert_eq!(err.to_string(), "Incorrect password");
        assert_eq!(session.auth_state(), AuthState::Unknown);
        assert!(tokens.get().is_none());
        assert!(session.claims().is_none());
    }

    #[tokio::test]
    async fn test_is_auth_cached() {
        let api = Arc::new(FakeAuthApi::accepting("tok"));
        let tokens = Arc::new(MemoryTokenStore::with_token("tok"));
        let session = controller(api.clone(), tokens);

        assert!(session.is_auth().await.unwrap());
        assert!(session.is_auth().await.unwrap());
        assert_eq!(api.validations.load(Ordering::SeqCst), 1);

        // check_auth always round-trips
        assert!(session.check_auth().await.unwrap());
        assert_eq!(api.validations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_check_auth_without_token() {
        let api = Arc::new(FakeAuthApi::accepting("tok"));
        let session = controller(api.clone(), Arc::new(MemoryTokenStore::new()));

        assert!(!session.check_auth().await.unwrap());
        assert_eq!(api.validations.load(Ordering::SeqCst), 0);
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_check_auth_rejected_token() {
        let api = Arc::new(FakeAuthApi::accepting("tok"));
        let session = controller(api, Arc::new(MemoryTokenStore::with_token("stale")));

        assert!(!session.is_auth().await.unwrap());
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
        assert!(!session.has_role_game());
    }

    #[tokio::test]
    async fn test_check_auth_session_record_sets_claims() {
        let api = Arc::new(FakeAuthApi {
            answer_with_session: true,
            ..FakeAuthApi::accepting("tok")
        });
        let session = controller(api, Arc::new(MemoryTokenStore::with_token("tok")));

        assert!(session.check_auth().await.unwrap());
        assert_eq!(session.claims().unwrap().user_id, 1);
        assert!(session.has_role_game());
    }

    #[tokio::test]
    async fn test_logout_revalidates() {
        let api = Arc::new(FakeAuthApi::accepting("tok"));
        let tokens = Arc::new(MemoryTokenStore::with_token("tok"));
        let session = controller(api.clone(), tokens.clone());

        assert!(session.is_auth().await.unwrap());
        session.logout().unwrap();

        assert!(tokens.get().is_none());
        assert_eq!(session.auth_state(), AuthState::Unknown);
        assert!(!session.is_auth().await.unwrap());
        // No token, so no second round-trip
        assert_eq!(api.validations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_session_push() {
        let session = controller(
            Arc::new(FakeAuthApi::default()),
            Arc::new(MemoryTokenStore::new()),
        );

        session.apply_session(Some(ClientSession {
            role_admin: true,
            ..game_session(5)
        }));
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert!(session.has_role_admin());

        session.apply_session(None);
        assert_eq!(session.auth_state(), AuthState::Unknown);
        assert!(!session.has_role_admin());
        assert!(!session.has_role_game());
    }
}
