//! Authentication: session controller, auth endpoints and token storage

pub mod api;
pub mod session;
pub mod token;

pub use api::{AuthApi, Credentials, HttpAuthApi, LoginResponse, ValidateResponse};
pub use session::{AuthState, ClientSession, SessionController};
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore, TokenStoreError};

/// Authentication errors, the only errors surfaced to callers of this crate
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Rejected(String),
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Invalid auth response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
}
