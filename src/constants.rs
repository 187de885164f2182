/// Wire protocol constants
pub mod protocol {
    /// Status tag on every post-handshake envelope
    pub const STATUS_OK: &str = "ok";
    /// Status tag on error envelopes
    pub const STATUS_ERR: &str = "err";
    /// Label written by an optimistic upgrade until the server sends the real one
    pub const PENDING_LABEL: &str = "sync";
}

/// Connection lifecycle timing
pub mod net {
    use std::time::Duration;

    /// Default fixed delay before reconnecting after any close
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);
    /// Socket path appended to the page origin
    pub const WS_PATH: &str = "/ws";
}

/// Game state polling
pub mod game {
    use std::time::Duration;

    /// Backstop poll of the full inventory (5 minutes)
    pub const INVENTORY_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
}

/// Authentication endpoints
pub mod auth {
    /// Prefix of the HTTP API relative to the origin
    pub const API_PATH: &str = "/api";
    /// Login endpoint relative to the API prefix
    pub const LOGIN_PATH: &str = "/auth/login";
    /// Session validation endpoint relative to the API prefix
    pub const VALIDATE_PATH: &str = "/auth/validate";
}
