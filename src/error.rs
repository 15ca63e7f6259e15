use thiserror::Error;

/// Errors raised while talking to the assistant service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure: connection refused, timeout, broken body.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured service address cannot be used to build endpoint URLs.
    #[error("invalid service address '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered 2xx but the payload did not make sense.
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("cannot resolve media URL: {0}")]
    Resolve(#[from] ClientError),

    #[error("failed to launch player '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no audio player configured")]
    NoPlayer,

    #[error("no ready audio for message #{0}")]
    NotReady(u64),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to resolve data directory")]
    NoDataDir,

    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a chat request is already in flight")]
    Busy,

    #[error("message is empty")]
    EmptyInput,

    #[error("chat request failed: {0}")]
    Chat(#[from] ClientError),
}
