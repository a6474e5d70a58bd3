use std::path::PathBuf;

/// Core error type for QR Mate.
///
/// Adapter crates (HTTP, QR, Telegram) map their specific errors into this type
/// so the orchestrator can classify failures (retryable 5xx vs user-facing).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("qr error: {0}")]
    Qr(String),

    #[error("store error: {path}: {reason}")]
    Store { path: PathBuf, reason: String },

    #[error("api error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("direct connect locked: similarity {score} is below {threshold}")]
    Locked { score: u8, threshold: u8 },

    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// HTTP status carried by an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 5xx responses are ambiguous: the backend may have committed the write.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(s) if (500..600).contains(&s))
    }

    /// Backend reported that the two users are already connected.
    ///
    /// Prefers the structured `code`; falls back to matching the message text for
    /// backends that only return a human-readable detail.
    pub fn is_already_connected(&self) -> bool {
        let Error::Api { code, message, .. } = self else {
            return false;
        };
        if let Some(code) = code {
            if code.eq_ignore_ascii_case("already_connected") {
                return true;
            }
        }
        let lower = message.to_lowercase();
        lower.contains("already") && (lower.contains("connect") || lower.contains("exist"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
