use thiserror::Error;

/// Raw failure raised by the remote management boundary.
///
/// These are transport- and protocol-shaped: they say what went wrong on the
/// wire, not what it means for the model. `rulesync-core` classifies them
/// into typed model errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, TLS handshake, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Socket-level failure surfaced outside the HTTP stack.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup, handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// The device answered with a fault.
    ///
    /// `status` is the HTTP status (401 for rejected credentials), `reason`
    /// the device's own explanation, `body` the raw response for diagnostics.
    #[error("Remote fault (HTTP {status}): {reason}")]
    Fault {
        status: u16,
        reason: String,
        body: String,
    },

    /// The device does not know the object named in the request.
    #[error("Unknown object: {message}")]
    UnknownObject { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The response could not be decoded, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the device rejected the supplied credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Fault { status: 401, .. })
    }

    /// Returns `true` if the device reported the named object as missing.
    pub fn is_unknown_object(&self) -> bool {
        matches!(self, Self::UnknownObject { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Returns `true` for faults produced by the remote protocol layer.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Self::Fault { .. } | Self::UnknownObject { .. } | Self::Deserialization { .. }
        )
    }
}
