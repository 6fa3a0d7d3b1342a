// ── Core error types ──
//
// User-facing errors from rulesync-core. Consumers never see raw transport
// failures directly: the classifier turns every `rulesync_api::Error` into
// a `ModelException` naming the entity it happened to.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::code::Problem;
use crate::config::DeviceKey;

/// Closed taxonomy of model failures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelError {
    ConnectionRefused,
    CannotResolve,
    SslError,
    AuthFailed,
    BadResponse,
    ElementExists,
    NoCapability,
    Internal,
    Unknown,
}

/// The entity a failure is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum EntityRef {
    Controller,
    Device(DeviceKey),
    Rule { device: DeviceKey, name: String },
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => f.write_str("controller"),
            Self::Device(key) => write!(f, "device {key}"),
            Self::Rule { device, name } => write!(f, "rule '{name}' on {device}"),
        }
    }
}

/// A typed model failure. Immutable once built.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ModelException {
    kind: ModelError,
    message: String,
    entity: EntityRef,
    #[source]
    cause: Option<Arc<rulesync_api::Error>>,
}

impl ModelException {
    pub fn new(kind: ModelError, message: impl Into<String>, entity: EntityRef) -> Self {
        Self {
            kind,
            message: message.into(),
            entity,
            cause: None,
        }
    }

    pub(crate) fn caused_by(
        kind: ModelError,
        message: impl Into<String>,
        entity: EntityRef,
        cause: rulesync_api::Error,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            entity,
            cause: Some(Arc::new(cause)),
        }
    }

    pub(crate) fn internal(message: impl Into<String>, entity: EntityRef) -> Self {
        Self::new(ModelError::Internal, message, entity)
    }

    pub fn kind(&self) -> ModelError {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn cause(&self) -> Option<&rulesync_api::Error> {
        self.cause.as_deref()
    }
}

/// Failure of a user-initiated edit.
///
/// Local validation failures are kept apart from `ModelException`: they are
/// raised before anything is sent to the device.
#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Model(#[from] ModelException),

    #[error("rule code has {} error(s)", .problems.iter().filter(|p| p.is_error).count())]
    ErrorsInCode { problems: Vec<Problem> },

    #[error("invalid rule name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

impl EditError {
    /// The model failure behind this error, if it is one.
    pub fn as_model(&self) -> Option<&ModelException> {
        match self {
            Self::Model(e) => Some(e),
            _ => None,
        }
    }
}
