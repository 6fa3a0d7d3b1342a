//! CLI error types with miette diagnostics.
//!
//! Maps `ModelException`, `EditError` and `ConfigError` into user-facing
//! errors with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use rulesync_config::ConfigError;
use rulesync_core::{EditError, ModelError, ModelException, Problem};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const INVALID_CODE: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to {device}: {message}")]
    #[diagnostic(
        code(rulesync::connection_failed),
        help(
            "Check that the device is running and its admin port is reachable.\n\
             Profiles live in: rulesync config path"
        )
    )]
    ConnectionFailed { device: String, message: String },

    #[error("TLS verification failed for {device}: {message}")]
    #[diagnostic(
        code(rulesync::tls_error),
        help(
            "Appliances usually ship a self-signed certificate.\n\
             Use --insecure (-k) to accept it, or set ca_cert in the device profile."
        )
    )]
    TlsError { device: String, message: String },

    #[error("Device {device} is offline")]
    #[diagnostic(
        code(rulesync::offline),
        help("The profile has `connect = false`. Edit it with: rulesync config show")
    )]
    Offline { device: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed for {device}")]
    #[diagnostic(
        code(rulesync::auth_failed),
        help("Update the stored password with: rulesync config set-password")
    )]
    AuthFailed { device: String },

    #[error("No password available for {device}")]
    #[diagnostic(
        code(rulesync::no_credentials),
        help(
            "Store one with: rulesync config set-password\n\
             or name an environment variable with `password_env` in the profile."
        )
    )]
    NoCredentials { device: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(rulesync::not_found),
        help("Run: rulesync {list_command} to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{message}")]
    #[diagnostic(code(rulesync::conflict))]
    Conflict { message: String },

    #[error("{device} cannot host rules: {message}")]
    #[diagnostic(
        code(rulesync::no_capability),
        help("The appliance is not licensed for scripting.")
    )]
    Unsupported { device: String, message: String },

    // ── Rule code ────────────────────────────────────────────────────

    #[error("Rule code has {count} error(s)")]
    #[diagnostic(code(rulesync::errors_in_code), help("{details}"))]
    ErrorsInCode { count: usize, details: String },

    // ── Remote ───────────────────────────────────────────────────────

    #[error("{kind}: {message}")]
    #[diagnostic(code(rulesync::remote))]
    Remote { kind: ModelError, message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(rulesync::validation))]
    Validation { field: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(rulesync::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No device selected")]
    #[diagnostic(
        code(rulesync::no_device),
        help(
            "Pass --profile <name>, set default_device, or add one with:\n\
             rulesync config add-device <name> --host <host> --username <user>"
        )
    )]
    NoDevice,

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(rulesync::profile_not_found),
        help("Run: rulesync devices to list configured profiles")
    )]
    ProfileNotFound { name: String },

    #[error(transparent)]
    #[diagnostic(code(rulesync::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(rulesync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::TlsError { .. } | Self::Offline { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::ErrorsInCode { .. } => exit_code::INVALID_CODE,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } | Self::NoDevice => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }

    /// Build an `ErrorsInCode` listing every problem on its own line.
    pub fn errors_in_code(problems: &[Problem]) -> Self {
        let details = problems
            .iter()
            .map(|p| {
                let level = if p.is_error { "error" } else { "warning" };
                format!("line {}: {level}: {}", p.line, p.description)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self::ErrorsInCode {
            count: problems.iter().filter(|p| p.is_error).count(),
            details,
        }
    }
}

// ── Core / config → CliError mapping ─────────────────────────────────

impl From<ModelException> for CliError {
    fn from(err: ModelException) -> Self {
        let device = err.entity().to_string();
        let message = err.message().to_owned();
        match err.kind() {
            ModelError::ConnectionRefused | ModelError::CannotResolve => {
                Self::ConnectionFailed { device, message }
            }
            ModelError::SslError => Self::TlsError { device, message },
            ModelError::AuthFailed => Self::AuthFailed { device },
            ModelError::ElementExists => Self::Conflict { message },
            ModelError::NoCapability => Self::Unsupported { device, message },
            kind @ (ModelError::BadResponse | ModelError::Internal | ModelError::Unknown) => {
                Self::Remote { kind, message }
            }
        }
    }
}

impl From<EditError> for CliError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::Model(e) => e.into(),
            EditError::ErrorsInCode { problems } => Self::errors_in_code(&problems),
            EditError::InvalidName { name, reason } => Self::Validation {
                field: format!("rule name '{name}'"),
                reason,
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoDevice => Self::NoDevice,
            ConfigError::UnknownDevice { name } => Self::ProfileNotFound { name },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use rulesync_core::{DeviceKey, EntityRef};

    use super::*;

    fn model(kind: ModelError) -> ModelException {
        ModelException::new(
            kind,
            "boom",
            EntityRef::Device(DeviceKey::new("lb1.example.com", 9090)),
        )
    }

    #[test]
    fn model_errors_map_to_exit_codes() {
        let cases = [
            (ModelError::ConnectionRefused, exit_code::CONNECTION),
            (ModelError::CannotResolve, exit_code::CONNECTION),
            (ModelError::SslError, exit_code::CONNECTION),
            (ModelError::AuthFailed, exit_code::AUTH),
            (ModelError::ElementExists, exit_code::CONFLICT),
            (ModelError::NoCapability, exit_code::UNSUPPORTED),
            (ModelError::BadResponse, exit_code::GENERAL),
            (ModelError::Unknown, exit_code::GENERAL),
        ];
        for (kind, code) in cases {
            assert_eq!(CliError::from(model(kind)).exit_code(), code, "{kind}");
        }
    }

    #[test]
    fn errors_in_code_counts_only_errors() {
        let problem = |line, is_error| Problem {
            description: "bad".into(),
            line,
            start: 0,
            end: 1,
            is_error,
        };
        let err = CliError::errors_in_code(&[problem(1, true), problem(2, false)]);
        match &err {
            CliError::ErrorsInCode { count, details } => {
                assert_eq!(*count, 1);
                assert_eq!(details, "line 1: error: bad\nline 2: warning: bad");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.exit_code(), exit_code::INVALID_CODE);
    }
}
