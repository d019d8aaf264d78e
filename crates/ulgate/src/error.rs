//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use ulgate_config::ConfigError;
use ulgate_core::CoreError;

/// Process exit codes. Clap exits with 2 on usage errors.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const DATA: i32 = 4;
    pub const STARTUP: i32 = 5;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(ulgate::no_config),
        help("Check the --config path, or run `ulgate config path` to see the default location.")
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(ulgate::validation),
        help("Fix the value in the config file or the matching ULGATE_ environment variable.")
    )]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(ulgate::config))]
    Config(ConfigError),

    // ── Payloads ─────────────────────────────────────────────────────
    #[error("Could not decode payload: {source}")]
    #[diagnostic(
        code(ulgate::decode),
        help("Check the payload against the chosen --encoding.")
    )]
    Decode {
        #[source]
        source: CoreError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Gateway failed to start: {source}")]
    #[diagnostic(
        code(ulgate::startup),
        help("Check that the listen ports are free and the broker URL is reachable.")
    )]
    Startup {
        #[source]
        source: CoreError,
    },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(ulgate::json))]
    Json(#[from] serde_json::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Validation { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Decode { .. } => exit_code::DATA,
            Self::Startup { .. } => exit_code::STARTUP,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_exit_with_config_code() {
        let err = CliError::from(ConfigError::Validation {
            field: "http.port".into(),
            reason: "must not be zero".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONFIG);
        assert!(err.to_string().contains("http.port"));
    }
}
