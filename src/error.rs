/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Syn-Pilot-Core error types to provide consistent
    diagnostics, callback error codes, and exit semantics.

  Security / Safety Notes:
    Error contexts carry composer stderr verbatim for operator
    diagnostics; no credentials or tokens are ever embedded.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate recoverable failures,
    derive machine-readable callback codes, and consolidate
    exit codes for the binary entry point.

  Revision History:
    2025-06-17 COD  Established shared error definitions.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Syn-Pilot-Core operations.
pub type Result<T> = std::result::Result<T, SynpilotError>;

/// Enumerates high-level error domains surfaced by Syn-Pilot-Core.
#[derive(Debug, Error)]
pub enum SynpilotError {
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Require composer 2, found {version}")]
    ComposerOutdated { version: String },
    #[error("Packages \"{}\" is not installed", .packages.join(", "))]
    PackageNotInstalled { packages: Vec<String> },
    #[error("Plugin not found")]
    PluginNotFound,
    #[error("`{path}` not existing, can't properly detect dev/no-dev mode")]
    ManifestMissing { path: String },
    #[error("`{path}` is invalid, can't properly detect dev/no-dev mode")]
    ManifestInvalid { path: String },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SynpilotError {
    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SynpilotError::CommandMissing { .. } => ExitCode::from(10),
            SynpilotError::CommandFailure { .. } => ExitCode::from(11),
            SynpilotError::ComposerOutdated { .. } => ExitCode::from(12),
            SynpilotError::PackageNotInstalled { .. } => ExitCode::from(13),
            SynpilotError::PluginNotFound => ExitCode::from(14),
            SynpilotError::ManifestMissing { .. } => ExitCode::from(15),
            SynpilotError::ManifestInvalid { .. } => ExitCode::from(16),
            SynpilotError::Config(_) => ExitCode::from(20),
            SynpilotError::Network(_) => ExitCode::from(30),
            SynpilotError::Serialization(_) => ExitCode::from(31),
            SynpilotError::Filesystem(_) => ExitCode::from(40),
            SynpilotError::Runtime(_) => ExitCode::from(50),
            SynpilotError::Io(_) => ExitCode::from(41),
        }
    }

    /// Machine-readable code included in callback payloads, when defined.
    pub fn callback_code(&self) -> Option<&'static str> {
        match self {
            SynpilotError::ComposerOutdated { .. } => Some("composer-2"),
            _ => None,
        }
    }
}
