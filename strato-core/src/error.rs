//! Custom error types for Strato.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the Strato core.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum StratoError {
    // =========================================================================
    // Request Errors - Surface Directly With Field Detail
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Function already exists: {0}")]
    AlreadyExists(String),

    // =========================================================================
    // Invocation Errors
    // =========================================================================
    #[error("Invocation timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("Function execution failed: {message}")]
    Execution {
        message: String,
        stack: Option<String>,
    },

    // =========================================================================
    // Infrastructure Errors - VM Boot, Subprocess Spawn, Storage I/O
    // =========================================================================
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] InfraError),

    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification used by front ends to pick a status range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was invalid.
    InvalidRequest,
    NotFound,
    Conflict,
    /// The function executed but failed (or overran its deadline).
    ExecutionFailed,
    /// The invocation or operation could not be attempted.
    Unavailable,
}

impl StratoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::ConfigParse { .. } => ErrorKind::InvalidRequest,
            Self::NotFound(_) | Self::ConfigNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::Conflict,
            Self::Timeout { .. } | Self::Execution { .. } => ErrorKind::ExecutionFailed,
            Self::Infrastructure(_) | Self::Io { .. } => ErrorKind::Unavailable,
        }
    }

    pub(crate) fn storage(reason: impl Into<String>) -> Self {
        Self::Infrastructure(InfraError::Storage {
            reason: reason.into(),
        })
    }
}

/// Field-tagged request validation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: {field} is required")]
    MissingField { field: &'static str },

    #[error("{field}: invalid value '{value}' - {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl ValidationError {
    /// Name of the offending request field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field } | Self::InvalidField { field, .. } => field,
        }
    }
}

/// Failures of the machinery around user code, never of the user code itself.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("storage failure: {reason}")]
    Storage { reason: String },

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("hypervisor failure during {stage}: {reason}")]
    Hypervisor { stage: &'static str, reason: String },

    #[error("network setup failed: {reason}")]
    Network { reason: String },

    #[error("guest runtime error: {reason}")]
    Guest { reason: String },

    #[error("VM {vm_id}: invalid state transition from {from} to {to}")]
    InvalidTransition {
        vm_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using StratoError.
pub type StratoResult<T> = Result<T, StratoError>;
