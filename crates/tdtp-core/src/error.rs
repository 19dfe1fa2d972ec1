//! Error taxonomy shared across the TDTP workspace.
//!
//! Every fallible operation in TDTP returns a [`TdtpError`] (or a type that
//! converts into one) instead of panicking across a module boundary. The
//! variants mirror the taxonomy in the framework design: validation,
//! transient, resource, permission, integrity, and fatal. Each carries the
//! originating subsystem, a human message, and an optional stable code that
//! downstream consumers (result-log readers, retry predicates) can match on.

use thiserror::Error;

/// A stable, matchable error code (e.g. `MERCURY_UNAVAILABLE`, `KEY_BIND_REJECTED`).
pub type ErrorCode = &'static str;

#[derive(Debug, Error)]
pub enum TdtpError {
    /// Schema, type, encoding, or primary-key uniqueness violation.
    #[error("[{subsystem}] validation error: {message}")]
    Validation {
        subsystem: &'static str,
        message: String,
        code: Option<ErrorCode>,
    },

    /// Network timeout, connection reset, or other retryable condition.
    #[error("[{subsystem}] transient error: {message}")]
    Transient {
        subsystem: &'static str,
        message: String,
        code: Option<ErrorCode>,
    },

    /// Pool exhausted, too many concurrent calls, DLQ full.
    #[error("[{subsystem}] resource error: {message}")]
    Resource {
        subsystem: &'static str,
        message: String,
        code: Option<ErrorCode>,
    },

    /// Adapter auth failure, key-bind rejection, safe-mode SQL rejection.
    #[error("[{subsystem}] permission error: {message}")]
    Permission {
        subsystem: &'static str,
        message: String,
        code: Option<ErrorCode>,
    },

    /// AEAD authentication failure, HMAC mismatch, checksum mismatch.
    #[error("[{subsystem}] integrity error: {message}")]
    Integrity {
        subsystem: &'static str,
        message: String,
        code: Option<ErrorCode>,
    },

    /// Unknown adapter type, malformed configuration, unrecoverable state corruption.
    #[error("[{subsystem}] fatal error: {message}")]
    Fatal {
        subsystem: &'static str,
        message: String,
        code: Option<ErrorCode>,
    },
}

impl TdtpError {
    pub fn validation(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { subsystem, message: message.into(), code: None }
    }

    pub fn transient(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Transient { subsystem, message: message.into(), code: None }
    }

    pub fn resource(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Resource { subsystem, message: message.into(), code: None }
    }

    pub fn permission(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Permission { subsystem, message: message.into(), code: None }
    }

    pub fn integrity(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Integrity { subsystem, message: message.into(), code: None }
    }

    pub fn fatal(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Fatal { subsystem, message: message.into(), code: None }
    }

    /// Attach a stable code for result-log consumers to match on.
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        match &mut self {
            Self::Validation { code: c, .. }
            | Self::Transient { code: c, .. }
            | Self::Resource { code: c, .. }
            | Self::Permission { code: c, .. }
            | Self::Integrity { code: c, .. }
            | Self::Fatal { code: c, .. } => *c = Some(code),
        }
        self
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Validation { code, .. }
            | Self::Transient { code, .. }
            | Self::Resource { code, .. }
            | Self::Permission { code, .. }
            | Self::Integrity { code, .. }
            | Self::Fatal { code, .. } => *code,
        }
    }

    /// Whether the resilience layer's default predicate should retry this error.
    /// Transient errors are retryable by default; everything else is not.
    pub fn is_retryable_default(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, TdtpError>;
