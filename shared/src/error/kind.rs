//! Error kind classification

use serde::{Deserialize, Serialize};

/// What went wrong, independent of which component raised it.
///
/// Callers decide recovery by kind: validation / not_found / conflict /
/// not_eligible are surfaced to the caller as-is, dependency and timeout may
/// be retried, fatal is logged and alerted and never auto-recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Not an error (success code)
    None,
    /// Bad input
    Validation,
    /// Missing or invalid credentials
    Auth,
    /// Authenticated but not allowed
    Permission,
    /// Referenced entity does not exist
    NotFound,
    /// Version mismatch or duplicate key
    Conflict,
    /// Blocked by a business rule
    NotEligible,
    /// DB / keyspace / gateway / SMTP unreachable
    Dependency,
    /// Deadline exceeded
    Timeout,
    /// Invariant violation
    Fatal,
    /// Unexpected internal failure
    Internal,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dependency | Self::Timeout)
    }

    /// Whether errors of this kind should be logged at error level
    pub fn is_system(&self) -> bool {
        matches!(self, Self::Fatal | Self::Internal | Self::Dependency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Dependency.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
    }

    #[test]
    fn code_kinds() {
        assert_eq!(ErrorCode::Insufficient.kind(), ErrorKind::NotEligible);
        assert_eq!(ErrorCode::VersionConflict.kind(), ErrorKind::Conflict);
        assert_eq!(ErrorCode::InvalidSignature.kind(), ErrorKind::Validation);
        assert_eq!(ErrorCode::InvariantViolation.kind(), ErrorKind::Fatal);
    }
}
