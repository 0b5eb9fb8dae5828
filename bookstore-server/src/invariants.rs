//! Invariant violation reporting
//!
//! Violations (negative availability, orphan reservations, callback amount
//! mismatches) never auto-recover. They are logged at error level with the
//! `invariant_violation` code and counted for alerting.

use shared::ErrorCode;
use std::sync::atomic::{AtomicU64, Ordering};

static VIOLATIONS: AtomicU64 = AtomicU64::new(0);

/// Log and count one violation
pub fn report(kind: &str, detail: &str) {
    let total = VIOLATIONS.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::error!(
        code = %ErrorCode::InvariantViolation,
        kind,
        detail,
        total,
        "Invariant violation"
    );
}

/// Violations reported since process start
pub fn count() -> u64 {
    VIOLATIONS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_increments_counter() {
        let before = count();
        report("test", "synthetic");
        assert!(count() > before);
    }
}
