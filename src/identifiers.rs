//! Type-safe identifiers for bridge sessions.
//!
//! Newtype wrappers keep session identities from being confused with other
//! strings travelling on the wire.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Process-wide sequence for session identities.
static NEXT_SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SessionId
// ============================================================================

/// Opaque identity of one bridge-side client session.
///
/// Generated at connect time and never reused within the process. The
/// sequence part makes ids unique in-process; the random part keeps ids from
/// an earlier bridge process from colliding with fresh ones on the client.
///
/// Rendered on the wire as `client_<seq>_<nonce>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    seq: u64,
    nonce: Uuid,
}

impl SessionId {
    /// Allocates a fresh session identity.
    #[must_use]
    pub fn next() -> Self {
        Self {
            seq: NEXT_SESSION_SEQ.fetch_add(1, Ordering::Relaxed),
            nonce: Uuid::new_v4(),
        }
    }

    /// Returns the in-process allocation sequence.
    #[inline]
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nonce = self.nonce.simple().to_string();
        write!(f, "client_{}_{}", self.seq, &nonce[..9])
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashSet;

    #[test]
    fn test_session_ids_are_unique() {
        let ids: FxHashSet<SessionId> = (0..1000).map(|_| SessionId::next()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_session_ids_are_ordered_by_allocation() {
        let first = SessionId::next();
        let second = SessionId::next();
        assert!(first.seq() < second.seq());
        assert!(first < second);
    }

    #[test]
    fn test_display_format() {
        let id = SessionId::next();
        let text = id.to_string();
        assert!(text.starts_with("client_"));

        let parts: Vec<&str> = text.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], id.seq().to_string());
        assert_eq!(parts[2].len(), 9);
    }
}
