//! Cross-user isolation checks.
//!
//! Scoping is enforced structurally (every store call takes a `UserScope`),
//! and again here, after the fact, on anything about to leave the subsystem.
//! A record owned by another scope is a fatal bug, never a degraded path.

use memoria_types::error::MemoryError;
use memoria_types::memory::{MemoryRecord, ScoredMemory, UserScope};

/// Fail if any scored memory is owned by a scope other than `requested`.
///
/// On violation an `error!` event names both scopes and the caller must
/// discard the whole result.
pub fn assert_isolated(requested: &UserScope, memories: &[ScoredMemory]) -> Result<(), MemoryError> {
    assert_records_isolated(requested, memories.iter().map(|m| &m.record))
}

/// Record-level variant used on dedup neighbours and fingerprint hits.
pub fn assert_records_isolated<'a>(
    requested: &UserScope,
    records: impl IntoIterator<Item = &'a MemoryRecord>,
) -> Result<(), MemoryError> {
    for record in records {
        if record.user_scope() != requested {
            tracing::error!(
                requested_scope = %requested,
                found_scope = %record.user_scope(),
                memory_id = %record.id,
                "Memory isolation violation: store returned a record from another user"
            );
            return Err(MemoryError::IsolationViolation {
                requested: requested.to_string(),
                found: record.user_scope().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_types::memory::{MemoryType, TurnRange};

    fn scored(scope: &str, text: &str) -> ScoredMemory {
        ScoredMemory {
            record: MemoryRecord::new(
                UserScope::new(scope).unwrap(),
                text.to_string(),
                MemoryType::Semantic,
                vec![1.0],
                "test".to_string(),
                text.to_string(),
                TurnRange::new(0, 0),
            ),
            similarity: 0.9,
        }
    }

    #[test]
    fn test_same_scope_passes() {
        let alice = UserScope::new("alice").unwrap();
        assert!(assert_isolated(&alice, &[scored("alice", "a"), scored("alice", "b")]).is_ok());
        assert!(assert_isolated(&alice, &[]).is_ok());
    }

    #[test]
    fn test_foreign_record_is_fatal() {
        let bob = UserScope::new("bob").unwrap();
        let err = assert_isolated(&bob, &[scored("bob", "ok"), scored("alice", "My secret PIN is 9876")])
            .unwrap_err();
        assert!(err.is_fatal());
        match err {
            MemoryError::IsolationViolation { requested, found } => {
                assert_eq!(requested, "bob");
                assert_eq!(found, "alice");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
