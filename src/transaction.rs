//! Transaction identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque transaction identifier. Ids are unique for the lifetime of a
/// database instance but are not reused across restarts by the generator;
/// recovery reads ids back out of the log instead of generating them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// Hands out monotonically increasing transaction ids.
pub struct TransactionIdGenerator {
    next: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Ensures every future id is greater than `id`. Recovery feeds the
    /// highest id it saw in the log through here so reopened databases do
    /// not reuse logged ids.
    pub fn advance_past(&self, id: u64) {
        self.next.fetch_max(id + 1, Ordering::SeqCst);
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let gen = TransactionIdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        let c = gen.next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TransactionId::new(7)), "Txn7");
    }

    #[test]
    fn test_advance_past() {
        let gen = TransactionIdGenerator::new();
        gen.advance_past(10);
        assert_eq!(gen.next_id(), TransactionId::new(11));
        // Advancing backwards is a no-op.
        gen.advance_past(3);
        assert_eq!(gen.next_id(), TransactionId::new(12));
    }
}
