use std::sync::atomic::{AtomicUsize, Ordering};

use crate::lint::Target;

/// Index of the next unclaimed target in an ordered target list.
///
/// Owned by one dispatcher run. Claims never hand out the same target twice,
/// which is what guarantees "each target evaluated at most once per run".
#[derive(Debug)]
pub struct Cursor {
    targets: Vec<Target>,
    next: AtomicUsize,
}

impl Cursor {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of targets not claimed yet.
    pub fn remaining(&self) -> usize {
        self.len() - self.position()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    /// Claim the next target, if any.
    pub fn claim(&self) -> Option<&Target> {
        let range = self.advance(1);
        self.targets.get(range.start..range.end)?.first()
    }

    /// Claim up to `size` consecutive targets.
    pub fn claim_chunk(&self, size: usize) -> &[Target] {
        let range = self.advance(size);
        &self.targets[range]
    }

    /// Mark every remaining target as claimed so no more work is handed out.
    pub fn exhaust(&self) -> usize {
        let previous = self.next.swap(self.len(), Ordering::AcqRel);
        self.len() - previous.min(self.len())
    }

    fn advance(&self, size: usize) -> std::ops::Range<usize> {
        let len = self.len();
        let start = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < len).then(|| current.saturating_add(size).min(len))
            })
            .unwrap_or(len);
        start..start.saturating_add(size).min(len)
    }
}
