//! Revision watermark of a mirror.
//!
//! A watermark records the highest backend revision a mirror has applied
//! and the revision of its latest full listing. Both only move forward.

use roster_core::Revision;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    /// Highest revision applied, from a listing or an event.
    pub revision: Revision,
    /// Revision of the latest listing. Events at or below it are already
    /// part of the mirror.
    pub listed: Revision,
}

impl Watermark {
    /// Create a zero watermark (nothing applied yet).
    pub fn zero() -> Self {
        Self::default()
    }

    /// True when an event at `revision` must not be applied.
    ///
    /// Several events may share a revision, so an event equal to the
    /// applied revision is still fresh unless a listing covered it.
    pub fn is_stale(&self, revision: Revision) -> bool {
        revision < self.revision || revision <= self.listed
    }

    /// Move forward to an event at `revision`. Returns false, leaving the
    /// watermark untouched, when the event is stale.
    pub fn advance(&mut self, revision: Revision) -> bool {
        if self.is_stale(revision) {
            return false;
        }
        self.revision = revision;
        true
    }

    /// Record a full listing taken at `revision`.
    pub fn relist(&mut self, revision: Revision) {
        self.revision = self.revision.max(revision);
        self.listed = self.listed.max(revision);
    }
}
