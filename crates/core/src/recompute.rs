//! Recompute
//!
//! Every entity with cached aggregate fields is recomputed through an explicit call made by
//! the operation that invalidated it. Recomputation runs leaf-to-root: crate, then produce
//! (and storage unit); listing, then line item, then order.

use crate::{errors::EngineError, store::Transaction};

/// Options controlling a single recompute call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecomputeOptions {
    /// Write the recomputed fields back to the store.
    pub persist: bool,

    /// Recompute the entity's dependencies (or dependents, for crates) as well.
    pub cascade: bool,
}

impl RecomputeOptions {
    /// Compute and return the result without writing it.
    pub const DRY_RUN: Self = Self {
        persist: false,
        cascade: false,
    };

    /// Compute and persist this entity only.
    pub const PERSIST: Self = Self {
        persist: true,
        cascade: false,
    };

    /// Compute and persist this entity and everything along its cascade edge.
    pub const PERSIST_CASCADE: Self = Self {
        persist: true,
        cascade: true,
    };
}

impl Default for RecomputeOptions {
    fn default() -> Self {
        Self::PERSIST
    }
}

/// Implemented by entity keys whose records carry cached aggregates.
pub trait Recompute: Copy {
    /// The recomputed record.
    type Output;

    /// Recompute the record identified by this key inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if the record (or one it depends on) is missing, or the
    /// computation itself rejects the data.
    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<Self::Output, EngineError>;
}
