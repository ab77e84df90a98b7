//! # Tier Access Guard
//!
//! Post-processing of aggregation results for callers whose tier does not
//! permit exact values. The guard never touches query construction or
//! execution; it shapes results after the fact.
//!
//! | Result part          | Policy                                                 |
//! |----------------------|--------------------------------------------------------|
//! | raw record lists     | flagged by [`TierAccessGuard::raw_data_denied`]        |
//! | total counts         | below threshold → [`HIDDEN_COUNT`]                     |
//! | histogram buckets    | each count judged on its own; keys and ranges kept     |
//! | nested breakdowns    | same as buckets                                        |
//!
//! Redaction is idempotent: the sentinel is itself below every positive
//! threshold, so a second pass changes nothing.

use crate::primitives::HIDDEN_COUNT;
use crate::{
    AccessTierContext, IndexDescriptor, NestedBreakdown, NumericAggregation, RangeBucket,
    TermBucket, TermCount, TextAggregation,
};

// =============================================================================
// REDACTION
// =============================================================================

/// A result shape whose counts can be hidden below a threshold.
pub trait Redact {
    /// Replace every count strictly below `threshold` with [`HIDDEN_COUNT`].
    #[must_use]
    fn redact(self, threshold: u64) -> Self;
}

/// Hide a single count below `threshold`. A threshold of zero hides nothing.
#[must_use]
pub fn redact_count(count: i64, threshold: u64) -> i64 {
    if threshold == 0 || count == HIDDEN_COUNT {
        return count;
    }
    match u64::try_from(count) {
        Ok(n) if n >= threshold => count,
        _ => HIDDEN_COUNT,
    }
}

impl Redact for RangeBucket {
    fn redact(self, threshold: u64) -> Self {
        Self {
            count: redact_count(self.count, threshold),
            ..self
        }
    }
}

impl Redact for TermCount {
    fn redact(self, threshold: u64) -> Self {
        Self {
            count: redact_count(self.count, threshold),
            ..self
        }
    }
}

impl Redact for NestedBreakdown {
    fn redact(self, threshold: u64) -> Self {
        Self {
            field: self.field,
            buckets: self.buckets.redact(threshold),
        }
    }
}

impl Redact for TermBucket {
    fn redact(self, threshold: u64) -> Self {
        Self {
            key: self.key,
            count: redact_count(self.count, threshold),
            nested: self.nested.redact(threshold),
        }
    }
}

impl Redact for NumericAggregation {
    fn redact(self, threshold: u64) -> Self {
        Self {
            total_count: redact_count(self.total_count, threshold),
            histogram: self.histogram.redact(threshold),
        }
    }
}

impl Redact for TextAggregation {
    fn redact(self, threshold: u64) -> Self {
        Self {
            total_count: redact_count(self.total_count, threshold),
            histogram: self.histogram.redact(threshold),
        }
    }
}

impl<T: Redact> Redact for Vec<T> {
    fn redact(self, threshold: u64) -> Self {
        self.into_iter().map(|item| item.redact(threshold)).collect()
    }
}

// =============================================================================
// GUARD
// =============================================================================

/// Result shaping for one configured index.
///
/// Built once per index from static configuration. An index that is not
/// tier-gated gets a pass-through guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierAccessGuard {
    descriptor: IndexDescriptor,
    enforced: bool,
}

impl TierAccessGuard {
    /// A guard that enforces tier thresholds.
    #[must_use]
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            enforced: true,
        }
    }

    /// A guard that returns every result unchanged.
    #[must_use]
    pub fn pass_through(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            enforced: false,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn is_enforced(&self) -> bool {
        self.enforced
    }

    /// Whether a raw-record request must be refused for this caller.
    ///
    /// The guard only flags the condition; the caller performs the denial.
    #[must_use]
    pub fn raw_data_denied(&self, ctx: &AccessTierContext) -> bool {
        self.enforced && ctx.is_raw_data_query && ctx.is_restricted()
    }

    /// Shape `result` for the caller described by `ctx`.
    #[must_use]
    pub fn apply<T: Redact>(&self, result: T, ctx: &AccessTierContext) -> T {
        if !self.enforced || !ctx.is_restricted() {
            return result;
        }
        tracing::debug!(
            index = %self.descriptor,
            threshold = ctx.minimum_count_threshold,
            "redacting result"
        );
        result.redact(ctx.minimum_count_threshold)
    }

    /// Shape a bare count.
    #[must_use]
    pub fn apply_count(&self, count: i64, ctx: &AccessTierContext) -> i64 {
        if !self.enforced {
            return count;
        }
        redact_count(count, ctx.minimum_count_threshold)
    }
}

// =============================================================================
// TESTS
// =============================================================================
