//! # Fixed Limits
//!
//! Compile-time constants shared by the translators, executors and the guard.
//!
//! These values are part of the engine contract and are not configurable at
//! runtime.

/// Hard ceiling on `offset + size` for bounded (paged) queries.
///
/// Matches the engine's default `index.max_result_window`. Anything deeper
/// must go through the scroll export path.
pub const PAGE_SIZE_CEILING: u64 = 10_000;

/// Page size used when a bounded query does not specify one.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Number of documents fetched per scroll batch.
pub const SCROLL_BATCH_SIZE: u64 = 1_000;

/// Engine-side lifetime of a scroll cursor between two batch fetches.
pub const SCROLL_TTL: &str = "1m";

/// Maximum number of distinct terms requested from a terms aggregation.
pub const TERMS_AGG_SIZE: u64 = 10_000;

/// Upper bound on the number of buckets a numeric histogram may produce.
///
/// Prevents a tiny `rangeStep` over a wide range from generating an
/// unbounded range aggregation.
pub const MAX_HISTOGRAM_BUCKETS: usize = 1_000;

/// Sentinel reported in place of a count the caller may not see.
pub const HIDDEN_COUNT: i64 = -1;

/// Engine counts are unsigned; results carry them signed so the sentinel fits.
#[must_use]
pub fn signed_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
