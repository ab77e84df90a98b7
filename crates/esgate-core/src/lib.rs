//! # esgate-core
//!
//! Query translation and tier-gated aggregation over an
//! Elasticsearch-compatible search engine.
//!
//! Structured, backend-agnostic filter/sort/aggregation requests are
//! validated against per-index metadata, translated into the engine's query
//! DSL, executed, and post-processed so callers only see the precision their
//! access tier allows.
//!
//! ## Request Flow
//!
//! ```text
//! IndexMetadataCache ──▶ FilterTranslator / SortTranslator
//!                                   │
//!            ┌──────────────────────┼──────────────────────┐
//!            ▼                      ▼                      ▼
//!      QueryExecutor         ScrollExporter        AggregationEngine
//!                                                          │
//!                                                          ▼
//!                                                   TierAccessGuard
//! ```
//!
//! ## Architectural Constraints
//!
//! - Metadata is fetched once and never mutated; reloading swaps a new cache in
//! - Every engine call goes through the [`SearchEngine`] trait
//! - Validation errors are raised before any engine call
//! - Scroll cursors are released on every exit path
//! - Redaction happens after execution, never inside it

// =============================================================================
// MODULES
// =============================================================================

pub mod aggregation;
pub mod engine;
pub mod executor;
pub mod filter;
pub mod gate;
pub mod guard;
pub mod metadata;
pub mod primitives;
pub mod scroll;
pub mod sort;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AccessTierContext, ErrorKind, ExportRequest, FieldType, FieldTypeMap, Filter, GateError,
    IndexDescriptor, NestedBreakdown, NumericAggregation, NumericAggregationSpec, QueryRequest,
    RangeBucket, SortDirection, SortKey, SortSpec, TermBucket, TermCount, TextAggregation,
    TextAggregationSpec,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use engine::{EngineError, HttpEngine, InMemoryEngine, SearchEngine};

// =============================================================================
// RE-EXPORTS: Translation, Execution, Shaping
// =============================================================================

pub use aggregation::{AggregationEngine, Bin, Binning, compute_bins};
pub use executor::{QueryExecutor, strip_nulls};
pub use filter::FilterTranslator;
pub use gate::{GateSettings, IndexSettings, SearchGate};
pub use guard::{Redact, TierAccessGuard};
pub use metadata::{IndexFields, IndexMetadata, IndexMetadataCache};
pub use scroll::{DocumentStream, ScrollCursor, ScrollExporter};
pub use sort::SortTranslator;
