//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the gate:
//! - Index identity and field metadata (`IndexDescriptor`, `FieldType`, `FieldTypeMap`)
//! - Request shapes (`QueryRequest`, `ExportRequest`, `SortKey`, aggregation specs)
//! - Result shapes (`NumericAggregation`, `TextAggregation` and their buckets)
//! - The per-request tier decision (`AccessTierContext`)
//! - Error types (`GateError`, `ErrorKind`)
//!
//! The filter tree lives in [`filter`] and is re-exported here.

mod filter;

pub use filter::Filter;

use crate::engine::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// INDEX IDENTITY
// =============================================================================

/// Identifies one logical document collection in the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Engine index name.
    pub index: String,
    /// Document type within the index.
    #[serde(rename = "type")]
    pub doc_type: String,
}

impl IndexDescriptor {
    /// Create a new descriptor.
    #[must_use]
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
        }
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.doc_type)
    }
}

// =============================================================================
// FIELD TYPES
// =============================================================================

/// Storage type of a field as declared by the engine mapping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Keyword,
    Long,
    Integer,
    Short,
    Byte,
    Double,
    Float,
    HalfFloat,
    ScaledFloat,
    Boolean,
    Date,
    /// Container whose elements are indexed as separate hidden documents.
    Nested,
    /// Plain object container.
    Object,
    /// Any tag this crate does not interpret.
    Other(String),
}

impl FieldType {
    /// The engine's tag for this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Keyword => "keyword",
            Self::Long => "long",
            Self::Integer => "integer",
            Self::Short => "short",
            Self::Byte => "byte",
            Self::Double => "double",
            Self::Float => "float",
            Self::HalfFloat => "half_float",
            Self::ScaledFloat => "scaled_float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Nested => "nested",
            Self::Object => "object",
            Self::Other(tag) => tag,
        }
    }

    /// Whether numeric range aggregations can run on this type.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Long
                | Self::Integer
                | Self::Short
                | Self::Byte
                | Self::Double
                | Self::Float
                | Self::HalfFloat
                | Self::ScaledFloat
        )
    }
}

impl From<&str> for FieldType {
    fn from(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "keyword" => Self::Keyword,
            "long" => Self::Long,
            "integer" => Self::Integer,
            "short" => Self::Short,
            "byte" => Self::Byte,
            "double" => Self::Double,
            "float" => Self::Float,
            "half_float" => Self::HalfFloat,
            "scaled_float" => Self::ScaledFloat,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "nested" => Self::Nested,
            "object" => Self::Object,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for FieldType {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field name (dotted path) to storage type, for one index.
///
/// BTreeMap keeps introspection output and error messages in a stable order.
pub type FieldTypeMap = BTreeMap<String, FieldType>;

// =============================================================================
// SORT
// =============================================================================

/// Sort direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One `(field, direction)` pair of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    #[must_use]
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

impl FromStr for SortKey {
    type Err = GateError;

    /// Parse `field`, `field:asc` or `field:desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.rsplit_once(':') {
            Some((field, "asc")) => (field, SortDirection::Asc),
            Some((field, "desc")) => (field, SortDirection::Desc),
            Some((_, other)) => {
                return Err(GateError::invalid(format!(
                    "Invalid sort direction '{other}' in '{s}', expected 'asc' or 'desc'"
                )));
            }
            None => (s, SortDirection::Asc),
        };
        if field.is_empty() {
            return Err(GateError::invalid(format!("Empty sort field in '{s}'")));
        }
        Ok(Self::new(field, direction))
    }
}

/// Ordered sort specification; earlier keys take precedence.
pub type SortSpec = Vec<SortKey>;

// =============================================================================
// REQUESTS
// =============================================================================

/// A bounded (paged) document query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub size: Option<u64>,
}

impl QueryRequest {
    /// A request for the first default-sized page of an index.
    #[must_use]
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            filter: None,
            fields: None,
            sort: None,
            offset: 0,
            size: None,
        }
    }
}

/// An unbounded export; served through the scroll protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

impl ExportRequest {
    #[must_use]
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            filter: None,
            fields: None,
            sort: None,
        }
    }
}

fn default_filter_self() -> bool {
    true
}

/// Numeric histogram request.
///
/// Exactly one of `range_step` and `bin_count` selects the binning strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericAggregationSpec {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub field: String,
    #[serde(default)]
    pub range_start: Option<f64>,
    #[serde(default)]
    pub range_end: Option<f64>,
    #[serde(default)]
    pub range_step: Option<f64>,
    #[serde(default)]
    pub bin_count: Option<u64>,
    #[serde(default)]
    pub filter: Option<Filter>,
    /// When false, the field's own clauses are dropped from `filter`.
    #[serde(default = "default_filter_self")]
    pub filter_self: bool,
    #[serde(default)]
    pub default_auth_filter: Option<Filter>,
}

impl NumericAggregationSpec {
    #[must_use]
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            field: field.into(),
            range_start: None,
            range_end: None,
            range_step: None,
            bin_count: None,
            filter: None,
            filter_self: true,
            default_auth_filter: None,
        }
    }
}

/// Terms aggregation request, with optional one-level nested breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAggregationSpec {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub field: String,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default = "default_filter_self")]
    pub filter_self: bool,
    #[serde(default)]
    pub default_auth_filter: Option<Filter>,
    #[serde(default)]
    pub nested_agg_fields: Vec<String>,
}

impl TextAggregationSpec {
    #[must_use]
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            field: field.into(),
            filter: None,
            filter_self: true,
            default_auth_filter: None,
            nested_agg_fields: Vec::new(),
        }
    }
}

// =============================================================================
// ACCESS TIER
// =============================================================================

/// The caller's already-resolved tier decision. Supplied per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessTierContext {
    /// Counts strictly below this value are hidden. Zero hides nothing.
    pub minimum_count_threshold: u64,
    /// Whether the request asks for individual records.
    pub is_raw_data_query: bool,
}

impl AccessTierContext {
    /// Context for an aggregation (non raw-data) request.
    #[must_use]
    pub const fn aggregate(minimum_count_threshold: u64) -> Self {
        Self {
            minimum_count_threshold,
            is_raw_data_query: false,
        }
    }

    /// Context for a raw record request.
    #[must_use]
    pub const fn raw_data(minimum_count_threshold: u64) -> Self {
        Self {
            minimum_count_threshold,
            is_raw_data_query: true,
        }
    }

    /// Whether this caller sees anything less than exact values.
    #[must_use]
    pub const fn is_restricted(&self) -> bool {
        self.minimum_count_threshold > 0
    }
}

// =============================================================================
// AGGREGATION RESULTS
// =============================================================================

/// One numeric histogram bucket, `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: i64,
}

/// Result of a numeric aggregation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NumericAggregation {
    /// Documents matching the effective filter.
    pub total_count: i64,
    /// Buckets in ascending order.
    pub histogram: Vec<RangeBucket>,
}

/// A single term with its count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    pub key: String,
    pub count: i64,
}

/// Per-value counts of one nested field inside a parent term bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedBreakdown {
    pub field: String,
    pub buckets: Vec<TermCount>,
}

/// One term bucket of a text aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermBucket {
    pub key: String,
    pub count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<NestedBreakdown>,
}

/// Result of a text aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextAggregation {
    pub total_count: i64,
    pub histogram: Vec<TermBucket>,
}

impl TextAggregation {
    /// Term → count view of the top-level buckets.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<&str, i64> {
        self.histogram
            .iter()
            .map(|b| (b.key.as_str(), b.count))
            .collect()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of a [`GateError`], for status and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Upstream,
    Configuration,
}

/// Errors produced by the gate.
///
/// - Validation errors are raised before any engine call
/// - Upstream errors carry the operation and target they happened on
/// - Configuration errors only occur during (re)initialization and are fatal
#[derive(Debug, Error)]
pub enum GateError {
    /// Caller-supplied input is invalid (400-class).
    #[error("{message}")]
    InvalidInput {
        message: String,
        /// Every offending field, when the error is about fields.
        fields: Vec<String>,
    },

    /// The named index or type is not configured.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// The engine or transport failed.
    #[error("{operation} failed on {target}: {source}")]
    Upstream {
        operation: &'static str,
        target: String,
        #[source]
        source: EngineError,
    },

    /// Initialization could not produce a usable metadata cache.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GateError {
    /// Invalid input not tied to specific fields.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Invalid input naming every offending field.
    pub fn invalid_fields(context: &str, index: &str, fields: Vec<String>) -> Self {
        Self::InvalidInput {
            message: format!(
                "Invalid {context} field(s) for index '{index}': {}",
                fields.join(", ")
            ),
            fields,
        }
    }

    /// Returns a closure wrapping an [`EngineError`] with operation context.
    pub fn upstream(
        operation: &'static str,
        target: impl Into<String>,
    ) -> impl FnOnce(EngineError) -> Self {
        let target = target.into();
        move |source| Self::Upstream {
            operation,
            target,
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Offending field names, if any.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        match self {
            Self::InvalidInput { fields, .. } => fields,
            _ => &[],
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
