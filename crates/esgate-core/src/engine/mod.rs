//! # Search Engine Contract
//!
//! The consumed side of the gate: everything esgate needs from an
//! Elasticsearch-compatible engine, expressed as one async trait.
//!
//! ## Implementations
//!
//! - [`HttpEngine`]: talks to a real cluster over HTTP (reqwest)
//! - [`InMemoryEngine`]: evaluates the DSL subset esgate emits against
//!   documents held in memory; used by tests and local tooling

mod http;
mod memory;

pub use http::HttpEngine;
pub use memory::{EngineStats, InMemoryEngine};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cannot reach the engine.
    #[error("Cannot connect to search engine at {0}")]
    ConnectionFailed(String),

    /// The engine answered with a non-success status.
    #[error("Engine returned {status}: {body}")]
    Server { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The engine refused the request (unknown cursor, unsupported clause, ...).
    #[error("Request rejected: {0}")]
    Rejected(String),
}

// =============================================================================
// REQUEST / RESPONSE SHAPES
// =============================================================================

/// A search against one index.
///
/// Sort travels as `field:direction` tokens, separately from the body.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    /// `None` searches the index regardless of type.
    pub doc_type: Option<String>,
    pub body: Value,
    pub sort: Vec<String>,
}

impl SearchRequest {
    #[must_use]
    pub fn new(index: impl Into<String>, doc_type: Option<String>, body: Value) -> Self {
        Self {
            index: index.into(),
            doc_type,
            body,
            sort: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: Vec<String>) -> Self {
        self.sort = sort;
        self
    }
}

/// Total hit count; older engines send a number, newer ones `{"value": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl TotalHits {
    #[must_use]
    pub fn value(self) -> u64 {
        match self {
            Self::Count(n) | Self::Object { value: n } => n,
        }
    }
}

impl Default for TotalHits {
    fn default() -> Self {
        Self::Count(0)
    }
}

/// One matched document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub total: TotalHits,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// Response of `search`, `open_scroll` and `scroll`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id", default, skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub hits: Hits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
}

impl SearchResponse {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.hits.total.value()
    }

    /// The `_source` of every hit, in engine order.
    #[must_use]
    pub fn into_sources(self) -> Vec<Value> {
        self.hits.hits.into_iter().map(|h| h.source).collect()
    }
}

// =============================================================================
// ENGINE TRAIT
// =============================================================================

/// The search/scroll/mapping protocol esgate depends on.
///
/// Implementations must be `Send + Sync`; one handle is shared by every
/// request.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Run a bounded search.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError>;

    /// Run a search that also opens a scroll cursor valid for `ttl`.
    async fn open_scroll(
        &self,
        request: &SearchRequest,
        ttl: &str,
    ) -> Result<SearchResponse, EngineError>;

    /// Fetch the next batch of an open cursor, extending it by `ttl`.
    async fn scroll(&self, scroll_id: &str, ttl: &str) -> Result<SearchResponse, EngineError>;

    /// Release a cursor.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), EngineError>;

    /// Raw mapping document for `index`/`doc_type`.
    async fn get_mapping(&self, index: &str, doc_type: &str) -> Result<Value, EngineError>;
}

// =============================================================================
// TESTS
// =============================================================================
