//! # Scroll Exporter
//!
//! Unbounded export through the engine's scroll protocol.
//!
//! ## Cursor lifecycle
//!
//! ```text
//! open_scroll ──▶ batch ──▶ scroll ──▶ batch ──▶ ... ──▶ empty batch ──▶ clear_scroll
//!                   │                    │
//!                   └── engine error ────┴──────────────────────────────▶ clear_scroll
//! ```
//!
//! A [`ScrollCursor`] owns the engine-side handle. It is released exactly
//! once: explicitly when the stream ends or fails, or from `Drop` when the
//! consumer stops polling and drops the stream. Release failures are logged;
//! the engine expires the cursor after its TTL anyway.

use crate::engine::{EngineError, SearchEngine, SearchRequest, SearchResponse};
use crate::executor::{prepare_search, strip_nulls};
use crate::metadata::IndexMetadataCache;
use crate::primitives::{SCROLL_BATCH_SIZE, SCROLL_TTL};
use crate::{ExportRequest, GateError};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{Value, json};
use std::sync::Arc;

/// Documents of an export, in engine order.
pub type DocumentStream = BoxStream<'static, Result<Value, GateError>>;

// =============================================================================
// CURSOR
// =============================================================================

/// An open engine scroll cursor.
pub struct ScrollCursor {
    engine: Arc<dyn SearchEngine>,
    id: String,
    released: bool,
}

impl ScrollCursor {
    fn new(engine: Arc<dyn SearchEngine>, id: String) -> Self {
        Self {
            engine,
            id,
            released: false,
        }
    }

    /// Current engine id of the cursor.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<SearchResponse, EngineError> {
        self.engine.scroll(&self.id, SCROLL_TTL).await
    }

    /// Adopt the id the engine returned with the latest batch.
    fn renew(&mut self, id: Option<&str>) {
        if let Some(id) = id
            && id != self.id
        {
            tracing::debug!(old = %self.id, new = %id, "scroll cursor renewed");
            self.id = id.to_string();
        }
    }

    /// Clear the cursor on the engine.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.engine.clear_scroll(&self.id).await {
            tracing::warn!(cursor = %self.id, error = %e, "failed to release scroll cursor");
        }
    }
}

impl Drop for ScrollCursor {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let engine = Arc::clone(&self.engine);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = engine.clear_scroll(&id).await {
                        tracing::warn!(cursor = %id, error = %e, "failed to release abandoned scroll cursor");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(cursor = %id, "no runtime to release scroll cursor; left to expire");
            }
        }
    }
}

// =============================================================================
// EXPORTER
// =============================================================================

enum ExportState {
    Pending {
        engine: Arc<dyn SearchEngine>,
        request: SearchRequest,
        target: String,
    },
    Active {
        cursor: ScrollCursor,
        target: String,
    },
}

/// Streams every matching document of an export request.
pub struct ScrollExporter {
    engine: Arc<dyn SearchEngine>,
    cache: Arc<IndexMetadataCache>,
}

impl ScrollExporter {
    #[must_use]
    pub fn new(engine: Arc<dyn SearchEngine>, cache: Arc<IndexMetadataCache>) -> Self {
        Self { engine, cache }
    }

    /// Validate `request` and return a lazy document stream.
    ///
    /// Nothing is sent to the engine until the stream is first polled.
    pub fn export(&self, request: &ExportRequest) -> Result<DocumentStream, GateError> {
        let meta = self.cache.resolve(&request.index, &request.doc_type)?;
        let prepared = prepare_search(
            meta,
            request.filter.as_ref(),
            request.fields.as_deref(),
            request.sort.as_deref(),
        )?;
        let body = strip_nulls(json!({
            "query": prepared.query,
            "_source": prepared.source,
            "size": SCROLL_BATCH_SIZE,
        }));
        let search = SearchRequest::new(meta.index(), Some(request.doc_type.clone()), body)
            .with_sort(prepared.sort);

        let initial = ExportState::Pending {
            engine: Arc::clone(&self.engine),
            request: search,
            target: meta.descriptor().to_string(),
        };
        Ok(stream::try_unfold(initial, next_batch)
            .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<Value, GateError>)))
            .try_flatten()
            .boxed())
    }
}

async fn next_batch(state: ExportState) -> Result<Option<(Vec<Value>, ExportState)>, GateError> {
    match state {
        ExportState::Pending {
            engine,
            request,
            target,
        } => {
            let response = engine
                .open_scroll(&request, SCROLL_TTL)
                .await
                .map_err(GateError::upstream("open_scroll", target.clone()))?;
            let Some(id) = response.scroll_id.clone() else {
                return Err(GateError::upstream("open_scroll", target)(EngineError::Parse(
                    "response carries no _scroll_id".to_string(),
                )));
            };
            tracing::debug!(index = %target, cursor = %id, total = response.total(), "scroll opened");
            deliver(ScrollCursor::new(engine, id), response, target).await
        }
        ExportState::Active { cursor, target } => match cursor.fetch().await {
            Ok(response) => deliver(cursor, response, target).await,
            Err(e) => {
                cursor.release().await;
                Err(GateError::upstream("scroll", target)(e))
            }
        },
    }
}

/// Hand a batch on, or release the cursor once the engine is exhausted.
async fn deliver(
    mut cursor: ScrollCursor,
    response: SearchResponse,
    target: String,
) -> Result<Option<(Vec<Value>, ExportState)>, GateError> {
    cursor.renew(response.scroll_id.as_deref());
    let batch = response.into_sources();
    if batch.is_empty() {
        cursor.release().await;
        return Ok(None);
    }
    Ok(Some((batch, ExportState::Active { cursor, target })))
}

// =============================================================================
// TESTS
// =============================================================================
