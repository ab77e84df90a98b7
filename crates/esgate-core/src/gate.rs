//! # Search Gate
//!
//! The owned entry point: one engine handle, one metadata cache, one guard
//! per configured index. Every exposed operation goes through here.
//!
//! A gate is constructed explicitly and passed to whoever serves requests;
//! there is no process-wide instance. `reinitialize` builds a fresh cache and
//! swaps the handle, so requests already holding the previous cache finish
//! against it.

use crate::aggregation::AggregationEngine;
use crate::engine::SearchEngine;
use crate::executor::QueryExecutor;
use crate::guard::TierAccessGuard;
use crate::metadata::{IndexFields, IndexMetadataCache};
use crate::scroll::{DocumentStream, ScrollExporter};
use crate::{
    AccessTierContext, ExportRequest, Filter, GateError, IndexDescriptor, NumericAggregation,
    NumericAggregationSpec, QueryRequest, TextAggregation, TextAggregationSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// SETTINGS
// =============================================================================

fn gated() -> bool {
    true
}

/// One configured index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(flatten)]
    pub descriptor: IndexDescriptor,
    /// Whether tier thresholds apply to this index's results.
    #[serde(default = "gated")]
    pub tier_gated: bool,
}

impl IndexSettings {
    #[must_use]
    pub fn new(descriptor: IndexDescriptor, tier_gated: bool) -> Self {
        Self {
            descriptor,
            tier_gated,
        }
    }
}

/// Everything a gate needs besides the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateSettings {
    pub indices: Vec<IndexSettings>,
    /// Index holding the `{_id: <index>, array: [...]}` documents.
    #[serde(default)]
    pub config_index: Option<String>,
}

impl GateSettings {
    fn descriptors(&self) -> Vec<IndexDescriptor> {
        self.indices.iter().map(|s| s.descriptor.clone()).collect()
    }

    fn guards(&self) -> BTreeMap<String, TierAccessGuard> {
        self.indices
            .iter()
            .map(|s| {
                let guard = if s.tier_gated {
                    TierAccessGuard::new(s.descriptor.clone())
                } else {
                    TierAccessGuard::pass_through(s.descriptor.clone())
                };
                (s.descriptor.index.clone(), guard)
            })
            .collect()
    }
}

// =============================================================================
// GATE
// =============================================================================

/// Query translation and tier-gated aggregation over one engine.
pub struct SearchGate {
    engine: Arc<dyn SearchEngine>,
    settings: GateSettings,
    cache: Arc<IndexMetadataCache>,
    guards: BTreeMap<String, TierAccessGuard>,
}

impl std::fmt::Debug for SearchGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchGate")
            .field("settings", &self.settings)
            .field("indices", &self.guards.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SearchGate {
    /// Load metadata for every configured index. Fails on any fetch error.
    pub async fn initialize(
        engine: Arc<dyn SearchEngine>,
        settings: GateSettings,
    ) -> Result<Self, GateError> {
        let cache = IndexMetadataCache::initialize(
            engine.as_ref(),
            &settings.descriptors(),
            settings.config_index.as_deref(),
        )
        .await?;
        let guards = settings.guards();
        tracing::info!(indices = guards.len(), "search gate ready");
        Ok(Self {
            engine,
            settings,
            cache: Arc::new(cache),
            guards,
        })
    }

    /// Rebuild the metadata cache from the engine and swap it in.
    ///
    /// On failure the previous cache stays in place.
    pub async fn reinitialize(&mut self) -> Result<(), GateError> {
        let cache = IndexMetadataCache::initialize(
            self.engine.as_ref(),
            &self.settings.descriptors(),
            self.settings.config_index.as_deref(),
        )
        .await?;
        self.cache = Arc::new(cache);
        tracing::info!("index metadata reloaded");
        Ok(())
    }

    /// Current metadata snapshot.
    #[must_use]
    pub fn metadata(&self) -> Arc<IndexMetadataCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// The guard configured for `index`.
    pub fn guard(&self, index: &str) -> Result<&TierAccessGuard, GateError> {
        self.guards.get(index).ok_or_else(|| GateError::NotFound {
            what: "index",
            name: index.to_string(),
        })
    }

    /// One page of raw documents.
    ///
    /// Tier denial for raw data is the caller's decision; see
    /// [`TierAccessGuard::raw_data_denied`].
    pub async fn get_data(&self, request: &QueryRequest) -> Result<Vec<Value>, GateError> {
        QueryExecutor::new(self.engine.as_ref(), &self.cache)
            .run(request)
            .await
    }

    /// Every matching document, streamed through a scroll cursor.
    pub fn download_data(&self, request: &ExportRequest) -> Result<DocumentStream, GateError> {
        ScrollExporter::new(Arc::clone(&self.engine), Arc::clone(&self.cache)).export(request)
    }

    /// Number of matching documents, shaped for the caller's tier.
    pub async fn get_count(
        &self,
        index: &str,
        doc_type: &str,
        filter: Option<&Filter>,
        ctx: &AccessTierContext,
    ) -> Result<i64, GateError> {
        let count = QueryExecutor::new(self.engine.as_ref(), &self.cache)
            .count(index, doc_type, filter)
            .await?;
        Ok(self.guard(index)?.apply_count(count, ctx))
    }

    pub async fn numeric_aggregation(
        &self,
        spec: &NumericAggregationSpec,
        ctx: &AccessTierContext,
    ) -> Result<NumericAggregation, GateError> {
        let result = AggregationEngine::new(self.engine.as_ref(), &self.cache)
            .numeric(spec)
            .await?;
        Ok(self.guard(&spec.index)?.apply(result, ctx))
    }

    pub async fn text_aggregation(
        &self,
        spec: &TextAggregationSpec,
        ctx: &AccessTierContext,
    ) -> Result<TextAggregation, GateError> {
        let result = AggregationEngine::new(self.engine.as_ref(), &self.cache)
            .text(spec)
            .await?;
        Ok(self.guard(&spec.index)?.apply(result, ctx))
    }

    /// Field metadata of one index, or of every index when `index` is `None`.
    pub fn get_es_fields(&self, index: Option<&str>) -> Result<Vec<IndexFields>, GateError> {
        match index {
            Some(index) => {
                let meta = self
                    .cache
                    .get(index)
                    .map_err(|_| GateError::invalid(format!("Unknown index '{index}'")))?;
                Ok(vec![IndexFields::from(meta)])
            }
            None => Ok(self.cache.indices().map(IndexFields::from).collect()),
        }
    }

    #[must_use]
    pub fn is_array_field(&self, index: &str, field: &str) -> bool {
        self.cache.is_array_field(index, field)
    }

    /// The configured index holding documents of `doc_type`.
    pub fn index_for_type(&self, doc_type: &str) -> Result<String, GateError> {
        self.cache.index_for_type(doc_type).map(str::to_string)
    }

    /// Drop the gate, logging the shutdown.
    ///
    /// Open export streams keep their own engine handle and still release
    /// their cursors.
    pub fn shutdown(self) {
        tracing::info!(indices = self.guards.len(), "search gate shut down");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use serde_json::json;

    fn settings() -> GateSettings {
        GateSettings {
            indices: vec![
                IndexSettings::new(IndexDescriptor::new("subject", "subject"), true),
                IndexSettings::new(IndexDescriptor::new("file", "file"), false),
            ],
            config_index: None,
        }
    }

    fn engine() -> Arc<InMemoryEngine> {
        Arc::new(
            InMemoryEngine::new()
                .with_index("subject", "subject", json!({"age": {"type": "long"}}))
                .with_index("file", "file", json!({"size": {"type": "long"}}))
                .with_documents("subject", (0..3).map(|i| json!({"age": i})))
                .with_documents("file", (0..3).map(|i| json!({"size": i}))),
        )
    }

    #[test]
    fn settings_deserialize_with_gated_default() {
        let parsed: GateSettings = serde_json::from_value(json!({
            "indices": [{"index": "subject", "type": "subject"}]
        }))
        .expect("parse");
        assert!(parsed.indices[0].tier_gated);
        assert_eq!(parsed.config_index, None);
    }

    #[tokio::test]
    async fn counts_are_guarded_per_index() {
        let gate = SearchGate::initialize(engine(), settings())
            .await
            .expect("init");
        let ctx = AccessTierContext::aggregate(10);
        assert_eq!(
            gate.get_count("subject", "subject", None, &ctx)
                .await
                .expect("count"),
            crate::primitives::HIDDEN_COUNT
        );
        assert_eq!(
            gate.get_count("file", "file", None, &ctx)
                .await
                .expect("count"),
            3
        );
    }

    #[tokio::test]
    async fn fields_introspection() {
        let gate = SearchGate::initialize(engine(), settings())
            .await
            .expect("init");
        assert_eq!(gate.get_es_fields(None).expect("all").len(), 2);
        let subject = gate.get_es_fields(Some("subject")).expect("one");
        assert!(subject[0].fields.contains_key("age"));
        assert!(matches!(
            gate.get_es_fields(Some("nope")),
            Err(GateError::InvalidInput { .. })
        ));
        assert!(matches!(gate.guard("nope"), Err(GateError::NotFound { .. })));
        assert_eq!(gate.index_for_type("file").expect("type"), "file");
    }

    #[tokio::test]
    async fn reinitialize_swaps_the_cache() {
        let engine = engine();
        let mut gate = SearchGate::initialize(engine.clone(), settings())
            .await
            .expect("init");
        let before = gate.metadata();
        gate.reinitialize().await.expect("reinit");
        assert!(!Arc::ptr_eq(&before, &gate.metadata()));
        assert_eq!(engine.stats().mapping_requests, 4);
        gate.shutdown();
    }
}
