//! # Query Executor
//!
//! Bounded, paged document search and match counts.
//!
//! Every request is validated in full before the engine sees it: the index
//! and type, the projected fields, the filter, the sort, and the page window
//! (`offset + size <= PAGE_SIZE_CEILING`). Engine failures are wrapped with
//! the operation and target and are never retried.

use crate::engine::{SearchEngine, SearchRequest};
use crate::filter::FilterTranslator;
use crate::metadata::{IndexMetadata, IndexMetadataCache};
use crate::primitives::{DEFAULT_PAGE_SIZE, PAGE_SIZE_CEILING, signed_count};
use crate::sort::SortTranslator;
use crate::{Filter, GateError, QueryRequest, SortKey};
use serde_json::{Map, Value, json};

// =============================================================================
// SHARED REQUEST PREPARATION
// =============================================================================

/// The validated, translated parts of a document search.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedSearch {
    pub query: Option<Value>,
    pub source: Option<Value>,
    pub sort: Vec<String>,
}

/// Validate and translate the filter, projection and sort of a search.
pub(crate) fn prepare_search(
    meta: &IndexMetadata,
    filter: Option<&Filter>,
    fields: Option<&[String]>,
    sort: Option<&[SortKey]>,
) -> Result<PreparedSearch, GateError> {
    if let Some(fields) = fields {
        meta.require_fields("projection", fields.iter().map(String::as_str))?;
    }
    let query = FilterTranslator::new(meta).translate_optional(filter)?;
    let sort = match sort {
        Some(keys) => SortTranslator::new(meta).translate(keys)?,
        None => Vec::new(),
    };
    Ok(PreparedSearch {
        query,
        source: fields.map(|f| json!(f)),
        sort,
    })
}

/// Remove null-valued object members, recursively.
///
/// Optional request parts are built as `null` and dropped here, so the
/// engine never sees an explicit null.
#[must_use]
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

/// Runs paged searches and counts against one engine.
#[derive(Clone, Copy)]
pub struct QueryExecutor<'a> {
    engine: &'a dyn SearchEngine,
    cache: &'a IndexMetadataCache,
}

impl<'a> QueryExecutor<'a> {
    #[must_use]
    pub fn new(engine: &'a dyn SearchEngine, cache: &'a IndexMetadataCache) -> Self {
        Self { engine, cache }
    }

    /// One page of documents, in engine order.
    pub async fn run(&self, request: &QueryRequest) -> Result<Vec<Value>, GateError> {
        let meta = self.cache.resolve(&request.index, &request.doc_type)?;
        let prepared = prepare_search(
            meta,
            request.filter.as_ref(),
            request.fields.as_deref(),
            request.sort.as_deref(),
        )?;

        let size = request.size.unwrap_or(DEFAULT_PAGE_SIZE);
        let window = request.offset.saturating_add(size);
        if window > PAGE_SIZE_CEILING {
            return Err(GateError::invalid(format!(
                "offset + size = {window} exceeds the page limit of {PAGE_SIZE_CEILING}; \
                 use the export (download) path for larger result sets"
            )));
        }

        let body = strip_nulls(json!({
            "query": prepared.query,
            "_source": prepared.source,
            "from": request.offset,
            "size": size,
        }));
        let search = SearchRequest::new(meta.index(), Some(request.doc_type.clone()), body)
            .with_sort(prepared.sort);
        let response = self
            .engine
            .search(&search)
            .await
            .map_err(GateError::upstream("search", meta.descriptor().to_string()))?;
        Ok(response.into_sources())
    }

    /// Number of documents matching `filter`.
    pub async fn count(
        &self,
        index: &str,
        doc_type: &str,
        filter: Option<&Filter>,
    ) -> Result<i64, GateError> {
        let meta = self.cache.resolve(index, doc_type)?;
        let query = FilterTranslator::new(meta).translate_optional(filter)?;
        let body = strip_nulls(json!({ "query": query, "size": 0 }));
        let response = self
            .engine
            .search(&SearchRequest::new(
                meta.index(),
                Some(doc_type.to_string()),
                body,
            ))
            .await
            .map_err(GateError::upstream("count", meta.descriptor().to_string()))?;
        Ok(signed_count(response.total()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use crate::{FieldType, FieldTypeMap, IndexDescriptor};

    fn cache() -> IndexMetadataCache {
        let mut fields = FieldTypeMap::new();
        fields.insert("name".into(), FieldType::Keyword);
        fields.insert("age".into(), FieldType::Long);
        IndexMetadataCache::from_indices([IndexMetadata::new(
            IndexDescriptor::new("people", "person"),
            fields,
            Vec::new(),
        )])
    }

    fn engine() -> InMemoryEngine {
        InMemoryEngine::new()
            .with_index(
                "people",
                "person",
                json!({"name": {"type": "keyword"}, "age": {"type": "long"}}),
            )
            .with_documents(
                "people",
                (0..25).map(|i| json!({"name": format!("p{i:02}"), "age": i})),
            )
    }

    #[test]
    fn strip_nulls_recurses() {
        let stripped = strip_nulls(json!({
            "a": null,
            "b": {"c": null, "d": 1},
            "e": [{"f": null}]
        }));
        assert_eq!(stripped, json!({"b": {"d": 1}, "e": [{}]}));
    }

    #[tokio::test]
    async fn pages_sorts_and_projects() {
        let engine = engine();
        let cache = cache();
        let executor = QueryExecutor::new(&engine, &cache);
        let mut request = QueryRequest::new("people", "person");
        request.offset = 2;
        request.size = Some(3);
        request.fields = Some(vec!["name".into()]);
        request.sort = Some(vec![SortKey::desc("age")]);
        let docs = executor.run(&request).await.expect("run");
        assert_eq!(
            docs,
            vec![
                json!({"name": "p22"}),
                json!({"name": "p21"}),
                json!({"name": "p20"})
            ]
        );
    }

    #[tokio::test]
    async fn default_page_size_applies() {
        let engine = engine();
        let cache = cache();
        let docs = QueryExecutor::new(&engine, &cache)
            .run(&QueryRequest::new("people", "person"))
            .await
            .expect("run");
        assert_eq!(docs.len() as u64, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn invalid_projection_names_every_field() {
        let engine = engine();
        let cache = cache();
        let mut request = QueryRequest::new("people", "person");
        request.fields = Some(vec!["x".into(), "name".into(), "y".into()]);
        let err = QueryExecutor::new(&engine, &cache)
            .run(&request)
            .await
            .expect_err("invalid");
        assert_eq!(err.fields(), ["x".to_string(), "y".to_string()]);
        assert_eq!(engine.stats().total_calls(), 0);
    }

    #[tokio::test]
    async fn count_reads_total() {
        let engine = engine();
        let cache = cache();
        let count = QueryExecutor::new(&engine, &cache)
            .count("people", "person", Some(&Filter::below("age", 5)))
            .await
            .expect("count");
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn engine_failure_is_upstream() {
        let engine = InMemoryEngine::new();
        let cache = cache();
        let err = QueryExecutor::new(&engine, &cache)
            .run(&QueryRequest::new("people", "person"))
            .await
            .expect_err("missing index");
        assert!(matches!(
            err,
            GateError::Upstream {
                operation: "search",
                ..
            }
        ));
    }
}
