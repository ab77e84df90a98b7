//! # In-Memory Engine
//!
//! A [`SearchEngine`] that keeps documents in memory and evaluates the query
//! and aggregation DSL subset esgate emits:
//!
//! - queries: `match_all`, `bool`, `term`, `terms`, `range`, `exists`,
//!   `nested`, `ids`
//! - aggregations: `stats`, `range`, `terms`, `nested`, `reverse_nested`
//! - paging (`from`/`size`), `_source` filtering, `field:direction` sort
//!   tokens, and scroll cursors
//!
//! Multi-valued fields follow engine semantics: a leaf matches when any
//! value matches. Fields under a path mapped as `nested` are only visible
//! inside a `nested` query or aggregation on that path, where each array
//! element is evaluated on its own.
//!
//! Call counters ([`EngineStats`]) and failure injection make it suitable
//! for lifecycle tests.

use super::{EngineError, Hit, Hits, SearchEngine, SearchRequest, SearchResponse, TotalHits};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default `size` when a search body does not set one.
const DEFAULT_SEARCH_SIZE: usize = 10;

// =============================================================================
// CALL COUNTERS
// =============================================================================

/// Calls observed by an [`InMemoryEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub searches: usize,
    pub mapping_requests: usize,
    pub scrolls_opened: usize,
    pub scroll_fetches: usize,
    pub scrolls_cleared: usize,
    /// Cursors opened and not yet cleared.
    pub open_cursors: usize,
}

impl EngineStats {
    /// Every call that reached the engine.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.searches
            + self.mapping_requests
            + self.scrolls_opened
            + self.scroll_fetches
            + self.scrolls_cleared
    }
}

// =============================================================================
// STORAGE
// =============================================================================

#[derive(Debug, Clone)]
struct StoredIndex {
    doc_type: String,
    properties: Value,
    /// Dotted paths mapped as `nested`.
    nested_paths: Vec<String>,
    docs: Vec<(String, Value)>,
}

#[derive(Debug)]
struct Cursor {
    hits: Vec<Hit>,
    position: usize,
    batch: usize,
}

impl Cursor {
    fn next_batch(&mut self) -> Vec<Hit> {
        let end = (self.position + self.batch).min(self.hits.len());
        let batch = self.hits[self.position..end].to_vec();
        self.position = end;
        batch
    }
}

#[derive(Debug, Default)]
struct State {
    cursors: BTreeMap<String, Cursor>,
    next_cursor: u64,
    stats: EngineStats,
}

/// In-memory [`SearchEngine`].
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    indices: BTreeMap<String, StoredIndex>,
    failing_mappings: BTreeSet<String>,
    fail_scroll_fetch: Option<usize>,
    state: Mutex<State>,
}

impl InMemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index with its mapping `properties` document.
    #[must_use]
    pub fn with_index(
        mut self,
        index: impl Into<String>,
        doc_type: impl Into<String>,
        properties: Value,
    ) -> Self {
        let mut nested_paths = Vec::new();
        collect_nested_paths(&properties, "", &mut nested_paths);
        self.indices.insert(
            index.into(),
            StoredIndex {
                doc_type: doc_type.into(),
                properties,
                nested_paths,
                docs: Vec::new(),
            },
        );
        self
    }

    /// Append documents with sequential ids. Unknown indices are ignored.
    #[must_use]
    pub fn with_documents(mut self, index: &str, docs: impl IntoIterator<Item = Value>) -> Self {
        if let Some(stored) = self.indices.get_mut(index) {
            for doc in docs {
                let id = stored.docs.len().to_string();
                stored.docs.push((id, doc));
            }
        }
        self
    }

    /// Append one document under an explicit id.
    #[must_use]
    pub fn with_document(mut self, index: &str, id: impl Into<String>, doc: Value) -> Self {
        if let Some(stored) = self.indices.get_mut(index) {
            stored.docs.push((id.into(), doc));
        }
        self
    }

    /// Make `get_mapping` fail for `index`.
    #[must_use]
    pub fn with_failing_mapping(mut self, index: impl Into<String>) -> Self {
        self.failing_mappings.insert(index.into());
        self
    }

    /// Make the `n`-th scroll fetch (1-based, counted across cursors) fail.
    #[must_use]
    pub fn with_scroll_failure_at(mut self, n: usize) -> Self {
        self.fail_scroll_fetch = Some(n);
        self
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> EngineStats {
        self.state().stats
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored(&self, index: &str) -> Result<&StoredIndex, EngineError> {
        self.indices.get(index).ok_or_else(|| EngineError::Server {
            status: 404,
            body: format!("index_not_found_exception: {index}"),
        })
    }

    /// Evaluate query, sort and aggregations; returns all hits unpaged.
    fn evaluate(
        &self,
        request: &SearchRequest,
    ) -> Result<(Vec<Hit>, Option<Value>), EngineError> {
        let stored = self.stored(&request.index)?;
        let type_matches = request
            .doc_type
            .as_ref()
            .is_none_or(|t| *t == stored.doc_type);
        let match_all = json!({ "match_all": {} });
        let query = request.body.get("query").unwrap_or(&match_all);

        let mut matched: Vec<Scope<'_>> = Vec::new();
        if type_matches {
            for (position, (id, source)) in stored.docs.iter().enumerate() {
                let scope = Scope::root(position, id, source, &stored.nested_paths);
                if matches(query, scope)? {
                    matched.push(scope);
                }
            }
        }

        sort_scopes(&mut matched, &request.sort)?;

        let aggregations = match request
            .body
            .get("aggs")
            .or_else(|| request.body.get("aggregations"))
        {
            Some(defs) => Some(evaluate_aggs(defs, &matched)?),
            None => None,
        };

        let projection = request.body.get("_source");
        let hits = matched
            .iter()
            .map(|s| Hit {
                id: s.id.to_string(),
                source: project(s.source, projection),
            })
            .collect();
        Ok((hits, aggregations))
    }
}

fn collect_nested_paths(properties: &Value, prefix: &str, out: &mut Vec<String>) {
    let Some(map) = properties.as_object() else {
        return;
    };
    for (name, mapping) in map {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if mapping.get("type").and_then(Value::as_str) == Some("nested") {
            out.push(path.clone());
        }
        if let Some(children) = mapping.get("properties") {
            collect_nested_paths(children, &path, out);
        }
    }
}

fn body_usize(body: &Value, key: &str, default: usize) -> usize {
    body.get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

fn rejected(message: impl Into<String>) -> EngineError {
    EngineError::Rejected(message.into())
}

#[async_trait]
impl SearchEngine for InMemoryEngine {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        self.state().stats.searches += 1;
        let (hits, aggregations) = self.evaluate(request)?;
        let total = hits.len() as u64;
        let from = body_usize(&request.body, "from", 0);
        let size = body_usize(&request.body, "size", DEFAULT_SEARCH_SIZE);
        Ok(SearchResponse {
            scroll_id: None,
            hits: Hits {
                total: TotalHits::Count(total),
                hits: hits.into_iter().skip(from).take(size).collect(),
            },
            aggregations,
        })
    }

    async fn open_scroll(
        &self,
        request: &SearchRequest,
        _ttl: &str,
    ) -> Result<SearchResponse, EngineError> {
        let (hits, _) = self.evaluate(request)?;
        let total = hits.len() as u64;
        let batch = body_usize(&request.body, "size", DEFAULT_SEARCH_SIZE).max(1);
        let mut cursor = Cursor {
            hits,
            position: 0,
            batch,
        };
        let first = cursor.next_batch();

        let mut state = self.state();
        state.stats.scrolls_opened += 1;
        state.stats.open_cursors += 1;
        state.next_cursor += 1;
        let id = format!("cursor-{}", state.next_cursor);
        state.cursors.insert(id.clone(), cursor);

        Ok(SearchResponse {
            scroll_id: Some(id),
            hits: Hits {
                total: TotalHits::Count(total),
                hits: first,
            },
            aggregations: None,
        })
    }

    async fn scroll(&self, scroll_id: &str, _ttl: &str) -> Result<SearchResponse, EngineError> {
        let mut state = self.state();
        state.stats.scroll_fetches += 1;
        if self.fail_scroll_fetch == Some(state.stats.scroll_fetches) {
            return Err(EngineError::Server {
                status: 503,
                body: "injected scroll failure".into(),
            });
        }
        let cursor = state
            .cursors
            .get_mut(scroll_id)
            .ok_or_else(|| rejected(format!("No search context found for id [{scroll_id}]")))?;
        let total = cursor.hits.len() as u64;
        let batch = cursor.next_batch();
        Ok(SearchResponse {
            scroll_id: Some(scroll_id.to_string()),
            hits: Hits {
                total: TotalHits::Count(total),
                hits: batch,
            },
            aggregations: None,
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.stats.scrolls_cleared += 1;
        if state.cursors.remove(scroll_id).is_none() {
            return Err(EngineError::Server {
                status: 404,
                body: format!("No search context found for id [{scroll_id}]"),
            });
        }
        state.stats.open_cursors = state.stats.open_cursors.saturating_sub(1);
        Ok(())
    }

    async fn get_mapping(&self, index: &str, doc_type: &str) -> Result<Value, EngineError> {
        self.state().stats.mapping_requests += 1;
        if self.failing_mappings.contains(index) {
            return Err(EngineError::Server {
                status: 500,
                body: format!("mapping unavailable for {index}"),
            });
        }
        let stored = self.stored(index)?;
        if stored.doc_type != doc_type {
            return Err(EngineError::Server {
                status: 404,
                body: format!("type_missing_exception: {doc_type}"),
            });
        }
        Ok(json!({
            index: { "mappings": { doc_type: { "properties": stored.properties } } }
        }))
    }
}

// =============================================================================
// EVALUATION SCOPE
// =============================================================================

/// A root document, optionally narrowed to one element of a nested array.
#[derive(Debug, Clone, Copy)]
struct Scope<'a> {
    root: usize,
    id: &'a str,
    source: &'a Value,
    nested: Option<(&'a str, &'a Value)>,
    /// Nested paths of the index; unreadable from the root.
    nested_paths: &'a [String],
}

impl<'a> Scope<'a> {
    fn root(root: usize, id: &'a str, source: &'a Value, nested_paths: &'a [String]) -> Self {
        Self {
            root,
            id,
            source,
            nested: None,
            nested_paths,
        }
    }

    fn element(self, path: &'a str, element: &'a Value) -> Self {
        Self {
            nested: Some((path, element)),
            ..self
        }
    }

    /// Scalar values of `field` visible from this scope.
    fn values(&self, field: &str) -> Vec<&'a Value> {
        if let Some((path, element)) = self.nested {
            if field == path {
                return collect_values(element, &[]);
            }
            if let Some(rest) = field.strip_prefix(path).and_then(|r| r.strip_prefix('.')) {
                let segments: Vec<&str> = rest.split('.').collect();
                return collect_values(element, &segments);
            }
        }
        if self.nested_paths.iter().any(|p| is_under(field, p)) {
            return Vec::new();
        }
        let segments: Vec<&str> = field.split('.').collect();
        collect_values(self.source, &segments)
    }

    /// Elements of the array (or single value) at `path`, from the root.
    fn elements(&self, path: &str) -> Vec<&'a Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut out = Vec::new();
        walk(self.source, &segments, &mut |v| match v {
            Value::Array(items) => out.extend(items.iter().filter(|i| !i.is_null())),
            Value::Null => {}
            other => out.push(other),
        });
        out
    }
}

/// `field` is `path` itself or a dotted descendant of it.
fn is_under(field: &str, path: &str) -> bool {
    field
        .strip_prefix(path)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// Walk `segments` through objects, fanning out over arrays, and call
/// `visit` on whatever sits at the end of the path.
fn walk<'a>(value: &'a Value, segments: &[&str], visit: &mut dyn FnMut(&'a Value)) {
    match (value, segments.split_first()) {
        (_, None) => visit(value),
        (Value::Array(items), Some(_)) => {
            for item in items {
                walk(item, segments, visit);
            }
        }
        (Value::Object(map), Some((head, rest))) => {
            if let Some(child) = map.get(*head) {
                walk(child, rest, visit);
            }
        }
        _ => {}
    }
}

fn collect_values<'a>(value: &'a Value, segments: &[&str]) -> Vec<&'a Value> {
    fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
        match value {
            Value::Array(items) => items.iter().for_each(|i| flatten(i, out)),
            Value::Null => {}
            other => out.push(other),
        }
    }
    let mut out = Vec::new();
    walk(value, segments, &mut |v| flatten(v, &mut out));
    out
}

// =============================================================================
// QUERY EVALUATION
// =============================================================================

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// `{field: arg}` → `(field, arg)` for single-field clauses.
fn single_field<'a>(clause: &'a Value, kind: &str) -> Result<(&'a str, &'a Value), EngineError> {
    clause
        .as_object()
        .and_then(|m| m.iter().next())
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| rejected(format!("malformed {kind} clause: {clause}")))
}

fn clause_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
        None => Vec::new(),
    }
}

fn in_range(value: &Value, bounds: &Map<String, Value>) -> bool {
    bounds.iter().all(|(op, bound)| {
        let ord = compare(value, bound);
        match op.as_str() {
            "gt" => ord == Some(Ordering::Greater),
            "gte" => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            "lt" => ord == Some(Ordering::Less),
            "lte" => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            _ => true,
        }
    })
}

fn matches(query: &Value, scope: Scope<'_>) -> Result<bool, EngineError> {
    let (kind, arg) = single_field(query, "query")?;
    match kind {
        "match_all" => Ok(true),
        "bool" => {
            for clause in clause_list(arg.get("must"))
                .into_iter()
                .chain(clause_list(arg.get("filter")))
            {
                if !matches(clause, scope)? {
                    return Ok(false);
                }
            }
            for clause in clause_list(arg.get("must_not")) {
                if matches(clause, scope)? {
                    return Ok(false);
                }
            }
            let should = clause_list(arg.get("should"));
            let has_required = arg.get("must").is_some() || arg.get("filter").is_some();
            let minimum = arg
                .get("minimum_should_match")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(usize::from(!should.is_empty() && !has_required));
            let mut satisfied = 0;
            for clause in should {
                if matches(clause, scope)? {
                    satisfied += 1;
                }
            }
            Ok(satisfied >= minimum)
        }
        "term" => {
            let (field, expected) = single_field(arg, "term")?;
            let expected = expected.get("value").unwrap_or(expected);
            Ok(scope.values(field).iter().any(|v| json_eq(v, expected)))
        }
        "terms" => {
            let (field, expected) = single_field(arg, "terms")?;
            let expected = expected
                .as_array()
                .ok_or_else(|| rejected("terms expects an array"))?;
            Ok(scope
                .values(field)
                .iter()
                .any(|v| expected.iter().any(|e| json_eq(v, e))))
        }
        "range" => {
            let (field, bounds) = single_field(arg, "range")?;
            let bounds = bounds
                .as_object()
                .ok_or_else(|| rejected("range expects an object of bounds"))?;
            Ok(scope.values(field).iter().any(|v| in_range(v, bounds)))
        }
        "exists" => {
            let field = arg
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| rejected("exists expects a field"))?;
            Ok(!scope.values(field).is_empty())
        }
        "nested" => {
            let path = arg
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| rejected("nested expects a path"))?;
            let inner = arg
                .get("query")
                .ok_or_else(|| rejected("nested expects a query"))?;
            for element in scope.elements(path) {
                if matches(inner, scope.element(path, element))? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "ids" => {
            let ids = arg
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| rejected("ids expects values"))?;
            Ok(ids.iter().any(|v| v.as_str() == Some(scope.id)))
        }
        other => Err(rejected(format!("unsupported query type: {other}"))),
    }
}

// =============================================================================
// SORT & PROJECTION
// =============================================================================

fn sort_scopes(scopes: &mut [Scope<'_>], tokens: &[String]) -> Result<(), EngineError> {
    let mut keys = Vec::with_capacity(tokens.len());
    for token in tokens {
        let (field, direction) = token.rsplit_once(':').unwrap_or((token.as_str(), "asc"));
        let descending = match direction {
            "asc" => false,
            "desc" => true,
            other => return Err(rejected(format!("bad sort direction: {other}"))),
        };
        keys.push((field, descending));
    }
    if keys.is_empty() {
        return Ok(());
    }

    // Multi-valued fields sort by their min (asc) or max (desc) value.
    let pick = |scope: &Scope<'_>, field: &str, descending: bool| -> Option<Value> {
        let values = scope.values(field).into_iter();
        let by = |a: &&Value, b: &&Value| compare(a, b).unwrap_or(Ordering::Equal);
        let chosen = if descending {
            values.max_by(by)
        } else {
            values.min_by(by)
        };
        chosen.cloned()
    };

    scopes.sort_by(|a, b| {
        for &(field, descending) in &keys {
            let ord = match (pick(a, field, descending), pick(b, field, descending)) {
                (Some(x), Some(y)) => {
                    let ord = compare(&x, &y).unwrap_or(Ordering::Equal);
                    if descending { ord.reverse() } else { ord }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// Apply `_source` filtering: `false` hides the source, a list keeps only
/// the named (possibly dotted) fields.
fn project(source: &Value, projection: Option<&Value>) -> Value {
    match projection {
        Some(Value::Bool(false)) => json!({}),
        Some(Value::Array(fields)) => {
            let mut out = Map::new();
            for field in fields.iter().filter_map(Value::as_str) {
                let mut current = Some(source);
                for segment in field.split('.') {
                    current = current.and_then(|v| v.get(segment));
                }
                if let Some(value) = current {
                    insert_path(&mut out, field, value.clone());
                }
            }
            Value::Object(out)
        }
        _ => source.clone(),
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

// =============================================================================
// AGGREGATIONS
// =============================================================================

fn evaluate_aggs(defs: &Value, scopes: &[Scope<'_>]) -> Result<Value, EngineError> {
    let defs = defs
        .as_object()
        .ok_or_else(|| rejected("aggregations must be an object"))?;
    let mut out = Map::new();
    for (name, def) in defs {
        out.insert(name.clone(), evaluate_agg(def, scopes)?);
    }
    Ok(Value::Object(out))
}

fn with_sub_aggs(
    mut result: Map<String, Value>,
    def: &Value,
    scopes: &[Scope<'_>],
) -> Result<Value, EngineError> {
    if let Some(sub) = def.get("aggs").or_else(|| def.get("aggregations"))
        && let Value::Object(sub_results) = evaluate_aggs(sub, scopes)?
    {
        result.extend(sub_results);
    }
    Ok(Value::Object(result))
}

fn agg_field<'a>(arg: &'a Value, kind: &str) -> Result<&'a str, EngineError> {
    arg.get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| rejected(format!("{kind} aggregation expects a field")))
}

fn evaluate_agg(def: &Value, scopes: &[Scope<'_>]) -> Result<Value, EngineError> {
    let object = def
        .as_object()
        .ok_or_else(|| rejected("aggregation must be an object"))?;
    let (kind, arg) = object
        .iter()
        .find(|(k, _)| k.as_str() != "aggs" && k.as_str() != "aggregations")
        .ok_or_else(|| rejected("aggregation has no type"))?;

    match kind.as_str() {
        "stats" => {
            let field = agg_field(arg, "stats")?;
            let numbers: Vec<f64> = scopes
                .iter()
                .flat_map(|s| s.values(field))
                .filter_map(Value::as_f64)
                .collect();
            if numbers.is_empty() {
                return Ok(json!({"count": 0, "min": null, "max": null, "avg": null, "sum": 0.0}));
            }
            let sum: f64 = numbers.iter().sum();
            let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
            let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Ok(json!({
                "count": numbers.len(),
                "min": min,
                "max": max,
                "avg": sum / numbers.len() as f64,
                "sum": sum,
            }))
        }
        "range" => {
            let field = agg_field(arg, "range")?;
            let ranges = arg
                .get("ranges")
                .and_then(Value::as_array)
                .ok_or_else(|| rejected("range aggregation expects ranges"))?;
            let mut buckets = Vec::with_capacity(ranges.len());
            for range in ranges {
                let from = range.get("from").and_then(Value::as_f64);
                let to = range.get("to").and_then(Value::as_f64);
                let inside: Vec<Scope<'_>> = scopes
                    .iter()
                    .copied()
                    .filter(|s| {
                        s.values(field).iter().filter_map(|v| v.as_f64()).any(|v| {
                            from.is_none_or(|f| v >= f) && to.is_none_or(|t| v < t)
                        })
                    })
                    .collect();
                let mut bucket = Map::new();
                if let Some(from) = from {
                    bucket.insert("from".into(), json!(from));
                }
                if let Some(to) = to {
                    bucket.insert("to".into(), json!(to));
                }
                bucket.insert("doc_count".into(), json!(inside.len()));
                buckets.push(with_sub_aggs(bucket, def, &inside)?);
            }
            Ok(json!({ "buckets": buckets }))
        }
        "terms" => {
            let field = agg_field(arg, "terms")?;
            let size = body_usize(arg, "size", DEFAULT_SEARCH_SIZE);
            let mut groups: BTreeMap<String, (Value, Vec<Scope<'_>>)> = BTreeMap::new();
            for scope in scopes {
                let mut seen = BTreeSet::new();
                for value in scope.values(field) {
                    let key = value.to_string();
                    if seen.insert(key.clone()) {
                        groups
                            .entry(key)
                            .or_insert_with(|| (value.clone(), Vec::new()))
                            .1
                            .push(*scope);
                    }
                }
            }
            let mut ordered: Vec<(Value, Vec<Scope<'_>>)> = groups.into_values().collect();
            ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
            let mut buckets = Vec::new();
            for (key, members) in ordered.into_iter().take(size) {
                let mut bucket = Map::new();
                bucket.insert("key".into(), key);
                bucket.insert("doc_count".into(), json!(members.len()));
                buckets.push(with_sub_aggs(bucket, def, &members)?);
            }
            Ok(json!({ "buckets": buckets }))
        }
        "nested" => {
            let path = arg
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| rejected("nested aggregation expects a path"))?;
            let elements: Vec<Scope<'_>> = scopes
                .iter()
                .flat_map(|s| {
                    let root = Scope { nested: None, ..*s };
                    root.elements(path)
                        .into_iter()
                        .map(move |e| root.element(path, e))
                })
                .collect();
            let mut result = Map::new();
            result.insert("doc_count".into(), json!(elements.len()));
            with_sub_aggs(result, def, &elements)
        }
        "reverse_nested" => {
            let mut seen = BTreeSet::new();
            let roots: Vec<Scope<'_>> = scopes
                .iter()
                .filter(|s| seen.insert(s.root))
                .map(|s| Scope { nested: None, ..*s })
                .collect();
            let mut result = Map::new();
            result.insert("doc_count".into(), json!(roots.len()));
            with_sub_aggs(result, def, &roots)
        }
        other => Err(rejected(format!("unsupported aggregation type: {other}"))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
