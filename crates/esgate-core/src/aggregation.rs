//! # Aggregation Engine
//!
//! Numeric histograms and text term buckets.
//!
//! ## Effective filter
//!
//! Both families run under the same effective filter:
//! 1. With `filter_self = false`, the aggregated field's own leaves are
//!    removed from the caller filter (facet counts ignore their own
//!    selection).
//! 2. The default authorization filter, if any, is AND-ed in.
//!
//! ## Scopes
//!
//! A field under a nested array path is aggregated inside a `nested`
//! aggregation on that path. A sub-aggregation whose field lives in another
//! scope than its parent first climbs to the root document with
//! `reverse_nested` and then descends with `nested`. Counts inside a nested
//! scope are element counts.

use crate::engine::{EngineError, SearchEngine, SearchRequest, SearchResponse};
use crate::executor::strip_nulls;
use crate::filter::FilterTranslator;
use crate::metadata::{IndexMetadata, IndexMetadataCache};
use crate::primitives::{MAX_HISTOGRAM_BUCKETS, TERMS_AGG_SIZE, signed_count};
use crate::{
    Filter, GateError, NestedBreakdown, NumericAggregation, NumericAggregationSpec, RangeBucket,
    TermBucket, TermCount, TextAggregation, TextAggregationSpec,
};
use serde_json::{Map, Value, json};

// =============================================================================
// BINNING
// =============================================================================

/// How a numeric range is cut into buckets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binning {
    /// Fixed-width buckets; the last one is clamped to the range end.
    Step(f64),
    /// This many equal-width buckets.
    Count(u64),
}

impl Binning {
    /// Select the strategy; exactly one of the two must be given.
    pub fn from_spec(range_step: Option<f64>, bin_count: Option<u64>) -> Result<Self, GateError> {
        match (range_step, bin_count) {
            (Some(step), None) if step.is_finite() && step > 0.0 => Ok(Self::Step(step)),
            (Some(step), None) => Err(GateError::invalid(format!(
                "rangeStep must be a positive number, got {step}"
            ))),
            (None, Some(0)) => Err(GateError::invalid("binCount must be at least 1")),
            (None, Some(count)) => Ok(Self::Count(count)),
            (Some(_), Some(_)) => Err(GateError::invalid(
                "rangeStep and binCount are mutually exclusive; give exactly one",
            )),
            (None, None) => Err(GateError::invalid(
                "one of rangeStep or binCount is required",
            )),
        }
    }
}

/// One computed bucket boundary pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub lower: f64,
    pub upper: f64,
    /// Whether `upper` itself belongs to the bucket.
    pub closed: bool,
}

impl Bin {
    /// The `range` aggregation entry counting this bucket.
    fn to_range(self) -> Value {
        if self.closed {
            json!({ "from": self.lower })
        } else {
            json!({ "from": self.lower, "to": self.upper })
        }
    }
}

/// Cut `[start, end]` into ascending buckets.
///
/// Buckets are half-open `[lower, upper)`. With `close_last`, the final
/// bucket also holds `end`; this is used when `end` is the observed maximum.
/// A zero-width span yields one bucket, and so does a step wider than the
/// span.
pub fn compute_bins(
    start: f64,
    end: f64,
    binning: Binning,
    close_last: bool,
) -> Result<Vec<Bin>, GateError> {
    if !start.is_finite() || !end.is_finite() {
        return Err(GateError::invalid("histogram bounds must be finite numbers"));
    }
    if start > end {
        return Err(GateError::invalid(format!(
            "rangeStart ({start}) is greater than rangeEnd ({end})"
        )));
    }
    if start == end {
        return Ok(vec![Bin {
            lower: start,
            upper: end,
            closed: close_last,
        }]);
    }

    let span = end - start;
    let mut bins = match binning {
        Binning::Step(step) => {
            if !step.is_finite() || step <= 0.0 {
                return Err(GateError::invalid(format!(
                    "rangeStep must be a positive number, got {step}"
                )));
            }
            let ratio = span / step;
            let rounded = ratio.round();
            let count = if (ratio - rounded).abs() < 1e-9 {
                rounded
            } else {
                ratio.ceil()
            }
            .max(1.0);
            if count > MAX_HISTOGRAM_BUCKETS as f64 {
                return Err(too_many_buckets(count));
            }
            let mut bins = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let lower = start + step * i as f64;
                if lower >= end {
                    break;
                }
                bins.push(Bin {
                    lower,
                    upper: (start + step * (i + 1) as f64).min(end),
                    closed: false,
                });
            }
            bins
        }
        Binning::Count(count) => {
            let count = count.max(1);
            if count > MAX_HISTOGRAM_BUCKETS as u64 {
                return Err(too_many_buckets(count as f64));
            }
            let width = span / count as f64;
            (0..count)
                .map(|i| Bin {
                    lower: start + width * i as f64,
                    upper: if i + 1 == count {
                        end
                    } else {
                        start + width * (i + 1) as f64
                    },
                    closed: false,
                })
                .collect()
        }
    };
    if let Some(last) = bins.last_mut() {
        last.upper = end;
        last.closed = close_last;
    }
    Ok(bins)
}

fn too_many_buckets(count: f64) -> GateError {
    GateError::invalid(format!(
        "histogram would have {count} buckets; the limit is {MAX_HISTOGRAM_BUCKETS}"
    ))
}

// =============================================================================
// SCOPE CROSSING
// =============================================================================

/// One step between aggregation scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Hop {
    /// Back to the root document.
    ToRoot,
    /// Into the elements of a nested array path.
    Into(String),
}

impl Hop {
    fn key(&self, name: &str) -> String {
        match self {
            Self::ToRoot => format!("{name}_root"),
            Self::Into(_) => format!("{name}_scope"),
        }
    }

    fn definition(&self) -> Value {
        match self {
            Self::ToRoot => json!({ "reverse_nested": {} }),
            Self::Into(path) => json!({ "nested": { "path": path } }),
        }
    }
}

/// Hops from the `from` scope to the `to` scope (`None` is the root).
fn hops(from: Option<&str>, to: Option<&str>) -> Vec<Hop> {
    if from == to {
        return Vec::new();
    }
    let mut hops = Vec::new();
    if from.is_some() {
        hops.push(Hop::ToRoot);
    }
    if let Some(to) = to {
        hops.push(Hop::Into(to.to_string()));
    }
    hops
}

/// An `aggs` object running `leaf` (named `name`) behind `hops`.
fn scoped_aggs(name: &str, hops: &[Hop], leaf: Value) -> Map<String, Value> {
    let mut aggs = Map::new();
    match hops.split_first() {
        None => {
            aggs.insert(name.to_string(), leaf);
        }
        Some((hop, rest)) => {
            let mut def = hop.definition();
            if let Value::Object(def) = &mut def {
                def.insert("aggs".into(), Value::Object(scoped_aggs(name, rest, leaf)));
            }
            aggs.insert(hop.key(name), def);
        }
    }
    aggs
}

/// The result of the leaf built by [`scoped_aggs`], found under `container`.
fn scoped_result<'v>(container: &'v Value, name: &str, hops: &[Hop]) -> Option<&'v Value> {
    let mut current = container;
    for hop in hops {
        current = current.get(hop.key(name))?;
    }
    current.get(name)
}

fn buckets<'v>(container: &'v Value, name: &str, hops: &[Hop]) -> Result<&'v [Value], EngineError> {
    scoped_result(container, name, hops)
        .and_then(|r| r.get("buckets"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| EngineError::Parse(format!("aggregation '{name}' has no buckets")))
}

fn doc_count(bucket: &Value) -> i64 {
    signed_count(bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0))
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Runs numeric and text aggregations against one engine.
#[derive(Clone, Copy)]
pub struct AggregationEngine<'a> {
    engine: &'a dyn SearchEngine,
    cache: &'a IndexMetadataCache,
}

impl<'a> AggregationEngine<'a> {
    #[must_use]
    pub fn new(engine: &'a dyn SearchEngine, cache: &'a IndexMetadataCache) -> Self {
        Self { engine, cache }
    }

    /// Histogram of a numeric field.
    pub async fn numeric(
        &self,
        spec: &NumericAggregationSpec,
    ) -> Result<NumericAggregation, GateError> {
        let meta = self.cache.resolve(&spec.index, &spec.doc_type)?;
        meta.require_fields("aggregation", [spec.field.as_str()])?;
        if let Some(field_type) = meta.field_type(&spec.field)
            && !field_type.is_numeric()
        {
            return Err(GateError::InvalidInput {
                message: format!(
                    "Field '{}' has type '{field_type}'; numeric aggregation needs a numeric field",
                    spec.field
                ),
                fields: vec![spec.field.clone()],
            });
        }
        let binning = Binning::from_spec(spec.range_step, spec.bin_count)?;
        if let (Some(start), Some(end)) = (spec.range_start, spec.range_end) {
            compute_bins(start, end, binning, false)?;
        }
        let query = effective_query(
            meta,
            &spec.field,
            spec.filter.as_ref(),
            spec.filter_self,
            spec.default_auth_filter.as_ref(),
        )?;

        let scope = hops(None, meta.nested_path(&spec.field));
        let target = meta.descriptor().to_string();
        let upstream = |e: EngineError| GateError::upstream("numeric_aggregation", target.clone())(e);

        let (start, end, observed_end) = match (spec.range_start, spec.range_end) {
            (Some(start), Some(end)) => (start, end, false),
            (start, end) => {
                let leaf = json!({ "stats": { "field": spec.field } });
                let response = self
                    .aggregate(meta, &spec.doc_type, query.clone(), scoped_aggs("bounds", &scope, leaf))
                    .await
                    .map_err(upstream)?;
                let stats = response
                    .aggregations
                    .as_ref()
                    .and_then(|aggs| scoped_result(aggs, "bounds", &scope));
                let min = stats.and_then(|s| s.get("min")).and_then(Value::as_f64);
                let max = stats.and_then(|s| s.get("max")).and_then(Value::as_f64);
                let (Some(min), Some(max)) = (min, max) else {
                    return Ok(NumericAggregation {
                        total_count: signed_count(response.total()),
                        histogram: Vec::new(),
                    });
                };
                let start = start.unwrap_or(min);
                let end = end.unwrap_or(max);
                if start > end {
                    // An explicit bound lies beyond every observed value.
                    return Ok(NumericAggregation {
                        total_count: signed_count(response.total()),
                        histogram: Vec::new(),
                    });
                }
                (start, end, spec.range_end.is_none())
            }
        };

        let bins = compute_bins(start, end, binning, observed_end)?;
        let leaf = json!({
            "range": {
                "field": spec.field,
                "ranges": bins.iter().map(|b| b.to_range()).collect::<Vec<_>>(),
            }
        });
        let response = self
            .aggregate(meta, &spec.doc_type, query, scoped_aggs("histogram", &scope, leaf))
            .await
            .map_err(upstream)?;
        let aggs = response.aggregations.clone().unwrap_or(Value::Null);
        let counted = buckets(&aggs, "histogram", &scope).map_err(upstream)?;
        if counted.len() != bins.len() {
            return Err(upstream(EngineError::Parse(format!(
                "expected {} range buckets, got {}",
                bins.len(),
                counted.len()
            ))));
        }

        Ok(NumericAggregation {
            total_count: signed_count(response.total()),
            histogram: bins
                .iter()
                .zip(counted)
                .map(|(bin, bucket)| RangeBucket {
                    lower: bin.lower,
                    upper: bin.upper,
                    count: doc_count(bucket),
                })
                .collect(),
        })
    }

    /// Term buckets of a field, with optional per-bucket breakdowns.
    pub async fn text(&self, spec: &TextAggregationSpec) -> Result<TextAggregation, GateError> {
        let meta = self.cache.resolve(&spec.index, &spec.doc_type)?;
        meta.require_fields(
            "aggregation",
            std::iter::once(spec.field.as_str())
                .chain(spec.nested_agg_fields.iter().map(String::as_str)),
        )?;
        let query = effective_query(
            meta,
            &spec.field,
            spec.filter.as_ref(),
            spec.filter_self,
            spec.default_auth_filter.as_ref(),
        )?;

        let parent_path = meta.nested_path(&spec.field);
        let scope = hops(None, parent_path);
        let breakdowns: Vec<(String, Vec<Hop>)> = spec
            .nested_agg_fields
            .iter()
            .enumerate()
            .map(|(i, field)| (format!("sub{i}"), hops(parent_path, meta.nested_path(field))))
            .collect();

        let mut sub_aggs = Map::new();
        for ((name, route), field) in breakdowns.iter().zip(&spec.nested_agg_fields) {
            let leaf = json!({ "terms": { "field": field, "size": TERMS_AGG_SIZE } });
            sub_aggs.extend(scoped_aggs(name, route, leaf));
        }
        let mut terms = json!({ "terms": { "field": spec.field, "size": TERMS_AGG_SIZE } });
        if !sub_aggs.is_empty()
            && let Value::Object(def) = &mut terms
        {
            def.insert("aggs".into(), Value::Object(sub_aggs));
        }

        let target = meta.descriptor().to_string();
        let upstream = |e: EngineError| GateError::upstream("text_aggregation", target.clone())(e);
        let response = self
            .aggregate(meta, &spec.doc_type, query, scoped_aggs("terms", &scope, terms))
            .await
            .map_err(upstream)?;
        let aggs = response.aggregations.clone().unwrap_or(Value::Null);

        let mut histogram = Vec::new();
        for bucket in buckets(&aggs, "terms", &scope).map_err(upstream)? {
            let mut nested = Vec::with_capacity(breakdowns.len());
            for ((name, route), field) in breakdowns.iter().zip(&spec.nested_agg_fields) {
                let values = buckets(bucket, name, route).map_err(upstream)?;
                nested.push(NestedBreakdown {
                    field: field.clone(),
                    buckets: values
                        .iter()
                        .map(|v| TermCount {
                            key: key_string(v.get("key").unwrap_or(&Value::Null)),
                            count: doc_count(v),
                        })
                        .collect(),
                });
            }
            histogram.push(TermBucket {
                key: key_string(bucket.get("key").unwrap_or(&Value::Null)),
                count: doc_count(bucket),
                nested,
            });
        }

        Ok(TextAggregation {
            total_count: signed_count(response.total()),
            histogram,
        })
    }

    async fn aggregate(
        &self,
        meta: &IndexMetadata,
        doc_type: &str,
        query: Option<Value>,
        aggs: Map<String, Value>,
    ) -> Result<SearchResponse, EngineError> {
        let body = strip_nulls(json!({
            "query": query,
            "size": 0,
            "aggs": aggs,
        }));
        self.engine
            .search(&SearchRequest::new(
                meta.index(),
                Some(doc_type.to_string()),
                body,
            ))
            .await
    }
}

/// Translate the caller filter after `filter_self` and the auth filter apply.
fn effective_query(
    meta: &IndexMetadata,
    field: &str,
    filter: Option<&Filter>,
    filter_self: bool,
    default_auth_filter: Option<&Filter>,
) -> Result<Option<Value>, GateError> {
    let own = match filter {
        Some(filter) if !filter_self => filter.without_field(field),
        other => other.cloned(),
    };
    let combined = Filter::all(own.into_iter().chain(default_auth_filter.cloned()));
    FilterTranslator::new(meta).translate_optional(combined.as_ref())
}

// =============================================================================
// TESTS
// =============================================================================
