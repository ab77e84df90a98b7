//! # Property-Based Tests
//!
//! Translation, binning and redaction invariants checked with proptest.
//!
//! The filter round-trip runs every generated filter through the gate
//! against the in-memory engine and compares the matched documents with an
//! independent evaluation of the untranslated filter.

use esgate_core::guard::{Redact, redact_count};
use esgate_core::primitives::HIDDEN_COUNT;
use esgate_core::{
    Binning, Filter, GateSettings, IndexDescriptor, IndexSettings, InMemoryEngine, QueryRequest,
    RangeBucket, SearchGate, compute_bins,
};
use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// REFERENCE EVALUATOR
// =============================================================================

/// Scalar values at a dotted path, fanning out over arrays.
fn values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            let child = match value {
                Value::Object(map) => map.get(segment),
                _ => None,
            };
            match child {
                Some(Value::Array(items)) => next.extend(items.iter()),
                Some(Value::Null) | None => {}
                Some(other) => next.push(other),
            }
        }
        current = next;
    }
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .filter(|v| !v.is_null() && !v.is_object())
        .collect()
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn reference(filter: &Filter, doc: &Value) -> bool {
    match filter {
        Filter::And(children) => children.iter().all(|c| reference(c, doc)),
        Filter::Or(children) => children.iter().any(|c| reference(c, doc)),
        Filter::Not(child) => !reference(child, doc),
        Filter::Eq { field, value } => values(doc, field).iter().any(|v| same(v, value)),
        Filter::In {
            field,
            values: wanted,
        } => values(doc, field)
            .iter()
            .any(|v| wanted.iter().any(|w| same(v, w))),
        Filter::Range {
            field,
            lower,
            upper,
            include_lower,
            include_upper,
        } => values(doc, field).iter().filter_map(|v| v.as_f64()).any(|v| {
            let above = match lower.as_ref().and_then(Value::as_f64) {
                Some(l) if *include_lower => v >= l,
                Some(l) => v > l,
                None => true,
            };
            let below = match upper.as_ref().and_then(Value::as_f64) {
                Some(u) if *include_upper => v <= u,
                Some(u) => v < u,
                None => true,
            };
            above && below
        }),
        Filter::Exists { field } => !values(doc, field).is_empty(),
    }
}

// =============================================================================
// GENERATORS
// =============================================================================

fn doc_strategy() -> impl Strategy<Value = Value> {
    (
        proptest::option::of(0i64..6),
        proptest::option::of(prop::sample::select(vec!["x", "y", "z"])),
        vec(prop::sample::select(vec!["red", "green", "blue"]), 0..3),
        vec(0i64..20, 0..3),
    )
        .prop_map(|(a, b, tags, days)| {
            let mut doc = serde_json::Map::new();
            if let Some(a) = a {
                doc.insert("a".into(), json!(a));
            }
            if let Some(b) = b {
                doc.insert("b".into(), json!(b));
            }
            if !tags.is_empty() {
                doc.insert("tags".into(), json!(tags));
            }
            if !days.is_empty() {
                let visits: Vec<Value> = days.iter().map(|d| json!({"days": d})).collect();
                doc.insert("visits".into(), json!(visits));
            }
            Value::Object(doc)
        })
}

fn leaf_strategy() -> impl Strategy<Value = Filter> {
    let numeric_field = prop::sample::select(vec!["a", "visits.days"]);
    let keyword = prop_oneof![
        (
            prop::sample::select(vec!["x", "y", "z"]),
            prop::sample::select(vec!["b"])
        ),
        (
            prop::sample::select(vec!["red", "green", "blue"]),
            prop::sample::select(vec!["tags"])
        ),
    ];
    let bound = (0i64..20, any::<bool>());
    prop_oneof![
        keyword.clone().prop_map(|(value, field)| Filter::eq(field, value)),
        (numeric_field.clone(), 0i64..20).prop_map(|(field, value)| Filter::eq(field, value)),
        (keyword, prop::sample::select(vec!["x", "red"]))
            .prop_map(|((v, field), extra)| Filter::is_in(field, [v, extra])),
        (
            numeric_field.clone(),
            proptest::option::of(bound.clone()),
            proptest::option::of(bound)
        )
            .prop_filter("at least one bound", |(_, l, u)| l.is_some() || u.is_some())
            .prop_map(|(field, lower, upper)| Filter::Range {
                field: field.to_string(),
                lower: lower.map(|(v, _)| json!(v)),
                upper: upper.map(|(v, _)| json!(v)),
                include_lower: lower.is_none_or(|(_, inc)| inc),
                include_upper: upper.is_none_or(|(_, inc)| inc),
            }),
        prop::sample::select(vec!["a", "b", "tags", "visits.days"]).prop_map(|field| Filter::exists(field)),
    ]
}

fn filter_strategy() -> impl Strategy<Value = Filter> {
    leaf_strategy().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..3).prop_map(Filter::And),
            vec(inner.clone(), 0..3).prop_map(Filter::Or),
            inner.prop_map(Filter::not),
        ]
    })
}

// =============================================================================
// HARNESS
// =============================================================================

fn run_filter(docs: &[Value], filter: &Filter) -> BTreeSet<usize> {
    let engine = Arc::new(
        InMemoryEngine::new()
            .with_index(
                "items",
                "item",
                json!({
                    "id": {"type": "long"},
                    "a": {"type": "long"},
                    "b": {"type": "keyword"},
                    "tags": {"type": "keyword"},
                    "visits": {"type": "nested", "properties": {"days": {"type": "long"}}}
                }),
            )
            .with_documents(
                "items",
                docs.iter().enumerate().map(|(i, doc)| {
                    let mut doc = doc.clone();
                    if let Value::Object(map) = &mut doc {
                        map.insert("id".into(), json!(i));
                    }
                    doc
                }),
            )
            .with_index("config", "config", json!({}))
            .with_document("config", "items", json!({"array": ["tags", "visits"]})),
    );
    let settings = GateSettings {
        indices: vec![IndexSettings::new(IndexDescriptor::new("items", "item"), true)],
        config_index: Some("config".into()),
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let gate = SearchGate::initialize(engine, settings)
            .await
            .expect("init");
        let mut request = QueryRequest::new("items", "item");
        request.filter = Some(filter.clone());
        request.size = Some(1_000);
        gate.get_data(&request)
            .await
            .expect("query")
            .iter()
            .filter_map(|doc| doc["id"].as_u64())
            .map(|id| id as usize)
            .collect()
    })
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every translated filter selects exactly the documents the
    /// untranslated filter accepts.
    #[test]
    fn translated_filter_matches_reference(
        docs in vec(doc_strategy(), 0..20),
        filter in filter_strategy(),
    ) {
        let expected: BTreeSet<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| reference(&filter, doc))
            .map(|(i, _)| i)
            .collect();
        prop_assert_eq!(run_filter(&docs, &filter), expected);
    }
}

proptest! {
    /// Equal-width buckets tile the span exactly.
    #[test]
    fn bin_count_tiles_the_span(
        start in -1_000.0f64..1_000.0,
        width in 0.001f64..1_000.0,
        count in 1u64..60,
        close_last in any::<bool>(),
    ) {
        let end = start + width;
        let bins = compute_bins(start, end, Binning::Count(count), close_last).expect("bins");
        prop_assert_eq!(bins.len() as u64, count);
        prop_assert_eq!(bins[0].lower, start);
        prop_assert_eq!(bins[bins.len() - 1].upper, end);
        prop_assert_eq!(bins[bins.len() - 1].closed, close_last);
        for pair in bins.windows(2) {
            prop_assert_eq!(pair[0].upper, pair[1].lower);
            prop_assert!(pair[0].lower < pair[0].upper);
            prop_assert!(!pair[0].closed);
        }
    }

    /// Fixed-width buckets start at the range start, never exceed the step,
    /// and end exactly at the range end.
    #[test]
    fn range_step_covers_the_span(
        start in -1_000.0f64..1_000.0,
        step in 0.5f64..100.0,
        steps in 0.01f64..200.0,
    ) {
        let end = start + step * steps;
        let bins = compute_bins(start, end, Binning::Step(step), false).expect("bins");
        prop_assert!(!bins.is_empty());
        prop_assert_eq!(bins[0].lower, start);
        prop_assert_eq!(bins[bins.len() - 1].upper, end);
        for bin in &bins {
            prop_assert!(bin.upper - bin.lower <= step * (1.0 + 1e-9));
            prop_assert!(bin.lower < bin.upper);
        }
        for pair in bins.windows(2) {
            prop_assert_eq!(pair[0].upper, pair[1].lower);
        }
    }

    /// Redaction is idempotent and only ever hides counts below threshold.
    #[test]
    fn redaction_is_idempotent(
        counts in vec(0i64..200, 0..30),
        threshold in 0u64..150,
    ) {
        let buckets: Vec<RangeBucket> = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| RangeBucket { lower: i as f64, upper: (i + 1) as f64, count })
            .collect();
        let once = buckets.clone().redact(threshold);
        let twice = once.clone().redact(threshold);
        prop_assert_eq!(&once, &twice);
        for (before, after) in buckets.iter().zip(&once) {
            prop_assert_eq!(before.lower, after.lower);
            if threshold > 0 && (before.count as u64) < threshold {
                prop_assert_eq!(after.count, HIDDEN_COUNT);
            } else {
                prop_assert_eq!(after.count, before.count);
            }
        }
        prop_assert_eq!(redact_count(HIDDEN_COUNT, threshold), HIDDEN_COUNT);
    }
}
