//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Every command writes its result to the given writer; logs go through
//! `tracing` to stderr.

use super::{CliError, Selection};
use crate::config::AppConfig;
use esgate_core::primitives::HIDDEN_COUNT;
use esgate_core::{
    AccessTierContext, ExportRequest, Filter, GateError, HttpEngine, NumericAggregationSpec,
    QueryRequest, SearchGate, SortKey, SortSpec, TextAggregationSpec,
};
use futures_util::TryStreamExt;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Output options resolved once per invocation.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json_mode: bool,
    /// Tier threshold of the caller.
    pub threshold: u64,
}

/// Histogram bounds and binning as given on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramRange {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub step: Option<f64>,
    pub bins: Option<u64>,
}

/// Connect to the configured engine and load index metadata.
pub async fn open_gate(config: &AppConfig) -> Result<SearchGate, CliError> {
    let engine = HttpEngine::new(config.engine.endpoint.as_str(), config.timeout())
        .map_err(|e| GateError::Configuration(e.to_string()))?;
    tracing::info!(endpoint = engine.base_url(), "connecting to search engine");
    Ok(SearchGate::initialize(Arc::new(engine), config.gate_settings()).await?)
}

/// Parse a JSON filter argument.
fn parse_filter(raw: Option<&str>) -> Result<Option<Filter>, CliError> {
    raw.map(|raw| {
        serde_json::from_str(raw)
            .map_err(|e| CliError::from(GateError::invalid(format!("Invalid filter JSON: {e}"))))
    })
    .transpose()
}

/// Parse repeated `field[:dir]` arguments.
fn parse_sort(raw: &[String]) -> Result<Option<SortSpec>, CliError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let keys = raw
        .iter()
        .map(|s| s.parse::<SortKey>())
        .collect::<Result<SortSpec, _>>()?;
    Ok(Some(keys))
}

/// Resolve the selection to its configured index and parsed filter.
fn resolve(
    gate: &SearchGate,
    selection: &Selection,
) -> Result<(String, Option<Filter>), CliError> {
    let index = gate.index_for_type(&selection.doc_type)?;
    let filter = parse_filter(selection.filter.as_deref())?;
    Ok((index, filter))
}

/// Refuse raw records when the caller's tier does not allow them.
fn ensure_raw_access(gate: &SearchGate, index: &str, output: &Output) -> Result<(), CliError> {
    let ctx = AccessTierContext::raw_data(output.threshold);
    if gate.guard(index)?.raw_data_denied(&ctx) {
        tracing::warn!(index, threshold = output.threshold, "raw data request denied");
        return Err(CliError::Denied {
            index: index.to_string(),
            threshold: output.threshold,
        });
    }
    Ok(())
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn show_count(count: i64) -> String {
    if count == HIDDEN_COUNT {
        "<hidden>".to_string()
    } else {
        count.to_string()
    }
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Report every configured index with its field and array counts.
pub fn cmd_check(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let indices = gate.get_es_fields(None)?;

    if output.json_mode {
        let summary: Vec<_> = indices
            .iter()
            .map(|i| {
                json!({
                    "index": i.index,
                    "type": i.doc_type,
                    "fields": i.fields.len(),
                    "array_fields": i.array_fields,
                    "tier_gated": gate.guard(&i.index).is_ok_and(|g| g.is_enforced()),
                })
            })
            .collect();
        return write_json(out, &summary);
    }

    writeln!(out, "esgate Index Status")?;
    writeln!(out, "===================")?;
    for i in &indices {
        let gated = if gate.guard(&i.index).is_ok_and(|g| g.is_enforced()) {
            "tier-gated"
        } else {
            "open"
        };
        writeln!(
            out,
            "{}/{}: {} fields, {} array fields, {}",
            i.index,
            i.doc_type,
            i.fields.len(),
            i.array_fields.len(),
            gated
        )?;
    }
    Ok(())
}

// =============================================================================
// FIELDS COMMANDS
// =============================================================================

/// Show field types of one or every index.
pub fn cmd_fields(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    index: Option<&str>,
) -> Result<(), CliError> {
    let indices = gate.get_es_fields(index)?;

    if output.json_mode {
        return write_json(out, &indices);
    }

    for i in &indices {
        writeln!(out, "{}/{}", i.index, i.doc_type)?;
        for (field, field_type) in &i.fields {
            let marker = if i.array_fields.contains(field) {
                " [array]"
            } else {
                ""
            };
            writeln!(out, "  {field}: {field_type}{marker}")?;
        }
    }
    Ok(())
}

/// Whether `field` is a registered array field of `index`.
pub fn cmd_is_array(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    index: &str,
    field: &str,
) -> Result<(), CliError> {
    let is_array = gate.is_array_field(index, field);
    if output.json_mode {
        return write_json(
            out,
            &json!({"index": index, "field": field, "is_array": is_array}),
        );
    }
    writeln!(out, "{is_array}")?;
    Ok(())
}

// =============================================================================
// DATA COMMANDS
// =============================================================================

/// Fetch one page of documents.
pub async fn cmd_query(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    selection: &Selection,
    fields: Option<Vec<String>>,
    sort: &[String],
    offset: u64,
    size: Option<u64>,
) -> Result<(), CliError> {
    let (index, filter) = resolve(gate, selection)?;
    ensure_raw_access(gate, &index, output)?;

    let mut request = QueryRequest::new(index, selection.doc_type.as_str());
    request.filter = filter;
    request.fields = fields;
    request.sort = parse_sort(sort)?;
    request.offset = offset;
    request.size = size;

    let documents = gate.get_data(&request).await?;
    if output.json_mode {
        return write_json(out, &documents);
    }
    for doc in &documents {
        serde_json::to_writer(&mut *out, doc)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Count matching documents.
pub async fn cmd_count(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    selection: &Selection,
) -> Result<(), CliError> {
    let (index, filter) = resolve(gate, selection)?;
    let ctx = AccessTierContext::aggregate(output.threshold);
    let count = gate
        .get_count(&index, &selection.doc_type, filter.as_ref(), &ctx)
        .await?;

    if output.json_mode {
        return write_json(
            out,
            &json!({"index": index, "type": selection.doc_type, "count": count}),
        );
    }
    writeln!(out, "{}", show_count(count))?;
    Ok(())
}

/// Stream every matching document as one JSON object per line.
pub async fn cmd_export(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    selection: &Selection,
    fields: Option<Vec<String>>,
    sort: &[String],
) -> Result<(), CliError> {
    let (index, filter) = resolve(gate, selection)?;
    ensure_raw_access(gate, &index, output)?;

    let mut request = ExportRequest::new(index.as_str(), selection.doc_type.as_str());
    request.filter = filter;
    request.fields = fields;
    request.sort = parse_sort(sort)?;

    let mut stream = gate.download_data(&request)?;
    let mut exported = 0u64;
    while let Some(doc) = stream.try_next().await? {
        serde_json::to_writer(&mut *out, &doc)?;
        writeln!(out)?;
        exported += 1;
    }
    out.flush()?;
    tracing::info!(index = %index, documents = exported, "export complete");
    Ok(())
}

// =============================================================================
// AGGREGATION COMMANDS
// =============================================================================

/// Numeric range aggregation.
pub async fn cmd_histogram(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    selection: &Selection,
    field: &str,
    range: HistogramRange,
    filter_self: bool,
    auth_filter: Option<&str>,
) -> Result<(), CliError> {
    let (index, filter) = resolve(gate, selection)?;

    let mut spec = NumericAggregationSpec::new(index, selection.doc_type.as_str(), field);
    spec.range_start = range.start;
    spec.range_end = range.end;
    spec.range_step = range.step;
    spec.bin_count = range.bins;
    spec.filter = filter;
    spec.filter_self = filter_self;
    spec.default_auth_filter = parse_filter(auth_filter)?;

    let result = gate
        .numeric_aggregation(&spec, &AccessTierContext::aggregate(output.threshold))
        .await?;

    if output.json_mode {
        return write_json(out, &result);
    }
    writeln!(out, "{field} (total {})", show_count(result.total_count))?;
    for bucket in &result.histogram {
        writeln!(
            out,
            "  {} .. {}: {}",
            bucket.lower,
            bucket.upper,
            show_count(bucket.count)
        )?;
    }
    Ok(())
}

/// Terms aggregation with per-bucket nested breakdowns.
pub async fn cmd_terms(
    gate: &SearchGate,
    output: &Output,
    out: &mut impl Write,
    selection: &Selection,
    field: &str,
    nested: Vec<String>,
    filter_self: bool,
    auth_filter: Option<&str>,
) -> Result<(), CliError> {
    let (index, filter) = resolve(gate, selection)?;

    let mut spec = TextAggregationSpec::new(index, selection.doc_type.as_str(), field);
    spec.filter = filter;
    spec.filter_self = filter_self;
    spec.default_auth_filter = parse_filter(auth_filter)?;
    spec.nested_agg_fields = nested;

    let result = gate
        .text_aggregation(&spec, &AccessTierContext::aggregate(output.threshold))
        .await?;

    if output.json_mode {
        return write_json(out, &result);
    }
    writeln!(out, "{field} (total {})", show_count(result.total_count))?;
    for bucket in &result.histogram {
        writeln!(out, "  {}: {}", bucket.key, show_count(bucket.count))?;
        for breakdown in &bucket.nested {
            for term in &breakdown.buckets {
                writeln!(
                    out,
                    "    {}={}: {}",
                    breakdown.field,
                    term.key,
                    show_count(term.count)
                )?;
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use esgate_core::{
        GateSettings, IndexDescriptor, IndexSettings, InMemoryEngine, NumericAggregation,
    };
    use serde_json::Value;

    fn engine() -> Arc<InMemoryEngine> {
        Arc::new(
            InMemoryEngine::new()
                .with_index(
                    "subject",
                    "subject",
                    json!({
                        "age": {"type": "long"},
                        "gender": {"type": "keyword"},
                        "tags": {"type": "keyword"}
                    }),
                )
                .with_documents(
                    "subject",
                    [
                        json!({"age": 10, "gender": "female", "tags": ["a", "b"]}),
                        json!({"age": 20, "gender": "female", "tags": ["b"]}),
                        json!({"age": 30, "gender": "male"}),
                    ],
                )
                .with_index("file", "file", json!({"size": {"type": "long"}}))
                .with_documents("file", (0..3).map(|i| json!({"size": i})))
                .with_index("config", "config", json!({}))
                .with_document("config", "subject", json!({"array": ["tags"]})),
        )
    }

    async fn gate(engine: Arc<InMemoryEngine>) -> SearchGate {
        let settings = GateSettings {
            indices: vec![
                IndexSettings::new(IndexDescriptor::new("subject", "subject"), true),
                IndexSettings::new(IndexDescriptor::new("file", "file"), false),
            ],
            config_index: Some("config".into()),
        };
        SearchGate::initialize(engine, settings)
            .await
            .expect("init")
    }

    fn selection(doc_type: &str, filter: Option<&str>) -> Selection {
        Selection {
            doc_type: doc_type.to_string(),
            filter: filter.map(str::to_string),
        }
    }

    fn output(threshold: u64, json_mode: bool) -> Output {
        Output {
            json_mode,
            threshold,
        }
    }

    fn lines(buf: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(buf)
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    #[tokio::test]
    async fn query_writes_one_document_per_line() {
        let gate = gate(engine()).await;
        let mut buf = Vec::new();
        cmd_query(
            &gate,
            &output(0, false),
            &mut buf,
            &selection("subject", Some(r#"{"EQ": {"field": "gender", "value": "female"}}"#)),
            Some(vec!["age".into()]),
            &["age:desc".to_string()],
            0,
            None,
        )
        .await
        .expect("query");
        let docs = lines(&buf);
        assert_eq!(docs, vec![json!({"age": 20}), json!({"age": 10})]);
    }

    #[tokio::test]
    async fn raw_data_is_denied_on_gated_index_only() {
        let engine = engine();
        let gate = gate(engine.clone()).await;
        let searches_before = engine.stats().searches;
        let mut buf = Vec::new();
        let err = cmd_query(
            &gate,
            &output(50, false),
            &mut buf,
            &selection("subject", None),
            None,
            &[],
            0,
            None,
        )
        .await
        .expect_err("denied");
        assert_eq!(err.exit_code(), 6);
        assert!(buf.is_empty());
        assert_eq!(engine.stats().searches, searches_before);

        cmd_export(
            &gate,
            &output(50, false),
            &mut buf,
            &selection("file", None),
            None,
            &[],
        )
        .await
        .expect("open index");
        assert_eq!(lines(&buf).len(), 3);
    }

    #[tokio::test]
    async fn export_streams_every_document() {
        let engine = engine();
        let gate = gate(engine.clone()).await;
        let mut buf = Vec::new();
        cmd_export(
            &gate,
            &output(0, false),
            &mut buf,
            &selection("subject", None),
            Some(vec!["gender".into()]),
            &["age".to_string()],
        )
        .await
        .expect("export");
        let docs = lines(&buf);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2], json!({"gender": "male"}));
        assert_eq!(engine.stats().scrolls_cleared, 1);
    }

    #[tokio::test]
    async fn count_is_hidden_below_threshold() {
        let gate = gate(engine()).await;
        let mut buf = Vec::new();
        cmd_count(&gate, &output(5, false), &mut buf, &selection("subject", None))
            .await
            .expect("count");
        assert_eq!(String::from_utf8_lossy(&buf).trim(), "<hidden>");

        let mut buf = Vec::new();
        cmd_count(&gate, &output(0, true), &mut buf, &selection("subject", None))
            .await
            .expect("count");
        let body: Value = serde_json::from_slice(&buf).expect("json");
        assert_eq!(body["count"], 3);
    }

    #[tokio::test]
    async fn histogram_json_output() {
        let gate = gate(engine()).await;
        let mut buf = Vec::new();
        cmd_histogram(
            &gate,
            &output(0, true),
            &mut buf,
            &selection("subject", None),
            "age",
            HistogramRange {
                start: Some(0.0),
                end: Some(40.0),
                step: Some(20.0),
                bins: None,
            },
            true,
            None,
        )
        .await
        .expect("histogram");
        let result: NumericAggregation = serde_json::from_slice(&buf).expect("json");
        assert_eq!(result.total_count, 3);
        let counts: Vec<i64> = result.histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, [1, 2]);
    }

    #[tokio::test]
    async fn terms_text_output_with_auth_filter() {
        let gate = gate(engine()).await;
        let mut buf = Vec::new();
        cmd_terms(
            &gate,
            &output(0, false),
            &mut buf,
            &selection("subject", None),
            "gender",
            Vec::new(),
            true,
            Some(r#"{"RANGE": {"field": "age", "upper": 20}}"#),
        )
        .await
        .expect("terms");
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("gender (total 2)"));
        assert!(text.contains("  female: 2"));
        assert!(!text.contains("male: 1"));
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_input() {
        let gate = gate(engine()).await;
        let mut buf = Vec::new();
        let err = cmd_count(
            &gate,
            &output(0, false),
            &mut buf,
            &selection("subject", Some("{not json")),
        )
        .await
        .expect_err("bad filter");
        assert_eq!(err.exit_code(), 2);

        let err = cmd_query(
            &gate,
            &output(0, false),
            &mut buf,
            &selection("subject", None),
            None,
            &["age:sideways".to_string()],
            0,
            None,
        )
        .await
        .expect_err("bad sort");
        assert_eq!(err.exit_code(), 2);

        let err = cmd_count(&gate, &output(0, false), &mut buf, &selection("nope", None))
            .await
            .expect_err("unknown type");
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn introspection_commands() {
        let gate = gate(engine()).await;

        let mut buf = Vec::new();
        cmd_check(&gate, &output(0, false), &mut buf).expect("check");
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("subject/subject: 3 fields, 1 array fields, tier-gated"));
        assert!(text.contains("file/file: 1 fields, 0 array fields, open"));

        let mut buf = Vec::new();
        cmd_fields(&gate, &output(0, false), &mut buf, Some("subject")).expect("fields");
        assert!(String::from_utf8_lossy(&buf).contains("  tags: keyword [array]"));

        let mut buf = Vec::new();
        cmd_is_array(&gate, &output(0, true), &mut buf, "subject", "tags").expect("is-array");
        let body: Value = serde_json::from_slice(&buf).expect("json");
        assert_eq!(body["is_array"], true);

        let mut buf = Vec::new();
        cmd_is_array(&gate, &output(0, false), &mut buf, "subject", "age").expect("is-array");
        assert_eq!(String::from_utf8_lossy(&buf).trim(), "false");
    }
}
