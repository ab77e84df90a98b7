//! # Filter Translation
//!
//! Lowers a [`Filter`] tree into engine query clauses.
//!
//! | Filter  | Clause                                              |
//! |---------|-----------------------------------------------------|
//! | `AND`   | `bool.must` (`match_all` when empty)                |
//! | `OR`    | `bool.should` + `minimum_should_match: 1`           |
//! | `NOT`   | `bool.must_not`                                     |
//! | `EQ`    | `term`                                              |
//! | `IN`    | `terms`                                             |
//! | `RANGE` | `range` with `gt`/`gte`/`lt`/`lte`                  |
//! | `EXISTS`| `exists`                                            |
//!
//! Leaves on fields under a nested array path are wrapped in
//! `nested { path, query }`; without the wrapper the engine matches nothing,
//! since nested elements are not indexed on the root document. Each leaf is
//! wrapped on its own, so a leaf matches when any one element satisfies it,
//! and sibling leaves under an `AND` may be satisfied by different elements.

use crate::metadata::IndexMetadata;
use crate::{Filter, GateError};
use serde_json::{Map, Value, json};

/// Translates filters for one index.
#[derive(Debug, Clone, Copy)]
pub struct FilterTranslator<'a> {
    meta: &'a IndexMetadata,
}

impl<'a> FilterTranslator<'a> {
    #[must_use]
    pub fn new(meta: &'a IndexMetadata) -> Self {
        Self { meta }
    }

    /// Translate `filter`, failing with every unknown field named.
    pub fn translate(&self, filter: &Filter) -> Result<Value, GateError> {
        self.meta.require_fields("filter", filter.fields())?;
        self.lower(filter)
    }

    /// Translate an optional filter; `None` stays `None`.
    pub fn translate_optional(&self, filter: Option<&Filter>) -> Result<Option<Value>, GateError> {
        filter.map(|f| self.translate(f)).transpose()
    }

    fn lower(&self, filter: &Filter) -> Result<Value, GateError> {
        match filter {
            Filter::And(children) if children.is_empty() => Ok(json!({ "match_all": {} })),
            Filter::And(children) => Ok(json!({ "bool": { "must": self.lower_all(children)? } })),
            Filter::Or(children) if children.is_empty() => {
                Ok(json!({ "bool": { "must_not": [{ "match_all": {} }] } }))
            }
            Filter::Or(children) => Ok(json!({
                "bool": { "should": self.lower_all(children)?, "minimum_should_match": 1 }
            })),
            Filter::Not(child) => Ok(json!({ "bool": { "must_not": [self.lower(child)?] } })),
            Filter::Eq { field, value } => {
                require_scalar(field, value)?;
                Ok(self.wrap(field, json!({ "term": { field.as_str(): value } })))
            }
            Filter::In { field, values } => {
                for value in values {
                    require_scalar(field, value)?;
                }
                Ok(self.wrap(field, json!({ "terms": { field.as_str(): values } })))
            }
            Filter::Range {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                let mut bounds = Map::new();
                if let Some(lower) = lower {
                    require_scalar(field, lower)?;
                    let op = if *include_lower { "gte" } else { "gt" };
                    bounds.insert(op.to_string(), lower.clone());
                }
                if let Some(upper) = upper {
                    require_scalar(field, upper)?;
                    let op = if *include_upper { "lte" } else { "lt" };
                    bounds.insert(op.to_string(), upper.clone());
                }
                if bounds.is_empty() {
                    return Err(GateError::InvalidInput {
                        message: format!("RANGE on '{field}' has neither a lower nor an upper bound"),
                        fields: vec![field.clone()],
                    });
                }
                Ok(self.wrap(field, json!({ "range": { field.as_str(): bounds } })))
            }
            Filter::Exists { field } => {
                Ok(self.wrap(field, json!({ "exists": { "field": field } })))
            }
        }
    }

    fn lower_all(&self, children: &[Filter]) -> Result<Vec<Value>, GateError> {
        children.iter().map(|c| self.lower(c)).collect()
    }

    fn wrap(&self, field: &str, clause: Value) -> Value {
        match self.meta.nested_path(field) {
            Some(path) => json!({ "nested": { "path": path, "query": clause } }),
            None => clause,
        }
    }
}

fn require_scalar(field: &str, value: &Value) -> Result<(), GateError> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
        other => Err(GateError::InvalidInput {
            message: format!("Filter value for '{field}' must be a scalar, got {other}"),
            fields: vec![field.to_string()],
        }),
    }
}

// =============================================================================
// TESTS
// =============================================================================
