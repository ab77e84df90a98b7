//! Backend-agnostic filter tree.
//!
//! Wire shape is externally tagged with upper-case node names, e.g.
//! `{"AND": [{"EQ": {"field": "gender", "value": "female"}}, {"EXISTS": {"field": "age"}}]}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn inclusive() -> bool {
    true
}

/// A filter expression over document fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Eq {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        #[serde(default)]
        lower: Option<Value>,
        #[serde(default)]
        upper: Option<Value>,
        #[serde(default = "inclusive")]
        include_lower: bool,
        #[serde(default = "inclusive")]
        include_upper: bool,
    },
    Exists {
        field: String,
    },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Half-open range `[lower, upper)`.
    pub fn between(
        field: impl Into<String>,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            include_lower: true,
            include_upper: false,
        }
    }

    /// `field >= lower`.
    pub fn at_least(field: impl Into<String>, lower: impl Into<Value>) -> Self {
        Self::Range {
            field: field.into(),
            lower: Some(lower.into()),
            upper: None,
            include_lower: true,
            include_upper: true,
        }
    }

    /// `field < upper`.
    pub fn below(field: impl Into<String>, upper: impl Into<Value>) -> Self {
        Self::Range {
            field: field.into(),
            lower: None,
            upper: Some(upper.into()),
            include_lower: true,
            include_upper: false,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Filter) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Conjunction of the given filters, collapsing the trivial cases.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Option<Self> {
        let mut filters: Vec<Filter> = filters.into_iter().collect();
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Self::And(filters)),
        }
    }

    /// The field a leaf refers to; `None` for combinators.
    #[must_use]
    pub fn leaf_field(&self) -> Option<&str> {
        match self {
            Self::Eq { field, .. }
            | Self::In { field, .. }
            | Self::Range { field, .. }
            | Self::Exists { field } => Some(field),
            Self::And(_) | Self::Or(_) | Self::Not(_) => None,
        }
    }

    /// Every distinct field referenced by the tree, in first-appearance order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Self::Not(child) => child.collect_fields(out),
            leaf => {
                if let Some(field) = leaf.leaf_field()
                    && !out.contains(&field)
                {
                    out.push(field);
                }
            }
        }
    }

    /// The same filter with every leaf on `field` removed.
    ///
    /// Combinators left without children disappear too; `None` means nothing
    /// remains to filter on.
    #[must_use]
    pub fn without_field(&self, field: &str) -> Option<Self> {
        match self {
            Self::And(children) => {
                let kept: Vec<Filter> = children
                    .iter()
                    .filter_map(|c| c.without_field(field))
                    .collect();
                (!kept.is_empty()).then_some(Self::And(kept))
            }
            Self::Or(children) => {
                let kept: Vec<Filter> = children
                    .iter()
                    .filter_map(|c| c.without_field(field))
                    .collect();
                (!kept.is_empty()).then_some(Self::Or(kept))
            }
            Self::Not(child) => child.without_field(field).map(Self::not),
            leaf => (leaf.leaf_field() != Some(field)).then(|| leaf.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_upper_case_tags() {
        let raw = json!({
            "AND": [
                {"EQ": {"field": "gender", "value": "female"}},
                {"NOT": {"IN": {"field": "race", "values": ["a", "b"]}}},
                {"RANGE": {"field": "age", "lower": 10, "include_upper": false}},
                {"EXISTS": {"field": "vital_status"}}
            ]
        });
        let filter: Filter = serde_json::from_value(raw).expect("parse");
        let Filter::And(children) = &filter else {
            unreachable!("top level is AND")
        };
        assert_eq!(children.len(), 4);
        assert_eq!(
            children[2],
            Filter::Range {
                field: "age".into(),
                lower: Some(json!(10)),
                upper: None,
                include_lower: true,
                include_upper: false,
            }
        );
    }

    #[test]
    fn fields_are_distinct_and_ordered() {
        let filter = Filter::Or(vec![
            Filter::eq("b", 1),
            Filter::not(Filter::eq("a", 2)),
            Filter::exists("b"),
        ]);
        assert_eq!(filter.fields(), vec!["b", "a"]);
    }

    #[test]
    fn without_field_drops_own_leaves() {
        let filter = Filter::And(vec![
            Filter::between("age", 10, 20),
            Filter::eq("gender", "male"),
            Filter::not(Filter::at_least("age", 90)),
        ]);
        assert_eq!(
            filter.without_field("age"),
            Some(Filter::And(vec![Filter::eq("gender", "male")]))
        );
        assert_eq!(Filter::eq("age", 1).without_field("age"), None);
        assert_eq!(
            Filter::Or(vec![Filter::eq("age", 1)]).without_field("age"),
            None
        );
    }

    #[test]
    fn all_collapses_trivial_cases() {
        assert_eq!(Filter::all(Vec::new()), None);
        assert_eq!(
            Filter::all(vec![Filter::exists("a")]),
            Some(Filter::exists("a"))
        );
        assert!(matches!(
            Filter::all(vec![Filter::exists("a"), Filter::exists("b")]),
            Some(Filter::And(_))
        ));
    }
}
