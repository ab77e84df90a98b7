//! # Sort Translation
//!
//! The engine takes sort as a flat list of `field:direction` tokens, not as
//! structured objects. Order is significant: the first token is the primary
//! key.

use crate::metadata::IndexMetadata;
use crate::{GateError, SortKey};

/// Translates sort specifications for one index.
#[derive(Debug, Clone, Copy)]
pub struct SortTranslator<'a> {
    meta: &'a IndexMetadata,
}

impl<'a> SortTranslator<'a> {
    #[must_use]
    pub fn new(meta: &'a IndexMetadata) -> Self {
        Self { meta }
    }

    /// Validate every field, then render tokens in the given order.
    pub fn translate(&self, sort: &[SortKey]) -> Result<Vec<String>, GateError> {
        self.meta
            .require_fields("sort", sort.iter().map(|k| k.field.as_str()))?;
        Ok(sort
            .iter()
            .map(|k| format!("{}:{}", k.field, k.direction.as_str()))
            .collect())
    }
}
