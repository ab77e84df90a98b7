//! # Index Metadata Cache
//!
//! Per-index field types and array-field registrations, fetched once at
//! startup and read by every translator afterwards.
//!
//! ## Initialization
//!
//! 1. All configured mappings are fetched concurrently. Any failure aborts.
//! 2. If a config index is set, the documents whose ids equal the configured
//!    index names are read and their `array` lists registered. Declared
//!    fields the mapping does not know are logged and skipped.
//!
//! The cache is never mutated after `initialize` returns. Re-initialization
//! builds a new cache.

use crate::engine::{SearchEngine, SearchRequest};
use crate::{FieldType, FieldTypeMap, GateError, IndexDescriptor};
use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// PER-INDEX METADATA
// =============================================================================

/// Field metadata of one configured index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    descriptor: IndexDescriptor,
    fields: FieldTypeMap,
    array_fields: BTreeSet<String>,
}

impl IndexMetadata {
    #[must_use]
    pub fn new(
        descriptor: IndexDescriptor,
        fields: FieldTypeMap,
        array_fields: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            descriptor,
            fields,
            array_fields: array_fields.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.descriptor.index
    }

    #[must_use]
    pub fn fields(&self) -> &FieldTypeMap {
        &self.fields
    }

    #[must_use]
    pub fn field_type(&self, field: &str) -> Option<&FieldType> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// True only for fields explicitly registered as arrays.
    #[must_use]
    pub fn is_array_field(&self, field: &str) -> bool {
        self.array_fields.contains(field)
    }

    pub fn array_fields(&self) -> impl Iterator<Item = &str> {
        self.array_fields.iter().map(String::as_str)
    }

    /// The array path a clause on `field` must be nested under, if any.
    ///
    /// This is the longest registered array field that equals `field` or is a
    /// dotted ancestor of it (`visits` for `visits.days`) and is mapped as
    /// `nested`. Registered arrays of scalars need no wrapping: the engine
    /// already matches term/range clauses against each value separately.
    /// Every translator asks this one question instead of checking
    /// array-ness itself.
    #[must_use]
    pub fn nested_path(&self, field: &str) -> Option<&str> {
        let mut candidate = Some(field);
        while let Some(path) = candidate {
            if let Some(registered) = self.array_fields.get(path)
                && self.fields.get(path) == Some(&FieldType::Nested)
            {
                return Some(registered.as_str());
            }
            candidate = path.rsplit_once('.').map(|(parent, _)| parent);
        }
        None
    }

    /// Distinct names from `fields` that this index does not know.
    pub fn unknown_fields<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for field in fields {
            if !self.contains(field) && !unknown.iter().any(|u| u == field) {
                unknown.push(field.to_string());
            }
        }
        unknown
    }

    /// Fail with every unknown field named, or succeed if all are known.
    pub fn require_fields<'a>(
        &self,
        context: &str,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), GateError> {
        let unknown = self.unknown_fields(fields);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(GateError::invalid_fields(context, self.index(), unknown))
        }
    }
}

/// Introspection view returned by `get_es_fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFields {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub fields: FieldTypeMap,
    pub array_fields: Vec<String>,
}

impl From<&IndexMetadata> for IndexFields {
    fn from(meta: &IndexMetadata) -> Self {
        Self {
            index: meta.descriptor.index.clone(),
            doc_type: meta.descriptor.doc_type.clone(),
            fields: meta.fields.clone(),
            array_fields: meta.array_fields.iter().cloned().collect(),
        }
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Immutable metadata for every configured index.
#[derive(Debug, Clone, Default)]
pub struct IndexMetadataCache {
    indices: BTreeMap<String, IndexMetadata>,
}

impl IndexMetadataCache {
    /// Fetch mappings and array registrations for `descriptors`.
    pub async fn initialize(
        engine: &dyn SearchEngine,
        descriptors: &[IndexDescriptor],
        config_index: Option<&str>,
    ) -> Result<Self, GateError> {
        if descriptors.is_empty() {
            return Err(GateError::Configuration(
                "no indices configured".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for descriptor in descriptors {
            if !names.insert(descriptor.index.as_str()) {
                return Err(GateError::Configuration(format!(
                    "index '{}' configured more than once",
                    descriptor.index
                )));
            }
        }

        let fetched = try_join_all(descriptors.iter().map(|d| fetch_fields(engine, d))).await?;
        let mut indices: BTreeMap<String, IndexMetadata> = fetched
            .into_iter()
            .map(|meta| (meta.descriptor.index.clone(), meta))
            .collect();

        if let Some(config_index) = config_index {
            register_array_fields(engine, config_index, &mut indices).await?;
        }

        for meta in indices.values() {
            tracing::info!(
                index = %meta.descriptor,
                fields = meta.fields.len(),
                array_fields = meta.array_fields.len(),
                "index metadata loaded"
            );
        }
        Ok(Self { indices })
    }

    /// Build a cache from already-known metadata.
    #[must_use]
    pub fn from_indices(indices: impl IntoIterator<Item = IndexMetadata>) -> Self {
        Self {
            indices: indices
                .into_iter()
                .map(|m| (m.descriptor.index.clone(), m))
                .collect(),
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.indices.values()
    }

    /// Metadata of a configured index.
    pub fn get(&self, index: &str) -> Result<&IndexMetadata, GateError> {
        self.indices.get(index).ok_or_else(|| GateError::NotFound {
            what: "index",
            name: index.to_string(),
        })
    }

    /// Metadata for a request's `index`/`type` pair.
    ///
    /// Unknown indices and mismatched types are caller errors here.
    pub fn resolve(&self, index: &str, doc_type: &str) -> Result<&IndexMetadata, GateError> {
        let meta = self
            .indices
            .get(index)
            .ok_or_else(|| GateError::invalid(format!("Unknown index '{index}'")))?;
        if meta.descriptor.doc_type != doc_type {
            return Err(GateError::invalid(format!(
                "Index '{index}' does not hold type '{doc_type}' (configured type is '{}')",
                meta.descriptor.doc_type
            )));
        }
        Ok(meta)
    }

    pub fn fields_of(&self, index: &str) -> Result<&FieldTypeMap, GateError> {
        self.get(index).map(IndexMetadata::fields)
    }

    #[must_use]
    pub fn is_array_field(&self, index: &str, field: &str) -> bool {
        self.indices
            .get(index)
            .is_some_and(|m| m.is_array_field(field))
    }

    /// The index configured for `doc_type`.
    pub fn index_for_type(&self, doc_type: &str) -> Result<&str, GateError> {
        self.indices
            .values()
            .find(|m| m.descriptor.doc_type == doc_type)
            .map(IndexMetadata::index)
            .ok_or_else(|| GateError::invalid(format!("No index configured for type '{doc_type}'")))
    }
}

// =============================================================================
// MAPPING PARSING
// =============================================================================

async fn fetch_fields(
    engine: &dyn SearchEngine,
    descriptor: &IndexDescriptor,
) -> Result<IndexMetadata, GateError> {
    let mapping = engine
        .get_mapping(&descriptor.index, &descriptor.doc_type)
        .await
        .map_err(|e| {
            GateError::Configuration(format!("mapping fetch for {descriptor} failed: {e}"))
        })?;
    let properties = mapping_properties(&mapping, descriptor).ok_or_else(|| {
        GateError::Configuration(format!("mapping for {descriptor} has no properties"))
    })?;
    let mut fields = FieldTypeMap::new();
    flatten_properties(properties, "", &mut fields);
    Ok(IndexMetadata::new(descriptor.clone(), fields, Vec::new()))
}

/// Locate the `properties` object inside a mapping response.
///
/// The top-level key is the index name, or the concrete index behind an
/// alias; typed (`mappings.<type>.properties`) and typeless
/// (`mappings.properties`) layouts are both accepted.
fn mapping_properties<'a>(mapping: &'a Value, descriptor: &IndexDescriptor) -> Option<&'a Value> {
    let root = mapping.as_object()?;
    let entry = match root.get(&descriptor.index) {
        Some(entry) => entry,
        None if root.len() == 1 => root.values().next()?,
        None => return None,
    };
    let mappings = entry.get("mappings")?;
    mappings
        .get(&descriptor.doc_type)
        .and_then(|typed| typed.get("properties"))
        .or_else(|| mappings.get("properties"))
}

/// Flatten mapping `properties` into dotted field paths.
///
/// Containers are recorded under their own name as `object`/`nested`;
/// multi-fields appear as `field.sub`.
pub fn flatten_properties(properties: &Value, prefix: &str, out: &mut FieldTypeMap) {
    let Some(properties) = properties.as_object() else {
        return;
    };
    for (name, def) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        let children = def.get("properties");
        let field_type = match def.get("type").and_then(Value::as_str) {
            Some(tag) => FieldType::from(tag),
            None if children.is_some() => FieldType::Object,
            None => continue,
        };
        out.insert(path.clone(), field_type);
        if let Some(children) = children {
            flatten_properties(children, &path, out);
        }
        if let Some(multi) = def.get("fields") {
            flatten_properties(multi, &path, out);
        }
    }
}

async fn register_array_fields(
    engine: &dyn SearchEngine,
    config_index: &str,
    indices: &mut BTreeMap<String, IndexMetadata>,
) -> Result<(), GateError> {
    let ids: Vec<&String> = indices.keys().collect();
    let body = json!({
        "query": { "ids": { "values": ids } },
        "size": ids.len(),
    });
    let response = engine
        .search(&SearchRequest::new(config_index, None, body))
        .await
        .map_err(|e| {
            GateError::Configuration(format!(
                "array field lookup in '{config_index}' failed: {e}"
            ))
        })?;

    for hit in response.hits.hits {
        let Some(meta) = indices.get_mut(&hit.id) else {
            continue;
        };
        let declared = hit
            .source
            .get("array")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for field in declared.iter().filter_map(Value::as_str) {
            if meta.fields.contains_key(field) {
                meta.array_fields.insert(field.to_string());
            } else {
                tracing::warn!(
                    index = %meta.descriptor.index,
                    field,
                    "array field declared in config index is not in the mapping; skipped"
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
