//! Collection catalog: declared schemas and their field modifiers.
//!
//! The catalog is an existence/metadata oracle for the engine. It does not
//! validate documents; `unique` fields are tracked for future enforcement
//! but duplicates are accepted today. All mutations happen under the engine
//! facade's lock, so the catalog itself carries no synchronization.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::response::Response;

/// The type of a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
}

/// A field declaration with its modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub indexed: bool,
}

/// A collection schema: field name to declaration, in a stable order.
pub type CollectionSchema = BTreeMap<String, FieldSpec>;

/// Authoritative list of declared collections.
#[derive(Debug, Default)]
pub struct Catalog {
    schemas: HashMap<String, CollectionSchema>,
    /// Per-collection field names carrying the `unique` modifier.
    unique_fields: HashMap<String, Vec<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or overwrite) a collection schema.
    pub fn set(&mut self, name: &str, schema: CollectionSchema) -> Response<()> {
        let uniques = unique_field_names(&schema);
        self.schemas.insert(name.to_string(), schema);
        self.unique_fields.insert(name.to_string(), uniques);
        Response::ok_empty()
    }

    /// Replace the schema of an already-declared collection.
    pub fn update(&mut self, name: &str, schema: CollectionSchema) -> Response<()> {
        if !self.schemas.contains_key(name) {
            return Response::error();
        }
        self.set(name, schema)
    }

    /// Forget a declared collection.
    pub fn delete(&mut self, name: &str) -> Response<()> {
        if self.schemas.remove(name).is_none() {
            return Response::error();
        }
        self.unique_fields.remove(name);
        Response::ok_empty()
    }

    pub fn get(&self, name: &str) -> Response<CollectionSchema> {
        match self.schemas.get(name) {
            Some(schema) => Response::ok(schema.clone()),
            None => Response::error(),
        }
    }

    /// Every declared collection with its schema.
    pub fn get_all(&self) -> Response<Vec<(String, CollectionSchema)>> {
        let mut all: Vec<_> = self
            .schemas
            .iter()
            .map(|(name, schema)| (name.clone(), schema.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Response::ok(all)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Field names declared `unique` for a collection. Tracked, not enforced.
    pub fn unique_fields(&self, name: &str) -> &[String] {
        self.unique_fields
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }
}

fn unique_field_names(schema: &CollectionSchema) -> Vec<String> {
    schema
        .iter()
        .filter(|(_, spec)| spec.unique)
        .map(|(name, _)| name.clone())
        .collect()
}
