//! Versioned key-value archive format for models and node state.
//!
//! An archive is a tree of [`Record`]s. Each record names its type and schema
//! version before its fields, so readers dispatch on the tag first and the
//! version second.

mod registry;


use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Element, Model, ModelError, Node, NodeError, NodeId};

pub use registry::{ArchivableNode, NodeRegistry};

pub const MODEL_TYPE_TAG: &str = "Model";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveVersion(pub u32);

impl fmt::Display for ArchiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{type_tag} does not support archive version {version}")]
    UnsupportedVersion {
        type_tag: String,
        version: ArchiveVersion,
    },

    #[error("no node type registered for tag `{0}`")]
    UnknownType(String),

    #[error("expected a `{expected}` record, found `{found}`")]
    UnexpectedType { expected: String, found: String },

    #[error("{type_tag} record is missing field `{field}`")]
    MissingField { type_tag: String, field: String },

    #[error("field `{field}` of {type_tag}: {source}")]
    Field {
        type_tag: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// One archived object: `(key, type_tag, version, payload)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub type_tag: String,
    pub version: ArchiveVersion,
    pub payload: IndexMap<String, serde_json::Value>,
}

/// Collects the fields of one object in write order.
#[derive(Debug)]
pub struct ObjectWriter {
    type_tag: String,
    version: ArchiveVersion,
    fields: IndexMap<String, serde_json::Value>,
}

impl ObjectWriter {
    pub fn new(type_tag: impl Into<String>, version: ArchiveVersion) -> Self {
        Self {
            type_tag: type_tag.into(),
            version,
            fields: IndexMap::new(),
        }
    }

    /// Schema version being written; nodes use it to pick their field set.
    pub fn version(&self) -> ArchiveVersion {
        self.version
    }

    pub fn write<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), ArchiveError> {
        let value = serde_json::to_value(value).map_err(|source| ArchiveError::Field {
            type_tag: self.type_tag.clone(),
            field: key.to_string(),
            source,
        })?;
        self.fields.insert(key.to_string(), value);
        Ok(())
    }

    /// Writes element values, naming the ones JSON numbers cannot hold.
    pub fn write_elements<T: Element>(&mut self, key: &str, values: &[T]) -> Result<(), ArchiveError> {
        let encoded: Vec<ArchivedElement<T>> = values
            .iter()
            .map(|&value| match value.special_name() {
                Some(name) => ArchivedElement::Special(name.to_string()),
                None => ArchivedElement::Value(value),
            })
            .collect();
        self.write(key, &encoded)
    }

    pub fn into_record(self, key: impl Into<String>) -> Record {
        Record {
            key: key.into(),
            type_tag: self.type_tag,
            version: self.version,
            payload: self.fields,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ArchivedElement<T> {
    Value(T),
    Special(String),
}

/// Read access to the fields of one record.
#[derive(Debug)]
pub struct ObjectReader<'r> {
    record: &'r Record,
}

impl<'r> ObjectReader<'r> {
    pub fn new(record: &'r Record) -> Self {
        Self { record }
    }

    pub fn type_tag(&self) -> &str {
        &self.record.type_tag
    }

    pub fn version(&self) -> ArchiveVersion {
        self.record.version
    }

    pub fn has(&self, key: &str) -> bool {
        self.record.payload.contains_key(key)
    }

    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T, ArchiveError> {
        let value = self
            .record
            .payload
            .get(key)
            .ok_or_else(|| ArchiveError::MissingField {
                type_tag: self.record.type_tag.clone(),
                field: key.to_string(),
            })?;
        T::deserialize(value).map_err(|source| ArchiveError::Field {
            type_tag: self.record.type_tag.clone(),
            field: key.to_string(),
            source,
        })
    }

    /// Reads values written by [`ObjectWriter::write_elements`].
    pub fn read_elements<T: Element>(&self, key: &str) -> Result<Vec<T>, ArchiveError> {
        let encoded: Vec<ArchivedElement<T>> = self.read(key)?;
        encoded
            .into_iter()
            .map(|element| match element {
                ArchivedElement::Value(value) => Ok(value),
                ArchivedElement::Special(name) => {
                    T::from_special_name(&name).ok_or_else(|| ArchiveError::Field {
                        type_tag: self.record.type_tag.clone(),
                        field: key.to_string(),
                        source: serde::de::Error::custom(format!("unknown value `{name}`")),
                    })
                }
            })
            .collect()
    }

    pub fn read_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ArchiveError> {
        if self.has(key) {
            self.read(key)
        } else {
            Ok(default)
        }
    }
}

/// Writes models using the current versions from a [`NodeRegistry`].
#[derive(Debug)]
pub struct Archiver<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> Archiver<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn archive_node(&self, id: NodeId, node: &dyn Node) -> Result<Record, ArchiveError> {
        let type_tag = node.type_name();
        let version = self.registry.current_version(&type_tag)?;
        let mut writer = ObjectWriter::new(type_tag, version);
        writer.write("id", &id)?;
        node.write_to_archive(&mut writer)?;
        debug!(%id, has_state = node.has_state(), "archived node");
        Ok(writer.into_record(format!("node_{id}")))
    }

    /// Node records in creation order, wrapped in a model record.
    pub fn archive_model(&self, model: &Model) -> Result<Record, ArchiveError> {
        let nodes = model
            .iter()
            .map(|(id, node)| self.archive_node(id, node))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(nodes = nodes.len(), "archived model");
        let mut writer = ObjectWriter::new(MODEL_TYPE_TAG, self.registry.model_version());
        writer.write("nodes", &nodes)?;
        Ok(writer.into_record("model"))
    }

    pub fn to_json(&self, model: &Model) -> Result<String, ArchiveError> {
        Ok(serde_json::to_string_pretty(&self.archive_model(model)?)?)
    }
}

/// Rebuilds models, dispatching each record on its tag and version.
#[derive(Debug)]
pub struct Unarchiver<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> Unarchiver<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn unarchive_node(&self, record: &Record) -> Result<(NodeId, Box<dyn Node>), ArchiveError> {
        let reader = ObjectReader::new(record);
        let id = reader.read("id")?;
        let node = self.registry.read_node(&reader)?;
        Ok((id, node))
    }

    pub fn unarchive_model(&self, record: &Record) -> Result<Model, ArchiveError> {
        if record.type_tag != MODEL_TYPE_TAG {
            return Err(ArchiveError::UnexpectedType {
                expected: MODEL_TYPE_TAG.to_string(),
                found: record.type_tag.clone(),
            });
        }
        if !self.registry.accepts_model_version(record.version) {
            return Err(ArchiveError::UnsupportedVersion {
                type_tag: MODEL_TYPE_TAG.to_string(),
                version: record.version,
            });
        }
        let nodes: Vec<Record> = ObjectReader::new(record).read("nodes")?;
        let mut model = Model::new();
        for node in &nodes {
            let (id, node) = self.unarchive_node(node)?;
            model.insert_with_id(id, node)?;
        }
        debug!(nodes = model.len(), "unarchived model");
        Ok(model)
    }

    pub fn from_json(&self, json: &str) -> Result<Model, ArchiveError> {
        let record: Record = serde_json::from_str(json)?;
        self.unarchive_model(&record)
    }
}
