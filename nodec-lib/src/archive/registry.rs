use std::collections::HashMap;

use crate::model::Node;

use super::{ArchiveError, ArchiveVersion, ObjectReader};

/// A node type that can be rebuilt from its archived fields.
pub trait ArchivableNode: Node + Sized + 'static {
    /// Tag written for this type; matches [`Node::type_name`].
    fn type_tag() -> String;

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError>;
}

type ReadFn = fn(&ObjectReader<'_>) -> Result<Box<dyn Node>, ArchiveError>;

#[derive(Clone)]
struct Entry {
    current: ArchiveVersion,
    accepted: Vec<ArchiveVersion>,
    read: ReadFn,
}

fn read_boxed<N: ArchivableNode>(reader: &ObjectReader<'_>) -> Result<Box<dyn Node>, ArchiveError> {
    Ok(Box::new(N::read_from_archive(reader)?))
}

/// Version table and constructors for archivable node types.
#[derive(Clone)]
pub struct NodeRegistry {
    entries: HashMap<String, Entry>,
    model_version: ArchiveVersion,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self
            .entries
            .iter()
            .map(|(tag, entry)| (tag.as_str(), entry.current))
            .collect();
        tags.sort();
        f.debug_struct("NodeRegistry")
            .field("model_version", &self.model_version)
            .field("types", &tags)
            .finish()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            model_version: ArchiveVersion(1),
        }
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `N`, written at `current` and readable at `current` plus every
    /// version in `accepted`.
    pub fn register<N: ArchivableNode>(
        &mut self,
        current: ArchiveVersion,
        accepted: &[ArchiveVersion],
    ) -> &mut Self {
        let mut versions = accepted.to_vec();
        if !versions.contains(&current) {
            versions.push(current);
        }
        self.entries.insert(
            N::type_tag(),
            Entry {
                current,
                accepted: versions,
                read: read_boxed::<N>,
            },
        );
        self
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    pub fn model_version(&self) -> ArchiveVersion {
        self.model_version
    }

    pub fn accepts_model_version(&self, version: ArchiveVersion) -> bool {
        version == self.model_version
    }

    pub fn current_version(&self, type_tag: &str) -> Result<ArchiveVersion, ArchiveError> {
        self.entries
            .get(type_tag)
            .map(|entry| entry.current)
            .ok_or_else(|| ArchiveError::UnknownType(type_tag.to_string()))
    }

    /// Overrides the version written for `type_tag`. Returns `false` when the
    /// type is unknown or cannot read that version back.
    pub fn set_current_version(&mut self, type_tag: &str, version: ArchiveVersion) -> bool {
        match self.entries.get_mut(type_tag) {
            Some(entry) if entry.accepted.contains(&version) => {
                entry.current = version;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn read_node(&self, reader: &ObjectReader<'_>) -> Result<Box<dyn Node>, ArchiveError> {
        let entry = self
            .entries
            .get(reader.type_tag())
            .ok_or_else(|| ArchiveError::UnknownType(reader.type_tag().to_string()))?;
        if !entry.accepted.contains(&reader.version()) {
            return Err(ArchiveError::UnsupportedVersion {
                type_tag: reader.type_tag().to_string(),
                version: reader.version(),
            });
        }
        (entry.read)(reader)
    }
}
