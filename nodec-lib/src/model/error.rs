use thiserror::Error;

use super::topology::TopologyError;
use super::types::{Coordinate, NodeId, OutputRef, ScalarType};

/// Errors raised while constructing or evaluating a single node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("{what}: expected {expected} elements, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("unknown {kind} `{name}`")]
    UnknownVariant { kind: &'static str, name: String },

    #[error("port `{port}` expects {expected} elements, found {found}")]
    PortType {
        port: &'static str,
        expected: ScalarType,
        found: ScalarType,
    },

    #[error("no port with index {0}")]
    PortIndex(usize),

    #[error("invalid memory layout: {0}")]
    Layout(String),
}

/// Violations of the model's structural invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {node} references {coordinate}, which is not an earlier node in this model")]
    InvalidReference { node: NodeId, coordinate: Coordinate },

    #[error("coordinate {0} is out of range")]
    CoordinateOutOfRange(Coordinate),

    #[error("port {port} carries {found} values but {expected} were expected")]
    PortTypeMismatch {
        port: OutputRef,
        expected: ScalarType,
        found: ScalarType,
    },

    #[error("node {node} is still referenced by {dependents:?}")]
    DependencyViolation {
        node: NodeId,
        dependents: Vec<NodeId>,
    },

    #[error("port {0} has not been mapped in the current pass")]
    UnmappedPort(OutputRef),

    #[error("port {0} is already mapped in the current pass")]
    PortAlreadyMapped(OutputRef),

    #[error("port {port} has {expected} elements but was mapped to {found}")]
    MappingSize {
        port: OutputRef,
        expected: usize,
        found: usize,
    },

    #[error("mapping was requested outside of a node transformation")]
    NoCurrentNode,

    #[error("cycle through nodes {0:?}")]
    CycleDetected(Vec<NodeId>),

    #[error("node declares {0} output ports")]
    TooManyOutputPorts(usize),

    #[error("node {node} is not an input node")]
    NotAnInput { node: NodeId },

    #[error("node {node} ({type_name}) failed: {source}")]
    Node {
        node: NodeId,
        type_name: String,
        #[source]
        source: NodeError,
    },

    #[error("node id {0} is not greater than existing ids")]
    NonMonotonicId(NodeId),

    #[error(transparent)]
    Construction(#[from] NodeError),
}

impl From<TopologyError<NodeId>> for ModelError {
    fn from(err: TopologyError<NodeId>) -> Self {
        match err {
            TopologyError::CycleDetected { path } => ModelError::CycleDetected(path),
        }
    }
}
