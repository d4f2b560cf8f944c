use thiserror::Error;

use crate::emitter::{ArrayId, RuntimeError, Value, ValueType};
use crate::model::{ModelError, NodeError, NodeId, OutputRef};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("node {node} of type {type_name} cannot be compiled; refine the model first")]
    UncompilableNode { node: NodeId, type_name: String },

    #[error("node {node} of type {type_name} can only be compiled inline")]
    InlineRequired { node: NodeId, type_name: String },

    #[error("port {0} has no emitted value")]
    UnboundPort(OutputRef),

    #[error("{operation}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        operation: &'static str,
        expected: ValueType,
        found: ValueType,
    },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("value {0} is not declared")]
    UnknownValue(Value),

    #[error("array {0:?} is not declared")]
    UnknownArray(ArrayId),

    #[error("function `{0}` is not defined")]
    UnknownFunction(String),

    #[error("function `{0}` is already defined")]
    DuplicateFunction(String),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("backend error: {0}")]
    Backend(String),
}
