mod error;
mod model_impl;
mod node;
mod port;
pub mod topology;
mod transformer;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{ModelError, NodeError};
pub use model_impl::{Model, NodeData};
pub use node::{Capabilities, ComputeContext, InlineHint, Node, NodeBase};
pub use port::{InputPort, OutputPort};
pub use transformer::{ModelTransformer, PortMap, RefineOptions, Refined, TransformContext};
pub use types::{
    Coordinate, Element, MemoryShape, NodeId, NodeKey, OutputRef, PortElements, PortMemoryLayout,
    PortValues, Real, Scalar, ScalarType, MAX_OUTPUT_PORTS,
};
