pub mod archive;
pub mod compiler;
pub mod emitter;
pub mod model;
pub mod nodes;

pub use archive::{Archiver, NodeRegistry, Unarchiver};
pub use compiler::{compile_model, CompiledMap, CompilerOptions, IrMapCompiler};
pub use emitter::{HostFunctions, HostValue};
pub use model::{
    Model, ModelTransformer, Node, NodeId, OutputRef, PortElements, PortValues, RefineOptions,
    TransformContext,
};
