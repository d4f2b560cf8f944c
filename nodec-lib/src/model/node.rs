use std::any::Any;
use std::fmt;

use crate::archive::{ArchiveError, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::FunctionEmitter;

use super::error::{ModelError, NodeError};
use super::port::{InputPort, OutputPort};
use super::transformer::ModelTransformer;
use super::types::{Element, PortValues};

/// How strongly a node wants to be spliced into its caller's instruction stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InlineHint {
    /// The node emits no standalone code (aliases, parameters, literals).
    Required,
    /// Inline when small enough.
    Preferred,
    /// Always emit as a subroutine.
    Never,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub compilable: bool,
    /// The node's output is bound to a parameter of the compiled routine.
    pub input: bool,
    pub inline: InlineHint,
}

impl Capabilities {
    pub const fn compilable(inline: InlineHint) -> Self {
        Self {
            compilable: true,
            input: false,
            inline,
        }
    }

    pub const fn refine_only() -> Self {
        Self {
            compilable: false,
            input: false,
            inline: InlineHint::Preferred,
        }
    }

    pub const fn input() -> Self {
        Self {
            compilable: true,
            input: true,
            inline: InlineHint::Required,
        }
    }

    pub const fn must_refine(&self) -> bool {
        !self.compilable
    }
}

/// Object-safe helpers every node gets for free.
pub trait NodeBase {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn box_clone(&self) -> Box<dyn Node>;
}

impl<T: Node + Clone + 'static> NodeBase for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn box_clone(&self) -> Box<dyn Node> {
        Box::new(self.clone())
    }
}

/// A vertex of the computation graph.
///
/// The model, transformer and compiler only ever talk to nodes through this
/// trait.
pub trait Node: NodeBase + fmt::Debug + Send {
    /// Runtime type name, also used as the archive type tag.
    fn type_name(&self) -> String;

    fn input_ports(&self) -> &[InputPort];

    fn input_ports_mut(&mut self) -> &mut [InputPort];

    fn output_ports(&self) -> &[OutputPort];

    /// Whether the node carries configuration beyond its port wiring, which
    /// its archive record must hold.
    fn has_state(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities;

    /// Computes every output from the gathered input values.
    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError>;

    /// Replaces this node with an equivalent subgraph in the transformer's target
    /// model. Returns `false` when the node should be copied unchanged.
    fn refine(&self, _transformer: &mut ModelTransformer) -> Result<bool, ModelError> {
        Ok(false)
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        _function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        Err(context.uncompilable(self.type_name()))
    }

    /// Writes the node's own fields. The archiver has already written the
    /// type tag, version and id.
    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError>;
}

impl Clone for Box<dyn Node> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Input values and output buffers of the node being computed.
pub struct ComputeContext<'a> {
    inputs: &'a [PortValues],
    outputs: &'a mut [PortValues],
}

impl<'a> ComputeContext<'a> {
    pub fn new(inputs: &'a [PortValues], outputs: &'a mut [PortValues]) -> Self {
        Self { inputs, outputs }
    }

    pub fn input_values(&self, index: usize) -> Result<&PortValues, NodeError> {
        self.inputs.get(index).ok_or(NodeError::PortIndex(index))
    }

    pub fn input<T: Element>(&self, index: usize) -> Result<&[T], NodeError> {
        let values = self.input_values(index)?;
        T::slice(values).ok_or(NodeError::PortType {
            port: "input",
            expected: T::SCALAR_TYPE,
            found: values.scalar_type(),
        })
    }

    /// Replaces an output buffer. The length must match the port's active size.
    pub fn set_output<T: Element>(&mut self, index: usize, values: Vec<T>) -> Result<(), NodeError> {
        let slot = self.outputs.get_mut(index).ok_or(NodeError::PortIndex(index))?;
        if slot.scalar_type() != T::SCALAR_TYPE {
            return Err(NodeError::PortType {
                port: "output",
                expected: slot.scalar_type(),
                found: T::SCALAR_TYPE,
            });
        }
        if slot.len() != values.len() {
            return Err(NodeError::LengthMismatch {
                what: "output",
                expected: slot.len(),
                found: values.len(),
            });
        }
        *slot = T::into_values(values);
        Ok(())
    }
}
