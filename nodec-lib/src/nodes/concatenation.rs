use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::FunctionEmitter;
use crate::model::{
    Capabilities, ComputeContext, Element, InlineHint, InputPort, MemoryShape, Node, NodeError,
    OutputPort, PortElements, PortMemoryLayout,
};

/// Regroups arbitrary elements into one port. Compiles to an alias, not code.
#[derive(Clone, Debug)]
pub struct ConcatenationNode<T> {
    input: [InputPort; 1],
    output: [OutputPort; 1],
    _marker: std::marker::PhantomData<T>,
}

impl<T: Element> ConcatenationNode<T> {
    pub fn new(input: PortElements) -> Self {
        let shape = MemoryShape::vector(input.len());
        Self::build(input, shape)
    }

    pub fn with_shape(input: PortElements, shape: MemoryShape) -> Result<Self, NodeError> {
        if shape.num_elements() != input.len() {
            return Err(NodeError::LengthMismatch {
                what: "concatenation shape",
                expected: shape.num_elements(),
                found: input.len(),
            });
        }
        Ok(Self::build(input, shape))
    }

    fn build(input: PortElements, shape: MemoryShape) -> Self {
        Self {
            input: [InputPort::new("input", T::SCALAR_TYPE, input)],
            output: [OutputPort::new(
                "output",
                T::SCALAR_TYPE,
                PortMemoryLayout::new(shape),
            )],
            _marker: std::marker::PhantomData,
        }
    }

    pub fn shape(&self) -> &MemoryShape {
        self.output[0].layout().active()
    }
}

impl<T: Element> Node for ConcatenationNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("ConcatenationNode")
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.input
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }

    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::compilable(InlineHint::Required)
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        let values = context.input::<T>(0)?.to_vec();
        context.set_output(0, values)
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        _function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        context.bind_output_alias(0, self.input[0].elements())
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("input", self.input[0].elements())?;
        writer.write("shape", self.shape())
    }
}

impl<T: Element> ArchivableNode for ConcatenationNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("ConcatenationNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        Ok(Self::with_shape(reader.read("input")?, reader.read("shape")?)?)
    }
}
