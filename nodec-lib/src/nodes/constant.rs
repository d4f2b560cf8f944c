use crate::archive::{ArchivableNode, ArchiveError, ArchiveVersion, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::FunctionEmitter;
use crate::model::{
    Capabilities, ComputeContext, Element, InlineHint, InputPort, MemoryShape, Node, NodeError,
    OutputPort, PortMemoryLayout, PortValues,
};

/// Emits a fixed array of values.
#[derive(Clone, Debug)]
pub struct ConstantNode<T> {
    values: Vec<T>,
    output: [OutputPort; 1],
}

impl<T: Element> ConstantNode<T> {
    pub fn new(values: Vec<T>) -> Self {
        let layout = PortMemoryLayout::vector(values.len());
        Self {
            output: [OutputPort::new("output", T::SCALAR_TYPE, layout)],
            values,
        }
    }

    /// Constant laid out with an explicit shape, whose element count must match.
    pub fn with_shape(values: Vec<T>, shape: MemoryShape) -> Result<Self, NodeError> {
        if shape.num_elements() != values.len() {
            return Err(NodeError::LengthMismatch {
                what: "constant shape",
                expected: shape.num_elements(),
                found: values.len(),
            });
        }
        Ok(Self {
            output: [OutputPort::new("output", T::SCALAR_TYPE, PortMemoryLayout::new(shape))],
            values,
        })
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn shape(&self) -> &MemoryShape {
        self.output[0].layout().active()
    }
}

impl<T: Element> Node for ConstantNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("ConstantNode")
    }

    fn input_ports(&self) -> &[InputPort] {
        &[]
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut []
    }

    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::compilable(InlineHint::Required)
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        context.set_output(0, self.values.clone())
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        let array = function.declare_constant_array(&PortValues::from_vec(self.values.clone()));
        context.bind_output_array(0, array)
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write_elements("values", &self.values)?;
        if writer.version() >= ArchiveVersion(2) {
            writer.write("shape", self.shape())?;
        }
        Ok(())
    }
}

impl<T: Element> ArchivableNode for ConstantNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("ConstantNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        let values: Vec<T> = reader.read_elements("values")?;
        if reader.version() >= ArchiveVersion(2) {
            Ok(Self::with_shape(values, reader.read("shape")?)?)
        } else {
            Ok(Self::new(values))
        }
    }
}
