use std::marker::PhantomData;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::{BinaryOp, FunctionEmitter};
use crate::model::{
    Capabilities, ComputeContext, InlineHint, InputPort, Node, NodeError, OutputPort,
    PortElements, Real,
};

use super::compile_elementwise;

/// Elementwise `input1 op input2`.
#[derive(Clone, Debug)]
pub struct BinaryOperationNode<T> {
    operation: BinaryOp,
    inputs: [InputPort; 2],
    output: [OutputPort; 1],
    _marker: PhantomData<T>,
}

impl<T: Real> BinaryOperationNode<T> {
    pub fn new(
        operation: BinaryOp,
        input1: PortElements,
        input2: PortElements,
    ) -> Result<Self, NodeError> {
        if input1.len() != input2.len() {
            return Err(NodeError::LengthMismatch {
                what: "binary operation inputs",
                expected: input1.len(),
                found: input2.len(),
            });
        }
        let size = input1.len();
        Ok(Self {
            operation,
            inputs: [
                InputPort::new("input1", T::SCALAR_TYPE, input1),
                InputPort::new("input2", T::SCALAR_TYPE, input2),
            ],
            output: [OutputPort::vector("output", T::SCALAR_TYPE, size)],
            _marker: PhantomData,
        })
    }

    /// Builds the node from an operation name such as `"add"`.
    pub fn from_name(
        operation: &str,
        input1: PortElements,
        input2: PortElements,
    ) -> Result<Self, NodeError> {
        Self::new(operation.parse()?, input1, input2)
    }

    pub fn operation(&self) -> BinaryOp {
        self.operation
    }

    pub fn size(&self) -> usize {
        self.output[0].size()
    }
}

impl<T: Real> Node for BinaryOperationNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("BinaryOperationNode")
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.inputs
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    fn output_ports(&self) -> &[OutputPort] {
        &self.output
    }

    fn has_state(&self) -> bool {
        false
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::compilable(InlineHint::Preferred)
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        let lhs = context.input::<T>(0)?;
        let rhs = context.input::<T>(1)?;
        let result = lhs
            .iter()
            .zip(rhs)
            .map(|(a, b)| self.operation.apply(*a, *b))
            .collect();
        context.set_output(0, result)
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        let operation = self.operation;
        compile_elementwise(context, function, self.size(), &|f, a, b| {
            f.binary_op(operation, a, b)
        })
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("operation", self.operation.name())?;
        writer.write("input1", self.inputs[0].elements())?;
        writer.write("input2", self.inputs[1].elements())
    }
}

impl<T: Real> ArchivableNode for BinaryOperationNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("BinaryOperationNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        let operation: String = reader.read("operation")?;
        Ok(Self::from_name(
            &operation,
            reader.read("input1")?,
            reader.read("input2")?,
        )?)
    }
}
