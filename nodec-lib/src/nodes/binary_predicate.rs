use std::marker::PhantomData;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::{ComparePredicate, FunctionEmitter};
use crate::model::{
    Capabilities, ComputeContext, InlineHint, InputPort, Node, NodeError, OutputPort,
    PortElements, Real, ScalarType,
};

use super::compile_elementwise;

/// Elementwise comparison producing booleans.
#[derive(Clone, Debug)]
pub struct BinaryPredicateNode<T> {
    predicate: ComparePredicate,
    inputs: [InputPort; 2],
    output: [OutputPort; 1],
    _marker: PhantomData<T>,
}

impl<T: Real> BinaryPredicateNode<T> {
    pub fn new(
        predicate: ComparePredicate,
        input1: PortElements,
        input2: PortElements,
    ) -> Result<Self, NodeError> {
        if input1.len() != input2.len() {
            return Err(NodeError::LengthMismatch {
                what: "binary predicate inputs",
                expected: input1.len(),
                found: input2.len(),
            });
        }
        let size = input1.len();
        Ok(Self {
            predicate,
            inputs: [
                InputPort::new("input1", T::SCALAR_TYPE, input1),
                InputPort::new("input2", T::SCALAR_TYPE, input2),
            ],
            output: [OutputPort::vector("output", ScalarType::Bool, size)],
            _marker: PhantomData,
        })
    }

    pub fn from_name(
        predicate: &str,
        input1: PortElements,
        input2: PortElements,
    ) -> Result<Self, NodeError> {
        Self::new(predicate.parse()?, input1, input2)
    }

    pub fn predicate(&self) -> ComparePredicate {
        self.predicate
    }
}

impl<T: Real> Node for BinaryPredicateNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("BinaryPredicateNode")
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

    fn capabilities(&self) -> Capabilities {
        Capabilities::compilable(InlineHint::Preferred)
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        let lhs = context.input::<T>(0)?;
        let rhs = context.input::<T>(1)?;
        let result: Vec<bool> = lhs
            .iter()
            .zip(rhs)
            .map(|(a, b)| self.predicate.apply(*a, *b))
            .collect();
        context.set_output(0, result)
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        let predicate = self.predicate;
        compile_elementwise(context, function, self.output[0].size(), &|f, a, b| {
            f.compare(predicate, a, b)
        })
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("predicate", self.predicate.name())?;
        writer.write("input1", self.inputs[0].elements())?;
        writer.write("input2", self.inputs[1].elements())
    }
}

impl<T: Real> ArchivableNode for BinaryPredicateNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("BinaryPredicateNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        let predicate: String = reader.read("predicate")?;
        Ok(Self::from_name(
            &predicate,
            reader.read("input1")?,
            reader.read("input2")?,
        )?)
    }
}
