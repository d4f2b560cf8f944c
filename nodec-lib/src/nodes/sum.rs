use std::marker::PhantomData;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError, EmissionStrategy};
use crate::emitter::{BinaryOp, FunctionEmitter, Index, Literal};
use crate::model::{
    Capabilities, ComputeContext, InlineHint, InputPort, Node, NodeError, OutputPort,
    PortElements, Real,
};

/// Sums each coordinate group into one output element. Empty groups sum to zero.
#[derive(Clone, Debug)]
pub struct SumNode<T> {
    inputs: Vec<InputPort>,
    output: [OutputPort; 1],
    _marker: PhantomData<T>,
}

impl<T: Real> SumNode<T> {
    pub fn new(groups: Vec<PortElements>) -> Self {
        let size = groups.len();
        Self {
            inputs: groups
                .into_iter()
                .map(|group| InputPort::new("input", T::SCALAR_TYPE, group))
                .collect(),
            output: [OutputPort::vector("output", T::SCALAR_TYPE, size)],
            _marker: PhantomData,
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = &PortElements> {
        self.inputs.iter().map(|port| port.elements())
    }
}

impl<T: Real> Node for SumNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("SumNode")
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
        let mut sums = Vec::with_capacity(self.inputs.len());
        for group in 0..self.inputs.len() {
            let values = context.input::<T>(group)?;
            sums.push(values.iter().fold(T::zero(), |acc, x| acc + *x));
        }
        context.set_output(0, sums)
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        let output = context.output_array(function, 0)?;
        let zero = Literal::zero(T::SCALAR_TYPE.into());

        for (group, port) in self.inputs.iter().enumerate() {
            let size = port.size();
            if size == 0 {
                let value = function.literal(zero);
                function.store(output, Index::Const(group), value)?;
                continue;
            }

            let strategy = context.strategy(size);
            let total = if strategy == EmissionStrategy::Loop && context.input_is_contiguous(group)? {
                let values = context.input_array(function, group)?;
                let accumulator = function.declare_local(zero);
                function.emit_loop(0, size, &mut |f, i| {
                    let x = f.load(values, Index::Value(i))?;
                    let sum = f.binary_op(BinaryOp::Add, accumulator, x)?;
                    f.assign(accumulator, sum)
                })?;
                accumulator
            } else {
                let mut total = context.input_element(function, group, 0)?;
                for i in 1..size {
                    let x = context.input_element(function, group, i)?;
                    total = function.binary_op(BinaryOp::Add, total, x)?;
                }
                total
            };
            function.store(output, Index::Const(group), total)?;
        }
        Ok(())
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        let groups: Vec<&PortElements> = self.groups().collect();
        writer.write("groups", &groups)
    }
}

impl<T: Real> ArchivableNode for SumNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("SumNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        Ok(Self::new(reader.read("groups")?))
    }
}
