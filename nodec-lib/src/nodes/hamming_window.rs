use std::f64::consts::PI;
use std::marker::PhantomData;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::emitter::BinaryOp;
use crate::model::{
    Capabilities, ComputeContext, InputPort, ModelError, ModelTransformer, Node, NodeError,
    OutputPort, OutputRef, PortElements, Real,
};

use super::{BinaryOperationNode, ConstantNode};

/// Hamming window of length `size`: `0.54 - 0.46 cos(2 pi i / (size - 1))`.
pub fn hamming_window<T: Real>(size: usize) -> Vec<T> {
    match size {
        0 => Vec::new(),
        1 => vec![T::one()],
        _ => {
            let denominator = (size - 1) as f64;
            (0..size)
                .map(|i| T::from_f64(0.54 - 0.46 * (2.0 * PI * i as f64 / denominator).cos()))
                .collect()
        }
    }
}

/// Multiplies its input by a Hamming window of the same length.
#[derive(Clone, Debug)]
pub struct HammingWindowNode<T> {
    input: [InputPort; 1],
    output: [OutputPort; 1],
    _marker: PhantomData<T>,
}

impl<T: Real> HammingWindowNode<T> {
    pub fn new(input: PortElements) -> Self {
        let size = input.len();
        Self {
            input: [InputPort::new("input", T::SCALAR_TYPE, input)],
            output: [OutputPort::vector("output", T::SCALAR_TYPE, size)],
            _marker: PhantomData,
        }
    }
}

impl<T: Real> Node for HammingWindowNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("HammingWindowNode")
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
        Capabilities::refine_only()
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        let input = context.input::<T>(0)?;
        let window = hamming_window::<T>(input.len());
        let result = input.iter().zip(window).map(|(x, w)| *x * w).collect();
        context.set_output(0, result)
    }

    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool, ModelError> {
        let size = self.input[0].size();
        let input = transformer.translate(self.input[0].elements())?;
        let window = transformer.add_node(ConstantNode::new(hamming_window::<T>(size)))?;
        let product = transformer.add_node(BinaryOperationNode::<T>::new(
            BinaryOp::Multiply,
            input,
            OutputRef::new(window, 0).elements(size),
        )?)?;
        transformer.map_output(0, OutputRef::new(product, 0).elements(size))?;
        Ok(true)
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("input", self.input[0].elements())
    }
}

impl<T: Real> ArchivableNode for HammingWindowNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("HammingWindowNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        Ok(Self::new(reader.read("input")?))
    }
}
