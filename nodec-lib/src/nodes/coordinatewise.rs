use std::fmt;
use std::str::FromStr;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::emitter::BinaryOp;
use crate::model::{
    Capabilities, ComputeContext, InputPort, ModelError, ModelTransformer, Node, NodeError,
    OutputPort, OutputRef, PortElements, Real,
};

use super::{BinaryOperationNode, ConstantNode};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoordinatewiseOperation {
    /// `value * input`
    Scale,
    /// `value + input`
    Shift,
}

impl CoordinatewiseOperation {
    pub fn name(self) -> &'static str {
        match self {
            CoordinatewiseOperation::Scale => "scale",
            CoordinatewiseOperation::Shift => "shift",
        }
    }

    pub fn binary_op(self) -> BinaryOp {
        match self {
            CoordinatewiseOperation::Scale => BinaryOp::Multiply,
            CoordinatewiseOperation::Shift => BinaryOp::Add,
        }
    }
}

impl fmt::Display for CoordinatewiseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CoordinatewiseOperation {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scale" => Ok(CoordinatewiseOperation::Scale),
            "shift" => Ok(CoordinatewiseOperation::Shift),
            _ => Err(NodeError::UnknownVariant {
                kind: "coordinatewise operation",
                name: s.to_string(),
            }),
        }
    }
}

/// Combines a list of coordinates with one stored value each.
///
/// Not compilable itself; refines into a constant holding the values and a
/// binary operation.
#[derive(Clone, Debug)]
pub struct CoordinatewiseNode<T> {
    operation: CoordinatewiseOperation,
    values: Vec<T>,
    input: [InputPort; 1],
    output: [OutputPort; 1],
}

impl<T: Real> CoordinatewiseNode<T> {
    pub fn new(
        operation: CoordinatewiseOperation,
        values: Vec<T>,
        coordinates: PortElements,
    ) -> Result<Self, NodeError> {
        if values.len() != coordinates.len() {
            return Err(NodeError::LengthMismatch {
                what: "coordinatewise values",
                expected: coordinates.len(),
                found: values.len(),
            });
        }
        let size = values.len();
        Ok(Self {
            operation,
            values,
            input: [InputPort::new("input", T::SCALAR_TYPE, coordinates)],
            output: [OutputPort::vector("output", T::SCALAR_TYPE, size)],
        })
    }

    pub fn scale(values: Vec<T>, coordinates: PortElements) -> Result<Self, NodeError> {
        Self::new(CoordinatewiseOperation::Scale, values, coordinates)
    }

    pub fn shift(values: Vec<T>, coordinates: PortElements) -> Result<Self, NodeError> {
        Self::new(CoordinatewiseOperation::Shift, values, coordinates)
    }

    pub fn operation(&self) -> CoordinatewiseOperation {
        self.operation
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

impl<T: Real> Node for CoordinatewiseNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("CoordinatewiseNode")
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
        let op = self.operation.binary_op();
        let input = context.input::<T>(0)?;
        let result = self
            .values
            .iter()
            .zip(input)
            .map(|(value, x)| op.apply(*value, *x))
            .collect();
        context.set_output(0, result)
    }

    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool, ModelError> {
        let size = self.values.len();
        let input = transformer.translate(self.input[0].elements())?;
        let constant = transformer.add_node(ConstantNode::new(self.values.clone()))?;
        let combined = transformer.add_node(BinaryOperationNode::<T>::new(
            self.operation.binary_op(),
            OutputRef::new(constant, 0).elements(size),
            input,
        )?)?;
        transformer.map_output(0, OutputRef::new(combined, 0).elements(size))?;
        Ok(true)
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("operation", self.operation.name())?;
        writer.write_elements("values", &self.values)?;
        writer.write("coordinates", self.input[0].elements())
    }
}

impl<T: Real> ArchivableNode for CoordinatewiseNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("CoordinatewiseNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        let operation: String = reader.read("operation")?;
        Ok(Self::new(
            operation.parse()?,
            reader.read_elements("values")?,
            reader.read("coordinates")?,
        )?)
    }
}
