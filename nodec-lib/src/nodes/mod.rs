//! The primitive node set.

mod binary_operation;
mod binary_predicate;
mod concatenation;
mod constant;
mod coordinatewise;
mod hamming_window;
mod input;
mod sink;
mod sum;

#[cfg(test)]
mod tests;

pub use binary_operation::BinaryOperationNode;
pub use binary_predicate::BinaryPredicateNode;
pub use concatenation::ConcatenationNode;
pub use constant::ConstantNode;
pub use coordinatewise::{CoordinatewiseNode, CoordinatewiseOperation};
pub use hamming_window::{hamming_window, HammingWindowNode};
pub use input::InputNode;
pub use sink::{SinkCallback, SinkNode};
pub use sum::SumNode;

use crate::archive::{ArchiveVersion, NodeRegistry};
use crate::compiler::{CompileContext, CompileError, EmissionStrategy};
use crate::emitter::{FunctionEmitter, Index, Value};

const V1: ArchiveVersion = ArchiveVersion(1);
const V2: ArchiveVersion = ArchiveVersion(2);

impl NodeRegistry {
    /// Registry with every node in this module, for `f32`, `f64` and, where it
    /// makes sense, `bool`.
    pub fn standard() -> Self {
        let mut registry = NodeRegistry::new();
        macro_rules! register_real {
            ($($t:ty),*) => {$(
                registry
                    .register::<InputNode<$t>>(V1, &[])
                    .register::<ConstantNode<$t>>(V2, &[V1])
                    .register::<BinaryOperationNode<$t>>(V1, &[])
                    .register::<BinaryPredicateNode<$t>>(V1, &[])
                    .register::<CoordinatewiseNode<$t>>(V1, &[])
                    .register::<SumNode<$t>>(V1, &[])
                    .register::<ConcatenationNode<$t>>(V1, &[])
                    .register::<HammingWindowNode<$t>>(V1, &[])
                    .register::<SinkNode<$t>>(V1, &[]);
            )*};
        }
        register_real!(f32, f64);
        registry
            .register::<InputNode<bool>>(V1, &[])
            .register::<ConstantNode<bool>>(V2, &[V1])
            .register::<ConcatenationNode<bool>>(V1, &[])
            .register::<SinkNode<bool>>(V1, &[]);
        registry
    }
}

/// Emits `output[i] = emit(input1[i], input2[i])` for two equally sized inputs,
/// as a loop or as straight-line code depending on size.
fn compile_elementwise(
    context: &mut CompileContext<'_>,
    function: &mut dyn FunctionEmitter,
    size: usize,
    emit: &dyn Fn(&mut dyn FunctionEmitter, Value, Value) -> Result<Value, CompileError>,
) -> Result<(), CompileError> {
    let output = context.output_array(function, 0)?;
    match context.strategy(size) {
        EmissionStrategy::Loop => {
            let lhs = context.input_array(function, 0)?;
            let rhs = context.input_array(function, 1)?;
            function.emit_loop(0, size, &mut |f, i| {
                let a = f.load(lhs, Index::Value(i))?;
                let b = f.load(rhs, Index::Value(i))?;
                let result = emit(f, a, b)?;
                f.store(output, Index::Value(i), result)
            })
        }
        EmissionStrategy::Expanded => {
            for i in 0..size {
                let a = context.input_element(function, 0, i)?;
                let b = context.input_element(function, 1, i)?;
                let result = emit(function, a, b)?;
                function.store(output, Index::Const(i), result)?;
            }
            Ok(())
        }
    }
}
