use std::marker::PhantomData;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::FunctionEmitter;
use crate::model::{
    Capabilities, ComputeContext, Element, InputPort, Node, NodeError, OutputPort, OutputRef,
};

/// Entry point for external data. Its output buffer is written with
/// [`Model::set_input`](crate::model::Model::set_input) and, when compiled,
/// bound to a parameter of the routine.
#[derive(Clone, Debug)]
pub struct InputNode<T> {
    output: [OutputPort; 1],
    _marker: PhantomData<T>,
}

impl<T: Element> InputNode<T> {
    pub fn new(size: usize) -> Self {
        Self {
            output: [OutputPort::vector("output", T::SCALAR_TYPE, size)],
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        self.output[0].size()
    }
}

impl<T: Element> Node for InputNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("InputNode")
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

    fn has_state(&self) -> bool {
        false
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::input()
    }

    fn compute(&self, _context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        _function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        if context.output_is_bound(0) {
            Ok(())
        } else {
            Err(CompileError::UnboundPort(OutputRef::new(context.node_id(), 0)))
        }
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("size", &self.size())
    }
}

impl<T: Element> ArchivableNode for InputNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("InputNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        Ok(Self::new(reader.read("size")?))
    }
}
