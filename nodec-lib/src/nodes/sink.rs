use std::fmt;
use std::sync::Arc;

use crate::archive::{ArchivableNode, ArchiveError, ObjectReader, ObjectWriter};
use crate::compiler::{CompileContext, CompileError};
use crate::emitter::{Callee, FunctionEmitter, Operand};
use crate::model::{
    Capabilities, ComputeContext, Element, InlineHint, InputPort, Node, NodeError, OutputPort,
    PortElements, ScalarType,
};

pub type SinkCallback<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

/// Passes its input through and, when `trigger` is set, hands the input to an
/// external callback. Compiled code calls the host function named `sink_name`.
///
/// Callbacks are not archived; re-attach them after loading with
/// [`SinkNode::set_callback`].
#[derive(Clone)]
pub struct SinkNode<T> {
    sink_name: String,
    callback: Option<SinkCallback<T>>,
    inputs: [InputPort; 2],
    output: [OutputPort; 1],
}

impl<T: Element> fmt::Debug for SinkNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkNode")
            .field("sink_name", &self.sink_name)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("inputs", &self.inputs)
            .finish()
    }
}

impl<T: Element> SinkNode<T> {
    pub fn new(
        input: PortElements,
        trigger: PortElements,
        sink_name: impl Into<String>,
    ) -> Result<Self, NodeError> {
        if trigger.len() != 1 {
            return Err(NodeError::LengthMismatch {
                what: "sink trigger",
                expected: 1,
                found: trigger.len(),
            });
        }
        let size = input.len();
        Ok(Self {
            sink_name: sink_name.into(),
            callback: None,
            inputs: [
                InputPort::new("input", T::SCALAR_TYPE, input),
                InputPort::new("trigger", ScalarType::Bool, trigger),
            ],
            output: [OutputPort::vector("output", T::SCALAR_TYPE, size)],
        })
    }

    pub fn with_callback(mut self, callback: impl Fn(&[T]) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn set_callback(&mut self, callback: impl Fn(&[T]) + Send + Sync + 'static) {
        self.callback = Some(Arc::new(callback));
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }
}

impl<T: Element> Node for SinkNode<T> {
    fn type_name(&self) -> String {
        T::composite_type_name("SinkNode")
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
        Capabilities::compilable(InlineHint::Required)
    }

    fn compute(&self, context: &mut ComputeContext<'_>) -> Result<(), NodeError> {
        let input = context.input::<T>(0)?;
        let trigger = context.input::<bool>(1)?;
        if trigger.first().copied().unwrap_or(false) {
            if let Some(callback) = &self.callback {
                callback(input);
            }
        }
        let values = input.to_vec();
        context.set_output(0, values)
    }

    fn compile(
        &self,
        context: &mut CompileContext<'_>,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), CompileError> {
        let trigger = context.input_element(function, 1, 0)?;
        let data = context.input_array(function, 0)?;
        let callee = Callee::External(self.sink_name.clone());
        function.emit_branch(trigger, &mut |f| {
            f.call(callee.clone(), &[Operand::Array(data)])
        })?;
        context.bind_output_alias(0, self.inputs[0].elements())
    }

    fn write_to_archive(&self, writer: &mut ObjectWriter) -> Result<(), ArchiveError> {
        writer.write("input", self.inputs[0].elements())?;
        writer.write("trigger", self.inputs[1].elements())?;
        writer.write("sink_name", &self.sink_name)
    }
}

impl<T: Element> ArchivableNode for SinkNode<T> {
    fn type_tag() -> String {
        T::composite_type_name("SinkNode")
    }

    fn read_from_archive(reader: &ObjectReader<'_>) -> Result<Self, ArchiveError> {
        Ok(Self::new(
            reader.read("input")?,
            reader.read("trigger")?,
            reader.read::<String>("sink_name")?,
        )?)
    }
}
