use std::collections::HashMap;

use tracing::debug;

use crate::emitter::{ArrayRef, FunctionEmitter, Index, Value};
use crate::model::{Coordinate, InputPort, NodeId, OutputPort, OutputRef, PortElements, ScalarType};

use super::error::CompileError;
use super::options::{CompilerOptions, EmissionStrategy};

/// Where one element of an output port lives in the function being emitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Location {
    array: ArrayRef,
    element: usize,
}

impl Location {
    fn absolute(&self) -> usize {
        self.array.offset + self.element
    }
}

#[derive(Clone, Debug)]
enum PortBinding {
    Array(ArrayRef),
    /// The port emits no code; its elements are other ports' elements.
    Alias(Vec<Location>),
}

/// Binding table from output ports to emitted arrays in the entry function.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    ports: HashMap<OutputRef, PortBinding>,
}

impl Scope {
    pub(crate) fn bind_array(&mut self, port: OutputRef, array: ArrayRef) {
        self.ports.insert(port, PortBinding::Array(array));
    }

    pub(crate) fn is_bound(&self, port: OutputRef) -> bool {
        self.ports.contains_key(&port)
    }

    fn bind_alias(&mut self, port: OutputRef, elements: &PortElements) -> Result<(), CompileError> {
        let locations = elements
            .iter()
            .map(|coordinate| self.locate(coordinate))
            .collect::<Result<Vec<_>, _>>()?;
        self.ports.insert(port, PortBinding::Alias(locations));
        Ok(())
    }

    fn locate(&self, coordinate: Coordinate) -> Result<Location, CompileError> {
        let port = coordinate.output();
        match self.ports.get(&port) {
            Some(PortBinding::Array(array)) if coordinate.element < array.len => Ok(Location {
                array: *array,
                element: coordinate.element,
            }),
            Some(PortBinding::Array(array)) => Err(CompileError::IndexOutOfBounds {
                index: coordinate.element,
                len: array.len,
            }),
            Some(PortBinding::Alias(locations)) => {
                locations
                    .get(coordinate.element)
                    .copied()
                    .ok_or(CompileError::IndexOutOfBounds {
                        index: coordinate.element,
                        len: locations.len(),
                    })
            }
            None => Err(CompileError::UnboundPort(port)),
        }
    }

    pub(crate) fn load(
        &self,
        function: &mut dyn FunctionEmitter,
        coordinate: Coordinate,
    ) -> Result<Value, CompileError> {
        let location = self.locate(coordinate)?;
        function.load(location.array, Index::Const(location.element))
    }

    /// A window over `elements` when they sit consecutively in one array.
    pub(crate) fn contiguous(
        &self,
        elements: &PortElements,
        element_type: ScalarType,
    ) -> Result<Option<ArrayRef>, CompileError> {
        let locations = elements
            .iter()
            .map(|coordinate| self.locate(coordinate))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(first) = locations.first() else {
            return Ok(None);
        };
        let start = first.absolute();
        let contiguous = locations.iter().enumerate().all(|(i, location)| {
            location.array.id == first.array.id && location.absolute() == start + i
        });
        Ok(contiguous.then_some(ArrayRef {
            id: first.array.id,
            element_type,
            offset: start,
            len: locations.len(),
        }))
    }

    /// `elements` as one array: a window when possible, otherwise a fresh local
    /// filled element by element.
    pub(crate) fn gather(
        &self,
        function: &mut dyn FunctionEmitter,
        elements: &PortElements,
        element_type: ScalarType,
    ) -> Result<ArrayRef, CompileError> {
        if let Some(window) = self.contiguous(elements, element_type)? {
            return Ok(window);
        }
        let array = function.declare_array(element_type, elements.len());
        for (i, coordinate) in elements.iter().enumerate() {
            let value = self.load(function, coordinate)?;
            function.store(array, Index::Const(i), value)?;
        }
        Ok(array)
    }
}

enum Mode<'a> {
    /// Emitting into the entry function; ports resolve through the scope.
    Inline(&'a mut Scope),
    /// Emitting a subroutine whose parameters are the node's inputs, then outputs.
    Subroutine {
        inputs: Vec<ArrayRef>,
        outputs: Vec<ArrayRef>,
    },
}

/// What a node's `compile` sees: its ports resolved to emitted arrays and values.
pub struct CompileContext<'a> {
    node: NodeId,
    type_name: String,
    inputs: &'a [InputPort],
    outputs: &'a [OutputPort],
    options: &'a CompilerOptions,
    mode: Mode<'a>,
    strategies: &'a mut Vec<(NodeId, EmissionStrategy)>,
}

impl<'a> CompileContext<'a> {
    pub(crate) fn inline(
        node: NodeId,
        type_name: String,
        ports: (&'a [InputPort], &'a [OutputPort]),
        options: &'a CompilerOptions,
        scope: &'a mut Scope,
        strategies: &'a mut Vec<(NodeId, EmissionStrategy)>,
    ) -> Self {
        Self {
            node,
            type_name,
            inputs: ports.0,
            outputs: ports.1,
            options,
            mode: Mode::Inline(scope),
            strategies,
        }
    }

    pub(crate) fn subroutine(
        node: NodeId,
        type_name: String,
        ports: (&'a [InputPort], &'a [OutputPort]),
        options: &'a CompilerOptions,
        function: &dyn FunctionEmitter,
        strategies: &'a mut Vec<(NodeId, EmissionStrategy)>,
    ) -> Result<Self, CompileError> {
        let (inputs, outputs) = ports;
        let param = |index: usize| {
            function
                .parameter(index)
                .ok_or(CompileError::UnboundPort(OutputRef::new(node, index)))
        };
        let input_arrays = (0..inputs.len()).map(param).collect::<Result<Vec<_>, _>>()?;
        let output_arrays = (inputs.len()..inputs.len() + outputs.len())
            .map(param)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            node,
            type_name,
            inputs,
            outputs,
            options,
            mode: Mode::Subroutine {
                inputs: input_arrays,
                outputs: output_arrays,
            },
            strategies,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn options(&self) -> &CompilerOptions {
        self.options
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.mode, Mode::Inline(_))
    }

    /// Picks loop or expanded emission for `size` elements and records the choice.
    pub fn strategy(&mut self, size: usize) -> EmissionStrategy {
        let strategy = self.options.strategy_for(size);
        debug!(node = %self.node, size, ?strategy, "emission strategy");
        self.strategies.push((self.node, strategy));
        strategy
    }

    pub fn uncompilable(&self, type_name: String) -> CompileError {
        CompileError::UncompilableNode {
            node: self.node,
            type_name,
        }
    }

    fn input_port(&self, port: usize) -> Result<&'a InputPort, CompileError> {
        self.inputs
            .get(port)
            .ok_or(CompileError::UnboundPort(OutputRef::new(self.node, port)))
    }

    fn output_port(&self, port: usize) -> Result<&'a OutputPort, CompileError> {
        self.outputs
            .get(port)
            .ok_or(CompileError::UnboundPort(OutputRef::new(self.node, port)))
    }

    pub fn input_size(&self, port: usize) -> Result<usize, CompileError> {
        Ok(self.input_port(port)?.size())
    }

    /// True when the input can be read as one array without copying.
    pub fn input_is_contiguous(&self, port: usize) -> Result<bool, CompileError> {
        let input = self.input_port(port)?;
        match &self.mode {
            Mode::Inline(scope) => Ok(scope
                .contiguous(input.elements(), input.port_type())?
                .is_some()),
            Mode::Subroutine { .. } => Ok(true),
        }
    }

    pub fn input_array(
        &mut self,
        function: &mut dyn FunctionEmitter,
        port: usize,
    ) -> Result<ArrayRef, CompileError> {
        let input = self.input_port(port)?;
        match &mut self.mode {
            Mode::Inline(scope) => scope.gather(function, input.elements(), input.port_type()),
            Mode::Subroutine { inputs, .. } => inputs
                .get(port)
                .copied()
                .ok_or(CompileError::UnboundPort(OutputRef::new(self.node, port))),
        }
    }

    pub fn input_element(
        &mut self,
        function: &mut dyn FunctionEmitter,
        port: usize,
        element: usize,
    ) -> Result<Value, CompileError> {
        let input = self.input_port(port)?;
        match &mut self.mode {
            Mode::Inline(scope) => {
                let coordinate = input.coordinate(element).ok_or(CompileError::IndexOutOfBounds {
                    index: element,
                    len: input.size(),
                })?;
                scope.load(function, coordinate)
            }
            Mode::Subroutine { inputs, .. } => {
                let array = inputs
                    .get(port)
                    .copied()
                    .ok_or(CompileError::UnboundPort(OutputRef::new(self.node, port)))?;
                function.load(array, Index::Const(element))
            }
        }
    }

    /// Array backing output `port`, declared on first use.
    pub fn output_array(
        &mut self,
        function: &mut dyn FunctionEmitter,
        port: usize,
    ) -> Result<ArrayRef, CompileError> {
        let output = self.output_port(port)?;
        let key = OutputRef::new(self.node, port);
        match &mut self.mode {
            Mode::Inline(scope) => {
                if let Some(PortBinding::Array(array)) = scope.ports.get(&key) {
                    return Ok(*array);
                }
                let array = function.declare_array(output.port_type(), output.size());
                scope.bind_array(key, array);
                Ok(array)
            }
            Mode::Subroutine { outputs, .. } => outputs
                .get(port)
                .copied()
                .ok_or(CompileError::UnboundPort(key)),
        }
    }

    /// Binds output `port` to an existing array, e.g. a constant table.
    pub fn bind_output_array(&mut self, port: usize, array: ArrayRef) -> Result<(), CompileError> {
        let output = self.output_port(port)?;
        if array.len != output.size() || array.element_type != output.port_type() {
            return Err(CompileError::InvalidOutput(format!(
                "array of {} {} bound to port {} of node {}",
                array.len,
                array.element_type,
                port,
                self.node
            )));
        }
        let key = OutputRef::new(self.node, port);
        if let Mode::Inline(scope) = &mut self.mode {
            scope.bind_array(key, array);
            return Ok(());
        }
        Err(self.inline_required())
    }

    /// Makes output `port` another name for `elements`; no code is emitted.
    pub fn bind_output_alias(
        &mut self,
        port: usize,
        elements: &PortElements,
    ) -> Result<(), CompileError> {
        let output = self.output_port(port)?;
        if elements.len() != output.size() {
            return Err(CompileError::InvalidOutput(format!(
                "{} elements aliased to port {} of node {} with size {}",
                elements.len(),
                port,
                self.node,
                output.size()
            )));
        }
        let key = OutputRef::new(self.node, port);
        if let Mode::Inline(scope) = &mut self.mode {
            return scope.bind_alias(key, elements);
        }
        Err(self.inline_required())
    }

    /// Whether output `port` already has a binding (set up by the compiler for inputs).
    pub fn output_is_bound(&self, port: usize) -> bool {
        match &self.mode {
            Mode::Inline(scope) => scope.is_bound(OutputRef::new(self.node, port)),
            Mode::Subroutine { outputs, .. } => port < outputs.len(),
        }
    }

    fn inline_required(&self) -> CompileError {
        CompileError::InlineRequired {
            node: self.node,
            type_name: self.type_name.clone(),
        }
    }
}
