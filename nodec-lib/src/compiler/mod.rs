//! Lowering of a refined model into a callable routine.

mod context;
mod error;
mod options;

#[cfg(test)]
mod tests;

use tracing::{debug, info};

use crate::emitter::interpreter::zeroed_args;
use crate::emitter::ir::Module;
use crate::emitter::{
    ArrayRef, Callee, FunctionEmitter, HostFunctions, Index, Interpreter, IrModuleEmitter, ModuleEmitter,
    Operand, Param, RuntimeError,
};
use crate::model::{Model, ModelError, NodeId, OutputRef, PortElements, PortValues, ScalarType};

pub use context::CompileContext;
pub use error::CompileError;
pub use options::{CompilerOptions, EmissionStrategy, InlinePolicy};

use context::Scope;

/// Parameters of a compiled routine: one array per input node, then one per
/// requested output.
#[derive(Clone, Debug, PartialEq)]
pub struct MapSignature {
    pub function: String,
    pub inputs: Vec<(NodeId, Param)>,
    pub outputs: Vec<Param>,
}

impl MapSignature {
    pub fn params(&self) -> Vec<Param> {
        self.inputs
            .iter()
            .map(|(_, param)| param.clone())
            .chain(self.outputs.iter().cloned())
            .collect()
    }
}

/// Compiles models through the [`ModuleEmitter`] interface.
#[derive(Clone, Debug, Default)]
pub struct IrMapCompiler {
    options: CompilerOptions,
}

/// What a compile pass produced besides the emitted code.
#[derive(Clone, Debug, Default)]
pub struct CompileReport {
    /// Emission strategy chosen by each size-parameterized node, in compile order.
    pub strategies: Vec<(NodeId, EmissionStrategy)>,
    /// Nodes emitted as standalone subroutines.
    pub subroutines: Vec<NodeId>,
}

impl IrMapCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compiles `model` into the in-crate IR.
    pub fn compile(
        &self,
        model: &Model,
        outputs: &[PortElements],
    ) -> Result<CompiledMap, CompileError> {
        let mut module = IrModuleEmitter::new();
        let (signature, report) = self.compile_into(model, outputs, &mut module)?;
        Ok(CompiledMap {
            module: module.finish(),
            signature,
            report,
        })
    }

    /// Compiles `model` through any backend.
    pub fn compile_into<M: ModuleEmitter>(
        &self,
        model: &Model,
        outputs: &[PortElements],
        module: &mut M,
    ) -> Result<(MapSignature, CompileReport), CompileError> {
        model.verify()?;
        let signature = self.signature(model, outputs)?;
        let mut main = module.declare_function(&signature.function, signature.params())?;
        let mut scope = Scope::default();
        let mut report = CompileReport::default();

        for (index, (id, _)) in signature.inputs.iter().enumerate() {
            let param = main
                .parameter(index)
                .ok_or(CompileError::UnboundPort(OutputRef::new(*id, 0)))?;
            scope.bind_array(OutputRef::new(*id, 0), param);
        }

        for (id, node) in model.iter() {
            let capabilities = node.capabilities();
            let type_name = node.type_name();
            if !capabilities.compilable {
                return Err(CompileError::UncompilableNode { node: id, type_name });
            }
            let output_size: usize = node.output_ports().iter().map(|p| p.size()).sum();
            let inline = self.options.should_inline(capabilities, output_size);
            debug!(node = %id, %type_name, inline, "compiling node");
            let ports = (node.input_ports(), node.output_ports());

            if inline {
                let mut context = CompileContext::inline(
                    id,
                    type_name,
                    ports,
                    &self.options,
                    &mut scope,
                    &mut report.strategies,
                );
                node.compile(&mut context, &mut main)?;
            } else {
                let mut args = Vec::new();
                let mut params = Vec::new();
                for (index, input) in node.input_ports().iter().enumerate() {
                    let array = scope.gather(&mut main, input.elements(), input.port_type())?;
                    args.push(Operand::Array(array));
                    params.push(Param {
                        name: format!("in_{index}"),
                        element_type: input.port_type(),
                        len: input.size(),
                    });
                }
                for (index, output) in node.output_ports().iter().enumerate() {
                    let array = main.declare_array(output.port_type(), output.size());
                    scope.bind_array(OutputRef::new(id, index), array);
                    args.push(Operand::Array(array));
                    params.push(Param {
                        name: format!("out_{index}"),
                        element_type: output.port_type(),
                        len: output.size(),
                    });
                }

                let name = format!("{}_node_{}", self.options.function_name, id);
                let mut function = module.declare_function(&name, params)?;
                let mut context = CompileContext::subroutine(
                    id,
                    type_name,
                    ports,
                    &self.options,
                    &function,
                    &mut report.strategies,
                )?;
                node.compile(&mut context, &mut function)?;
                module.define_function(function)?;
                main.call(Callee::Function(name), &args)?;
                report.subroutines.push(id);
            }

            for port in 0..node.output_ports().len() {
                let port = OutputRef::new(id, port);
                if !scope.is_bound(port) {
                    return Err(CompileError::UnboundPort(port));
                }
            }
        }

        let first_output = signature.inputs.len();
        for (index, elements) in outputs.iter().enumerate() {
            let target = main
                .parameter(first_output + index)
                .ok_or_else(|| CompileError::InvalidOutput(format!("output {index}")))?;
            self.copy_output(&scope, &mut main, elements, target)?;
        }

        module.define_function(main)?;
        info!(
            function = %signature.function,
            nodes = model.len(),
            subroutines = report.subroutines.len(),
            "compiled model"
        );
        Ok((signature, report))
    }

    fn signature(&self, model: &Model, outputs: &[PortElements]) -> Result<MapSignature, CompileError> {
        let mut inputs = Vec::new();
        for id in model.input_nodes() {
            let node = model.node(id).ok_or(ModelError::UnknownNode(id))?;
            let port = node.output_ports().first().ok_or_else(|| {
                CompileError::InvalidOutput(format!("input node {id} has no output port"))
            })?;
            inputs.push((
                id,
                Param {
                    name: format!("input_{id}"),
                    element_type: port.port_type(),
                    len: port.size(),
                },
            ));
        }

        let mut params = Vec::with_capacity(outputs.len());
        for (index, elements) in outputs.iter().enumerate() {
            let element_type = match elements.get(0) {
                Some(first) => model.output_values(first.output())?.scalar_type(),
                None => ScalarType::F64,
            };
            for coordinate in elements.iter() {
                let value = model.value(coordinate)?;
                if value.scalar_type() != element_type {
                    return Err(CompileError::InvalidOutput(format!(
                        "output {index} mixes {} and {} elements",
                        element_type,
                        value.scalar_type()
                    )));
                }
            }
            params.push(Param {
                name: format!("output_{index}"),
                element_type,
                len: elements.len(),
            });
        }

        Ok(MapSignature {
            function: self.options.function_name.clone(),
            inputs,
            outputs: params,
        })
    }

    fn copy_output(
        &self,
        scope: &Scope,
        main: &mut dyn FunctionEmitter,
        elements: &PortElements,
        target: ArrayRef,
    ) -> Result<(), CompileError> {
        let window = scope.contiguous(elements, target.element_type)?;
        match (window, self.options.strategy_for(elements.len())) {
            (Some(source), EmissionStrategy::Loop) => {
                main.emit_loop(0, elements.len(), &mut |f, i| {
                    let value = f.load(source, Index::Value(i))?;
                    f.store(target, Index::Value(i), value)
                })
            }
            _ => {
                for (i, coordinate) in elements.iter().enumerate() {
                    let value = scope.load(main, coordinate)?;
                    main.store(target, Index::Const(i), value)?;
                }
                Ok(())
            }
        }
    }
}

/// A compiled routine together with its signature.
#[derive(Clone, Debug)]
pub struct CompiledMap {
    module: Module,
    signature: MapSignature,
    report: CompileReport,
}

impl CompiledMap {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn signature(&self) -> &MapSignature {
        &self.signature
    }

    pub fn report(&self) -> &CompileReport {
        &self.report
    }

    /// Strategy chosen by `node`, if it is size-parameterized.
    pub fn strategy(&self, node: NodeId) -> Option<EmissionStrategy> {
        self.report
            .strategies
            .iter()
            .find(|(id, _)| *id == node)
            .map(|(_, strategy)| *strategy)
    }

    /// Runs the routine on the reference interpreter. `inputs` follow
    /// [`MapSignature::inputs`]; the result holds one buffer per output.
    pub fn compute(
        &self,
        inputs: &[PortValues],
        host: &mut HostFunctions,
    ) -> Result<Vec<PortValues>, RuntimeError> {
        if inputs.len() != self.signature.inputs.len() {
            return Err(RuntimeError::ArgumentCount {
                function: self.signature.function.clone(),
                expected: self.signature.inputs.len(),
                found: inputs.len(),
            });
        }
        let function = self
            .module
            .function(&self.signature.function)
            .ok_or_else(|| RuntimeError::UnknownFunction(self.signature.function.clone()))?;
        let mut args = zeroed_args(function);
        for (slot, values) in args.iter_mut().zip(inputs) {
            *slot = values.clone();
        }
        let mut results = Interpreter::new(&self.module).run(&self.signature.function, args, host)?;
        Ok(results.split_off(self.signature.inputs.len()))
    }

    /// Lowers the routine to native code.
    #[cfg(feature = "jit")]
    pub fn jit(&self) -> Result<crate::emitter::jit::JitMap, CompileError> {
        crate::emitter::jit::JitMap::new(&self.module, self.signature.clone())
    }
}

/// Compiles `model` with default options.
pub fn compile_model(model: &Model, outputs: &[PortElements]) -> Result<CompiledMap, CompileError> {
    IrMapCompiler::default().compile(model, outputs)
}
