//! Cranelift lowering of IR modules.
//!
//! Every emitted function has the native signature
//! `fn(args: *const *mut u8, host: *mut HostContext)`: `args` holds one
//! pointer per array parameter and `host` is threaded through to external
//! calls. Local arrays live in stack slots, constant tables in read-only data.

use std::collections::HashMap;
use std::fmt::Display;

use cranelift::codegen::ir::{FuncRef, StackSlot, Value as ClifValue};
use cranelift::codegen::{self, isa::TargetFrontendConfig};
use cranelift::prelude::{
    settings, types, AbiParam, Configurable, FloatCC, FunctionBuilder, FunctionBuilderContext,
    InstBuilder, IntCC, MemFlags, StackSlotData, StackSlotKind, Type, Variable,
};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use indexmap::IndexSet;
use tracing::{debug, info};

use crate::compiler::{CompileError, MapSignature};
use crate::emitter::ir::{self, Arg, ArrayDecl, Expr, Function, IndexExpr, Instr};
use crate::emitter::{
    ArrayId, BinaryOp, Callee, ComparePredicate, HostFunctions, Literal, RuntimeError, Value,
    ValueType,
};
use crate::model::{PortValues, ScalarType};

use super::runtime::{self, HostContext, HOST_ARG_SIZE, SCALAR_BIT};

const HOST_CALL_SYMBOL: &str = "nodec_call_host";

type EntryFn = unsafe extern "C" fn(*const *mut u8, *mut HostContext);

fn backend<E: Display>(what: &'static str) -> impl FnOnce(E) -> CompileError {
    move |e| CompileError::Backend(format!("{what}: {e}"))
}

fn element_size(scalar_type: ScalarType) -> i64 {
    scalar_type.byte_size() as i64
}

fn memory_type(scalar_type: ScalarType) -> Type {
    match scalar_type {
        ScalarType::F32 => types::F32,
        ScalarType::F64 => types::F64,
        ScalarType::Bool => types::I8,
    }
}

fn variable_type(value_type: ValueType, ptr: Type) -> Type {
    match value_type {
        ValueType::F32 => types::F32,
        ValueType::F64 => types::F64,
        ValueType::Bool => types::I8,
        ValueType::Index => ptr,
    }
}

fn variable(value: Value) -> Variable {
    Variable::from_u32(value.0)
}

fn float_cc(predicate: ComparePredicate) -> FloatCC {
    match predicate {
        ComparePredicate::Equal => FloatCC::Equal,
        ComparePredicate::NotEqual => FloatCC::NotEqual,
        ComparePredicate::Less => FloatCC::LessThan,
        ComparePredicate::LessOrEqual => FloatCC::LessThanOrEqual,
        ComparePredicate::Greater => FloatCC::GreaterThan,
        ComparePredicate::GreaterOrEqual => FloatCC::GreaterThanOrEqual,
    }
}

/// Booleans are stored as 0 or 1, so `false < true` is an unsigned compare.
fn int_cc(predicate: ComparePredicate) -> IntCC {
    match predicate {
        ComparePredicate::Equal => IntCC::Equal,
        ComparePredicate::NotEqual => IntCC::NotEqual,
        ComparePredicate::Less => IntCC::UnsignedLessThan,
        ComparePredicate::LessOrEqual => IntCC::UnsignedLessThanOrEqual,
        ComparePredicate::Greater => IntCC::UnsignedGreaterThan,
        ComparePredicate::GreaterOrEqual => IntCC::UnsignedGreaterThanOrEqual,
    }
}

/// JIT compiler for IR modules.
pub struct CraneliftJit {
    builder_context: FunctionBuilderContext,
    ctx: codegen::Context,
    module: JITModule,
    host_call: FuncId,
}

impl CraneliftJit {
    pub fn new() -> Result<Self, CompileError> {
        let mut flag_builder = settings::builder();
        for (name, value) in [
            ("use_colocated_libcalls", "false"),
            ("is_pic", "false"),
            ("opt_level", "speed"),
        ] {
            flag_builder
                .set(name, value)
                .map_err(backend("setting code generation flags"))?;
        }
        let isa_builder = cranelift_native::builder().map_err(backend("detecting host ISA"))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(backend("building ISA"))?;
        debug!(triple = %target_lexicon::Triple::host(), "initializing JIT");

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        builder.symbol(HOST_CALL_SYMBOL, runtime::call_host as *const u8);
        let mut module = JITModule::new(builder);

        let ptr = module.target_config().pointer_type();
        let mut host_sig = module.make_signature();
        host_sig.params.push(AbiParam::new(ptr)); // context
        host_sig.params.push(AbiParam::new(types::I64)); // external index
        host_sig.params.push(AbiParam::new(ptr)); // descriptors
        host_sig.params.push(AbiParam::new(types::I64)); // descriptor count
        let host_call = module
            .declare_function(HOST_CALL_SYMBOL, Linkage::Import, &host_sig)
            .map_err(backend("declaring host trampoline"))?;

        Ok(Self {
            builder_context: FunctionBuilderContext::new(),
            ctx: module.make_context(),
            module,
            host_call,
        })
    }

    /// Compiles every function of `module`; `signature.function` becomes the entry point.
    pub fn compile(
        mut self,
        module: &ir::Module,
        signature: MapSignature,
    ) -> Result<JitMap, CompileError> {
        let externals: IndexSet<String> = module
            .functions
            .values()
            .flat_map(|function| function.calls())
            .filter_map(|callee| match callee {
                Callee::External(name) => Some(name.clone()),
                Callee::Function(_) => None,
            })
            .collect();

        let ptr = self.module.target_config().pointer_type();
        let mut ids = HashMap::new();
        for function in module.functions.values() {
            let mut sig = self.module.make_signature();
            sig.params.push(AbiParam::new(ptr));
            sig.params.push(AbiParam::new(ptr));
            let linkage = if function.name == signature.function {
                Linkage::Export
            } else {
                Linkage::Local
            };
            let id = self
                .module
                .declare_function(&function.name, linkage, &sig)
                .map_err(backend("declaring function"))?;
            ids.insert(function.name.clone(), id);
        }
        let entry_id = *ids
            .get(&signature.function)
            .ok_or_else(|| CompileError::UnknownFunction(signature.function.clone()))?;

        for function in module.functions.values() {
            self.define(function, &ids, &externals)?;
        }
        self.module
            .finalize_definitions()
            .map_err(backend("finalizing"))?;

        let code = self.module.get_finalized_function(entry_id);
        let entry: EntryFn = unsafe { std::mem::transmute(code) };
        info!(
            function = %signature.function,
            functions = module.functions.len(),
            externals = externals.len(),
            "jit compiled map"
        );

        Ok(JitMap {
            _module: self.module,
            entry,
            signature,
            externals: externals.into_iter().collect(),
        })
    }

    fn define(
        &mut self,
        function: &Function,
        ids: &HashMap<String, FuncId>,
        externals: &IndexSet<String>,
    ) -> Result<(), CompileError> {
        let ptr = self.module.target_config().pointer_type();
        let id = *ids
            .get(&function.name)
            .ok_or_else(|| CompileError::UnknownFunction(function.name.clone()))?;

        let mut constants = HashMap::new();
        for (index, decl) in function.arrays.iter().enumerate() {
            if let ArrayDecl::Constant(values) = decl {
                constants.insert(index, self.define_constant(values)?);
            }
        }

        self.ctx.func.signature.params.push(AbiParam::new(ptr));
        self.ctx.func.signature.params.push(AbiParam::new(ptr));
        let config = self.module.target_config();
        let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_context);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let args = builder.block_params(entry)[0];
        let host = builder.block_params(entry)[1];

        for (index, value_type) in function.values.iter().enumerate() {
            builder.declare_var(
                Variable::from_u32(index as u32),
                variable_type(*value_type, ptr),
            );
        }

        let mut lowering = Lowering {
            builder,
            module: &mut self.module,
            config,
            function,
            ids,
            externals,
            host_call: self.host_call,
            func_refs: HashMap::new(),
            arrays: Vec::with_capacity(function.arrays.len()),
            host,
            ptr,
        };
        for (index, decl) in function.arrays.iter().enumerate() {
            let array = lowering.array_base(index, decl, args, &constants)?;
            lowering.arrays.push(array);
        }
        lowering.body(&function.body)?;
        lowering.finish();

        self.module
            .define_function(id, &mut self.ctx)
            .map_err(backend("defining function"))?;
        self.module.clear_context(&mut self.ctx);
        debug!(function = %function.name, "jit defined function");
        Ok(())
    }

    fn define_constant(&mut self, values: &PortValues) -> Result<DataId, CompileError> {
        let data = self
            .module
            .declare_anonymous_data(false, false)
            .map_err(backend("declaring constant"))?;
        let mut description = DataDescription::new();
        let mut bytes = runtime::constant_bytes(values);
        if bytes.is_empty() {
            bytes.push(0);
        }
        description.define(bytes.into_boxed_slice());
        self.module
            .define_data(data, &description)
            .map_err(backend("defining constant"))?;
        Ok(data)
    }
}

#[derive(Copy, Clone)]
struct ArrayBase {
    base: ClifValue,
    element_type: ScalarType,
}

/// Per-function lowering state.
struct Lowering<'a> {
    builder: FunctionBuilder<'a>,
    module: &'a mut JITModule,
    config: TargetFrontendConfig,
    function: &'a Function,
    ids: &'a HashMap<String, FuncId>,
    externals: &'a IndexSet<String>,
    host_call: FuncId,
    func_refs: HashMap<FuncId, FuncRef>,
    arrays: Vec<ArrayBase>,
    host: ClifValue,
    ptr: Type,
}

impl Lowering<'_> {
    fn finish(mut self) {
        self.builder.ins().return_(&[]);
        self.builder.finalize();
    }

    fn array_base(
        &mut self,
        index: usize,
        decl: &ArrayDecl,
        args: ClifValue,
        constants: &HashMap<usize, DataId>,
    ) -> Result<ArrayBase, CompileError> {
        let element_type = decl
            .element_type(&self.function.params)
            .ok_or(CompileError::UnknownArray(ArrayId(index as u32)))?;
        let base = match decl {
            ArrayDecl::Param { index: param } => {
                let offset = (*param as i64 * i64::from(self.ptr.bytes())) as i32;
                self.builder
                    .ins()
                    .load(self.ptr, MemFlags::trusted(), args, offset)
            }
            ArrayDecl::Local { element_type, len } => {
                let size = (*len as i64 * element_size(*element_type)) as u32;
                let slot = self.stack_slot(size);
                let addr = self.builder.ins().stack_addr(self.ptr, slot, 0);
                if size > 0 {
                    let zero = self.builder.ins().iconst(types::I8, 0);
                    let bytes = self.builder.ins().iconst(self.ptr, i64::from(size));
                    self.builder.call_memset(self.config, addr, zero, bytes);
                }
                addr
            }
            ArrayDecl::Constant(_) => {
                let data = *constants
                    .get(&index)
                    .ok_or(CompileError::UnknownArray(ArrayId(index as u32)))?;
                let global = self.module.declare_data_in_func(data, self.builder.func);
                self.builder.ins().global_value(self.ptr, global)
            }
        };
        Ok(ArrayBase { base, element_type })
    }

    fn stack_slot(&mut self, size: u32) -> StackSlot {
        self.builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            size.max(1),
            3,
        ))
    }

    fn array(&self, array: ArrayId) -> Result<ArrayBase, CompileError> {
        self.arrays
            .get(array.index())
            .copied()
            .ok_or(CompileError::UnknownArray(array))
    }

    fn func_ref(&mut self, id: FuncId) -> FuncRef {
        if let Some(func_ref) = self.func_refs.get(&id) {
            return *func_ref;
        }
        let func_ref = self.module.declare_func_in_func(id, self.builder.func);
        self.func_refs.insert(id, func_ref);
        func_ref
    }

    /// Base address and constant byte offset of an element.
    fn address(
        &mut self,
        array: ArrayId,
        index: IndexExpr,
    ) -> Result<(ClifValue, i32), CompileError> {
        let array = self.array(array)?;
        let size = element_size(array.element_type);
        match index {
            IndexExpr::Const(i) => Ok((array.base, (i as i64 * size) as i32)),
            IndexExpr::Offset { value, offset } => {
                let i = self.builder.use_var(variable(value));
                let scaled = self.builder.ins().imul_imm(i, size);
                let addr = self.builder.ins().iadd(array.base, scaled);
                Ok((addr, (offset as i64 * size) as i32))
            }
        }
    }

    fn window(&mut self, array: ArrayId, offset: usize) -> Result<ClifValue, CompileError> {
        let base = self.array(array)?;
        let bytes = offset as i64 * element_size(base.element_type);
        Ok(self.builder.ins().iadd_imm(base.base, bytes))
    }

    fn body(&mut self, body: &[Instr]) -> Result<(), CompileError> {
        for instr in body {
            match instr {
                Instr::Assign { target, expr } => {
                    let value = self.expr(expr)?;
                    self.builder.def_var(variable(*target), value);
                }
                Instr::Store {
                    array,
                    index,
                    value,
                } => {
                    let value = self.builder.use_var(variable(*value));
                    let (addr, offset) = self.address(*array, *index)?;
                    self.builder
                        .ins()
                        .store(MemFlags::trusted(), value, addr, offset);
                }
                Instr::Loop {
                    counter,
                    start,
                    end,
                    body,
                } => self.emit_loop(variable(*counter), *start, *end, body)?,
                Instr::If {
                    condition,
                    then_body,
                } => {
                    let then_block = self.builder.create_block();
                    let merge = self.builder.create_block();
                    let condition = self.builder.use_var(variable(*condition));
                    self.builder
                        .ins()
                        .brif(condition, then_block, &[], merge, &[]);
                    self.builder.switch_to_block(then_block);
                    self.builder.seal_block(then_block);
                    self.body(then_body)?;
                    self.builder.ins().jump(merge, &[]);
                    self.builder.switch_to_block(merge);
                    self.builder.seal_block(merge);
                }
                Instr::Call { callee, args } => match callee {
                    Callee::Function(name) => self.call_function(name, args)?,
                    Callee::External(name) => self.call_external(name, args)?,
                },
            }
        }
        Ok(())
    }

    fn emit_loop(
        &mut self,
        counter: Variable,
        start: usize,
        end: usize,
        body: &[Instr],
    ) -> Result<(), CompileError> {
        let header = self.builder.create_block();
        let body_block = self.builder.create_block();
        let exit = self.builder.create_block();

        let first = self.builder.ins().iconst(self.ptr, start as i64);
        self.builder.def_var(counter, first);
        self.builder.ins().jump(header, &[]);

        self.builder.switch_to_block(header);
        let i = self.builder.use_var(counter);
        let bound = self.builder.ins().iconst(self.ptr, end as i64);
        let in_range = self.builder.ins().icmp(IntCC::SignedLessThan, i, bound);
        self.builder
            .ins()
            .brif(in_range, body_block, &[], exit, &[]);

        self.builder.switch_to_block(body_block);
        self.builder.seal_block(body_block);
        self.body(body)?;
        let i = self.builder.use_var(counter);
        let next = self.builder.ins().iadd_imm(i, 1);
        self.builder.def_var(counter, next);
        self.builder.ins().jump(header, &[]);
        self.builder.seal_block(header);

        self.builder.switch_to_block(exit);
        self.builder.seal_block(exit);
        Ok(())
    }

    fn literal(&mut self, literal: Literal) -> ClifValue {
        match literal {
            Literal::F32(v) => self.builder.ins().f32const(v),
            Literal::F64(v) => self.builder.ins().f64const(v),
            Literal::Bool(v) => self.builder.ins().iconst(types::I8, i64::from(v)),
            Literal::Index(v) => self.builder.ins().iconst(self.ptr, v as i64),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<ClifValue, CompileError> {
        Ok(match expr {
            Expr::Literal(literal) => self.literal(*literal),
            Expr::Copy(value) => self.builder.use_var(variable(*value)),
            Expr::Load { array, index } => {
                let ty = memory_type(self.array(*array)?.element_type);
                let (addr, offset) = self.address(*array, *index)?;
                self.builder
                    .ins()
                    .load(ty, MemFlags::trusted(), addr, offset)
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.builder.use_var(variable(*lhs));
                let b = self.builder.use_var(variable(*rhs));
                match op {
                    BinaryOp::Add => self.builder.ins().fadd(a, b),
                    BinaryOp::Subtract => self.builder.ins().fsub(a, b),
                    BinaryOp::Multiply => self.builder.ins().fmul(a, b),
                    BinaryOp::Divide => self.builder.ins().fdiv(a, b),
                }
            }
            Expr::Compare {
                predicate,
                lhs,
                rhs,
            } => {
                let operand_type = self
                    .function
                    .value_type(*lhs)
                    .ok_or(CompileError::UnknownValue(*lhs))?;
                let a = self.builder.use_var(variable(*lhs));
                let b = self.builder.use_var(variable(*rhs));
                match operand_type {
                    ValueType::F32 | ValueType::F64 => {
                        self.builder.ins().fcmp(float_cc(*predicate), a, b)
                    }
                    ValueType::Bool => self.builder.ins().icmp(int_cc(*predicate), a, b),
                    ValueType::Index => {
                        return Err(CompileError::TypeMismatch {
                            operation: "compare",
                            expected: ValueType::F64,
                            found: ValueType::Index,
                        })
                    }
                }
            }
        })
    }

    fn call_function(&mut self, name: &str, args: &[Arg]) -> Result<(), CompileError> {
        let id = *self
            .ids
            .get(name)
            .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?;
        let callee = self.func_ref(id);
        let ptr_bytes = self.ptr.bytes();
        let slot = self.stack_slot(args.len() as u32 * ptr_bytes);
        for (i, arg) in args.iter().enumerate() {
            let Arg::Array { array, offset, .. } = *arg else {
                return Err(CompileError::Backend(format!(
                    "scalar argument {i} passed to `{name}`"
                )));
            };
            let addr = self.window(array, offset)?;
            self.builder
                .ins()
                .stack_store(addr, slot, (i as u32 * ptr_bytes) as i32);
        }
        let table = self.builder.ins().stack_addr(self.ptr, slot, 0);
        self.builder.ins().call(callee, &[table, self.host]);
        Ok(())
    }

    fn call_external(&mut self, name: &str, args: &[Arg]) -> Result<(), CompileError> {
        let external = self
            .externals
            .get_index_of(name)
            .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?;
        let slot = self.stack_slot(args.len() as u32 * HOST_ARG_SIZE);
        for (i, arg) in args.iter().enumerate() {
            let (addr, len, code) = match *arg {
                Arg::Array { array, offset, len } => {
                    let element_type = self.array(array)?.element_type;
                    (
                        self.window(array, offset)?,
                        len,
                        runtime::type_code(element_type),
                    )
                }
                Arg::Value(value) => {
                    let scalar_type = self
                        .function
                        .value_type(value)
                        .and_then(ValueType::scalar_type)
                        .ok_or(CompileError::UnknownValue(value))?;
                    let spill = self.stack_slot(8);
                    let v = self.builder.use_var(variable(value));
                    self.builder.ins().stack_store(v, spill, 0);
                    (
                        self.builder.ins().stack_addr(self.ptr, spill, 0),
                        1,
                        runtime::type_code(scalar_type) | SCALAR_BIT,
                    )
                }
            };
            let base = (i as u32 * HOST_ARG_SIZE) as i32;
            let len = self.builder.ins().iconst(types::I64, len as i64);
            let code = self.builder.ins().iconst(types::I64, code as i64);
            self.builder.ins().stack_store(addr, slot, base);
            self.builder.ins().stack_store(len, slot, base + 8);
            self.builder.ins().stack_store(code, slot, base + 16);
        }
        let table = self.builder.ins().stack_addr(self.ptr, slot, 0);
        let external = self.builder.ins().iconst(types::I64, external as i64);
        let count = self.builder.ins().iconst(types::I64, args.len() as i64);
        let trampoline = self.func_ref(self.host_call);
        self.builder
            .ins()
            .call(trampoline, &[self.host, external, table, count]);
        Ok(())
    }
}

/// A natively compiled map. Owns the code it points into.
pub struct JitMap {
    _module: JITModule,
    entry: EntryFn,
    signature: MapSignature,
    externals: Vec<String>,
}

impl JitMap {
    pub fn new(module: &ir::Module, signature: MapSignature) -> Result<Self, CompileError> {
        CraneliftJit::new()?.compile(module, signature)
    }

    pub fn signature(&self) -> &MapSignature {
        &self.signature
    }

    /// External functions the map may call, in table order.
    pub fn externals(&self) -> &[String] {
        &self.externals
    }

    /// Runs the native code. Same contract as [`CompiledMap::compute`].
    ///
    /// [`CompiledMap::compute`]: crate::compiler::CompiledMap::compute
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
        for (index, ((_, param), values)) in self.signature.inputs.iter().zip(inputs).enumerate() {
            if values.len() != param.len || values.scalar_type() != param.element_type {
                return Err(RuntimeError::ArgumentType {
                    function: self.signature.function.clone(),
                    index,
                });
            }
        }

        let mut buffers = inputs.to_vec();
        buffers.extend(
            self.signature
                .outputs
                .iter()
                .map(|param| PortValues::zeros(param.element_type, param.len)),
        );
        let pointers: Vec<*mut u8> = buffers.iter_mut().map(runtime::buffer_ptr).collect();
        let mut context = HostContext::new(host, &self.externals);
        // Buffers match the signature checked above and outlive the call.
        unsafe { (self.entry)(pointers.as_ptr(), &mut context) };
        if let Some(error) = context.take_error() {
            return Err(error);
        }
        Ok(buffers.split_off(inputs.len()))
    }
}
