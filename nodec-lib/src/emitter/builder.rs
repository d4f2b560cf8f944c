use crate::compiler::CompileError;
use crate::model::{PortValues, ScalarType};

use super::ir::{Arg, ArrayDecl, Expr, Function, IndexExpr, Instr, Module};
use super::{
    ArrayId, ArrayRef, BinaryOp, BranchBody, Callee, ComparePredicate, FunctionEmitter, Index,
    Literal, LoopBody, ModuleEmitter, Operand, Param, Value, ValueType,
};

/// [`FunctionEmitter`] that records IR.
#[derive(Debug)]
pub struct IrFunctionEmitter {
    name: String,
    params: Vec<Param>,
    values: Vec<ValueType>,
    arrays: Vec<ArrayDecl>,
    /// Innermost block last; the first entry is the function body.
    blocks: Vec<Vec<Instr>>,
}

impl IrFunctionEmitter {
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        let arrays = (0..params.len())
            .map(|index| ArrayDecl::Param { index })
            .collect();
        Self {
            name: name.into(),
            params,
            values: Vec::new(),
            arrays,
            blocks: vec![Vec::new()],
        }
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn finish(mut self) -> Function {
        let body = self.blocks.drain(..).next().unwrap_or_default();
        Function {
            name: self.name,
            params: self.params,
            values: self.values,
            arrays: self.arrays,
            body,
        }
    }

    fn push(&mut self, instr: Instr) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(instr);
        }
    }

    fn new_value(&mut self, value_type: ValueType) -> Value {
        let value = Value(self.values.len() as u32);
        self.values.push(value_type);
        value
    }

    fn value_type(&self, value: Value) -> Result<ValueType, CompileError> {
        self.values
            .get(value.index())
            .copied()
            .ok_or(CompileError::UnknownValue(value))
    }

    fn check_array(&self, array: ArrayRef) -> Result<(), CompileError> {
        let decl = self
            .arrays
            .get(array.id.index())
            .ok_or(CompileError::UnknownArray(array.id))?;
        let len = decl.len(&self.params);
        if array.offset + array.len > len {
            return Err(CompileError::IndexOutOfBounds {
                index: array.offset + array.len,
                len,
            });
        }
        if decl.element_type(&self.params) != Some(array.element_type) {
            return Err(CompileError::TypeMismatch {
                operation: "array access",
                expected: array.element_type.into(),
                found: decl
                    .element_type(&self.params)
                    .map_or(ValueType::Index, ValueType::from),
            });
        }
        Ok(())
    }

    fn index_expr(&self, array: ArrayRef, index: Index) -> Result<IndexExpr, CompileError> {
        match index {
            Index::Const(i) if i < array.len => Ok(IndexExpr::Const(array.offset + i)),
            Index::Const(i) => Err(CompileError::IndexOutOfBounds {
                index: i,
                len: array.len,
            }),
            Index::Value(value) => {
                self.expect_type("index", value, ValueType::Index)?;
                Ok(IndexExpr::Offset {
                    value,
                    offset: array.offset,
                })
            }
        }
    }

    fn expect_type(
        &self,
        operation: &'static str,
        value: Value,
        expected: ValueType,
    ) -> Result<(), CompileError> {
        let found = self.value_type(value)?;
        if found != expected {
            return Err(CompileError::TypeMismatch {
                operation,
                expected,
                found,
            });
        }
        Ok(())
    }
}

impl FunctionEmitter for IrFunctionEmitter {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter(&self, index: usize) -> Option<ArrayRef> {
        self.params.get(index).map(|param| ArrayRef {
            id: ArrayId(index as u32),
            element_type: param.element_type,
            offset: 0,
            len: param.len,
        })
    }

    fn literal(&mut self, value: Literal) -> Value {
        let target = self.new_value(value.value_type());
        self.push(Instr::Assign {
            target,
            expr: Expr::Literal(value),
        });
        target
    }

    fn declare_local(&mut self, init: Literal) -> Value {
        self.literal(init)
    }

    fn assign(&mut self, target: Value, source: Value) -> Result<(), CompileError> {
        let expected = self.value_type(target)?;
        self.expect_type("assign", source, expected)?;
        self.push(Instr::Assign {
            target,
            expr: Expr::Copy(source),
        });
        Ok(())
    }

    fn declare_array(&mut self, element_type: ScalarType, len: usize) -> ArrayRef {
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayDecl::Local { element_type, len });
        ArrayRef {
            id,
            element_type,
            offset: 0,
            len,
        }
    }

    fn declare_constant_array(&mut self, values: &PortValues) -> ArrayRef {
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayDecl::Constant(values.clone()));
        ArrayRef {
            id,
            element_type: values.scalar_type(),
            offset: 0,
            len: values.len(),
        }
    }

    fn load(&mut self, array: ArrayRef, index: Index) -> Result<Value, CompileError> {
        self.check_array(array)?;
        let index = self.index_expr(array, index)?;
        let target = self.new_value(array.element_type.into());
        self.push(Instr::Assign {
            target,
            expr: Expr::Load {
                array: array.id,
                index,
            },
        });
        Ok(target)
    }

    fn store(&mut self, array: ArrayRef, index: Index, value: Value) -> Result<(), CompileError> {
        self.check_array(array)?;
        if matches!(self.arrays.get(array.id.index()), Some(ArrayDecl::Constant(_))) {
            return Err(CompileError::InvalidOutput(format!(
                "store into constant array @{}",
                array.id.0
            )));
        }
        self.expect_type("store", value, array.element_type.into())?;
        let index = self.index_expr(array, index)?;
        self.push(Instr::Store {
            array: array.id,
            index,
            value,
        });
        Ok(())
    }

    fn binary_op(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, CompileError> {
        let value_type = self.value_type(lhs)?;
        if !matches!(value_type, ValueType::F32 | ValueType::F64) {
            return Err(CompileError::TypeMismatch {
                operation: op.name(),
                expected: ValueType::F64,
                found: value_type,
            });
        }
        self.expect_type(op.name(), rhs, value_type)?;
        let target = self.new_value(value_type);
        self.push(Instr::Assign {
            target,
            expr: Expr::Binary { op, lhs, rhs },
        });
        Ok(target)
    }

    fn compare(
        &mut self,
        predicate: ComparePredicate,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, CompileError> {
        let value_type = self.value_type(lhs)?;
        if value_type == ValueType::Index {
            return Err(CompileError::TypeMismatch {
                operation: predicate.name(),
                expected: ValueType::F64,
                found: value_type,
            });
        }
        self.expect_type(predicate.name(), rhs, value_type)?;
        let target = self.new_value(ValueType::Bool);
        self.push(Instr::Assign {
            target,
            expr: Expr::Compare {
                predicate,
                lhs,
                rhs,
            },
        });
        Ok(target)
    }

    fn emit_loop(
        &mut self,
        start: usize,
        end: usize,
        body: &mut LoopBody<'_>,
    ) -> Result<(), CompileError> {
        let counter = self.new_value(ValueType::Index);
        self.blocks.push(Vec::new());
        let result = body(self, counter);
        let block = self.blocks.pop().unwrap_or_default();
        result?;
        self.push(Instr::Loop {
            counter,
            start,
            end,
            body: block,
        });
        Ok(())
    }

    fn emit_branch(
        &mut self,
        condition: Value,
        then_body: &mut BranchBody<'_>,
    ) -> Result<(), CompileError> {
        self.expect_type("branch", condition, ValueType::Bool)?;
        self.blocks.push(Vec::new());
        let result = then_body(self);
        let block = self.blocks.pop().unwrap_or_default();
        result?;
        self.push(Instr::If {
            condition,
            then_body: block,
        });
        Ok(())
    }

    fn call(&mut self, callee: Callee, args: &[Operand]) -> Result<(), CompileError> {
        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            lowered.push(match *arg {
                Operand::Value(value) => {
                    self.value_type(value)?;
                    Arg::Value(value)
                }
                Operand::Array(array) => {
                    self.check_array(array)?;
                    Arg::Array {
                        array: array.id,
                        offset: array.offset,
                        len: array.len,
                    }
                }
            });
        }
        self.push(Instr::Call {
            callee,
            args: lowered,
        });
        Ok(())
    }
}

/// [`ModuleEmitter`] that collects IR functions into a [`Module`].
#[derive(Debug, Default)]
pub struct IrModuleEmitter {
    module: Module,
}

impl IrModuleEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

impl ModuleEmitter for IrModuleEmitter {
    type Function = IrFunctionEmitter;

    fn declare_function(
        &mut self,
        name: &str,
        params: Vec<Param>,
    ) -> Result<IrFunctionEmitter, CompileError> {
        if self.module.functions.contains_key(name) {
            return Err(CompileError::DuplicateFunction(name.to_string()));
        }
        Ok(IrFunctionEmitter::new(name, params))
    }

    fn define_function(&mut self, function: IrFunctionEmitter) -> Result<(), CompileError> {
        let function = function.finish();
        if self.module.functions.contains_key(&function.name) {
            return Err(CompileError::DuplicateFunction(function.name));
        }
        self.module.functions.insert(function.name.clone(), function);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<Param> {
        vec![Param {
            name: "x".into(),
            element_type: ScalarType::F64,
            len: 4,
        }]
    }

    #[test]
    fn loop_bodies_nest_under_the_loop() {
        let mut f = IrFunctionEmitter::new("f", params());
        let x = f.parameter(0).unwrap();
        f.emit_loop(0, 4, &mut |f, i| {
            let v = f.load(x, Index::Value(i))?;
            let w = f.binary_op(BinaryOp::Add, v, v)?;
            f.store(x, Index::Value(i), w)
        })
        .unwrap();
        let function = f.finish();
        assert_eq!(function.body.len(), 1);
        match &function.body[0] {
            Instr::Loop { body, start, end, .. } => {
                assert_eq!((*start, *end), (0, 4));
                assert_eq!(body.len(), 3);
            }
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn constant_index_is_bounds_checked() {
        let mut f = IrFunctionEmitter::new("f", params());
        let window = f.parameter(0).unwrap().slice(1, 2).unwrap();
        assert!(f.load(window, Index::Const(1)).is_ok());
        assert!(matches!(
            f.load(window, Index::Const(2)),
            Err(CompileError::IndexOutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn failed_loop_body_leaves_blocks_balanced() {
        let mut f = IrFunctionEmitter::new("f", params());
        let flag = f.literal(Literal::Bool(true));
        let result = f.emit_loop(0, 2, &mut |f, _| {
            let v = f.literal(Literal::F64(1.0));
            f.binary_op(BinaryOp::Add, v, flag).map(|_| ())
        });
        assert!(matches!(result, Err(CompileError::TypeMismatch { .. })));
        f.literal(Literal::F64(2.0));
        assert_eq!(f.finish().body.len(), 2);
    }

    #[test]
    fn duplicate_function_names_are_rejected() {
        let mut module = IrModuleEmitter::new();
        let f = module.declare_function("f", Vec::new()).unwrap();
        module.define_function(f).unwrap();
        assert!(matches!(
            module.declare_function("f", Vec::new()),
            Err(CompileError::DuplicateFunction(_))
        ));
    }
}
