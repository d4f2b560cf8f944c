//! Code-emitter interface used by the compiler, plus the in-crate IR backend.
//!
//! Nodes never see a concrete backend: they receive a [`FunctionEmitter`] and
//! describe their computation through it.

mod builder;
pub mod interpreter;
pub mod ir;
#[cfg(feature = "jit")]
pub mod jit;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compiler::CompileError;
use crate::model::{NodeError, PortValues, ScalarType};

pub use builder::{IrFunctionEmitter, IrModuleEmitter};
pub use interpreter::{HostFunctions, HostValue, Interpreter, RuntimeError};

/// Handle to a scalar variable of the function being emitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Value(pub(crate) u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    F32,
    F64,
    Bool,
    /// Loop counters and offsets.
    Index,
}

impl From<ScalarType> for ValueType {
    fn from(scalar_type: ScalarType) -> Self {
        match scalar_type {
            ScalarType::F32 => ValueType::F32,
            ScalarType::F64 => ValueType::F64,
            ScalarType::Bool => ValueType::Bool,
        }
    }
}

impl ValueType {
    pub fn scalar_type(self) -> Option<ScalarType> {
        match self {
            ValueType::F32 => Some(ScalarType::F32),
            ValueType::F64 => Some(ScalarType::F64),
            ValueType::Bool => Some(ScalarType::Bool),
            ValueType::Index => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Literal {
    F32(f32),
    F64(f64),
    Bool(bool),
    Index(usize),
}

impl Literal {
    pub fn value_type(self) -> ValueType {
        match self {
            Literal::F32(_) => ValueType::F32,
            Literal::F64(_) => ValueType::F64,
            Literal::Bool(_) => ValueType::Bool,
            Literal::Index(_) => ValueType::Index,
        }
    }

    pub fn zero(value_type: ValueType) -> Self {
        match value_type {
            ValueType::F32 => Literal::F32(0.0),
            ValueType::F64 => Literal::F64(0.0),
            ValueType::Bool => Literal::Bool(false),
            ValueType::Index => Literal::Index(0),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::F32(v) => write!(f, "{v:?}f32"),
            Literal::F64(v) => write!(f, "{v:?}"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Index(v) => write!(f, "{v}i"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayId(pub(crate) u32);

impl ArrayId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A window into an array of the function being emitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayRef {
    pub id: ArrayId,
    pub element_type: ScalarType,
    pub offset: usize,
    pub len: usize,
}

impl ArrayRef {
    /// Sub-window `start..start + len`, or `None` when it does not fit.
    pub fn slice(self, start: usize, len: usize) -> Option<ArrayRef> {
        (start + len <= self.len).then_some(ArrayRef {
            offset: self.offset + start,
            len,
            ..self
        })
    }
}

/// Element index relative to an [`ArrayRef`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Index {
    Const(usize),
    Value(Value),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
        }
    }

    pub fn apply<T: num_traits::Float>(self, lhs: T, rhs: T) -> T {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Subtract => lhs - rhs,
            BinaryOp::Multiply => lhs * rhs,
            BinaryOp::Divide => lhs / rhs,
        }
    }
}

impl FromStr for BinaryOp {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(BinaryOp::Add),
            "subtract" => Ok(BinaryOp::Subtract),
            "multiply" => Ok(BinaryOp::Multiply),
            "divide" => Ok(BinaryOp::Divide),
            _ => Err(NodeError::UnknownVariant {
                kind: "operation",
                name: s.to_string(),
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparePredicate {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl ComparePredicate {
    pub fn name(self) -> &'static str {
        match self {
            ComparePredicate::Equal => "equal",
            ComparePredicate::NotEqual => "not_equal",
            ComparePredicate::Less => "less",
            ComparePredicate::LessOrEqual => "less_or_equal",
            ComparePredicate::Greater => "greater",
            ComparePredicate::GreaterOrEqual => "greater_or_equal",
        }
    }

    pub fn apply<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            ComparePredicate::Equal => lhs == rhs,
            ComparePredicate::NotEqual => lhs != rhs,
            ComparePredicate::Less => lhs < rhs,
            ComparePredicate::LessOrEqual => lhs <= rhs,
            ComparePredicate::Greater => lhs > rhs,
            ComparePredicate::GreaterOrEqual => lhs >= rhs,
        }
    }
}

impl FromStr for ComparePredicate {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equal" => Ok(ComparePredicate::Equal),
            "not_equal" => Ok(ComparePredicate::NotEqual),
            "less" => Ok(ComparePredicate::Less),
            "less_or_equal" => Ok(ComparePredicate::LessOrEqual),
            "greater" => Ok(ComparePredicate::Greater),
            "greater_or_equal" => Ok(ComparePredicate::GreaterOrEqual),
            _ => Err(NodeError::UnknownVariant {
                kind: "predicate",
                name: s.to_string(),
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Value(Value),
    Array(ArrayRef),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A function defined in the same module.
    Function(String),
    /// A host function supplied at run time.
    External(String),
}

/// An array parameter of an emitted function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub element_type: ScalarType,
    pub len: usize,
}

pub type LoopBody<'a> =
    dyn FnMut(&mut dyn FunctionEmitter, Value) -> Result<(), CompileError> + 'a;
pub type BranchBody<'a> = dyn FnMut(&mut dyn FunctionEmitter) -> Result<(), CompileError> + 'a;

/// Builds the body of one function.
pub trait FunctionEmitter {
    fn name(&self) -> &str;

    /// The `index`th array parameter.
    fn parameter(&self, index: usize) -> Option<ArrayRef>;

    /// An immutable scalar.
    fn literal(&mut self, value: Literal) -> Value;

    /// A mutable scalar local, initialized to `init`.
    fn declare_local(&mut self, init: Literal) -> Value;

    fn assign(&mut self, target: Value, source: Value) -> Result<(), CompileError>;

    fn declare_array(&mut self, element_type: ScalarType, len: usize) -> ArrayRef;

    fn declare_constant_array(&mut self, values: &PortValues) -> ArrayRef;

    fn load(&mut self, array: ArrayRef, index: Index) -> Result<Value, CompileError>;

    fn store(&mut self, array: ArrayRef, index: Index, value: Value) -> Result<(), CompileError>;

    fn binary_op(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, CompileError>;

    fn compare(
        &mut self,
        predicate: ComparePredicate,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, CompileError>;

    /// Emits `for i in start..end { body(i) }`.
    fn emit_loop(
        &mut self,
        start: usize,
        end: usize,
        body: &mut LoopBody<'_>,
    ) -> Result<(), CompileError>;

    /// Emits `if condition { then_body }`.
    fn emit_branch(
        &mut self,
        condition: Value,
        then_body: &mut BranchBody<'_>,
    ) -> Result<(), CompileError>;

    fn call(&mut self, callee: Callee, args: &[Operand]) -> Result<(), CompileError>;
}

/// Collects functions into a module.
pub trait ModuleEmitter {
    type Function: FunctionEmitter;

    fn declare_function(&mut self, name: &str, params: Vec<Param>) -> Result<Self::Function, CompileError>;

    fn define_function(&mut self, function: Self::Function) -> Result<(), CompileError>;
}
