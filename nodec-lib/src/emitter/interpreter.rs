//! Reference executor for IR modules.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::trace;

use crate::model::{PortValues, Scalar};

use super::ir::{Arg, ArrayDecl, Expr, Function, IndexExpr, Instr, Module};
use super::{Callee, Literal};

const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("no host function named `{0}`")]
    UnknownHostFunction(String),

    #[error("`{function}` takes {expected} arguments, {found} given")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("argument {index} of `{function}` does not match its parameter")]
    ArgumentType { function: String, index: usize },

    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("value %{0} read before assignment")]
    UndefinedValue(u32),

    #[error("array @{0} is not declared")]
    UnknownArray(u32),

    #[error("operand types do not match for {0}")]
    TypeMismatch(&'static str),

    #[error("call depth exceeded {MAX_CALL_DEPTH}")]
    CallDepth,

    #[error("host function `{0}` panicked")]
    HostPanic(String),
}

/// Argument passed to a host function.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Scalar(Scalar),
    Array(PortValues),
}

type HostFn = Box<dyn FnMut(&[HostValue]) + Send>;

/// Named external functions reachable from compiled code.
#[derive(Default)]
pub struct HostFunctions {
    functions: IndexMap<String, HostFn>,
}

impl fmt::Debug for HostFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

impl HostFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: impl FnMut(&[HostValue]) + Send + 'static,
    ) -> &mut Self {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.functions.get_index_of(name)
    }

    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<(), RuntimeError> {
        let function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownHostFunction(name.to_string()))?;
        function(args);
        Ok(())
    }

    pub(crate) fn call_index(&mut self, index: usize, args: &[HostValue]) -> bool {
        match self.functions.get_index_mut(index) {
            Some((_, function)) => {
                function(args);
                true
            }
            None => false,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct View {
    slot: usize,
    offset: usize,
    len: usize,
}

struct Frame {
    arrays: Vec<View>,
    registers: Vec<Option<Literal>>,
}

/// Executes functions of a [`Module`] over heap-allocated arrays.
pub struct Interpreter<'m> {
    module: &'m Module,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// Runs `function` with one buffer per parameter and returns the buffers
    /// after the call.
    pub fn run(
        &self,
        function: &str,
        args: Vec<PortValues>,
        host: &mut HostFunctions,
    ) -> Result<Vec<PortValues>, RuntimeError> {
        let views = args
            .iter()
            .enumerate()
            .map(|(slot, values)| View {
                slot,
                offset: 0,
                len: values.len(),
            })
            .collect();
        let mut heap = args;
        let count = heap.len();
        self.call(function, views, &mut heap, host, 0)?;
        heap.truncate(count);
        Ok(heap)
    }

    fn call(
        &self,
        name: &str,
        args: Vec<View>,
        heap: &mut Vec<PortValues>,
        host: &mut HostFunctions,
        depth: usize,
    ) -> Result<(), RuntimeError> {
        if depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::CallDepth);
        }
        let function = self
            .module
            .function(name)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
        if function.params.len() != args.len() {
            return Err(RuntimeError::ArgumentCount {
                function: name.to_string(),
                expected: function.params.len(),
                found: args.len(),
            });
        }
        for (index, (param, view)) in function.params.iter().zip(&args).enumerate() {
            if param.len != view.len || heap[view.slot].scalar_type() != param.element_type {
                return Err(RuntimeError::ArgumentType {
                    function: name.to_string(),
                    index,
                });
            }
        }
        trace!(function = name, depth, "call");

        let base = heap.len();
        let mut arrays = args;
        for decl in &function.arrays[function.params.len()..] {
            let values = match decl {
                ArrayDecl::Local { element_type, len } => PortValues::zeros(*element_type, *len),
                ArrayDecl::Constant(values) => values.clone(),
                ArrayDecl::Param { index } => return Err(RuntimeError::UnknownArray(*index as u32)),
            };
            arrays.push(View {
                slot: heap.len(),
                offset: 0,
                len: values.len(),
            });
            heap.push(values);
        }

        let mut frame = Frame {
            arrays,
            registers: vec![None; function.values.len()],
        };
        let result = self.exec(&function.body, &mut frame, heap, host, depth);
        heap.truncate(base);
        result
    }

    fn exec(
        &self,
        body: &[Instr],
        frame: &mut Frame,
        heap: &mut Vec<PortValues>,
        host: &mut HostFunctions,
        depth: usize,
    ) -> Result<(), RuntimeError> {
        for instr in body {
            match instr {
                Instr::Assign { target, expr } => {
                    let value = self.eval(expr, frame, heap)?;
                    frame.registers[target.index()] = Some(value);
                }
                Instr::Store {
                    array,
                    index,
                    value,
                } => {
                    let (slot, element) = locate(frame, array.0, *index)?;
                    let scalar = to_scalar(register(frame, value.0)?)?;
                    if !heap[slot].set(element, scalar) {
                        return Err(RuntimeError::TypeMismatch("store"));
                    }
                }
                Instr::Loop {
                    counter,
                    start,
                    end,
                    body,
                } => {
                    for i in *start..*end {
                        frame.registers[counter.index()] = Some(Literal::Index(i));
                        self.exec(body, frame, heap, host, depth)?;
                    }
                }
                Instr::If {
                    condition,
                    then_body,
                } => match register(frame, condition.0)? {
                    Literal::Bool(true) => self.exec(then_body, frame, heap, host, depth)?,
                    Literal::Bool(false) => {}
                    _ => return Err(RuntimeError::TypeMismatch("branch")),
                },
                Instr::Call { callee, args } => match callee {
                    Callee::Function(name) => {
                        let mut views = Vec::with_capacity(args.len());
                        for (index, arg) in args.iter().enumerate() {
                            match *arg {
                                Arg::Array { array, offset, len } => {
                                    views.push(sub_view(frame, array.0, offset, len)?)
                                }
                                Arg::Value(_) => {
                                    return Err(RuntimeError::ArgumentType {
                                        function: name.clone(),
                                        index,
                                    })
                                }
                            }
                        }
                        self.call(name, views, heap, host, depth + 1)?;
                    }
                    Callee::External(name) => {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(match *arg {
                                Arg::Array { array, offset, len } => {
                                    let view = sub_view(frame, array.0, offset, len)?;
                                    let slice = heap[view.slot]
                                        .slice(view.offset..view.offset + view.len)
                                        .ok_or(RuntimeError::IndexOutOfBounds {
                                            index: view.offset + view.len,
                                            len: heap[view.slot].len(),
                                        })?;
                                    HostValue::Array(slice)
                                }
                                Arg::Value(value) => {
                                    HostValue::Scalar(to_scalar(register(frame, value.0)?)?)
                                }
                            });
                        }
                        host.call(name, &values)?;
                    }
                },
            }
        }
        Ok(())
    }

    fn eval(
        &self,
        expr: &Expr,
        frame: &Frame,
        heap: &[PortValues],
    ) -> Result<Literal, RuntimeError> {
        Ok(match expr {
            Expr::Literal(literal) => *literal,
            Expr::Copy(value) => register(frame, value.0)?,
            Expr::Load { array, index } => {
                let (slot, element) = locate(frame, array.0, *index)?;
                let scalar = heap[slot].get(element).ok_or(RuntimeError::IndexOutOfBounds {
                    index: element,
                    len: heap[slot].len(),
                })?;
                from_scalar(scalar)
            }
            Expr::Binary { op, lhs, rhs } => {
                match (register(frame, lhs.0)?, register(frame, rhs.0)?) {
                    (Literal::F32(a), Literal::F32(b)) => Literal::F32(op.apply(a, b)),
                    (Literal::F64(a), Literal::F64(b)) => Literal::F64(op.apply(a, b)),
                    _ => return Err(RuntimeError::TypeMismatch(op.name())),
                }
            }
            Expr::Compare {
                predicate,
                lhs,
                rhs,
            } => match (register(frame, lhs.0)?, register(frame, rhs.0)?) {
                (Literal::F32(a), Literal::F32(b)) => Literal::Bool(predicate.apply(a, b)),
                (Literal::F64(a), Literal::F64(b)) => Literal::Bool(predicate.apply(a, b)),
                (Literal::Bool(a), Literal::Bool(b)) => Literal::Bool(predicate.apply(a, b)),
                _ => return Err(RuntimeError::TypeMismatch(predicate.name())),
            },
        })
    }
}

fn register(frame: &Frame, value: u32) -> Result<Literal, RuntimeError> {
    frame
        .registers
        .get(value as usize)
        .copied()
        .flatten()
        .ok_or(RuntimeError::UndefinedValue(value))
}

fn view(frame: &Frame, array: u32) -> Result<View, RuntimeError> {
    frame
        .arrays
        .get(array as usize)
        .copied()
        .ok_or(RuntimeError::UnknownArray(array))
}

fn sub_view(frame: &Frame, array: u32, offset: usize, len: usize) -> Result<View, RuntimeError> {
    let parent = view(frame, array)?;
    if offset + len > parent.len {
        return Err(RuntimeError::IndexOutOfBounds {
            index: offset + len,
            len: parent.len,
        });
    }
    Ok(View {
        slot: parent.slot,
        offset: parent.offset + offset,
        len,
    })
}

/// Heap slot and absolute element for an indexed access.
fn locate(frame: &Frame, array: u32, index: IndexExpr) -> Result<(usize, usize), RuntimeError> {
    let view = view(frame, array)?;
    let element = match index {
        IndexExpr::Const(i) => i,
        IndexExpr::Offset { value, offset } => match register(frame, value.0)? {
            Literal::Index(i) => i + offset,
            _ => return Err(RuntimeError::TypeMismatch("index")),
        },
    };
    if element >= view.len {
        return Err(RuntimeError::IndexOutOfBounds {
            index: element,
            len: view.len,
        });
    }
    Ok((view.slot, view.offset + element))
}

fn to_scalar(literal: Literal) -> Result<Scalar, RuntimeError> {
    match literal {
        Literal::F32(v) => Ok(Scalar::F32(v)),
        Literal::F64(v) => Ok(Scalar::F64(v)),
        Literal::Bool(v) => Ok(Scalar::Bool(v)),
        Literal::Index(_) => Err(RuntimeError::TypeMismatch("scalar conversion")),
    }
}

fn from_scalar(scalar: Scalar) -> Literal {
    match scalar {
        Scalar::F32(v) => Literal::F32(v),
        Scalar::F64(v) => Literal::F64(v),
        Scalar::Bool(v) => Literal::Bool(v),
    }
}

/// Zeroed buffers matching a function's parameters.
pub fn zeroed_args(function: &Function) -> Vec<PortValues> {
    function
        .params
        .iter()
        .map(|param| PortValues::zeros(param.element_type, param.len))
        .collect()
}
