//! Tree-shaped intermediate representation produced by [`IrModuleEmitter`].
//!
//! Every scalar lives in a numbered variable and every array in a numbered
//! slot; the first slots of a function are its parameters.
//!
//! [`IrModuleEmitter`]: super::IrModuleEmitter

use std::fmt;

use indexmap::IndexMap;

use crate::model::{PortValues, ScalarType};

use super::{ArrayId, BinaryOp, Callee, ComparePredicate, Literal, Param, Value, ValueType};

/// A compiled module: functions in definition order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: IndexMap<String, Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// Types of all scalar variables, indexed by [`Value`].
    pub values: Vec<ValueType>,
    /// All array slots, indexed by [`ArrayId`].
    pub arrays: Vec<ArrayDecl>,
    pub body: Vec<Instr>,
}

impl Function {
    pub fn value_type(&self, value: Value) -> Option<ValueType> {
        self.values.get(value.index()).copied()
    }

    pub fn array(&self, id: ArrayId) -> Option<&ArrayDecl> {
        self.arrays.get(id.index())
    }

    /// Visits every instruction, nested bodies included.
    pub fn walk(&self, visit: &mut impl FnMut(&Instr)) {
        fn walk_body(body: &[Instr], visit: &mut impl FnMut(&Instr)) {
            for instr in body {
                visit(instr);
                match instr {
                    Instr::Loop { body, .. } => walk_body(body, visit),
                    Instr::If { then_body, .. } => walk_body(then_body, visit),
                    _ => {}
                }
            }
        }
        walk_body(&self.body, visit);
    }

    pub fn count_loops(&self) -> usize {
        let mut loops = 0;
        self.walk(&mut |instr| {
            if matches!(instr, Instr::Loop { .. }) {
                loops += 1;
            }
        });
        loops
    }

    pub fn calls(&self) -> Vec<&Callee> {
        let mut calls = Vec::new();
        fn collect<'a>(body: &'a [Instr], calls: &mut Vec<&'a Callee>) {
            for instr in body {
                match instr {
                    Instr::Call { callee, .. } => calls.push(callee),
                    Instr::Loop { body, .. } => collect(body, calls),
                    Instr::If { then_body, .. } => collect(then_body, calls),
                    _ => {}
                }
            }
        }
        collect(&self.body, &mut calls);
        calls
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayDecl {
    Param { index: usize },
    Local { element_type: ScalarType, len: usize },
    Constant(PortValues),
}

impl ArrayDecl {
    pub fn len(&self, params: &[Param]) -> usize {
        match self {
            ArrayDecl::Param { index } => params.get(*index).map_or(0, |p| p.len),
            ArrayDecl::Local { len, .. } => *len,
            ArrayDecl::Constant(values) => values.len(),
        }
    }

    pub fn element_type(&self, params: &[Param]) -> Option<ScalarType> {
        match self {
            ArrayDecl::Param { index } => params.get(*index).map(|p| p.element_type),
            ArrayDecl::Local { element_type, .. } => Some(*element_type),
            ArrayDecl::Constant(values) => Some(values.scalar_type()),
        }
    }
}

/// Absolute element index into an array slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexExpr {
    Const(usize),
    /// `value + offset`, where `value` is an index variable.
    Offset { value: Value, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Value(Value),
    Array { array: ArrayId, offset: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Copy(Value),
    Load { array: ArrayId, index: IndexExpr },
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    Compare { predicate: ComparePredicate, lhs: Value, rhs: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Assign { target: Value, expr: Expr },
    Store { array: ArrayId, index: IndexExpr, value: Value },
    Loop { counter: Value, start: usize, end: usize, body: Vec<Instr> },
    If { condition: Value, then_body: Vec<Instr> },
    Call { callee: Callee, args: Vec<Arg> },
}

impl fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexExpr::Const(i) => write!(f, "{i}"),
            IndexExpr::Offset { value, offset: 0 } => write!(f, "{value}"),
            IndexExpr::Offset { value, offset } => write!(f, "{value} + {offset}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => write!(f, "{literal}"),
            Expr::Copy(value) => write!(f, "{value}"),
            Expr::Load { array, index } => write!(f, "@{}[{index}]", array.0),
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {lhs}, {rhs}", op.name()),
            Expr::Compare { predicate, lhs, rhs } => {
                write!(f, "cmp.{} {lhs}, {rhs}", predicate.name())
            }
        }
    }
}

fn fmt_body(f: &mut fmt::Formatter<'_>, body: &[Instr], depth: usize) -> fmt::Result {
    let pad = "    ".repeat(depth);
    for instr in body {
        match instr {
            Instr::Assign { target, expr } => writeln!(f, "{pad}{target} = {expr}")?,
            Instr::Store { array, index, value } => {
                writeln!(f, "{pad}@{}[{index}] = {value}", array.0)?
            }
            Instr::Loop { counter, start, end, body } => {
                writeln!(f, "{pad}for {counter} in {start}..{end} {{")?;
                fmt_body(f, body, depth + 1)?;
                writeln!(f, "{pad}}}")?;
            }
            Instr::If { condition, then_body } => {
                writeln!(f, "{pad}if {condition} {{")?;
                fmt_body(f, then_body, depth + 1)?;
                writeln!(f, "{pad}}}")?;
            }
            Instr::Call { callee, args } => {
                let name = match callee {
                    Callee::Function(name) => name.clone(),
                    Callee::External(name) => format!("extern {name}"),
                };
                let args: Vec<String> = args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Value(value) => value.to_string(),
                        Arg::Array { array, offset, len } => {
                            format!("@{}[{}..{}]", array.0, offset, offset + len)
                        }
                    })
                    .collect();
                writeln!(f, "{pad}call {name}({})", args.join(", "))?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: [{}; {}]", p.name, p.element_type, p.len))
            .collect();
        writeln!(f, "fn {}({}) {{", self.name, params.join(", "))?;
        for (index, array) in self.arrays.iter().enumerate() {
            match array {
                ArrayDecl::Param { .. } => {}
                ArrayDecl::Local { element_type, len } => {
                    writeln!(f, "    let @{index}: [{element_type}; {len}]")?
                }
                ArrayDecl::Constant(values) => writeln!(
                    f,
                    "    const @{index}: [{}; {}]",
                    values.scalar_type(),
                    values.len()
                )?,
            }
        }
        fmt_body(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in self.functions.values() {
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}
