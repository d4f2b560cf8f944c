//! Native execution of compiled maps through Cranelift.
//!
//! The IR produced by the compiler is lowered function by function; calls to
//! host functions go through a trampoline in [`runtime`].

pub mod compiler;
pub mod runtime;

pub use compiler::{CraneliftJit, JitMap};
pub use runtime::HostContext;
