//! Runtime support for JIT-compiled maps: argument buffers and the bridge
//! from native code back into [`HostFunctions`].

use std::panic::{self, AssertUnwindSafe};

use tracing::trace;

use crate::emitter::{HostFunctions, HostValue, RuntimeError};
use crate::model::{PortValues, ScalarType};

/// Set in [`HostArg::type_code`] when the argument is a spilled scalar rather
/// than an array.
pub const SCALAR_BIT: u64 = 0x10;

/// One argument of an external call, as laid out by compiled code.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct HostArg {
    pub ptr: *const u8,
    pub len: u64,
    pub type_code: u64,
}

/// Size of [`HostArg`] as compiled code writes it.
pub const HOST_ARG_SIZE: u32 = 24;

pub fn type_code(scalar_type: ScalarType) -> u64 {
    match scalar_type {
        ScalarType::F32 => 0,
        ScalarType::F64 => 1,
        ScalarType::Bool => 2,
    }
}

fn scalar_type(code: u64) -> Option<ScalarType> {
    match code & !SCALAR_BIT {
        0 => Some(ScalarType::F32),
        1 => Some(ScalarType::F64),
        2 => Some(ScalarType::Bool),
        _ => None,
    }
}

/// State handed to compiled code as its trailing pointer argument.
pub struct HostContext {
    host: *mut HostFunctions,
    /// Host function index for each external the map calls, `None` if missing.
    table: Vec<Option<usize>>,
    /// First failure seen by the trampoline; later calls are skipped.
    error: Option<RuntimeError>,
    names: Vec<String>,
}

impl HostContext {
    pub fn new(host: &mut HostFunctions, externals: &[String]) -> Self {
        Self {
            table: externals.iter().map(|name| host.index_of(name)).collect(),
            host,
            error: None,
            names: externals.to_vec(),
        }
    }

    pub fn take_error(&mut self) -> Option<RuntimeError> {
        self.error.take()
    }
}

/// Called by compiled code for every `extern` call.
///
/// # Safety
/// `context` must point to a live [`HostContext`] and `args` to `count`
/// descriptors whose buffers are valid for the duration of the call.
pub unsafe extern "C" fn call_host(
    context: *mut HostContext,
    external: u64,
    args: *const HostArg,
    count: u64,
) {
    let context = &mut *context;
    if context.error.is_some() {
        return;
    }
    let name = context
        .names
        .get(external as usize)
        .cloned()
        .unwrap_or_default();
    let Some(index) = context.table.get(external as usize).copied().flatten() else {
        context.error = Some(RuntimeError::UnknownHostFunction(name));
        return;
    };

    let descriptors = if count == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(args, count as usize)
    };
    let mut values = Vec::with_capacity(descriptors.len());
    for arg in descriptors {
        match decode(arg) {
            Some(value) => values.push(value),
            None => {
                context.error = Some(RuntimeError::TypeMismatch("host argument"));
                return;
            }
        }
    }
    trace!(function = %name, args = values.len(), "host call");

    let host = &mut *context.host;
    let called = panic::catch_unwind(AssertUnwindSafe(|| host.call_index(index, &values)));
    match called {
        Ok(true) => {}
        Ok(false) => context.error = Some(RuntimeError::UnknownHostFunction(name)),
        Err(_) => context.error = Some(RuntimeError::HostPanic(name)),
    }
}

unsafe fn decode(arg: &HostArg) -> Option<HostValue> {
    let len = arg.len as usize;
    let values = match scalar_type(arg.type_code)? {
        ScalarType::F32 => {
            PortValues::F32(std::slice::from_raw_parts(arg.ptr as *const f32, len).to_vec())
        }
        ScalarType::F64 => {
            PortValues::F64(std::slice::from_raw_parts(arg.ptr as *const f64, len).to_vec())
        }
        ScalarType::Bool => {
            let bytes = std::slice::from_raw_parts(arg.ptr, len);
            PortValues::Bool(bytes.iter().map(|b| *b != 0).collect())
        }
    };
    if arg.type_code & SCALAR_BIT == 0 {
        return Some(HostValue::Array(values));
    }
    values.get(0).map(HostValue::Scalar)
}

/// Raw pointer to the first element of a buffer.
pub fn buffer_ptr(values: &mut PortValues) -> *mut u8 {
    match values {
        PortValues::F32(v) => v.as_mut_ptr() as *mut u8,
        PortValues::F64(v) => v.as_mut_ptr() as *mut u8,
        PortValues::Bool(v) => v.as_mut_ptr() as *mut u8,
    }
}

/// Native byte image of a constant table.
pub fn constant_bytes(values: &PortValues) -> Vec<u8> {
    match values {
        PortValues::F32(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
        PortValues::F64(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
        PortValues::Bool(v) => v.iter().map(|b| u8::from(*b)).collect(),
    }
}
