//! Chunk compilation.

use std::ffi::{CStr, CString, c_char};
use std::path::Path;

use mlua_sys as ffi;

use super::error::{ErrorKind, VmError};
use crate::stack::Stack;

/// Which chunk encodings a load accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Text,
    /// Text or a precompiled binary chunk.
    Any,
}

impl Mode {
    fn as_cstr(self) -> &'static CStr {
        match self {
            Mode::Text => c"t",
            Mode::Any => c"bt",
        }
    }
}

/// Chunk name for error messages. Names starting with `=` are shown as is.
fn chunk_name(name: &str) -> CString {
    CString::new(name).unwrap_or_else(|_| CString::from(c"=(load)"))
}

/// Compile `source` and push the resulting function.
///
/// On failure nothing is left on the stack.
pub(crate) fn load_buffer(stack: Stack, source: &[u8], name: &str, mode: Mode) -> Result<(), VmError> {
    let name = chunk_name(name);
    let status = unsafe {
        ffi::luaL_loadbufferx(
            stack.as_ptr(),
            source.as_ptr() as *const c_char,
            source.len(),
            name.as_ptr(),
            mode.as_cstr().as_ptr(),
        )
    };
    if status != ffi::LUA_OK {
        let err = VmError::pop_from(stack, status);
        tracing::debug!(target: "tether", error = %err, "chunk failed to compile");
        return Err(err);
    }
    tracing::debug!(target: "tether", bytes = source.len(), "chunk compiled");
    Ok(())
}

/// Compile the file at `path` and push the resulting function.
pub(crate) fn load_file(stack: Stack, path: &Path) -> Result<(), VmError> {
    let Some(text) = path.to_str() else {
        return Err(VmError::new(
            ErrorKind::FileNotFound,
            format!("cannot open {}: path is not valid UTF-8", path.display()),
        ));
    };
    let Ok(cpath) = CString::new(text) else {
        return Err(VmError::new(
            ErrorKind::FileNotFound,
            format!("cannot open {}: path contains a NUL byte", text),
        ));
    };
    let status = unsafe { ffi::luaL_loadfilex(stack.as_ptr(), cpath.as_ptr(), std::ptr::null()) };
    if status != ffi::LUA_OK {
        let err = VmError::pop_from(stack, status);
        tracing::debug!(target: "tether", path = text, error = %err, "file failed to load");
        return Err(err);
    }
    tracing::debug!(target: "tether", path = text, "file compiled");
    Ok(())
}
