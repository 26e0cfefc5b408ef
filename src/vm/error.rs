//! Error classification for script execution.

use std::ffi::c_int;
use std::fmt;

use mlua_sys as ffi;
use thiserror::Error;

use crate::stack::{Kind, Stack};

/// Outcome class of a load or protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    OutOfMemory,
    SyntaxError,
    FileNotFound,
    /// Error while running the message handler.
    InnerError,
    RuntimeError,
}

impl ErrorKind {
    /// Classify a Lua status code. Unknown codes count as runtime errors.
    pub fn from_status(status: c_int) -> Self {
        match status {
            ffi::LUA_OK => ErrorKind::Success,
            ffi::LUA_ERRMEM => ErrorKind::OutOfMemory,
            ffi::LUA_ERRSYNTAX => ErrorKind::SyntaxError,
            ffi::LUA_ERRFILE => ErrorKind::FileNotFound,
            ffi::LUA_ERRERR => ErrorKind::InnerError,
            _ => ErrorKind::RuntimeError,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorKind::Success
    }

    pub fn is_err(self) -> bool {
        !self.is_ok()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Success => "success",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::FileNotFound => "file error",
            ErrorKind::InnerError => "error in error handling",
            ErrorKind::RuntimeError => "runtime error",
        };
        f.write_str(name)
    }
}

/// A failed load or call, with the runtime's message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct VmError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError {
            kind,
            message: message.into(),
        }
    }

    /// Error returned by operations on a closed session.
    pub fn closed() -> Self {
        VmError::new(ErrorKind::RuntimeError, "session is closed")
    }

    /// Build an error from `status` and the error value on top of the
    /// stack, popping that value.
    pub(crate) fn pop_from(stack: Stack, status: c_int) -> Self {
        let kind = ErrorKind::from_status(status);
        if stack.top() == 0 {
            return VmError::new(kind, "(no error object)");
        }
        let message = match stack.kind(-1) {
            // Numbers convert too, matching lua.c's msghandler.
            Kind::String | Kind::Number | Kind::Integer => {
                let mut len = 0usize;
                let ptr = unsafe { ffi::lua_tolstring(stack.as_ptr(), -1, &mut len) };
                if ptr.is_null() {
                    String::new()
                } else {
                    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
                    String::from_utf8_lossy(bytes).into_owned()
                }
            }
            other => format!("(error object is a {} value)", other),
        };
        stack.pop(1);
        VmError { kind, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::from_status(ffi::LUA_OK), ErrorKind::Success);
        assert_eq!(ErrorKind::from_status(ffi::LUA_ERRRUN), ErrorKind::RuntimeError);
        assert_eq!(ErrorKind::from_status(ffi::LUA_ERRSYNTAX), ErrorKind::SyntaxError);
        assert_eq!(ErrorKind::from_status(ffi::LUA_ERRMEM), ErrorKind::OutOfMemory);
        assert_eq!(ErrorKind::from_status(ffi::LUA_ERRERR), ErrorKind::InnerError);
        assert_eq!(ErrorKind::from_status(ffi::LUA_ERRFILE), ErrorKind::FileNotFound);
        assert_eq!(ErrorKind::from_status(99), ErrorKind::RuntimeError);
    }

    #[test]
    fn test_is_ok() {
        assert!(ErrorKind::Success.is_ok());
        assert!(ErrorKind::SyntaxError.is_err());
    }

    #[test]
    fn test_display() {
        let err = VmError::new(ErrorKind::SyntaxError, "[string \"x\"]:1: unexpected symbol");
        assert_eq!(
            err.to_string(),
            "syntax error: [string \"x\"]:1: unexpected symbol"
        );
        assert_eq!(VmError::closed().kind, ErrorKind::RuntimeError);
    }
}
