//! Metamethod-aware table access run under `lua_pcall`.
//!
//! `lua_gettable`/`lua_settable` may invoke `__index`/`__newindex`, which
//! can raise. Raising outside a protected call aborts the process, so both
//! run inside tiny C functions called through `lua_pcall`.

use std::ffi::c_int;

use mlua_sys as ffi;

use super::error::VmError;
use crate::stack::{Push, Stack};

/// `(t, k) -> t[k]`
unsafe extern "C-unwind" fn index_thunk(state: *mut ffi::lua_State) -> c_int {
    unsafe {
        ffi::lua_gettable(state, 1);
    }
    1
}

/// `(t, k, v) -> ()`, performs `t[k] = v`
unsafe extern "C-unwind" fn newindex_thunk(state: *mut ffi::lua_State) -> c_int {
    unsafe {
        ffi::lua_settable(state, 1);
    }
    0
}

/// Push `t[key]` where `t` is at `table`, honoring metamethods.
///
/// On success exactly one value is pushed. On failure nothing is left on
/// the stack.
pub(crate) fn get<K: Push + ?Sized>(stack: Stack, table: c_int, key: &K) -> Result<(), VmError> {
    let state = stack.as_ptr();
    unsafe {
        let table = ffi::lua_absindex(state, table);
        ffi::lua_pushcfunction(state, index_thunk);
        ffi::lua_pushvalue(state, table);
        stack.push(key);
        match ffi::lua_pcall(state, 2, 1, 0) {
            ffi::LUA_OK => Ok(()),
            status => Err(VmError::pop_from(stack, status)),
        }
    }
}

/// Perform `t[key] = value` where `t` is at `table`, honoring metamethods.
///
/// Leaves the stack height unchanged on both paths.
pub(crate) fn set<K, V>(stack: Stack, table: c_int, key: &K, value: &V) -> Result<(), VmError>
where
    K: Push + ?Sized,
    V: Push + ?Sized,
{
    let state = stack.as_ptr();
    unsafe {
        let table = ffi::lua_absindex(state, table);
        ffi::lua_pushcfunction(state, newindex_thunk);
        ffi::lua_pushvalue(state, table);
        stack.push(key);
        stack.push(value);
        match ffi::lua_pcall(state, 3, 0, 0) {
            ffi::LUA_OK => Ok(()),
            status => Err(VmError::pop_from(stack, status)),
        }
    }
}
