//! Value stack protocol.
//!
//! A [`Stack`] is a view over one Lua state (the main thread or a
//! coroutine). Host values cross the boundary through two capability
//! traits: [`Push`] appends exactly one value on top of the stack, and
//! [`Receive`] reads the value at a position without removing it.
//!
//! Positions follow the Lua convention: positive indices count from the
//! bottom (1 is the first slot), negative indices count from the top
//! (-1 is the last slot).

#![allow(unsafe_op_in_unsafe_fn)]

mod kind;
mod push;
mod receive;
mod value;

use std::ffi::c_int;

use mlua_sys as ffi;

pub use kind::{Kind, KindSet};
pub use push::{NativeFunction, Push};
pub use receive::Receive;
pub use value::{LightPointer, Nil, OpaquePointer, ThreadHandle, Value};

/// A view over a Lua value stack.
///
/// The view is `Copy` and does not own the state. It is only valid while
/// the state it was created from is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    state: *mut ffi::lua_State,
}

impl Stack {
    /// Wrap a raw Lua state.
    ///
    /// # Safety
    ///
    /// - `state` must be non-null and point to an open Lua state or thread
    /// - the state must stay open for as long as the returned view is used
    pub unsafe fn from_raw(state: *mut ffi::lua_State) -> Self {
        debug_assert!(!state.is_null(), "stack view over a null state");
        Stack { state }
    }

    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state
    }

    // =========================================================================
    // Stack height
    // =========================================================================

    /// Number of values on the stack.
    pub fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.state) }
    }

    /// Set the stack height, popping values or filling with nil.
    pub fn set_top(&self, top: c_int) {
        debug_assert!(top >= 0, "set_top with negative height {}", top);
        unsafe { ffi::lua_settop(self.state, top) }
    }

    /// Remove `count` values from the top.
    pub fn pop(&self, count: c_int) {
        debug_assert!(
            count >= 0 && count <= self.top(),
            "pop({}) on a stack of height {}",
            count,
            self.top()
        );
        if count > 0 {
            unsafe { ffi::lua_pop(self.state, count) }
        }
    }

    /// Make room for `extra` more values. Returns false if the stack cannot grow.
    pub fn ensure(&self, extra: c_int) -> bool {
        unsafe { ffi::lua_checkstack(self.state, extra) != 0 }
    }

    /// Resolve a position to an absolute index.
    ///
    /// Returns `None` for 0 and for positions outside the current stack.
    pub fn resolve_index(&self, pos: c_int) -> Option<c_int> {
        resolve_index(self.top(), pos)
    }

    /// Debug check that `pos` addresses an existing slot.
    pub fn assert_reachable(&self, pos: c_int) {
        debug_assert!(
            self.resolve_index(pos).is_some(),
            "position {} is outside a stack of height {}",
            pos,
            self.top()
        );
    }

    // =========================================================================
    // Kinds
    // =========================================================================

    /// Kind of the value at `pos`.
    ///
    /// Integers and floats are told apart by number subtype, host (C)
    /// functions and script functions by how they were created.
    pub fn kind(&self, pos: c_int) -> Kind {
        self.assert_reachable(pos);
        unsafe { kind_at(self.state, pos) }
    }

    /// Kind of the value at `pos`, without the reachability check.
    ///
    /// Accepts pseudo-indices such as upvalue indices.
    pub(crate) fn kind_unchecked(&self, pos: c_int) -> Kind {
        unsafe { kind_at(self.state, pos) }
    }

    // =========================================================================
    // Push / Receive
    // =========================================================================

    /// Push one value.
    pub fn push<T: Push + ?Sized>(&self, value: &T) {
        value.push(*self);
    }

    /// Push one value and check that the height grew by exactly one.
    pub fn push_checked<T: Push + ?Sized>(&self, value: &T) {
        let before = self.top();
        value.push(*self);
        debug_assert_eq!(
            self.top() - before,
            1,
            "Push implementation must add exactly one value"
        );
    }

    /// Read the value at `pos` as `T`.
    ///
    /// Returns `None` if the value's kind is not one `T` accepts.
    pub fn receive<T: Receive>(&self, pos: c_int) -> Option<T> {
        self.assert_reachable(pos);
        T::receive(*self, pos)
    }

    /// Read the value at `pos` and check that the height did not change.
    pub fn receive_checked<T: Receive>(&self, pos: c_int) -> Option<T> {
        let before = self.top();
        let value = self.receive::<T>(pos);
        debug_assert_eq!(
            self.top(),
            before,
            "Receive implementation must leave the stack unchanged"
        );
        value
    }

    /// Duplicate the value at `pos` onto the top.
    pub fn push_copy(&self, pos: c_int) {
        unsafe { ffi::lua_pushvalue(self.state, pos) }
    }

    /// Raw equality of two slots, bypassing `__eq`.
    pub fn raw_equal(&self, a: c_int, b: c_int) -> bool {
        unsafe { ffi::lua_rawequal(self.state, a, b) != 0 }
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// The root execution context of the VM this stack belongs to.
    ///
    /// Any coroutine of a VM can recover the main thread through the
    /// registry, so host callbacks running inside a coroutine still reach
    /// the state that owns every handle.
    pub fn main_thread(&self) -> Stack {
        unsafe {
            ffi::lua_rawgeti(
                self.state,
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_MAINTHREAD as ffi::lua_Integer,
            );
            let main = ffi::lua_tothread(self.state, -1);
            ffi::lua_pop(self.state, 1);
            debug_assert!(!main.is_null(), "registry has no main thread");
            Stack { state: main }
        }
    }

    /// Print every slot to the debug log, top first.
    pub fn dump(&self) {
        let top = self.top();
        for i in (1..=top).rev() {
            tracing::debug!(target: "tether::stack", "{} -> {}", i, self.kind(i));
        }
    }
}

/// Resolve a stack index to an absolute index.
///
/// Positive indices are from the bottom (1 = first element).
/// Negative indices are from the top (-1 = last element).
fn resolve_index(stack_len: c_int, index: c_int) -> Option<c_int> {
    if index > 0 {
        if index <= stack_len { Some(index) } else { None }
    } else if index < 0 {
        let offset = index.checked_neg()?;
        if offset <= stack_len {
            Some(stack_len - offset + 1)
        } else {
            None
        }
    } else {
        None
    }
}

unsafe fn kind_at(state: *mut ffi::lua_State, pos: c_int) -> Kind {
    match ffi::lua_type(state, pos) {
        ffi::LUA_TNIL => Kind::Nil,
        ffi::LUA_TBOOLEAN => Kind::Bool,
        ffi::LUA_TLIGHTUSERDATA => Kind::LightPointer,
        ffi::LUA_TNUMBER => {
            if ffi::lua_isinteger(state, pos) != 0 {
                Kind::Integer
            } else {
                Kind::Number
            }
        }
        ffi::LUA_TSTRING => Kind::String,
        ffi::LUA_TTABLE => Kind::Table,
        ffi::LUA_TFUNCTION => {
            if ffi::lua_iscfunction(state, pos) != 0 {
                Kind::NativeFunction
            } else {
                Kind::Function
            }
        }
        ffi::LUA_TUSERDATA => Kind::OpaqueObject,
        ffi::LUA_TTHREAD => Kind::Thread,
        _ => Kind::None,
    }
}

/// Restores the stack height it was created with when dropped.
///
/// Every operation that pushes temporaries holds one, so the stack is
/// balanced on early returns as well as on the normal path.
pub(crate) struct StackGuard {
    stack: Stack,
    top: c_int,
}

impl StackGuard {
    pub(crate) fn new(stack: Stack) -> Self {
        StackGuard {
            stack,
            top: stack.top(),
        }
    }

    /// Height the guard will restore.
    pub(crate) fn base(&self) -> c_int {
        self.top
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        if self.stack.top() != self.top {
            self.stack.set_top(self.top);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(5, 1), Some(1));
        assert_eq!(resolve_index(5, 5), Some(5));
        assert_eq!(resolve_index(5, 6), None);
        assert_eq!(resolve_index(5, 0), None);
        assert_eq!(resolve_index(5, -1), Some(5));
        assert_eq!(resolve_index(5, -5), Some(1));
        assert_eq!(resolve_index(5, -6), None);
        assert_eq!(resolve_index(0, -1), None);
    }
}
