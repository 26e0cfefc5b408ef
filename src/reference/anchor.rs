//! Session anchor shared by a [`Vm`](crate::Vm) and every handle it hands out.

use std::cell::Cell;
use std::ffi::c_void;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::stack::Stack;

/// Registry key under which the anchor pointer is stored. Only the address matters.
static ANCHOR_KEY: u8 = 0;

fn anchor_key() -> *const c_void {
    &ANCHOR_KEY as *const u8 as *const c_void
}

/// Shared liveness cell of one session.
///
/// Holds the main state while the session is open and null after close,
/// so handles that outlive their session degrade to empty instead of
/// touching freed memory.
#[derive(Debug)]
pub(crate) struct Anchor {
    state: Cell<*mut ffi::lua_State>,
}

impl Anchor {
    /// Create the anchor of a freshly opened state and record it in the
    /// registry so host callbacks can find it.
    ///
    /// # Safety
    ///
    /// `state` must be a freshly opened main state.
    pub(crate) unsafe fn install(state: *mut ffi::lua_State) -> Rc<Anchor> {
        let anchor = Rc::new(Anchor {
            state: Cell::new(state),
        });
        // The registry owns one strong count, released in `uninstall`.
        let raw = Rc::into_raw(anchor.clone()) as *mut c_void;
        unsafe {
            ffi::lua_pushlightuserdata(state, raw);
            ffi::lua_rawsetp(state, ffi::LUA_REGISTRYINDEX, anchor_key());
        }
        anchor
    }

    /// Drop the registry's strong count and mark the session closed.
    ///
    /// # Safety
    ///
    /// Must be called once, right before the state is closed.
    pub(crate) unsafe fn uninstall(&self) {
        let state = self.state.replace(std::ptr::null_mut());
        if state.is_null() {
            return;
        }
        unsafe {
            ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, anchor_key());
            let raw = ffi::lua_touserdata(state, -1) as *const Anchor;
            ffi::lua_pop(state, 1);
            ffi::lua_pushnil(state);
            ffi::lua_rawsetp(state, ffi::LUA_REGISTRYINDEX, anchor_key());
            if !raw.is_null() {
                drop(Rc::from_raw(raw));
            }
        }
    }

    /// Recover the anchor of the session that owns `stack`.
    ///
    /// Works from any coroutine of the session, the registry is shared.
    pub(crate) fn recover(stack: Stack) -> Option<Rc<Anchor>> {
        let state = stack.as_ptr();
        let raw = unsafe {
            ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, anchor_key());
            let raw = ffi::lua_touserdata(state, -1) as *const Anchor;
            ffi::lua_pop(state, 1);
            raw
        };
        if raw.is_null() {
            return None;
        }
        // The registry still holds its count, so the allocation is alive.
        let anchor = unsafe {
            Rc::increment_strong_count(raw);
            Rc::from_raw(raw)
        };
        anchor.is_open().then_some(anchor)
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.state.get().is_null()
    }

    /// Stack of the main state, `None` once the session is closed.
    pub(crate) fn stack(&self) -> Option<Stack> {
        let state = self.state.get();
        if state.is_null() {
            None
        } else {
            Some(unsafe { Stack::from_raw(state) })
        }
    }
}
