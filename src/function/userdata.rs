//! Host objects stored inside opaque objects.
//!
//! An object created for a host type `T` holds an [`Opaque<T>`]: a type
//! tag, liveness and borrow flags, then the value itself. The payload
//! starts at the first address aligned for `Opaque<T>` inside the block.

#![allow(unsafe_op_in_unsafe_fn)]

use std::any::{TypeId, type_name};
use std::ffi::{c_int, c_void};
use std::mem::{MaybeUninit, align_of, size_of};

use mlua_sys as ffi;

use super::raise;
use crate::stack::{Kind, NativeFunction, Stack};

#[repr(C)]
pub(crate) struct Opaque<T> {
    tag: TypeId,
    alive: u8,
    borrowed: u8,
    value: MaybeUninit<T>,
}

impl<T: 'static> Opaque<T> {
    /// Bytes to request so an aligned `Opaque<T>` always fits.
    fn block_size() -> usize {
        size_of::<Opaque<T>>() + align_of::<Opaque<T>>() - 1
    }

    fn payload(block: *mut c_void) -> *mut Opaque<T> {
        let offset = (block as usize).wrapping_neg() & (align_of::<Opaque<T>>() - 1);
        (block as *mut u8).wrapping_add(offset) as *mut Opaque<T>
    }

    /// Push a new opaque object holding `value`. No metatable is attached.
    pub(crate) fn push_new(stack: Stack, value: T) -> *mut Opaque<T> {
        unsafe {
            let block = ffi::lua_newuserdatauv(stack.as_ptr(), Self::block_size(), 0);
            let payload = Self::payload(block);
            payload.write(Opaque {
                tag: TypeId::of::<T>(),
                alive: 1,
                borrowed: 0,
                value: MaybeUninit::new(value),
            });
            payload
        }
    }

    /// The payload of the object at `pos`, if it was created for `T`.
    ///
    /// Returns objects that were already destroyed too; check `is_alive`.
    pub(crate) fn at(stack: Stack, pos: c_int) -> Option<*mut Opaque<T>> {
        if stack.kind_unchecked(pos) != Kind::OpaqueObject {
            return None;
        }
        let state = stack.as_ptr();
        let block = unsafe { ffi::lua_touserdata(state, pos) };
        let len = unsafe { ffi::lua_rawlen(state, pos) };
        if block.is_null() || len < Self::block_size() {
            return None;
        }
        let payload = Self::payload(block);
        let tag = unsafe { std::ptr::addr_of!((*payload).tag).read() };
        (tag == TypeId::of::<T>()).then_some(payload)
    }

    pub(crate) unsafe fn is_alive(this: *mut Opaque<T>) -> bool {
        (*this).alive != 0
    }

    pub(crate) unsafe fn is_borrowed(this: *mut Opaque<T>) -> bool {
        (*this).borrowed != 0
    }

    /// Run `f` on the value with the borrow flag set.
    ///
    /// # Safety
    ///
    /// `this` must be alive and not borrowed.
    pub(crate) unsafe fn with_value<R>(this: *mut Opaque<T>, f: impl FnOnce(&mut T) -> R) -> R {
        struct Release(*mut u8);
        impl Drop for Release {
            fn drop(&mut self) {
                unsafe { *self.0 = 0 };
            }
        }

        (*this).borrowed = 1;
        let _release = Release(std::ptr::addr_of_mut!((*this).borrowed));
        f((*this).value.assume_init_mut())
    }

    unsafe fn destroy(this: *mut Opaque<T>) {
        (*this).alive = 0;
        (*this).value.assume_init_drop();
    }
}

/// Drops the `T` held by the object in slot 1 in place.
///
/// Objects of other types are left alone, a destroyed object stays
/// destroyed.
unsafe extern "C-unwind" fn destroy_object<T: 'static>(state: *mut ffi::lua_State) -> c_int {
    let stack = Stack::from_raw(state);
    match destroy_at::<T>(stack) {
        Ok(()) => 0,
        Err(message) => raise(stack, message),
    }
}

fn destroy_at<T: 'static>(stack: Stack) -> Result<(), String> {
    if stack.top() < 1 {
        return Err("No object to destroy!".to_string());
    }
    if stack.kind(1) != Kind::OpaqueObject {
        return Err(format!(
            "bad self: expected {}, got {}",
            type_name::<T>(),
            stack.kind(1)
        ));
    }
    let Some(object) = Opaque::<T>::at(stack, 1) else {
        return Ok(());
    };
    unsafe {
        if !Opaque::is_alive(object) {
            return Ok(());
        }
        if Opaque::is_borrowed(object) {
            return Err(format!("cannot destroy {} while it is in use", type_name::<T>()));
        }
        let dropped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Opaque::destroy(object);
        }));
        dropped.map_err(|_| format!("panic while dropping {}", type_name::<T>()))
    }
}

/// Native function that drops the host value of an object created for `T`.
///
/// Suitable as `__gc`. Calling it twice on the same object is a no-op;
/// the object's storage stays owned by the VM.
pub fn destructor<T: 'static>() -> NativeFunction {
    NativeFunction(destroy_object::<T>)
}

/// Push the shared `__gc` metatable of bare objects of type `T`.
pub(crate) fn push_gc_metatable<T: 'static>(stack: Stack) {
    let state = stack.as_ptr();
    let key = destroy_object::<T> as ffi::lua_CFunction as *const c_void;
    unsafe {
        if ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, key) == ffi::LUA_TTABLE {
            return;
        }
        ffi::lua_pop(state, 1);
        ffi::lua_createtable(state, 0, 2);
        ffi::lua_pushcfunction(state, destroy_object::<T>);
        ffi::lua_setfield(state, -2, c"__gc".as_ptr());
        stack.push(type_name::<T>());
        ffi::lua_setfield(state, -2, c"__name".as_ptr());
        ffi::lua_pushvalue(state, -1);
        ffi::lua_rawsetp(state, ffi::LUA_REGISTRYINDEX, key);
    }
}

/// Push a table usable as the metatable of `T` objects: `__gc` drops the
/// value and `__index` points back to the table, so methods stored in it
/// resolve with `obj:method()`.
pub(crate) fn push_class_metatable<T: 'static>(stack: Stack) {
    let state = stack.as_ptr();
    unsafe {
        ffi::lua_createtable(state, 0, 3);
        ffi::lua_pushcfunction(state, destroy_object::<T>);
        ffi::lua_setfield(state, -2, c"__gc".as_ptr());
        ffi::lua_pushvalue(state, -1);
        ffi::lua_setfield(state, -2, c"__index".as_ptr());
        stack.push(type_name::<T>());
        ffi::lua_setfield(state, -2, c"__name".as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(64))]
    struct Wide(#[allow(dead_code)] u8);

    #[test]
    fn test_payload_is_aligned() {
        let mut buffer = vec![0u8; Opaque::<Wide>::block_size() + 64];
        for shift in 0..64 {
            let block = unsafe { buffer.as_mut_ptr().add(shift) } as *mut c_void;
            let payload = Opaque::<Wide>::payload(block);
            assert_eq!(payload as usize % align_of::<Opaque<Wide>>(), 0);
            let end = payload as usize + size_of::<Opaque<Wide>>();
            assert!(end <= block as usize + Opaque::<Wide>::block_size());
        }
    }
}
