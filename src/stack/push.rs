//! Host → VM conversions.

use std::ffi::{c_char, c_void};

use mlua_sys as ffi;

use super::Stack;
use super::value::{LightPointer, Nil, ThreadHandle};

/// A host type that can be pushed onto the value stack.
///
/// Implementations must push exactly one value. Host types opt in by
/// implementing this trait together with [`Receive`](super::Receive).
pub trait Push {
    fn push(&self, stack: Stack);
}

/// A raw C function, pushed as a native function value.
#[derive(Clone, Copy)]
pub struct NativeFunction(pub ffi::lua_CFunction);

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({:p})", self.0 as *const c_void)
    }
}

impl<T: Push + ?Sized> Push for &T {
    fn push(&self, stack: Stack) {
        (**self).push(stack);
    }
}

impl<T: Push + ?Sized> Push for &mut T {
    fn push(&self, stack: Stack) {
        (**self).push(stack);
    }
}

impl<T: Push + ?Sized> Push for Box<T> {
    fn push(&self, stack: Stack) {
        (**self).push(stack);
    }
}

impl<T: Push> Push for Option<T> {
    fn push(&self, stack: Stack) {
        match self {
            Some(value) => value.push(stack),
            None => Nil.push(stack),
        }
    }
}

impl Push for Nil {
    fn push(&self, stack: Stack) {
        unsafe { ffi::lua_pushnil(stack.as_ptr()) }
    }
}

impl Push for bool {
    fn push(&self, stack: Stack) {
        unsafe { ffi::lua_pushboolean(stack.as_ptr(), *self as _) }
    }
}

impl Push for LightPointer {
    fn push(&self, stack: Stack) {
        unsafe { ffi::lua_pushlightuserdata(stack.as_ptr(), self.0) }
    }
}

impl Push for f64 {
    fn push(&self, stack: Stack) {
        unsafe { ffi::lua_pushnumber(stack.as_ptr(), *self) }
    }
}

impl Push for f32 {
    fn push(&self, stack: Stack) {
        f64::from(*self).push(stack);
    }
}

impl Push for i64 {
    fn push(&self, stack: Stack) {
        unsafe { ffi::lua_pushinteger(stack.as_ptr(), *self) }
    }
}

macro_rules! push_lossless_integer {
    ($($ty:ty),*) => {$(
        impl Push for $ty {
            fn push(&self, stack: Stack) {
                i64::from(*self).push(stack);
            }
        }
    )*};
}

push_lossless_integer!(i8, i16, i32, u8, u16, u32);

macro_rules! push_wide_integer {
    ($($ty:ty),*) => {$(
        impl Push for $ty {
            /// Values outside the `i64` range are pushed as floats.
            fn push(&self, stack: Stack) {
                match i64::try_from(*self) {
                    Ok(n) => n.push(stack),
                    Err(_) => (*self as f64).push(stack),
                }
            }
        }
    )*};
}

push_wide_integer!(isize, usize, u64);

impl Push for str {
    fn push(&self, stack: Stack) {
        self.as_bytes().push(stack);
    }
}

impl Push for String {
    fn push(&self, stack: Stack) {
        self.as_str().push(stack);
    }
}

impl Push for [u8] {
    fn push(&self, stack: Stack) {
        unsafe {
            ffi::lua_pushlstring(stack.as_ptr(), self.as_ptr() as *const c_char, self.len());
        }
    }
}

impl Push for Vec<u8> {
    fn push(&self, stack: Stack) {
        self.as_slice().push(stack);
    }
}

impl Push for ThreadHandle {
    /// Threads of the same VM can be pushed onto any of its stacks.
    fn push(&self, stack: Stack) {
        let thread = self.as_ptr();
        unsafe {
            if thread == stack.as_ptr() {
                ffi::lua_pushthread(thread);
            } else {
                ffi::lua_pushthread(thread);
                ffi::lua_xmove(thread, stack.as_ptr(), 1);
            }
        }
    }
}

impl Push for NativeFunction {
    fn push(&self, stack: Stack) {
        unsafe { ffi::lua_pushcfunction(stack.as_ptr(), self.0) }
    }
}
