//! VM → host conversions.

use std::ffi::c_int;

use mlua_sys as ffi;

use super::value::{LightPointer, Nil, OpaquePointer, ThreadHandle};
use super::{Kind, KindSet, Stack};

/// A host type that can be read from the value stack.
///
/// `KINDS` lists the value kinds the type accepts. `receive` must return
/// `None` for any other kind and must leave the stack unchanged.
pub trait Receive: Sized {
    const KINDS: KindSet;

    fn receive(stack: Stack, pos: c_int) -> Option<Self>;
}

impl<T: Receive> Receive for Option<T> {
    const KINDS: KindSet = T::KINDS.with(Kind::Nil);

    /// Nil is `Some(None)`; a value of an accepted kind is `Some(Some(v))`.
    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if stack.kind(pos) == Kind::Nil && !T::KINDS.contains(Kind::Nil) {
            return Some(None);
        }
        T::receive(stack, pos).map(Some)
    }
}

impl Receive for Nil {
    const KINDS: KindSet = KindSet::of(Kind::Nil);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        (stack.kind(pos) == Kind::Nil).then_some(Nil)
    }
}

impl Receive for bool {
    const KINDS: KindSet = KindSet::of(Kind::Bool);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if stack.kind(pos) != Kind::Bool {
            return None;
        }
        Some(unsafe { ffi::lua_toboolean(stack.as_ptr(), pos) != 0 })
    }
}

impl Receive for LightPointer {
    const KINDS: KindSet = KindSet::of(Kind::LightPointer).with(Kind::OpaqueObject);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if !Self::KINDS.contains(stack.kind(pos)) {
            return None;
        }
        Some(LightPointer(unsafe { ffi::lua_touserdata(stack.as_ptr(), pos) }))
    }
}

impl Receive for OpaquePointer {
    const KINDS: KindSet = KindSet::of(Kind::OpaqueObject);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if stack.kind(pos) != Kind::OpaqueObject {
            return None;
        }
        Some(OpaquePointer(unsafe { ffi::lua_touserdata(stack.as_ptr(), pos) }))
    }
}

impl Receive for f64 {
    const KINDS: KindSet = KindSet::NUMBERS;

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if !stack.kind(pos).is_number() {
            return None;
        }
        Some(unsafe { ffi::lua_tonumber(stack.as_ptr(), pos) })
    }
}

impl Receive for f32 {
    const KINDS: KindSet = KindSet::NUMBERS;

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        f64::receive(stack, pos).map(|n| n as f32)
    }
}

impl Receive for i64 {
    const KINDS: KindSet = KindSet::NUMBERS;

    /// Floats are truncated toward zero, saturating at the `i64` bounds.
    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        let state = stack.as_ptr();
        match stack.kind(pos) {
            Kind::Integer => Some(unsafe { ffi::lua_tointeger(state, pos) }),
            Kind::Number => {
                let n = unsafe { ffi::lua_tonumber(state, pos) };
                if n.is_nan() { None } else { Some(n as i64) }
            }
            _ => None,
        }
    }
}

macro_rules! receive_narrow_integer {
    ($($ty:ty),*) => {$(
        impl Receive for $ty {
            const KINDS: KindSet = KindSet::NUMBERS;

            /// Values that do not fit the target type are rejected.
            fn receive(stack: Stack, pos: c_int) -> Option<Self> {
                i64::receive(stack, pos).and_then(|n| <$ty>::try_from(n).ok())
            }
        }
    )*};
}

receive_narrow_integer!(i8, i16, i32, u8, u16, u32, u64, isize, usize);

impl Receive for Vec<u8> {
    const KINDS: KindSet = KindSet::of(Kind::String);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        // Numbers also convert with lua_tolstring, and in place; keep them out.
        if stack.kind(pos) != Kind::String {
            return None;
        }
        let mut len = 0usize;
        let ptr = unsafe { ffi::lua_tolstring(stack.as_ptr(), pos, &mut len) };
        if ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
        Some(bytes.to_vec())
    }
}

impl Receive for String {
    const KINDS: KindSet = KindSet::of(Kind::String);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        Vec::<u8>::receive(stack, pos).and_then(|bytes| String::from_utf8(bytes).ok())
    }
}

impl Receive for ThreadHandle {
    const KINDS: KindSet = KindSet::of(Kind::Thread);

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if stack.kind(pos) != Kind::Thread {
            return None;
        }
        let thread = unsafe { ffi::lua_tothread(stack.as_ptr(), pos) };
        (!thread.is_null()).then_some(ThreadHandle(thread))
    }
}
