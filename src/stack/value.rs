use std::ffi::{c_int, c_void};
use std::fmt;

use mlua_sys as ffi;

use super::{Kind, KindSet, Push, Receive, Stack};
use crate::reference::{Anchor, Ref};

/// The absent-value marker, pushed as nil.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Nil;

/// A non-owning pointer exposed to scripts as light userdata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightPointer(pub *mut c_void);

/// Address of a full userdata block.
///
/// The block is owned by the VM; this is only its address. Opaque
/// objects cannot be pushed back from their address; [`Value`] and
/// [`Ref`] keep the object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaquePointer(pub *mut c_void);

/// A coroutine of the VM. Handle only, no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub(crate) *mut ffi::lua_State);

impl ThreadHandle {
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.0
    }

    /// A stack view over this thread.
    ///
    /// # Safety
    ///
    /// The thread must still be alive (reachable from the VM).
    pub unsafe fn stack(&self) -> Stack {
        unsafe { Stack::from_raw(self.0) }
    }
}

/// Any VM value, as seen from the host.
///
/// Primitive kinds are copied out. Tables, functions and opaque objects
/// are captured as a [`Ref`], so receiving a `Value` never loses structure.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    LightPointer(LightPointer),
    Number(f64),
    Integer(i64),
    /// Byte string; Lua strings are not required to be UTF-8.
    String(Vec<u8>),
    Thread(ThreadHandle),
    Ref(Ref),
}

impl Value {
    /// Kind of the value. Captured values report the kind of the VM value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Bool(_) => Kind::Bool,
            Value::LightPointer(_) => Kind::LightPointer,
            Value::Number(_) => Kind::Number,
            Value::Integer(_) => Kind::Integer,
            Value::String(_) => Kind::String,
            Value::Thread(_) => Kind::Thread,
            Value::Ref(r) => r.kind(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Lua truthiness: only nil and false are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Number(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_ref(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_ref(self) -> Option<Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Read the value at `pos`. Tables, functions and opaque objects are
    /// captured into a registry slot of the session owning `stack`.
    pub(crate) fn from_stack(stack: Stack, pos: c_int) -> Option<Value> {
        let value = match stack.kind(pos) {
            Kind::None => return None,
            Kind::Nil => Value::Nil,
            Kind::Bool => Value::Bool(stack.receive::<bool>(pos)?),
            Kind::LightPointer => Value::LightPointer(stack.receive::<LightPointer>(pos)?),
            Kind::Number => Value::Number(stack.receive::<f64>(pos)?),
            Kind::Integer => Value::Integer(stack.receive::<i64>(pos)?),
            Kind::String => Value::String(stack.receive::<Vec<u8>>(pos)?),
            Kind::Thread => Value::Thread(stack.receive::<ThreadHandle>(pos)?),
            Kind::NativeFunction | Kind::Table | Kind::Function | Kind::OpaqueObject => {
                Value::Ref(Ref::capture(Anchor::recover(stack)?, stack, pos))
            }
        };
        Some(value)
    }
}

impl Push for Value {
    fn push(&self, stack: Stack) {
        match self {
            Value::Nil => Nil.push(stack),
            Value::Bool(b) => b.push(stack),
            Value::LightPointer(p) => p.push(stack),
            Value::Number(n) => n.push(stack),
            Value::Integer(n) => n.push(stack),
            Value::String(bytes) => bytes.push(stack),
            Value::Thread(t) => t.push(stack),
            Value::Ref(r) => r.push(stack),
        }
    }
}

impl Receive for Value {
    const KINDS: KindSet = KindSet::VALUES;

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        Value::from_stack(stack, pos)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<Nil> for Value {
    fn from(_: Nil) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::String(bytes)
    }
}

impl From<LightPointer> for Value {
    fn from(p: LightPointer) -> Self {
        Value::LightPointer(p)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::LightPointer(p) => write!(f, "lightuserdata: {:p}", p.0),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 {
                    write!(f, "{}.0", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Integer(n) => write!(f, "{}", n),
            Value::String(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Value::Thread(t) => write!(f, "thread: {:p}", t.0),
            Value::Ref(r) => write!(f, "{}", r),
        }
    }
}
