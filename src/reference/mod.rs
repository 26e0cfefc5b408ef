//! Registry-backed handles to VM values.
//!
//! A [`Ref`] pins one VM value in a registry slot for as long as the
//! handle lives. Handles are bound to the session that created them; once
//! that session closes they behave as empty and dropping them touches
//! nothing.

#![allow(unsafe_op_in_unsafe_fn)]

mod anchor;
mod iter;
mod traverse;

use std::ffi::{c_int, c_void};
use std::fmt;
use std::rc::Rc;

use mlua_sys as ffi;

pub(crate) use anchor::Anchor;
pub use iter::RefIter;

use crate::function::PushMany;
use crate::stack::{Kind, KindSet, Push, Receive, Stack, StackGuard, Value};
use crate::vm::{ErrorKind, Vm, VmError, protected};

/// Handle to a VM value.
///
/// A handle is either empty (no slot), nil (bound to the nil value, which
/// needs no slot) or bound to a registry slot. Cloning registers a new
/// slot for the same value; dropping releases the slot.
pub struct Ref {
    anchor: Option<Rc<Anchor>>,
    slot: c_int,
}

#[allow(clippy::len_without_is_empty)]
impl Ref {
    /// The empty handle.
    pub const fn empty() -> Ref {
        Ref {
            anchor: None,
            slot: ffi::LUA_NOREF,
        }
    }

    /// A valid handle to nil in `vm`'s session. Empty if `vm` is closed.
    pub fn nil(vm: &Vm) -> Ref {
        match vm.anchor() {
            Some(anchor) => Ref {
                anchor: Some(anchor.clone()),
                slot: ffi::LUA_REFNIL,
            },
            None => Ref::empty(),
        }
    }

    /// Pin the value at `pos` and return a handle to it.
    pub(crate) fn capture(anchor: Rc<Anchor>, stack: Stack, pos: c_int) -> Ref {
        stack.push_copy(pos);
        Ref::pop_from(anchor, stack)
    }

    /// Pin the value on top of `stack`, popping it.
    pub(crate) fn pop_from(anchor: Rc<Anchor>, stack: Stack) -> Ref {
        let slot = unsafe { ffi::luaL_ref(stack.as_ptr(), ffi::LUA_REGISTRYINDEX) };
        tracing::trace!(target: "tether", slot, "registry ref");
        Ref {
            anchor: Some(anchor),
            slot,
        }
    }

    /// Main stack of the owning session, if this handle is bound and the
    /// session is open.
    pub(crate) fn stack(&self) -> Option<Stack> {
        if self.slot == ffi::LUA_NOREF {
            return None;
        }
        self.anchor.as_ref()?.stack()
    }

    pub(crate) fn anchor(&self) -> Option<&Rc<Anchor>> {
        self.anchor.as_ref().filter(|a| a.is_open())
    }

    /// Push the referenced value onto `stack` (nil when empty).
    fn push_onto(&self, stack: Stack) {
        if self.stack().is_none() || self.slot == ffi::LUA_REFNIL {
            unsafe { ffi::lua_pushnil(stack.as_ptr()) };
            return;
        }
        unsafe {
            ffi::lua_rawgeti(
                stack.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                self.slot as ffi::lua_Integer,
            );
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Whether the handle denotes a value. Nil handles are valid.
    pub fn is_valid(&self) -> bool {
        self.stack().is_some()
    }

    /// Kind of the referenced value, `Kind::None` when empty.
    pub fn kind(&self) -> Kind {
        let Some(stack) = self.stack() else {
            return Kind::None;
        };
        if self.slot == ffi::LUA_REFNIL {
            return Kind::Nil;
        }
        let _guard = StackGuard::new(stack);
        self.push_onto(stack);
        stack.kind(-1)
    }

    pub fn holds(&self, kind: Kind) -> bool {
        self.kind() == kind
    }

    pub fn is_nil(&self) -> bool {
        self.holds(Kind::Nil)
    }

    /// Whether both handles belong to the same open session.
    pub fn same_session(&self, other: &Ref) -> bool {
        match (self.anchor(), other.anchor()) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Raw length (`#` without `__len`). 0 for empty handles.
    pub fn len(&self) -> usize {
        self.with_pushed(|stack| unsafe { ffi::lua_rawlen(stack.as_ptr(), -1) })
            .unwrap_or(0)
    }

    /// Typed projection of the referenced value.
    ///
    /// `None` when the handle is empty or the value's kind is not one `T`
    /// accepts.
    pub fn as_<T: Receive>(&self) -> Option<T> {
        self.with_pushed(|stack| stack.receive_checked::<T>(-1)).flatten()
    }

    /// Run `f` with the referenced value on top of the main stack.
    fn with_pushed<R>(&self, f: impl FnOnce(Stack) -> R) -> Option<R> {
        let stack = self.stack()?;
        let _guard = StackGuard::new(stack);
        if !stack.ensure(1) {
            return None;
        }
        self.push_onto(stack);
        Some(f(stack))
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Push `self[key]` and run `f` on it. `raw` skips metamethods and
    /// requires a table.
    fn with_field<K, R>(&self, key: &K, raw: bool, f: impl FnOnce(Stack) -> Option<R>) -> Option<R>
    where
        K: Push + ?Sized,
    {
        let stack = self.stack()?;
        let _guard = StackGuard::new(stack);
        if !stack.ensure(4) {
            return None;
        }
        self.push_onto(stack);
        if raw {
            if stack.kind(-1) != Kind::Table {
                return None;
            }
            stack.push(key);
            unsafe { ffi::lua_rawget(stack.as_ptr(), -2) };
        } else if let Err(err) = protected::get(stack, -1, key) {
            tracing::warn!(target: "tether", error = %err, "field read raised");
            return None;
        }
        f(stack)
    }

    /// `self[key]`, honoring `__index`.
    ///
    /// `None` if the handle is empty or the lookup raised.
    pub fn get<K: Push + ?Sized>(&self, key: &K) -> Option<Value> {
        self.with_field(key, false, |stack| Value::from_stack(stack, -1))
    }

    /// `rawget(self, key)`. `None` if the handle is empty or not a table.
    pub fn get_raw<K: Push + ?Sized>(&self, key: &K) -> Option<Value> {
        self.with_field(key, true, |stack| Value::from_stack(stack, -1))
    }

    /// `self[key]` as `T`; `None` unless the field's kind is in `T::KINDS`.
    pub fn get_as<T: Receive, K: Push + ?Sized>(&self, key: &K) -> Option<T> {
        self.with_field(key, false, |stack| stack.receive::<T>(-1))
    }

    pub fn get_raw_as<T: Receive, K: Push + ?Sized>(&self, key: &K) -> Option<T> {
        self.with_field(key, true, |stack| stack.receive::<T>(-1))
    }

    /// `self[key]` captured as a handle. Empty on failure.
    pub fn get_ref<K: Push + ?Sized>(&self, key: &K) -> Ref {
        let anchor = self.anchor.clone();
        self.with_field(key, false, |stack| Some(Ref::pop_from(anchor?, stack)))
            .unwrap_or_default()
    }

    pub fn get_raw_ref<K: Push + ?Sized>(&self, key: &K) -> Ref {
        let anchor = self.anchor.clone();
        self.with_field(key, true, |stack| Some(Ref::pop_from(anchor?, stack)))
            .unwrap_or_default()
    }

    /// Whether `self[key]` is a value whose kind is in `kinds`.
    pub fn has_field<K: Push + ?Sized>(&self, key: &K, kinds: KindSet) -> bool {
        self.with_field(key, false, |stack| Some(kinds.contains(stack.kind(-1))))
            .unwrap_or(false)
    }

    pub fn has_field_raw<K: Push + ?Sized>(&self, key: &K, kinds: KindSet) -> bool {
        self.with_field(key, true, |stack| Some(kinds.contains(stack.kind(-1))))
            .unwrap_or(false)
    }

    /// `self[key] = value`, honoring `__newindex`.
    ///
    /// No-op on an empty handle. Errors raised by the assignment are
    /// logged and dropped.
    pub fn set<K, V>(&self, key: &K, value: &V)
    where
        K: Push + ?Sized,
        V: Push + ?Sized,
    {
        let Some(stack) = self.stack() else {
            return;
        };
        let _guard = StackGuard::new(stack);
        if !stack.ensure(5) {
            return;
        }
        self.push_onto(stack);
        if let Err(err) = protected::set(stack, -1, key, value) {
            tracing::warn!(target: "tether", error = %err, "field write raised");
        }
    }

    /// `rawset(self, key, value)`. No-op unless the handle is a table.
    ///
    /// Nil and NaN keys are ignored.
    pub fn set_raw<K, V>(&self, key: &K, value: &V)
    where
        K: Push + ?Sized,
        V: Push + ?Sized,
    {
        let Some(stack) = self.stack() else {
            return;
        };
        let _guard = StackGuard::new(stack);
        if !stack.ensure(3) {
            return;
        }
        self.push_onto(stack);
        if stack.kind(-1) != Kind::Table {
            return;
        }
        stack.push(key);
        let bad_key = match stack.kind(-1) {
            Kind::Nil => true,
            Kind::Number => stack.receive::<f64>(-1).is_some_and(f64::is_nan),
            _ => false,
        };
        if bad_key {
            tracing::debug!(target: "tether", "ignoring raw set with nil or NaN key");
            return;
        }
        stack.push(value);
        unsafe { ffi::lua_rawset(stack.as_ptr(), -3) };
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call the referenced value with `args` in protected mode.
    ///
    /// Every result is captured as a handle, in order. Calling an empty
    /// handle returns no results.
    pub fn call<A: PushMany>(&self, args: A) -> Result<Vec<Ref>, VmError> {
        let (Some(stack), Some(anchor)) = (self.stack(), self.anchor.clone()) else {
            return Ok(Vec::new());
        };
        let guard = StackGuard::new(stack);
        let count = args.count();
        let Ok(nargs) = c_int::try_from(count) else {
            return Err(VmError::new(
                ErrorKind::RuntimeError,
                format!("too many arguments ({})", count),
            ));
        };
        if !stack.ensure(nargs + 1) {
            return Err(VmError::new(
                ErrorKind::OutOfMemory,
                "stack overflow while pushing arguments",
            ));
        }
        self.push_onto(stack);
        args.push_many(stack);
        let status = unsafe { ffi::lua_pcall(stack.as_ptr(), nargs, ffi::LUA_MULTRET, 0) };
        if status != ffi::LUA_OK {
            return Err(VmError::pop_from(stack, status));
        }
        if !stack.ensure(1) {
            return Err(VmError::new(
                ErrorKind::OutOfMemory,
                "stack overflow while capturing results",
            ));
        }
        let results = (guard.base() + 1..=stack.top())
            .map(|pos| Ref::capture(anchor.clone(), stack, pos))
            .collect();
        Ok(results)
    }

    // =========================================================================
    // Metatables
    // =========================================================================

    /// Attach `metatable` to the referenced table or opaque object.
    ///
    /// No-op across sessions, on other kinds, or when `metatable` is not a
    /// table.
    pub fn set_metatable(&self, metatable: &Ref) {
        if !self.same_session(metatable) {
            return;
        }
        if !matches!(self.kind(), Kind::Table | Kind::OpaqueObject) || !metatable.holds(Kind::Table)
        {
            return;
        }
        let Some(stack) = self.stack() else {
            return;
        };
        let _guard = StackGuard::new(stack);
        if !stack.ensure(2) {
            return;
        }
        self.push_onto(stack);
        metatable.push_onto(stack);
        unsafe { ffi::lua_setmetatable(stack.as_ptr(), -2) };
    }

    /// The metatable of the referenced value, empty if it has none.
    pub fn metatable(&self) -> Ref {
        let Some(anchor) = self.anchor.clone() else {
            return Ref::empty();
        };
        self.with_pushed(|stack| {
            if !stack.ensure(1) {
                return Ref::empty();
            }
            if unsafe { ffi::lua_getmetatable(stack.as_ptr(), -1) } != 0 {
                Ref::pop_from(anchor, stack)
            } else {
                Ref::empty()
            }
        })
        .unwrap_or_default()
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Binary chunk of the referenced script function.
    ///
    /// Empty for other kinds or when dumping fails. The bytes reload with
    /// [`Vm::load_bytes`].
    pub fn dump(&self, strip: bool) -> Vec<u8> {
        if !self.holds(Kind::Function) {
            return Vec::new();
        }
        self.with_pushed(|stack| {
            let mut out = Vec::new();
            let status = unsafe {
                ffi::lua_dump(
                    stack.as_ptr(),
                    write_chunk,
                    &mut out as *mut Vec<u8> as *mut c_void,
                    strip as c_int,
                )
            };
            if status != 0 { Vec::new() } else { out }
        })
        .unwrap_or_default()
    }

    // =========================================================================
    // Lifetime
    // =========================================================================

    /// Move the binding out, leaving this handle empty.
    pub fn take(&mut self) -> Ref {
        std::mem::take(self)
    }

    /// Release the slot. Idempotent; the handle is empty afterwards.
    pub fn destroy(&mut self) {
        if let Some(stack) = self.stack() {
            if self.slot != ffi::LUA_REFNIL {
                tracing::trace!(target: "tether", slot = self.slot, "registry unref");
                unsafe { ffi::luaL_unref(stack.as_ptr(), ffi::LUA_REGISTRYINDEX, self.slot) };
            }
        }
        self.anchor = None;
        self.slot = ffi::LUA_NOREF;
    }

    /// Point this handle at the value currently on top of `stack`, popping
    /// it and reusing the slot when one is held.
    pub(crate) fn replace_from_top(&mut self, anchor: &Rc<Anchor>, stack: Stack) {
        let reusable = self.slot > 0 && self.anchor().is_some_and(|a| Rc::ptr_eq(a, anchor));
        if reusable && stack.kind(-1) != Kind::Nil {
            unsafe {
                ffi::lua_rawseti(
                    stack.as_ptr(),
                    ffi::LUA_REGISTRYINDEX,
                    self.slot as ffi::lua_Integer,
                )
            };
        } else {
            *self = Ref::pop_from(anchor.clone(), stack);
        }
    }

    pub fn iter(&self) -> RefIter<'_> {
        RefIter::new(self)
    }
}

unsafe extern "C-unwind" fn write_chunk(
    _state: *mut ffi::lua_State,
    data: *const c_void,
    size: usize,
    out: *mut c_void,
) -> c_int {
    let out = &mut *(out as *mut Vec<u8>);
    out.extend_from_slice(std::slice::from_raw_parts(data as *const u8, size));
    0
}

impl Default for Ref {
    fn default() -> Self {
        Ref::empty()
    }
}

impl Clone for Ref {
    /// Registers a new, independent slot for the same value.
    fn clone(&self) -> Self {
        let (Some(stack), Some(anchor)) = (self.stack(), self.anchor.clone()) else {
            return Ref::empty();
        };
        if self.slot == ffi::LUA_REFNIL {
            return Ref {
                anchor: Some(anchor),
                slot: ffi::LUA_REFNIL,
            };
        }
        if !stack.ensure(1) {
            return Ref::empty();
        }
        self.push_onto(stack);
        Ref::pop_from(anchor, stack)
    }
}

impl Drop for Ref {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl PartialEq for Ref {
    /// Raw equality. Handles of different sessions are never equal; two
    /// empty handles are.
    fn eq(&self, other: &Ref) -> bool {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => return true,
            (true, true) => {}
            _ => return false,
        }
        if !self.same_session(other) {
            return false;
        }
        if self.slot == other.slot {
            return true;
        }
        let Some(stack) = self.stack() else {
            return false;
        };
        let _guard = StackGuard::new(stack);
        if !stack.ensure(2) {
            return false;
        }
        self.push_onto(stack);
        other.push_onto(stack);
        stack.raw_equal(-1, -2)
    }
}

impl Push for Ref {
    fn push(&self, stack: Stack) {
        debug_assert!(
            self.stack().is_none_or(|own| own.as_ptr() == stack.main_thread().as_ptr()),
            "pushing a handle onto a stack of another session"
        );
        self.push_onto(stack);
    }
}

impl Receive for Ref {
    const KINDS: KindSet = KindSet::VALUES;

    fn receive(stack: Stack, pos: c_int) -> Option<Self> {
        if stack.kind(pos) == Kind::None {
            return None;
        }
        let anchor = Anchor::recover(stack)?;
        if stack.kind(pos) == Kind::Nil {
            return Some(Ref {
                anchor: Some(anchor),
                slot: ffi::LUA_REFNIL,
            });
        }
        Some(Ref::capture(anchor, stack, pos))
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("slot", &self.slot)
            .field("kind", &self.kind())
            .finish()
    }
}

impl fmt::Display for Ref {
    /// Tables and functions print as `kind: address`, like `tostring` does.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Kind::None => write!(f, "<empty>"),
            kind @ (Kind::Table | Kind::Function | Kind::NativeFunction) => {
                let ptr = self
                    .with_pushed(|stack| unsafe { ffi::lua_topointer(stack.as_ptr(), -1) })
                    .unwrap_or(std::ptr::null());
                let name = if kind == Kind::Table { "table" } else { "function" };
                write!(f, "{}: {:p}", name, ptr)
            }
            _ => match self.as_::<Value>() {
                Some(value) => write!(f, "{}", value),
                None => write!(f, "<empty>"),
            },
        }
    }
}

impl<'a> IntoIterator for &'a Ref {
    type Item = (Ref, Ref);
    type IntoIter = RefIter<'a>;

    fn into_iter(self) -> RefIter<'a> {
        self.iter()
    }
}
