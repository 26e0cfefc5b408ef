//! Host function wrappers.
//!
//! Wrapping a Rust callable produces a C closure whose single upvalue is
//! an opaque object owning the callable. The generated thunk checks the
//! argument count, reads the arguments through
//! [`Receive`](crate::Receive), invokes the callable and pushes its
//! result through [`IntoReturn`].
//!
//! Failures are raised as script errors. A raise unwinds with `longjmp`,
//! so thunks first compute a `Result` in a separate frame, leaving only
//! plain data alive when the error is thrown.

#![allow(unsafe_op_in_unsafe_fn)]

mod args;
mod userdata;

use std::any::{Any, type_name};
use std::ffi::c_int;
use std::mem::size_of;
use std::panic::{AssertUnwindSafe, catch_unwind};

use mlua_sys as ffi;

pub use args::{FromStack, HostFunction, HostMethod, IntoReturn, PushMany};
pub use userdata::destructor;
pub(crate) use userdata::{Opaque, push_class_metatable, push_gc_metatable};

use crate::stack::{Kind, Stack};

/// Raise `message` as a script error. Never returns.
///
/// # Safety
///
/// Must only be called from a C function invoked by the VM, with no
/// value needing `Drop` alive in any Rust frame between here and the VM.
pub(crate) unsafe fn raise(stack: Stack, message: String) -> c_int {
    stack.push(message.as_str());
    drop(message);
    ffi::lua_error(stack.as_ptr())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("host function panicked: {}", detail)
}

fn too_few_arguments(stack: Stack, expected: c_int) -> String {
    let received = stack.top();
    stack.pop(received);
    format!(
        "expected {} arguments but received {}",
        expected, received
    )
}

// ===== Closure storage =====

type Slot<F> = Option<Box<F>>;

unsafe extern "C-unwind" fn release_callable<F: 'static>(state: *mut ffi::lua_State) -> c_int {
    let slot = ffi::lua_touserdata(state, 1) as *mut Slot<F>;
    if !slot.is_null() {
        drop((*slot).take());
    }
    0
}

/// Push an opaque object owning `f`, with a `__gc` that drops it.
fn push_callable<F: 'static>(stack: Stack, f: F) {
    let state = stack.as_ptr();
    unsafe {
        let slot = ffi::lua_newuserdatauv(state, size_of::<Slot<F>>(), 0) as *mut Slot<F>;
        slot.write(Some(Box::new(f)));
        ffi::lua_createtable(state, 0, 2);
        ffi::lua_pushcfunction(state, release_callable::<F>);
        ffi::lua_setfield(state, -2, c"__gc".as_ptr());
        ffi::lua_pushboolean(state, 0);
        ffi::lua_setfield(state, -2, c"__metatable".as_ptr());
        ffi::lua_setmetatable(state, -2);
    }
}

/// The callable owned by the running closure's first upvalue.
fn callable<'a, F: 'static>(stack: Stack) -> Result<&'a F, String> {
    let slot = unsafe {
        ffi::lua_touserdata(stack.as_ptr(), ffi::lua_upvalueindex(1)) as *const Slot<F>
    };
    if slot.is_null() {
        return Err("host function has no state".to_string());
    }
    unsafe { (*slot).as_deref() }.ok_or_else(|| "host function was released".to_string())
}

// ===== Free functions =====

unsafe extern "C-unwind" fn function_thunk<F, Args>(state: *mut ffi::lua_State) -> c_int
where
    F: HostFunction<Args>,
    F::Output: IntoReturn,
    Args: FromStack,
{
    let stack = Stack::from_raw(state);
    match call_function::<F, Args>(stack) {
        Ok(count) => count,
        Err(message) => raise(stack, message),
    }
}

fn call_function<F, Args>(stack: Stack) -> Result<c_int, String>
where
    F: HostFunction<Args>,
    F::Output: IntoReturn,
    Args: FromStack,
{
    let f = callable::<F>(stack)?;
    let top = stack.top();
    if top < Args::COUNT {
        return Err(too_few_arguments(stack, Args::COUNT));
    }
    let first = top - Args::COUNT + 1;
    let args = Args::from_stack(stack, first)?;
    let output = catch_unwind(AssertUnwindSafe(|| f.invoke(args))).map_err(panic_message)?;
    stack.set_top(first - 1);
    output.into_return(stack)
}

/// Push `f` as a VM function.
pub(crate) fn push_function<F, Args>(stack: Stack, f: F)
where
    F: HostFunction<Args>,
    F::Output: IntoReturn,
    Args: FromStack,
{
    push_callable(stack, f);
    unsafe { ffi::lua_pushcclosure(stack.as_ptr(), function_thunk::<F, Args>, 1) };
}

// ===== Methods =====

unsafe extern "C-unwind" fn method_thunk<T, F, Args>(state: *mut ffi::lua_State) -> c_int
where
    T: 'static,
    F: HostMethod<T, Args>,
    Args: FromStack,
{
    let stack = Stack::from_raw(state);
    match call_method::<T, F, Args>(stack) {
        Ok(count) => count,
        Err(message) => raise(stack, message),
    }
}

fn call_method<T, F, Args>(stack: Stack) -> Result<c_int, String>
where
    T: 'static,
    F: HostMethod<T, Args>,
    Args: FromStack,
{
    let f = callable::<F>(stack)?;
    let top = stack.top();
    if top < Args::COUNT + 1 {
        return Err(too_few_arguments(stack, Args::COUNT + 1));
    }
    let receiver = top - Args::COUNT;
    let bad_self = || {
        format!(
            "bad self: expected {}, got {}",
            type_name::<T>(),
            stack.kind(receiver)
        )
    };
    let object = Opaque::<T>::at(stack, receiver).ok_or_else(bad_self)?;
    unsafe {
        if !Opaque::is_alive(object) {
            return Err(format!("bad self: {} was already destroyed", type_name::<T>()));
        }
        if Opaque::is_borrowed(object) {
            return Err(format!("bad self: {} is already in use", type_name::<T>()));
        }
    }
    let args = Args::from_stack(stack, receiver + 1)?;
    let output = catch_unwind(AssertUnwindSafe(|| unsafe {
        Opaque::with_value(object, |this| f.invoke(this, args))
    }))
    .map_err(panic_message)?;
    stack.set_top(receiver - 1);
    output.into_return(stack)
}

pub(crate) fn push_method<T, F, Args>(stack: Stack, f: F)
where
    T: 'static,
    F: HostMethod<T, Args>,
    Args: FromStack,
{
    push_callable(stack, f);
    unsafe { ffi::lua_pushcclosure(stack.as_ptr(), method_thunk::<T, F, Args>, 1) };
}

// ===== Constructors =====

unsafe extern "C-unwind" fn constructor_thunk<T, F, Args>(state: *mut ffi::lua_State) -> c_int
where
    T: 'static,
    F: HostFunction<Args, Output = T>,
    Args: FromStack,
{
    let stack = Stack::from_raw(state);
    match call_constructor::<T, F, Args>(stack) {
        Ok(count) => count,
        Err(message) => raise(stack, message),
    }
}

fn call_constructor<T, F, Args>(stack: Stack) -> Result<c_int, String>
where
    T: 'static,
    F: HostFunction<Args, Output = T>,
    Args: FromStack,
{
    let f = callable::<F>(stack)?;
    let top = stack.top();
    if top < Args::COUNT + 1 {
        return Err(too_few_arguments(stack, Args::COUNT + 1));
    }
    let metatable = top - Args::COUNT;
    if stack.kind(metatable) != Kind::Table {
        return Err(format!(
            "bad metatable: expected Table, got {}",
            stack.kind(metatable)
        ));
    }
    let args = Args::from_stack(stack, metatable + 1)?;
    let value = catch_unwind(AssertUnwindSafe(|| f.invoke(args))).map_err(panic_message)?;
    stack.set_top(metatable);
    Opaque::push_new(stack, value);
    unsafe {
        ffi::lua_pushvalue(stack.as_ptr(), metatable);
        ffi::lua_setmetatable(stack.as_ptr(), -2);
    }
    Ok(1)
}

pub(crate) fn push_constructor<T, F, Args>(stack: Stack, f: F)
where
    T: 'static,
    F: HostFunction<Args, Output = T>,
    Args: FromStack,
{
    push_callable(stack, f);
    unsafe { ffi::lua_pushcclosure(stack.as_ptr(), constructor_thunk::<T, F, Args>, 1) };
}
