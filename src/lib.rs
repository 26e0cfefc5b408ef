//! Tether - type-safe Lua 5.4 embedding
//!
//! This library binds host Rust code to an embedded Lua interpreter:
//! values cross the boundary through the [`Push`]/[`Receive`] traits,
//! VM values are held from Rust through registry-backed [`Ref`] handles,
//! and Rust callables become script functions through [`Vm::create_function`].

pub mod config;
pub mod function;
pub mod reference;
pub mod stack;
pub mod vm;

/// Raw Lua C API.
pub use mlua_sys as ffi;

// Re-export commonly used types
pub use config::{ConfigError, SessionConfig};
pub use function::{FromStack, HostFunction, HostMethod, IntoReturn, PushMany, destructor};
pub use reference::{Ref, RefIter};
pub use stack::{
    Kind, KindSet, LightPointer, NativeFunction, Nil, OpaquePointer, Push, Receive, Stack,
    ThreadHandle, Value,
};
pub use vm::{ErrorKind, StringPath, Vm, VmError};
