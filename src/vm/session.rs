//! The VM session: owns one Lua state and hands out handles into it.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ffi::c_int;
use std::path::Path;
use std::rc::Rc;

use mlua_sys as ffi;

use super::error::{ErrorKind, VmError};
use super::load::{self, Mode};
use super::path::StringPath;
use super::protected;
use crate::config::SessionConfig;
use crate::function::{
    self, FromStack, HostFunction, HostMethod, IntoReturn, Opaque, push_class_metatable,
    push_gc_metatable,
};
use crate::reference::{Anchor, Ref};
use crate::stack::{Kind, Push, Stack, StackGuard};

/// An embedded Lua 5.4 interpreter.
///
/// A default session is closed; [`open`](Vm::open) creates the state and
/// [`close`](Vm::close) (or drop) destroys it. Every [`Ref`] handed out
/// by the session becomes empty when it closes.
///
/// # Example
/// ```no_run
/// use tether::Vm;
///
/// let mut vm = Vm::new();
/// vm.open(true, 20).unwrap();
/// vm.register_function("add", |a: i64, b: i64| a + b);
/// let results = vm.execute_string("return add(1, 2)", None).unwrap();
/// assert_eq!(results[0].as_::<i64>(), Some(3));
/// ```
pub struct Vm {
    state: *mut ffi::lua_State,
    anchor: Option<Rc<Anchor>>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm {
            state: std::ptr::null_mut(),
            anchor: None,
        }
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm::default()
    }

    /// Create and open a session in one step.
    pub fn with_config(config: &SessionConfig) -> Result<Self, VmError> {
        let mut vm = Vm::new();
        vm.open_with(config)?;
        Ok(vm)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the session.
    ///
    /// Does nothing if the session is already open.
    ///
    /// # Arguments
    /// - `std_libs`: load the standard libraries
    /// - `stack_reserve`: stack slots to reserve up front
    ///
    /// # Returns
    /// `OutOfMemory` if the state or the stack reservation cannot be
    /// allocated.
    pub fn open(&mut self, std_libs: bool, stack_reserve: i32) -> Result<(), VmError> {
        if self.is_open() {
            return Ok(());
        }
        let state = unsafe { ffi::luaL_newstate() };
        if state.is_null() {
            return Err(VmError::new(ErrorKind::OutOfMemory, "cannot create state"));
        }
        if stack_reserve > 0 && unsafe { ffi::lua_checkstack(state, stack_reserve) } == 0 {
            unsafe { ffi::lua_close(state) };
            return Err(VmError::new(
                ErrorKind::OutOfMemory,
                format!("cannot reserve {} stack slots", stack_reserve),
            ));
        }
        if std_libs {
            unsafe { ffi::luaL_openlibs(state) };
        }
        self.anchor = Some(unsafe { Anchor::install(state) });
        self.state = state;
        tracing::debug!(target: "tether", std_libs, stack_reserve, "session opened");
        Ok(())
    }

    /// Open the session from a [`SessionConfig`].
    pub fn open_with(&mut self, config: &SessionConfig) -> Result<(), VmError> {
        if self.is_open() {
            return Ok(());
        }
        self.open(config.std_libs, config.stack_reserve)?;
        if let Some(prefix) = &config.package_path {
            let package = self.globals().get_ref("package");
            let current = package.get_as::<String, _>("path").unwrap_or_default();
            let joined = if current.is_empty() {
                prefix.clone()
            } else {
                format!("{};{}", prefix, current)
            };
            package.set("path", joined.as_str());
        }
        Ok(())
    }

    /// Close the session. Idempotent.
    pub fn close(&mut self) {
        if self.state.is_null() {
            return;
        }
        let state = std::mem::replace(&mut self.state, std::ptr::null_mut());
        if let Some(anchor) = self.anchor.take() {
            // Handles released by finalizers during lua_close must not touch the state.
            unsafe { anchor.uninstall() };
        }
        unsafe { ffi::lua_close(state) };
        tracing::debug!(target: "tether", "session closed");
    }

    pub fn is_open(&self) -> bool {
        !self.state.is_null()
    }

    pub(crate) fn anchor(&self) -> Option<&Rc<Anchor>> {
        self.anchor.as_ref()
    }

    /// The main stack, `None` when closed.
    pub fn stack(&self) -> Option<Stack> {
        if self.state.is_null() {
            None
        } else {
            Some(unsafe { Stack::from_raw(self.state) })
        }
    }

    /// Stack and anchor of an open session.
    fn session(&self, operation: &str) -> Option<(Stack, &Rc<Anchor>)> {
        debug_assert!(self.is_open(), "{} on a closed session", operation);
        Some((self.stack()?, self.anchor.as_ref()?))
    }

    /// The root thread of the VM owning `stack`, from any of its coroutines.
    pub fn main_thread(stack: Stack) -> Stack {
        stack.main_thread()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Compile `source` without running it.
    pub fn load_string(&self, source: &str) -> Result<Ref, VmError> {
        self.load_with(|stack| load::load_buffer(stack, source.as_bytes(), source, Mode::Text))
    }

    /// Compile a file without running it.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Ref, VmError> {
        let path = path.as_ref();
        self.load_with(|stack| load::load_file(stack, path))
    }

    /// Load a chunk from bytes, text or a binary chunk from [`Ref::dump`].
    pub fn load_bytes(&self, bytes: &[u8], name: &str) -> Result<Ref, VmError> {
        self.load_with(|stack| load::load_buffer(stack, bytes, name, Mode::Any))
    }

    fn load_with(&self, load: impl FnOnce(Stack) -> Result<(), VmError>) -> Result<Ref, VmError> {
        let Some((stack, anchor)) = self.session("load") else {
            return Err(VmError::closed());
        };
        let _guard = StackGuard::new(stack);
        load(stack)?;
        Ok(Ref::pop_from(anchor.clone(), stack))
    }

    /// Compile and run `source`, returning every result.
    ///
    /// When `env` is a table it replaces the chunk's global environment.
    pub fn execute_string(&self, source: &str, env: Option<&Ref>) -> Result<Vec<Ref>, VmError> {
        let chunk = self.load_string(source)?;
        self.run_chunk(&chunk, env)
    }

    /// Compile and run the file at `path`, returning every result.
    pub fn execute_file(
        &self,
        path: impl AsRef<Path>,
        env: Option<&Ref>,
    ) -> Result<Vec<Ref>, VmError> {
        let chunk = self.load_file(path)?;
        self.run_chunk(&chunk, env)
    }

    fn run_chunk(&self, chunk: &Ref, env: Option<&Ref>) -> Result<Vec<Ref>, VmError> {
        if let Some(env) = env {
            self.set_environment(chunk, env)?;
        }
        chunk.call(())
    }

    /// Replace the first upvalue (`_ENV`) of a freshly loaded chunk.
    fn set_environment(&self, chunk: &Ref, env: &Ref) -> Result<(), VmError> {
        if !env.holds(Kind::Table) || !env.same_session(chunk) {
            return Err(VmError::new(
                ErrorKind::RuntimeError,
                format!("environment must be a table of this session, got {}", env.kind()),
            ));
        }
        let Some((stack, _)) = self.session("set_environment") else {
            return Err(VmError::closed());
        };
        let _guard = StackGuard::new(stack);
        stack.push(chunk);
        stack.push(env);
        let name = unsafe { ffi::lua_setupvalue(stack.as_ptr(), -2, 1) };
        if name.is_null() {
            tracing::debug!(target: "tether", "chunk has no environment upvalue");
        }
        Ok(())
    }

    // =========================================================================
    // Globals
    // =========================================================================

    /// The global table.
    pub fn globals(&self) -> Ref {
        let Some((stack, anchor)) = self.session("globals") else {
            return Ref::empty();
        };
        unsafe {
            ffi::lua_rawgeti(
                stack.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
        }
        Ref::pop_from(anchor.clone(), stack)
    }

    /// Resolve a dotted path against the globals.
    ///
    /// Empty if the path is invalid, a lookup raises, or any segment
    /// resolves to nil. Later segments are not evaluated after a nil.
    pub fn get(&self, path: &StringPath) -> Ref {
        if !path.is_valid() {
            return Ref::empty();
        }
        let Some((stack, anchor)) = self.session("get") else {
            return Ref::empty();
        };
        let _guard = StackGuard::new(stack);
        if !stack.ensure(4) {
            return Ref::empty();
        }
        unsafe {
            ffi::lua_rawgeti(
                stack.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
        }
        for segment in path {
            if let Err(err) = protected::get(stack, -1, segment.as_str()) {
                tracing::warn!(target: "tether", path = %path, error = %err, "path lookup raised");
                return Ref::empty();
            }
            if stack.kind(-1) == Kind::Nil {
                return Ref::empty();
            }
            unsafe { ffi::lua_remove(stack.as_ptr(), -2) };
        }
        Ref::pop_from(anchor.clone(), stack)
    }

    /// Assign a global.
    pub fn create_global<V: Push + ?Sized>(&self, name: &str, value: &V) {
        self.globals().set(name, value);
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Create a table with preallocated array and hash parts.
    ///
    /// With `name` the table is also stored as that global.
    pub fn create_table(&self, narr: usize, nrec: usize, name: Option<&str>) -> Ref {
        let Some((stack, anchor)) = self.session("create_table") else {
            return Ref::empty();
        };
        let narr = c_int::try_from(narr).unwrap_or(c_int::MAX);
        let nrec = c_int::try_from(nrec).unwrap_or(c_int::MAX);
        unsafe { ffi::lua_createtable(stack.as_ptr(), narr, nrec) };
        let table = Ref::pop_from(anchor.clone(), stack);
        if let Some(name) = name {
            self.create_global(name, &table);
        }
        table
    }

    /// Pin any pushable value.
    pub fn create_ref<V: Push + ?Sized>(&self, value: &V) -> Ref {
        let Some((stack, anchor)) = self.session("create_ref") else {
            return Ref::empty();
        };
        if !stack.ensure(1) {
            return Ref::empty();
        }
        stack.push_checked(value);
        Ref::pop_from(anchor.clone(), stack)
    }

    /// Move `value` into a new opaque object whose `__gc` drops it.
    pub fn allocate_userdata<T: 'static>(&self, value: T) -> Ref {
        let Some((stack, anchor)) = self.session("allocate_userdata") else {
            return Ref::empty();
        };
        if !stack.ensure(3) {
            return Ref::empty();
        }
        Opaque::push_new(stack, value);
        push_gc_metatable::<T>(stack);
        unsafe { ffi::lua_setmetatable(stack.as_ptr(), -2) };
        Ref::pop_from(anchor.clone(), stack)
    }

    /// A zero-filled opaque object of `size` bytes, without a metatable.
    pub fn allocate_raw_userdata(&self, size: usize) -> Ref {
        let Some((stack, anchor)) = self.session("allocate_raw_userdata") else {
            return Ref::empty();
        };
        unsafe {
            let block = ffi::lua_newuserdatauv(stack.as_ptr(), size, 0);
            std::ptr::write_bytes(block as *mut u8, 0, size);
        }
        Ref::pop_from(anchor.clone(), stack)
    }

    /// A new coroutine, kept alive by the returned handle.
    pub fn create_thread(&self) -> Ref {
        let Some((stack, anchor)) = self.session("create_thread") else {
            return Ref::empty();
        };
        unsafe { ffi::lua_newthread(stack.as_ptr()) };
        Ref::pop_from(anchor.clone(), stack)
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// Run a full collection cycle.
    pub fn collect_garbage(&self) {
        if let Some((stack, _)) = self.session("collect_garbage") {
            unsafe { ffi::lua_gc(stack.as_ptr(), ffi::LUA_GCCOLLECT, 0) };
        }
    }

    /// Bytes currently allocated by the VM.
    pub fn memory_used(&self) -> usize {
        let Some((stack, _)) = self.session("memory_used") else {
            return 0;
        };
        let (kbytes, bytes) = unsafe {
            (
                ffi::lua_gc(stack.as_ptr(), ffi::LUA_GCCOUNT, 0),
                ffi::lua_gc(stack.as_ptr(), ffi::LUA_GCCOUNTB, 0),
            )
        };
        usize::try_from(kbytes).unwrap_or(0) * 1024 + usize::try_from(bytes).unwrap_or(0)
    }

    // =========================================================================
    // Host functions
    // =========================================================================

    /// Wrap a Rust callable as a VM function.
    pub fn create_function<Args, F>(&self, f: F) -> Ref
    where
        F: HostFunction<Args>,
        F::Output: IntoReturn,
        Args: FromStack,
    {
        let Some((stack, anchor)) = self.session("create_function") else {
            return Ref::empty();
        };
        if !stack.ensure(4) {
            return Ref::empty();
        }
        function::push_function(stack, f);
        Ref::pop_from(anchor.clone(), stack)
    }

    /// Wrap `f` and store it as the global `name`.
    pub fn register_function<Args, F>(&self, name: &str, f: F)
    where
        F: HostFunction<Args>,
        F::Output: IntoReturn,
        Args: FromStack,
    {
        let function = self.create_function(f);
        self.create_global(name, &function);
    }

    /// Wrap `f(&mut T, ..)` as a method of objects created for `T`.
    ///
    /// The receiver is the argument before the declared ones, so
    /// `obj:method(a, b)` works as usual.
    pub fn create_method<T, Args, F>(&self, f: F) -> Ref
    where
        T: 'static,
        F: HostMethod<T, Args>,
        Args: FromStack,
    {
        let Some((stack, anchor)) = self.session("create_method") else {
            return Ref::empty();
        };
        if !stack.ensure(4) {
            return Ref::empty();
        }
        function::push_method(stack, f);
        Ref::pop_from(anchor.clone(), stack)
    }

    /// Wrap `f(..) -> T` as a constructor called as `ctor(metatable, ..)`.
    ///
    /// The new object holds the returned `T` and gets `metatable`
    /// attached. Give the metatable a `__gc` (see [`Vm::class_metatable`])
    /// or the value is never dropped.
    pub fn create_constructor<T, Args, F>(&self, f: F) -> Ref
    where
        T: 'static,
        F: HostFunction<Args, Output = T>,
        Args: FromStack,
    {
        let Some((stack, anchor)) = self.session("create_constructor") else {
            return Ref::empty();
        };
        if !stack.ensure(4) {
            return Ref::empty();
        }
        function::push_constructor(stack, f);
        Ref::pop_from(anchor.clone(), stack)
    }

    /// A metatable for `T` objects with `__gc` dropping the value and
    /// `__index` pointing at the table itself.
    pub fn class_metatable<T: 'static>(&self) -> Ref {
        let Some((stack, anchor)) = self.session("class_metatable") else {
            return Ref::empty();
        };
        if !stack.ensure(3) {
            return Ref::empty();
        }
        push_class_metatable::<T>(stack);
        Ref::pop_from(anchor.clone(), stack)
    }

    /// Raw pointer of the main state, null when closed.
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state)
            .field("open", &self.is_open())
            .finish()
    }
}
