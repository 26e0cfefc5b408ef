//! Session lifecycle, chunk execution and global lookup.

use std::path::{Path, PathBuf};

use tether::{ErrorKind, Kind, Ref, SessionConfig, StringPath, Vm};

fn open_vm() -> Vm {
    let mut vm = Vm::new();
    vm.open(true, 20).unwrap();
    vm
}

fn script(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("scripts")
        .join(name)
}

fn stack_height(vm: &Vm) -> i32 {
    vm.stack().unwrap().top()
}

// ===== Lifecycle =====

#[test]
fn test_default_session_is_closed() {
    let vm = Vm::new();
    assert!(!vm.is_open());
    assert!(vm.stack().is_none());
}

#[test]
fn test_open_is_idempotent() {
    let mut vm = open_vm();
    let state = vm.as_ptr();
    vm.open(true, 20).unwrap();
    assert_eq!(vm.as_ptr(), state);
    vm.close();
    vm.close();
    assert!(!vm.is_open());
}

#[test]
fn test_reopen_after_close() {
    let mut vm = open_vm();
    vm.close();
    vm.open(false, 20).unwrap();
    let results = vm.execute_string("return 7", None).unwrap();
    assert_eq!(results[0].as_::<i64>(), Some(7));
}

#[test]
fn test_without_std_libs() {
    let mut vm = Vm::new();
    vm.open(false, 20).unwrap();
    assert!(!vm.get(&StringPath::from("print")).is_valid());
    assert!(!vm.get(&StringPath::from("string.format")).is_valid());
}

#[test]
fn test_open_with_config() {
    let config = SessionConfig {
        package_path: Some("./scripts/?.lua".to_string()),
        ..SessionConfig::default()
    };
    let vm = Vm::with_config(&config).unwrap();
    let path = vm.get(&"package.path".into()).as_::<String>().unwrap();
    assert!(path.starts_with("./scripts/?.lua;"), "got {}", path);
}

#[test]
fn test_refs_are_empty_after_close() {
    let mut vm = open_vm();
    let table = vm.create_table(0, 0, None);
    let nil = Ref::nil(&vm);
    assert!(table.is_valid());
    assert!(nil.is_valid());

    vm.close();
    assert!(!table.is_valid());
    assert!(!nil.is_valid());
    assert_eq!(table.kind(), Kind::None);
    assert_eq!(table.as_::<i64>(), None);
    assert!(table.call(()).unwrap().is_empty());
    drop(table);
}

#[test]
fn test_main_thread_from_coroutine() {
    let vm = open_vm();
    let thread = vm.create_thread();
    assert_eq!(thread.kind(), Kind::Thread);
    let handle = thread.as_::<tether::ThreadHandle>().unwrap();
    let coroutine = unsafe { handle.stack() };
    assert_ne!(coroutine.as_ptr(), vm.as_ptr());
    assert_eq!(Vm::main_thread(coroutine).as_ptr(), vm.as_ptr());
}

// ===== Execution =====

#[test]
fn test_execute_string_returns_results() {
    let vm = open_vm();
    let results = vm.execute_string("return 1+1", None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind(), Kind::Integer);
    assert_eq!(results[0].as_::<i64>(), Some(2));
}

#[test]
fn test_execute_string_multiple_results() {
    let vm = open_vm();
    let results = vm
        .execute_string("return {1}, 'x', 1.5, nil, true", None)
        .unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].kind(), Kind::Table);
    assert_eq!(results[1].as_::<String>().as_deref(), Some("x"));
    assert_eq!(results[2].as_::<f64>(), Some(1.5));
    assert!(results[3].is_valid());
    assert!(results[3].is_nil());
    assert_eq!(results[4].as_::<bool>(), Some(true));
}

#[test]
fn test_execute_string_many_results() {
    let vm = open_vm();
    let results = vm
        .execute_string("local t = {} for i = 1, 30 do t[i] = i end return table.unpack(t)", None)
        .unwrap();
    assert_eq!(results.len(), 30);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.as_::<i64>(), Some(i as i64 + 1));
    }
    assert_eq!(stack_height(&vm), 0);
}

#[test]
fn test_syntax_error_is_classified() {
    let vm = open_vm();
    let err = vm.execute_string("syntax (((", None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(!err.message.is_empty());
}

#[test]
fn test_runtime_error_is_classified() {
    let vm = open_vm();
    let err = vm.execute_string("error('boom')", None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeError);
    assert!(err.message.contains("boom"), "got {}", err.message);
}

#[test]
fn test_non_string_error_object() {
    let vm = open_vm();
    let err = vm.execute_string("error({})", None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeError);
    assert_eq!(err.message, "(error object is a Table value)");
}

#[test]
fn test_load_string_does_not_run() {
    let vm = open_vm();
    let chunk = vm.load_string("counter = (counter or 0) + 1").unwrap();
    assert_eq!(chunk.kind(), Kind::Function);
    assert!(!vm.get(&"counter".into()).is_valid());
    chunk.call(()).unwrap();
    chunk.call(()).unwrap();
    assert_eq!(vm.get(&"counter".into()).as_::<i64>(), Some(2));
}

#[test]
fn test_execute_file() {
    let vm = open_vm();
    let results = vm.execute_file(script("vectors.lua"), None).unwrap();
    assert_eq!(results.len(), 1);
    let module = &results[0];
    let length = module.get_ref("length");
    let out = length.call((3.0, 4.0)).unwrap();
    assert_eq!(out[0].as_::<f64>(), Some(5.0));
    assert!(module.get_ref("origin").holds(Kind::Table));
}

#[test]
fn test_execute_file_syntax_error() {
    let vm = open_vm();
    let err = vm.execute_file(script("broken.lua"), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn test_missing_file() {
    let vm = open_vm();
    let dir = tempfile::tempdir().unwrap();
    let err = vm.load_file(dir.path().join("nope.lua")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileNotFound);
}

#[test]
fn test_execute_temp_file() {
    let vm = open_vm();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("answer.lua");
    std::fs::write(&path, "local a, b = ... return 40 + 2").unwrap();
    let results = vm.execute_file(&path, None).unwrap();
    assert_eq!(results[0].as_::<i64>(), Some(42));
}

#[test]
fn test_environment_table() {
    let vm = open_vm();
    let env = vm.create_table(0, 2, None);
    env.set("x", &10);

    let results = vm.execute_string("y = x * 2 return x", Some(&env)).unwrap();
    assert_eq!(results[0].as_::<i64>(), Some(10));
    assert_eq!(env.get_as::<i64, _>("y"), Some(20));
    assert!(!vm.get(&"y".into()).is_valid());
}

#[test]
fn test_environment_must_be_table() {
    let vm = open_vm();
    let not_a_table = vm.create_ref(&5);
    let err = vm.execute_string("return 1", Some(&not_a_table)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

#[test]
fn test_dump_and_reload() {
    let vm = open_vm();
    let results = vm
        .execute_string("local function double(x) return x * 2 end return double", None)
        .unwrap();
    let bytes = results[0].dump(false);
    assert!(!bytes.is_empty());

    let reloaded = vm.load_bytes(&bytes, "=double").unwrap();
    let out = reloaded.call((21,)).unwrap();
    assert_eq!(out[0].as_::<i64>(), Some(42));
}

#[test]
fn test_dump_wrong_kind_is_empty() {
    let vm = open_vm();
    assert!(vm.create_ref(&"text").dump(true).is_empty());
    assert!(vm.create_function(|| 1).dump(false).is_empty());
    assert!(Ref::empty().dump(false).is_empty());
}

// ===== Globals and paths =====

#[test]
fn test_get_path() {
    let vm = open_vm();
    vm.execute_string("a = {b = {c = 42}}", None).unwrap();
    let path: StringPath = "a.b.c".parse().unwrap();
    assert_eq!(vm.get(&path).as_::<i64>(), Some(42));
}

#[test]
fn test_get_path_stops_at_nil() {
    let vm = open_vm();
    vm.execute_string("a = {b = nil}", None).unwrap();
    assert!(!vm.get(&"a.b.c".into()).is_valid());
    assert!(!vm.get(&"missing.b".into()).is_valid());
    assert!(!vm.get(&StringPath::new()).is_valid());
}

#[test]
fn test_get_path_through_non_table() {
    let vm = open_vm();
    vm.execute_string("a = {b = 5}", None).unwrap();
    assert!(!vm.get(&"a.b.c".into()).is_valid());
}

#[test]
fn test_create_global_and_named_table() {
    let vm = open_vm();
    vm.create_global("answer", &42);
    let config = vm.create_table(0, 1, Some("config"));
    config.set("name", "tether");

    let results = vm
        .execute_string("return answer, config.name", None)
        .unwrap();
    assert_eq!(results[0].as_::<i64>(), Some(42));
    assert_eq!(results[1].as_::<String>().as_deref(), Some("tether"));
}

#[test]
fn test_globals_table() {
    let vm = open_vm();
    let globals = vm.globals();
    globals.set("flag", &true);
    assert_eq!(vm.get(&"flag".into()).as_::<bool>(), Some(true));
    assert!(globals.has_field("print", tether::KindSet::CALLABLE));
}

// ===== Memory =====

#[test]
fn test_memory_accounting() {
    let vm = open_vm();
    let before = vm.memory_used();
    assert!(before > 0);
    let big = vm.create_table(10_000, 0, None);
    assert!(vm.memory_used() > before);
    drop(big);
    vm.collect_garbage();
}

#[test]
fn test_raw_userdata_is_zeroed() {
    let vm = open_vm();
    let block = vm.allocate_raw_userdata(64);
    assert_eq!(block.kind(), Kind::OpaqueObject);
    assert_eq!(block.len(), 64);
    let ptr = block.as_::<tether::OpaquePointer>().unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(ptr.0 as *const u8, 64) };
    assert!(bytes.iter().all(|&b| b == 0));
    assert!(!block.metatable().is_valid());
}

// ===== Stack balance =====

#[test]
fn test_operations_leave_stack_balanced() {
    let vm = open_vm();
    assert_eq!(stack_height(&vm), 0);

    let table = vm.create_table(0, 0, Some("t"));
    table.set("k", "v");
    table.set_raw(&1, &2);
    let _ = table.get("k");
    let _ = table.get_raw(&1);
    let _ = table.has_field("k", tether::KindSet::ALL);
    let _ = table.kind();
    let _ = table.len();
    let _ = table.iter().count();
    let _ = vm.get(&"t.k".into());
    let _ = vm.get(&"t.k.deeper".into());
    let _ = vm.execute_string("return 1, 2, 3", None).unwrap();
    let _ = vm.execute_string("error('x')", None).unwrap_err();
    let _ = vm.execute_string("(((", None).unwrap_err();
    let _ = table.clone() == table;
    table.traverse(|_| {}, true, true, usize::MAX);

    assert_eq!(stack_height(&vm), 0);
}
