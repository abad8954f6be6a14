//! End-to-end tests against a real spawned host process.

use kiln_remote::{RemoteConfig, RemoteEngine};
use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

fn hostd() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kiln-hostd"))
}

fn library_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Core.ncl"), "{ add = fun a b => a + b }").unwrap();
    dir
}

fn loaded_engine(root: &TempDir) -> RemoteEngine {
    let mut engine = RemoteEngine::new(RemoteConfig {
        hostd: hostd(),
        library_roots: vec![root.path().to_path_buf()],
    });
    engine.load_context(Some("test"));
    assert!(engine.is_loaded());
    engine
}

#[test]
fn compile_and_execute_across_the_boundary() {
    let root = library_root();
    let mut engine = loaded_engine(&root);

    assert!(engine.add_usings("using Core;"));
    let report = engine.compile_code("Core.add 20 22").unwrap();
    assert!(!report.has_errors());
    assert_eq!(engine.execute_last_script().as_deref(), Some("42"));

    engine.unload_context();
    assert!(!engine.is_loaded());
}

#[test]
fn calls_without_a_context_degrade_to_absence() {
    let mut engine = RemoteEngine::new(RemoteConfig {
        hostd: hostd(),
        library_roots: Vec::new(),
    });

    assert!(!engine.add_usings("using Core;"));
    assert!(engine.compile_code("1 + 1").is_none());
    assert!(engine.execute_last_script().is_none());
}

#[test]
fn compile_failure_reports_diagnostics_and_fires_the_failure_hook() {
    let root = library_root();
    let mut engine = loaded_engine(&root);

    let failures = Rc::new(Cell::new(0u32));
    let f = Rc::clone(&failures);
    engine.add_on_failure(Box::new(move |_| f.set(f.get() + 1)));

    let report = engine.compile_code("unbound_name").unwrap();
    assert!(report.has_errors());
    assert_eq!(failures.get(), 1);

    // The host survived the failed compile.
    let report = engine.compile_code("1 + 1").unwrap();
    assert!(!report.has_errors());
    assert_eq!(engine.execute_last_script().as_deref(), Some("2"));
}

#[test]
fn coroutine_steps_cross_the_boundary_one_at_a_time() {
    let root = library_root();
    let mut engine = loaded_engine(&root);

    let report = engine.compile_coroutine("[1, 2]").unwrap();
    assert!(!report.has_errors());
    assert_eq!(engine.advance_coroutine().as_deref(), Some("1"));
    assert_eq!(engine.advance_coroutine().as_deref(), Some("2"));
    assert!(engine.advance_coroutine().is_none());
}

#[test]
fn non_array_coroutine_reports_a_compile_failure() {
    let root = library_root();
    let mut engine = loaded_engine(&root);

    let failures = Rc::new(Cell::new(0u32));
    let f = Rc::clone(&failures);
    engine.add_on_failure(Box::new(move |_| f.set(f.get() + 1)));

    let report = engine.compile_coroutine("5").unwrap();
    assert!(report.has_errors());
    assert_eq!(failures.get(), 1);
    assert!(engine.advance_coroutine().is_none());
}

#[test]
fn types_compile_and_remove_on_the_host() {
    let root = library_root();
    let mut engine = loaded_engine(&root);

    let report = engine.compile_type("T", "{ value = 7 }").unwrap();
    assert!(!report.has_errors());

    let report = engine.compile_code("T.value").unwrap();
    assert!(!report.has_errors());
    assert_eq!(engine.execute_last_script().as_deref(), Some("7"));

    assert!(engine.remove_types(&["T"]));
    let report = engine.compile_code("T.value").unwrap();
    assert!(report.has_errors());
}

#[test]
fn double_load_and_stray_unload_are_noops() {
    let root = library_root();
    let mut engine = loaded_engine(&root);
    engine.load_context(None);
    assert!(engine.is_loaded());

    engine.unload_context();
    engine.unload_context();
    assert!(!engine.is_loaded());
}

#[test]
fn reset_discards_host_state() {
    let root = library_root();
    let mut engine = loaded_engine(&root);

    engine.compile_code("1 + 1").unwrap();
    assert!(engine.reset());
    assert!(engine.execute_last_script().is_none());
}
