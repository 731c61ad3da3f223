//! End-to-end tests: a small evaluator-shaped workload on one heap.

use core_types::{HeapError, TypeTag};
use integration_tests::Environment;
use memory_manager::{BackgroundCollector, GcConfig, Handle, Heap};
use std::sync::Arc;
use std::thread;

/// Builds `(name . value)` pairs for every name, interning into `package`.
fn make_alist<'h>(
    heap: &'h Heap,
    package: &Handle<'h>,
    names: &[&str],
) -> Result<Handle<'h>, HeapError> {
    let mut alist = heap.nil();
    for (i, name) in names.iter().enumerate() {
        let symbol = package.package_intern(name)?;
        let value = heap.allocate_fixnum(i as i64)?;
        let pair = heap.allocate_cons(&symbol, &value)?;
        alist = heap.allocate_cons(&pair, &alist)?;
    }
    Ok(alist)
}

fn assoc<'h>(alist: &Handle<'h>, name: &str) -> Result<Option<Handle<'h>>, HeapError> {
    let mut cursor = alist.clone();
    while !cursor.is_nil()? {
        let pair = cursor.car()?;
        if pair.car()?.symbol_name()? == name {
            return Ok(Some(pair.cdr()?));
        }
        cursor = cursor.cdr()?;
    }
    Ok(None)
}

/// Test: an association list built from interned symbols survives collection
#[test]
fn test_alist_lookup_after_collection() {
    let heap = Heap::new();
    let mut env = Environment::new();
    let package = heap.allocate_package("CL-USER").unwrap();

    let alist = make_alist(&heap, &package, &["A", "B", "C"]).unwrap();
    env.set_special("*env*", alist);
    heap.collect(&env);

    let alist = env.lookup("*env*").unwrap();
    let value = assoc(&alist, "B").unwrap().unwrap();
    assert_eq!(value.fixnum().unwrap(), 1);
    assert!(assoc(&alist, "Z").unwrap().is_none());
    assert_eq!(package.package_len().unwrap(), 3);
}

/// Test: errors from the object model propagate with their tags
#[test]
fn test_type_errors_propagate() {
    let heap = Heap::new();
    let number = heap.allocate_fixnum(5).unwrap();
    let err = assoc(&number, "A").unwrap_err();
    assert_eq!(
        err,
        HeapError::WrongType {
            expected: TypeTag::Cons,
            found: TypeTag::Fixnum,
        }
    );
}

/// Test: several evaluator threads share a heap with a background collector
#[test]
fn test_threads_with_background_collector() {
    let heap = Arc::new(Heap::with_config(GcConfig {
        background: true,
        collect_interval_ms: 2,
        ..GcConfig::default()
    }));
    let collector = BackgroundCollector::for_heap(&heap).unwrap();
    assert!(collector.is_some());

    let package = heap.allocate_package("SHARED").unwrap();
    let names = ["ALPHA", "BETA", "GAMMA", "DELTA"];
    thread::scope(|scope| {
        for t in 0..4 {
            let heap = &heap;
            let package = &package;
            scope.spawn(move || {
                for round in 0..50 {
                    let alist = make_alist(heap, package, &names).unwrap();
                    let value = assoc(&alist, names[(t + round) % names.len()])
                        .unwrap()
                        .unwrap();
                    assert_eq!(value.fixnum().unwrap(), ((t + round) % names.len()) as i64);
                }
            });
        }
    });

    drop(collector);
    heap.collect_garbage();
    // only the package and its four symbols remain
    assert_eq!(heap.object_count(), 5);
}
