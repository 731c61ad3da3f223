//! Unit tests for collection running alongside mutator threads

use memory_manager::{BackgroundCollector, GcConfig, Handle, Heap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn build_list(heap: &Heap, values: impl Iterator<Item = i64>) -> Handle<'_> {
    let mut list = heap.nil();
    for value in values {
        let number = heap.allocate_fixnum(value).unwrap();
        list = heap.allocate_cons(&number, &list).unwrap();
    }
    list
}

fn list_values(list: &Handle<'_>) -> Vec<i64> {
    let mut values = Vec::new();
    let mut cursor = list.clone();
    while !cursor.is_nil().unwrap() {
        values.push(cursor.car().unwrap().fixnum().unwrap());
        cursor = cursor.cdr().unwrap();
    }
    values
}

fn reverse_in_place<'h>(heap: &'h Heap, list: Handle<'h>) -> Handle<'h> {
    let mut previous = heap.nil();
    let mut cursor = list;
    while !cursor.is_nil().unwrap() {
        let next = cursor.cdr().unwrap();
        cursor.set_cdr(&previous).unwrap();
        previous = cursor;
        cursor = next;
    }
    previous
}

#[test]
fn test_lists_survive_concurrent_collection() {
    const THREADS: i64 = 4;
    const LENGTH: i64 = 500;

    let heap = Heap::new();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let collector = scope.spawn(|| {
            let mut cycles = 0;
            loop {
                heap.collect_garbage();
                cycles += 1;
                if done.load(Ordering::SeqCst) {
                    break cycles;
                }
            }
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let heap = &heap;
                scope.spawn(move || {
                    let base = t * 10_000;
                    let list = build_list(heap, base..base + LENGTH);
                    let reversed = reverse_in_place(heap, list);
                    list_values(&reversed)
                })
            })
            .collect();

        for (t, worker) in workers.into_iter().enumerate() {
            let base = t as i64 * 10_000;
            let values = worker.join().unwrap();
            let expected: Vec<i64> = (base..base + LENGTH).collect();
            assert_eq!(values, expected);
        }

        done.store(true, Ordering::SeqCst);
        assert!(collector.join().unwrap() >= 1);
    });

    heap.collect_garbage();
    assert_eq!(heap.object_count(), 0);
    assert_eq!(heap.stats().live_objects, 0);
}

#[test]
fn test_slot_overwrites_during_collection() {
    let heap = Heap::new();
    let cell = heap.allocate_cons(&heap.nil(), &heap.nil()).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                heap.collect_garbage();
            }
        });
        for i in 0..2000 {
            let value = heap.allocate_fixnum(i).unwrap();
            cell.set_car(&value).unwrap();
            drop(value);
            assert_eq!(cell.car().unwrap().fixnum().unwrap(), i);
        }
        done.store(true, Ordering::SeqCst);
    });

    heap.collect_garbage();
    assert_eq!(heap.object_count(), 2);
    assert_eq!(cell.car().unwrap().fixnum().unwrap(), 1999);
}

#[test]
fn test_interning_during_collection() {
    let heap = Heap::new();
    let package = heap.allocate_package("KEYWORD").unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                heap.collect_garbage();
            }
        });
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let package = &package;
                scope.spawn(move || {
                    for i in 0..200 {
                        let name = format!("SYM-{i}");
                        let symbol = package.package_intern(&name).unwrap();
                        assert_eq!(symbol.symbol_name().unwrap(), name);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(package.package_len().unwrap(), 200);
    heap.collect_garbage();
    // losing symbols from concurrent interns are garbage once collected
    assert_eq!(heap.object_count(), 201);
    let symbol = package.package_find("SYM-7").unwrap().unwrap();
    assert!(symbol.home_package().unwrap().unwrap().ptr_eq(&package));
}

#[test]
fn test_background_collector_with_mutators() {
    let heap = Arc::new(Heap::with_config(GcConfig {
        background: true,
        collect_interval_ms: 1,
        ..GcConfig::default()
    }));
    let mut collector = BackgroundCollector::for_heap(&heap).unwrap().unwrap();
    assert!(collector.is_running());

    let list = build_list(&heap, 0..300);
    for _ in 0..50 {
        drop(heap.allocate_string("scratch").unwrap());
    }
    collector.trigger();
    thread::sleep(Duration::from_millis(20));

    let expected: Vec<i64> = (0..300).rev().collect();
    assert_eq!(list_values(&list), expected);

    collector.stop();
    assert!(!collector.is_running());
    drop(list);
    heap.collect_garbage();
    assert_eq!(heap.object_count(), 0);
}
