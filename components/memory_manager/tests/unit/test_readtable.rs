//! Unit tests for readtables stored on the heap

use memory_manager::{Heap, Readtable, SyntaxType, READTABLE_SIZE};

#[test]
fn test_allocated_readtable_is_standard() {
    let heap = Heap::new();
    let handle = heap.allocate_readtable().unwrap();
    let readtable = handle.readtable().unwrap();

    for ch in ['\t', '\n', '\r', ' '] {
        assert_eq!(readtable.syntax_type(ch), SyntaxType::Whitespace);
    }
    for ch in ['"', '\'', '(', ')', ',', ';', '`'] {
        assert_eq!(readtable.syntax_type(ch), SyntaxType::TerminatingMacro);
    }
    assert_eq!(readtable.syntax_type('#'), SyntaxType::NonTerminatingMacro);
    assert!(readtable.is_dispatch_macro_character('#'));
    assert_eq!(readtable.dispatch_len('#'), 0);
}

#[test]
fn test_every_code_is_classified() {
    let readtable = Readtable::standard();
    let constituents = (0..READTABLE_SIZE as u8)
        .filter(|&code| readtable.syntax_type(code as char) == SyntaxType::Constituent)
        .count();
    // 5 whitespace, 7 terminating, 1 non-terminating, 2 escapes, 2 invalid
    assert_eq!(constituents, READTABLE_SIZE - 17);
}

#[test]
fn test_dispatch_sub_character_is_case_insensitive() {
    let heap = Heap::new();
    let handle = heap.allocate_readtable().unwrap();
    let function = heap.allocate_symbol("READ-BITS").unwrap();

    assert!(handle.set_dispatch_macro('#', 'b', Some(&function)).unwrap());
    let bound = handle.dispatch_macro('#', 'B').unwrap().unwrap();
    assert!(bound.ptr_eq(&function));
    assert_eq!(handle.readtable().unwrap().dispatch_len('#'), 1);
}

#[test]
fn test_custom_dispatch_character() {
    let heap = Heap::new();
    let handle = heap.allocate_readtable().unwrap();
    let function = heap.allocate_symbol("READ-BANG").unwrap();

    assert!(!handle.set_dispatch_macro('!', 'x', Some(&function)).unwrap());
    assert!(handle
        .readtable()
        .unwrap()
        .make_dispatch_macro_character('!', true));
    assert!(handle.set_dispatch_macro('!', 'x', Some(&function)).unwrap());
    assert!(handle.dispatch_macro('!', 'X').unwrap().is_some());
}

#[test]
fn test_dispatch_functions_survive_collection() {
    let heap = Heap::new();
    let handle = heap.allocate_readtable().unwrap();
    {
        let function = heap.allocate_symbol("READ-VECTOR").unwrap();
        handle.set_dispatch_macro('#', '(', Some(&function)).unwrap();
    }

    let stats = heap.collect_garbage();
    assert_eq!(stats.last_reclaimed, 0);
    let function = handle.dispatch_macro('#', '(').unwrap().unwrap();
    assert_eq!(function.symbol_name().unwrap(), "READ-VECTOR");

    drop(function);
    handle.set_dispatch_macro('#', '(', None).unwrap();
    let stats = heap.collect_garbage();
    assert_eq!(stats.last_reclaimed, 1);
}
