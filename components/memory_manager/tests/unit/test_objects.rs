//! Unit tests for object variants accessed through handles

use memory_manager::{ErrorKind, Heap, HeapError, MarkColor, ObjectData, TypeTag};

#[test]
fn test_every_variant_has_its_tag() {
    let heap = Heap::new();
    let cases = [
        (heap.nil(), TypeTag::Nil),
        (heap.allocate_fixnum(1).unwrap(), TypeTag::Fixnum),
        (
            heap.allocate_cons(&heap.nil(), &heap.nil()).unwrap(),
            TypeTag::Cons,
        ),
        (heap.allocate_string("s").unwrap(), TypeTag::String),
        (heap.allocate_symbol("S").unwrap(), TypeTag::Symbol),
        (heap.allocate_package("P").unwrap(), TypeTag::Package),
        (heap.allocate_readtable().unwrap(), TypeTag::Readtable),
    ];
    for (handle, tag) in &cases {
        assert_eq!(handle.tag().unwrap(), *tag);
        assert_eq!(handle.get().unwrap().data().tag(), *tag);
    }
}

#[test]
fn test_new_objects_are_white() {
    let heap = Heap::new();
    let number = heap.allocate_fixnum(3).unwrap();
    assert_eq!(number.get().unwrap().mark_color(), MarkColor::White);
}

#[test]
fn test_cons_slots_start_set() {
    let heap = Heap::new();
    let cell = heap.allocate_cons(&heap.nil(), &heap.nil()).unwrap();
    match cell.get().unwrap().data() {
        ObjectData::Cons { car, cdr } => {
            assert!(car.is_set());
            assert!(cdr.is_set());
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(cell.car().unwrap().is_nil().unwrap());
}

#[test]
fn test_accessor_on_wrong_variant() {
    let heap = Heap::new();
    let string = heap.allocate_string("text").unwrap();

    let err = string.symbol_name().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongType);
    assert_eq!(
        err,
        HeapError::WrongType {
            expected: TypeTag::Symbol,
            found: TypeTag::String,
        }
    );
    assert!(string.package_len().is_err());
    assert!(string.readtable().is_err());
    assert!(heap.nil().fixnum().is_err());
}

#[test]
fn test_empty_handle_in_allocation() {
    let heap = Heap::new();
    let mut value = heap.allocate_fixnum(1).unwrap();
    let _moved = value.take();

    let err = heap.allocate_cons(&value, &heap.nil()).unwrap_err();
    assert_eq!(err, HeapError::InvalidHandle);
}

#[test]
fn test_foreign_handle_in_allocation() {
    let heap = Heap::new();
    let other = Heap::new();
    let foreign = other.allocate_fixnum(1).unwrap();

    let err = heap.allocate_cons(&foreign, &heap.nil()).unwrap_err();
    assert_eq!(err, HeapError::InvalidHandle);
    assert!(!heap.is_registered(&foreign));
}

#[test]
fn test_string_is_mutable() {
    let heap = Heap::new();
    let string = heap.allocate_string("").unwrap();
    for word in ["a", "b", "c"] {
        string.string_push_str(word).unwrap();
    }
    assert_eq!(string.string_value().unwrap(), "abc");
    assert_eq!(string.string_len().unwrap(), 3);
}

#[test]
fn test_symbol_name_is_kept() {
    let heap = Heap::new();
    let symbol = heap.allocate_symbol("MULTIPLE-VALUE-BIND").unwrap();
    assert_eq!(symbol.symbol_name().unwrap(), "MULTIPLE-VALUE-BIND");
    assert!(symbol.home_package().unwrap().is_none());
}

#[test]
fn test_package_table_listing() {
    let heap = Heap::new();
    let package = heap.allocate_package("COMMON-LISP").unwrap();
    for name in ["LIST", "CONS", "ATOM"] {
        package.package_intern(name).unwrap();
    }

    let symbols = package.package_symbols().unwrap();
    assert_eq!(symbols.len(), 3);
    assert!(symbols.contains("CONS"));
    assert!(!symbols.contains("CAR"));
    assert_eq!(symbols.names(), vec!["ATOM", "CONS", "LIST"]);
}

#[test]
fn test_package_insert_rejects_non_symbol() {
    let heap = Heap::new();
    let package = heap.allocate_package("P").unwrap();
    let number = heap.allocate_fixnum(1).unwrap();

    assert_eq!(
        package.package_insert(&number).unwrap_err(),
        HeapError::WrongType {
            expected: TypeTag::Symbol,
            found: TypeTag::Fixnum,
        }
    );
    assert_eq!(package.package_len().unwrap(), 0);
}

#[test]
fn test_uninterned_symbol_is_not_found() {
    let heap = Heap::new();
    let package = heap.allocate_package("P").unwrap();
    let _loose = heap.allocate_symbol("LOOSE").unwrap();
    assert!(package.package_find("LOOSE").unwrap().is_none());
}
