//! Naming: heap-copied names, literal labels, replacement and leak balance.

use arbor::{Backend, Heap};
use std::cell::{Cell, RefCell};
use std::ptr;

thread_local! {
    static ALLOCS: Cell<usize> = const { Cell::new(0) };
    static FREES: Cell<usize> = const { Cell::new(0) };
    static ERRORS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

unsafe fn counting_alloc(size: usize) -> *mut u8 {
    ALLOCS.with(|c| c.set(c.get() + 1));
    libc::malloc(size).cast()
}

unsafe fn counting_resize(ptr: *mut u8, size: usize) -> *mut u8 {
    libc::realloc(ptr.cast(), size).cast()
}

unsafe fn counting_free(ptr: *mut u8) {
    FREES.with(|c| c.set(c.get() + 1));
    libc::free(ptr.cast());
}

fn record_error(msg: &str) {
    ERRORS.with(|e| e.borrow_mut().push(msg.to_owned()));
}

fn counting_backend() -> Backend {
    ALLOCS.with(|c| c.set(0));
    FREES.with(|c| c.set(0));
    ERRORS.with(|e| e.borrow_mut().clear());
    Backend {
        alloc: counting_alloc,
        resize: counting_resize,
        free: counting_free,
        error: record_error,
    }
}

fn balance() -> (usize, usize) {
    (ALLOCS.with(Cell::get), FREES.with(Cell::get))
}

#[test]
fn heap_name_round_trip() {
    let heap = Heap::new();
    unsafe {
        let x = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        assert_eq!(heap.name(x), None);

        heap.set_name(x, "alpha").unwrap();
        assert_eq!(heap.name(x), Some("alpha"));

        heap.set_name(x, "beta").unwrap();
        assert_eq!(heap.name(x), Some("beta"));

        heap.free(x);
    }
}

#[test]
fn literal_label_is_the_name() {
    let heap = Heap::new();
    unsafe {
        let x = heap.alloc(ptr::null_mut(), 16, false, Some("widget")).unwrap();
        assert_eq!(heap.name(x), Some("widget"));
        heap.free(x);
    }
}

#[test]
fn heap_name_replaces_literal_label() {
    let heap = Heap::new();
    unsafe {
        let x = heap.alloc(ptr::null_mut(), 16, false, Some("label")).unwrap();
        heap.set_name(x, "proper").unwrap();
        assert_eq!(heap.name(x), Some("proper"));
        heap.free(x);
    }
}

#[test]
fn literal_replaces_heap_name_without_leaking() {
    let heap = Heap::with_backend(counting_backend());
    unsafe {
        let n = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        heap.set_name(n, "alpha").unwrap();
        let (allocs_before, frees_before) = balance();

        heap.set_name_literal(n, "beta").unwrap();
        assert_eq!(heap.name(n), Some("beta"));

        // The heap-allocated "alpha" record went back to the backend and the
        // literal cost nothing.
        let (allocs_after, frees_after) = balance();
        assert_eq!(allocs_after, allocs_before);
        assert_eq!(frees_after, frees_before + 1);

        heap.free(n);
        let (allocs, frees) = balance();
        assert_eq!(allocs, frees);
        assert!(ERRORS.with(|e| e.borrow().is_empty()));
    }
}

#[test]
fn repeated_set_name_does_not_leak() {
    let heap = Heap::with_backend(counting_backend());
    unsafe {
        let x = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        for name in ["one", "two", "three", "four"] {
            heap.set_name(x, name).unwrap();
        }
        assert_eq!(heap.name(x), Some("four"));
        heap.free(x);

        let (allocs, frees) = balance();
        assert_eq!(allocs, frees);
    }
}

#[test]
fn empty_literal_falls_back_to_a_copy() {
    let heap = Heap::with_backend(counting_backend());
    unsafe {
        let x = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let (allocs_before, _) = balance();

        heap.set_name_literal(x, "").unwrap();
        assert_eq!(heap.name(x), Some(""));

        let (allocs_after, _) = balance();
        assert_eq!(allocs_after, allocs_before + 1);

        heap.free(x);
        let (allocs, frees) = balance();
        assert_eq!(allocs, frees);
    }
}

#[test]
fn re_literal_of_a_literal_is_shape_noop() {
    let heap = Heap::with_backend(counting_backend());
    unsafe {
        let p = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let x = heap.alloc(p, 16, false, None).unwrap();
        heap.set_name_literal(x, "lit").unwrap();
        heap.set_name_literal(x, "lit").unwrap();

        assert_eq!(heap.name(x), Some("lit"));
        assert_eq!(heap.parent(x), p);
        assert_eq!(heap.first(p), x);
        assert!(heap.next(p, x).is_null());

        heap.free(p);
        let (allocs, frees) = balance();
        assert_eq!(allocs, frees);
    }
}
