//! Tree-shape behavior: attach, free, steal, traversal, re-entrancy.

use arbor::{Heap, Notify, NotifyInfo};
use std::cell::{Cell, RefCell};
use std::ptr;

thread_local! {
    static DESTROYED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    static RUNS: Cell<usize> = const { Cell::new(0) };
    static STEALS: Cell<usize> = const { Cell::new(0) };
}

fn record_destroy(_h: &Heap, me: *mut u8) {
    DESTROYED.with(|d| d.borrow_mut().push(me as usize));
}

fn count_steal(_h: &Heap, _ctx: *mut u8, event: Notify, _info: NotifyInfo) {
    assert_eq!(event, Notify::STEAL);
    STEALS.with(|c| c.set(c.get() + 1));
}

#[test]
fn parents_are_recorded() {
    let heap = Heap::new();
    unsafe {
        let a = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let b = heap.alloc(a, 16, false, None).unwrap();
        let c = heap.alloc(a, 16, false, None).unwrap();

        assert_eq!(heap.parent(b), a);
        assert_eq!(heap.parent(c), a);
        assert!(heap.parent(a).is_null());
        assert!(heap.parent(ptr::null()).is_null());

        heap.free(a);
    }
}

#[test]
fn free_tears_down_whole_subtree_depth_first() {
    let heap = Heap::new();
    unsafe {
        let a = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let b = heap.alloc(a, 16, false, None).unwrap();
        let c = heap.alloc(a, 16, false, None).unwrap();
        heap.add_destructor(a, record_destroy).unwrap();
        heap.add_destructor(b, record_destroy).unwrap();
        heap.add_destructor(c, record_destroy).unwrap();

        DESTROYED.with(|d| d.borrow_mut().clear());
        heap.free(a);

        // The dying root observes its children first; children then go down
        // most-recently-attached first.
        let order = DESTROYED.with(|d| d.borrow().clone());
        assert_eq!(order, vec![a as usize, c as usize, b as usize]);
        assert!(heap.first(ptr::null_mut()).is_null());
    }
}

#[test]
fn free_of_null_is_a_no_op() {
    let heap = Heap::new();
    unsafe {
        heap.free(ptr::null_mut());
        assert!(heap.first(ptr::null_mut()).is_null());
    }
}

#[test]
fn free_does_not_touch_siblings() {
    let heap = Heap::new();
    unsafe {
        let p = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let x = heap.alloc(p, 16, false, None).unwrap();
        let y = heap.alloc(p, 16, false, None).unwrap();

        heap.free(x);

        assert_eq!(heap.parent(y), p);
        assert_eq!(heap.first(p), y);
        assert!(heap.next(p, y).is_null());
        heap.free(p);
    }
}

#[test]
fn steal_to_null_detaches_from_parent() {
    let heap = Heap::new();
    unsafe {
        let p = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let q = heap.alloc(p, 16, false, None).unwrap();
        heap.add_notifier(q, Notify::STEAL, count_steal).unwrap();

        STEALS.with(|c| c.set(0));
        assert_eq!(heap.steal(ptr::null_mut(), q).unwrap(), q);
        assert_eq!(STEALS.with(Cell::get), 1);

        assert!(heap.parent(q).is_null());
        assert!(heap.first(p).is_null());

        // q survives its old parent.
        heap.free(p);
        assert!(heap.parent(q).is_null());
        heap.free(q);
    }
}

#[test]
fn steal_chain_ends_up_under_final_parent() {
    let heap = Heap::new();
    unsafe {
        let p = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let q = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let x = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        heap.add_notifier(x, Notify::STEAL, count_steal).unwrap();

        STEALS.with(|c| c.set(0));
        let x1 = heap.steal(q, x).unwrap();
        let x2 = heap.steal(p, x1).unwrap();
        assert_eq!(STEALS.with(Cell::get), 2);

        assert_eq!(heap.parent(x2), p);
        assert!(heap.first(q).is_null());
        assert_eq!(heap.first(p), x2);

        heap.free(p);
        heap.free(q);
    }
}

#[test]
fn steal_to_own_parent_is_shape_noop() {
    let heap = Heap::new();
    unsafe {
        let p = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let q = heap.alloc(p, 16, false, None).unwrap();
        heap.add_notifier(q, Notify::STEAL, count_steal).unwrap();

        STEALS.with(|c| c.set(0));
        let back = heap.steal(heap.parent(q), q).unwrap();
        assert_eq!(back, q);
        assert_eq!(STEALS.with(Cell::get), 1);
        assert_eq!(heap.parent(q), p);
        assert_eq!(heap.first(p), q);
        assert!(heap.next(p, q).is_null());

        heap.free(p);
    }
}

#[test]
fn steal_of_null_is_a_no_op() {
    let heap = Heap::new();
    unsafe {
        assert!(heap.steal(ptr::null_mut(), ptr::null_mut()).unwrap().is_null());
    }
}

#[test]
fn traversal_visits_each_descendant_once_in_preorder() {
    let heap = Heap::new();
    unsafe {
        let r = heap.alloc(ptr::null_mut(), 8, false, None).unwrap();
        let a = heap.alloc(r, 8, false, None).unwrap();
        let b = heap.alloc(r, 8, false, None).unwrap();
        let c = heap.alloc(a, 8, false, None).unwrap();
        let d = heap.alloc(a, 8, false, None).unwrap();

        let mut visited = Vec::new();
        let mut cursor = heap.first(r);
        while !cursor.is_null() {
            visited.push(cursor as usize);
            cursor = heap.next(r, cursor);
        }

        // Children walk most-recently-attached first; parents come before
        // their descendants.
        assert_eq!(
            visited,
            vec![b as usize, a as usize, d as usize, c as usize]
        );

        heap.free(r);
    }
}

#[test]
fn traversal_is_confined_to_the_root() {
    let heap = Heap::new();
    unsafe {
        let r = heap.alloc(ptr::null_mut(), 8, false, None).unwrap();
        let other = heap.alloc(ptr::null_mut(), 8, false, None).unwrap();
        let a = heap.alloc(r, 8, false, None).unwrap();

        assert_eq!(heap.first(r), a);
        assert!(heap.next(r, a).is_null());

        heap.free(r);
        heap.free(other);
    }
}

#[test]
fn reentrant_free_from_own_destructor_runs_once() {
    fn reenter(h: &Heap, me: *mut u8) {
        RUNS.with(|c| c.set(c.get() + 1));
        unsafe { h.free(me) };
    }

    let heap = Heap::new();
    unsafe {
        let m = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        heap.add_destructor(m, reenter).unwrap();

        RUNS.with(|c| c.set(0));
        heap.free(m);
        assert_eq!(RUNS.with(Cell::get), 1);
        assert!(heap.first(ptr::null_mut()).is_null());
    }
}

#[test]
fn destructor_freeing_a_sibling_keeps_the_child_list_sane() {
    thread_local! {
        static VICTIM: Cell<usize> = const { Cell::new(0) };
    }

    fn free_sibling(h: &Heap, _me: *mut u8) {
        let victim = VICTIM.with(Cell::get) as *mut u8;
        if !victim.is_null() {
            VICTIM.with(|v| v.set(0));
            unsafe { h.free(victim) };
        }
    }

    let heap = Heap::new();
    unsafe {
        let p = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let x = heap.alloc(p, 16, false, None).unwrap();
        let _y = heap.alloc(p, 16, false, None).unwrap();
        let z = heap.alloc(p, 16, false, None).unwrap();

        heap.add_destructor(x, record_destroy).unwrap();
        heap.add_destructor(z, free_sibling).unwrap();
        heap.add_destructor(z, record_destroy).unwrap();
        VICTIM.with(|v| v.set(x as usize));

        DESTROYED.with(|d| d.borrow_mut().clear());
        heap.free(p);

        // x went down exactly once, via z's destructor.
        let order = DESTROYED.with(|d| d.borrow().clone());
        assert_eq!(order, vec![z as usize, x as usize]);
        assert!(heap.first(ptr::null_mut()).is_null());
    }
}

#[test]
fn heap_drop_frees_leftovers() {
    let heap = Heap::new();
    unsafe {
        let a = heap.alloc(ptr::null_mut(), 16, false, None).unwrap();
        let _b = heap.alloc(a, 16, false, None).unwrap();
        heap.add_destructor(a, record_destroy).unwrap();

        DESTROYED.with(|d| d.borrow_mut().clear());
        drop(heap);
        let order = DESTROYED.with(|d| d.borrow().clone());
        assert_eq!(order, vec![a as usize]);
    }
}
