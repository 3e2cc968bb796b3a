//! Ownership-transfer marks consumed by `dup` and `expand`.
//!
//! Marking a pointer with [`take`] tells the next duplication that sees it
//! that the source is being handed over rather than borrowed: `dup` then
//! resizes and reparents the source in place instead of copying it, and
//! failing paths free it instead of leaking it.
//!
//! Marks are per-thread, matching the allocator's single-threaded model.

use std::cell::RefCell;

thread_local! {
    static TAKEN: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Mark `p` as ownership-transferred and pass it through.
///
/// Null pointers are passed through unmarked.
pub fn take<T>(p: *const T) -> *const T {
    if !p.is_null() {
        TAKEN.with(|t| t.borrow_mut().push(p as usize));
    }
    p
}

/// Consume a mark on `p`, returning whether one was present.
pub(crate) fn taken<T>(p: *const T) -> bool {
    if p.is_null() {
        return false;
    }
    TAKEN.with(|t| {
        let mut marks = t.borrow_mut();
        match marks.iter().position(|&q| q == p as usize) {
            Some(i) => {
                marks.swap_remove(i);
                true
            }
            None => false,
        }
    })
}

/// Report whether `p` is currently marked, without consuming the mark.
pub fn is_taken<T>(p: *const T) -> bool {
    TAKEN.with(|t| t.borrow().contains(&(p as usize)))
}

/// Drop every outstanding mark on the calling thread.
///
/// Marks are plain addresses; one left behind by a pointer that was freed
/// without passing through `dup`/`expand` would alias whatever allocation
/// later reuses that address. Heap teardown sweeps them.
pub(crate) fn cleanup() {
    TAKEN.with(|t| t.borrow_mut().clear());
}
