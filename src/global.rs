//! Thread-local default heap and free-function mirrors of the API.
//!
//! Most programs want exactly one ownership forest; these wrappers route to
//! a lazily created per-thread [`Heap`] so callers need not thread a context
//! through. Independent heaps — for tests, failure injection, or isolated
//! subsystems — are constructed directly via [`Heap::new`] or
//! [`Heap::with_backend`] and used through their methods.
//!
//! Every wrapper has the same contract as the [`Heap`] method it forwards
//! to. The default heap is dropped at thread exit, freeing whatever the
//! thread left attached to its sentinel (destructors included).

use crate::backend::Backend;
use crate::error::Error;
use crate::events::{DestroyFn, Notify, NotifyFn};
use crate::heap::Heap;

thread_local! {
    static HEAP: Heap = Heap::new();
}

/// Run `f` against the calling thread's default heap.
pub fn with_default<R>(f: impl FnOnce(&Heap) -> R) -> R {
    HEAP.with(f)
}

/// [`Heap::set_backend`] on the default heap.
pub fn set_backend(backend: Backend) {
    HEAP.with(|h| h.set_backend(backend));
}

/// [`Heap::alloc`] on the default heap.
///
/// # Safety
/// As for [`Heap::alloc`].
pub unsafe fn alloc(
    parent: *mut u8,
    size: usize,
    clear: bool,
    label: Option<&'static str>,
) -> Result<*mut u8, Error> {
    HEAP.with(|h| h.alloc(parent, size, clear, label))
}

/// [`Heap::alloc_arr`] on the default heap.
///
/// # Safety
/// As for [`Heap::alloc_arr`].
pub unsafe fn alloc_arr(
    parent: *mut u8,
    size: usize,
    count: usize,
    clear: bool,
    add_count: bool,
    label: Option<&'static str>,
) -> Result<*mut u8, Error> {
    HEAP.with(|h| h.alloc_arr(parent, size, count, clear, add_count, label))
}

/// [`Heap::free`] on the default heap.
///
/// # Safety
/// As for [`Heap::free`].
pub unsafe fn free(ctx: *mut u8) {
    HEAP.with(|h| h.free(ctx));
}

/// [`Heap::steal`] on the default heap.
///
/// # Safety
/// As for [`Heap::steal`].
pub unsafe fn steal(new_parent: *mut u8, ctx: *mut u8) -> Result<*mut u8, Error> {
    HEAP.with(|h| h.steal(new_parent, ctx))
}

/// [`Heap::add_destructor`] on the default heap.
///
/// # Safety
/// As for [`Heap::add_destructor`].
pub unsafe fn add_destructor(ctx: *mut u8, destroy: DestroyFn) -> Result<(), Error> {
    HEAP.with(|h| h.add_destructor(ctx, destroy))
}

/// [`Heap::del_destructor`] on the default heap.
///
/// # Safety
/// As for [`Heap::del_destructor`].
pub unsafe fn del_destructor(ctx: *mut u8, destroy: DestroyFn) -> bool {
    HEAP.with(|h| h.del_destructor(ctx, destroy))
}

/// [`Heap::add_notifier`] on the default heap.
///
/// # Safety
/// As for [`Heap::add_notifier`].
pub unsafe fn add_notifier(ctx: *mut u8, types: Notify, callback: NotifyFn) -> Result<(), Error> {
    HEAP.with(|h| h.add_notifier(ctx, types, callback))
}

/// [`Heap::del_notifier`] on the default heap.
///
/// # Safety
/// As for [`Heap::del_notifier`].
pub unsafe fn del_notifier(ctx: *mut u8, callback: NotifyFn) -> bool {
    HEAP.with(|h| h.del_notifier(ctx, callback))
}

/// [`Heap::set_name`] on the default heap.
///
/// # Safety
/// As for [`Heap::set_name`].
pub unsafe fn set_name(ctx: *mut u8, name: &str) -> Result<(), Error> {
    HEAP.with(|h| h.set_name(ctx, name))
}

/// [`Heap::set_name_literal`] on the default heap.
///
/// # Safety
/// As for [`Heap::set_name_literal`].
pub unsafe fn set_name_literal(ctx: *mut u8, name: &'static str) -> Result<(), Error> {
    HEAP.with(|h| h.set_name_literal(ctx, name))
}

/// [`Heap::name`] on the default heap, copied out because the borrow cannot
/// leave the thread-local scope.
///
/// # Safety
/// As for [`Heap::name`].
pub unsafe fn name(ctx: *const u8) -> Option<String> {
    HEAP.with(|h| h.name(ctx).map(str::to_owned))
}

/// [`Heap::count`] on the default heap.
///
/// # Safety
/// As for [`Heap::count`].
pub unsafe fn count(ctx: *const u8) -> usize {
    HEAP.with(|h| h.count(ctx))
}

/// [`Heap::resize`] on the default heap.
///
/// # Safety
/// As for [`Heap::resize`].
pub unsafe fn resize(ctx: &mut *mut u8, size: usize, count: usize) -> Result<(), Error> {
    HEAP.with(|h| h.resize(ctx, size, count))
}

/// [`Heap::expand`] on the default heap.
///
/// # Safety
/// As for [`Heap::expand`].
pub unsafe fn expand(
    ctx: &mut *mut u8,
    src: *const u8,
    size: usize,
    count: usize,
) -> Result<(), Error> {
    HEAP.with(|h| h.expand(ctx, src, size, count))
}

/// [`Heap::dup`] on the default heap.
///
/// # Safety
/// As for [`Heap::dup`].
pub unsafe fn dup(
    parent: *mut u8,
    src: *const u8,
    size: usize,
    n: usize,
    extra: usize,
    add_count: bool,
    label: Option<&'static str>,
) -> Result<*mut u8, Error> {
    HEAP.with(|h| h.dup(parent, src, size, n, extra, add_count, label))
}

/// [`Heap::first`] on the default heap.
///
/// # Safety
/// As for [`Heap::first`].
pub unsafe fn first(root: *mut u8) -> *mut u8 {
    HEAP.with(|h| h.first(root))
}

/// [`Heap::next`] on the default heap.
///
/// # Safety
/// As for [`Heap::next`].
pub unsafe fn next(root: *mut u8, prev: *const u8) -> *mut u8 {
    HEAP.with(|h| h.next(root, prev))
}

/// [`Heap::parent`] on the default heap.
///
/// # Safety
/// As for [`Heap::parent`].
pub unsafe fn parent(ctx: *const u8) -> *mut u8 {
    HEAP.with(|h| h.parent(ctx))
}

/// [`Heap::check`] on the default heap.
///
/// # Safety
/// As for [`Heap::check`].
pub unsafe fn check(ctx: *const u8, errorstr: Option<&str>) -> bool {
    HEAP.with(|h| h.check(ctx, errorstr))
}
