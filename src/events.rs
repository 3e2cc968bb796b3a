//! Lifecycle events and notifier callback types.
//!
//! Notifiers subscribe to a subset of [`Notify`] and receive the event plus a
//! [`NotifyInfo`] argument. Destructors are a restricted notifier form that
//! fires on [`Notify::FREE`] only and receives just the dying allocation.
//!
//! Callbacks get the owning [`Heap`] as their first argument so that they can
//! re-enter the allocator (allocate, free, steal, rename) on any node,
//! including the one they were invoked on.

use crate::heap::Heap;
use bitflags::bitflags;

bitflags! {
    /// Events a notifier can subscribe to.
    ///
    /// Combine with bitwise OR: `Notify::FREE | Notify::STEAL`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Notify: u32 {
        /// The allocation (or an ancestor) is being freed.
        const FREE = 1 << 0;
        /// The allocation was moved to a new parent.
        const STEAL = 1 << 1;
        /// A resize moved the backing memory; info holds the old address.
        const MOVE = 1 << 2;
        /// The allocation was resized; info holds the new payload byte size.
        const RESIZE = 1 << 3;
        /// The allocation's name changed.
        const RENAME = 1 << 4;
        /// A child was attached to this allocation.
        const ADD_CHILD = 1 << 5;
        /// A child was detached from this allocation.
        const DEL_CHILD = 1 << 6;
        /// A notifier was registered on this allocation.
        const ADD_NOTIFIER = 1 << 7;
        /// A notifier was removed from this allocation.
        const DEL_NOTIFIER = 1 << 8;
    }
}

/// Event argument delivered alongside the event type.
#[derive(Debug, Clone, Copy)]
pub enum NotifyInfo {
    /// No argument beyond the event itself (RENAME, ADD_NOTIFIER,
    /// DEL_NOTIFIER).
    None,
    /// A peer allocation: the root being freed on FREE, the new parent on
    /// STEAL, the old address on MOVE, the child on ADD_CHILD/DEL_CHILD.
    Node(*mut u8),
    /// The new payload size in bytes on RESIZE.
    Size(usize),
}

/// General notifier callback: `(heap, payload, event, info)`.
pub type NotifyFn = fn(&Heap, *mut u8, Notify, NotifyInfo);

/// Destructor callback: `(heap, payload)`, fired on FREE only, before the
/// subtree below `payload` is dismantled.
pub type DestroyFn = fn(&Heap, *mut u8);
