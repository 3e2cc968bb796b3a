//! # `arbor` — hierarchical ownership-tree allocator
//!
//! Every allocation made through this crate is attached to a parent
//! allocation, forming a forest of ownership trees: freeing a node frees its
//! entire subtree, depth-first, after firing any registered destructors and
//! FREE notifiers. Nodes can be reparented ([`Heap::steal`]), resized in
//! place ([`Heap::resize`]) with pointer movement reported to observers,
//! named, and annotated with an element count for array allocations.
//!
//! ## Design
//!
//! - **Intrusive metadata, payload-adjacent**: a header precedes each
//!   payload in the same backend block, so payload↔header conversion is
//!   pointer arithmetic rather than a map lookup.
//! - **Property chain**: optional metadata (child list, name, notifiers,
//!   element count) hangs off the header as a singly-linked chain of
//!   records; the chain may terminate in a borrowed `'static` label that
//!   doubles as the node's name.
//! - **Pluggable backend**: all memory comes from four hooks
//!   ([`Backend`]) defaulting to `libc` malloc/realloc/free; tests inject
//!   counting and failing backends per [`Heap`].
//! - **Re-entrancy**: destructors and notifiers may allocate, free, steal,
//!   resize or rename any node, including the one they fire on; a teardown
//!   flag absorbs recursive frees of the dying node.
//!
//! Heaps are strictly single-threaded (`!Send`, `!Sync`). A thread-local
//! default heap backs the free functions in [`global`].
//!
//! ## Example
//!
//! ```
//! use arbor::Heap;
//! use core::ptr;
//!
//! let heap = Heap::new();
//! unsafe {
//!     let config = heap.alloc(ptr::null_mut(), 64, true, Some("config")).unwrap();
//!     let section = heap.alloc(config, 16, false, None).unwrap();
//!     assert_eq!(heap.parent(section), config);
//!     assert_eq!(heap.name(config), Some("config"));
//!
//!     // Frees `section` too.
//!     heap.free(config);
//!     assert!(heap.first(ptr::null_mut()).is_null());
//! }
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod backend;
mod check;
mod error;
pub mod events;
pub mod global;
mod hdr;
pub mod heap;
mod list;
pub mod take;

pub use backend::Backend;
pub use error::Error;
pub use events::{DestroyFn, Notify, NotifyFn, NotifyInfo};
pub use heap::Heap;
pub use take::{is_taken, take};

// Compile-time layout checks for the header/payload contract.
const _: () = {
    use core::mem;

    // Payload sits at `hdr + 1` and must stay maximally aligned.
    assert!(mem::align_of::<hdr::Hdr>() >= 16);
    assert!(mem::size_of::<hdr::Hdr>() % 16 == 0);

    // Sibling-ring cursors cast straight back to headers.
    assert!(mem::offset_of!(hdr::Hdr, list) == 0);

    // Guard against accidental header growth: this is per-allocation
    // overhead.
    assert!(mem::size_of::<hdr::Hdr>() <= 64);
};
