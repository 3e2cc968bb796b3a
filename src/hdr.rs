//! Node headers and the intrusive property store.
//!
//! Every allocation is `Hdr` followed by the user payload in the same block,
//! so payload↔header conversion is pointer arithmetic. Optional metadata
//! hangs off the header as a singly-linked chain of property records, each
//! allocated through the same backend as nodes — except LENGTH, which rides
//! at the tail of the node allocation itself, and literal names, which are
//! borrowed `'static` strings terminating the chain.

use crate::events::{DestroyFn, Notify, NotifyFn};
use crate::list::ListNode;
use core::mem;
use core::ptr;
use core::slice;
use core::str;

/// Property kind tags. Distinctive values so the debug checker can tell a
/// stale or corrupt record from a real one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum PropKind {
    Children = 0x4348_4c44, // "CHLD"
    Name = 0x4e41_4d45,     // "NAME"
    Notifier = 0x4e54_4659, // "NTFY"
    Length = 0x4c45_4e47,   // "LENG"
}

/// One slot in a property chain.
///
/// The chain is terminated either by `End` or by a borrowed literal name;
/// the literal doubles as the NAME value for lookups, shadowing a missing
/// NAME record.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PropLink {
    End,
    Prop(*mut PropHdr),
    Literal(&'static str),
}

/// Common prefix of every heap property record. `kind` stays the first
/// field so the checker can recover it from raw bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct PropHdr {
    pub kind: PropKind,
    pub next: PropLink,
}

/// Per-allocation metadata block preceding the payload.
///
/// `list` must stay the first field: sibling-ring cursors cast straight back
/// to `Hdr`. The 16-byte alignment keeps the payload maximally aligned for
/// any element type the backend's own alignment supports.
#[repr(C, align(16))]
pub(crate) struct Hdr {
    pub list: ListNode,
    pub prop: PropLink,
    /// Back-pointer to the parent's CHILDREN property; null only on the
    /// sentinel root.
    pub parent_child: *mut Children,
    /// Subtree-in-teardown flag; a recursive free of this node is a no-op
    /// while it is set.
    pub destroying: bool,
}

/// CHILDREN property: owns the sibling ring of this node's children.
#[repr(C)]
pub(crate) struct Children {
    pub hdr: PropHdr,
    pub parent: *mut Hdr,
    /// Ring head for the child sibling list.
    pub children: ListNode,
}

/// NAME property: length-prefixed UTF-8 copy, bytes inline after the record.
#[repr(C)]
pub(crate) struct NameProp {
    pub hdr: PropHdr,
    pub len: usize,
}

impl NameProp {
    /// # Safety
    /// `self` must have been allocated with `len` valid bytes following it.
    pub unsafe fn as_str(&self) -> &str {
        let bytes = slice::from_raw_parts((self as *const NameProp).add(1).cast::<u8>(), self.len);
        str::from_utf8_unchecked(bytes)
    }
}

/// LENGTH property: recorded element count. Physically stored at the tail of
/// the payload area and therefore never freed separately from the node.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct LengthProp {
    pub hdr: PropHdr,
    pub count: usize,
}

/// A registered callback: either a general notifier or a destructor.
/// Destructors are stored with a mask of exactly `Notify::FREE`.
#[derive(Clone, Copy)]
pub(crate) enum Hook {
    Notifier(NotifyFn),
    Destructor(DestroyFn),
}

impl Hook {
    pub fn same_callback(self, other: Hook) -> bool {
        match (self, other) {
            (Hook::Notifier(a), Hook::Notifier(b)) => a == b,
            (Hook::Destructor(a), Hook::Destructor(b)) => a == b,
            _ => false,
        }
    }
}

/// NOTIFIER property: event mask plus callback. May repeat on one node.
#[repr(C)]
pub(crate) struct NotifierProp {
    pub hdr: PropHdr,
    pub types: Notify,
    pub hook: Hook,
}

pub(crate) const HDR_SIZE: usize = mem::size_of::<Hdr>();

/// Payload address of a node: the byte right after the header.
#[inline]
pub(crate) unsafe fn payload_of(hdr: *mut Hdr) -> *mut u8 {
    hdr.add(1).cast()
}

/// Header address of a payload. The caller is responsible for `payload`
/// actually being a tree allocation; the heap's debug bounds guard catches
/// most strays.
#[inline]
pub(crate) unsafe fn hdr_of(payload: *const u8) -> *mut Hdr {
    payload.sub(HDR_SIZE) as *mut Hdr
}

/// Walk the property chain and return the slot holding the first property of
/// `kind`. A literal tail satisfies a NAME lookup. The slot form (pointer to
/// the referencing link) lets callers unlink in O(1).
pub(crate) unsafe fn find_property_slot(hdr: *mut Hdr, kind: PropKind) -> Option<*mut PropLink> {
    let mut slot: *mut PropLink = ptr::addr_of_mut!((*hdr).prop);
    loop {
        match *slot {
            PropLink::End => return None,
            PropLink::Literal(_) => {
                return if kind == PropKind::Name { Some(slot) } else { None }
            }
            PropLink::Prop(p) => {
                if (*p).kind == kind {
                    return Some(slot);
                }
                slot = ptr::addr_of_mut!((*p).next);
            }
        }
    }
}

/// First CHILDREN property of `hdr`, or null.
#[inline]
pub(crate) unsafe fn find_children(hdr: *mut Hdr) -> *mut Children {
    match find_property_slot(hdr, PropKind::Children) {
        Some(slot) => match *slot {
            PropLink::Prop(p) => p.cast(),
            _ => ptr::null_mut(),
        },
        None => ptr::null_mut(),
    }
}

/// First LENGTH property of `hdr`, or null.
#[inline]
pub(crate) unsafe fn find_length(hdr: *mut Hdr) -> *mut LengthProp {
    match find_property_slot(hdr, PropKind::Length) {
        Some(slot) => match *slot {
            PropLink::Prop(p) => p.cast(),
            _ => ptr::null_mut(),
        },
        None => ptr::null_mut(),
    }
}

/// Push an already-written property record onto the head of `owner`'s chain.
#[inline]
pub(crate) unsafe fn link_property(prop: *mut PropHdr, owner: *mut Hdr) {
    (*prop).next = (*owner).prop;
    (*owner).prop = PropLink::Prop(prop);
}
