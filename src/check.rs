//! Debug-only structural self-check and pointer bounds guard.
//!
//! Both are compiled out in release builds: [`Heap::check`] becomes a
//! constant `true` and the bounds guard a no-op. In debug builds every
//! violation is reported through the backend error hook, which by default
//! aborts but may be replaced to log and continue.

#[cfg(debug_assertions)]
use crate::hdr::{payload_of, Children, Hdr, PropKind, PropLink};
use crate::heap::Heap;
#[cfg(debug_assertions)]
use crate::heap::Sentinel;
#[cfg(debug_assertions)]
use crate::list::ListNode;
#[cfg(debug_assertions)]
use core::mem;
#[cfg(debug_assertions)]
use core::ptr;

impl Heap {
    #[cfg(debug_assertions)]
    fn in_sentinel(&self, p: *const u8) -> bool {
        let lo = self.sentinel.get() as usize;
        let hi = lo + mem::size_of::<Sentinel>();
        (p as usize) >= lo && (p as usize) <= hi
    }

    #[cfg(debug_assertions)]
    pub(crate) fn in_bounds(&self, p: *const u8) -> bool {
        if p.is_null() || self.in_sentinel(p) {
            return true;
        }
        match self.bounds.get() {
            Some((lo, hi)) => (p as usize) >= lo && (p as usize) <= hi,
            None => false,
        }
    }

    /// Report `p` through the error hook when it cannot be part of this
    /// heap. Debug builds only.
    #[cfg(debug_assertions)]
    pub(crate) fn check_bounds(&self, p: *const u8) {
        if !self.in_bounds(p) {
            self.call_error("not a valid header");
        }
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn check_bounds(&self, _p: *const u8) {}

    /// Walk the subtree rooted at `ctx` (null = the whole heap) and validate
    /// its structure: pointer bounds, parent back-pointers, property
    /// multiplicity, known property kinds, and literal placement.
    ///
    /// Violations are reported through the error hook with `errorstr` as a
    /// prefix when given, and make the walk return false. Release builds
    /// always return true without walking.
    ///
    /// # Safety
    /// `ctx` must be null or a live payload pointer from this heap.
    #[cfg(debug_assertions)]
    pub unsafe fn check(&self, ctx: *const u8, errorstr: Option<&str>) -> bool {
        let t = self.to_hdr_or_sentinel(ctx);
        self.check_node((*t).parent_child, t, errorstr)
    }

    /// Release-mode stub: structural checking is compiled out.
    ///
    /// # Safety
    /// No requirements; the arguments are ignored.
    #[cfg(not(debug_assertions))]
    #[allow(clippy::unused_self)]
    pub unsafe fn check(&self, _ctx: *const u8, _errorstr: Option<&str>) -> bool {
        true
    }

    #[cfg(debug_assertions)]
    fn check_err(&self, t: *mut Hdr, errorstr: Option<&str>, msg: &str) -> bool {
        if let Some(prefix) = errorstr {
            let payload = unsafe { payload_of(t) };
            self.call_error(&format!("{prefix}:{payload:p} {msg}"));
        }
        false
    }

    #[cfg(debug_assertions)]
    unsafe fn check_node(
        &self,
        parent_child: *mut Children,
        t: *mut Hdr,
        errorstr: Option<&str>,
    ) -> bool {
        let mut name_seen = false;
        let mut children: *mut Children = ptr::null_mut();
        let mut length_seen = false;

        if !self.in_bounds(t.cast::<u8>()) {
            return self.check_err(t, errorstr, "invalid pointer");
        }
        if (*t).parent_child != parent_child {
            return self.check_err(t, errorstr, "incorrect parent");
        }

        let mut link = (*t).prop;
        loop {
            let p = match link {
                PropLink::End => break,
                PropLink::Literal(_) => {
                    if name_seen {
                        return self.check_err(t, errorstr, "has extra literal");
                    }
                    // A literal terminates the chain by construction.
                    break;
                }
                PropLink::Prop(p) => p,
            };
            if !self.in_bounds(p.cast::<u8>()) {
                return self.check_err(t, errorstr, "has bad property pointer");
            }
            // Read the tag raw: a corrupt record must not be reinterpreted
            // as a valid enum.
            let raw_kind = ptr::read(p.cast::<u32>());
            if raw_kind == PropKind::Children as u32 {
                if !children.is_null() {
                    return self.check_err(t, errorstr, "has two child nodes");
                }
                children = p.cast();
            } else if raw_kind == PropKind::Length as u32 {
                if length_seen {
                    return self.check_err(t, errorstr, "has two lengths");
                }
                length_seen = true;
            } else if raw_kind == PropKind::Name as u32 {
                if name_seen {
                    return self.check_err(t, errorstr, "has two names");
                }
                name_seen = true;
            } else if raw_kind != PropKind::Notifier as u32 {
                return self.check_err(t, errorstr, "has unknown property");
            }
            link = (*p).next;
        }

        if !children.is_null() {
            if !self.check_ring(ptr::addr_of_mut!((*children).children), t, errorstr) {
                return false;
            }
            let head: *mut ListNode = ptr::addr_of_mut!((*children).children);
            let mut cursor = (*head).next;
            while cursor != head {
                let child = cursor.cast::<Hdr>();
                if !self.check_node(children, child, errorstr) {
                    return false;
                }
                cursor = (*cursor).next;
            }
        }
        true
    }

    /// Validate that every link in the ring is mirrored by its neighbor.
    #[cfg(debug_assertions)]
    unsafe fn check_ring(&self, head: *mut ListNode, t: *mut Hdr, errorstr: Option<&str>) -> bool {
        let mut cursor = head;
        loop {
            let next = (*cursor).next;
            if !self.in_bounds(next.cast::<u8>()) {
                return self.check_err(t, errorstr, "has corrupt child list");
            }
            if (*next).prev != cursor {
                return self.check_err(t, errorstr, "has corrupt child list");
            }
            cursor = next;
            if cursor == head {
                return true;
            }
        }
    }
}
