//! The allocator context: sentinel root, backend hooks and all tree
//! operations.
//!
//! A [`Heap`] owns one ownership forest. Allocations made with a null parent
//! hang off the heap's sentinel root and are reported as parentless by
//! [`Heap::parent`]. The heap is single-threaded by construction (`!Send`,
//! `!Sync`); callbacks may freely re-enter any operation on the same heap.
//!
//! Most operations are `unsafe`: they trust the caller to pass payload
//! pointers previously returned by this heap (or null where documented). In
//! debug builds a bounds guard and the [`Heap::check`] walker catch most
//! violations through the backend error hook.

use crate::backend::{errno, set_errno, Backend};
use crate::error::Error;
use crate::events::{DestroyFn, Notify, NotifyFn, NotifyInfo};
use crate::hdr::{
    find_children, find_length, find_property_slot, hdr_of, link_property, payload_of, Children,
    Hdr, Hook, LengthProp, NameProp, NotifierProp, PropHdr, PropKind, PropLink, HDR_SIZE,
};
use crate::list::{self, ListNode};
use crate::take;
use core::cell::{Cell, UnsafeCell};
use core::marker::PhantomData;
use core::mem;
use core::ptr;

/// The synthetic root: a header with a permanent CHILDREN property, never
/// freed, acting as the implicit parent for null-parent allocations.
#[repr(C)]
pub(crate) struct Sentinel {
    pub hdr: Hdr,
    pub children: Children,
}

/// One ownership forest plus its backend and observer bookkeeping.
pub struct Heap {
    pub(crate) sentinel: Box<UnsafeCell<Sentinel>>,
    pub(crate) backend: Cell<Backend>,
    /// Count of registered non-FREE notifiers. Gates the ADD_CHILD,
    /// DEL_CHILD, STEAL, MOVE, RESIZE, RENAME and ADD_NOTIFIER fire sites so
    /// the common no-observer case skips dispatch entirely.
    pub(crate) notifiers: Cell<usize>,
    /// Observed low/high water marks of backend allocations, consulted by
    /// the debug pointer guard.
    pub(crate) bounds: Cell<Option<(usize, usize)>>,
    _not_send: PhantomData<*mut u8>,
}

impl Heap {
    /// Create a heap backed by the system allocator.
    pub fn new() -> Self {
        Self::with_backend(Backend::default())
    }

    /// Create a heap with custom backend hooks.
    pub fn with_backend(backend: Backend) -> Self {
        let sentinel = Box::new(UnsafeCell::new(Sentinel {
            hdr: Hdr {
                list: ListNode::new(),
                prop: PropLink::End,
                parent_child: ptr::null_mut(),
                destroying: false,
            },
            children: Children {
                hdr: PropHdr {
                    kind: PropKind::Children,
                    next: PropLink::End,
                },
                parent: ptr::null_mut(),
                children: ListNode::new(),
            },
        }));
        unsafe {
            let s = sentinel.get();
            list::init_head(ptr::addr_of_mut!((*s).hdr.list));
            list::init_head(ptr::addr_of_mut!((*s).children.children));
            (*s).children.parent = ptr::addr_of_mut!((*s).hdr);
            (*s).hdr.prop = PropLink::Prop(ptr::addr_of_mut!((*s).children.hdr));
        }
        Heap {
            sentinel,
            backend: Cell::new(backend),
            notifiers: Cell::new(0),
            bounds: Cell::new(None),
            _not_send: PhantomData,
        }
    }

    /// Replace the backend hooks.
    ///
    /// Process-wide for this heap; replacing the hooks while allocations
    /// made through the previous backend are still live is undefined.
    pub fn set_backend(&self, backend: Backend) {
        self.backend.set(backend);
    }

    #[inline]
    pub(crate) fn sentinel_hdr(&self) -> *mut Hdr {
        unsafe { ptr::addr_of_mut!((*self.sentinel.get()).hdr) }
    }

    pub(crate) fn call_error(&self, msg: &str) {
        (self.backend.get().error)(msg);
    }

    /// Backend allocation with error reporting and bounds tracking.
    fn allocate(&self, size: usize) -> *mut u8 {
        let ret = unsafe { (self.backend.get().alloc)(size) };
        if ret.is_null() {
            self.call_error("allocation failed");
        } else {
            self.update_bounds(ret, size);
        }
        ret
    }

    #[inline]
    fn backend_free(&self, ptr: *mut u8) {
        unsafe { (self.backend.get().free)(ptr) }
    }

    pub(crate) fn update_bounds(&self, new: *const u8, size: usize) {
        let lo = new as usize;
        let hi = lo + size;
        self.bounds.set(Some(match self.bounds.get() {
            None => (lo, hi),
            Some((old_lo, old_hi)) => (old_lo.min(lo), old_hi.max(hi)),
        }));
    }

    /// Recover and sanity-check the header behind `ctx`.
    pub(crate) unsafe fn to_hdr(&self, ctx: *const u8) -> *mut Hdr {
        let t = hdr_of(ctx);
        self.check_bounds(t.cast::<u8>());
        self.check_bounds((*t).parent_child.cast::<u8>());
        self.check_bounds((*t).list.next.cast::<u8>());
        self.check_bounds((*t).list.prev.cast::<u8>());
        if let PropLink::Prop(p) = (*t).prop {
            self.check_bounds(p.cast::<u8>());
        }
        t
    }

    pub(crate) unsafe fn to_hdr_or_sentinel(&self, ctx: *const u8) -> *mut Hdr {
        if ctx.is_null() {
            self.sentinel_hdr()
        } else {
            self.to_hdr(ctx)
        }
    }

    /// Fire `event` on `t`'s notifiers and destructors, in property-list
    /// order (reverse registration order).
    pub(crate) unsafe fn notify(&self, t: *mut Hdr, event: Notify, info: NotifyInfo) {
        let mut link = (*t).prop;
        loop {
            let p = match link {
                PropLink::Prop(p) => p,
                _ => break,
            };
            if (*p).kind == PropKind::Notifier {
                let n = p.cast::<NotifierProp>();
                if (*n).types.intersects(event) {
                    let payload = payload_of(t);
                    match (*n).hook {
                        Hook::Destructor(f) => f(self, payload),
                        Hook::Notifier(f) => f(self, payload, event, info),
                    }
                }
            }
            link = (*p).next;
        }
    }

    unsafe fn add_child_property(&self, parent: *mut Hdr) -> *mut Children {
        let prop = self.allocate(mem::size_of::<Children>()).cast::<Children>();
        if !prop.is_null() {
            prop.write(Children {
                hdr: PropHdr {
                    kind: PropKind::Children,
                    next: (*parent).prop,
                },
                parent,
                children: ListNode::new(),
            });
            list::init_head(ptr::addr_of_mut!((*prop).children));
            (*parent).prop = PropLink::Prop(prop.cast());
        }
        prop
    }

    /// Link `child` at the head of `parent`'s child list, creating the
    /// CHILDREN property on first use. False means the property allocation
    /// failed and nothing was linked.
    unsafe fn add_child(&self, parent: *mut Hdr, child: *mut Hdr) -> bool {
        let mut children = find_children(parent);
        if children.is_null() {
            children = self.add_child_property(parent);
            if children.is_null() {
                return false;
            }
        }
        list::add_head(
            ptr::addr_of_mut!((*children).children),
            ptr::addr_of_mut!((*child).list),
        );
        (*child).parent_child = children;
        true
    }

    /// Tear down `t`'s subtree: FREE notifiers and destructors first, then
    /// children (re-reading the first child after every recursive free,
    /// since any callback may mutate the list), then heap properties, then
    /// the node itself.
    unsafe fn del_tree(&self, t: *mut Hdr, orig: *mut u8) {
        // Already being torn down? Don't loop.
        if (*t).destroying {
            return;
        }
        (*t).destroying = true;

        self.notify(t, Notify::FREE, NotifyInfo::Node(orig));

        let children = find_children(t);
        if !children.is_null() {
            loop {
                let top = list::top(ptr::addr_of_mut!((*children).children));
                if top.is_null() {
                    break;
                }
                let child = top.cast::<Hdr>();
                list::del(top);
                self.del_tree(child, orig);
            }
        }

        // LENGTH rides in the node allocation, so it is not freed here; a
        // literal tail is borrowed and merely dropped.
        let mut link = (*t).prop;
        loop {
            let p = match link {
                PropLink::Prop(p) => p,
                _ => break,
            };
            link = (*p).next;
            if (*p).kind != PropKind::Length {
                self.backend_free(p.cast());
            }
        }
        self.backend_free(t.cast());
    }

    /// Allocate `size` payload bytes under `parent` (null = the sentinel).
    ///
    /// The payload is zeroed when `clear` is set. `label`, when given,
    /// becomes the node's literal name without any extra allocation.
    ///
    /// # Safety
    /// `parent` must be null or a live payload pointer from this heap.
    pub unsafe fn alloc(
        &self,
        parent: *mut u8,
        size: usize,
        clear: bool,
        label: Option<&'static str>,
    ) -> Result<*mut u8, Error> {
        let parent_hdr = self.to_hdr_or_sentinel(parent);

        let total = match size.checked_add(HDR_SIZE) {
            Some(total) => total,
            None => {
                self.call_error("allocation size overflow");
                return Err(Error::Overflow);
            }
        };
        let t = self.allocate(total).cast::<Hdr>();
        if t.is_null() {
            return Err(Error::Alloc);
        }
        let payload = payload_of(t);
        if clear {
            ptr::write_bytes(payload, 0, size);
        }
        t.write(Hdr {
            list: ListNode::new(),
            prop: match label {
                Some(name) => PropLink::Literal(name),
                None => PropLink::End,
            },
            parent_child: ptr::null_mut(),
            destroying: false,
        });
        if !self.add_child(parent_hdr, t) {
            self.backend_free(t.cast());
            return Err(Error::Alloc);
        }
        if self.notifiers.get() > 0 {
            self.notify(parent_hdr, Notify::ADD_CHILD, NotifyInfo::Node(payload));
        }
        Ok(payload)
    }

    /// `size * count` with room for header and length tailer, or a reported
    /// overflow.
    fn adjust_size(&self, size: usize, count: usize) -> Result<usize, Error> {
        const EXTRA: usize = HDR_SIZE + 2 * mem::size_of::<LengthProp>();
        match size
            .checked_mul(count)
            .and_then(|bytes| bytes.checked_add(EXTRA).map(|_| bytes))
        {
            Some(bytes) => Ok(bytes),
            None => {
                self.call_error("allocation size overflow");
                Err(Error::Overflow)
            }
        }
    }

    /// Allocate an array of `count` elements of `size` bytes under `parent`.
    ///
    /// With `add_count`, the element count is recorded in a LENGTH property
    /// at the payload tail and later reported by [`Heap::count`] and kept
    /// current by [`Heap::resize`].
    ///
    /// # Safety
    /// `parent` must be null or a live payload pointer from this heap.
    pub unsafe fn alloc_arr(
        &self,
        parent: *mut u8,
        size: usize,
        count: usize,
        clear: bool,
        add_count: bool,
        label: Option<&'static str>,
    ) -> Result<*mut u8, Error> {
        let mut bytes = self.adjust_size(size, count)?;
        if add_count {
            bytes += extra_for_length(bytes);
        }

        let ret = self.alloc(parent, bytes, clear, label)?;

        if add_count {
            let lprop = ret.add(bytes).cast::<LengthProp>().sub(1);
            lprop.write(LengthProp {
                hdr: PropHdr {
                    kind: PropKind::Length,
                    next: PropLink::End,
                },
                count,
            });
            link_property(lprop.cast(), hdr_of(ret));
        }
        Ok(ret)
    }

    /// Free `ctx` and its entire subtree. No-op on null.
    ///
    /// FREE notifiers and destructors fire before the subtree is dismantled,
    /// so a destructor still observes its children. A recursive free of the
    /// node from within its own destructor returns immediately. `errno` is
    /// preserved across the call.
    ///
    /// # Safety
    /// `ctx` must be null or a live payload pointer from this heap; it is
    /// dangling afterwards.
    pub unsafe fn free(&self, ctx: *mut u8) {
        if ctx.is_null() {
            return;
        }
        let saved_errno = errno();
        let t = self.to_hdr(ctx);
        if self.notifiers.get() > 0 {
            let parent = (*(*t).parent_child).parent;
            self.notify(parent, Notify::DEL_CHILD, NotifyInfo::Node(ctx));
        }
        list::del(ptr::addr_of_mut!((*t).list));
        self.del_tree(t, ctx);
        set_errno(saved_errno);
    }

    /// Move `ctx` under `new_parent` (null = the sentinel), returning `ctx`.
    ///
    /// On failure the node is re-attached to its old parent (which already
    /// owns a CHILDREN property, so re-attaching cannot fail) and the tree
    /// is unchanged from the caller's perspective.
    ///
    /// # Safety
    /// Both pointers must be null or live payload pointers from this heap;
    /// `ctx` must not be an ancestor of `new_parent`.
    pub unsafe fn steal(&self, new_parent: *mut u8, ctx: *mut u8) -> Result<*mut u8, Error> {
        if ctx.is_null() {
            return Ok(ctx);
        }
        let newpar = self.to_hdr_or_sentinel(new_parent);
        let t = self.to_hdr(ctx);

        list::del(ptr::addr_of_mut!((*t).list));
        let old_parent = (*(*t).parent_child).parent;

        if !self.add_child(newpar, t) {
            let restored = self.add_child(old_parent, t);
            debug_assert!(restored, "old parent must re-accept its child");
            return Err(Error::Alloc);
        }
        if self.notifiers.get() > 0 {
            self.notify(t, Notify::STEAL, NotifyInfo::Node(new_parent));
        }
        Ok(ctx)
    }

    unsafe fn add_notifier_property(
        &self,
        t: *mut Hdr,
        types: Notify,
        hook: Hook,
    ) -> *mut NotifierProp {
        let prop = self
            .allocate(mem::size_of::<NotifierProp>())
            .cast::<NotifierProp>();
        if !prop.is_null() {
            prop.write(NotifierProp {
                hdr: PropHdr {
                    kind: PropKind::Notifier,
                    next: PropLink::End,
                },
                types,
                hook,
            });
            link_property(prop.cast(), t);
        }
        prop
    }

    /// Unlink and free the first NOTIFIER whose callback equals `want`,
    /// returning its mask.
    unsafe fn del_hook(&self, t: *mut Hdr, want: Hook) -> Option<Notify> {
        let mut slot: *mut PropLink = ptr::addr_of_mut!((*t).prop);
        loop {
            match *slot {
                PropLink::Prop(p) => {
                    if (*p).kind == PropKind::Notifier {
                        let n = p.cast::<NotifierProp>();
                        if (*n).hook.same_callback(want) {
                            let types = (*n).types;
                            *slot = (*p).next;
                            self.backend_free(p.cast());
                            return Some(types);
                        }
                    }
                    slot = ptr::addr_of_mut!((*p).next);
                }
                _ => return None,
            }
        }
    }

    unsafe fn del_hook_and_notify(&self, t: *mut Hdr, want: Hook) -> bool {
        match self.del_hook(t, want) {
            Some(types) => {
                self.notify(t, Notify::DEL_NOTIFIER, NotifyInfo::None);
                if types != Notify::FREE {
                    self.notifiers.set(self.notifiers.get() - 1);
                }
                true
            }
            None => false,
        }
    }

    /// Register a destructor on `ctx`: fired on FREE, before the subtree is
    /// dismantled, in reverse registration order.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    pub unsafe fn add_destructor(&self, ctx: *mut u8, destroy: DestroyFn) -> Result<(), Error> {
        let t = self.to_hdr(ctx);
        if self
            .add_notifier_property(t, Notify::FREE, Hook::Destructor(destroy))
            .is_null()
        {
            return Err(Error::Alloc);
        }
        Ok(())
    }

    /// Remove the first destructor registered with `destroy`.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    pub unsafe fn del_destructor(&self, ctx: *mut u8, destroy: DestroyFn) -> bool {
        let t = self.to_hdr(ctx);
        self.del_hook_and_notify(t, Hook::Destructor(destroy))
    }

    /// Register a notifier for the events in `types`.
    ///
    /// The notifier is installed with an empty mask while ADD_NOTIFIER fires
    /// and the real mask is set afterwards, so a callback subscribed to
    /// ADD_NOTIFIER never observes its own registration.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    ///
    /// # Panics
    /// Panics when `types` is empty.
    pub unsafe fn add_notifier(
        &self,
        ctx: *mut u8,
        types: Notify,
        callback: NotifyFn,
    ) -> Result<(), Error> {
        assert!(!types.is_empty(), "notifier must subscribe to something");
        let t = self.to_hdr(ctx);

        let n = self.add_notifier_property(t, Notify::empty(), Hook::Notifier(callback));
        if n.is_null() {
            return Err(Error::Alloc);
        }

        if self.notifiers.get() > 0 {
            self.notify(t, Notify::ADD_NOTIFIER, NotifyInfo::None);
        }

        (*n).types = types;
        if types != Notify::FREE {
            self.notifiers.set(self.notifiers.get() + 1);
        }
        Ok(())
    }

    /// Remove the first notifier registered with `callback`, firing
    /// DEL_NOTIFIER when a match was removed.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    pub unsafe fn del_notifier(&self, ctx: *mut u8, callback: NotifyFn) -> bool {
        let t = self.to_hdr(ctx);
        self.del_hook_and_notify(t, Hook::Notifier(callback))
    }

    unsafe fn remove_name(&self, t: *mut Hdr) {
        if let Some(slot) = find_property_slot(t, PropKind::Name) {
            match *slot {
                // A literal is always the chain tail; dropping it loses
                // nothing else.
                PropLink::Literal(_) => *slot = PropLink::End,
                PropLink::Prop(p) => {
                    *slot = (*p).next;
                    self.backend_free(p.cast());
                }
                PropLink::End => {}
            }
        }
    }

    unsafe fn add_name_property(&self, t: *mut Hdr, name: &str) -> bool {
        let prop = self
            .allocate(mem::size_of::<NameProp>() + name.len())
            .cast::<NameProp>();
        if prop.is_null() {
            return false;
        }
        prop.write(NameProp {
            hdr: PropHdr {
                kind: PropKind::Name,
                next: PropLink::End,
            },
            len: name.len(),
        });
        ptr::copy_nonoverlapping(name.as_ptr(), prop.add(1).cast::<u8>(), name.len());
        link_property(prop.cast(), t);
        true
    }

    /// Set `ctx`'s name to a heap-allocated copy of `name`, replacing any
    /// existing name and firing RENAME.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    pub unsafe fn set_name(&self, ctx: *mut u8, name: &str) -> Result<(), Error> {
        let t = self.to_hdr(ctx);
        self.remove_name(t);
        if !self.add_name_property(t, name) {
            return Err(Error::Alloc);
        }
        if self.notifiers.get() > 0 {
            self.notify(t, Notify::RENAME, NotifyInfo::None);
        }
        Ok(())
    }

    /// Set `ctx`'s name to the borrowed `name` without copying: the string
    /// is spliced onto the tail of the property chain as its terminator.
    /// Empty literals fall back to a heap copy so the terminator stays
    /// unambiguous.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    pub unsafe fn set_name_literal(&self, ctx: *mut u8, name: &'static str) -> Result<(), Error> {
        let t = self.to_hdr(ctx);
        self.remove_name(t);
        if name.is_empty() {
            if !self.add_name_property(t, name) {
                return Err(Error::Alloc);
            }
        } else {
            let mut slot: *mut PropLink = ptr::addr_of_mut!((*t).prop);
            while let PropLink::Prop(p) = *slot {
                slot = ptr::addr_of_mut!((*p).next);
            }
            *slot = PropLink::Literal(name);
        }
        if self.notifiers.get() > 0 {
            self.notify(t, Notify::RENAME, NotifyInfo::None);
        }
        Ok(())
    }

    /// The node's recorded name, if any.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap, and the returned
    /// string must not be held across a free or rename of `ctx`.
    pub unsafe fn name<'h>(&'h self, ctx: *const u8) -> Option<&'h str> {
        let t = self.to_hdr(ctx);
        match find_property_slot(t, PropKind::Name) {
            Some(slot) => match *slot {
                PropLink::Literal(s) => Some(s),
                PropLink::Prop(p) => Some((*p.cast::<NameProp>()).as_str()),
                PropLink::End => None,
            },
            None => None,
        }
    }

    /// The recorded element count, or 0 when none was requested.
    ///
    /// # Safety
    /// `ctx` must be a live payload pointer from this heap.
    pub unsafe fn count(&self, ctx: *const u8) -> usize {
        let l = find_length(self.to_hdr(ctx));
        if l.is_null() {
            0
        } else {
            (*l).count
        }
    }

    /// Resize `*ctx` in place to `count` elements of `size` bytes.
    ///
    /// Any recorded LENGTH moves to the new payload tail and its count is
    /// updated. If the backend moved the block, the sibling ring, the
    /// CHILDREN back-pointer and the caller's handle are repaired and MOVE
    /// fires with the old address; RESIZE then fires with the new byte size.
    /// On failure the node is unchanged.
    ///
    /// # Safety
    /// `*ctx` must be a live payload pointer from this heap. Other
    /// outstanding pointers to the payload are invalidated if the block
    /// moves.
    pub unsafe fn resize(&self, ctx: &mut *mut u8, size: usize, count: usize) -> Result<(), Error> {
        let old_t = self.to_hdr(*ctx);
        let old_payload = *ctx;

        let bytes = self.adjust_size(size, count)?;

        // Read any LENGTH by value up front: a shrink may obliterate the
        // tail location before we re-write it.
        let old_head_slot: *mut PropLink = ptr::addr_of_mut!((*old_t).prop);
        let len_slot = find_property_slot(old_t, PropKind::Length);
        let mut extra = 0;
        let saved_len = match len_slot {
            Some(slot) => match *slot {
                PropLink::Prop(p) => {
                    extra = extra_for_length(bytes);
                    Some(ptr::read(p.cast::<LengthProp>()))
                }
                _ => None,
            },
            None => None,
        };

        let total = HDR_SIZE + bytes + extra;
        let t = (self.backend.get().resize)(old_t.cast(), total).cast::<Hdr>();
        if t.is_null() {
            self.call_error("reallocation failed");
            return Err(Error::Alloc);
        }
        self.update_bounds(t.cast::<u8>(), total);

        if let Some(mut len) = saved_len {
            let new_len = payload_of(t).add(bytes + extra).cast::<LengthProp>().sub(1);
            len.count = count;
            new_len.write(len);

            // Patch whichever link referenced the old record. The slot may
            // point into the old header, which realloc may have freed, so
            // compare addresses only.
            let slot = len_slot.unwrap_or(old_head_slot);
            if slot == old_head_slot {
                (*t).prop = PropLink::Prop(new_len.cast());
            } else {
                *slot = PropLink::Prop(new_len.cast());
            }
        }

        if t != old_t {
            // The block moved: both ring neighbors and the child
            // back-pointer still name the old header.
            let item = ptr::addr_of_mut!((*t).list);
            (*(*item).next).prev = item;
            (*(*item).prev).next = item;

            let children = find_children(t);
            if !children.is_null() {
                (*children).parent = t;
            }

            *ctx = payload_of(t);
            if self.notifiers.get() > 0 {
                self.notify(t, Notify::MOVE, NotifyInfo::Node(old_payload));
            }
        }
        if self.notifiers.get() > 0 {
            self.notify(t, Notify::RESIZE, NotifyInfo::Size(bytes));
        }
        Ok(())
    }

    /// Append `count` elements from `src` to the array at `*ctx`, growing it
    /// in place. Consumes a taken `src` whether or not the operation
    /// succeeds.
    ///
    /// # Safety
    /// `*ctx` must be a live payload pointer from this heap, allocated with
    /// count tracking; `src` must be valid for `size * count` bytes and must
    /// not point into the region being grown.
    pub unsafe fn expand(
        &self,
        ctx: &mut *mut u8,
        src: *const u8,
        size: usize,
        count: usize,
    ) -> Result<(), Error> {
        let src_taken = take::taken(src);

        let l = find_length(self.to_hdr(*ctx));
        debug_assert!(!l.is_null(), "expand requires count tracking");
        let old_count = if l.is_null() { 0 } else { (*l).count };

        let result = (|| {
            let new_count = match old_count.checked_add(count) {
                Some(new_count) => new_count,
                None => {
                    self.call_error("expand size overflow");
                    return Err(Error::Overflow);
                }
            };
            debug_assert!(
                (src as usize) < (*ctx as usize)
                    || src as usize >= (*ctx as usize) + size * old_count,
                "src must not alias the region being grown"
            );
            self.resize(ctx, size, new_count)?;
            ptr::copy_nonoverlapping(src, (*ctx).add(size * old_count), size * count);
            Ok(())
        })();

        if src_taken {
            self.free(src.cast_mut());
        }
        result
    }

    /// Duplicate `n` elements of `size` bytes from `src` into a new
    /// allocation of `n + extra` elements under `parent`.
    ///
    /// A taken `src` is not copied: it is resized to `n + extra` elements in
    /// place and stolen to `parent`, and it is freed on any failure.
    ///
    /// # Safety
    /// `parent` must be null or a live payload pointer from this heap;
    /// `src` must be valid for `size * n` bytes (and, when taken, a live
    /// payload pointer from this heap).
    pub unsafe fn dup(
        &self,
        parent: *mut u8,
        src: *const u8,
        size: usize,
        n: usize,
        extra: usize,
        add_count: bool,
        label: Option<&'static str>,
    ) -> Result<*mut u8, Error> {
        let src_taken = take::taken(src);

        let nbytes = match self.adjust_size(size, n) {
            Ok(nbytes) => nbytes,
            Err(e) => {
                if src_taken {
                    self.free(src.cast_mut());
                }
                return Err(e);
            }
        };
        let total = match n.checked_add(extra) {
            Some(total) => total,
            None => {
                self.call_error("dup size overflow");
                if src_taken {
                    self.free(src.cast_mut());
                }
                return Err(Error::Overflow);
            }
        };

        if src_taken {
            let mut p = src.cast_mut();
            if let Err(e) = self.resize(&mut p, size, total) {
                self.free(p);
                return Err(e);
            }
            if let Err(e) = self.steal(parent, p) {
                self.free(p);
                return Err(e);
            }
            return Ok(p);
        }

        let ret = self.alloc_arr(parent, size, total, false, add_count, label)?;
        ptr::copy_nonoverlapping(src, ret, nbytes);
        Ok(ret)
    }

    /// First child of `root` (or of the sentinel when `root` is null), or
    /// null when there are none.
    ///
    /// # Safety
    /// `root` must be null or a live payload pointer from this heap.
    pub unsafe fn first(&self, root: *mut u8) -> *mut u8 {
        let t = self.to_hdr_or_sentinel(root);
        let c = first_child(t);
        if c.is_null() {
            ptr::null_mut()
        } else {
            payload_of(c)
        }
    }

    /// Successor of `prev` in a depth-first pre-order walk confined to the
    /// subtree rooted at `root` (null = the whole heap), or null when the
    /// walk is done.
    ///
    /// # Safety
    /// `root` must be null or a live payload pointer from this heap; `prev`
    /// must be a live payload pointer inside `root`'s subtree.
    pub unsafe fn next(&self, root: *mut u8, prev: *const u8) -> *mut u8 {
        let mut t = self.to_hdr(prev);

        // Children first.
        let c = first_child(t);
        if !c.is_null() {
            return payload_of(c);
        }

        // Otherwise the next sibling, climbing to the parent whenever a
        // sibling ring wraps back to its head, and stopping at `root`.
        let top = self.to_hdr_or_sentinel(root);
        while t != top {
            let parent_child = (*t).parent_child;
            let end: *mut ListNode = ptr::addr_of_mut!((*parent_child).children);
            let next = (*t).list.next;
            if next != end {
                return payload_of(next.cast::<Hdr>());
            }
            t = (*parent_child).parent;
        }
        ptr::null_mut()
    }

    /// The node's parent, or null for null input and for nodes owned by the
    /// sentinel.
    ///
    /// # Safety
    /// `ctx` must be null or a live payload pointer from this heap.
    pub unsafe fn parent(&self, ctx: *const u8) -> *mut u8 {
        if ctx.is_null() {
            return ptr::null_mut();
        }
        let t = self.to_hdr(ctx);
        let p = (*(*t).parent_child).parent;
        if p == self.sentinel_hdr() {
            ptr::null_mut()
        } else {
            payload_of(p)
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    /// Free every remaining tree, destructors included, then sweep the
    /// thread's taken-pointer marks. Lifetime is deterministic: whatever
    /// the caller did not free goes down with the heap, and no stale mark
    /// survives to alias a later allocation at a reused address.
    fn drop(&mut self) {
        unsafe {
            let sentinel = self.sentinel_hdr();
            loop {
                let child = first_child(sentinel);
                if child.is_null() {
                    break;
                }
                list::del(ptr::addr_of_mut!((*child).list));
                self.del_tree(child, payload_of(child));
            }
        }
        take::cleanup();
    }
}

/// First child of `parent`, or null.
pub(crate) unsafe fn first_child(parent: *mut Hdr) -> *mut Hdr {
    let children = find_children(parent);
    if children.is_null() {
        return ptr::null_mut();
    }
    list::top(ptr::addr_of_mut!((*children).children)).cast()
}

/// Tail slack that places a LENGTH record at the payload end: round the
/// payload up to the record's alignment, then append one record.
pub(crate) fn extra_for_length(size: usize) -> usize {
    let align = mem::align_of::<LengthProp>();
    let rounded = (size + align - 1) & !(align - 1);
    rounded - size + mem::size_of::<LengthProp>()
}
