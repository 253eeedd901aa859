// Lifetime scopes and managed handles.
//
// Every engine handle the library owns is wrapped in a `Managed` registered
// with exactly one `LifetimeScope`. Scopes form a per-thread stack whose
// bottom is a lazily created root scope (the process scope of that thread).
// A handle is freed when its wrapper drops or, as a backstop, when its scope
// ends; whichever comes first. Handles and scopes only reference each other
// weakly: the guard keeps a scope alive, the wrapper keeps a handle alive.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::ffi::c_void;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use tether_ffi::{InstanceId, ObjectHandle, PackedHandle, TypePtr, VariantHandle, VariantPtr, VariantType};

use crate::abi::Abi;
use crate::error::{HostResult, LifetimeError};

// ---------------------------------------------------------------------------
// Raw handles and release policy
// ---------------------------------------------------------------------------

/// Handle bytes as the engine produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawHandle {
    Object(ObjectHandle),
    Packed(PackedHandle),
    Variant(VariantHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HandleKind {
    Object,
    Packed,
    Variant,
}

impl RawHandle {
    fn split(self) -> (HandleKind, [u64; 3]) {
        match self {
            RawHandle::Object(h) => (HandleKind::Object, [h.to_addr(), 0, 0]),
            RawHandle::Packed(h) => (HandleKind::Packed, [h.words[0], h.words[1], 0]),
            RawHandle::Variant(h) => (HandleKind::Variant, h.words),
        }
    }

    fn join(kind: HandleKind, words: [u64; 3]) -> RawHandle {
        match kind {
            HandleKind::Object => RawHandle::Object(ObjectHandle::from_addr(words[0])),
            HandleKind::Packed => RawHandle::Packed(PackedHandle { words: [words[0], words[1]] }),
            HandleKind::Variant => RawHandle::Variant(VariantHandle { words }),
        }
    }

    pub fn as_object(self) -> Option<ObjectHandle> {
        match self {
            RawHandle::Object(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_packed(self) -> Option<PackedHandle> {
        match self {
            RawHandle::Packed(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_variant(self) -> Option<VariantHandle> {
        match self {
            RawHandle::Variant(h) => Some(h),
            _ => None,
        }
    }
}

/// How a handle is given back to the engine when it ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// `variant_destroy`.
    Variant,
    /// The cached builtin destructor of this type (nothing for plain data).
    Builtin(VariantType),
    /// Owned object: unreference (destroying on last) when ref-counted,
    /// destroy otherwise. Skipped if the engine already destroyed `id`.
    Object { refcounted: bool, id: InstanceId },
    /// Engine-owned; ending only invalidates the wrapper.
    Borrowed,
}

/// Give a handle back to the engine according to `release`.
///
/// # Safety
/// `words` must hold a live handle of the kind `release` expects.
unsafe fn release_raw(abi: &'static Abi, words: *mut [u64; 3], release: Release) {
    unsafe {
        match release {
            Release::Borrowed => {}
            Release::Variant => (abi.variants.variant_destroy)(words as VariantPtr),
            Release::Builtin(ty) => {
                if let Some(dtor) = abi.destructor(ty) {
                    dtor(words as TypePtr);
                }
            }
            Release::Object { refcounted, id } => {
                let handle = ObjectHandle::from_addr((*words)[0]);
                if (abi.objects.object_get_instance_from_id)(id) != handle {
                    return;
                }
                if !refcounted || crate::object::unreference_raw(abi, handle) {
                    (abi.objects.object_destroy)(handle);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scope stack
// ---------------------------------------------------------------------------

const COMPACT_THRESHOLD: usize = 64;

/// Live handles plus detached ones in transit, across all threads.
static OUTSTANDING: AtomicUsize = AtomicUsize::new(0);

struct ScopeInner {
    handles: RefCell<Vec<Weak<HandleSlot>>>,
    compact_at: Cell<usize>,
    depth: usize,
}

impl ScopeInner {
    fn new(depth: usize) -> Rc<Self> {
        Rc::new(ScopeInner {
            handles: RefCell::new(Vec::new()),
            compact_at: Cell::new(COMPACT_THRESHOLD),
            depth,
        })
    }

    fn register(self: &Rc<Self>, slot: &Rc<HandleSlot>) {
        let mut handles = self.handles.borrow_mut();
        if handles.len() >= self.compact_at.get() {
            handles.retain(|weak| weak.upgrade().is_some_and(|s| s.live.get()));
            self.compact_at.set((handles.len() * 2).max(COMPACT_THRESHOLD));
        }
        handles.push(Rc::downgrade(slot));
    }

    /// End every still-live handle registered here, newest first.
    fn release_all(&self) {
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        for weak in handles.into_iter().rev() {
            if let Some(slot) = weak.upgrade() {
                if slot.belongs_to(self) {
                    let _ = slot.finish();
                }
            }
        }
    }

    fn live_count(&self) -> usize {
        self.handles
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| slot.live.get() && slot.belongs_to(self))
            .count()
    }
}

thread_local! {
    // Index 0 is the root scope once created.
    static STACK: RefCell<Vec<Rc<ScopeInner>>> = const { RefCell::new(Vec::new()) };
}

fn with_stack<R>(f: impl FnOnce(&mut Vec<Rc<ScopeInner>>) -> R) -> R {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.is_empty() {
            stack.push(ScopeInner::new(0));
        }
        f(&mut stack)
    })
}

fn current_scope() -> Rc<ScopeInner> {
    with_stack(|stack| stack[stack.len() - 1].clone())
}

fn root_scope() -> Rc<ScopeInner> {
    with_stack(|stack| stack[0].clone())
}

/// Pop `inner` off this thread's stack; it must be the innermost scope.
fn pop_scope(inner: &Rc<ScopeInner>) -> bool {
    with_stack(|stack| match stack.last() {
        Some(top) if Rc::ptr_eq(top, inner) && stack.len() > 1 => {
            stack.pop();
            true
        }
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// LifetimeScope
// ---------------------------------------------------------------------------

/// A region owning every handle created while it is the innermost scope.
///
/// Ending a scope (explicitly or by dropping the guard) frees its remaining
/// live handles in reverse acquisition order. Scopes nest and must end
/// innermost first; anything else is a fatal contract violation.
pub struct LifetimeScope {
    inner: Option<Rc<ScopeInner>>,
}

impl LifetimeScope {
    pub fn new() -> Self {
        let inner = with_stack(|stack| {
            let inner = ScopeInner::new(stack.len());
            stack.push(inner.clone());
            inner
        });
        LifetimeScope { inner: Some(inner) }
    }

    /// Nesting depth; the root scope is depth 0.
    pub fn depth(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.depth)
    }

    /// Handles still live and owned by this scope.
    pub fn live_handles(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.live_count())
    }

    /// End the scope now.
    ///
    /// Panics if a scope opened after this one on the same thread is still
    /// open.
    pub fn end(mut self) {
        if let Some(inner) = self.inner.take() {
            if !pop_scope(&inner) {
                panic!("lifetime scope ended out of order");
            }
            inner.release_all();
        }
    }

    /// End this thread's root scope, freeing everything it still owns.
    /// A fresh root is created on next use. Panics if other scopes are open.
    pub fn end_process_scope() {
        let root = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.len() {
                0 => None,
                1 => stack.pop(),
                _ => panic!("lifetime scope ended out of order"),
            }
        });
        if let Some(root) = root {
            root.release_all();
        }
    }

    /// Live handles in this thread's innermost scope.
    pub fn current_live_handles() -> usize {
        current_scope().live_count()
    }

    /// Nesting depth of this thread's innermost scope.
    pub fn current_depth() -> usize {
        with_stack(|stack| stack.len() - 1)
    }

    /// Handles the library still owns on any thread, counting detached
    /// handles that have not been attached or dropped yet.
    pub fn outstanding_handles() -> usize {
        OUTSTANDING.load(Ordering::Acquire)
    }
}

impl Default for LifetimeScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LifetimeScope {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else { return };
        if pop_scope(&inner) {
            inner.release_all();
        } else if !std::thread::panicking() {
            panic!("lifetime scope ended out of order");
        }
    }
}

impl fmt::Debug for LifetimeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeScope")
            .field("depth", &self.depth())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Managed
// ---------------------------------------------------------------------------

struct HandleSlot {
    words: UnsafeCell<[u64; 3]>,
    kind: HandleKind,
    release: Release,
    live: Cell<bool>,
    pinned: Cell<bool>,
    scope: RefCell<Weak<ScopeInner>>,
    abi: &'static Abi,
}

impl HandleSlot {
    fn belongs_to(&self, scope: &ScopeInner) -> bool {
        std::ptr::eq(self.scope.borrow().as_ptr(), scope)
    }

    /// Mark dead; true if the slot was live until now.
    fn retire(&self) -> bool {
        let was_live = self.live.replace(false);
        if was_live {
            OUTSTANDING.fetch_sub(1, Ordering::AcqRel);
        }
        was_live
    }

    fn finish(&self) -> HostResult<()> {
        if !self.retire() {
            return Err(LifetimeError::AlreadyEnded.into());
        }
        // SAFETY: the slot was live, so the words still hold the handle.
        unsafe { release_raw(self.abi, self.words.get(), self.release) };
        Ok(())
    }

    fn check_live(&self) -> HostResult<()> {
        if self.live.get() { Ok(()) } else { Err(LifetimeError::UseAfterFree.into()) }
    }
}

/// An engine handle owned by the library and tracked by a lifetime scope.
///
/// State machine: live until ended, transferred, or detached; dead
/// forever after. Every operation on a dead handle fails with
/// [`LifetimeError::UseAfterFree`] without reaching the engine.
pub struct Managed {
    slot: Rc<HandleSlot>,
}

/// Wrap `raw` and register it with `scope`.
pub fn new_handle(scope: &LifetimeScope, abi: &'static Abi, raw: RawHandle, release: Release) -> Managed {
    Managed::new(scope, abi, raw, release)
}

impl Managed {
    pub fn new(scope: &LifetimeScope, abi: &'static Abi, raw: RawHandle, release: Release) -> Managed {
        let inner = match &scope.inner {
            Some(inner) => inner.clone(),
            None => current_scope(),
        };
        Self::register(&inner, abi, raw, release)
    }

    /// Wrap `raw` in this thread's innermost scope.
    pub fn new_in_current(abi: &'static Abi, raw: RawHandle, release: Release) -> Managed {
        Self::register(&current_scope(), abi, raw, release)
    }

    fn register(inner: &Rc<ScopeInner>, abi: &'static Abi, raw: RawHandle, release: Release) -> Managed {
        let (kind, words) = raw.split();
        let slot = Rc::new(HandleSlot {
            words: UnsafeCell::new(words),
            kind,
            release,
            live: Cell::new(true),
            pinned: Cell::new(false),
            scope: RefCell::new(Rc::downgrade(inner)),
            abi,
        });
        inner.register(&slot);
        OUTSTANDING.fetch_add(1, Ordering::AcqRel);
        Managed { slot }
    }

    pub fn abi(&self) -> &'static Abi {
        self.slot.abi
    }

    pub fn release_policy(&self) -> Release {
        self.slot.release
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.slot.live.get()
    }

    pub fn is_pinned(&self) -> bool {
        self.slot.pinned.get()
    }

    /// The handle bytes, if still live.
    pub fn get_raw(&self) -> HostResult<RawHandle> {
        self.slot.check_live()?;
        // SAFETY: single-threaded access; the engine only writes through
        // `storage_ptr` during calls we make.
        Ok(RawHandle::join(self.slot.kind, unsafe { *self.slot.words.get() }))
    }

    /// Address of the handle storage, for engine entries that read or
    /// mutate the value in place.
    pub fn storage_ptr(&self) -> HostResult<*mut c_void> {
        self.slot.check_live()?;
        Ok(self.slot.words.get() as *mut c_void)
    }

    /// Free the handle now. A dead handle reports `AlreadyEnded` and the
    /// engine is not called.
    pub fn end(&self) -> HostResult<()> {
        self.slot.finish()
    }

    /// Hand ownership to the engine. The wrapper is dead afterwards and the
    /// scope will not free the handle.
    pub fn transfer_to_engine(&self) -> HostResult<RawHandle> {
        let raw = self.get_raw()?;
        if self.slot.pinned.get() {
            return Err(LifetimeError::Pinned.into());
        }
        self.slot.retire();
        Ok(raw)
    }

    /// Re-home the handle in the root scope and pin it to user state, so it
    /// outlives the scope it was created in.
    pub fn persist(&self) -> HostResult<()> {
        self.slot.check_live()?;
        let root = root_scope();
        *self.slot.scope.borrow_mut() = Rc::downgrade(&root);
        root.register(&self.slot);
        self.slot.pinned.set(true);
        Ok(())
    }

    /// Unregister from this thread so the handle can move to another one.
    pub fn detach(self) -> HostResult<DetachedHandle> {
        let raw = self.get_raw()?;
        // The detached handle keeps this slot's outstanding count.
        self.slot.live.set(false);
        Ok(DetachedHandle {
            raw,
            release: self.slot.release,
            pinned: self.slot.pinned.get(),
            abi: self.slot.abi,
            armed: true,
        })
    }
}

impl Drop for Managed {
    fn drop(&mut self) {
        if self.slot.live.get() {
            let _ = self.slot.finish();
        }
    }
}

impl fmt::Debug for Managed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("raw", &self.get_raw().ok())
            .field("release", &self.slot.release)
            .field("pinned", &self.slot.pinned.get())
            .finish()
    }
}

/// A handle in transit between threads. Attach it on the destination
/// thread; dropping it unattached frees the handle.
pub struct DetachedHandle {
    raw: RawHandle,
    release: Release,
    pinned: bool,
    abi: &'static Abi,
    armed: bool,
}

impl DetachedHandle {
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Register in this thread's innermost scope (its root, if pinned).
    pub fn attach(mut self) -> Managed {
        self.armed = false;
        OUTSTANDING.fetch_sub(1, Ordering::AcqRel);
        let scope = if self.pinned { root_scope() } else { current_scope() };
        let managed = Managed::register(&scope, self.abi, self.raw, self.release);
        managed.slot.pinned.set(self.pinned);
        managed
    }
}

impl Drop for DetachedHandle {
    fn drop(&mut self) {
        if self.armed {
            let (_, mut words) = self.raw.split();
            unsafe { release_raw(self.abi, &mut words, self.release) };
            OUTSTANDING.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::test_support::{install, spawn_object};

    fn owned_object(scope: &LifetimeScope) -> (Managed, InstanceId) {
        let abi = install();
        let (handle, id) = spawn_object("Object");
        let managed = new_handle(
            scope,
            abi,
            RawHandle::Object(handle),
            Release::Object { refcounted: false, id },
        );
        (managed, id)
    }

    #[test]
    fn scope_end_frees_in_reverse_order() {
        let scope = LifetimeScope::new();
        let (a, id_a) = owned_object(&scope);
        let (b, id_b) = owned_object(&scope);
        let (c, id_c) = owned_object(&scope);
        // Wrappers escape the scope; the scope end is what frees them.
        let escaped = [a, b, c];
        scope.end();
        let order: Vec<_> = tether_test_host::destroy_log()
            .into_iter()
            .filter(|id| [id_a, id_b, id_c].contains(id))
            .collect();
        assert_eq!(order, vec![id_c, id_b, id_a]);
        for handle in &escaped {
            assert_eq!(handle.get_raw(), Err(HostError::Lifetime(LifetimeError::UseAfterFree)));
        }
    }

    #[test]
    fn end_twice_reports_already_ended_without_engine_call() {
        let scope = LifetimeScope::new();
        let (handle, id) = owned_object(&scope);
        handle.end().unwrap();
        assert!(!tether_test_host::is_live(id));
        let destroyed = tether_test_host::destroy_log().iter().filter(|d| **d == id).count();
        assert_eq!(handle.end(), Err(HostError::Lifetime(LifetimeError::AlreadyEnded)));
        let after = tether_test_host::destroy_log().iter().filter(|d| **d == id).count();
        assert_eq!(destroyed, after);
    }

    #[test]
    fn transferred_handle_survives_scope_end() {
        let scope = LifetimeScope::new();
        let (handle, id) = owned_object(&scope);
        let raw = handle.transfer_to_engine().unwrap();
        assert!(raw.as_object().is_some());
        assert!(!handle.is_live());
        scope.end();
        assert!(tether_test_host::is_live(id));
        assert_eq!(handle.transfer_to_engine(), Err(HostError::Lifetime(LifetimeError::UseAfterFree)));
        drop(handle);
        assert!(tether_test_host::is_live(id));
        tether_test_host::destroy(id);
    }

    #[test]
    fn dropping_wrapper_frees_before_scope_end() {
        let scope = LifetimeScope::new();
        let (handle, id) = owned_object(&scope);
        assert_eq!(scope.live_handles(), 1);
        drop(handle);
        assert!(!tether_test_host::is_live(id));
        assert_eq!(scope.live_handles(), 0);
        scope.end();
    }

    #[test]
    fn persisted_handle_outlives_its_scope_and_cannot_transfer() {
        let scope = LifetimeScope::new();
        let (handle, id) = owned_object(&scope);
        handle.persist().unwrap();
        scope.end();
        assert!(handle.is_live());
        assert!(tether_test_host::is_live(id));
        assert_eq!(handle.transfer_to_engine(), Err(HostError::Lifetime(LifetimeError::Pinned)));
        drop(handle);
        assert!(!tether_test_host::is_live(id));
    }

    #[test]
    fn nested_scopes_track_depth() {
        let base = LifetimeScope::current_depth();
        let outer = LifetimeScope::new();
        let inner = LifetimeScope::new();
        assert_eq!(inner.depth(), outer.depth() + 1);
        assert_eq!(LifetimeScope::current_depth(), base + 2);
        inner.end();
        outer.end();
        assert_eq!(LifetimeScope::current_depth(), base);
    }

    #[test]
    #[should_panic(expected = "lifetime scope ended out of order")]
    fn ending_outer_scope_first_panics() {
        let outer = LifetimeScope::new();
        let _inner = LifetimeScope::new();
        outer.end();
    }

    #[test]
    fn detached_handle_moves_between_threads() {
        let scope = LifetimeScope::new();
        let (handle, id) = owned_object(&scope);
        let detached = handle.detach().unwrap();
        let id_seen = std::thread::spawn(move || {
            let inner = LifetimeScope::new();
            let managed = detached.attach();
            assert!(managed.is_live());
            assert_eq!(inner.live_handles(), 1);
            inner.end();
            assert!(!managed.is_live());
            id
        })
        .join()
        .unwrap();
        assert!(!tether_test_host::is_live(id_seen));
        scope.end();
    }

    #[test]
    fn stale_object_is_not_released_twice() {
        let scope = LifetimeScope::new();
        let (handle, id) = owned_object(&scope);
        tether_test_host::destroy(id);
        let destroyed = tether_test_host::destroy_log().iter().filter(|d| **d == id).count();
        drop(handle);
        scope.end();
        let after = tether_test_host::destroy_log().iter().filter(|d| **d == id).count();
        assert_eq!(destroyed, after);
    }
}
