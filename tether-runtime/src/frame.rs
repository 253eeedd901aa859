// Call frames for pointer-calls: fixed-size argument and return slots in
// address-stable storage, recycled through a pool so steady-state calls do
// not allocate.

use std::ffi::c_void;
use std::mem::{align_of, size_of};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::lock_or_recover;

/// Maximum number of arguments in one frame.
pub const MAX_ARGS: usize = 16;
/// Words per argument slot and in the return slot.
pub const SLOT_WORDS: usize = 8;
/// Largest value a slot can hold.
pub const SLOT_BYTES: usize = SLOT_WORDS * size_of::<u64>();
const SLOT_ALIGN: usize = 16;

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Slot([u64; SLOT_WORDS]);

const _: () = assert!(size_of::<Slot>() == SLOT_BYTES);
const _: () = assert!(align_of::<Slot>() == SLOT_ALIGN);

struct FrameStorage {
    args: [Slot; MAX_ARGS],
    ret: Slot,
    arg_ptrs: [*const c_void; MAX_ARGS],
    count: usize,
}

// SAFETY: the pointers in `arg_ptrs` only ever point into the same storage.
unsafe impl Send for FrameStorage {}

impl FrameStorage {
    fn new() -> Box<Self> {
        Box::new(FrameStorage {
            args: [Slot([0; SLOT_WORDS]); MAX_ARGS],
            ret: Slot([0; SLOT_WORDS]),
            arg_ptrs: [ptr::null(); MAX_ARGS],
            count: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// FramePool
// ---------------------------------------------------------------------------

/// Recycles frame storage. Exhaustion allocates a fresh frame; freeing
/// returns it, so nested frames during reverse calls each get their own.
pub struct FramePool {
    free: Mutex<Vec<Box<FrameStorage>>>,
    fresh: AtomicUsize,
}

static POOL: FramePool = FramePool::new();

impl FramePool {
    pub const fn new() -> Self {
        FramePool {
            free: Mutex::new(Vec::new()),
            fresh: AtomicUsize::new(0),
        }
    }

    /// The process-wide pool used by [`CallFrame::new`].
    pub fn global() -> &'static FramePool {
        &POOL
    }

    pub fn frame(&self) -> CallFrame<'_> {
        let recycled = lock_or_recover(&self.free).pop();
        let storage = recycled.unwrap_or_else(|| {
            self.fresh.fetch_add(1, Ordering::Relaxed);
            FrameStorage::new()
        });
        CallFrame { storage: Some(storage), pool: self }
    }

    /// How many frames this pool has ever had to allocate.
    pub fn fresh_allocations(&self) -> usize {
        self.fresh.load(Ordering::Relaxed)
    }

    /// Frames currently parked in the pool.
    pub fn idle(&self) -> usize {
        lock_or_recover(&self.free).len()
    }

    fn give_back(&self, mut storage: Box<FrameStorage>) {
        storage.count = 0;
        lock_or_recover(&self.free).push(storage);
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CallFrame
// ---------------------------------------------------------------------------

/// One pointer-call's worth of argument and return storage.
///
/// Pushed values are copied bitwise; a frame never owns what it holds, so
/// handles pushed as arguments stay owned by their wrappers.
pub struct CallFrame<'p> {
    storage: Option<Box<FrameStorage>>,
    pool: &'p FramePool,
}

/// Acquire a frame from the global pool.
pub fn new_frame() -> CallFrame<'static> {
    CallFrame::new()
}

impl CallFrame<'static> {
    pub fn new() -> Self {
        POOL.frame()
    }
}

impl Default for CallFrame<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> CallFrame<'p> {
    fn storage(&self) -> &FrameStorage {
        // Only `free` takes the storage, and it consumes the frame.
        self.storage.as_deref().expect("call frame already freed")
    }

    fn storage_mut(&mut self) -> &mut FrameStorage {
        self.storage.as_deref_mut().expect("call frame already freed")
    }

    /// Copy `value` into the next argument slot and return the slot address.
    ///
    /// Panics when all [`MAX_ARGS`] slots are in use.
    pub fn push_arg<T: Copy>(&mut self, value: T) -> *const c_void {
        const {
            assert!(size_of::<T>() <= SLOT_BYTES, "argument type too large for a call-frame slot");
            assert!(align_of::<T>() <= SLOT_ALIGN, "argument type over-aligned for a call-frame slot");
        }
        let storage = self.storage_mut();
        let index = storage.count;
        assert!(index < MAX_ARGS, "call frame overflow: more than {MAX_ARGS} arguments");
        let slot = &mut storage.args[index];
        slot.0 = [0; SLOT_WORDS];
        let dst = slot.0.as_mut_ptr() as *mut T;
        // SAFETY: size and alignment checked at compile time.
        unsafe { ptr::write(dst, value) };
        storage.arg_ptrs[index] = dst as *const c_void;
        storage.count += 1;
        dst as *const c_void
    }

    /// Zero the return slot and hand out a typed pointer for the engine to
    /// write through.
    pub fn reserve_return<T>(&mut self) -> *mut T {
        const {
            assert!(size_of::<T>() <= SLOT_BYTES, "return type too large for a call-frame slot");
            assert!(align_of::<T>() <= SLOT_ALIGN, "return type over-aligned for a call-frame slot");
        }
        let ret = &mut self.storage_mut().ret;
        ret.0 = [0; SLOT_WORDS];
        ret.0.as_mut_ptr() as *mut T
    }

    /// Read back the return slot.
    ///
    /// # Safety
    /// The engine must have written a valid `T` through [`reserve_return`].
    ///
    /// [`reserve_return`]: Self::reserve_return
    pub unsafe fn read_return<T: Copy>(&self) -> T {
        const { assert!(size_of::<T>() <= SLOT_BYTES) };
        unsafe { ptr::read(self.storage().ret.0.as_ptr() as *const T) }
    }

    /// Raw return-slot address, for engine entries that take an untyped slot.
    pub fn return_ptr(&mut self) -> *mut c_void {
        self.storage_mut().ret.0.as_mut_ptr() as *mut c_void
    }

    /// The argument pointer array the engine reads.
    pub fn args_array(&self) -> *const *const c_void {
        self.storage().arg_ptrs.as_ptr()
    }

    pub fn arg_count(&self) -> usize {
        self.storage().count
    }

    /// Return the frame to its pool. Dropping does the same.
    pub fn free(mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool.give_back(storage);
        }
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool.give_back(storage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_calls_reuse_one_frame() {
        let pool = FramePool::new();
        for i in 0..1000i64 {
            let mut frame = pool.frame();
            frame.push_arg(i);
            frame.push_arg(i as f64);
            frame.free();
        }
        assert_eq!(pool.fresh_allocations(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn nested_frames_get_distinct_storage() {
        let pool = FramePool::new();
        let mut outer = pool.frame();
        let outer_arg = outer.push_arg(7u32);
        {
            let mut inner = pool.frame();
            let inner_arg = inner.push_arg(9u32);
            assert_ne!(outer_arg, inner_arg);
        }
        assert_eq!(unsafe { *(outer_arg as *const u32) }, 7);
        drop(outer);
        assert_eq!(pool.fresh_allocations(), 2);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn args_array_points_at_pushed_values() {
        let mut frame = new_frame();
        frame.push_arg(1.5f64);
        frame.push_arg([3u64; 8]);
        let args = frame.args_array();
        unsafe {
            assert_eq!(*(*args as *const f64), 1.5);
            assert_eq!(*(*args.add(1) as *const [u64; 8]), [3u64; 8]);
        }
        assert_eq!(frame.arg_count(), 2);
    }

    #[test]
    fn return_slot_round_trips() {
        let mut frame = new_frame();
        let ret = frame.reserve_return::<i64>();
        unsafe { ret.write(-5) };
        assert_eq!(unsafe { frame.read_return::<i64>() }, -5);
    }

    #[test]
    #[should_panic(expected = "call frame overflow")]
    fn seventeenth_argument_panics() {
        let pool = FramePool::new();
        let mut frame = pool.frame();
        for i in 0..=MAX_ARGS {
            frame.push_arg(i);
        }
    }

    #[test]
    fn recycled_frames_start_empty() {
        let pool = FramePool::new();
        let mut frame = pool.frame();
        frame.push_arg(1u8);
        frame.free();
        let frame = pool.frame();
        assert_eq!(frame.arg_count(), 0);
    }
}
