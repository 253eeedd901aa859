// Scratch buffers in engine-allocated memory.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::slice;

use crate::abi::Abi;

/// A byte buffer allocated through the engine's allocator and freed with it.
pub struct EngineBuffer {
    ptr: NonNull<u8>,
    len: usize,
    abi: &'static Abi,
}

impl EngineBuffer {
    /// Zero-filled buffer of `len` bytes; `None` if the engine is out of memory.
    pub fn zeroed(abi: &'static Abi, len: usize) -> Option<Self> {
        let raw = unsafe { (abi.memory.mem_alloc)(len.max(1)) } as *mut u8;
        let ptr = NonNull::new(raw)?;
        unsafe { ptr.as_ptr().write_bytes(0, len) };
        Some(EngineBuffer { ptr, len, abi })
    }

    /// Grow or shrink, keeping the common prefix. New bytes are zeroed.
    pub fn resize(&mut self, len: usize) -> bool {
        let raw = unsafe { (self.abi.memory.mem_realloc)(self.ptr.as_ptr() as *mut c_void, len.max(1)) };
        let Some(ptr) = NonNull::new(raw as *mut u8) else { return false };
        if len > self.len {
            unsafe { ptr.as_ptr().add(self.len).write_bytes(0, len - self.len) };
        }
        self.ptr = ptr;
        self.len = len;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for EngineBuffer {
    fn drop(&mut self) {
        unsafe { (self.abi.memory.mem_free)(self.ptr.as_ptr() as *mut c_void) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::install;

    #[test]
    fn buffer_grows_and_keeps_prefix() {
        let abi = install();
        let mut buf = EngineBuffer::zeroed(abi, 4).unwrap();
        unsafe { buf.as_mut_ptr().copy_from(b"abcd".as_ptr(), 4) };
        assert!(buf.resize(6));
        assert_eq!(buf.as_slice(), b"abcd\0\0");
        assert_eq!(buf.len(), 6);
    }
}
