//! Buffer backing storage with a stable address.
//!
//! Mapping hands out raw pointers into the store, so the allocation must
//! never move while the object is alive. The bytes are owned through a
//! raw pointer obtained from `Box::into_raw` and freed on drop.

/// A fixed-size, stably-addressed byte store.
pub(crate) struct Storage {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the store is plain bytes behind a stable allocation; all access
// goes through the device's single state lock.
unsafe impl Send for Storage {}
// SAFETY: as above.
unsafe impl Sync for Storage {}

impl Storage {
    pub fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        Self {
            ptr: Box::into_raw(boxed).cast(),
            len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let storage = Self::zeroed(bytes.len());
        // SAFETY: the fresh allocation is exactly bytes.len() long.
        unsafe { storage.write(0, bytes.as_ptr(), bytes.len()) };
        storage
    }

    /// Pointer to the byte at `offset`. In bounds for the store's length;
    /// dereferencing it is governed by the map contract.
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        // SAFETY: offset is within the allocation per the assert above.
        unsafe { self.ptr.add(offset) }
    }

    /// Copy `len` bytes out of the store.
    ///
    /// # Safety
    /// `offset + len` must be within the store and `dst` valid for writes
    /// of `len` bytes, not overlapping the store.
    pub unsafe fn read(&self, offset: usize, dst: *mut u8, len: usize) {
        debug_assert!(offset + len <= self.len);
        // SAFETY: per the function contract.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst, len) };
    }

    /// Copy `len` bytes into the store.
    ///
    /// # Safety
    /// `offset + len` must be within the store and `src` valid for reads
    /// of `len` bytes, not overlapping the store region being written.
    pub unsafe fn write(&self, offset: usize, src: *const u8, len: usize) {
        debug_assert!(offset + len <= self.len);
        // SAFETY: per the function contract.
        unsafe { std::ptr::copy_nonoverlapping(src, self.ptr.add(offset), len) };
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // SAFETY: ptr and len came from Box::into_raw of a boxed slice of
        // exactly this length, and nothing else frees it.
        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr, self.len)) });
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("len", &self.len).finish()
    }
}
