//! Device memory regions.
//!
//! A [`Buffer`] is typed on the host side: offsets and lengths in its API
//! are element counts, converted to byte ranges at the raw boundary. The
//! element type must be [`Pod`] so that a device transfer can never
//! observe or fabricate an invalid value.

use std::fmt;
use std::marker::PhantomData;
use std::ops::BitOr;
use std::sync::Arc;

use bytemuck::Pod;

use crate::api::{mem_flags, query, NULL_HANDLE};
use crate::context::Context;
use crate::error::{check, ErrorCode, ErrorMap, MemoryError};
use crate::handle::{Handle, MemoryCap};

/// Creation flags for memory regions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryFlags(u64);

impl MemoryFlags {
    pub const READ_WRITE: Self = Self(mem_flags::READ_WRITE);
    pub const WRITE_ONLY: Self = Self(mem_flags::WRITE_ONLY);
    pub const READ_ONLY: Self = Self(mem_flags::READ_ONLY);
    pub const HOST_WRITE_ONLY: Self = Self(mem_flags::HOST_WRITE_ONLY);
    pub const HOST_READ_ONLY: Self = Self(mem_flags::HOST_READ_ONLY);
    pub const HOST_NO_ACCESS: Self = Self(mem_flags::HOST_NO_ACCESS);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for MemoryFlags {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

impl BitOr for MemoryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MemoryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryFlags({:#x})", self.0)
    }
}

const CREATE_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidBufferSize,
        "the requested size is zero or exceeds the maximum allocation size of the device.",
    ),
    (
        ErrorCode::InvalidValue,
        "the creation flags are not a valid combination.",
    ),
    (
        ErrorCode::InvalidHostPtr,
        "initial host data was required but not supplied, or supplied when not requested.",
    ),
    (
        ErrorCode::MemObjectAllocationFailure,
        "there was a failure to allocate memory for the buffer object.",
    ),
];

const SUB_BUFFER_ERRORS: ErrorMap = &[
    (
        ErrorCode::MisalignedSubBufferOffset,
        "the sub-buffer origin is not aligned to the device's base address alignment.",
    ),
    (
        ErrorCode::InvalidValue,
        "the sub-buffer region is out of the bounds of its parent.",
    ),
    (
        ErrorCode::InvalidBufferSize,
        "the sub-buffer region is empty.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "sub-buffers of sub-buffers are not supported.",
    ),
    (
        ErrorCode::MemObjectAllocationFailure,
        "there was a failure to allocate memory for the sub-buffer object.",
    ),
];

/// A region of device memory holding `len` elements of `T`.
pub struct Buffer<T: Pod> {
    handle: Handle<MemoryCap>,
    len: usize,
    _elem: PhantomData<fn() -> T>,
}

impl<T: Pod> Buffer<T> {
    /// Allocate a zero-initialized buffer of `len` elements.
    pub fn new(context: &Context, flags: MemoryFlags, len: usize) -> Result<Self, MemoryError> {
        let mut raw = NULL_HANDLE;
        let status = context.handle().api().create_buffer(
            context.handle().raw(),
            flags.bits(),
            len * size_of::<T>(),
            None,
            &mut raw,
        );
        check(status, CREATE_ERRORS)?;
        Ok(Self {
            handle: Handle::from_created(Arc::clone(context.handle().api()), raw),
            len,
            _elem: PhantomData,
        })
    }

    /// Allocate a buffer initialized from `data`.
    pub fn with_data(
        context: &Context,
        flags: MemoryFlags,
        data: &[T],
    ) -> Result<Self, MemoryError> {
        let mut raw = NULL_HANDLE;
        let status = context.handle().api().create_buffer(
            context.handle().raw(),
            flags.bits() | mem_flags::COPY_HOST_DATA,
            std::mem::size_of_val(data),
            Some(bytemuck::cast_slice(data)),
            &mut raw,
        );
        check(status, CREATE_ERRORS)?;
        Ok(Self {
            handle: Handle::from_created(Arc::clone(context.handle().api()), raw),
            len: data.len(),
            _elem: PhantomData,
        })
    }

    /// Create an aliasing view of `self` covering
    /// `offset..offset + len` elements.
    ///
    /// The view shares storage with its parent. The byte origin
    /// (`offset * size_of::<T>()`) must satisfy the device's base address
    /// alignment, the region must lie inside the parent, and the parent
    /// must itself be a root buffer.
    pub fn create_sub_buffer(
        &self,
        flags: MemoryFlags,
        offset: usize,
        len: usize,
    ) -> Result<Self, MemoryError> {
        let mut raw = NULL_HANDLE;
        let status = self.handle.api().create_sub_buffer(
            self.handle.raw(),
            flags.bits(),
            offset * size_of::<T>(),
            len * size_of::<T>(),
            &mut raw,
        );
        check(status, SUB_BUFFER_ERRORS)?;
        Ok(Self {
            handle: Handle::from_created(Arc::clone(self.handle.api()), raw),
            len,
            _elem: PhantomData,
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    pub fn byte_size(&self) -> usize {
        self.len * size_of::<T>()
    }

    pub fn flags(&self) -> Result<MemoryFlags, MemoryError> {
        Ok(MemoryFlags::from_bits(self.handle.info(query::memory::FLAGS)?))
    }

    pub fn map_count(&self) -> Result<u32, MemoryError> {
        self.handle.info(query::memory::MAP_COUNT)
    }

    pub fn reference_count(&self) -> Result<u32, MemoryError> {
        self.handle.info(query::memory::REFERENCE_COUNT)
    }

    /// The root buffer a sub-buffer aliases, or `None` for a root buffer.
    pub fn parent_buffer(&self) -> Result<Option<Self>, MemoryError> {
        let parent: u64 = self.handle.info(query::memory::ASSOCIATED)?;
        if parent == NULL_HANDLE {
            return Ok(None);
        }
        let handle = Handle::from_borrowed(Arc::clone(self.handle.api()), parent)?;
        let byte_size: u64 = handle.info(query::memory::SIZE)?;
        Ok(Some(Self {
            handle,
            len: byte_size as usize / size_of::<T>(),
            _elem: PhantomData,
        }))
    }

    /// Byte offset into the parent buffer; zero for a root buffer.
    pub fn offset(&self) -> Result<usize, MemoryError> {
        Ok(self.handle.info::<u64>(query::memory::OFFSET)? as usize)
    }

    pub(crate) fn handle(&self) -> &Handle<MemoryCap> {
        &self.handle
    }
}

impl<T: Pod> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            len: self.len,
            _elem: PhantomData,
        }
    }
}

impl<T: Pod> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<T: Pod> PartialEq for Buffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T: Pod> Eq for Buffer<T> {}
