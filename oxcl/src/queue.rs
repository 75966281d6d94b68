//! Command queues and the enqueue protocol.
//!
//! Offsets, lengths, and rectangle geometry in this module are expressed
//! in *elements* of the buffer's type; conversion to byte addressing
//! happens once, at the raw boundary. Blocking and non-blocking forms of
//! each transfer are distinct operations: the blocking form returns
//! plain data, the `_async` form returns the [`Event`] tracking the
//! command.
//!
//! Every enqueue call checks the driver's status code before any event
//! or mapping value is constructed, so a failed enqueue never hands back
//! a half-made object.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use bytemuck::Pod;

use crate::api::{map_flags, query, queue_props, RawHandle, NULL_HANDLE};
use crate::buffer::Buffer;
use crate::context::Context;
use crate::device::Device;
use crate::error::{check, ErrorCode, ErrorMap, Failure, QueueError};
use crate::event::Event;
use crate::handle::{Handle, QueueCap};
use crate::mapped::Mapped;

/// Command-queue configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueProperties {
    /// Allow the device to reorder commands; ordering is then expressed
    /// only through wait-lists.
    pub out_of_order: bool,
    /// Record profiling timestamps on this queue's events.
    pub profiling: bool,
}

impl QueueProperties {
    pub fn bits(self) -> u64 {
        let mut bits = 0;
        if self.out_of_order {
            bits |= queue_props::OUT_OF_ORDER;
        }
        if self.profiling {
            bits |= queue_props::PROFILING;
        }
        bits
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            out_of_order: bits & queue_props::OUT_OF_ORDER != 0,
            profiling: bits & queue_props::PROFILING != 0,
        }
    }
}

/// Mapping intent for [`CommandQueue::map`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapFlags(u64);

impl MapFlags {
    pub const READ: Self = Self(map_flags::READ);
    pub const WRITE: Self = Self(map_flags::WRITE);
    pub const WRITE_INVALIDATE: Self = Self(map_flags::WRITE_INVALIDATE);

    pub fn bits(self) -> u64 {
        self.0
    }
}

impl Default for MapFlags {
    fn default() -> Self {
        Self::READ | Self::WRITE
    }
}

impl BitOr for MapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapFlags({:#x})", self.0)
    }
}

/// Geometry of a rectangular transfer between a buffer and host memory.
///
/// All components are element counts: origins are
/// `[x elements, y rows, z slices]` and `extent` is the size of the
/// region along each axis. A rank below 3 is expressed by leaving the
/// unused axes at origin 0, extent 1, which the constructors do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub buffer_origin: [usize; 3],
    pub host_origin: [usize; 3],
    pub extent: [usize; 3],
}

impl Rect {
    /// A 1-D span of `extent` elements.
    pub fn line(buffer_origin: usize, host_origin: usize, extent: usize) -> Self {
        Self {
            buffer_origin: [buffer_origin, 0, 0],
            host_origin: [host_origin, 0, 0],
            extent: [extent, 1, 1],
        }
    }

    /// A 2-D region of `extent[0]` elements by `extent[1]` rows.
    pub fn plane(buffer_origin: [usize; 2], host_origin: [usize; 2], extent: [usize; 2]) -> Self {
        Self {
            buffer_origin: [buffer_origin[0], buffer_origin[1], 0],
            host_origin: [host_origin[0], host_origin[1], 0],
            extent: [extent[0], extent[1], 1],
        }
    }

    /// A full 3-D region.
    pub fn volume(buffer_origin: [usize; 3], host_origin: [usize; 3], extent: [usize; 3]) -> Self {
        Self {
            buffer_origin,
            host_origin,
            extent,
        }
    }
}

/// Geometry of a rectangular buffer-to-buffer copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyRect {
    pub src_origin: [usize; 3],
    pub dst_origin: [usize; 3],
    pub extent: [usize; 3],
}

impl CopyRect {
    pub fn line(src_origin: usize, dst_origin: usize, extent: usize) -> Self {
        Self {
            src_origin: [src_origin, 0, 0],
            dst_origin: [dst_origin, 0, 0],
            extent: [extent, 1, 1],
        }
    }

    pub fn plane(src_origin: [usize; 2], dst_origin: [usize; 2], extent: [usize; 2]) -> Self {
        Self {
            src_origin: [src_origin[0], src_origin[1], 0],
            dst_origin: [dst_origin[0], dst_origin[1], 0],
            extent: [extent[0], extent[1], 1],
        }
    }

    pub fn volume(src_origin: [usize; 3], dst_origin: [usize; 3], extent: [usize; 3]) -> Self {
        Self {
            src_origin,
            dst_origin,
            extent,
        }
    }
}

/// Row and slice strides of a rectangular layout, in elements. Zero
/// means tightly packed (row stride = extent x, slice stride =
/// row stride times extent y).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pitches {
    pub row: usize,
    pub slice: usize,
}

impl Pitches {
    pub fn tight() -> Self {
        Self::default()
    }

    pub fn rows(row: usize) -> Self {
        Self { row, slice: 0 }
    }
}

const CREATE_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidContext,
        "the context is not a valid context.",
    ),
    (
        ErrorCode::InvalidDevice,
        "the device is not a valid device or is not associated with the context.",
    ),
    (
        ErrorCode::InvalidQueueProperties,
        "the requested properties are not supported by the device.",
    ),
];

const TRANSFER_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidValue,
        "the region being read or written is outside the bounds of the buffer.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "the buffer is not a valid memory object.",
    ),
    (
        ErrorCode::InvalidCommandQueue,
        "the command queue is not a valid command queue.",
    ),
    (
        ErrorCode::InvalidContext,
        "the queue, the buffer, and the wait-list events do not share a context.",
    ),
    (
        ErrorCode::InvalidEventWaitList,
        "the wait list contains an invalid event.",
    ),
    (
        ErrorCode::ExecStatusErrorForEventsInWaitList,
        "the operation is blocking and an event in the wait list has a negative execution status.",
    ),
    (
        ErrorCode::MemObjectAllocationFailure,
        "there was a failure to allocate memory for data store associated with the buffer.",
    ),
];

const COPY_ERRORS: ErrorMap = &[
    (
        ErrorCode::MemCopyOverlap,
        "the source and destination regions overlap within the same underlying buffer.",
    ),
    (
        ErrorCode::InvalidValue,
        "a region being copied is outside the bounds of its buffer.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "the source or destination is not a valid memory object.",
    ),
    (
        ErrorCode::InvalidCommandQueue,
        "the command queue is not a valid command queue.",
    ),
    (
        ErrorCode::InvalidContext,
        "the queue, the buffers, and the wait-list events do not share a context.",
    ),
    (
        ErrorCode::InvalidEventWaitList,
        "the wait list contains an invalid event.",
    ),
    (
        ErrorCode::MemObjectAllocationFailure,
        "there was a failure to allocate memory for data store associated with the buffers.",
    ),
];

const FILL_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidValue,
        "the fill region is out of bounds or not a multiple of the pattern size.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "the buffer is not a valid memory object.",
    ),
    (
        ErrorCode::InvalidCommandQueue,
        "the command queue is not a valid command queue.",
    ),
    (
        ErrorCode::InvalidEventWaitList,
        "the wait list contains an invalid event.",
    ),
];

const RECT_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidValue,
        "the rectangular region is out of bounds or the pitch values are inconsistent.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "the buffer is not a valid memory object.",
    ),
    (
        ErrorCode::InvalidCommandQueue,
        "the command queue is not a valid command queue.",
    ),
    (
        ErrorCode::InvalidEventWaitList,
        "the wait list contains an invalid event.",
    ),
    (
        ErrorCode::ExecStatusErrorForEventsInWaitList,
        "the operation is blocking and an event in the wait list has a negative execution status.",
    ),
];

const MAP_ERRORS: ErrorMap = &[
    (
        ErrorCode::MapFailure,
        "there was a failure to map the requested region into the host address space.",
    ),
    (
        ErrorCode::InvalidValue,
        "the region being mapped is outside the bounds of the buffer.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "the buffer is not a valid memory object.",
    ),
    (
        ErrorCode::InvalidOperation,
        "the buffer's flags forbid mapping with the requested access.",
    ),
    (
        ErrorCode::InvalidEventWaitList,
        "the wait list contains an invalid event.",
    ),
    (
        ErrorCode::ExecStatusErrorForEventsInWaitList,
        "the operation is blocking and an event in the wait list has a negative execution status.",
    ),
];

pub(crate) const UNMAP_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidValue,
        "the pointer is not a currently mapped pointer for this buffer.",
    ),
    (
        ErrorCode::InvalidMemObject,
        "the buffer is not a valid memory object.",
    ),
];

const SYNC_ERRORS: ErrorMap = &[(
    ErrorCode::InvalidCommandQueue,
    "the command queue is not a valid command queue.",
)];

fn wait_raws(wait: &[Event]) -> Vec<RawHandle> {
    wait.iter().map(Event::raw).collect()
}

fn geometry_error() -> QueueError {
    QueueError::from(Failure {
        code: ErrorCode::InvalidValue,
        detail: "the rectangular geometry does not fit in the address space.".to_owned(),
    })
}

fn scale_triple<T>(axes: [usize; 3]) -> Result<[usize; 3], QueueError> {
    match axes[0].checked_mul(size_of::<T>()) {
        Some(x) => Ok([x, axes[1], axes[2]]),
        None => Err(geometry_error()),
    }
}

fn scale_pitches<T>(pitches: Pitches) -> Result<[usize; 2], QueueError> {
    match (
        pitches.row.checked_mul(size_of::<T>()),
        pitches.slice.checked_mul(size_of::<T>()),
    ) {
        (Some(row), Some(slice)) => Ok([row, slice]),
        _ => Err(geometry_error()),
    }
}

/// Highest byte offset (exclusive) a pitched rectangular access touches
/// in host memory. Zero when the extent is empty along any axis; `None`
/// when the geometry overflows the address space.
fn host_span(origin: [usize; 3], extent: [usize; 3], pitch: [usize; 2]) -> Option<usize> {
    if extent.contains(&0) {
        return Some(0);
    }
    let row_pitch = if pitch[0] == 0 { extent[0] } else { pitch[0] };
    let slice_pitch = if pitch[1] == 0 {
        row_pitch.checked_mul(extent[1])?
    } else {
        pitch[1]
    };
    let last_slice = origin[2].checked_add(extent[2])? - 1;
    let last_row = origin[1].checked_add(extent[1])? - 1;
    last_slice
        .checked_mul(slice_pitch)?
        .checked_add(last_row.checked_mul(row_pitch)?)?
        .checked_add(origin[0].checked_add(extent[0])?)
}

fn check_host_region(
    origin: [usize; 3],
    extent: [usize; 3],
    pitch: [usize; 2],
    host_len: usize,
) -> Result<(), QueueError> {
    match host_span(origin, extent, pitch) {
        Some(span) if span <= host_len => Ok(()),
        _ => Err(QueueError::from(Failure {
            code: ErrorCode::InvalidValue,
            detail: "the rectangular host region lies outside the provided slice.".to_owned(),
        })),
    }
}

/// An ordered (or explicitly dependency-ordered) stream of commands
/// against one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandQueue {
    handle: Handle<QueueCap>,
}

impl CommandQueue {
    pub fn new(
        context: &Context,
        device: &Device,
        properties: QueueProperties,
    ) -> Result<Self, QueueError> {
        let mut raw = NULL_HANDLE;
        let status = context.handle().api().create_queue(
            context.handle().raw(),
            device.handle().raw(),
            properties.bits(),
            &mut raw,
        );
        check(status, CREATE_ERRORS)?;
        Ok(Self {
            handle: Handle::from_created(Arc::clone(context.handle().api()), raw),
        })
    }

    pub(crate) fn from_handle(handle: Handle<QueueCap>) -> Self {
        Self { handle }
    }

    pub fn context(&self) -> Result<Context, QueueError> {
        let raw: RawHandle = self.handle.info(query::queue::CONTEXT)?;
        Context::from_borrowed(Arc::clone(self.handle.api()), raw)
            .map_err(|err| QueueError::from(err.0))
    }

    pub fn device(&self) -> Result<Device, QueueError> {
        let raw: RawHandle = self.handle.info(query::queue::DEVICE)?;
        Ok(Device::from_enumerated(Arc::clone(self.handle.api()), raw))
    }

    pub fn properties(&self) -> Result<QueueProperties, QueueError> {
        Ok(QueueProperties::from_bits(
            self.handle.info(query::queue::PROPERTIES)?,
        ))
    }

    pub fn reference_count(&self) -> Result<u32, QueueError> {
        self.handle.info(query::queue::REFERENCE_COUNT)
    }

    // -- 1-D transfers ----------------------------------------------------

    /// Read `dst.len()` elements from `buffer` starting at element
    /// `offset`, blocking until the data has landed in `dst`.
    pub fn read<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        dst: &mut [T],
        offset: usize,
        wait: &[Event],
    ) -> Result<(), QueueError> {
        let raws = wait_raws(wait);
        // SAFETY: dst is valid for writes of its full byte length and the
        // blocking call does not outlive the borrow.
        let status = unsafe {
            self.handle.api().enqueue_read(
                self.handle.raw(),
                buffer.handle().raw(),
                true,
                offset * size_of::<T>(),
                std::mem::size_of_val(dst),
                dst.as_mut_ptr().cast(),
                &raws,
                None,
            )
        };
        check(status, TRANSFER_ERRORS)?;
        Ok(())
    }

    /// Non-blocking read: the transfer into `dst` happens when the
    /// returned event runs.
    ///
    /// # Safety
    /// The memory behind `dst` must stay valid, and must not be read or
    /// written through any other path, until the returned event reaches a
    /// terminal status.
    pub unsafe fn read_async<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        dst: &mut [T],
        offset: usize,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        // SAFETY: the caller guarantees dst outlives the command.
        let status = unsafe {
            self.handle.api().enqueue_read(
                self.handle.raw(),
                buffer.handle().raw(),
                false,
                offset * size_of::<T>(),
                std::mem::size_of_val(dst),
                dst.as_mut_ptr().cast(),
                &raws,
                Some(&mut out_event),
            )
        };
        check(status, TRANSFER_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    /// Write `src` into `buffer` starting at element `offset`, blocking
    /// until the transfer has completed on the device.
    pub fn write<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        src: &[T],
        offset: usize,
        wait: &[Event],
    ) -> Result<(), QueueError> {
        let raws = wait_raws(wait);
        // SAFETY: src is valid for reads of its full byte length for the
        // duration of the call.
        let status = unsafe {
            self.handle.api().enqueue_write(
                self.handle.raw(),
                buffer.handle().raw(),
                true,
                offset * size_of::<T>(),
                std::mem::size_of_val(src),
                src.as_ptr().cast(),
                &raws,
                None,
            )
        };
        check(status, TRANSFER_ERRORS)?;
        Ok(())
    }

    /// Non-blocking write. The source bytes are staged before this call
    /// returns, so `src` carries no further obligation.
    pub fn write_async<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        src: &[T],
        offset: usize,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        // SAFETY: src is valid for reads of its full byte length for the
        // duration of the call; the driver stages the bytes.
        let status = unsafe {
            self.handle.api().enqueue_write(
                self.handle.raw(),
                buffer.handle().raw(),
                false,
                offset * size_of::<T>(),
                std::mem::size_of_val(src),
                src.as_ptr().cast(),
                &raws,
                Some(&mut out_event),
            )
        };
        check(status, TRANSFER_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    /// Blocking single-element read.
    pub fn read_one<T: Pod>(&self, buffer: &Buffer<T>, offset: usize) -> Result<T, QueueError> {
        let mut value = T::zeroed();
        self.read(buffer, std::slice::from_mut(&mut value), offset, &[])?;
        Ok(value)
    }

    /// Blocking single-element write.
    pub fn write_one<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        value: T,
        offset: usize,
    ) -> Result<(), QueueError> {
        self.write(buffer, std::slice::from_ref(&value), offset, &[])
    }

    /// Copy `len` elements from `src` at `src_offset` to `dst` at
    /// `dst_offset`. If both buffers share underlying storage and the
    /// byte ranges overlap, the driver rejects the copy; a zero-length
    /// copy between any in-bounds positions succeeds.
    pub fn copy<T: Pod>(
        &self,
        src: &Buffer<T>,
        dst: &Buffer<T>,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        let status = self.handle.api().enqueue_copy(
            self.handle.raw(),
            src.handle().raw(),
            dst.handle().raw(),
            src_offset * size_of::<T>(),
            dst_offset * size_of::<T>(),
            len * size_of::<T>(),
            &raws,
            &mut out_event,
        );
        check(status, COPY_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    /// Fill `len` elements of `buffer` starting at `offset` with copies
    /// of `value`.
    pub fn fill<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        value: T,
        offset: usize,
        len: usize,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        let status = self.handle.api().enqueue_fill(
            self.handle.raw(),
            buffer.handle().raw(),
            bytemuck::bytes_of(&value),
            offset * size_of::<T>(),
            len * size_of::<T>(),
            &raws,
            &mut out_event,
        );
        check(status, FILL_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    // -- rectangular transfers --------------------------------------------

    /// Blocking rectangular read of up to three dimensions.
    pub fn read_rect<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        dst: &mut [T],
        rect: &Rect,
        buffer_pitch: Pitches,
        host_pitch: Pitches,
        wait: &[Event],
    ) -> Result<(), QueueError> {
        let buffer_origin = scale_triple::<T>(rect.buffer_origin)?;
        let host_origin = scale_triple::<T>(rect.host_origin)?;
        let extent = scale_triple::<T>(rect.extent)?;
        let buffer_pitch_bytes = scale_pitches::<T>(buffer_pitch)?;
        let host_pitch_bytes = scale_pitches::<T>(host_pitch)?;
        check_host_region(host_origin, extent, host_pitch_bytes, std::mem::size_of_val(dst))?;
        let raws = wait_raws(wait);
        // SAFETY: the addressed host region was checked against dst's
        // length and the blocking call does not outlive the borrow.
        let status = unsafe {
            self.handle.api().enqueue_read_rect(
                self.handle.raw(),
                buffer.handle().raw(),
                true,
                buffer_origin,
                host_origin,
                extent,
                buffer_pitch_bytes,
                host_pitch_bytes,
                dst.as_mut_ptr().cast(),
                &raws,
                None,
            )
        };
        check(status, RECT_ERRORS)?;
        Ok(())
    }

    /// Non-blocking rectangular read.
    ///
    /// # Safety
    /// The memory behind `dst` must stay valid, and must not be read or
    /// written through any other path, until the returned event reaches a
    /// terminal status.
    pub unsafe fn read_rect_async<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        dst: &mut [T],
        rect: &Rect,
        buffer_pitch: Pitches,
        host_pitch: Pitches,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let buffer_origin = scale_triple::<T>(rect.buffer_origin)?;
        let host_origin = scale_triple::<T>(rect.host_origin)?;
        let extent = scale_triple::<T>(rect.extent)?;
        let buffer_pitch_bytes = scale_pitches::<T>(buffer_pitch)?;
        let host_pitch_bytes = scale_pitches::<T>(host_pitch)?;
        check_host_region(host_origin, extent, host_pitch_bytes, std::mem::size_of_val(dst))?;
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        // SAFETY: the caller guarantees dst outlives the command; the
        // addressed region was checked against dst's length.
        let status = unsafe {
            self.handle.api().enqueue_read_rect(
                self.handle.raw(),
                buffer.handle().raw(),
                false,
                buffer_origin,
                host_origin,
                extent,
                buffer_pitch_bytes,
                host_pitch_bytes,
                dst.as_mut_ptr().cast(),
                &raws,
                Some(&mut out_event),
            )
        };
        check(status, RECT_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    /// Blocking rectangular write.
    pub fn write_rect<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        src: &[T],
        rect: &Rect,
        buffer_pitch: Pitches,
        host_pitch: Pitches,
        wait: &[Event],
    ) -> Result<(), QueueError> {
        let buffer_origin = scale_triple::<T>(rect.buffer_origin)?;
        let host_origin = scale_triple::<T>(rect.host_origin)?;
        let extent = scale_triple::<T>(rect.extent)?;
        let buffer_pitch_bytes = scale_pitches::<T>(buffer_pitch)?;
        let host_pitch_bytes = scale_pitches::<T>(host_pitch)?;
        check_host_region(host_origin, extent, host_pitch_bytes, std::mem::size_of_val(src))?;
        let raws = wait_raws(wait);
        // SAFETY: the addressed host region was checked against src's
        // length; the driver only reads it during the call.
        let status = unsafe {
            self.handle.api().enqueue_write_rect(
                self.handle.raw(),
                buffer.handle().raw(),
                true,
                buffer_origin,
                host_origin,
                extent,
                buffer_pitch_bytes,
                host_pitch_bytes,
                src.as_ptr().cast(),
                &raws,
                None,
            )
        };
        check(status, RECT_ERRORS)?;
        Ok(())
    }

    /// Non-blocking rectangular write. Source bytes are staged before
    /// this call returns.
    pub fn write_rect_async<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        src: &[T],
        rect: &Rect,
        buffer_pitch: Pitches,
        host_pitch: Pitches,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let buffer_origin = scale_triple::<T>(rect.buffer_origin)?;
        let host_origin = scale_triple::<T>(rect.host_origin)?;
        let extent = scale_triple::<T>(rect.extent)?;
        let buffer_pitch_bytes = scale_pitches::<T>(buffer_pitch)?;
        let host_pitch_bytes = scale_pitches::<T>(host_pitch)?;
        check_host_region(host_origin, extent, host_pitch_bytes, std::mem::size_of_val(src))?;
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        // SAFETY: the addressed host region was checked against src's
        // length; the driver stages the bytes before returning.
        let status = unsafe {
            self.handle.api().enqueue_write_rect(
                self.handle.raw(),
                buffer.handle().raw(),
                false,
                buffer_origin,
                host_origin,
                extent,
                buffer_pitch_bytes,
                host_pitch_bytes,
                src.as_ptr().cast(),
                &raws,
                Some(&mut out_event),
            )
        };
        check(status, RECT_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    /// Rectangular buffer-to-buffer copy. Overlap within shared storage
    /// is rejected like in [`copy`](Self::copy).
    pub fn copy_rect<T: Pod>(
        &self,
        src: &Buffer<T>,
        dst: &Buffer<T>,
        rect: &CopyRect,
        src_pitch: Pitches,
        dst_pitch: Pitches,
        wait: &[Event],
    ) -> Result<Event, QueueError> {
        let src_origin = scale_triple::<T>(rect.src_origin)?;
        let dst_origin = scale_triple::<T>(rect.dst_origin)?;
        let extent = scale_triple::<T>(rect.extent)?;
        let src_pitch_bytes = scale_pitches::<T>(src_pitch)?;
        let dst_pitch_bytes = scale_pitches::<T>(dst_pitch)?;
        let raws = wait_raws(wait);
        let mut out_event = NULL_HANDLE;
        let status = self.handle.api().enqueue_copy_rect(
            self.handle.raw(),
            src.handle().raw(),
            dst.handle().raw(),
            src_origin,
            dst_origin,
            extent,
            src_pitch_bytes,
            dst_pitch_bytes,
            &raws,
            &mut out_event,
        );
        check(status, COPY_ERRORS)?;
        Ok(self.export_event(out_event))
    }

    // -- mapping ----------------------------------------------------------

    /// Map `len` elements of `buffer` at `offset` into host memory,
    /// blocking until the mapping is usable.
    pub fn map<'q, T: Pod>(
        &'q self,
        buffer: &Buffer<T>,
        flags: MapFlags,
        offset: usize,
        len: usize,
        wait: &[Event],
    ) -> Result<Mapped<'q, T>, QueueError> {
        self.map_impl(buffer, flags, true, offset, len, wait)
    }

    /// Non-blocking map. The returned mapping's slice accessors must not
    /// be used until its event completes.
    pub fn map_async<'q, T: Pod>(
        &'q self,
        buffer: &Buffer<T>,
        flags: MapFlags,
        offset: usize,
        len: usize,
        wait: &[Event],
    ) -> Result<Mapped<'q, T>, QueueError> {
        self.map_impl(buffer, flags, false, offset, len, wait)
    }

    /// Map the whole buffer for reading and writing, blocking.
    pub fn map_all<'q, T: Pod>(&'q self, buffer: &Buffer<T>) -> Result<Mapped<'q, T>, QueueError> {
        self.map_impl(buffer, MapFlags::default(), true, 0, buffer.len(), &[])
    }

    fn map_impl<'q, T: Pod>(
        &'q self,
        buffer: &Buffer<T>,
        flags: MapFlags,
        blocking: bool,
        offset: usize,
        len: usize,
        wait: &[Event],
    ) -> Result<Mapped<'q, T>, QueueError> {
        let raws = wait_raws(wait);
        let mut ptr: *mut u8 = std::ptr::null_mut();
        let mut out_event = NULL_HANDLE;
        let status = self.handle.api().enqueue_map(
            self.handle.raw(),
            buffer.handle().raw(),
            blocking,
            flags.bits(),
            offset * size_of::<T>(),
            len * size_of::<T>(),
            &raws,
            &mut ptr,
            &mut out_event,
        );
        check(status, MAP_ERRORS)?;
        let event = self.export_event(out_event);
        Ok(Mapped::new(self, buffer.clone(), event, ptr.cast(), len))
    }

    // -- synchronization ---------------------------------------------------

    /// Hand every queued command to the device without waiting for any of
    /// them.
    pub fn flush(&self) -> Result<(), QueueError> {
        check(self.handle.api().flush(self.handle.raw()), SYNC_ERRORS)?;
        Ok(())
    }

    /// Block until every command enqueued so far has reached a terminal
    /// status.
    pub fn finish(&self) -> Result<(), QueueError> {
        check(self.handle.api().finish(self.handle.raw()), SYNC_ERRORS)?;
        Ok(())
    }

    fn export_event(&self, raw: RawHandle) -> Event {
        Event::from_created(Arc::clone(self.handle.api()), raw)
    }

    pub(crate) fn handle(&self) -> &Handle<QueueCap> {
        &self.handle
    }
}
