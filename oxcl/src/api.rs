//! The raw device boundary: [`DeviceApi`].
//!
//! Everything below this line speaks the driver's native dialect: opaque
//! `u64` handles, byte offsets, raw host pointers, wait-lists of raw event
//! handles, and `i32` status codes with `0` as the success sentinel. The
//! typed wrappers in the sibling modules never interpret a handle; they
//! only pass it back to the [`DeviceApi`] that issued it.
//!
//! Implementations are expected to be shims over an actual driver (FFI or
//! IPC) or an in-process software device such as `oxcl-soft`. All methods
//! take `&self`; an implementation must be internally synchronized.

use std::fmt;

/// Opaque identifier for a driver-owned resource. Never dereferenced.
pub type RawHandle = u64;

/// The null handle. Returned in out-parameters that stay unset and by
/// attribute queries that have nothing to point at (e.g. the owning queue
/// of a user event).
pub const NULL_HANDLE: RawHandle = 0;

/// The resource kind a handle belongs to.
///
/// Retain, release, and attribute queries are uniform across kinds; the
/// kind tells the driver which object table to consult.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Platform,
    Device,
    Context,
    Queue,
    Event,
    Memory,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Platform => "platform",
            ObjectKind::Device => "device",
            ObjectKind::Context => "context",
            ObjectKind::Queue => "queue",
            ObjectKind::Event => "event",
            ObjectKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Raw status codes reported by the device API.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const OUT_OF_HOST_MEMORY: i32 = -6;
    pub const PROFILING_INFO_NOT_AVAILABLE: i32 = -7;
    pub const MEM_COPY_OVERLAP: i32 = -8;
    pub const MAP_FAILURE: i32 = -12;
    pub const MISALIGNED_SUB_BUFFER_OFFSET: i32 = -13;
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE_TYPE: i32 = -31;
    pub const INVALID_PLATFORM: i32 = -32;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_CONTEXT: i32 = -34;
    pub const INVALID_QUEUE_PROPERTIES: i32 = -35;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_HOST_PTR: i32 = -37;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_EVENT_WAIT_LIST: i32 = -57;
    pub const INVALID_EVENT: i32 = -58;
    pub const INVALID_OPERATION: i32 = -59;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
}

/// Raw event execution statuses.
///
/// A live event moves monotonically downward through these values; any
/// negative value is a failure status carrying the raw error code of the
/// command that produced it.
pub mod status {
    pub const QUEUED: i32 = 3;
    pub const SUBMITTED: i32 = 2;
    pub const RUNNING: i32 = 1;
    pub const COMPLETE: i32 = 0;
}

/// Command-type tags reported by an event's `COMMAND_TYPE` attribute.
pub mod command {
    pub const READ_BUFFER: u32 = 0x11F3;
    pub const WRITE_BUFFER: u32 = 0x11F4;
    pub const COPY_BUFFER: u32 = 0x11F5;
    pub const USER: u32 = 0x11F9;
    pub const MAP_BUFFER: u32 = 0x11FB;
    pub const UNMAP_MEM_OBJECT: u32 = 0x11FD;
    pub const READ_BUFFER_RECT: u32 = 0x1201;
    pub const WRITE_BUFFER_RECT: u32 = 0x1202;
    pub const COPY_BUFFER_RECT: u32 = 0x1203;
    pub const FILL_BUFFER: u32 = 0x1207;
}

/// Attribute-query identifiers, grouped per object kind.
pub mod query {
    pub mod platform {
        pub const PROFILE: u32 = 0x0900;
        pub const VERSION: u32 = 0x0901;
        pub const NAME: u32 = 0x0902;
        pub const VENDOR: u32 = 0x0903;
        pub const EXTENSIONS: u32 = 0x0904;
    }

    pub mod device {
        pub const TYPE: u32 = 0x1000;
        pub const MAX_COMPUTE_UNITS: u32 = 0x1002;
        pub const MAX_MEM_ALLOC_SIZE: u32 = 0x1010;
        /// Minimum sub-buffer alignment, in bytes.
        pub const MEM_BASE_ADDR_ALIGN: u32 = 0x1019;
        pub const GLOBAL_MEM_SIZE: u32 = 0x101F;
        pub const AVAILABLE: u32 = 0x1027;
        pub const NAME: u32 = 0x102B;
        pub const VENDOR: u32 = 0x102C;
        pub const VERSION: u32 = 0x102F;
    }

    pub mod context {
        pub const REFERENCE_COUNT: u32 = 0x1080;
        pub const DEVICES: u32 = 0x1081;
        pub const NUM_DEVICES: u32 = 0x1083;
    }

    pub mod queue {
        pub const CONTEXT: u32 = 0x1090;
        pub const DEVICE: u32 = 0x1091;
        pub const REFERENCE_COUNT: u32 = 0x1092;
        pub const PROPERTIES: u32 = 0x1093;
    }

    pub mod event {
        pub const COMMAND_QUEUE: u32 = 0x11D0;
        pub const COMMAND_TYPE: u32 = 0x11D1;
        pub const REFERENCE_COUNT: u32 = 0x11D2;
        pub const STATUS: u32 = 0x11D3;
        pub const CONTEXT: u32 = 0x11D4;
    }

    pub mod memory {
        pub const TYPE: u32 = 0x1100;
        pub const FLAGS: u32 = 0x1101;
        pub const SIZE: u32 = 0x1102;
        pub const MAP_COUNT: u32 = 0x1104;
        pub const REFERENCE_COUNT: u32 = 0x1105;
        pub const CONTEXT: u32 = 0x1106;
        pub const ASSOCIATED: u32 = 0x1107;
        pub const OFFSET: u32 = 0x1108;
    }
}

/// Device-type bits for enumeration filters and the device `TYPE` query.
pub mod device_type {
    pub const DEFAULT: u64 = 1 << 0;
    pub const CPU: u64 = 1 << 1;
    pub const GPU: u64 = 1 << 2;
    pub const ACCELERATOR: u64 = 1 << 3;
    pub const ALL: u64 = u64::MAX;
}

/// Memory-object creation flag bits.
pub mod mem_flags {
    pub const READ_WRITE: u64 = 1 << 0;
    pub const WRITE_ONLY: u64 = 1 << 1;
    pub const READ_ONLY: u64 = 1 << 2;
    pub const COPY_HOST_DATA: u64 = 1 << 5;
    pub const HOST_WRITE_ONLY: u64 = 1 << 7;
    pub const HOST_READ_ONLY: u64 = 1 << 8;
    pub const HOST_NO_ACCESS: u64 = 1 << 9;
}

/// Mapping intent bits for `enqueue_map`.
pub mod map_flags {
    pub const READ: u64 = 1 << 0;
    pub const WRITE: u64 = 1 << 1;
    pub const WRITE_INVALIDATE: u64 = 1 << 2;
}

/// Command-queue property bits.
pub mod queue_props {
    pub const OUT_OF_ORDER: u64 = 1 << 0;
    pub const PROFILING: u64 = 1 << 1;
}

/// One-shot notification registered on an event. Invoked with the event's
/// raw handle and the raw status that triggered the call, off the driver's
/// internal locks.
pub type EventCallback = Box<dyn FnOnce(RawHandle, i32) + Send>;

/// The wrapped device API.
///
/// Methods mirror the C entry points of the underlying driver one to one:
/// every call returns a raw status code, results travel through
/// out-parameters, and data transfers take raw host pointers. The typed
/// layer above checks each status at its call site and never lets a raw
/// handle escape unchecked.
///
/// # Handle lifetime
///
/// Contexts, queues, events, and memory objects are reference counted by
/// the driver. Creation entry points hand back a handle that already holds
/// one reference; [`retain`](Self::retain) and [`release`](Self::release)
/// adjust the count, and the object dies when it reaches zero. Platforms
/// and devices are driver-owned; retaining or releasing them is a no-op
/// that still validates the handle.
///
/// # Enqueue family
///
/// Each enqueue entry point takes a wait-list of raw event handles; the
/// command begins only after every listed event completes. When
/// `out_event` is provided the driver exports a new event holding one
/// caller-owned reference. Blocking variants return only once the command
/// has finished (or failed, in which case the command's failure status is
/// returned directly).
pub trait DeviceApi: Send + Sync + fmt::Debug {
    // -- enumeration ------------------------------------------------------

    fn platform_ids(&self, out: &mut Vec<RawHandle>) -> i32;

    /// Enumerate devices of `platform` matching the [`device_type`] filter
    /// bits in `kind_mask`.
    fn device_ids(&self, platform: RawHandle, kind_mask: u64, out: &mut Vec<RawHandle>) -> i32;

    // -- lifetime ---------------------------------------------------------

    fn retain(&self, kind: ObjectKind, handle: RawHandle) -> i32;

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> i32;

    // -- attribute query --------------------------------------------------

    /// Two-phase attribute fetch.
    ///
    /// With `out: None`, only `size_ret` is filled with the attribute's
    /// byte size. With `out: Some(buf)`, `buf.len()` must equal the
    /// attribute size exactly or the driver reports `INVALID_VALUE`.
    fn get_info(
        &self,
        kind: ObjectKind,
        handle: RawHandle,
        query: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32;

    // -- creation ---------------------------------------------------------

    fn create_context(&self, devices: &[RawHandle], out: &mut RawHandle) -> i32;

    fn create_queue(
        &self,
        context: RawHandle,
        device: RawHandle,
        properties: u64,
        out: &mut RawHandle,
    ) -> i32;

    /// Create a buffer of `size` bytes. When `host_data` is provided it
    /// must be exactly `size` bytes and becomes the buffer's initial
    /// contents; otherwise contents start zeroed.
    fn create_buffer(
        &self,
        context: RawHandle,
        flags: u64,
        size: usize,
        host_data: Option<&[u8]>,
        out: &mut RawHandle,
    ) -> i32;

    /// Create a sub-buffer aliasing `origin..origin + size` bytes of a
    /// root buffer. `origin` must satisfy the device's
    /// `MEM_BASE_ADDR_ALIGN` or the driver reports
    /// `MISALIGNED_SUB_BUFFER_OFFSET`.
    fn create_sub_buffer(
        &self,
        buffer: RawHandle,
        flags: u64,
        origin: usize,
        size: usize,
        out: &mut RawHandle,
    ) -> i32;

    fn create_user_event(&self, context: RawHandle, out: &mut RawHandle) -> i32;

    // -- events -----------------------------------------------------------

    /// Terminate a user event into `status::COMPLETE` or a negative
    /// failure status. A second call on the same event reports
    /// `INVALID_OPERATION`.
    fn set_user_event_status(&self, event: RawHandle, event_status: i32) -> i32;

    /// Block until every listed event reaches a terminal status. Reports
    /// `EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST` if any of them failed.
    fn wait_for_events(&self, events: &[RawHandle]) -> i32;

    /// Register `callback` to fire when `event` reaches (or has already
    /// passed) the raw status `trigger`.
    fn register_event_callback(
        &self,
        event: RawHandle,
        trigger: i32,
        callback: EventCallback,
    ) -> i32;

    // -- enqueue family ---------------------------------------------------

    /// Read `len` bytes from `buffer` at `offset` into `dst`.
    ///
    /// # Safety
    /// `dst` must be valid for writes of `len` bytes and must stay valid
    /// and unaliased until the command's event completes (immediately,
    /// when `blocking`).
    unsafe fn enqueue_read(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        offset: usize,
        len: usize,
        dst: *mut u8,
        wait_list: &[RawHandle],
        out_event: Option<&mut RawHandle>,
    ) -> i32;

    /// Write `len` bytes from `src` into `buffer` at `offset`.
    ///
    /// # Safety
    /// `src` must be valid for reads of `len` bytes for the duration of
    /// the call; the driver stages the bytes before returning.
    unsafe fn enqueue_write(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        offset: usize,
        len: usize,
        src: *const u8,
        wait_list: &[RawHandle],
        out_event: Option<&mut RawHandle>,
    ) -> i32;

    fn enqueue_copy(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        wait_list: &[RawHandle],
        out_event: &mut RawHandle,
    ) -> i32;

    /// Rectangular read. Origins are `[x bytes, y rows, z slices]`,
    /// `extent` is `[x bytes, y rows, z slices]`, pitches are
    /// `[row, slice]` in bytes with `0` meaning tightly packed.
    ///
    /// # Safety
    /// `dst` must be valid for writes across the addressed host region and
    /// stay valid and unaliased until the command's event completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read_rect(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        buffer_origin: [usize; 3],
        host_origin: [usize; 3],
        extent: [usize; 3],
        buffer_pitch: [usize; 2],
        host_pitch: [usize; 2],
        dst: *mut u8,
        wait_list: &[RawHandle],
        out_event: Option<&mut RawHandle>,
    ) -> i32;

    /// Rectangular write; geometry as in
    /// [`enqueue_read_rect`](Self::enqueue_read_rect).
    ///
    /// # Safety
    /// `src` must be valid for reads across the addressed host region for
    /// the duration of the call; the driver stages the bytes before
    /// returning.
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_write_rect(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        buffer_origin: [usize; 3],
        host_origin: [usize; 3],
        extent: [usize; 3],
        buffer_pitch: [usize; 2],
        host_pitch: [usize; 2],
        src: *const u8,
        wait_list: &[RawHandle],
        out_event: Option<&mut RawHandle>,
    ) -> i32;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_rect(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        extent: [usize; 3],
        src_pitch: [usize; 2],
        dst_pitch: [usize; 2],
        wait_list: &[RawHandle],
        out_event: &mut RawHandle,
    ) -> i32;

    /// Fill `len` bytes of `buffer` at `offset` with repetitions of
    /// `pattern`. `offset` and `len` must be multiples of `pattern.len()`.
    fn enqueue_fill(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        pattern: &[u8],
        offset: usize,
        len: usize,
        wait_list: &[RawHandle],
        out_event: &mut RawHandle,
    ) -> i32;

    /// Map `len` bytes of `buffer` at `offset` into host-visible memory.
    ///
    /// The pointer is produced immediately; its contents are defined only
    /// once the exported event completes, and it stays valid until the
    /// matching `enqueue_unmap`.
    #[allow(clippy::too_many_arguments)]
    fn enqueue_map(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        flags: u64,
        offset: usize,
        len: usize,
        wait_list: &[RawHandle],
        out_ptr: &mut *mut u8,
        out_event: &mut RawHandle,
    ) -> i32;

    /// Release a mapping previously produced by
    /// [`enqueue_map`](Self::enqueue_map).
    ///
    /// # Safety
    /// `ptr` must be a pointer returned by `enqueue_map` for `buffer` that
    /// has not been unmapped yet, and the host must no longer access it.
    unsafe fn enqueue_unmap(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        ptr: *mut u8,
        wait_list: &[RawHandle],
        out_event: Option<&mut RawHandle>,
    ) -> i32;

    // -- queue synchronization -------------------------------------------

    /// Ensure all queued commands have been handed to the device.
    fn flush(&self, queue: RawHandle) -> i32;

    /// Block until every command queued so far has completed.
    fn finish(&self, queue: RawHandle) -> i32;
}
