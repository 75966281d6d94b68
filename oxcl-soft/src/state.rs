//! Object table, command FIFOs, and the execution pump.
//!
//! All driver state lives behind one mutex in [`State`]. Enqueued
//! commands are deferred: they sit in their queue's FIFO until a pump
//! runs them. The pump executes every command whose wait-list is
//! satisfied, walking all queues to a fixpoint, so cross-queue
//! dependencies resolve in one call. Callbacks are only collected here;
//! the caller fires them after dropping the state lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use oxcl::api::{
    code, command, device_type, query, queue_props, status, EventCallback, ObjectKind, RawHandle,
    NULL_HANDLE,
};

use crate::storage::Storage;

pub(crate) const PLATFORM: RawHandle = 1;
pub(crate) const DEVICE: RawHandle = 2;
const FIRST_DYNAMIC: RawHandle = 3;

pub(crate) const BASE_ALIGN: u32 = 16;
pub(crate) const MAX_ALLOC: u64 = 1 << 28;
const GLOBAL_MEM: u64 = 1 << 30;
const COMPUTE_UNITS: u32 = 8;
const MEM_OBJECT_BUFFER: u32 = 0x10F0;

/// Status a destroyed queue leaves on its unexecuted commands.
const ORPHANED: i32 = code::INVALID_COMMAND_QUEUE;

/// A callback ready to fire once the state lock is released.
pub(crate) type Fired = (EventCallback, RawHandle, i32);

/// A host pointer carried inside a deferred read command. The caller of
/// the raw API guarantees it stays valid until the command's event is
/// terminal.
pub(crate) struct HostPtr(pub *mut u8);

// SAFETY: the pointer is only dereferenced under the device's state lock,
// and validity until completion is the raw API's documented contract.
unsafe impl Send for HostPtr {}

/// Rectangular access geometry, already in bytes along x.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RectSpec {
    pub origin: [usize; 3],
    pub extent: [usize; 3],
    pub pitch: [usize; 2],
}

impl RectSpec {
    /// Resolved (row, slice) pitches, with zero meaning tightly packed.
    /// `None` when a given pitch is smaller than the extent it strides,
    /// or when the tight slice stride overflows.
    fn resolve(&self) -> Option<(usize, usize)> {
        let row = match self.pitch[0] {
            0 => self.extent[0],
            p if p < self.extent[0] => return None,
            p => p,
        };
        let tight_slice = row.checked_mul(self.extent[1])?;
        let slice = match self.pitch[1] {
            0 => tight_slice,
            p if p < tight_slice => return None,
            p => p,
        };
        Some((row, slice))
    }

    /// Highest byte offset (exclusive) the access touches, or `None` for
    /// inconsistent pitches or geometry that overflows the address
    /// space. Zero for an empty extent.
    pub fn span(&self) -> Option<usize> {
        let (row, slice) = self.resolve()?;
        if self.extent.contains(&0) {
            return Some(0);
        }
        let last_slice = self.origin[2].checked_add(self.extent[2])? - 1;
        let last_row = self.origin[1].checked_add(self.extent[1])? - 1;
        last_slice
            .checked_mul(slice)?
            .checked_add(last_row.checked_mul(row)?)?
            .checked_add(self.origin[0].checked_add(self.extent[0])?)
    }

    /// Lowest byte offset the access touches. Zero when the pitches are
    /// inconsistent; callers check [`span`](Self::span) first.
    pub fn first_byte(&self) -> usize {
        let Some((row, slice)) = self.resolve() else {
            return 0;
        };
        self.origin[0] + self.origin[1] * row + self.origin[2] * slice
    }

    /// Start offset of every row of the region, in iteration order
    /// (rows within a slice, then slices).
    fn rows(&self) -> Vec<usize> {
        let Some((row_pitch, slice_pitch)) = self.resolve() else {
            return Vec::new();
        };
        let mut rows = Vec::with_capacity(self.extent[1] * self.extent[2]);
        for z in 0..self.extent[2] {
            for y in 0..self.extent[1] {
                rows.push(
                    self.origin[0]
                        + (self.origin[1] + y) * row_pitch
                        + (self.origin[2] + z) * slice_pitch,
                );
            }
        }
        rows
    }
}

/// Gather the rows of a pitched host region into a tightly packed
/// staging buffer.
///
/// # Safety
/// `src` must be valid for reads across the whole region `rect`
/// describes.
pub(crate) unsafe fn stage_rows(src: *const u8, rect: &RectSpec) -> Box<[u8]> {
    let width = rect.extent[0];
    let rows = rect.rows();
    let mut staged = vec![0u8; width * rows.len()];
    for (i, row) in rows.into_iter().enumerate() {
        // SAFETY: each row lies inside the region the caller vouches for,
        // and staged has room for every row.
        unsafe {
            std::ptr::copy_nonoverlapping(src.add(row), staged[i * width..].as_mut_ptr(), width)
        };
    }
    staged.into_boxed_slice()
}

pub(crate) enum Op {
    Read {
        buffer: RawHandle,
        offset: usize,
        len: usize,
        dst: HostPtr,
    },
    Write {
        buffer: RawHandle,
        offset: usize,
        data: Box<[u8]>,
    },
    Copy {
        src: RawHandle,
        dst: RawHandle,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    },
    ReadRect {
        buffer: RawHandle,
        buf_rect: RectSpec,
        host_rect: RectSpec,
        dst: HostPtr,
    },
    /// Host rows are extracted tightly packed at enqueue time.
    WriteRect {
        buffer: RawHandle,
        buf_rect: RectSpec,
        data: Box<[u8]>,
    },
    CopyRect {
        src: RawHandle,
        dst: RawHandle,
        src_rect: RectSpec,
        dst_rect: RectSpec,
    },
    Fill {
        buffer: RawHandle,
        pattern: Box<[u8]>,
        offset: usize,
        len: usize,
    },
    /// The pointer was produced and recorded at enqueue time; the command
    /// only marks when the mapping's contents become defined.
    Map,
    /// Bookkeeping happened at enqueue time; the command orders the
    /// unmap against its wait-list.
    Unmap,
}

pub(crate) struct Command {
    pub event: RawHandle,
    pub wait: Vec<RawHandle>,
    pub op: Op,
}

pub(crate) struct ContextObj {
    pub devices: Vec<RawHandle>,
}

pub(crate) struct QueueObj {
    pub context: RawHandle,
    pub device: RawHandle,
    pub properties: u64,
    pub fifo: VecDeque<Command>,
}

pub(crate) struct EventObj {
    pub context: RawHandle,
    /// `NULL_HANDLE` for user events.
    pub queue: RawHandle,
    pub command_type: u32,
    pub status: i32,
    /// A user event's terminal status can be set exactly once.
    pub terminated: bool,
    pub callbacks: Vec<(i32, EventCallback)>,
}

pub(crate) struct MemoryObj {
    pub context: RawHandle,
    pub flags: u64,
    pub size: usize,
    /// Root buffer handle for a sub-buffer; `None` for a root.
    pub parent: Option<RawHandle>,
    /// Byte offset into the root storage; zero for a root.
    pub origin: usize,
    /// Shared with every sub-buffer of the same root.
    pub storage: Arc<Storage>,
    /// Addresses of currently live mappings of this object.
    pub maps: Vec<usize>,
}

pub(crate) enum Object {
    Context(ContextObj),
    Queue(QueueObj),
    Event(EventObj),
    Memory(MemoryObj),
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Context(_) => ObjectKind::Context,
            Object::Queue(_) => ObjectKind::Queue,
            Object::Event(_) => ObjectKind::Event,
            Object::Memory(_) => ObjectKind::Memory,
        }
    }
}

struct Entry {
    refs: u32,
    object: Object,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Ready,
    Pending,
    Failed,
}

fn invalid_code(kind: ObjectKind) -> i32 {
    match kind {
        ObjectKind::Platform => code::INVALID_PLATFORM,
        ObjectKind::Device => code::INVALID_DEVICE,
        ObjectKind::Context => code::INVALID_CONTEXT,
        ObjectKind::Queue => code::INVALID_COMMAND_QUEUE,
        ObjectKind::Event => code::INVALID_EVENT,
        ObjectKind::Memory => code::INVALID_MEM_OBJECT,
    }
}

fn put(out: Option<&mut [u8]>, size_ret: &mut usize, bytes: &[u8]) -> i32 {
    *size_ret = bytes.len();
    match out {
        None => code::SUCCESS,
        Some(buf) if buf.len() == bytes.len() => {
            buf.copy_from_slice(bytes);
            code::SUCCESS
        }
        Some(_) => code::INVALID_VALUE,
    }
}

pub(crate) struct State {
    next: RawHandle,
    objects: HashMap<RawHandle, Entry>,
}

impl State {
    pub fn new() -> Self {
        Self {
            next: FIRST_DYNAMIC,
            objects: HashMap::new(),
        }
    }

    fn alloc(&mut self, object: Object, refs: u32) -> RawHandle {
        let handle = self.next;
        self.next += 1;
        self.objects.insert(handle, Entry { refs, object });
        handle
    }

    // -- typed lookups ----------------------------------------------------

    fn object(&self, kind: ObjectKind, handle: RawHandle) -> Result<&Object, i32> {
        match self.objects.get(&handle) {
            Some(entry) if entry.object.kind() == kind => Ok(&entry.object),
            _ => Err(invalid_code(kind)),
        }
    }

    pub fn queue(&self, handle: RawHandle) -> Result<&QueueObj, i32> {
        match self.object(ObjectKind::Queue, handle)? {
            Object::Queue(q) => Ok(q),
            _ => unreachable!(),
        }
    }

    fn queue_mut(&mut self, handle: RawHandle) -> Result<&mut QueueObj, i32> {
        match self.objects.get_mut(&handle) {
            Some(Entry {
                object: Object::Queue(q),
                ..
            }) => Ok(q),
            _ => Err(code::INVALID_COMMAND_QUEUE),
        }
    }

    pub fn event(&self, handle: RawHandle) -> Result<&EventObj, i32> {
        match self.object(ObjectKind::Event, handle)? {
            Object::Event(e) => Ok(e),
            _ => unreachable!(),
        }
    }

    fn event_mut(&mut self, handle: RawHandle) -> Result<&mut EventObj, i32> {
        match self.objects.get_mut(&handle) {
            Some(Entry {
                object: Object::Event(e),
                ..
            }) => Ok(e),
            _ => Err(code::INVALID_EVENT),
        }
    }

    pub fn memory(&self, handle: RawHandle) -> Result<&MemoryObj, i32> {
        match self.object(ObjectKind::Memory, handle)? {
            Object::Memory(m) => Ok(m),
            _ => unreachable!(),
        }
    }

    fn memory_mut(&mut self, handle: RawHandle) -> Result<&mut MemoryObj, i32> {
        match self.objects.get_mut(&handle) {
            Some(Entry {
                object: Object::Memory(m),
                ..
            }) => Ok(m),
            _ => Err(code::INVALID_MEM_OBJECT),
        }
    }

    fn context(&self, handle: RawHandle) -> Result<&ContextObj, i32> {
        match self.object(ObjectKind::Context, handle)? {
            Object::Context(c) => Ok(c),
            _ => unreachable!(),
        }
    }

    // -- lifetime ---------------------------------------------------------

    pub fn retain(&mut self, kind: ObjectKind, handle: RawHandle) -> i32 {
        match kind {
            // Driver-owned; only validate.
            ObjectKind::Platform => {
                if handle == PLATFORM {
                    code::SUCCESS
                } else {
                    code::INVALID_PLATFORM
                }
            }
            ObjectKind::Device => {
                if handle == DEVICE {
                    code::SUCCESS
                } else {
                    code::INVALID_DEVICE
                }
            }
            _ => match self.objects.get_mut(&handle) {
                Some(entry) if entry.object.kind() == kind => {
                    entry.refs += 1;
                    code::SUCCESS
                }
                _ => invalid_code(kind),
            },
        }
    }

    pub fn release(&mut self, kind: ObjectKind, handle: RawHandle) -> (i32, Vec<Fired>) {
        match kind {
            ObjectKind::Platform => {
                let status = if handle == PLATFORM {
                    code::SUCCESS
                } else {
                    code::INVALID_PLATFORM
                };
                (status, Vec::new())
            }
            ObjectKind::Device => {
                let status = if handle == DEVICE {
                    code::SUCCESS
                } else {
                    code::INVALID_DEVICE
                };
                (status, Vec::new())
            }
            _ => {
                let Some(entry) = self.objects.get_mut(&handle) else {
                    return (invalid_code(kind), Vec::new());
                };
                if entry.object.kind() != kind {
                    return (invalid_code(kind), Vec::new());
                }
                entry.refs -= 1;
                if entry.refs > 0 {
                    return (code::SUCCESS, Vec::new());
                }
                let entry = self
                    .objects
                    .remove(&handle)
                    .expect("entry vanished during release");
                let fired = self.destroy(entry.object);
                (code::SUCCESS, fired)
            }
        }
    }

    fn destroy(&mut self, object: Object) -> Vec<Fired> {
        let mut fired = Vec::new();
        match object {
            Object::Context(_) | Object::Event(_) => {}
            Object::Memory(mem) => {
                if let Some(parent) = mem.parent {
                    // Drop the internal reference the sub-buffer held on
                    // its root.
                    let (_, more) = self.release(ObjectKind::Memory, parent);
                    fired.extend(more);
                }
                let (_, more) = self.release(ObjectKind::Context, mem.context);
                fired.extend(more);
            }
            Object::Queue(queue) => {
                // Commands that can no longer run fail their events.
                for cmd in queue.fifo {
                    fired.extend(self.set_status(cmd.event, ORPHANED));
                    for w in cmd.wait {
                        let (_, more) = self.release(ObjectKind::Event, w);
                        fired.extend(more);
                    }
                    let (_, more) = self.release(ObjectKind::Event, cmd.event);
                    fired.extend(more);
                }
                let (_, more) = self.release(ObjectKind::Context, queue.context);
                fired.extend(more);
            }
        }
        fired
    }

    // -- creation ---------------------------------------------------------

    pub fn create_context(&mut self, devices: &[RawHandle]) -> Result<RawHandle, i32> {
        if devices.is_empty() {
            return Err(code::INVALID_VALUE);
        }
        if devices.iter().any(|&d| d != DEVICE) {
            return Err(code::INVALID_DEVICE);
        }
        Ok(self.alloc(
            Object::Context(ContextObj {
                devices: devices.to_vec(),
            }),
            1,
        ))
    }

    pub fn create_queue(
        &mut self,
        context: RawHandle,
        device: RawHandle,
        properties: u64,
    ) -> Result<RawHandle, i32> {
        self.context(context)?;
        if device != DEVICE {
            return Err(code::INVALID_DEVICE);
        }
        if properties & !(queue_props::OUT_OF_ORDER | queue_props::PROFILING) != 0 {
            return Err(code::INVALID_QUEUE_PROPERTIES);
        }
        self.retain(ObjectKind::Context, context);
        Ok(self.alloc(
            Object::Queue(QueueObj {
                context,
                device,
                properties,
                fifo: VecDeque::new(),
            }),
            1,
        ))
    }

    pub fn create_buffer(
        &mut self,
        context: RawHandle,
        flags: u64,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<RawHandle, i32> {
        self.context(context)?;
        if size == 0 || size as u64 > MAX_ALLOC {
            return Err(code::INVALID_BUFFER_SIZE);
        }
        let wants_data = flags & oxcl::api::mem_flags::COPY_HOST_DATA != 0;
        let storage = match (wants_data, host_data) {
            (true, Some(data)) if data.len() == size => Arc::new(Storage::from_bytes(data)),
            (false, None) => Arc::new(Storage::zeroed(size)),
            _ => return Err(code::INVALID_HOST_PTR),
        };
        self.retain(ObjectKind::Context, context);
        Ok(self.alloc(
            Object::Memory(MemoryObj {
                context,
                flags,
                size,
                parent: None,
                origin: 0,
                storage,
                maps: Vec::new(),
            }),
            1,
        ))
    }

    pub fn create_sub_buffer(
        &mut self,
        buffer: RawHandle,
        flags: u64,
        origin: usize,
        size: usize,
    ) -> Result<RawHandle, i32> {
        let mem = self.memory(buffer)?;
        if mem.parent.is_some() {
            return Err(code::INVALID_MEM_OBJECT);
        }
        if size == 0 {
            return Err(code::INVALID_BUFFER_SIZE);
        }
        if origin + size > mem.size {
            return Err(code::INVALID_VALUE);
        }
        if origin % BASE_ALIGN as usize != 0 {
            return Err(code::MISALIGNED_SUB_BUFFER_OFFSET);
        }
        let context = mem.context;
        let storage = Arc::clone(&mem.storage);
        // The sub-buffer keeps its root alive.
        self.retain(ObjectKind::Memory, buffer);
        self.retain(ObjectKind::Context, context);
        Ok(self.alloc(
            Object::Memory(MemoryObj {
                context,
                flags,
                size,
                parent: Some(buffer),
                origin,
                storage,
                maps: Vec::new(),
            }),
            1,
        ))
    }

    pub fn create_user_event(&mut self, context: RawHandle) -> Result<RawHandle, i32> {
        self.context(context)?;
        Ok(self.alloc(
            Object::Event(EventObj {
                context,
                queue: NULL_HANDLE,
                command_type: command::USER,
                status: status::SUBMITTED,
                terminated: false,
                callbacks: Vec::new(),
            }),
            1,
        ))
    }

    // -- validation helpers -----------------------------------------------

    pub fn validate_wait(&self, wait: &[RawHandle]) -> Result<(), i32> {
        for &w in wait {
            if self.event(w).is_err() {
                return Err(code::INVALID_EVENT_WAIT_LIST);
            }
        }
        Ok(())
    }

    /// Bounds-check a byte range of a memory object.
    pub fn validate_range(&self, buffer: RawHandle, offset: usize, len: usize) -> Result<(), i32> {
        let mem = self.memory(buffer)?;
        if offset.checked_add(len).is_none_or(|end| end > mem.size) {
            return Err(code::INVALID_VALUE);
        }
        Ok(())
    }

    /// Bounds- and pitch-check a rectangular access to a memory object.
    pub fn validate_rect(&self, buffer: RawHandle, rect: &RectSpec) -> Result<(), i32> {
        let mem = self.memory(buffer)?;
        match rect.span() {
            Some(span) if span <= mem.size => Ok(()),
            _ => Err(code::INVALID_VALUE),
        }
    }

    /// Absolute byte position of an object's range within its root
    /// storage, for overlap decisions.
    fn absolute(&self, buffer: RawHandle) -> Result<(*mut u8, usize), i32> {
        let mem = self.memory(buffer)?;
        Ok((mem.storage.ptr_at(0), mem.origin))
    }

    /// Reject a copy whose source and destination byte ranges overlap in
    /// the same underlying storage. Zero-length ranges never overlap.
    pub fn check_overlap(
        &self,
        src: RawHandle,
        dst: RawHandle,
        src_span: (usize, usize),
        dst_span: (usize, usize),
    ) -> Result<(), i32> {
        let (src_root, src_base) = self.absolute(src)?;
        let (dst_root, dst_base) = self.absolute(dst)?;
        if src_root != dst_root {
            return Ok(());
        }
        let (s0, s1) = (src_base + src_span.0, src_base + src_span.1);
        let (d0, d1) = (dst_base + dst_span.0, dst_base + dst_span.1);
        if s0 < s1 && d0 < d1 && s0 < d1 && d0 < s1 {
            return Err(code::MEM_COPY_OVERLAP);
        }
        Ok(())
    }

    // -- events -----------------------------------------------------------

    /// Set an event's status and collect the callbacks that trigger on
    /// it. A failure status releases every remaining callback.
    fn set_status(&mut self, event: RawHandle, new_status: i32) -> Vec<Fired> {
        let Ok(obj) = self.event_mut(event) else {
            return Vec::new();
        };
        obj.status = new_status;
        let mut fired = Vec::new();
        let mut kept = Vec::new();
        for (trigger, cb) in obj.callbacks.drain(..) {
            if new_status < 0 || trigger >= new_status {
                fired.push((cb, event, new_status));
            } else {
                kept.push((trigger, cb));
            }
        }
        obj.callbacks = kept;
        fired
    }

    pub fn set_user_event_status(
        &mut self,
        event: RawHandle,
        new_status: i32,
    ) -> Result<Vec<Fired>, i32> {
        let obj = self.event_mut(event)?;
        if obj.queue != NULL_HANDLE {
            return Err(code::INVALID_EVENT);
        }
        if new_status != status::COMPLETE && new_status >= 0 {
            return Err(code::INVALID_VALUE);
        }
        if obj.terminated {
            return Err(code::INVALID_OPERATION);
        }
        obj.terminated = true;
        Ok(self.set_status(event, new_status))
    }

    pub fn register_callback(
        &mut self,
        event: RawHandle,
        trigger: i32,
        callback: EventCallback,
    ) -> Result<Option<Fired>, i32> {
        if trigger < 0 {
            return Err(code::INVALID_VALUE);
        }
        let obj = self.event_mut(event)?;
        if obj.status < 0 || obj.status <= trigger {
            // Already reached or passed the trigger.
            return Ok(Some((callback, event, obj.status)));
        }
        obj.callbacks.push((trigger, callback));
        Ok(None)
    }

    pub fn event_status(&self, event: RawHandle) -> Result<i32, i32> {
        Ok(self.event(event)?.status)
    }

    // -- enqueue and pump -------------------------------------------------

    /// Append a command to a queue's FIFO. Wait events and the command's
    /// own event are retained internally so they outlive callers that
    /// drop theirs early; [`run_command`](Self::run_command) releases
    /// them.
    pub fn enqueue(
        &mut self,
        queue: RawHandle,
        wait: &[RawHandle],
        command_type: u32,
        op: Op,
        export: bool,
    ) -> Result<RawHandle, i32> {
        let context = self.queue(queue)?.context;
        self.validate_wait(wait)?;
        for &w in wait {
            self.retain(ObjectKind::Event, w);
        }
        let event = self.alloc(
            Object::Event(EventObj {
                context,
                queue,
                command_type,
                status: status::QUEUED,
                terminated: false,
                callbacks: Vec::new(),
            }),
            if export { 2 } else { 1 },
        );
        self.queue_mut(queue)
            .expect("queue vanished during enqueue")
            .fifo
            .push_back(Command {
                event,
                wait: wait.to_vec(),
                op,
            });
        Ok(event)
    }

    fn wait_state(&self, wait: &[RawHandle]) -> WaitState {
        let mut state = WaitState::Ready;
        for &w in wait {
            match self.event(w).map(|e| e.status) {
                Ok(s) if s < 0 => return WaitState::Failed,
                Ok(s) if s > status::COMPLETE => state = WaitState::Pending,
                Ok(_) => {}
                Err(_) => return WaitState::Failed,
            }
        }
        state
    }

    /// First runnable command across all queues. In-order queues only
    /// offer their head; out-of-order queues offer any ready command.
    fn find_ready(&self) -> Option<(RawHandle, usize)> {
        for (&handle, entry) in &self.objects {
            let Object::Queue(queue) = &entry.object else {
                continue;
            };
            let out_of_order = queue.properties & queue_props::OUT_OF_ORDER != 0;
            for (index, cmd) in queue.fifo.iter().enumerate() {
                match self.wait_state(&cmd.wait) {
                    WaitState::Ready | WaitState::Failed => return Some((handle, index)),
                    WaitState::Pending if out_of_order => continue,
                    WaitState::Pending => break,
                }
            }
        }
        None
    }

    /// Run every command whose dependencies are satisfied, across all
    /// queues, to a fixpoint.
    pub fn pump(&mut self) -> Vec<Fired> {
        let mut fired = Vec::new();
        while let Some((queue, index)) = self.find_ready() {
            let cmd = self
                .queue_mut(queue)
                .expect("ready queue vanished")
                .fifo
                .remove(index)
                .expect("ready command vanished");
            fired.extend(self.run_command(cmd));
        }
        fired
    }

    fn run_command(&mut self, cmd: Command) -> Vec<Fired> {
        let mut fired = Vec::new();
        if self.wait_state(&cmd.wait) == WaitState::Failed {
            fired.extend(self.set_status(cmd.event, code::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST));
        } else {
            fired.extend(self.set_status(cmd.event, status::SUBMITTED));
            fired.extend(self.set_status(cmd.event, status::RUNNING));
            self.execute(&cmd.op);
            fired.extend(self.set_status(cmd.event, status::COMPLETE));
        }
        for w in cmd.wait {
            let (_, more) = self.release(ObjectKind::Event, w);
            fired.extend(more);
        }
        let (_, more) = self.release(ObjectKind::Event, cmd.event);
        fired.extend(more);
        fired
    }

    /// Execute an op. All geometry was validated at enqueue time, so
    /// execution cannot fail.
    fn execute(&mut self, op: &Op) {
        match op {
            Op::Read {
                buffer,
                offset,
                len,
                dst,
            } => {
                let mem = self.memory(*buffer).expect("read buffer vanished");
                // SAFETY: the range was bounds-checked at enqueue; dst is
                // valid until the event is terminal per the raw contract.
                unsafe { mem.storage.read(mem.origin + offset, dst.0, *len) };
            }
            Op::Write {
                buffer,
                offset,
                data,
            } => {
                let mem = self.memory(*buffer).expect("write buffer vanished");
                // SAFETY: the range was bounds-checked at enqueue; data is
                // an owned staging copy.
                unsafe { mem.storage.write(mem.origin + offset, data.as_ptr(), data.len()) };
            }
            Op::Copy {
                src,
                dst,
                src_offset,
                dst_offset,
                len,
            } => {
                let src_mem = self.memory(*src).expect("copy source vanished");
                let mut staged = vec![0u8; *len];
                // SAFETY: bounds-checked at enqueue; staged is an owned
                // buffer of exactly len bytes.
                unsafe {
                    src_mem
                        .storage
                        .read(src_mem.origin + src_offset, staged.as_mut_ptr(), *len)
                };
                let dst_mem = self.memory(*dst).expect("copy destination vanished");
                // SAFETY: bounds-checked at enqueue.
                unsafe {
                    dst_mem
                        .storage
                        .write(dst_mem.origin + dst_offset, staged.as_ptr(), *len)
                };
            }
            Op::ReadRect {
                buffer,
                buf_rect,
                host_rect,
                dst,
            } => {
                let mem = self.memory(*buffer).expect("read buffer vanished");
                let width = buf_rect.extent[0];
                for (buf_row, host_row) in buf_rect.rows().into_iter().zip(host_rect.rows()) {
                    // SAFETY: both regions were span-checked at enqueue;
                    // dst is valid until the event is terminal.
                    unsafe {
                        mem.storage
                            .read(mem.origin + buf_row, dst.0.add(host_row), width)
                    };
                }
            }
            Op::WriteRect {
                buffer,
                buf_rect,
                data,
            } => {
                let mem = self.memory(*buffer).expect("write buffer vanished");
                let width = buf_rect.extent[0];
                for (i, buf_row) in buf_rect.rows().into_iter().enumerate() {
                    // SAFETY: the buffer region was span-checked at
                    // enqueue; data holds the rows tightly packed.
                    unsafe {
                        mem.storage
                            .write(mem.origin + buf_row, data[i * width..].as_ptr(), width)
                    };
                }
            }
            Op::CopyRect {
                src,
                dst,
                src_rect,
                dst_rect,
            } => {
                let width = src_rect.extent[0];
                let src_mem = self.memory(*src).expect("copy source vanished");
                let mut staged = vec![0u8; width * src_rect.extent[1] * src_rect.extent[2]];
                for (i, row) in src_rect.rows().into_iter().enumerate() {
                    // SAFETY: span-checked at enqueue; staged is owned.
                    unsafe {
                        src_mem.storage.read(
                            src_mem.origin + row,
                            staged[i * width..].as_mut_ptr(),
                            width,
                        )
                    };
                }
                let dst_mem = self.memory(*dst).expect("copy destination vanished");
                for (i, row) in dst_rect.rows().into_iter().enumerate() {
                    // SAFETY: span-checked at enqueue.
                    unsafe {
                        dst_mem
                            .storage
                            .write(dst_mem.origin + row, staged[i * width..].as_ptr(), width)
                    };
                }
            }
            Op::Fill {
                buffer,
                pattern,
                offset,
                len,
            } => {
                let mem = self.memory(*buffer).expect("fill buffer vanished");
                let mut at = *offset;
                let end = offset + len;
                while at < end {
                    // SAFETY: offset and len are multiples of the pattern
                    // size and bounds-checked at enqueue.
                    unsafe { mem.storage.write(mem.origin + at, pattern.as_ptr(), pattern.len()) };
                    at += pattern.len();
                }
            }
            Op::Map | Op::Unmap => {}
        }
    }

    pub fn queue_idle(&self, queue: RawHandle) -> Result<bool, i32> {
        Ok(self.queue(queue)?.fifo.is_empty())
    }

    // -- mapping bookkeeping ----------------------------------------------

    pub fn record_map(&mut self, buffer: RawHandle, offset: usize) -> Result<*mut u8, i32> {
        let mem = self.memory_mut(buffer)?;
        let ptr = mem.storage.ptr_at(mem.origin + offset);
        mem.maps.push(ptr as usize);
        Ok(ptr)
    }

    pub fn record_unmap(&mut self, buffer: RawHandle, ptr: *mut u8) -> Result<(), i32> {
        let mem = self.memory_mut(buffer)?;
        match mem.maps.iter().position(|&p| p == ptr as usize) {
            Some(index) => {
                mem.maps.swap_remove(index);
                Ok(())
            }
            None => Err(code::INVALID_VALUE),
        }
    }

    // -- attribute queries ------------------------------------------------

    pub fn get_info(
        &self,
        kind: ObjectKind,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        match kind {
            ObjectKind::Platform => self.platform_info(handle, which, out, size_ret),
            ObjectKind::Device => self.device_info(handle, which, out, size_ret),
            ObjectKind::Context => self.context_info(handle, which, out, size_ret),
            ObjectKind::Queue => self.queue_info(handle, which, out, size_ret),
            ObjectKind::Event => self.event_info(handle, which, out, size_ret),
            ObjectKind::Memory => self.memory_info(handle, which, out, size_ret),
        }
    }

    fn platform_info(
        &self,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        if handle != PLATFORM {
            return code::INVALID_PLATFORM;
        }
        let text: &str = match which {
            query::platform::PROFILE => "FULL_PROFILE",
            query::platform::VERSION => "oxcl 0.1",
            query::platform::NAME => "oxcl soft platform",
            query::platform::VENDOR => "oxcl",
            query::platform::EXTENSIONS => "",
            _ => return code::INVALID_VALUE,
        };
        put(out, size_ret, text.as_bytes())
    }

    fn device_info(
        &self,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        if handle != DEVICE {
            return code::INVALID_DEVICE;
        }
        match which {
            query::device::TYPE => put(out, size_ret, &device_type::CPU.to_ne_bytes()),
            query::device::AVAILABLE => put(out, size_ret, &1u32.to_ne_bytes()),
            query::device::MAX_COMPUTE_UNITS => put(out, size_ret, &COMPUTE_UNITS.to_ne_bytes()),
            query::device::MEM_BASE_ADDR_ALIGN => put(out, size_ret, &BASE_ALIGN.to_ne_bytes()),
            query::device::GLOBAL_MEM_SIZE => put(out, size_ret, &GLOBAL_MEM.to_ne_bytes()),
            query::device::MAX_MEM_ALLOC_SIZE => put(out, size_ret, &MAX_ALLOC.to_ne_bytes()),
            query::device::NAME => put(out, size_ret, b"oxcl soft device"),
            query::device::VENDOR => put(out, size_ret, b"oxcl"),
            query::device::VERSION => put(out, size_ret, b"oxcl 0.1"),
            _ => code::INVALID_VALUE,
        }
    }

    fn context_info(
        &self,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        let refs = match self.objects.get(&handle) {
            Some(entry) if matches!(entry.object, Object::Context(_)) => entry.refs,
            _ => return code::INVALID_CONTEXT,
        };
        let ctx = match self.context(handle) {
            Ok(ctx) => ctx,
            Err(status) => return status,
        };
        match which {
            query::context::REFERENCE_COUNT => put(out, size_ret, &refs.to_ne_bytes()),
            query::context::NUM_DEVICES => {
                put(out, size_ret, &(ctx.devices.len() as u32).to_ne_bytes())
            }
            query::context::DEVICES => {
                let bytes: Vec<u8> = ctx
                    .devices
                    .iter()
                    .flat_map(|d| d.to_ne_bytes())
                    .collect();
                put(out, size_ret, &bytes)
            }
            _ => code::INVALID_VALUE,
        }
    }

    fn queue_info(
        &self,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        let refs = match self.objects.get(&handle) {
            Some(entry) if matches!(entry.object, Object::Queue(_)) => entry.refs,
            _ => return code::INVALID_COMMAND_QUEUE,
        };
        let queue = match self.queue(handle) {
            Ok(queue) => queue,
            Err(status) => return status,
        };
        match which {
            query::queue::CONTEXT => put(out, size_ret, &queue.context.to_ne_bytes()),
            query::queue::DEVICE => put(out, size_ret, &queue.device.to_ne_bytes()),
            query::queue::REFERENCE_COUNT => put(out, size_ret, &refs.to_ne_bytes()),
            query::queue::PROPERTIES => put(out, size_ret, &queue.properties.to_ne_bytes()),
            _ => code::INVALID_VALUE,
        }
    }

    fn event_info(
        &self,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        let refs = match self.objects.get(&handle) {
            Some(entry) if matches!(entry.object, Object::Event(_)) => entry.refs,
            _ => return code::INVALID_EVENT,
        };
        let event = match self.event(handle) {
            Ok(event) => event,
            Err(status) => return status,
        };
        match which {
            query::event::COMMAND_QUEUE => put(out, size_ret, &event.queue.to_ne_bytes()),
            query::event::COMMAND_TYPE => put(out, size_ret, &event.command_type.to_ne_bytes()),
            query::event::REFERENCE_COUNT => put(out, size_ret, &refs.to_ne_bytes()),
            query::event::STATUS => put(out, size_ret, &event.status.to_ne_bytes()),
            query::event::CONTEXT => put(out, size_ret, &event.context.to_ne_bytes()),
            _ => code::INVALID_VALUE,
        }
    }

    fn memory_info(
        &self,
        handle: RawHandle,
        which: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        let refs = match self.objects.get(&handle) {
            Some(entry) if matches!(entry.object, Object::Memory(_)) => entry.refs,
            _ => return code::INVALID_MEM_OBJECT,
        };
        let mem = match self.memory(handle) {
            Ok(mem) => mem,
            Err(status) => return status,
        };
        match which {
            query::memory::TYPE => put(out, size_ret, &MEM_OBJECT_BUFFER.to_ne_bytes()),
            query::memory::FLAGS => put(out, size_ret, &mem.flags.to_ne_bytes()),
            query::memory::SIZE => put(out, size_ret, &(mem.size as u64).to_ne_bytes()),
            query::memory::MAP_COUNT => {
                put(out, size_ret, &(mem.maps.len() as u32).to_ne_bytes())
            }
            query::memory::REFERENCE_COUNT => put(out, size_ret, &refs.to_ne_bytes()),
            query::memory::CONTEXT => put(out, size_ret, &mem.context.to_ne_bytes()),
            query::memory::ASSOCIATED => put(
                out,
                size_ret,
                &mem.parent.unwrap_or(NULL_HANDLE).to_ne_bytes(),
            ),
            query::memory::OFFSET => put(out, size_ret, &(mem.origin as u64).to_ne_bytes()),
            _ => code::INVALID_VALUE,
        }
    }
}
