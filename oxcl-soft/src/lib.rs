//! In-process software reference device for the `oxcl` binding layer.
//!
//! [`SoftDevice`] implements [`DeviceApi`] entirely against host memory:
//! one platform, one CPU-class device, real deferred execution. Enqueued
//! commands sit in their queue until something pumps the device: a
//! blocking enqueue, an event wait, a queue `finish`, an event status
//! query, or a user-event signal. Commands gated on an unsignalled user
//! event park their waiters on a condvar, so dependencies may be
//! signalled from another thread.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod state;
mod storage;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::trace;

use oxcl::api::{code, command, DeviceApi, EventCallback, ObjectKind, RawHandle};

use state::{Fired, HostPtr, Op, RectSpec, State};

pub struct SoftDevice {
    state: Mutex<State>,
    progress: Condvar,
}

impl SoftDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::new()),
            progress: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("device state poisoned")
    }

    fn fire(fired: Vec<Fired>) {
        for (callback, event, status) in fired {
            callback(event, status);
        }
    }

    /// Block until `event` reaches a terminal status and return it. The
    /// error branch carries the invalid-handle code when `event` does not
    /// name a live event.
    fn wait_event_terminal(&self, event: RawHandle) -> Result<i32, i32> {
        let mut guard = self.lock();
        loop {
            let fired = guard.pump();
            if !fired.is_empty() {
                drop(guard);
                self.progress.notify_all();
                Self::fire(fired);
                guard = self.lock();
                continue;
            }
            match guard.event_status(event) {
                Ok(status) if status <= 0 => return Ok(status),
                Ok(_) => {}
                Err(status) => return Err(status),
            }
            guard = self
                .progress
                .wait(guard)
                .expect("device state poisoned");
        }
    }

    /// Common tail of every enqueue entry point.
    fn finish_enqueue(
        &self,
        mut guard: MutexGuard<'_, State>,
        queue: RawHandle,
        wait: &[RawHandle],
        command_type: u32,
        op: Op,
        blocking: bool,
        out_event: Option<&mut RawHandle>,
    ) -> i32 {
        let export = blocking || out_event.is_some();
        let event = match guard.enqueue(queue, wait, command_type, op, export) {
            Ok(event) => event,
            Err(status) => return status,
        };
        drop(guard);
        trace!(queue, event, command_type, blocking, "enqueued");
        if !blocking {
            if let Some(out) = out_event {
                *out = event;
            }
            return code::SUCCESS;
        }
        // The command holds its own reference, so the event cannot vanish
        // while we wait on it.
        let terminal = self.wait_event_terminal(event).unwrap_or_else(|status| status);
        match out_event {
            Some(out) => *out = event,
            None => {
                let mut guard = self.lock();
                let (_, fired) = guard.release(ObjectKind::Event, event);
                drop(guard);
                Self::fire(fired);
            }
        }
        if terminal < 0 {
            terminal
        } else {
            code::SUCCESS
        }
    }
}

impl fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftDevice").finish_non_exhaustive()
    }
}

impl DeviceApi for SoftDevice {
    fn platform_ids(&self, out: &mut Vec<RawHandle>) -> i32 {
        out.clear();
        out.push(state::PLATFORM);
        code::SUCCESS
    }

    fn device_ids(&self, platform: RawHandle, kind_mask: u64, out: &mut Vec<RawHandle>) -> i32 {
        if platform != state::PLATFORM {
            return code::INVALID_PLATFORM;
        }
        out.clear();
        let matches = kind_mask & (oxcl::api::device_type::CPU | oxcl::api::device_type::DEFAULT);
        if matches == 0 {
            return code::DEVICE_NOT_FOUND;
        }
        out.push(state::DEVICE);
        code::SUCCESS
    }

    fn retain(&self, kind: ObjectKind, handle: RawHandle) -> i32 {
        self.lock().retain(kind, handle)
    }

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> i32 {
        let (status, fired) = self.lock().release(kind, handle);
        if !fired.is_empty() {
            self.progress.notify_all();
            Self::fire(fired);
        }
        status
    }

    fn get_info(
        &self,
        kind: ObjectKind,
        handle: RawHandle,
        query: u32,
        out: Option<&mut [u8]>,
        size_ret: &mut usize,
    ) -> i32 {
        let mut guard = self.lock();
        // Polled event statuses must make progress.
        if kind == ObjectKind::Event && query == oxcl::api::query::event::STATUS {
            let fired = guard.pump();
            if !fired.is_empty() {
                let status = guard.get_info(kind, handle, query, out, size_ret);
                drop(guard);
                self.progress.notify_all();
                Self::fire(fired);
                return status;
            }
        }
        guard.get_info(kind, handle, query, out, size_ret)
    }

    fn create_context(&self, devices: &[RawHandle], out: &mut RawHandle) -> i32 {
        match self.lock().create_context(devices) {
            Ok(handle) => {
                *out = handle;
                code::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn create_queue(
        &self,
        context: RawHandle,
        device: RawHandle,
        properties: u64,
        out: &mut RawHandle,
    ) -> i32 {
        match self.lock().create_queue(context, device, properties) {
            Ok(handle) => {
                *out = handle;
                code::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn create_buffer(
        &self,
        context: RawHandle,
        flags: u64,
        size: usize,
        host_data: Option<&[u8]>,
        out: &mut RawHandle,
    ) -> i32 {
        match self.lock().create_buffer(context, flags, size, host_data) {
            Ok(handle) => {
                *out = handle;
                code::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn create_sub_buffer(
        &self,
        buffer: RawHandle,
        flags: u64,
        origin: usize,
        size: usize,
        out: &mut RawHandle,
    ) -> i32 {
        match self.lock().create_sub_buffer(buffer, flags, origin, size) {
            Ok(handle) => {
                *out = handle;
                code::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn create_user_event(&self, context: RawHandle, out: &mut RawHandle) -> i32 {
        match self.lock().create_user_event(context) {
            Ok(handle) => {
                *out = handle;
                code::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn set_user_event_status(&self, event: RawHandle, event_status: i32) -> i32 {
        let mut guard = self.lock();
        let mut fired = match guard.set_user_event_status(event, event_status) {
            Ok(fired) => fired,
            Err(status) => return status,
        };
        // Commands gated on this event may now run.
        fired.extend(guard.pump());
        drop(guard);
        self.progress.notify_all();
        Self::fire(fired);
        code::SUCCESS
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> i32 {
        let mut any_failed = false;
        for &event in events {
            match self.wait_event_terminal(event) {
                Ok(terminal) => any_failed |= terminal < 0,
                Err(status) => return status,
            }
        }
        if any_failed {
            code::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
        } else {
            code::SUCCESS
        }
    }

    fn register_event_callback(
        &self,
        event: RawHandle,
        trigger: i32,
        callback: EventCallback,
    ) -> i32 {
        let mut guard = self.lock();
        match guard.register_callback(event, trigger, callback) {
            Ok(None) => code::SUCCESS,
            Ok(Some(fired)) => {
                drop(guard);
                Self::fire(vec![fired]);
                code::SUCCESS
            }
            Err(status) => status,
        }
    }

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
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        if let Err(status) = guard.validate_range(buffer, offset, len) {
            return status;
        }
        let op = Op::Read {
            buffer,
            offset,
            len,
            dst: HostPtr(dst),
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::READ_BUFFER,
            op,
            blocking,
            out_event,
        )
    }

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
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        if let Err(status) = guard.validate_range(buffer, offset, len) {
            return status;
        }
        // SAFETY: src is valid for len bytes for the duration of the call
        // per the raw contract; the bytes are staged here.
        let data = unsafe { std::slice::from_raw_parts(src, len) }
            .to_vec()
            .into_boxed_slice();
        let op = Op::Write {
            buffer,
            offset,
            data,
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::WRITE_BUFFER,
            op,
            blocking,
            out_event,
        )
    }

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
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        if let Err(status) = guard.validate_range(src, src_offset, len) {
            return status;
        }
        if let Err(status) = guard.validate_range(dst, dst_offset, len) {
            return status;
        }
        if len > 0 {
            if let Err(status) = guard.check_overlap(
                src,
                dst,
                (src_offset, src_offset + len),
                (dst_offset, dst_offset + len),
            ) {
                return status;
            }
        }
        let op = Op::Copy {
            src,
            dst,
            src_offset,
            dst_offset,
            len,
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::COPY_BUFFER,
            op,
            false,
            Some(out_event),
        )
    }

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
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        let buf_rect = RectSpec {
            origin: buffer_origin,
            extent,
            pitch: buffer_pitch,
        };
        let host_rect = RectSpec {
            origin: host_origin,
            extent,
            pitch: host_pitch,
        };
        if let Err(status) = guard.validate_rect(buffer, &buf_rect) {
            return status;
        }
        if host_rect.span().is_none() {
            return code::INVALID_VALUE;
        }
        let op = Op::ReadRect {
            buffer,
            buf_rect,
            host_rect,
            dst: HostPtr(dst),
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::READ_BUFFER_RECT,
            op,
            blocking,
            out_event,
        )
    }

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
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        let buf_rect = RectSpec {
            origin: buffer_origin,
            extent,
            pitch: buffer_pitch,
        };
        let host_rect = RectSpec {
            origin: host_origin,
            extent,
            pitch: host_pitch,
        };
        if let Err(status) = guard.validate_rect(buffer, &buf_rect) {
            return status;
        }
        if host_rect.span().is_none() {
            return code::INVALID_VALUE;
        }
        // SAFETY: the host region is valid for the duration of the call
        // per the raw contract; its rows are staged here.
        let data = unsafe { state::stage_rows(src, &host_rect) };
        let op = Op::WriteRect {
            buffer,
            buf_rect,
            data,
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::WRITE_BUFFER_RECT,
            op,
            blocking,
            out_event,
        )
    }

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
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        let src_rect = RectSpec {
            origin: src_origin,
            extent,
            pitch: src_pitch,
        };
        let dst_rect = RectSpec {
            origin: dst_origin,
            extent,
            pitch: dst_pitch,
        };
        if let Err(status) = guard.validate_rect(src, &src_rect) {
            return status;
        }
        if let Err(status) = guard.validate_rect(dst, &dst_rect) {
            return status;
        }
        // Conservative overlap test over each region's full byte span.
        let spans = (src_rect.span(), dst_rect.span());
        if let (Some(src_span), Some(dst_span)) = spans {
            if src_span > 0 && dst_span > 0 {
                if let Err(status) = guard.check_overlap(
                    src,
                    dst,
                    (src_rect.first_byte(), src_span),
                    (dst_rect.first_byte(), dst_span),
                ) {
                    return status;
                }
            }
        }
        let op = Op::CopyRect {
            src,
            dst,
            src_rect,
            dst_rect,
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::COPY_BUFFER_RECT,
            op,
            false,
            Some(out_event),
        )
    }

    fn enqueue_fill(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        pattern: &[u8],
        offset: usize,
        len: usize,
        wait_list: &[RawHandle],
        out_event: &mut RawHandle,
    ) -> i32 {
        let guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        if pattern.is_empty() || offset % pattern.len() != 0 || len % pattern.len() != 0 {
            return code::INVALID_VALUE;
        }
        if let Err(status) = guard.validate_range(buffer, offset, len) {
            return status;
        }
        let op = Op::Fill {
            buffer,
            pattern: pattern.to_vec().into_boxed_slice(),
            offset,
            len,
        };
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::FILL_BUFFER,
            op,
            false,
            Some(out_event),
        )
    }

    fn enqueue_map(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        _flags: u64,
        offset: usize,
        len: usize,
        wait_list: &[RawHandle],
        out_ptr: &mut *mut u8,
        out_event: &mut RawHandle,
    ) -> i32 {
        let mut guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        if len == 0 {
            return code::INVALID_VALUE;
        }
        if let Err(status) = guard.validate_range(buffer, offset, len) {
            return status;
        }
        let ptr = match guard.record_map(buffer, offset) {
            Ok(ptr) => ptr,
            Err(status) => return status,
        };
        let status = self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::MAP_BUFFER,
            Op::Map,
            blocking,
            Some(out_event),
        );
        if status != code::SUCCESS {
            // The mapping was recorded before the enqueue; undo it so a
            // rejected map leaves the count and pointer table untouched.
            let _ = self.lock().record_unmap(buffer, ptr);
            return status;
        }
        *out_ptr = ptr;
        status
    }

    unsafe fn enqueue_unmap(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        ptr: *mut u8,
        wait_list: &[RawHandle],
        out_event: Option<&mut RawHandle>,
    ) -> i32 {
        let mut guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        if let Err(status) = guard.record_unmap(buffer, ptr) {
            return status;
        }
        self.finish_enqueue(
            guard,
            queue,
            wait_list,
            command::UNMAP_MEM_OBJECT,
            Op::Unmap,
            false,
            out_event,
        )
    }

    fn flush(&self, queue: RawHandle) -> i32 {
        let mut guard = self.lock();
        if let Err(status) = guard.queue(queue) {
            return status;
        }
        let fired = guard.pump();
        drop(guard);
        if !fired.is_empty() {
            self.progress.notify_all();
            Self::fire(fired);
        }
        code::SUCCESS
    }

    fn finish(&self, queue: RawHandle) -> i32 {
        let mut guard = self.lock();
        loop {
            let fired = guard.pump();
            if !fired.is_empty() {
                drop(guard);
                self.progress.notify_all();
                Self::fire(fired);
                guard = self.lock();
                continue;
            }
            match guard.queue_idle(queue) {
                Ok(true) => return code::SUCCESS,
                Ok(false) => {}
                Err(status) => return status,
            }
            guard = self
                .progress
                .wait(guard)
                .expect("device state poisoned");
        }
    }
}
