//! Mapped regions, rectangular transfers, attribute queries, and
//! reference-count lifecycles.

use std::sync::Arc;

use oxcl::api::DeviceApi;
use oxcl::{
    Buffer, CommandQueue, Context, CopyRect, Device, DeviceType, ErrorCode, ErrorKind, Event,
    EventStatus, MapFlags, MemoryFlags, Pitches, Platform, QueueProperties, Rect,
};
use oxcl_soft::SoftDevice;

fn setup() -> (Context, Device, CommandQueue) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let api: Arc<dyn DeviceApi> = SoftDevice::new();
    let platform = Platform::all(Arc::clone(&api)).unwrap().remove(0);
    let device = platform.devices(DeviceType::All).unwrap().remove(0);
    let context = Context::new(api, std::slice::from_ref(&device)).unwrap();
    let queue = CommandQueue::new(&context, &device, QueueProperties::default()).unwrap();
    (context, device, queue)
}

// -- mapping ---------------------------------------------------------------

#[test]
fn map_exposes_and_mutates_buffer_contents() {
    let (context, _, queue) = setup();
    let buffer =
        Buffer::<i32>::with_data(&context, MemoryFlags::default(), &[1, 2, 3, 4]).unwrap();

    let mut mapped = queue.map_all(&buffer).unwrap();
    assert_eq!(mapped.len(), 4);
    assert_eq!(mapped.event().status().unwrap(), EventStatus::Complete);
    // SAFETY: the map was blocking and no device command touches the
    // buffer while the view is live.
    let view = unsafe { mapped.as_slice() };
    assert_eq!(view, [1, 2, 3, 4]);

    // SAFETY: as above; the exclusive borrow is the only host view.
    let view = unsafe { mapped.as_mut_slice() };
    view[2] = 30;
    mapped.unmap().unwrap();

    assert_eq!(queue.read_one(&buffer, 2).unwrap(), 30);
}

#[test]
fn map_of_a_subrange_sees_only_that_window() {
    let (context, _, queue) = setup();
    let data: Vec<u32> = (0..16).collect();
    let buffer = Buffer::<u32>::with_data(&context, MemoryFlags::default(), &data).unwrap();

    let mapped = queue
        .map(&buffer, MapFlags::READ, 4, 8, &[])
        .unwrap();
    // SAFETY: blocking map, no concurrent device access.
    let view = unsafe { mapped.as_slice() };
    assert_eq!(view, (4..12).collect::<Vec<u32>>());
    mapped.unmap().unwrap();
}

#[test]
fn map_count_follows_map_and_unmap() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    assert_eq!(buffer.map_count().unwrap(), 0);

    let mapped = queue.map_all(&buffer).unwrap();
    assert_eq!(buffer.map_count().unwrap(), 1);
    mapped.unmap().unwrap();
    assert_eq!(buffer.map_count().unwrap(), 0);
}

#[test]
fn dropping_a_mapping_unmaps_best_effort() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    {
        let _mapped = queue.map_all(&buffer).unwrap();
        assert_eq!(buffer.map_count().unwrap(), 1);
    }
    queue.finish().unwrap();
    assert_eq!(buffer.map_count().unwrap(), 0);
}

#[test]
fn async_map_is_usable_after_its_event_completes() {
    let (context, _, queue) = setup();
    let buffer =
        Buffer::<u16>::with_data(&context, MemoryFlags::default(), &[7, 8, 9]).unwrap();
    let mapped = queue
        .map_async(&buffer, MapFlags::READ, 0, 3, &[])
        .unwrap();
    mapped.wait().unwrap();
    // SAFETY: the map event completed and nothing else touches the
    // buffer.
    assert_eq!(unsafe { mapped.as_slice() }, [7, 8, 9]);
    mapped.unmap().unwrap();
}

#[test]
fn map_out_of_bounds_is_a_range_error() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let err = queue
        .map(&buffer, MapFlags::default(), 4, 8, &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn failed_map_leaves_no_mapping_behind() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();

    // An event from a different device is invalid in this queue's wait
    // list, so the map must be rejected.
    let (other_context, _, other_queue) = setup();
    let other_buffer = Buffer::<u32>::new(&other_context, MemoryFlags::default(), 8).unwrap();
    let foreign = other_queue
        .write_async(&other_buffer, &[1], 0, &[])
        .unwrap();

    let err = queue
        .map(
            &buffer,
            MapFlags::default(),
            0,
            8,
            std::slice::from_ref(&foreign),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidEventWaitList);
    assert_eq!(buffer.map_count().unwrap(), 0);
}

#[test]
fn map_gated_on_a_failed_event_is_rolled_back() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let gate = Event::user(&context).unwrap();
    gate.fail().unwrap();

    let err = queue
        .map(
            &buffer,
            MapFlags::default(),
            0,
            8,
            std::slice::from_ref(&gate),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExecStatusErrorForEventsInWaitList);
    assert_eq!(buffer.map_count().unwrap(), 0);
}

// -- rectangular transfers -------------------------------------------------

#[test]
fn line_rect_matches_linear_transfer() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();
    let src = [10, 11, 12, 13];
    queue
        .write_rect(
            &buffer,
            &src,
            &Rect::line(4, 0, 4),
            Pitches::tight(),
            Pitches::tight(),
            &[],
        )
        .unwrap();

    let mut out = vec![0i32; 4];
    queue.read(&buffer, &mut out, 4, &[]).unwrap();
    assert_eq!(out, src);

    let mut rect_out = vec![0i32; 4];
    queue
        .read_rect(
            &buffer,
            &mut rect_out,
            &Rect::line(4, 0, 4),
            Pitches::tight(),
            Pitches::tight(),
            &[],
        )
        .unwrap();
    assert_eq!(rect_out, src);
}

#[test]
fn plane_rect_writes_into_a_pitched_grid() {
    let (context, _, queue) = setup();
    // A 4x4 grid of i32 stored row-major in a 16-element buffer.
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();
    let patch = [1, 2, 3, 4];
    queue
        .write_rect(
            &buffer,
            &patch,
            &Rect::plane([1, 1], [0, 0], [2, 2]),
            Pitches::rows(4),
            Pitches::tight(),
            &[],
        )
        .unwrap();

    let mut grid = vec![0i32; 16];
    queue.read(&buffer, &mut grid, 0, &[]).unwrap();
    #[rustfmt::skip]
    assert_eq!(grid, [
        0, 0, 0, 0,
        0, 1, 2, 0,
        0, 3, 4, 0,
        0, 0, 0, 0,
    ]);
}

#[test]
fn plane_rect_reads_from_a_pitched_grid() {
    let (context, _, queue) = setup();
    let grid: Vec<i32> = (0..16).collect();
    let buffer = Buffer::<i32>::with_data(&context, MemoryFlags::default(), &grid).unwrap();

    let mut patch = vec![0i32; 4];
    queue
        .read_rect(
            &buffer,
            &mut patch,
            &Rect::plane([2, 1], [0, 0], [2, 2]),
            Pitches::rows(4),
            Pitches::tight(),
            &[],
        )
        .unwrap();
    // Rows 1 and 2, columns 2 and 3.
    assert_eq!(patch, [6, 7, 10, 11]);
}

#[test]
fn volume_rect_round_trips() {
    let (context, _, queue) = setup();
    // A 2x2x2 cube of u8 in an 8-element buffer.
    let buffer = Buffer::<u8>::new(&context, MemoryFlags::default(), 8).unwrap();
    let cube = [1u8, 2, 3, 4, 5, 6, 7, 8];
    queue
        .write_rect(
            &buffer,
            &cube,
            &Rect::volume([0, 0, 0], [0, 0, 0], [2, 2, 2]),
            Pitches { row: 2, slice: 4 },
            Pitches::tight(),
            &[],
        )
        .unwrap();

    let mut out = vec![0u8; 8];
    queue.read(&buffer, &mut out, 0, &[]).unwrap();
    assert_eq!(out, cube);
}

#[test]
fn pitched_host_layout_scatters_rows() {
    let (context, _, queue) = setup();
    let grid: Vec<i32> = (0..8).collect();
    let buffer = Buffer::<i32>::with_data(&context, MemoryFlags::default(), &grid).unwrap();

    // Read two 2-element rows into a host grid with a 4-element pitch.
    let mut host = vec![-1i32; 8];
    queue
        .read_rect(
            &buffer,
            &mut host,
            &Rect::plane([0, 0], [0, 0], [2, 2]),
            Pitches::rows(2),
            Pitches::rows(4),
            &[],
        )
        .unwrap();
    assert_eq!(host, [0, 1, -1, -1, 2, 3, -1, -1]);
}

#[test]
fn copy_rect_moves_a_region_between_buffers() {
    let (context, _, queue) = setup();
    let grid: Vec<i32> = (0..16).collect();
    let src = Buffer::<i32>::with_data(&context, MemoryFlags::default(), &grid).unwrap();
    let dst = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();

    queue
        .copy_rect(
            &src,
            &dst,
            &CopyRect::plane([0, 0], [2, 2], [2, 2]),
            Pitches::rows(4),
            Pitches::rows(4),
            &[],
        )
        .unwrap()
        .wait()
        .unwrap();

    let mut out = vec![0i32; 16];
    queue.read(&dst, &mut out, 0, &[]).unwrap();
    #[rustfmt::skip]
    assert_eq!(out, [
        0, 0, 0, 0,
        0, 0, 0, 0,
        0, 0, 0, 1,
        0, 0, 4, 5,
    ]);
}

#[test]
fn rect_too_large_for_host_slice_is_rejected() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();
    let mut small = vec![0i32; 3];
    let err = queue
        .read_rect(
            &buffer,
            &mut small,
            &Rect::plane([0, 0], [0, 0], [2, 2]),
            Pitches::rows(4),
            Pitches::tight(),
            &[],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert!(err.detail().contains("slice"));
}

#[test]
fn rect_geometry_overflow_is_rejected() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let mut host = vec![0i32; 8];
    let err = queue
        .read_rect(
            &buffer,
            &mut host,
            &Rect::volume([0, 0, 0], [0, 1, 0], [1, usize::MAX, 1]),
            Pitches::tight(),
            Pitches::tight(),
            &[],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(err.code(), ErrorCode::InvalidValue);
}

#[test]
fn rect_out_of_buffer_bounds_is_rejected() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let mut host = vec![0i32; 16];
    let err = queue
        .read_rect(
            &buffer,
            &mut host,
            &Rect::plane([0, 0], [0, 0], [4, 4]),
            Pitches::rows(4),
            Pitches::tight(),
            &[],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

// -- attribute queries -----------------------------------------------------

#[test]
fn platform_reports_its_identity() {
    let api: Arc<dyn DeviceApi> = SoftDevice::new();
    let platforms = Platform::all(api).unwrap();
    assert_eq!(platforms.len(), 1);
    let platform = &platforms[0];
    assert_eq!(platform.profile().unwrap(), "FULL_PROFILE");
    assert_eq!(platform.name().unwrap(), "oxcl soft platform");
    assert_eq!(platform.vendor().unwrap(), "oxcl");
    assert!(!platform.version().unwrap().is_empty());
    assert!(platform.extensions().unwrap().is_empty());
}

#[test]
fn device_reports_its_capabilities() {
    let (_, device, _) = setup();
    assert_eq!(device.name().unwrap(), "oxcl soft device");
    assert_eq!(device.device_type().unwrap(), DeviceType::Cpu);
    assert!(device.available().unwrap());
    assert_eq!(device.mem_base_addr_align().unwrap(), 16);
    assert!(device.max_compute_units().unwrap() > 0);
    assert!(device.max_mem_alloc_size().unwrap() <= device.global_mem_size().unwrap());
}

#[test]
fn context_reports_its_devices() {
    let (context, _, _) = setup();
    assert_eq!(context.num_devices().unwrap(), 1);
    let devices = context.devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_type().unwrap(), DeviceType::Cpu);
    assert_eq!(context.mem_base_addr_align(), 16);
}

#[test]
fn queue_reports_context_device_and_properties() {
    let (context, device, _) = setup();
    let props = QueueProperties {
        out_of_order: true,
        profiling: true,
    };
    let queue = CommandQueue::new(&context, &device, props).unwrap();
    assert_eq!(queue.properties().unwrap(), props);
    assert_eq!(queue.device().unwrap(), device);
    assert_eq!(queue.context().unwrap().num_devices().unwrap(), 1);
}

#[test]
fn buffer_reports_size_and_flags() {
    let (context, _, _) = setup();
    let flags = MemoryFlags::READ_ONLY | MemoryFlags::HOST_WRITE_ONLY;
    let buffer = Buffer::<u64>::new(&context, flags, 32).unwrap();
    assert_eq!(buffer.len(), 32);
    assert_eq!(buffer.byte_size(), 256);
    assert_eq!(buffer.flags().unwrap(), flags);
}

// -- reference counting ----------------------------------------------------

#[test]
fn clone_retains_and_drop_releases() {
    let (context, _, _) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    assert_eq!(buffer.reference_count().unwrap(), 1);

    let alias = buffer.clone();
    assert_eq!(buffer.reference_count().unwrap(), 2);
    drop(alias);
    assert_eq!(buffer.reference_count().unwrap(), 1);
}

#[test]
fn sub_buffer_keeps_its_root_alive() {
    let (context, _, _) = setup();
    let parent = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let sub = parent
        .create_sub_buffer(MemoryFlags::default(), 0, 4)
        .unwrap();
    assert_eq!(parent.reference_count().unwrap(), 2);
    drop(sub);
    assert_eq!(parent.reference_count().unwrap(), 1);
}

#[test]
fn owning_objects_retain_the_context() {
    let (context, device, _) = setup();
    let base = context.reference_count().unwrap();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    assert_eq!(context.reference_count().unwrap(), base + 1);
    let queue = CommandQueue::new(&context, &device, QueueProperties::default()).unwrap();
    assert_eq!(context.reference_count().unwrap(), base + 2);
    drop(buffer);
    drop(queue);
    assert_eq!(context.reference_count().unwrap(), base);
}

#[test]
fn pending_command_holds_a_reference_on_its_event() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();
    let event = queue
        .write_async(&buffer, &[1], 0, std::slice::from_ref(&gate))
        .unwrap();
    // One reference held here, one by the queued command.
    assert_eq!(event.reference_count().unwrap(), 2);

    gate.finish().unwrap();
    event.wait().unwrap();
    assert_eq!(event.reference_count().unwrap(), 1);
}
