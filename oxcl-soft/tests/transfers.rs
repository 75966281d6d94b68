//! 1-D transfer behavior: round trips, copies, fills, and sub-buffers.

use std::sync::Arc;

use oxcl::api::DeviceApi;
use oxcl::{
    Buffer, CommandQueue, Context, Device, DeviceType, ErrorCode, ErrorKind, MemoryFlags,
    Platform, QueueProperties,
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

#[test]
fn write_then_read_round_trip() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 64).unwrap();
    let data: Vec<u32> = (0..64).collect();
    queue.write(&buffer, &data, 0, &[]).unwrap();

    let mut out = vec![0u32; 64];
    queue.read(&buffer, &mut out, 0, &[]).unwrap();
    assert_eq!(out, data);

    let mut window = vec![0u32; 10];
    queue.read(&buffer, &mut window, 20, &[]).unwrap();
    assert_eq!(window, (20..30).collect::<Vec<u32>>());
}

#[test]
fn partial_write_lands_at_its_offset() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::with_data(&context, MemoryFlags::default(), &[1; 16]).unwrap();
    queue.write(&buffer, &[9, 9, 9], 4, &[]).unwrap();

    let mut out = vec![0i32; 16];
    queue.read(&buffer, &mut out, 0, &[]).unwrap();
    let mut expected = vec![1i32; 16];
    expected[4..7].fill(9);
    assert_eq!(out, expected);
}

#[test]
fn scenario_seed_then_overwrite_window() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 100).unwrap();
    let seed: Vec<i32> = (0..100).collect();
    queue.write(&buffer, &seed, 0, &[]).unwrap();
    queue.write(&buffer, &[7; 10], 5, &[]).unwrap();

    let mut head = vec![0i32; 5];
    queue.read(&buffer, &mut head, 0, &[]).unwrap();
    assert_eq!(head, [0, 1, 2, 3, 4]);

    let mut window = vec![0i32; 10];
    queue.read(&buffer, &mut window, 5, &[]).unwrap();
    assert_eq!(window, [7; 10]);

    let mut tail = vec![0i32; 85];
    queue.read(&buffer, &mut tail, 15, &[]).unwrap();
    assert_eq!(tail, (15..100).collect::<Vec<i32>>());
}

#[test]
fn out_of_bounds_read_is_a_range_error() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let mut out = vec![0u32; 4];
    let err = queue.read(&buffer, &mut out, 6, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(err.code(), ErrorCode::InvalidValue);
    assert!(err.detail().contains("bounds"));
}

#[test]
fn copy_moves_bytes_between_buffers() {
    let (context, _, queue) = setup();
    let src = Buffer::<u32>::with_data(&context, MemoryFlags::default(), &[5, 6, 7, 8]).unwrap();
    let dst = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let event = queue.copy(&src, &dst, 1, 2, 3, &[]).unwrap();
    event.wait().unwrap();

    let mut out = vec![0u32; 8];
    queue.read(&dst, &mut out, 0, &[]).unwrap();
    assert_eq!(out, [0, 0, 6, 7, 8, 0, 0, 0]);
}

#[test]
fn overlapping_copy_within_one_buffer_is_rejected() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();
    let err = queue.copy(&buffer, &buffer, 0, 4, 8, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overlap);
    assert_eq!(err.code(), ErrorCode::MemCopyOverlap);
    assert!(err.detail().contains("overlap"));
}

#[test]
fn disjoint_copy_within_one_buffer_succeeds() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();
    queue.write(&buffer, &[3, 1, 4, 1], 0, &[]).unwrap();
    queue.copy(&buffer, &buffer, 0, 8, 4, &[]).unwrap().wait().unwrap();

    let mut out = vec![0i32; 4];
    queue.read(&buffer, &mut out, 8, &[]).unwrap();
    assert_eq!(out, [3, 1, 4, 1]);
}

#[test]
fn zero_length_copy_at_identical_offsets_is_allowed() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let event = queue.copy(&buffer, &buffer, 2, 2, 0, &[]).unwrap();
    event.wait().unwrap();
}

#[test]
fn fill_repeats_the_value_over_the_region() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u64>::new(&context, MemoryFlags::default(), 16).unwrap();
    queue.fill(&buffer, 0xDEAD_BEEFu64, 4, 8, &[]).unwrap().wait().unwrap();

    let mut out = vec![0u64; 16];
    queue.read(&buffer, &mut out, 0, &[]).unwrap();
    assert!(out[..4].iter().all(|&v| v == 0));
    assert!(out[4..12].iter().all(|&v| v == 0xDEAD_BEEF));
    assert!(out[12..].iter().all(|&v| v == 0));
}

#[test]
fn single_element_conveniences_round_trip() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<f32>::new(&context, MemoryFlags::default(), 4).unwrap();
    queue.write_one(&buffer, 2.5f32, 3).unwrap();
    assert_eq!(queue.read_one(&buffer, 3).unwrap(), 2.5);
    assert_eq!(queue.read_one(&buffer, 0).unwrap(), 0.0);
}

#[test]
fn initial_host_data_is_visible() {
    let (context, _, queue) = setup();
    let buffer =
        Buffer::<u16>::with_data(&context, MemoryFlags::default(), &[10, 20, 30]).unwrap();
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.byte_size(), 6);
    let mut out = vec![0u16; 3];
    queue.read(&buffer, &mut out, 0, &[]).unwrap();
    assert_eq!(out, [10, 20, 30]);
}

#[test]
fn zero_sized_buffer_is_a_range_error() {
    let (context, _, _) = setup();
    let err = Buffer::<i32>::new(&context, MemoryFlags::default(), 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(err.code(), ErrorCode::InvalidBufferSize);
}

#[test]
fn misaligned_sub_buffer_offset_is_a_range_error() {
    let (context, device, _) = setup();
    // Element offset 3 of an i32 buffer is 12 bytes, which cannot satisfy
    // the device's 16-byte base alignment.
    assert_eq!(device.mem_base_addr_align().unwrap(), 16);
    let parent = Buffer::<i32>::new(&context, MemoryFlags::default(), 32).unwrap();
    let err = parent
        .create_sub_buffer(MemoryFlags::default(), 3, 8)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(err.code(), ErrorCode::MisalignedSubBufferOffset);
}

#[test]
fn sub_buffer_out_of_bounds_is_a_range_error() {
    let (context, _, _) = setup();
    let parent = Buffer::<i32>::new(&context, MemoryFlags::default(), 32).unwrap();
    let err = parent
        .create_sub_buffer(MemoryFlags::default(), 4, 32)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(err.code(), ErrorCode::InvalidValue);
}

#[test]
fn sub_buffer_of_sub_buffer_is_rejected() {
    let (context, _, _) = setup();
    let parent = Buffer::<i32>::new(&context, MemoryFlags::default(), 32).unwrap();
    let sub = parent
        .create_sub_buffer(MemoryFlags::default(), 4, 16)
        .unwrap();
    let err = sub
        .create_sub_buffer(MemoryFlags::default(), 4, 4)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.code(), ErrorCode::InvalidMemObject);
}

#[test]
fn sub_buffer_aliases_parent_storage() {
    let (context, _, queue) = setup();
    let parent = Buffer::<i32>::new(&context, MemoryFlags::default(), 32).unwrap();
    let seed: Vec<i32> = (0..32).collect();
    queue.write(&parent, &seed, 0, &[]).unwrap();

    let sub = parent
        .create_sub_buffer(MemoryFlags::default(), 8, 8)
        .unwrap();
    assert_eq!(sub.len(), 8);
    let mut out = vec![0i32; 8];
    queue.read(&sub, &mut out, 0, &[]).unwrap();
    assert_eq!(out, (8..16).collect::<Vec<i32>>());

    // Writes through the view are visible through the parent.
    queue.write(&sub, &[-1, -2], 0, &[]).unwrap();
    assert_eq!(queue.read_one(&parent, 8).unwrap(), -1);
    assert_eq!(queue.read_one(&parent, 9).unwrap(), -2);
}

#[test]
fn sub_buffer_reports_parent_and_offset() {
    let (context, _, _) = setup();
    let parent = Buffer::<i32>::new(&context, MemoryFlags::default(), 32).unwrap();
    assert_eq!(parent.parent_buffer().unwrap(), None);
    assert_eq!(parent.offset().unwrap(), 0);

    let sub = parent
        .create_sub_buffer(MemoryFlags::default(), 4, 8)
        .unwrap();
    assert_eq!(sub.offset().unwrap(), 16);
    let reported = sub.parent_buffer().unwrap().unwrap();
    assert_eq!(reported, parent);
    assert_eq!(reported.len(), 32);
}

#[test]
fn overlap_through_sub_buffer_views_is_detected() {
    let (context, _, queue) = setup();
    let parent = Buffer::<i32>::new(&context, MemoryFlags::default(), 32).unwrap();
    let front = parent
        .create_sub_buffer(MemoryFlags::default(), 0, 16)
        .unwrap();
    let back = parent
        .create_sub_buffer(MemoryFlags::default(), 8, 16)
        .unwrap();
    // front[8..16) and back[0..8) are the same bytes of the root.
    let err = queue.copy(&front, &back, 8, 0, 8, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overlap);

    // Disjoint halves of the root are fine.
    queue.copy(&front, &back, 0, 8, 8, &[]).unwrap().wait().unwrap();
}

#[test]
fn no_gpu_device_enumerates_as_resource_error() {
    let api: Arc<dyn DeviceApi> = SoftDevice::new();
    let platform = Platform::all(api).unwrap().remove(0);
    let err = platform.devices(DeviceType::Gpu).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DeviceNotFound);
    assert!(err.detail().contains("no devices"));
}
