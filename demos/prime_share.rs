//! PRIME sharing example.
//!
//! A producer process allocates a shmem buffer, fills it and exports it.
//! The descriptor is passed to a consumer process on a second device, which
//! imports it and reads the contents back.
//!
//! Run with: `cargo run --example prime_share`

use drm_prime::prelude::*;
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("drm_prime=debug")
        .init();
    drm_prime::observability::init_metrics();

    println!("PRIME Sharing Example");
    println!("=====================\n");

    let gpu = Device::new(ShmemDriver, DeviceConfig::new("card0"));
    let display = Device::new(ShmemDriver, DeviceConfig::new("card1"));

    let producer_process = Arc::new(DescriptorTable::new());
    let consumer_process = Arc::new(DescriptorTable::new());
    let mut producer = gpu.open(Arc::clone(&producer_process));
    let mut consumer = display.open(Arc::clone(&consumer_process));

    // Producer: allocate, fill, export.
    let handle = gpu.driver().create_object(&mut producer, 64 * 1024)?;
    let obj = producer.lookup(handle)?;
    gpu.driver()
        .with_segment(&obj, |s| s.write_at(0, b"hello from card0"))
        .ok_or_else(|| Error::InvalidOperation("not a shmem object".into()))??;

    let mut args = PrimeHandle {
        handle,
        flags: DRM_CLOEXEC,
        fd: -1,
    };
    prime_handle_to_fd_ioctl(&gpu, &mut args, &mut producer)?;
    println!("producer: handle {} -> fd {}", args.handle, args.fd);

    // Hand the descriptor over, as a unix socket would.
    let remote_fd = producer_process.transfer(args.fd, &consumer_process, PrimeFlags::empty())?;
    producer_process.close(args.fd)?;
    println!("transferred: fd {} -> consumer fd {}", args.fd, remote_fd);

    // Consumer: import twice; the second import returns the same handle.
    let mut import = PrimeHandle {
        fd: remote_fd,
        ..PrimeHandle::default()
    };
    prime_fd_to_handle_ioctl(&display, &mut import, &mut consumer)?;
    let first = import.handle;
    prime_fd_to_handle_ioctl(&display, &mut import, &mut consumer)?;
    println!("consumer: fd {} -> handle {} (again: {})", remote_fd, first, import.handle);

    let imported = consumer.lookup(import.handle)?;
    let mut data = [0u8; 16];
    display
        .driver()
        .with_segment(&imported, |s| s.read_at(0, &mut data))
        .ok_or_else(|| Error::InvalidOperation("not a shmem import".into()))??;
    println!("consumer read: {:?}", String::from_utf8_lossy(&data));

    // Imported buffers cannot be passed on.
    let mut reexport = PrimeHandle {
        handle: import.handle,
        ..PrimeHandle::default()
    };
    let result = prime_handle_to_fd_ioctl(&display, &mut reexport, &mut consumer);
    println!("consumer re-export: {}", drm_prime::ioctl::ioctl_result(result));

    drop(imported);
    consumer.close();
    consumer_process.close(remote_fd)?;
    println!("\nall buffers released: {}", obj.export_dma_buf().is_none());

    Ok(())
}
