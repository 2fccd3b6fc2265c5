//! GPU buffer helpers.

use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};

/// Creates a read-only storage buffer from data, shareable with compute.
///
/// Mesh vertex and index buffers are created this way so the voxelization
/// kernel can bind them directly.
pub fn create_mesh_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    data: &[T],
    label: Option<&str>,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label,
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::INDEX
            | wgpu::BufferUsages::COPY_DST,
    })
}

/// Creates a uniform buffer from data.
pub fn create_uniform_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    data: &T,
    label: Option<&str>,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label,
        contents: bytemuck::bytes_of(data),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

/// Creates a zero-initialized buffer of `size` bytes.
pub fn create_zeroed_buffer(
    device: &wgpu::Device,
    size: u64,
    usage: wgpu::BufferUsages,
    label: Option<&str>,
) -> wgpu::Buffer {
    // wgpu zero-initializes buffers that are not mapped at creation.
    device.create_buffer(&wgpu::BufferDescriptor {
        label,
        size,
        usage,
        mapped_at_creation: false,
    })
}

/// Updates a buffer with new data.
pub fn update_buffer<T: bytemuck::Pod>(queue: &wgpu::Queue, buffer: &wgpu::Buffer, data: &T) {
    queue.write_buffer(buffer, 0, bytemuck::bytes_of(data));
}

/// Maps `staging` for reading and returns its contents.
///
/// Every command that writes `staging` must already be submitted.
pub fn map_and_read(device: &wgpu::Device, staging: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
    let buffer_slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::PollType::wait_indefinitely());
    rx.recv()
        .map_err(|e| RenderError::BufferMapFailed(e.to_string()))?
        .map_err(|e| RenderError::BufferMapFailed(e.to_string()))?;

    let data = buffer_slice.get_mapped_range();
    let bytes = data.to_vec();
    drop(data);
    staging.unmap();
    Ok(bytes)
}

/// Reads the first `size` bytes of `buffer` back to the host.
///
/// `buffer` must carry `COPY_SRC` usage.
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    size: u64,
) -> RenderResult<Vec<u8>> {
    let staging = create_zeroed_buffer(
        device,
        size,
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        Some("surfvox readback buffer"),
    );
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("surfvox readback encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));
    map_and_read(device, &staging)
}

/// Rounds `bytes` up to the row alignment of texture copies.
pub fn align_copy_row(bytes: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    bytes.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_copy_row() {
        assert_eq!(align_copy_row(1), 256);
        assert_eq!(align_copy_row(256), 256);
        assert_eq!(align_copy_row(257), 512);
        assert_eq!(align_copy_row(512 * 16), 8192);
    }
}
