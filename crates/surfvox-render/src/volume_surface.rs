//! Graphics-owned volume resources.

use surfvox_core::VolumeDescriptor;

use crate::buffer::{create_zeroed_buffer, map_and_read, read_buffer};
use crate::error::{RenderError, RenderResult};
use crate::gpu::scoped;

/// Checks a volume against the device's 3D texture and storage buffer limits.
pub fn check_volume_limits(descriptor: &VolumeDescriptor, limits: &wgpu::Limits) -> RenderResult<()> {
    let max = limits.max_texture_dimension_3d;
    if descriptor.width > max || descriptor.height > max || descriptor.depth > max {
        return Err(RenderError::TextureCreationFailed(format!(
            "volume {}x{}x{} exceeds the device's 3D texture limit of {max}",
            descriptor.width, descriptor.height, descriptor.depth
        )));
    }
    let bytes = descriptor.byte_len();
    let max_bytes = limits
        .max_buffer_size
        .min(u64::from(limits.max_storage_buffer_binding_size));
    if bytes > max_bytes {
        return Err(RenderError::BufferCreationFailed(format!(
            "volume buffer of {bytes} bytes exceeds the device's storage limit of {max_bytes}"
        )));
    }
    Ok(())
}

/// The 3D density texture the raycaster samples, plus the buffers around it.
#[derive(Debug)]
pub struct VolumeSurface {
    descriptor: VolumeDescriptor,
    /// `R8Unorm` 3D texture, one byte per voxel.
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// Storage buffer shared with compute, in the descriptor's pitched layout.
    pub shared: wgpu::Buffer,
    /// Zero-filled source for the post-release texture clear.
    pub clear_transfer: wgpu::Buffer,
}

impl VolumeSurface {
    /// Creates the texture and buffers, failing if the device cannot hold them.
    pub fn new(device: &wgpu::Device, descriptor: VolumeDescriptor) -> RenderResult<Self> {
        check_volume_limits(&descriptor, &device.limits())?;

        let texture = scoped(device, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("surfvox volume texture"),
                size: Self::extent(&descriptor),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })
        .map_err(|e| RenderError::TextureCreationFailed(e.to_string()))?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes = descriptor.byte_len();
        let (shared, clear_transfer) = scoped(device, || {
            let shared = create_zeroed_buffer(
                device,
                bytes,
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                Some("surfvox shared volume"),
            );
            let clear_transfer = create_zeroed_buffer(
                device,
                bytes,
                wgpu::BufferUsages::COPY_SRC,
                Some("surfvox clear transfer buffer"),
            );
            (shared, clear_transfer)
        })
        .map_err(|e| RenderError::BufferCreationFailed(e.to_string()))?;

        Ok(Self {
            descriptor,
            texture,
            view,
            shared,
            clear_transfer,
        })
    }

    pub fn descriptor(&self) -> &VolumeDescriptor {
        &self.descriptor
    }

    pub(crate) fn extent(descriptor: &VolumeDescriptor) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: descriptor.width,
            height: descriptor.height,
            depth_or_array_layers: descriptor.depth,
        }
    }

    /// Reads the shared buffer, in the pitched layout.
    pub fn read_shared(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> RenderResult<Vec<u8>> {
        read_buffer(device, queue, &self.shared, self.descriptor.byte_len())
    }

    /// Reads the texture, in the pitched layout.
    pub fn read_texture(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> RenderResult<Vec<u8>> {
        let staging = create_zeroed_buffer(
            device,
            self.descriptor.byte_len(),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            Some("surfvox volume readback"),
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("surfvox volume readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texel_copy_buffer(&staging, &self.descriptor),
            Self::extent(&self.descriptor),
        );
        queue.submit(std::iter::once(encoder.finish()));
        map_and_read(device, &staging)
    }
}

/// Describes `buffer` as holding a volume in `descriptor`'s pitched layout.
pub(crate) fn texel_copy_buffer<'a>(
    buffer: &'a wgpu::Buffer,
    descriptor: &VolumeDescriptor,
) -> wgpu::TexelCopyBufferInfo<'a> {
    wgpu::TexelCopyBufferInfo {
        buffer,
        layout: wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(descriptor.row_pitch),
            rows_per_image: Some(descriptor.height),
        },
    }
}

/// Encodes a copy of a pitched volume buffer into `texture`.
pub(crate) fn copy_buffer_to_volume(
    encoder: &mut wgpu::CommandEncoder,
    source: &wgpu::Buffer,
    texture: &wgpu::Texture,
    descriptor: &VolumeDescriptor,
) {
    encoder.copy_buffer_to_texture(
        texel_copy_buffer(source, descriptor),
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        VolumeSurface::extent(descriptor),
    );
}
