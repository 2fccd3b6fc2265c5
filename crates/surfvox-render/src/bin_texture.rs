//! GPU copy of the serialized particle bins.

use surfvox_core::{BinBuffer, BinLayout};

use crate::buffer::{align_copy_row, create_zeroed_buffer, map_and_read};
use crate::error::{RenderError, RenderResult};
use crate::gpu::scoped;

/// Bytes per `Rgba32Float` texel.
const TEXEL_BYTES: u32 = 16;

/// Checks a bin layout against the device's 2D texture and buffer limits and
/// returns its texture size.
pub fn check_bin_limits(layout: BinLayout, limits: &wgpu::Limits) -> RenderResult<(u32, u32)> {
    let max = limits.max_texture_dimension_2d;
    let size = layout
        .texture_size()
        .filter(|&(width, height)| width <= max && height <= max)
        .ok_or_else(|| {
            RenderError::TextureCreationFailed(format!(
                "bin texture for {} columns of {} slots by {} rows exceeds the device's 2D texture limit of {max}",
                layout.columns,
                u64::from(layout.capacity) + 1,
                layout.rows
            ))
        })?;
    let alignment = u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let row = (u64::from(size.0) * u64::from(TEXEL_BYTES)).div_ceil(alignment) * alignment;
    let staging = row * u64::from(size.1);
    if staging > limits.max_buffer_size {
        return Err(RenderError::BufferCreationFailed(format!(
            "bin staging buffer of {staging} bytes exceeds the device limit of {}",
            limits.max_buffer_size
        )));
    }
    Ok(size)
}

/// `Rgba32Float` texture of `columns * (capacity + 1)` by `rows` texels.
///
/// Each texel is one particle record; texel `(column * (capacity + 1) + k, row)`
/// is slot `k` of cell `(row, column)`.
#[derive(Debug)]
pub struct BinTexture {
    layout: BinLayout,
    width: u32,
    height: u32,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// Upload staging buffer with rows padded to the copy alignment.
    staging: wgpu::Buffer,
    padded_row: u32,
    /// Host-side padded rows, reused between uploads.
    scratch: Vec<u8>,
}

impl BinTexture {
    /// Creates the texture and staging buffer, failing if the device cannot
    /// hold them.
    pub fn new(device: &wgpu::Device, layout: BinLayout) -> RenderResult<Self> {
        let (width, height) = check_bin_limits(layout, &device.limits())?;
        let texture = scoped(device, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("surfvox bin texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })
        .map_err(|e| RenderError::TextureCreationFailed(e.to_string()))?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row = align_copy_row(width * TEXEL_BYTES);
        let staging = scoped(device, || {
            create_zeroed_buffer(
                device,
                u64::from(padded_row) * u64::from(height),
                wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                Some("surfvox bin staging buffer"),
            )
        })
        .map_err(|e| RenderError::BufferCreationFailed(e.to_string()))?;

        Ok(Self {
            layout,
            width,
            height,
            texture,
            view,
            staging,
            padded_row,
            scratch: vec![0; padded_row as usize * height as usize],
        })
    }

    pub fn layout(&self) -> BinLayout {
        self.layout
    }

    /// Texture size in texels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// Uploads this frame's bins.
    ///
    /// The data is written into the staging buffer first; the texture copy is
    /// encoded only after that write completes, and the texture is valid for
    /// sampling once the returned submission has executed.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bins: &BinBuffer,
    ) -> RenderResult<wgpu::SubmissionIndex> {
        if bins.layout() != self.layout {
            return Err(RenderError::SizeMismatch {
                expected: self.layout.float_len(),
                actual: bins.layout().float_len(),
            });
        }

        let row_bytes = (self.width * TEXEL_BYTES) as usize;
        let padded = self.padded_row as usize;
        for (dst, src) in self
            .scratch
            .chunks_exact_mut(padded)
            .zip(bins.as_bytes().chunks_exact(row_bytes))
        {
            dst[..row_bytes].copy_from_slice(src);
        }
        queue.write_buffer(&self.staging, 0, &self.scratch);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("surfvox bin upload encoder"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: None,
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            self.extent(),
        );
        Ok(queue.submit(std::iter::once(encoder.finish())))
    }

    /// Reads the texture back as the flat serialized float layout.
    pub fn read(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> RenderResult<Vec<f32>> {
        let readback = create_zeroed_buffer(
            device,
            u64::from(self.padded_row) * u64::from(self.height),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            Some("surfvox bin readback"),
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("surfvox bin readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: None,
                },
            },
            self.extent(),
        );
        queue.submit(std::iter::once(encoder.finish()));

        let bytes = map_and_read(device, &readback)?;
        let row_bytes = (self.width * TEXEL_BYTES) as usize;
        Ok(bytes
            .chunks_exact(self.padded_row as usize)
            .flat_map(|row| row[..row_bytes].chunks_exact(4))
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect())
    }
}
