//! Compiled voxelization program: the `voxelize` and `fast_clear` kernels.

use pollster::FutureExt;

use crate::error::{RenderError, RenderResult};

/// Lanes per work group; must match `@workgroup_size` in `voxelize.wgsl`.
pub const WORK_GROUP_SIZE: u32 = 64;

/// Pipelines and bind group layouts for the voxelization program.
#[derive(Debug)]
pub struct VoxelKernels {
    /// Group 0: volume words and the fixed arguments.
    pub volume_layout: wgpu::BindGroupLayout,
    /// Group 1: positions, triangle indices and the triangle count.
    pub mesh_layout: wgpu::BindGroupLayout,
    /// Group 0 of `fast_clear`: the volume words only.
    pub clear_layout: wgpu::BindGroupLayout,
    pub voxelize: wgpu::ComputePipeline,
    pub fast_clear: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl VoxelKernels {
    /// Compiles the program and builds both pipelines.
    pub fn new(device: &wgpu::Device) -> RenderResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Voxelize Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/voxelize.wgsl").into()),
        });
        if let Some(err) = device.pop_error_scope().block_on() {
            log::error!("voxelization program failed to compile: {err}");
            return Err(RenderError::ShaderCompilationFailed(err.to_string()));
        }

        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxelize Volume Bind Group Layout"),
            entries: &[storage_entry(0, false), uniform_entry(1)],
        });
        let mesh_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxelize Mesh Bind Group Layout"),
            entries: &[storage_entry(0, true), storage_entry(1, true), uniform_entry(2)],
        });
        let clear_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fast Clear Bind Group Layout"),
            entries: &[storage_entry(0, false)],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let voxelize_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Voxelize Pipeline Layout"),
            bind_group_layouts: &[&volume_layout, &mesh_layout],
            push_constant_ranges: &[],
        });
        let voxelize = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Voxelize Pipeline"),
            layout: Some(&voxelize_layout),
            module: &shader,
            entry_point: Some("voxelize"),
            compilation_options: Default::default(),
            cache: None,
        });

        let clear_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Fast Clear Pipeline Layout"),
            bind_group_layouts: &[&clear_layout],
            push_constant_ranges: &[],
        });
        let fast_clear = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Fast Clear Pipeline"),
            layout: Some(&clear_pipeline_layout),
            module: &shader,
            entry_point: Some("fast_clear"),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = device.pop_error_scope().block_on() {
            log::error!("voxelization pipelines could not be created: {err}");
            return Err(RenderError::PipelineCreationFailed(err.to_string()));
        }

        log::debug!("voxelization kernels compiled");
        Ok(Self {
            volume_layout,
            mesh_layout,
            clear_layout,
            voxelize,
            fast_clear,
        })
    }
}

/// Splits `groups` work groups into a 2D grid that fits `max_per_dimension`.
pub fn dispatch_grid(groups: u32, max_per_dimension: u32) -> (u32, u32) {
    if groups <= max_per_dimension {
        (groups, 1)
    } else {
        (max_per_dimension, groups.div_ceil(max_per_dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_grid() {
        assert_eq!(dispatch_grid(10, 65535), (10, 1));
        assert_eq!(dispatch_grid(65535, 65535), (65535, 1));
        assert_eq!(dispatch_grid(65536, 65535), (65535, 2));
        assert_eq!(dispatch_grid(0, 65535), (0, 1));
    }

    #[test]
    fn test_shader_declares_both_kernels() {
        let source = include_str!("shaders/voxelize.wgsl");
        assert!(source.contains("fn voxelize("));
        assert!(source.contains("fn fast_clear("));
        assert!(source.contains(&format!("@workgroup_size({WORK_GROUP_SIZE})")));
    }
}
