//! Device and queue shared by the graphics and compute sides.

use pollster::FutureExt;

use crate::error::{RenderError, RenderResult};

/// A wgpu device/queue pair.
///
/// Graphics and compute both submit to this one queue, so queue order is the
/// only synchronization between them.
#[derive(Debug, Clone)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: Option<wgpu::AdapterInfo>,
}

impl GpuContext {
    /// Creates a context without a surface.
    pub async fn new_headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        let adapter_info = adapter.get_info();
        log::info!(
            "surfvox using adapter {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("surfvox device (headless)"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        Ok(Self {
            device,
            queue,
            adapter_info: Some(adapter_info),
        })
    }

    /// Blocking form of [`GpuContext::new_headless`].
    pub fn new_headless_blocking() -> RenderResult<Self> {
        Self::new_headless().block_on()
    }

    /// Wraps the device the graphics side already created.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            adapter_info: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Adapter details, when this context created the device itself.
    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.adapter_info.as_ref()
    }
}

/// Runs `create` inside validation and out-of-memory error scopes, returning
/// the first error either scope caught.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    create: impl FnOnce() -> T,
) -> std::result::Result<T, wgpu::Error> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = device.pop_error_scope().block_on();
    let out_of_memory = device.pop_error_scope().block_on();
    match validation.or(out_of_memory) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}
