use tracing::{info, warn};

use crate::error::{GpuError, Result};

/// Headless wgpu device and queue shared by every pipeline context
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    /// Largest texture edge the device accepts
    pub max_texture_dim: u32,
}

impl GpuDevice {
    /// Acquire a device: hardware adapter first, then the software fallback.
    pub async fn new() -> Result<Self> {
        if let Some(device) = Self::request(false).await? {
            return Ok(device);
        }

        warn!("Hardware GPU adapter unavailable, trying software fallback");
        Self::request(true).await?.ok_or_else(|| {
            GpuError::ResourceCreation {
                resource: "adapter".to_string(),
                reason: "no GPU adapter or software fallback available".to_string(),
            }
            .into()
        })
    }

    /// Blocking version of [`GpuDevice::new`]
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    async fn request(force_fallback: bool) -> Result<Option<Self>> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let Some(adapter) = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await
        else {
            return Ok(None);
        };

        let adapter_info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Chroma Keyer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::ResourceCreation {
                resource: "device".to_string(),
                reason: e.to_string(),
            })?;

        let max_texture_dim = device.limits().max_texture_dimension_2d;
        info!(
            "Using GPU adapter: {} ({:?}, max texture {})",
            adapter_info.name, adapter_info.backend, max_texture_dim
        );

        Ok(Some(Self {
            device,
            queue,
            adapter_info,
            max_texture_dim,
        }))
    }

    /// Short human-readable adapter description
    pub fn adapter_summary(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.backend)
    }
}
