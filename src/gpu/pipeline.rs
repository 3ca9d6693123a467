use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::{
    error::{GpuError, Result},
    gpu::{shaders::KEYING_SHADER, GpuDevice},
    keying::{ClassifiedFrame, FrameClassifier, KeySettings},
    video::Frame,
};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Full-screen quad as a triangle strip
const QUAD_POSITIONS: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];
/// Texcoords with v = 0 at the bottom edge of clip space
const QUAD_TEXCOORDS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

const POSITION_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 0,
        shader_location: 0,
    }],
};

const TEXCOORD_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 0,
        shader_location: 1,
    }],
};

/// Key settings as laid out in the shader's uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KeyUniforms {
    pub hue_target: f32,
    pub hue_range: f32,
    pub sat_min: f32,
    pub val_min: f32,
    pub val_max: f32,
    pub smoothness: f32,
    pub spill_suppression: f32,
    pub _pad: f32,
}

impl From<&KeySettings> for KeyUniforms {
    fn from(s: &KeySettings) -> Self {
        Self {
            hue_target: s.hue_target,
            hue_range: s.hue_range,
            sat_min: s.sat_min,
            val_min: s.val_min,
            val_max: s.val_max,
            smoothness: s.smoothness,
            spill_suppression: s.spill_suppression,
            _pad: 0.0,
        }
    }
}

/// Offscreen keying pipeline sized for one frame stream.
///
/// Holds the quad buffers, the input texture, one render target shared by the
/// mask and composite passes, and a staging buffer per output. Every frame is
/// rendered twice in a single submission and both results are read back before
/// `classify` returns.
pub struct GpuPipelineContext {
    gpu: Arc<GpuDevice>,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    readback_timeout: Duration,

    position_buffer: wgpu::Buffer,
    texcoord_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    frame_texture: wgpu::Texture,
    target_texture: wgpu::Texture,
    target_view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    mask_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    mask_staging: wgpu::Buffer,
    composite_staging: wgpu::Buffer,

    uploaded_settings: Option<KeySettings>,
    released: bool,
}

impl GpuPipelineContext {
    /// Build the pipelines and buffers for `width` x `height` frames.
    ///
    /// Any shader, pipeline or allocation failure is reported as
    /// [`GpuError::ResourceCreation`].
    pub fn create(
        gpu: Arc<GpuDevice>,
        width: u32,
        height: u32,
        readback_timeout: Duration,
    ) -> Result<Self> {
        if width == 0
            || height == 0
            || width > gpu.max_texture_dim
            || height > gpu.max_texture_dim
        {
            return Err(GpuError::ResourceCreation {
                resource: "render target".to_string(),
                reason: format!(
                    "{}x{} is outside the supported range 1..={}",
                    width, height, gpu.max_texture_dim
                ),
            }
            .into());
        }

        let device = &gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Keying Shader"),
            source: wgpu::ShaderSource::Wgsl(KEYING_SHADER.into()),
        });

        let position_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Positions"),
            contents: bytemuck::cast_slice(&QUAD_POSITIONS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let texcoord_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Texcoords"),
            contents: bytemuck::cast_slice(&QUAD_TEXCOORDS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Key Uniforms"),
            contents: bytemuck::bytes_of(&KeyUniforms::from(&KeySettings::default())),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let frame_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Input Frame"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let target_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Key Target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let frame_view = frame_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = target_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Keying Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Keying Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&frame_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Keying Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mask_pipeline =
            Self::create_render_pipeline(device, &pipeline_layout, &shader, "fs_mask");
        let composite_pipeline =
            Self::create_render_pipeline(device, &pipeline_layout, &shader, "fs_composite");

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let staging_size = padded_bytes_per_row as u64 * height as u64;
        let staging = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: staging_size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        };
        let mask_staging = staging("Mask Staging");
        let composite_staging = staging("Composite Staging");

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            return Err(GpuError::ResourceCreation {
                resource: "keying pipeline".to_string(),
                reason: error.to_string(),
            }
            .into());
        }

        debug!(
            "GPU keying context ready: {}x{} (row pitch {} bytes)",
            width, height, padded_bytes_per_row
        );

        Ok(Self {
            gpu,
            width,
            height,
            padded_bytes_per_row,
            readback_timeout,
            position_buffer,
            texcoord_buffer,
            uniform_buffer,
            frame_texture,
            target_texture,
            target_view,
            bind_group,
            mask_pipeline,
            composite_pipeline,
            mask_staging,
            composite_staging,
            uploaded_settings: None,
            released: false,
        })
    }

    fn create_render_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        fragment_entry: &str,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(fragment_entry),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[POSITION_LAYOUT, TEXCOORD_LAYOUT],
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some(fragment_entry),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Key one frame on the GPU and read back both outputs.
    ///
    /// Inputs of a different size are stretched to the context size first.
    pub fn classify(&mut self, frame: &Frame, settings: &KeySettings) -> Result<ClassifiedFrame> {
        if frame.dimensions() != (self.width, self.height) {
            debug!(
                "Stretching {}x{} frame to {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let fitted = frame.fit_to(self.width, self.height);

        if self.uploaded_settings.as_ref() != Some(settings) {
            self.gpu.queue.write_buffer(
                &self.uniform_buffer,
                0,
                bytemuck::bytes_of(&KeyUniforms::from(settings)),
            );
            self.uploaded_settings = Some(*settings);
        }

        let extent = wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        };
        self.gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.frame_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            fitted.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.width),
                rows_per_image: Some(self.height),
            },
            extent,
        );

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Keying Encoder"),
            });
        self.encode_pass(&mut encoder, &self.mask_pipeline, &self.mask_staging, extent);
        self.encode_pass(&mut encoder, &self.composite_pipeline, &self.composite_staging, extent);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let (mask, composite) = self.read_back()?;
        Ok(ClassifiedFrame {
            mask: Frame::from_rgba_bytes(self.width, self.height, mask)?,
            composite: Frame::from_rgba_bytes(self.width, self.height, composite)?,
        })
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        staging: &wgpu::Buffer,
        extent: wgpu::Extent3d,
    ) {
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Keying Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, self.position_buffer.slice(..));
            pass.set_vertex_buffer(1, self.texcoord_buffer.slice(..));
            pass.draw(0..QUAD_POSITIONS.len() as u32, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            extent,
        );
    }

    /// Map both staging buffers and unpack them top-down
    fn read_back(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (tx, rx) = mpsc::channel();
        let stagings = [&self.mask_staging, &self.composite_staging];
        for (index, staging) in stagings.into_iter().enumerate() {
            let tx = tx.clone();
            staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.readback_timeout;
        let mut pending = 2;
        while pending > 0 {
            self.gpu.device.poll(wgpu::Maintain::Poll);
            match rx.recv_timeout(Duration::from_millis(1)) {
                Ok((_, Ok(()))) => pending -= 1,
                Ok((index, Err(e))) => {
                    return Err(GpuError::Readback {
                        reason: format!("mapping staging buffer {} failed: {}", index, e),
                    }
                    .into());
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(GpuError::Readback {
                            reason: format!(
                                "no result within {} ms",
                                self.readback_timeout.as_millis()
                            ),
                        }
                        .into());
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(GpuError::Readback {
                        reason: "map callback dropped".to_string(),
                    }
                    .into());
                }
            }
        }

        let tight = 4 * self.width as usize;
        let unpack = |staging: &wgpu::Buffer| {
            let bytes = {
                let data = staging.slice(..).get_mapped_range();
                unpack_rows_flipped(
                    &data,
                    self.padded_bytes_per_row as usize,
                    tight,
                    self.height as usize,
                )
            };
            staging.unmap();
            bytes
        };

        Ok((unpack(&self.mask_staging), unpack(&self.composite_staging)))
    }

    /// Release every GPU resource. The context cannot be used afterwards.
    pub fn destroy(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.mask_staging.destroy();
        self.composite_staging.destroy();
        self.uniform_buffer.destroy();
        self.position_buffer.destroy();
        self.texcoord_buffer.destroy();
        self.frame_texture.destroy();
        self.target_texture.destroy();
        self.released = true;
        debug!("GPU keying context released ({}x{})", self.width, self.height);
    }
}

impl Drop for GpuPipelineContext {
    fn drop(&mut self) {
        if !self.released {
            warn!("GPU keying context dropped without destroy(), releasing now");
            self.release();
        }
    }
}

impl FrameClassifier for GpuPipelineContext {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn classify(&mut self, frame: &Frame, settings: &KeySettings) -> Result<ClassifiedFrame> {
        GpuPipelineContext::classify(self, frame, settings)
    }

    fn destroy(self: Box<Self>) {
        GpuPipelineContext::destroy(*self)
    }
}

/// Row pitch for texture-to-buffer copies
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strip row padding and reverse row order (bottom-up render to top-down image)
pub fn unpack_rows_flipped(data: &[u8], padded: usize, tight: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(tight * height);
    for row in (0..height).rev() {
        let start = row * padded;
        out.extend_from_slice(&data[start..start + tight]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_device() -> Option<Arc<GpuDevice>> {
        match GpuDevice::new_blocking() {
            Ok(device) => Some(Arc::new(device)),
            Err(e) => {
                eprintln!("skipping GPU test: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<KeyUniforms>(), 32);
        let uniforms = KeyUniforms::from(&KeySettings::blue_screen());
        assert_eq!(uniforms.hue_target, 240.0);
        assert_eq!(uniforms._pad, 0.0);
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1920), 7680);
    }

    #[test]
    fn test_unpack_rows_flipped() {
        // Two rows of one pixel each with four bytes of padding
        let data = [1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 0, 0, 0, 0];
        assert_eq!(unpack_rows_flipped(&data, 8, 4, 2), vec![2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn test_gpu_matches_cpu_reference() {
        let Some(device) = try_device() else { return };
        let settings = KeySettings::green_screen();

        let mut frame = Frame::new_filled(8, 4, [0, 255, 0, 255]);
        frame.set_pixel(0, 0, [200, 30, 40, 255]);
        frame.set_pixel(7, 3, [30, 60, 220, 255]);

        let mut context =
            GpuPipelineContext::create(device, 8, 4, Duration::from_secs(5)).unwrap();
        let gpu = context.classify(&frame, &settings).unwrap();
        context.destroy();

        // Orientation survives the round trip
        assert_eq!(gpu.mask.get_pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(gpu.mask.get_pixel(7, 3), [255, 255, 255, 255]);
        assert_eq!(gpu.mask.get_pixel(3, 2), [0, 0, 0, 255]);
        assert_eq!(gpu.composite.get_pixel(3, 2), [0, 0, 0, 255]);

        let mut cpu = crate::keying::CpuClassifier::new(8, 4, 1).unwrap();
        let reference = cpu.classify(&frame, &settings).unwrap();
        for (g, c) in gpu.composite.as_raw().iter().zip(reference.composite.as_raw()) {
            assert!((*g as i16 - *c as i16).abs() <= 1);
        }
    }

    #[test]
    fn test_gpu_rejects_zero_size() {
        let Some(device) = try_device() else { return };
        let err = GpuPipelineContext::create(device, 0, 16, Duration::from_secs(1)).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceCreation);
    }
}
