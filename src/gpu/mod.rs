//! wgpu backend for the simulation.
//!
//! `WgpuDevice` implements [`GpuDevice`] on top of one wgpu device and queue.
//! A submitted `CommandStream` is replayed into a single compute pass; image
//! transitions and buffer barriers are skipped because wgpu derives the same
//! synchronization from each dispatch's bindings.

pub mod present;

use crate::command::{Command, CommandStream};
use crate::device::{
    BufferHandle, BufferKind, DeviceError, GpuDevice, ImageHandle, LayoutHandle, MaterialHandle,
    PipelineHandle, ResolvedBinding, UniformBinding,
};
use crate::field::{AddressMode, Extent, FieldDesc, FieldFormat, FieldUsage, FilterMode};
use crate::registry::{ResourceIndex, ResourceRegistry};
use crate::stage::{BindingShape, ShaderError, StagePushConstants, TextureSampleKind};
use std::num::NonZeroU64;
use tokio::sync::oneshot;

pub const REQUIRED_FEATURES: wgpu::Features =
    wgpu::Features::PUSH_CONSTANTS.union(wgpu::Features::FLOAT32_FILTERABLE);

const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<StagePushConstants>() as u32;

/// Adapter, device and queue shared by the simulation and the presentation pass.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub async fn new() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DeviceError::NoAdapter)?;

        let missing = REQUIRED_FEATURES - adapter.features();
        if !missing.is_empty() {
            return Err(DeviceError::MissingFeatures(format!("{missing:?}")));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Fluid Canvas Device"),
                    required_features: REQUIRED_FEATURES,
                    required_limits: wgpu::Limits {
                        max_push_constant_size: PUSH_CONSTANT_SIZE,
                        ..wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits())
                    },
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::RequestDevice(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("Using {} ({:?})", info.name, info.backend);

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }
}

struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: Option<wgpu::Sampler>,
    format: FieldFormat,
    extent: Extent,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

struct GpuLayout {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

pub struct WgpuDevice {
    context: GpuContext,
    images: ResourceRegistry<GpuImage>,
    buffers: ResourceRegistry<GpuBuffer>,
    layouts: ResourceRegistry<GpuLayout>,
    pipelines: ResourceRegistry<wgpu::ComputePipeline>,
    materials: ResourceRegistry<wgpu::BindGroup>,
}

pub fn texture_format(format: FieldFormat) -> wgpu::TextureFormat {
    match format {
        FieldFormat::R32Float => wgpu::TextureFormat::R32Float,
        FieldFormat::R32Sint => wgpu::TextureFormat::R32Sint,
        FieldFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        FieldFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

fn texture_usages(usage: FieldUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if usage.intersects(FieldUsage::SAMPLED | FieldUsage::STORAGE_READ) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(FieldUsage::STORAGE_WRITE) {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(FieldUsage::TRANSFER_SRC) {
        usages |= wgpu::TextureUsages::COPY_SRC;
    }
    usages
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn binding_type(shape: BindingShape) -> wgpu::BindingType {
    match shape {
        BindingShape::Texture(kind) => wgpu::BindingType::Texture {
            sample_type: match kind {
                TextureSampleKind::Float { filterable } => {
                    wgpu::TextureSampleType::Float { filterable }
                }
                TextureSampleKind::Sint => wgpu::TextureSampleType::Sint,
            },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingShape::Sampler { filtering } => wgpu::BindingType::Sampler(if filtering {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        }),
        BindingShape::StorageImage(format) => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: texture_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        BindingShape::StorageBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    }
}

/// Bytes per row of a texture copy, padded to wgpu's copy alignment.
pub fn padded_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    (width * bytes_per_texel).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

impl WgpuDevice {
    pub fn new(context: GpuContext) -> Self {
        Self {
            context,
            images: ResourceRegistry::new(),
            buffers: ResourceRegistry::new(),
            layouts: ResourceRegistry::new(),
            pipelines: ResourceRegistry::new(),
            materials: ResourceRegistry::new(),
        }
    }

    pub async fn create() -> Result<Self, DeviceError> {
        Ok(Self::new(GpuContext::new().await?))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    pub fn texture_view(&self, image: ImageHandle) -> Option<&wgpu::TextureView> {
        self.images.get(ResourceIndex(image.0)).map(|i| &i.view)
    }

    pub fn sampler(&self, image: ImageHandle) -> Option<&wgpu::Sampler> {
        self.images
            .get(ResourceIndex(image.0))
            .and_then(|i| i.sampler.as_ref())
    }

    pub fn raw_buffer(&self, buffer: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(ResourceIndex(buffer.0)).map(|b| &b.buffer)
    }

    pub fn with_validation<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(device);
        let error = pollster::block_on(device.pop_error_scope());
        (value, error)
    }

    /// Copies `image` into host memory, tightly packed row by row.
    pub async fn read_image(&self, image: ImageHandle) -> Result<Vec<u8>, DeviceError> {
        let entry = self
            .images
            .get(ResourceIndex(image.0))
            .ok_or(DeviceError::InvalidHandle {
                kind: "image",
                id: image.0,
            })?;
        self.read_texture(&entry.texture, entry.extent, entry.format.bytes_per_texel())
            .await
    }

    /// Copies any 2D texture with `COPY_SRC` usage into host memory, dropping row padding.
    pub async fn read_texture(
        &self,
        texture: &wgpu::Texture,
        extent: Extent,
        bytes_per_texel: u32,
    ) -> Result<Vec<u8>, DeviceError> {
        let Extent { width, height } = extent;
        let unpadded = width * bytes_per_texel;
        let padded = padded_bytes_per_row(width, bytes_per_texel);

        let read_buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Read Buffer"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Read Texture Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &read_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let data = self.map_read(&read_buffer).await?;
        let mut packed = Vec::with_capacity((unpadded * height) as usize);
        for row in data.chunks_exact(padded as usize) {
            packed.extend_from_slice(&row[..unpadded as usize]);
        }
        Ok(packed)
    }

    /// `read_image` reinterpreted as 32-bit floats.
    pub async fn read_image_f32(&self, image: ImageHandle) -> Result<Vec<f32>, DeviceError> {
        let bytes = self.read_image(image).await?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub async fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        let source = self
            .buffers
            .get(ResourceIndex(buffer.0))
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        if offset + size > source.size {
            return Err(DeviceError::Readback(format!(
                "range {offset}..{} outside buffer of {} bytes",
                offset + size,
                source.size
            )));
        }

        let read_buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Buffer Read Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Read Buffer Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, offset, &read_buffer, 0, size);
        self.context.queue.submit(std::iter::once(encoder.finish()));

        self.map_read(&read_buffer).await
    }

    async fn map_read(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, DeviceError> {
        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.context.device.poll(wgpu::Maintain::Wait);

        receiver
            .await
            .map_err(|e| DeviceError::Readback(e.to_string()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

impl GpuDevice for WgpuDevice {
    fn supports_field(&self, desc: &FieldDesc) -> bool {
        let features = self
            .context
            .adapter
            .get_texture_format_features(texture_format(desc.format));
        let usages = texture_usages(desc.usage);
        let filterable = !desc.usage.contains(FieldUsage::SAMPLED)
            || !desc.sampler.is_some_and(|s| s.filter == FilterMode::Linear)
            || features
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE);
        features.allowed_usages.contains(usages) && filterable
    }

    fn uniform_alignment(&self) -> u64 {
        self.context.device.limits().min_uniform_buffer_offset_alignment as u64
    }

    fn create_image(
        &mut self,
        label: &str,
        desc: &FieldDesc,
        extent: Extent,
    ) -> Result<ImageHandle, DeviceError> {
        if !self.supports_field(desc) {
            return Err(DeviceError::UnsupportedField {
                label: label.to_string(),
                format: desc.format,
                usage: desc.usage,
            });
        }
        let device = &self.context.device;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: extent.width.max(1),
                height: extent.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: texture_usages(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = desc.sampler.map(|s| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode(s.address_mode),
                address_mode_v: address_mode(s.address_mode),
                address_mode_w: address_mode(s.address_mode),
                mag_filter: filter_mode(s.filter),
                min_filter: filter_mode(s.filter),
                ..Default::default()
            })
        });

        let index = self.images.register(GpuImage {
            texture,
            view,
            sampler,
            format: desc.format,
            extent,
        });
        Ok(ImageHandle(index.0))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if let Some(entry) = self.images.unregister(ResourceIndex(image.0)) {
            entry.texture.destroy();
        }
    }

    fn create_buffer(
        &mut self,
        label: &str,
        size: u64,
        kind: BufferKind,
    ) -> Result<BufferHandle, DeviceError> {
        let usage = match kind {
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferKind::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        };
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        let index = self.buffers.register(GpuBuffer { buffer, size });
        Ok(BufferHandle(index.0))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.unregister(ResourceIndex(buffer.0)) {
            entry.buffer.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get(ResourceIndex(buffer.0)) {
            Some(entry) => self.context.queue.write_buffer(&entry.buffer, offset, data),
            None => log::warn!("write to stale buffer {}", buffer.0),
        }
    }

    fn create_stage_layout(
        &mut self,
        label: &str,
        shapes: &[BindingShape],
    ) -> Result<LayoutHandle, DeviceError> {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(std::mem::size_of::<
                    crate::uniforms::SimulationUniforms,
                >() as u64),
            },
            count: None,
        }];
        entries.extend(shapes.iter().enumerate().map(|(i, &shape)| {
            wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: binding_type(shape),
                count: None,
            }
        }));

        let ((bind_group_layout, pipeline_layout), error) = self.with_validation(|device| {
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &entries,
                });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::COMPUTE,
                    range: 0..PUSH_CONSTANT_SIZE,
                }],
            });
            (bind_group_layout, pipeline_layout)
        });
        if let Some(error) = error {
            return Err(DeviceError::Validation(error.to_string()));
        }

        let index = self.layouts.register(GpuLayout {
            bind_group_layout,
            pipeline_layout,
        });
        Ok(LayoutHandle(index.0))
    }

    fn compile_pipeline(
        &mut self,
        layout: LayoutHandle,
        label: &str,
        source: &str,
    ) -> Result<PipelineHandle, ShaderError> {
        let Some(entry) = self.layouts.get(ResourceIndex(layout.0)) else {
            return Err(ShaderError::Compile {
                stage: label.to_string(),
                message: format!("stale layout handle {}", layout.0),
            });
        };

        let (pipeline, error) = self.with_validation(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&entry.pipeline_layout),
                module: &module,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        });
        if let Some(error) = error {
            return Err(ShaderError::Compile {
                stage: label.to_string(),
                message: error.to_string(),
            });
        }

        let index = self.pipelines.register(pipeline);
        Ok(PipelineHandle(index.0))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.unregister(ResourceIndex(pipeline.0));
    }

    fn create_material(
        &mut self,
        layout: LayoutHandle,
        label: &str,
        uniforms: UniformBinding,
        bindings: &[ResolvedBinding],
    ) -> Result<MaterialHandle, DeviceError> {
        let layout_entry =
            self.layouts
                .get(ResourceIndex(layout.0))
                .ok_or(DeviceError::InvalidHandle {
                    kind: "layout",
                    id: layout.0,
                })?;
        let uniform_buffer = self
            .raw_buffer(uniforms.buffer)
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                id: uniforms.buffer.0,
            })?;

        let mut resources = Vec::with_capacity(bindings.len() + 1);
        resources.push(wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: uniform_buffer,
            offset: 0,
            size: NonZeroU64::new(uniforms.size),
        }));
        for binding in bindings {
            let resource = match *binding {
                ResolvedBinding::Texture(image) | ResolvedBinding::StorageImage(image) => self
                    .texture_view(image)
                    .map(wgpu::BindingResource::TextureView)
                    .ok_or(DeviceError::InvalidHandle {
                        kind: "image",
                        id: image.0,
                    })?,
                ResolvedBinding::Sampler(image) => self
                    .sampler(image)
                    .map(wgpu::BindingResource::Sampler)
                    .ok_or(DeviceError::InvalidHandle {
                        kind: "sampler",
                        id: image.0,
                    })?,
                ResolvedBinding::StorageBuffer(buffer) => self
                    .raw_buffer(buffer)
                    .map(|b| b.as_entire_binding())
                    .ok_or(DeviceError::InvalidHandle {
                        kind: "buffer",
                        id: buffer.0,
                    })?,
            };
            resources.push(resource);
        }

        let entries: Vec<wgpu::BindGroupEntry> = resources
            .into_iter()
            .enumerate()
            .map(|(i, resource)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource,
            })
            .collect();

        let (bind_group, error) = self.with_validation(|device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layout_entry.bind_group_layout,
                entries: &entries,
            })
        });
        if let Some(error) = error {
            return Err(DeviceError::Validation(error.to_string()));
        }
        drop(entries);

        let index = self.materials.register(bind_group);
        Ok(MaterialHandle(index.0))
    }

    fn destroy_material(&mut self, material: MaterialHandle) {
        self.materials.unregister(ResourceIndex(material.0));
    }

    fn submit(&mut self, stream: &mut CommandStream) {
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Simulation Encoder"),
                });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulation Pass"),
                timestamp_writes: None,
            });
            let mut bound = true;

            for command in stream.commands() {
                match command {
                    Command::BindPipeline(pipeline) => {
                        match self.pipelines.get(ResourceIndex(pipeline.0)) {
                            Some(p) => {
                                compute_pass.set_pipeline(p);
                                bound = true;
                            }
                            None => {
                                log::warn!("skipping stale pipeline {}", pipeline.0);
                                bound = false;
                            }
                        }
                    }
                    Command::BindMaterial {
                        material,
                        uniform_offset,
                        ..
                    } => match self.materials.get(ResourceIndex(material.0)) {
                        Some(bind_group) => {
                            compute_pass.set_bind_group(0, bind_group, &[*uniform_offset])
                        }
                        None => {
                            log::warn!("skipping stale material {}", material.0);
                            bound = false;
                        }
                    },
                    Command::PushConstants(push) => {
                        compute_pass.set_push_constants(0, bytemuck::bytes_of(push));
                    }
                    Command::Dispatch { groups } => {
                        if bound {
                            compute_pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
                        }
                    }
                    Command::TransitionImage { .. } | Command::BufferBarrier { .. } => {}
                }
            }
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        stream.clear();
    }
}
