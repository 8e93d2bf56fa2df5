//! Presentation pass: one fullscreen triangle that tone-maps the color field.
//!
//! Everything it reads is resolved from heap indices handed out by the
//! simulation; it never holds a Field handle of its own.

use super::WgpuDevice;
use crate::device::DeviceError;
use crate::field::Extent;
use crate::registry::{GlobalHeap, ResourceIndex};
use crate::simulation::PresentationHandles;
use crate::stage::{ShaderError, StagePushConstants};
use crate::uniforms::SimulationUniforms;
use std::num::NonZeroU64;

const PRESENT_SHADER: &str = include_str!("../../shaders/fluid_2d.wgsl");

pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct Presenter {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    extent: Extent,
}

impl Presenter {
    /// `prelude` is the same WGSL prelude the compute stages are built with.
    pub fn new(gpu: &WgpuDevice, prelude: &str, extent: Extent) -> Result<Self, ShaderError> {
        let uniform_size = std::mem::size_of::<SimulationUniforms>() as u64;
        let ((pipeline, bind_group_layout), error) = gpu.with_validation(|device| {
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Present Bind Group Layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: true,
                                min_binding_size: NonZeroU64::new(uniform_size),
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 3,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: true },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Present Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::FRAGMENT,
                    range: 0..std::mem::size_of::<StagePushConstants>() as u32,
                }],
            });

            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Fluid 2D"),
                source: wgpu::ShaderSource::Wgsl(format!("{prelude}\n{PRESENT_SHADER}").into()),
            });

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Present Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
            (pipeline, bind_group_layout)
        });
        if let Some(error) = error {
            return Err(ShaderError::Compile {
                stage: "Fluid 2D".to_string(),
                message: error.to_string(),
            });
        }

        let (target, target_view) = create_target(gpu.device(), extent);
        Ok(Self {
            pipeline,
            bind_group_layout,
            target,
            target_view,
            extent,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn resize(&mut self, gpu: &WgpuDevice, extent: Extent) {
        if extent == self.extent {
            return;
        }
        self.target.destroy();
        let (target, target_view) = create_target(gpu.device(), extent);
        self.target = target;
        self.target_view = target_view;
        self.extent = extent;
    }

    /// Draws the fullscreen triangle into the offscreen target.
    pub fn render(
        &self,
        gpu: &WgpuDevice,
        heap: &GlobalHeap,
        handles: &PresentationHandles,
    ) -> Result<(), DeviceError> {
        let stale = |kind: &'static str, id: u32| DeviceError::InvalidHandle { kind, id };

        let color = heap
            .texture(ResourceIndex(handles.color_texture))
            .ok_or_else(|| stale("texture", handles.color_texture))?;
        let color_view = gpu
            .texture_view(color)
            .ok_or_else(|| stale("image", color.0))?;
        let color_sampler = gpu.sampler(color).ok_or_else(|| stale("sampler", color.0))?;
        let uniforms = heap
            .buffer(ResourceIndex(handles.uniform_slot))
            .ok_or_else(|| stale("buffer", handles.uniform_slot))?;
        let uniform_buffer = gpu
            .raw_buffer(uniforms.buffer)
            .ok_or_else(|| stale("buffer", uniforms.buffer.0))?;
        let exposure = heap
            .buffer(ResourceIndex(handles.exposure_buffer))
            .ok_or_else(|| stale("buffer", handles.exposure_buffer))?;
        let exposure_buffer = gpu
            .raw_buffer(exposure.buffer)
            .ok_or_else(|| stale("buffer", exposure.buffer.0))?;

        let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: uniform_buffer,
                        offset: 0,
                        size: NonZeroU64::new(uniforms.size),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(color_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: exposure_buffer.as_entire_binding(),
                },
            ],
        });

        let push = StagePushConstants {
            sim_uniforms: handles.uniform_slot,
            params0: self.extent.width,
            params1: self.extent.height,
            params2: handles.exposure_result_offset,
        };

        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
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
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[handles.uniform_offset]);
            pass.set_push_constants(wgpu::ShaderStages::FRAGMENT, 0, bytemuck::bytes_of(&push));
            pass.draw(0..3, 0..1);
        }
        gpu.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Tone-mapped RGBA8 pixels of the last rendered frame.
    pub async fn read_pixels(&self, gpu: &WgpuDevice) -> Result<Vec<u8>, DeviceError> {
        gpu.read_texture(&self.target, self.extent, 4).await
    }
}

fn create_target(device: &wgpu::Device, extent: Extent) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Present Target"),
        size: wgpu::Extent3d {
            width: extent.width.max(1),
            height: extent.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
