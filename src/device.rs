//! The resource-creation surface the simulation is written against.
//!
//! `GpuDevice` yields opaque handles for images, buffers, stage layouts,
//! pipelines and materials, and consumes recorded command streams. The wgpu
//! implementation lives in [`crate::gpu`]; [`HeadlessDevice`] keeps the same
//! bookkeeping without touching a GPU, which is what the tests, the benches and
//! the `validate` CLI mode run against.

use crate::command::CommandStream;
use crate::field::{Extent, FieldDesc, FieldFormat, FieldUsage};
use crate::registry::{ResourceIndex, ResourceRegistry};
use crate::stage::{BindingShape, ShaderError};
use thiserror::Error;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

handle!(
    /// A 2D image with an optional sampler.
    ImageHandle
);
handle!(BufferHandle);
handle!(
    /// Bind group layout plus pipeline layout shared by every pipeline of one stage.
    LayoutHandle
);
handle!(PipelineHandle);
handle!(
    /// One concrete set of resources bound against a stage layout.
    MaterialHandle
);

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("GPU adapter is missing required features: {0}")]
    MissingFeatures(String),
    #[error("Failed to create GPU device: {0}")]
    RequestDevice(String),
    #[error("{label}: format {format:?} does not support usage {usage:?} on this device")]
    UnsupportedField {
        label: String,
        format: FieldFormat,
        usage: FieldUsage,
    },
    #[error("Stale {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },
    #[error("GPU validation error: {0}")]
    Validation(String),
    #[error("Failed to read back GPU data: {0}")]
    Readback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Read-only to shaders, rewritten from the host every frame.
    Uniform,
    /// Read-write structured buffer, zero-initialized.
    Storage,
}

/// A binding resolved to concrete resources, in layout order after the uniform slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBinding {
    Texture(ImageHandle),
    /// The sampler owned by the image.
    Sampler(ImageHandle),
    StorageImage(ImageHandle),
    StorageBuffer(BufferHandle),
}

/// The per-frame uniform block every stage sees at binding 0, bound with a dynamic offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBinding {
    pub buffer: BufferHandle,
    pub size: u64,
}

pub trait GpuDevice {
    /// Whether images of `desc` can be created with its full usage set.
    fn supports_field(&self, desc: &FieldDesc) -> bool;

    /// Required alignment of dynamic uniform offsets.
    fn uniform_alignment(&self) -> u64;

    fn create_image(
        &mut self,
        label: &str,
        desc: &FieldDesc,
        extent: Extent,
    ) -> Result<ImageHandle, DeviceError>;
    fn destroy_image(&mut self, image: ImageHandle);

    fn create_buffer(
        &mut self,
        label: &str,
        size: u64,
        kind: BufferKind,
    ) -> Result<BufferHandle, DeviceError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_stage_layout(
        &mut self,
        label: &str,
        shapes: &[BindingShape],
    ) -> Result<LayoutHandle, DeviceError>;

    /// Compiles `source` against `layout`. Errors carry the compiler output.
    fn compile_pipeline(
        &mut self,
        layout: LayoutHandle,
        label: &str,
        source: &str,
    ) -> Result<PipelineHandle, ShaderError>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    fn create_material(
        &mut self,
        layout: LayoutHandle,
        label: &str,
        uniforms: UniformBinding,
        bindings: &[ResolvedBinding],
    ) -> Result<MaterialHandle, DeviceError>;
    fn destroy_material(&mut self, material: MaterialHandle);

    /// Executes and drains everything recorded in `stream`.
    fn submit(&mut self, stream: &mut CommandStream);
}

#[derive(Debug, Clone)]
pub struct HeadlessImage {
    pub label: String,
    pub desc: FieldDesc,
    pub extent: Extent,
}

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub label: String,
    pub kind: BufferKind,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HeadlessPipeline {
    pub label: String,
    pub layout: LayoutHandle,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct HeadlessMaterial {
    pub label: String,
    pub layout: LayoutHandle,
    pub uniforms: UniformBinding,
    pub bindings: Vec<ResolvedBinding>,
}

/// A `GpuDevice` that only keeps books.
///
/// Compilation accepts any source declaring a `@compute` entry point; tests can
/// mark format/usage pairs as unsupported to exercise construction failures.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    pub images: ResourceRegistry<HeadlessImage>,
    pub buffers: ResourceRegistry<HeadlessBuffer>,
    pub layouts: ResourceRegistry<Vec<BindingShape>>,
    pub pipelines: ResourceRegistry<HeadlessPipeline>,
    pub materials: ResourceRegistry<HeadlessMaterial>,
    /// Format/usage pairs `supports_field` rejects.
    pub unsupported: Vec<(FieldFormat, FieldUsage)>,
    pub submitted_frames: usize,
    pub submitted_commands: usize,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&self, image: ImageHandle) -> Option<&HeadlessImage> {
        self.images.get(ResourceIndex(image.0))
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<&HeadlessBuffer> {
        self.buffers.get(ResourceIndex(buffer.0))
    }

    pub fn pipeline(&self, pipeline: PipelineHandle) -> Option<&HeadlessPipeline> {
        self.pipelines.get(ResourceIndex(pipeline.0))
    }

    pub fn material(&self, material: MaterialHandle) -> Option<&HeadlessMaterial> {
        self.materials.get(ResourceIndex(material.0))
    }
}

impl GpuDevice for HeadlessDevice {
    fn supports_field(&self, desc: &FieldDesc) -> bool {
        !self
            .unsupported
            .iter()
            .any(|&(format, usage)| format == desc.format && desc.usage.contains(usage))
    }

    fn uniform_alignment(&self) -> u64 {
        256
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
        let index = self.images.register(HeadlessImage {
            label: label.to_string(),
            desc: desc.clone(),
            extent,
        });
        Ok(ImageHandle(index.0))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.images.unregister(ResourceIndex(image.0));
    }

    fn create_buffer(
        &mut self,
        label: &str,
        size: u64,
        kind: BufferKind,
    ) -> Result<BufferHandle, DeviceError> {
        let index = self.buffers.register(HeadlessBuffer {
            label: label.to_string(),
            kind,
            data: vec![0; size as usize],
        });
        Ok(BufferHandle(index.0))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.unregister(ResourceIndex(buffer.0));
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(entry) = self.buffers.get_mut(ResourceIndex(buffer.0)) else {
            log::warn!("write to stale buffer {}", buffer.0);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > entry.data.len() {
            log::warn!("write past end of buffer {}", entry.label);
            return;
        }
        entry.data[start..end].copy_from_slice(data);
    }

    fn create_stage_layout(
        &mut self,
        _label: &str,
        shapes: &[BindingShape],
    ) -> Result<LayoutHandle, DeviceError> {
        Ok(LayoutHandle(self.layouts.register(shapes.to_vec()).0))
    }

    fn compile_pipeline(
        &mut self,
        layout: LayoutHandle,
        label: &str,
        source: &str,
    ) -> Result<PipelineHandle, ShaderError> {
        if !source.contains("@compute") {
            return Err(ShaderError::Compile {
                stage: label.to_string(),
                message: "no @compute entry point".to_string(),
            });
        }
        let index = self.pipelines.register(HeadlessPipeline {
            label: label.to_string(),
            layout,
            source: source.to_string(),
        });
        Ok(PipelineHandle(index.0))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines
            .unregister(ResourceIndex(pipeline.0));
    }

    fn create_material(
        &mut self,
        layout: LayoutHandle,
        label: &str,
        uniforms: UniformBinding,
        bindings: &[ResolvedBinding],
    ) -> Result<MaterialHandle, DeviceError> {
        let Some(shapes) = self.layouts.get(ResourceIndex(layout.0)) else {
            return Err(DeviceError::InvalidHandle {
                kind: "layout",
                id: layout.0,
            });
        };
        if shapes.len() != bindings.len() {
            return Err(DeviceError::Validation(format!(
                "{label}: layout has {} bindings, material supplies {}",
                shapes.len(),
                bindings.len()
            )));
        }
        let index = self.materials.register(HeadlessMaterial {
            label: label.to_string(),
            layout,
            uniforms,
            bindings: bindings.to_vec(),
        });
        Ok(MaterialHandle(index.0))
    }

    fn destroy_material(&mut self, material: MaterialHandle) {
        self.materials
            .unregister(ResourceIndex(material.0));
    }

    fn submit(&mut self, stream: &mut CommandStream) {
        self.submitted_commands += stream.len();
        self.submitted_frames += 1;
        stream.clear();
    }
}
