//! Compute stages: one shader program, its binding layout, and the materials
//! (concrete Field sets) it can be dispatched against.

use crate::command::{Command, CommandStream, ResourceAccess};
use crate::config::SimulationConfig;
use crate::device::{
    GpuDevice, LayoutHandle, MaterialHandle, PipelineHandle, ResolvedBinding, UniformBinding,
};
use crate::field::{FieldFormat, FieldId, FieldSet, FilterMode};
use crate::simulation::SimulationError;
use bytemuck::{Pod, Zeroable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const PRELUDE: &str = include_str!("../shaders/prelude.wgsl");

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Shader compilation failed for {stage}:\n{message}")]
    Compile { stage: String, message: String },
    #[error("Failed to read shader {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Push constants shared by every compute stage.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct StagePushConstants {
    /// Heap buffer index of this frame's uniform slot.
    pub sim_uniforms: u32,
    pub params0: u32,
    pub params1: u32,
    pub params2: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    AutoExposure,
    Fractal,
    AdvectVelocity,
    Divergence,
    Pressure,
    UpdateVelocity,
    AdvectColor,
    CopyColor,
}

impl StageKind {
    pub const ALL: [StageKind; 8] = [
        StageKind::AutoExposure,
        StageKind::Fractal,
        StageKind::AdvectVelocity,
        StageKind::Divergence,
        StageKind::Pressure,
        StageKind::UpdateVelocity,
        StageKind::AdvectColor,
        StageKind::CopyColor,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StageKind::AutoExposure => "Auto Exposure",
            StageKind::Fractal => "Mandelbrot",
            StageKind::AdvectVelocity => "Advect Velocity",
            StageKind::Divergence => "Calculate Divergence",
            StageKind::Pressure => "Calculate Pressure",
            StageKind::UpdateVelocity => "Update Velocity",
            StageKind::AdvectColor => "Advect Color",
            StageKind::CopyColor => "Copy Colors",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            StageKind::AutoExposure => "auto_exposure.wgsl",
            StageKind::Fractal => "mandelbrot.wgsl",
            StageKind::AdvectVelocity => "advect_velocity.wgsl",
            StageKind::Divergence => "calculate_divergence.wgsl",
            StageKind::Pressure => "calculate_pressure.wgsl",
            StageKind::UpdateVelocity => "update_velocity.wgsl",
            StageKind::AdvectColor => "advect_color.wgsl",
            StageKind::CopyColor => "copy_colors.wgsl",
        }
    }

    pub fn builtin_source(self) -> &'static str {
        match self {
            StageKind::AutoExposure => include_str!("../shaders/auto_exposure.wgsl"),
            StageKind::Fractal => include_str!("../shaders/mandelbrot.wgsl"),
            StageKind::AdvectVelocity => include_str!("../shaders/advect_velocity.wgsl"),
            StageKind::Divergence => include_str!("../shaders/calculate_divergence.wgsl"),
            StageKind::Pressure => include_str!("../shaders/calculate_pressure.wgsl"),
            StageKind::UpdateVelocity => include_str!("../shaders/update_velocity.wgsl"),
            StageKind::AdvectColor => include_str!("../shaders/advect_color.wgsl"),
            StageKind::CopyColor => include_str!("../shaders/copy_colors.wgsl"),
        }
    }
}

/// WGSL prepended to every stage: uniform block, push constants and config constants.
pub fn shader_prelude(config: &SimulationConfig) -> String {
    format!(
        "const WORKGROUP_SIZE: u32 = {}u;\nconst EXPOSURE_GROUP_WIDTH: u32 = {}u;\n{}",
        config.workgroup_size, config.exposure_reduction_factor, PRELUDE
    )
}

/// One resource slot of a material, after the uniform block at binding 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Filtered read; pair with a `Sampler` of the same Field.
    Texture(FieldId),
    Sampler(FieldId),
    Load(FieldId),
    Store(FieldId),
    ExposureBuffer,
}

impl Binding {
    pub fn field(self) -> Option<FieldId> {
        match self {
            Binding::Texture(id) | Binding::Sampler(id) | Binding::Load(id) | Binding::Store(id) => {
                Some(id)
            }
            Binding::ExposureBuffer => None,
        }
    }

    pub fn shape(self) -> BindingShape {
        match self {
            Binding::Texture(id) => BindingShape::Texture(TextureSampleKind::for_format(
                id.desc().format,
                true,
            )),
            Binding::Load(id) => {
                BindingShape::Texture(TextureSampleKind::for_format(id.desc().format, false))
            }
            Binding::Sampler(id) => BindingShape::Sampler {
                filtering: id
                    .desc()
                    .sampler
                    .is_some_and(|s| s.filter == FilterMode::Linear),
            },
            Binding::Store(id) => BindingShape::StorageImage(id.desc().format),
            Binding::ExposureBuffer => BindingShape::StorageBuffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSampleKind {
    Float { filterable: bool },
    Sint,
}

impl TextureSampleKind {
    fn for_format(format: FieldFormat, filterable: bool) -> Self {
        if format.is_float() {
            TextureSampleKind::Float { filterable }
        } else {
            TextureSampleKind::Sint
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingShape {
    Texture(TextureSampleKind),
    Sampler { filtering: bool },
    /// Write-only storage image.
    StorageImage(FieldFormat),
    StorageBuffer,
}

/// Where a stage's WGSL comes from, and what was last handed to the compiler.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    kind: StageKind,
    path: Option<PathBuf>,
    prelude: String,
    last_attempted: String,
}

impl ShaderSource {
    /// Uses `<shader_dir>/<file>` when it exists, the embedded copy otherwise.
    pub fn new(kind: StageKind, shader_dir: Option<&Path>, prelude: String) -> Self {
        let path = shader_dir
            .map(|dir| dir.join(kind.file_name()))
            .filter(|p| p.is_file());
        let body = path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .unwrap_or_else(|| kind.builtin_source().to_string());
        Self {
            kind,
            path,
            prelude,
            last_attempted: body,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn full_source(&self) -> String {
        self.compose(&self.last_attempted)
    }

    fn compose(&self, body: &str) -> String {
        format!("{}\n{}", self.prelude, body)
    }

    /// The on-disk body if it differs from the last one compiled or attempted.
    fn read_if_stale(&self) -> Result<Option<String>, ShaderError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let body = std::fs::read_to_string(path).map_err(|source| ShaderError::Io {
            path: path.clone(),
            source,
        })?;
        Ok((body != self.last_attempted).then_some(body))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.read_if_stale(), Ok(Some(_)))
    }
}

/// A concrete binding set for one stage, plus what it touches for hazard checks.
#[derive(Debug, Clone)]
pub struct Material {
    pub handle: MaterialHandle,
    pub bindings: Vec<Binding>,
    pub access: Arc<[ResourceAccess]>,
}

#[derive(Debug)]
pub struct ComputeStage {
    kind: StageKind,
    shader: ShaderSource,
    layout: LayoutHandle,
    shapes: Vec<BindingShape>,
    pipeline: PipelineHandle,
    materials: Vec<Material>,
}

impl ComputeStage {
    /// Builds the stage layout from `bindings` and compiles the shader.
    /// Compile errors here are fatal.
    pub fn new<D: GpuDevice>(
        device: &mut D,
        kind: StageKind,
        shader: ShaderSource,
        bindings: &[Binding],
    ) -> Result<Self, SimulationError> {
        let shapes: Vec<BindingShape> = bindings.iter().map(|b| b.shape()).collect();
        let layout = device.create_stage_layout(kind.label(), &shapes)?;
        let pipeline = device.compile_pipeline(layout, kind.label(), &shader.full_source())?;
        log::debug!("Compiled stage {} ({} bindings)", kind.label(), shapes.len());
        Ok(Self {
            kind,
            shader,
            layout,
            shapes,
            pipeline,
            materials: Vec::new(),
        })
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn shader(&self) -> &ShaderSource {
        &self.shader
    }

    /// Replaces every material with one per entry of `sets`, resolved against `fields`.
    ///
    /// A material that reads and writes the same Field is rejected, as is one
    /// whose shape differs from the stage layout.
    pub fn bind_materials<D: GpuDevice>(
        &mut self,
        device: &mut D,
        fields: &FieldSet,
        uniforms: UniformBinding,
        sets: &[Vec<Binding>],
    ) -> Result<(), SimulationError> {
        self.release_materials(device);

        for (index, bindings) in sets.iter().enumerate() {
            check_aliasing(self.kind, bindings)?;
            let shapes: Vec<BindingShape> = bindings.iter().map(|b| b.shape()).collect();
            if shapes != self.shapes {
                return Err(SimulationError::LayoutMismatch {
                    stage: self.kind.label(),
                    material: index,
                });
            }

            let mut resolved = Vec::with_capacity(bindings.len());
            let mut access = Vec::new();
            for binding in bindings {
                match *binding {
                    Binding::Texture(id) => {
                        resolved.push(ResolvedBinding::Texture(fields.image(id)));
                        access.push(ResourceAccess::Sample(fields.image(id)));
                    }
                    Binding::Sampler(id) => resolved.push(ResolvedBinding::Sampler(fields.image(id))),
                    Binding::Load(id) => {
                        resolved.push(ResolvedBinding::Texture(fields.image(id)));
                        access.push(ResourceAccess::Load(fields.image(id)));
                    }
                    Binding::Store(id) => {
                        resolved.push(ResolvedBinding::StorageImage(fields.image(id)));
                        access.push(ResourceAccess::Store(fields.image(id)));
                    }
                    Binding::ExposureBuffer => {
                        let exposure = fields.exposure().ok_or(SimulationError::FieldsReleased)?;
                        resolved.push(ResolvedBinding::StorageBuffer(exposure.buffer));
                        access.push(ResourceAccess::Buffer(exposure.buffer));
                    }
                }
            }

            let label = format!("{} Material {}", self.kind.label(), index);
            let handle = device.create_material(self.layout, &label, uniforms, &resolved)?;
            self.materials.push(Material {
                handle,
                bindings: bindings.clone(),
                access: access.into(),
            });
        }
        Ok(())
    }

    /// Records one dispatch of this stage against `material`.
    pub fn dispatch(
        &self,
        stream: &mut CommandStream,
        material: usize,
        push: StagePushConstants,
        uniform_offset: u32,
        groups: [u32; 3],
    ) {
        let material = &self.materials[material];
        stream.push(Command::BindPipeline(self.pipeline));
        stream.push(Command::BindMaterial {
            material: material.handle,
            uniform_offset,
            access: material.access.clone(),
        });
        stream.push(Command::PushConstants(push));
        stream.push(Command::Dispatch { groups });
    }

    /// Recompiles if the source on disk changed since the last attempt.
    ///
    /// Returns `Ok(true)` when a new pipeline went live. On a compile error the
    /// previous pipeline stays bound and the error is returned.
    pub fn try_recompile<D: GpuDevice>(&mut self, device: &mut D) -> Result<bool, ShaderError> {
        let Some(body) = self.shader.read_if_stale()? else {
            return Ok(false);
        };
        let source = self.shader.compose(&body);
        self.shader.last_attempted = body;
        let pipeline = device.compile_pipeline(self.layout, self.kind.label(), &source)?;
        device.destroy_pipeline(self.pipeline);
        self.pipeline = pipeline;
        log::info!("Recompiled {}", self.kind.label());
        Ok(true)
    }

    pub fn release_materials<D: GpuDevice>(&mut self, device: &mut D) {
        for material in self.materials.drain(..) {
            device.destroy_material(material.handle);
        }
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        self.release_materials(device);
        device.destroy_pipeline(self.pipeline);
    }
}

fn check_aliasing(kind: StageKind, bindings: &[Binding]) -> Result<(), SimulationError> {
    for binding in bindings {
        let Binding::Store(written) = *binding else {
            continue;
        };
        let read = bindings.iter().any(|b| {
            matches!(*b, Binding::Texture(id) | Binding::Load(id) if id == written)
        });
        if read {
            return Err(SimulationError::AliasedField {
                stage: kind.label(),
                field: written,
            });
        }
    }
    Ok(())
}
