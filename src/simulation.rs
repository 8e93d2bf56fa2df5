//! The simulation orchestrator.
//!
//! Owns every Field and compute stage, and records one frame of the fixed
//! pipeline per `update`: auto-exposure, fractal (only when the camera moved),
//! velocity advection, divergence, pressure solve, projection, color advection
//! and color copy, followed by the transitions the presentation pass needs.

use crate::command::{Access, CommandStream, HazardError, PipelineStage};
use crate::config::{ConfigError, SimulationConfig};
use crate::controller::{self, ControllerParams, PanZoomState};
use crate::device::{DeviceError, GpuDevice, UniformBinding};
use crate::exposure::reduction_schedule;
use crate::field::{Extent, FieldId, FieldSet, PingPong};
use crate::input::{FrameContext, InputMask};
use crate::registry::GlobalHeap;
use crate::stage::{
    Binding, ComputeStage, ShaderError, ShaderSource, StageKind, StagePushConstants,
    shader_prelude,
};
use crate::uniforms::{FLAG_CLEAR, SimulationUniforms, TransientUniforms};
use glam::Vec2;
use thiserror::Error;

/// Largest workgroup count per dispatch dimension.
const MAX_GROUPS_PER_DIMENSION: u32 = 65535;

/// Fields the presentation pass may sample after every update, one per
/// texture or image in [`PresentationHandles`].
pub const PRESENTED_FIELDS: [FieldId; 6] = [
    FieldId::IterationCounts,
    FieldId::Fractal,
    FieldId::PressureA,
    FieldId::Divergence,
    FieldId::Velocity,
    FieldId::ColorA,
];

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{stage}: {field:?} is both read and written by one material")]
    AliasedField { stage: &'static str, field: FieldId },
    #[error("{stage}: material {material} does not match the stage layout")]
    LayoutMismatch { stage: &'static str, material: usize },
    #[error("Field set has been released")]
    FieldsReleased,
}

/// What the last `update` recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub dispatches: usize,
    pub commands: usize,
    pub fractal_recomputed: bool,
    pub reduction_passes: usize,
    pub pressure_iterations: u32,
    pub dt: f32,
    /// First hazard found in the recorded frame, when barrier validation is on.
    pub hazard: Option<HazardError>,
}

#[derive(Debug, Default)]
pub struct RecompileReport {
    pub recompiled: Vec<StageKind>,
    pub errors: Vec<(StageKind, String)>,
}

impl RecompileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Heap indices the presentation pass reads. Nothing here grants write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationHandles {
    pub color_texture: u32,
    pub fractal_texture: u32,
    pub velocity_texture: u32,
    pub divergence_texture: u32,
    pub pressure_texture: u32,
    pub iteration_counts_image: u32,
    pub exposure_buffer: u32,
    pub exposure_result_offset: u32,
    pub uniform_slot: u32,
    pub uniform_offset: u32,
}

pub struct Simulation {
    config: SimulationConfig,
    controller: ControllerParams,
    fields: FieldSet,
    uniforms: TransientUniforms<SimulationUniforms>,
    /// Indexed by `StageKind as usize`.
    stages: Vec<ComputeStage>,
    camera: PanZoomState,
    last_offset: Vec2,
    last_zoom: f32,
    clear: bool,
    stats: FrameStats,
}

impl Simulation {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        heap: &mut GlobalHeap,
        extent: Extent,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        config.validate()?;

        let fields = FieldSet::create(device, heap, extent, config.exposure_reduction_factor)?;
        let uniforms = TransientUniforms::new(device, heap, "Simulation Uniforms")?;

        let prelude = shader_prelude(&config);
        let mut stages = Vec::with_capacity(StageKind::ALL.len());
        for kind in StageKind::ALL {
            let sets = material_sets(kind, config.pressure_iterations);
            let shader = ShaderSource::new(kind, config.shader_dir.as_deref(), prelude.clone());
            let mut stage = ComputeStage::new(device, kind, shader, &sets[0])?;
            stage.bind_materials(device, &fields, uniforms.binding(), &sets)?;
            stages.push(stage);
        }

        let camera = PanZoomState::new(Vec2::from(config.initial_offset), config.initial_zoom);
        log::info!(
            "Simulation ready at {}x{} ({} pressure iterations, dispatch grid {:?})",
            extent.width,
            extent.height,
            config.pressure_iterations,
            extent.dispatch_grid(config.workgroup_size)
        );

        Ok(Self {
            controller: ControllerParams::from_config(&config),
            config,
            fields,
            uniforms,
            stages,
            camera,
            last_offset: camera.offset,
            // Zero never matches a live zoom, so the first frame computes the fractal.
            last_zoom: 0.0,
            clear: true,
            stats: FrameStats::default(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn extent(&self) -> Extent {
        self.fields.extent()
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn camera(&self) -> PanZoomState {
        self.camera
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn stage(&self, kind: StageKind) -> &ComputeStage {
        &self.stages[kind as usize]
    }

    pub fn uniform_binding(&self) -> UniformBinding {
        self.uniforms.binding()
    }

    /// Uniforms as uploaded for `ring_index`.
    pub fn uniforms(&self, ring_index: usize) -> &SimulationUniforms {
        self.uniforms.get(ring_index)
    }

    pub fn clear_pending(&self) -> bool {
        self.clear
    }

    /// Resets velocity and color on the next update.
    pub fn request_clear(&mut self) {
        self.clear = true;
    }

    /// Whether every Field is live and every stage has its materials bound.
    pub fn is_ready(&self) -> bool {
        self.fields.is_live() && self.stages.iter().all(|s| !s.materials().is_empty())
    }

    /// Records one frame into `stream`. Never blocks on the GPU.
    ///
    /// Records nothing while the simulation is not ready.
    pub fn update<D: GpuDevice>(
        &mut self,
        device: &mut D,
        stream: &mut CommandStream,
        frame: &FrameContext,
        input: InputMask,
    ) {
        if !self.is_ready() {
            log::debug!("Skipping update, fields or materials are released");
            self.stats = FrameStats::default();
            return;
        }
        let start = stream.len();
        let ring = frame.frame_ring_index;
        let dt = self.config.clamp_dt(frame.delta_time);
        let solver_dt = self.config.fixed_dt.unwrap_or(dt);

        if input.contains(InputMask::CLEAR) {
            self.clear = true;
        }

        self.camera = controller::step_with_mask(self.camera, input, dt, &self.controller);
        let camera_moved = self.camera.zoom != self.last_zoom || self.camera.offset != self.last_offset;

        self.assemble_uniforms(ring, frame, solver_dt, input);
        self.uniforms.update(device, ring);
        self.clear = false;
        self.last_offset = self.camera.offset;
        self.last_zoom = self.camera.zoom;

        let uniform_offset = self.uniforms.dynamic_offset(ring);
        let push = StagePushConstants {
            sim_uniforms: self.uniforms.slot_index(ring).get(),
            ..Default::default()
        };
        let grid = self.extent().dispatch_grid(self.config.workgroup_size);

        let reduction_passes = if self.config.auto_exposure {
            self.record_auto_exposure(stream, push, uniform_offset)
        } else {
            0
        };

        if camera_moved {
            log::trace!(
                "Recomputing fractal at zoom {} offset {}",
                self.camera.zoom,
                self.camera.offset
            );
            self.record_fractal(stream, push, uniform_offset, grid);
        }

        self.record_fluid(stream, push, uniform_offset, grid);

        for id in PRESENTED_FIELDS {
            stream.transition_read_only(self.fields.image(id), PipelineStage::Fragment);
        }

        let hazard = if self.config.validate_barriers {
            stream.validate_from(start).err()
        } else {
            None
        };
        if let Some(hazard) = &hazard {
            log::error!("Barrier validation failed: {hazard}");
        }

        self.stats = FrameStats {
            dispatches: stream.dispatches_since(start),
            commands: stream.len() - start,
            fractal_recomputed: camera_moved,
            reduction_passes,
            pressure_iterations: self.config.pressure_iterations,
            dt: solver_dt,
            hazard,
        };
    }

    fn assemble_uniforms(
        &mut self,
        ring: usize,
        frame: &FrameContext,
        dt: f32,
        input: InputMask,
    ) {
        let fields = &self.fields;
        let texture = |id: FieldId| {
            fields
                .get(id)
                .and_then(|f| f.texture_index)
                .map_or(u32::MAX, |i| i.get())
        };
        let image = |id: FieldId| {
            fields
                .get(id)
                .and_then(|f| f.image_index)
                .map_or(u32::MAX, |i| i.get())
        };
        let exposure = fields.exposure();
        let extent = fields.extent();

        let uniforms = SimulationUniforms {
            offset_x: self.camera.offset.x,
            offset_y: self.camera.offset.y,
            last_offset_x: self.last_offset.x,
            last_offset_y: self.last_offset.y,
            zoom: self.camera.zoom,
            last_zoom: self.last_zoom,
            width: extent.width as i32,
            height: extent.height as i32,
            time: frame.elapsed_time as f32,
            dt,
            sor_omega: self.config.sor_omega,
            density: self.config.density,
            vorticity: self.config.vorticity,
            flags: if self.clear { FLAG_CLEAR } else { 0 },
            input_mask: input.bits(),
            exposure_result_offset: exposure.map_or(0, |e| e.layout.result_offset()),
            fractal_texture: texture(FieldId::Fractal),
            velocity_field_texture: texture(FieldId::Velocity),
            color_field_texture: texture(FieldId::ColorA),
            divergence_field_texture: texture(FieldId::Divergence),
            pressure_field_texture: texture(FieldId::PressureA),
            advected_color_field_image: image(FieldId::ColorB),
            advected_velocity_field_image: image(FieldId::AdvectedVelocity),
            divergence_field_image: image(FieldId::Divergence),
            pressure_field_image: image(FieldId::PressureA),
            fractal_image: image(FieldId::Fractal),
            velocity_field_image: image(FieldId::Velocity),
            iteration_counts_image: image(FieldId::IterationCounts),
            color_field_image: image(FieldId::ColorA),
            auto_exposure_buffer: exposure.map_or(u32::MAX, |e| e.index.get()),
            _pad0: 0,
            _pad1: 0,
        };
        *self.uniforms.get_mut(ring) = uniforms;
    }

    fn record_auto_exposure(
        &self,
        stream: &mut CommandStream,
        push: StagePushConstants,
        uniform_offset: u32,
    ) -> usize {
        let Some(exposure) = self.fields.exposure() else {
            return 0;
        };
        let stage = self.stage(StageKind::AutoExposure);
        let texels = self.extent().texel_count();
        let schedule = reduction_schedule(texels, exposure.layout.factor);
        log::trace!("Exposure reduction schedule {schedule:?}");

        stream.transition_general(self.fields.image(FieldId::ColorA), Access::READ);
        let mut inputs = texels;
        for (pass, &groups) in schedule.iter().enumerate() {
            if pass > 0 {
                stream.buffer_barrier(exposure.buffer);
            }
            let push = StagePushConstants {
                params0: pass as u32,
                params1: inputs,
                params2: exposure.layout.half_len,
                ..push
            };
            stage.dispatch(stream, 0, push, uniform_offset, linear_groups(groups));
            inputs = groups;
        }
        stream.buffer_barrier(exposure.buffer);
        schedule.len()
    }

    fn record_fractal(
        &self,
        stream: &mut CommandStream,
        push: StagePushConstants,
        uniform_offset: u32,
        grid: [u32; 3],
    ) {
        stream.transition_general(self.fields.image(FieldId::IterationCounts), Access::WRITE);
        stream.transition_general(self.fields.image(FieldId::Fractal), Access::WRITE);
        self.stage(StageKind::Fractal)
            .dispatch(stream, 0, push, uniform_offset, grid);
    }

    fn record_fluid(
        &self,
        stream: &mut CommandStream,
        push: StagePushConstants,
        uniform_offset: u32,
        grid: [u32; 3],
    ) {
        let image = |id| self.fields.image(id);

        // Velocity advection
        stream.transition_read_only(image(FieldId::Velocity), PipelineStage::Compute);
        stream.transition_general(image(FieldId::AdvectedVelocity), Access::WRITE);
        self.stage(StageKind::AdvectVelocity)
            .dispatch(stream, 0, push, uniform_offset, grid);

        // Divergence
        stream.transition_general(image(FieldId::AdvectedVelocity), Access::READ);
        stream.transition_general(image(FieldId::Divergence), Access::WRITE);
        self.stage(StageKind::Divergence)
            .dispatch(stream, 0, push, uniform_offset, grid);

        // Pressure solve
        let iterations = self.config.pressure_iterations;
        let pressure = self.fields.pressure();
        stream.transition_general(image(FieldId::Divergence), Access::READ);
        for iteration in 0..iterations {
            let phase = PingPong::<FieldId>::phase(iteration);
            stream.transition_general(image(pressure.source(phase)), Access::READ);
            stream.transition_general(image(pressure.dest(phase)), Access::WRITE);
            let push = StagePushConstants {
                params0: iteration,
                ..push
            };
            self.stage(StageKind::Pressure)
                .dispatch(stream, phase, push, uniform_offset, grid);
        }

        // Projection
        let solved = pressure.final_slot(iterations);
        debug_assert_eq!(solved, FieldId::PressureA);
        stream.transition_general(image(solved), Access::READ);
        stream.transition_general(image(FieldId::Velocity), Access::WRITE);
        self.stage(StageKind::UpdateVelocity)
            .dispatch(stream, 0, push, uniform_offset, grid);

        // Color advection
        let color = self.fields.color();
        stream.transition_read_only(image(FieldId::Velocity), PipelineStage::Compute);
        stream.transition_read_only(image(color.front()), PipelineStage::Compute);
        stream.transition_read_only(image(FieldId::Fractal), PipelineStage::Compute);
        stream.transition_general(image(color.back()), Access::WRITE);
        self.stage(StageKind::AdvectColor)
            .dispatch(stream, 0, push, uniform_offset, grid);

        // Copy back into the primary color field
        stream.transition_general(image(color.back()), Access::READ);
        stream.transition_general(image(color.front()), Access::WRITE);
        self.stage(StageKind::CopyColor)
            .dispatch(stream, 0, push, uniform_offset, grid);
    }

    /// Recreates every Field at `extent` and rebinds all materials.
    ///
    /// Forces a fractal recompute and a clear on the next update. If the new
    /// Fields cannot be created the simulation keeps running at its old extent.
    pub fn resize<D: GpuDevice>(
        &mut self,
        device: &mut D,
        heap: &mut GlobalHeap,
        extent: Extent,
    ) -> Result<(), SimulationError> {
        if extent == self.extent() && self.fields.is_live() {
            return Ok(());
        }
        log::info!("Resizing simulation to {}x{}", extent.width, extent.height);

        self.fields
            .recreate(device, heap, extent, self.config.exposure_reduction_factor)?;
        for stage in &mut self.stages {
            stage.release_materials(device);
        }
        let uniforms = self.uniforms.binding();
        for stage in &mut self.stages {
            let sets = material_sets(stage.kind(), self.config.pressure_iterations);
            stage.bind_materials(device, &self.fields, uniforms, &sets)?;
        }

        self.last_zoom = 0.0;
        self.clear = true;
        Ok(())
    }

    /// Recompiles every stage whose source changed on disk.
    ///
    /// Failures are logged and reported; the affected stages keep running
    /// their previous pipeline.
    pub fn try_recompile_shaders<D: GpuDevice>(&mut self, device: &mut D) -> RecompileReport {
        let mut report = RecompileReport::default();
        for stage in &mut self.stages {
            match stage.try_recompile(device) {
                Ok(true) => report.recompiled.push(stage.kind()),
                Ok(false) => {}
                Err(err) => {
                    log::error!("{err}");
                    report.errors.push((stage.kind(), err.to_string()));
                }
            }
        }
        report
    }

    pub fn presentation_handles(&self, ring_index: usize) -> PresentationHandles {
        let uniforms = self.uniforms.get(ring_index);
        PresentationHandles {
            color_texture: uniforms.color_field_texture,
            fractal_texture: uniforms.fractal_texture,
            velocity_texture: uniforms.velocity_field_texture,
            divergence_texture: uniforms.divergence_field_texture,
            pressure_texture: uniforms.pressure_field_texture,
            iteration_counts_image: uniforms.iteration_counts_image,
            exposure_buffer: uniforms.auto_exposure_buffer,
            exposure_result_offset: uniforms.exposure_result_offset,
            uniform_slot: self.uniforms.slot_index(ring_index).get(),
            uniform_offset: self.uniforms.dynamic_offset(ring_index),
        }
    }

    pub fn destroy<D: GpuDevice>(mut self, device: &mut D, heap: &mut GlobalHeap) {
        for stage in &mut self.stages {
            stage.destroy(device);
        }
        self.fields.destroy(device, heap);
        self.uniforms.destroy(device, heap);
    }
}

/// Binding sets for each material of `kind`, in layout order.
pub fn material_sets(kind: StageKind, pressure_iterations: u32) -> Vec<Vec<Binding>> {
    use Binding::*;
    use FieldId::*;
    match kind {
        StageKind::AutoExposure => vec![vec![Load(ColorA), ExposureBuffer]],
        StageKind::Fractal => vec![vec![Store(IterationCounts), Store(Fractal)]],
        StageKind::AdvectVelocity => vec![vec![
            Texture(Velocity),
            Sampler(Velocity),
            Store(AdvectedVelocity),
        ]],
        StageKind::Divergence => vec![vec![Load(AdvectedVelocity), Store(Divergence)]],
        StageKind::Pressure => {
            let pressure = PingPong::new(PressureA, PressureB);
            (0..pressure_iterations.min(2))
                .map(|iteration| {
                    let phase = PingPong::<FieldId>::phase(iteration);
                    vec![
                        Load(Divergence),
                        Load(pressure.source(phase)),
                        Store(pressure.dest(phase)),
                    ]
                })
                .collect()
        }
        StageKind::UpdateVelocity => vec![vec![
            Load(AdvectedVelocity),
            Load(PressureA),
            Store(Velocity),
        ]],
        StageKind::AdvectColor => vec![vec![
            Texture(Velocity),
            Sampler(Velocity),
            Texture(ColorA),
            Sampler(ColorA),
            Texture(Fractal),
            Sampler(Fractal),
            Store(ColorB),
        ]],
        StageKind::CopyColor => vec![vec![Load(ColorB), Store(ColorA)]],
    }
}

/// Spreads `groups` workgroups over x and y so neither exceeds the dispatch limit.
pub fn linear_groups(groups: u32) -> [u32; 3] {
    let x = groups.clamp(1, MAX_GROUPS_PER_DIMENSION);
    [x, groups.max(1).div_ceil(x), 1]
}
