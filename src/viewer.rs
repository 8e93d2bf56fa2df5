//! Desktop host: drives the simulation once per egui frame and shows the
//! tone-mapped result.
//!
//! Keys: W/A/S/D pan, E/Q zoom, C clear, Ctrl+R recompile shaders, Space
//! (held) captures the HDR color field as EXR.

use crate::capture::{FrameCapture, HdrFrame};
use crate::command::CommandStream;
use crate::config::SimulationConfig;
use crate::device::GpuDevice;
use crate::field::{Extent, FieldId};
use crate::gpu::WgpuDevice;
use crate::gpu::present::Presenter;
use crate::input::{FrameContext, InputMask};
use crate::registry::GlobalHeap;
use crate::simulation::{Simulation, SimulationError};
use crate::stage::shader_prelude;
use crate::uniforms::FRAMES_IN_FLIGHT;
use eframe::egui;
use std::time::Instant;

/// Tracks a failure that repeats every frame so it is reported once per outage.
#[derive(Debug, Default)]
pub struct FailureLatch {
    failing: bool,
}

impl FailureLatch {
    /// Records this frame's outcome. Returns true only when a new outage starts.
    pub fn observe(&mut self, failed: bool) -> bool {
        let started = failed && !self.failing;
        self.failing = failed;
        started
    }

    pub fn is_failing(&self) -> bool {
        self.failing
    }
}

pub struct ViewerApp {
    runtime: tokio::runtime::Runtime,
    gpu: WgpuDevice,
    heap: GlobalHeap,
    simulation: Simulation,
    presenter: Presenter,
    stream: CommandStream,
    hdr_captures: FrameCapture,
    png_exports: FrameCapture,
    texture: Option<egui::TextureHandle>,
    frame_count: usize,
    started: Instant,
    last_frame: Instant,
    status: String,
    presentation: FailureLatch,
    halted: bool,
}

impl ViewerApp {
    pub fn new(config: SimulationConfig, extent: Extent) -> Result<Self, Box<dyn std::error::Error>> {
        let runtime = tokio::runtime::Runtime::new()?;
        let mut gpu = runtime.block_on(WgpuDevice::create())?;
        let mut heap = GlobalHeap::new();
        let prelude = shader_prelude(&config);
        let simulation = Simulation::new(&mut gpu, &mut heap, extent, config)?;
        let presenter = Presenter::new(&gpu, &prelude, extent)?;
        let now = Instant::now();

        Ok(Self {
            runtime,
            gpu,
            heap,
            simulation,
            presenter,
            stream: CommandStream::new(),
            hdr_captures: FrameCapture::new("captures"),
            png_exports: FrameCapture::new("captures/png"),
            texture: None,
            frame_count: 0,
            started: now,
            last_frame: now,
            status: String::new(),
            presentation: FailureLatch::default(),
            halted: false,
        })
    }

    fn sample_input(ctx: &egui::Context) -> (InputMask, bool) {
        ctx.input(|i| {
            let mut mask = InputMask::empty();
            let held = [
                (egui::Key::W, InputMask::PAN_UP),
                (egui::Key::S, InputMask::PAN_DOWN),
                (egui::Key::A, InputMask::PAN_LEFT),
                (egui::Key::D, InputMask::PAN_RIGHT),
                (egui::Key::E, InputMask::ZOOM_IN),
                (egui::Key::Q, InputMask::ZOOM_OUT),
                (egui::Key::Space, InputMask::CAPTURE),
            ];
            for (key, bit) in held {
                if i.key_down(key) {
                    mask |= bit;
                }
            }
            if i.key_pressed(egui::Key::C) {
                mask |= InputMask::CLEAR;
            }
            let recompile = i.modifiers.ctrl && i.key_pressed(egui::Key::R);
            (mask, recompile)
        })
    }

    fn recompile(&mut self) {
        let report = self.simulation.try_recompile_shaders(&mut self.gpu);
        self.status = if report.is_clean() {
            format!("Recompiled {} stage(s)", report.recompiled.len())
        } else {
            format!("{} shader error(s), see log", report.errors.len())
        };
    }

    fn resize_to(&mut self, extent: Extent) -> Result<(), SimulationError> {
        if extent.width == 0 || extent.height == 0 || extent == self.simulation.extent() {
            return Ok(());
        }
        self.simulation
            .resize(&mut self.gpu, &mut self.heap, extent)?;
        self.presenter.resize(&self.gpu, extent);
        Ok(())
    }

    fn read_color_field(&self) -> Option<HdrFrame> {
        let extent = self.simulation.extent();
        let image = self.simulation.fields().image(FieldId::ColorA);
        let texels = self
            .runtime
            .block_on(self.gpu.read_image_f32(image))
            .map_err(|err| log::error!("Color read-back failed: {err}"))
            .ok()?;
        HdrFrame::new(extent.width, extent.height, texels)
            .map_err(|err| log::error!("{err}"))
            .ok()
    }

    fn capture_hdr(&mut self) {
        if let Some(frame) = self.read_color_field() {
            match self.hdr_captures.save_exr(&frame) {
                Ok(path) => self.status = format!("Captured {}", path.display()),
                Err(err) => log::error!("HDR capture failed: {err}"),
            }
        }
    }

    fn export_png(&mut self) {
        if let Some(frame) = self.read_color_field() {
            match self.png_exports.save_png(&frame) {
                Ok(path) => self.status = format!("Exported {}", path.display()),
                Err(err) => log::error!("PNG export failed: {err}"),
            }
        }
    }

    fn step(&mut self, input: InputMask) {
        let now = Instant::now();
        let frame = FrameContext::new(
            now.duration_since(self.started).as_secs_f64(),
            now.duration_since(self.last_frame).as_secs_f32(),
            self.frame_count % FRAMES_IN_FLIGHT,
        );
        self.last_frame = now;

        self.simulation
            .update(&mut self.gpu, &mut self.stream, &frame, input);
        self.gpu.submit(&mut self.stream);

        let handles = self.simulation.presentation_handles(frame.frame_ring_index);
        let result = self.presenter.render(&self.gpu, &self.heap, &handles);
        if self.presentation.observe(result.is_err()) {
            if let Err(err) = result {
                log::error!("Presentation failed: {err}");
                self.status = "Presentation failed, see log".to_string();
            }
        }
        self.frame_count += 1;

        if input.contains(InputMask::CAPTURE) {
            self.capture_hdr();
        }
    }

    fn upload_frame(&mut self, ctx: &egui::Context) {
        let extent = self.presenter.extent();
        let pixels = match self.runtime.block_on(self.presenter.read_pixels(&self.gpu)) {
            Ok(pixels) => pixels,
            Err(err) => {
                log::error!("Frame read-back failed: {err}");
                return;
            }
        };
        let image = egui::ColorImage::from_rgba_unmultiplied(
            [extent.width as usize, extent.height as usize],
            &pixels,
        );
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.texture = Some(ctx.load_texture("fluid", image, egui::TextureOptions::LINEAR))
            }
        }
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.halted {
            return;
        }
        let (input, recompile) = Self::sample_input(ctx);
        if recompile {
            self.recompile();
        }

        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Clear").clicked() {
                    self.simulation.request_clear();
                }
                if ui.button("Recompile Shaders").clicked() {
                    self.recompile();
                }
                if ui.button("Export PNG").clicked() {
                    self.export_png();
                }
                let stats = self.simulation.stats();
                let camera = self.simulation.camera();
                ui.label(format!(
                    "Frame {} | {} dispatches | zoom {:.3} | offset ({:.5}, {:.5}) | {}",
                    self.frame_count,
                    stats.dispatches,
                    camera.zoom,
                    camera.offset.x,
                    camera.offset.y,
                    self.status
                ));
            });
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let available = ui.available_size();
                let scale = ctx.pixels_per_point();
                let extent = Extent::new((available.x * scale) as u32, (available.y * scale) as u32);
                if let Err(err) = self.resize_to(extent) {
                    log::error!("Resize to {}x{} failed: {err}", extent.width, extent.height);
                    self.halted = true;
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    return;
                }

                self.step(input);
                self.upload_frame(ctx);

                let (rect, _response) = ui.allocate_exact_size(available, egui::Sense::hover());
                if let Some(texture) = &self.texture {
                    ui.painter().image(
                        texture.id(),
                        rect,
                        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        egui::Color32::WHITE,
                    );
                }
            });

        ctx.request_repaint();
    }
}
