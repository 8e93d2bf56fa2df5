use fluid_canvas::{
    CommandStream, Extent, FrameContext, GlobalHeap, HeadlessDevice, InputMask, Simulation,
    SimulationConfig, GpuDevice,
};
use std::path::Path;

const DEFAULT_WIDTH: u32 = 1000;
const DEFAULT_HEIGHT: u32 = 700;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).ok_or("--config needs a path")?;
            SimulationConfig::load(Path::new(path))?
        }
        None => SimulationConfig::default(),
    };
    let frames = args
        .get(2)
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(60);

    match args.get(1).map(String::as_str) {
        Some("validate") => run_validation(config, frames),
        #[cfg(feature = "gpu")]
        Some("headless") => run_headless(config, frames),
        #[cfg(feature = "gpu")]
        _ => run_gui_app(config),
        #[cfg(not(feature = "gpu"))]
        _ => run_validation(config, frames),
    }
}

/// Records frames against the bookkeeping device and checks every barrier chain.
fn run_validation(mut config: SimulationConfig, frames: usize) -> Result<(), Box<dyn std::error::Error>> {
    config.validate_barriers = true;
    let extent = Extent::new(DEFAULT_WIDTH, DEFAULT_HEIGHT);
    println!(
        "Validating {} frames at {}x{} (dispatch grid {:?})...",
        frames,
        extent.width,
        extent.height,
        extent.dispatch_grid(config.workgroup_size)
    );

    let mut device = HeadlessDevice::new();
    let mut heap = GlobalHeap::new();
    let mut simulation = Simulation::new(&mut device, &mut heap, extent, config)?;
    let mut stream = CommandStream::new();

    // Pan right for the first half, then let the camera settle.
    for frame in 0..frames {
        let input = if frame < frames / 2 {
            InputMask::PAN_RIGHT | InputMask::ZOOM_IN
        } else {
            InputMask::empty()
        };
        let context = FrameContext::new(frame as f64 / 60.0, 1.0 / 60.0, frame % 3);
        simulation.update(&mut device, &mut stream, &context, input);

        let stats = simulation.stats();
        if let Some(hazard) = &stats.hazard {
            return Err(format!("frame {frame}: {hazard}").into());
        }
        if frame % 10 == 0 {
            println!(
                "Frame {frame}: {} commands, {} dispatches, fractal {}, {} reduction passes",
                stats.commands,
                stats.dispatches,
                if stats.fractal_recomputed { "recomputed" } else { "kept" },
                stats.reduction_passes
            );
        }
        device.submit(&mut stream);
    }

    println!(
        "Validation passed: {} frames, {} commands submitted.",
        device.submitted_frames, device.submitted_commands
    );
    Ok(())
}

#[cfg(feature = "gpu")]
fn run_headless(config: SimulationConfig, frames: usize) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(headless(config, frames))
}

#[cfg(feature = "gpu")]
async fn headless(config: SimulationConfig, frames: usize) -> Result<(), Box<dyn std::error::Error>> {
    use fluid_canvas::{AnalysisRecorder, FieldId, FieldSnapshot, FrameCapture, HdrFrame, WgpuDevice};

    println!("Running headless GPU simulation with quantitative analysis...");
    let extent = Extent::new(512, 512);
    let mut gpu = WgpuDevice::create().await?;
    let mut heap = GlobalHeap::new();
    let mut simulation = Simulation::new(&mut gpu, &mut heap, extent, config)?;
    let mut stream = CommandStream::new();
    let mut recorder = AnalysisRecorder::new();

    for frame in 0..frames {
        let context = FrameContext::new(frame as f64 / 30.0, 1.0 / 30.0, frame % 3);
        simulation.update(&mut gpu, &mut stream, &context, InputMask::empty());
        gpu.submit(&mut stream);

        if frame % 5 == 0 || frame + 1 == frames {
            let velocity = gpu
                .read_image_f32(simulation.fields().image(FieldId::Velocity))
                .await?;
            let color = gpu
                .read_image_f32(simulation.fields().image(FieldId::ColorA))
                .await?;
            let snapshot = FieldSnapshot::from_texels(
                extent.width as usize,
                extent.height as usize,
                &velocity,
                &color,
            );
            recorder.record_frame(&snapshot, frame).print_summary();
        }
    }
    recorder.print_trends();

    let color = gpu
        .read_image_f32(simulation.fields().image(FieldId::ColorA))
        .await?;
    let frame = HdrFrame::new(extent.width, extent.height, color)?;
    let mut exports = FrameCapture::new("captures/headless");
    let png = exports.save_png(&frame)?;
    let exr = exports.save_exr(&frame)?;
    println!("Wrote {} and {}", png.display(), exr.display());

    simulation.destroy(&mut gpu, &mut heap);
    Ok(())
}

#[cfg(feature = "gpu")]
fn run_gui_app(config: SimulationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = fluid_canvas::ViewerApp::new(config, Extent::new(DEFAULT_WIDTH, DEFAULT_HEIGHT))?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([DEFAULT_WIDTH as f32, DEFAULT_HEIGHT as f32])
            .with_title("fluid-canvas"),
        ..Default::default()
    };

    eframe::run_native("fluid-canvas", options, Box::new(move |_cc| Box::new(app)))?;
    Ok(())
}
