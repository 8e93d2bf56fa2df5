use fluid_canvas::analysis::luminance;
use fluid_canvas::capture::{KEY_VALUE, exposure_scale};
use fluid_canvas::{AnalysisRecorder, CaptureError, FieldSnapshot, FluidMetrics, FrameCapture, HdrFrame};

#[test]
fn test_hdr_frame_checks_size() {
    let result = HdrFrame::new(4, 4, vec![0.0; 15]);
    assert!(matches!(
        result,
        Err(CaptureError::Size {
            expected: 64,
            actual: 15,
            ..
        })
    ));
    assert!(HdrFrame::new(4, 4, vec![0.0; 64]).is_ok());
}

#[test]
fn test_average_luminance_of_flat_frame() {
    let frame = HdrFrame::new(8, 8, [1.0, 1.0, 1.0, 1.0].repeat(64)).expect("frame");
    let avg = frame.average_luminance();
    assert!((avg - 1.0).abs() < 1e-3, "flat white frame averaged to {avg}");
    assert!((exposure_scale(avg) - KEY_VALUE).abs() < 1e-3);
}

#[test]
fn test_tone_map_black_and_bright() {
    let mut texels = vec![0.0; 2 * 1 * 4];
    texels[4..8].copy_from_slice(&[100.0, 100.0, 100.0, 1.0]);
    let frame = HdrFrame::new(2, 1, texels).expect("frame");

    let image = frame.tone_map(1.0);
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
    assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
}

#[test]
fn test_frame_capture_numbers_files() {
    let dir = std::env::temp_dir().join(format!("fluid-canvas-capture-{}", std::process::id()));
    let mut capture = FrameCapture::new(&dir);
    let frame = HdrFrame::new(4, 4, [0.5, 0.25, 0.125, 1.0].repeat(16)).expect("frame");

    let exr = capture.save_exr(&frame).expect("exr");
    let png = capture.save_png(&frame).expect("png");
    assert_eq!(exr, dir.join("0.exr"));
    assert_eq!(png, dir.join("1.png"));
    assert!(exr.is_file() && png.is_file());
    assert_eq!(capture.captured(), 2);

    let decoded = image::open(&png).expect("decode png");
    assert_eq!((decoded.width(), decoded.height()), (4, 4));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_luminance_weights_sum_to_one() {
    assert!((luminance([1.0, 1.0, 1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(luminance([0.0, 1.0, 0.0, 0.0]) > luminance([1.0, 0.0, 0.0, 0.0]));
}

#[test]
fn test_metrics_of_still_field() {
    let snapshot = FieldSnapshot::new(16, 16);
    let metrics = FluidMetrics::analyze(&snapshot, 3);
    assert_eq!(metrics.frame, 3);
    assert_eq!(metrics.total_kinetic_energy, 0.0);
    assert_eq!(metrics.max_velocity, 0.0);
    assert_eq!(metrics.velocity_divergence, 0.0);
}

#[test]
fn test_uniform_flow_is_divergence_free() {
    let mut snapshot = FieldSnapshot::new(16, 16);
    snapshot.velocity.fill([1.0, 0.0]);
    snapshot.color.fill([1.0, 1.0, 1.0, 1.0]);

    let metrics = FluidMetrics::analyze(&snapshot, 0);
    assert!((metrics.max_velocity - 1.0).abs() < 1e-6);
    assert!(metrics.velocity_divergence.abs() < 1e-6);
    assert!(metrics.vorticity.abs() < 1e-6);
    assert!((metrics.max_luminance - 1.0).abs() < 1e-5);
}

#[test]
fn test_snapshot_from_texels() {
    let velocity = vec![1.0, 2.0, 3.0, 4.0];
    let color = vec![0.1, 0.2, 0.3, 1.0, 0.4, 0.5, 0.6, 1.0];
    let snapshot = FieldSnapshot::from_texels(2, 1, &velocity, &color);
    assert_eq!(snapshot.velocity, vec![[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(snapshot.color[1], [0.4, 0.5, 0.6, 1.0]);

    let mut recorder = AnalysisRecorder::new();
    recorder.record_frame(&snapshot, 0);
    recorder.record_frame(&snapshot, 1);
    assert_eq!(recorder.metrics_history.len(), 2);
}
