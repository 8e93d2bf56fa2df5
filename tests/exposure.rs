use fluid_canvas::exposure::{ExposureLayout, ExposureSample, average_luminance, reduction_schedule};
use fluid_canvas::uniforms::{FLAG_CLEAR, SimulationUniforms};
use std::mem::{offset_of, size_of};

#[test]
fn test_reduction_schedule() {
    assert_eq!(reduction_schedule(700_000, 32), vec![21875, 684, 22, 1]);
    assert_eq!(reduction_schedule(64, 32), vec![2, 1]);
    assert_eq!(reduction_schedule(1, 32), vec![1]);
    assert_eq!(reduction_schedule(0, 32), vec![1]);
}

#[test]
fn test_schedule_has_no_flat_cutoff() {
    // Sizes just past a power of the factor still reduce to one group.
    for texels in [1025, 32 * 32 * 32 + 1, 1920 * 1080] {
        let schedule = reduction_schedule(texels, 32);
        assert_eq!(schedule.last(), Some(&1), "{texels} texels");
        assert!(schedule.windows(2).all(|w| w[1] < w[0] || w[0] == 1));
    }
}

#[test]
fn test_exposure_layout_halves() {
    let layout = ExposureLayout::new(700_000, 32);
    assert_eq!(layout.half_len, 32768);
    assert_eq!(layout.passes, 4);
    assert_eq!(layout.write_offset(0), 0);
    assert_eq!(layout.write_offset(1), 32768);
    assert_eq!(layout.result_offset(), 32768);
    assert_eq!(layout.byte_size(), 65536 * 16);

    let layout = ExposureLayout::new(2048, 32);
    assert_eq!(layout.passes, 3);
    assert_eq!(layout.half_len, 64);
    assert_eq!(layout.result_offset(), 0);
}

#[test]
fn test_average_luminance() {
    let sample = ExposureSample {
        log_luminance_sum: 4.0,
        max_luminance: 3.0,
        count: 4.0,
        _padding: 0.0,
    };
    assert!((average_luminance(&sample) - 2.0).abs() < 1e-6);
    assert_eq!(average_luminance(&ExposureSample::default()), 0.0);
}

#[test]
fn test_gpu_struct_layouts() {
    assert_eq!(size_of::<ExposureSample>(), 16);
    assert_eq!(size_of::<SimulationUniforms>(), 128);
    assert_eq!(offset_of!(SimulationUniforms, zoom), 16);
    assert_eq!(offset_of!(SimulationUniforms, time), 32);
    assert_eq!(offset_of!(SimulationUniforms, vorticity), 48);
    assert_eq!(offset_of!(SimulationUniforms, exposure_result_offset), 60);
    assert_eq!(offset_of!(SimulationUniforms, fractal_texture), 64);
    assert_eq!(offset_of!(SimulationUniforms, advected_color_field_image), 84);
    assert_eq!(offset_of!(SimulationUniforms, auto_exposure_buffer), 116);
}

#[test]
fn test_clear_flag() {
    let mut uniforms = SimulationUniforms::default();
    assert!(!uniforms.clear_requested());
    uniforms.flags |= FLAG_CLEAR;
    assert!(uniforms.clear_requested());
}
