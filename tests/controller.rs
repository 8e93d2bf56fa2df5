use fluid_canvas::controller::{ControllerParams, PanZoomState, step, step_with_mask};
use fluid_canvas::{
    CommandStream, Extent, FrameContext, GlobalHeap, HeadlessDevice, InputMask, Simulation,
    SimulationConfig,
};
use glam::Vec2;

fn params() -> ControllerParams {
    ControllerParams::from_config(&SimulationConfig::default())
}

#[test]
fn test_pan_velocity_converges() {
    let params = params();
    let dt = 1.0 / 60.0;
    let steps = (5.0 * params.settle_time / dt) as usize;

    let mut state = PanZoomState::new(Vec2::ZERO, 1.0);
    for _ in 0..steps {
        state = step_with_mask(state, InputMask::PAN_RIGHT, dt, &params);
    }

    let error = (state.velocity.x - params.target_pan_speed).abs() / params.target_pan_speed;
    assert!(error < 0.02, "pan velocity {} not within 2% of target", state.velocity.x);
    assert!(state.velocity.y.abs() < 1e-6);
}

#[test]
fn test_diagonal_pan_is_normalized() {
    let params = params();
    let mut state = PanZoomState::new(Vec2::ZERO, 1.0);
    for _ in 0..600 {
        state = step_with_mask(state, InputMask::PAN_UP | InputMask::PAN_LEFT, 1.0 / 60.0, &params);
    }
    let speed = state.velocity.length();
    assert!(
        (speed - params.target_pan_speed).abs() < 0.01,
        "diagonal speed {speed} should match straight speed"
    );
}

#[test]
fn test_zoom_advances_in_octaves() {
    let params = params();
    let dt = 1.0 / 60.0;
    let mut state = PanZoomState::new(Vec2::ZERO, 1.0);
    state.zoom_velocity = params.target_zoom_speed;

    for _ in 0..60 {
        state = step(state, Vec2::ZERO, 1.0, dt, &params);
    }

    let expected = (params.target_zoom_speed).exp2();
    assert!(
        (state.zoom - expected).abs() < 1e-3,
        "one second at {} octaves/s gave zoom {}, expected {}",
        params.target_zoom_speed,
        state.zoom,
        expected
    );
}

#[test]
fn test_pan_is_scaled_by_zoom() {
    let params = params();
    let mut near = PanZoomState::new(Vec2::ZERO, 4.0);
    near.velocity = Vec2::new(params.target_pan_speed, 0.0);
    let mut far = PanZoomState::new(Vec2::ZERO, 1.0);
    far.velocity = near.velocity;

    let near = step(near, Vec2::X, 0.0, 0.1, &params);
    let far = step(far, Vec2::X, 0.0, 0.1, &params);

    assert!((far.offset.x / near.offset.x - 4.0).abs() < 1e-4);
}

#[test]
fn test_tiny_input_is_ignored() {
    let params = params();
    let state = PanZoomState::new(Vec2::new(0.25, -0.5), 2.0);
    let next = step(state, Vec2::new(1e-4, 0.0), 1e-4, 1.0 / 60.0, &params);
    assert_eq!(next, state, "sub-epsilon input with zero velocity must not move the camera");
}

#[test]
fn test_solver_dt_is_clamped() {
    let mut device = HeadlessDevice::new();
    let mut heap = GlobalHeap::new();
    let config = SimulationConfig::default();
    let max_dt = config.max_dt;
    let mut simulation =
        Simulation::new(&mut device, &mut heap, Extent::new(64, 64), config).expect("simulation");
    let mut stream = CommandStream::new();

    simulation.update(
        &mut device,
        &mut stream,
        &FrameContext::new(0.0, 0.5, 0),
        InputMask::empty(),
    );

    assert_eq!(simulation.stats().dt, max_dt);
    assert_eq!(simulation.uniforms(0).dt, 1.0 / 30.0);
}

#[test]
fn test_fixed_dt_overrides_frame_delta() {
    let mut device = HeadlessDevice::new();
    let mut heap = GlobalHeap::new();
    let config = SimulationConfig {
        fixed_dt: Some(0.01),
        ..SimulationConfig::default()
    };
    let mut simulation =
        Simulation::new(&mut device, &mut heap, Extent::new(32, 32), config).expect("simulation");
    let mut stream = CommandStream::new();

    simulation.update(
        &mut device,
        &mut stream,
        &FrameContext::new(0.0, 0.02, 1),
        InputMask::empty(),
    );
    assert_eq!(simulation.uniforms(1).dt, 0.01);
}

#[test]
fn test_short_settle_time_does_not_overshoot() {
    let params = ControllerParams {
        settle_time: 0.01,
        ..params()
    };
    let mut state = PanZoomState::new(Vec2::ZERO, 1.0);
    for _ in 0..10 {
        state = step_with_mask(state, InputMask::PAN_RIGHT | InputMask::ZOOM_IN, 1.0 / 30.0, &params);
        assert!(state.velocity.x <= params.target_pan_speed);
        assert!(state.zoom_velocity <= params.target_zoom_speed);
    }
    assert_eq!(state.velocity.x, params.target_pan_speed);

    for _ in 0..10 {
        state = step_with_mask(state, InputMask::empty(), 1.0 / 30.0, &params);
        assert!(state.velocity.x >= 0.0, "released pan must decay without reversing");
    }
    assert_eq!(state.velocity, Vec2::ZERO);
}
