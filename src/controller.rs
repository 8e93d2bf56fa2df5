//! Pan/zoom feedback controller.
//!
//! Velocities chase their targets with `accel = K * (target - current)`,
//! `K = 4 / settle_time`, so a held input reaches ~98% of target speed after
//! one settle time. Zoom velocity is in octaves per second.

use crate::config::SimulationConfig;
use crate::input::InputMask;
use glam::Vec2;

const INPUT_EPSILON: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerParams {
    pub target_pan_speed: f32,
    pub target_zoom_speed: f32,
    pub settle_time: f32,
}

impl ControllerParams {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            target_pan_speed: config.target_pan_speed,
            target_zoom_speed: config.target_zoom_speed,
            settle_time: config.velocity_settle_time,
        }
    }

    pub fn gain(&self) -> f32 {
        4.0 / self.settle_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanZoomState {
    pub offset: Vec2,
    pub zoom: f32,
    pub velocity: Vec2,
    pub zoom_velocity: f32,
}

impl PanZoomState {
    pub fn new(offset: Vec2, zoom: f32) -> Self {
        Self {
            offset,
            zoom,
            velocity: Vec2::ZERO,
            zoom_velocity: 0.0,
        }
    }
}

/// Advances the controller by `dt` given raw pan and zoom input.
///
/// `pan_input` is normalized here; inputs shorter than the epsilon target zero.
pub fn step(
    state: PanZoomState,
    pan_input: Vec2,
    zoom_input: f32,
    dt: f32,
    params: &ControllerParams,
) -> PanZoomState {
    // A blend past the target would overshoot; cap it at one full step.
    let blend = (params.gain() * dt).min(1.0);

    let target_velocity = if pan_input.length() > INPUT_EPSILON {
        pan_input.normalize() * params.target_pan_speed
    } else {
        Vec2::ZERO
    };
    let target_zoom_velocity = if zoom_input.abs() > INPUT_EPSILON {
        zoom_input.signum() * params.target_zoom_speed
    } else {
        0.0
    };

    let velocity = state.velocity + (target_velocity - state.velocity) * blend;
    let zoom_velocity = state.zoom_velocity + (target_zoom_velocity - state.zoom_velocity) * blend;

    let zoom = state.zoom * (zoom_velocity * dt).exp2();
    let offset = state.offset + velocity / zoom * dt;

    PanZoomState {
        offset,
        zoom,
        velocity,
        zoom_velocity,
    }
}

/// [`step`] driven by an input bitmask.
pub fn step_with_mask(
    state: PanZoomState,
    input: InputMask,
    dt: f32,
    params: &ControllerParams,
) -> PanZoomState {
    step(
        state,
        input.pan_direction(),
        input.zoom_direction(),
        dt,
        params,
    )
}
