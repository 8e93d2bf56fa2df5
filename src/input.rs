//! Per-frame inputs handed to the simulation by the host.

use glam::Vec2;

bitflags::bitflags! {
    /// Discrete inputs sampled by the host once per frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputMask: u32 {
        const PAN_UP     = 1 << 0;
        const PAN_DOWN   = 1 << 1;
        const PAN_LEFT   = 1 << 2;
        const PAN_RIGHT  = 1 << 3;
        const ZOOM_IN    = 1 << 4;
        const ZOOM_OUT   = 1 << 5;
        const CLEAR      = 1 << 6;
        const CAPTURE    = 1 << 7;
    }
}

impl InputMask {
    /// Raw pan direction in screen space (y grows downward). Not normalized.
    pub fn pan_direction(self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.contains(Self::PAN_UP) {
            dir.y -= 1.0;
        }
        if self.contains(Self::PAN_DOWN) {
            dir.y += 1.0;
        }
        if self.contains(Self::PAN_LEFT) {
            dir.x -= 1.0;
        }
        if self.contains(Self::PAN_RIGHT) {
            dir.x += 1.0;
        }
        dir
    }

    /// +1 zooming in, -1 zooming out, 0 when neither or both are held.
    pub fn zoom_direction(self) -> f32 {
        let mut dir = 0.0;
        if self.contains(Self::ZOOM_IN) {
            dir += 1.0;
        }
        if self.contains(Self::ZOOM_OUT) {
            dir -= 1.0;
        }
        dir
    }
}

/// Timing information for the frame being recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Seconds since the host started.
    pub elapsed_time: f64,
    /// Wall-clock seconds since the previous frame, unclamped.
    pub delta_time: f32,
    /// Slot of the host's frames-in-flight ring this frame records into.
    pub frame_ring_index: usize,
}

impl FrameContext {
    pub fn new(elapsed_time: f64, delta_time: f32, frame_ring_index: usize) -> Self {
        Self {
            elapsed_time,
            delta_time,
            frame_ring_index,
        }
    }
}
