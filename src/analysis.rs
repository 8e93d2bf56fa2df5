//! Quantitative metrics over fields read back from the GPU.

use glam::Vec2;
use std::collections::HashMap;

/// Host-side copy of the fields worth measuring, as read back from the device.
#[derive(Debug, Clone)]
pub struct FieldSnapshot {
    pub width: usize,
    pub height: usize,
    /// Row-major (u, v) pairs.
    pub velocity: Vec<[f32; 2]>,
    /// Row-major linear RGBA.
    pub color: Vec<[f32; 4]>,
}

impl FieldSnapshot {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            velocity: vec![[0.0; 2]; width * height],
            color: vec![[0.0; 4]; width * height],
        }
    }

    /// Builds a snapshot from tightly packed `Rg32Float` and `Rgba32Float` texels.
    pub fn from_texels(width: usize, height: usize, velocity: &[f32], color: &[f32]) -> Self {
        Self {
            width,
            height,
            velocity: velocity.chunks_exact(2).map(|c| [c[0], c[1]]).collect(),
            color: color
                .chunks_exact(4)
                .map(|c| [c[0], c[1], c[2], c[3]])
                .collect(),
        }
    }
}

pub fn luminance(rgb: [f32; 4]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

#[derive(Debug, Clone)]
pub struct FluidMetrics {
    pub total_luminance: f32,
    pub max_luminance: f32,
    pub avg_luminance: f32,
    pub total_kinetic_energy: f32,
    pub max_velocity: f32,
    pub avg_velocity: f32,
    pub luminance_entropy: f32,
    pub velocity_divergence: f32,
    pub vorticity: f32,
    pub frame: usize,
}

impl FluidMetrics {
    pub fn analyze(snapshot: &FieldSnapshot, frame: usize) -> Self {
        let mut total_luminance: f32 = 0.0;
        let mut max_luminance: f32 = 0.0;
        let mut total_kinetic_energy: f32 = 0.0;
        let mut max_velocity: f32 = 0.0;
        let mut velocity_sum: f32 = 0.0;
        let mut luminance_histogram = HashMap::new();
        let mut total_divergence: f32 = 0.0;
        let mut total_vorticity: f32 = 0.0;

        let width = snapshot.width;
        let height = snapshot.height;
        // Central differences need a neighbour on every side, so only the interior counts.
        let interior = (width.saturating_sub(2) * height.saturating_sub(2)).max(1) as f32;
        let vel = &snapshot.velocity;

        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let idx = y * width + x;
                let lum = luminance(snapshot.color[idx]);
                let speed = Vec2::from(vel[idx]).length();

                total_luminance += lum;
                max_luminance = max_luminance.max(lum);
                total_kinetic_energy += 0.5 * speed * speed;
                max_velocity = max_velocity.max(speed);
                velocity_sum += speed;

                let bucket = (lum.max(0.0) * 10.0).floor() as usize;
                *luminance_histogram.entry(bucket).or_insert(0u32) += 1;

                let (east, west) = (vel[idx + 1], vel[idx - 1]);
                let (south, north) = (vel[idx + width], vel[idx - width]);
                total_divergence += ((east[0] - west[0] + south[1] - north[1]) * 0.5).abs();
                total_vorticity += ((east[1] - west[1] - south[0] + north[0]) * 0.5).abs();
            }
        }

        let entropy: f32 = luminance_histogram
            .values()
            .map(|&count| count as f32 / interior)
            .filter(|&p| p > 0.0)
            .map(|p| -p * p.log2())
            .sum();

        Self {
            total_luminance,
            max_luminance,
            avg_luminance: total_luminance / interior,
            total_kinetic_energy,
            max_velocity,
            avg_velocity: velocity_sum / interior,
            luminance_entropy: entropy,
            velocity_divergence: total_divergence / interior,
            vorticity: total_vorticity / interior,
            frame,
        }
    }

    pub fn print_summary(&self) {
        let rows = [
            ("luminance (total)", self.total_luminance),
            ("luminance (max)", self.max_luminance),
            ("luminance (avg)", self.avg_luminance),
            ("luminance entropy", self.luminance_entropy),
            ("kinetic energy", self.total_kinetic_energy),
            ("speed (max)", self.max_velocity),
            ("speed (avg)", self.avg_velocity),
            ("|div v| (avg)", self.velocity_divergence),
            ("|curl v| (avg)", self.vorticity),
        ];
        println!("frame {}", self.frame);
        for (label, value) in rows {
            println!("  {label:<18} {value:>12.6}");
        }
    }
}

/// Relative change from `from` to `to`, in percent.
fn percent_change(from: f32, to: f32) -> f32 {
    (to - from) / from.abs().max(1e-3) * 100.0
}

/// Metrics of every analyzed frame, in recording order.
#[derive(Debug, Default)]
pub struct AnalysisRecorder {
    pub metrics_history: Vec<FluidMetrics>,
}

impl AnalysisRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, snapshot: &FieldSnapshot, frame: usize) -> &FluidMetrics {
        let index = self.metrics_history.len();
        self.metrics_history
            .push(FluidMetrics::analyze(snapshot, frame));
        &self.metrics_history[index]
    }

    /// Compares the first and last recorded frames. Prints nothing with fewer than two.
    pub fn print_trends(&self) {
        let [first, .., last] = self.metrics_history.as_slice() else {
            return;
        };
        println!("trend over frames {}..={}", first.frame, last.frame);
        let trends = [
            ("luminance", first.total_luminance, last.total_luminance),
            ("kinetic energy", first.total_kinetic_energy, last.total_kinetic_energy),
            ("|div v|", first.velocity_divergence, last.velocity_divergence),
            ("|curl v|", first.vorticity, last.vorticity),
        ];
        for (label, from, to) in trends {
            println!(
                "  {label:<15} {from:>12.6} -> {to:>12.6} ({:+.2}%)",
                percent_change(from, to)
            );
        }
    }
}
