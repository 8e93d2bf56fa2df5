//! Auto-exposure reduction over the color field's luminance.
//!
//! Each pass folds `factor` elements into one per workgroup. The accumulator
//! buffer holds two halves; pass `p` writes half `p % 2` and reads the other,
//! so no pass reads an element another workgroup of the same pass writes.

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ExposureSample {
    pub log_luminance_sum: f32,
    pub max_luminance: f32,
    pub count: f32,
    pub _padding: f32,
}

/// Group counts of each reduction pass over `elements` inputs.
///
/// The first pass covers `ceil(elements / factor)` groups; every following pass
/// covers `ceil(previous / factor)` until a single group remains. The last
/// entry is always 1.
pub fn reduction_schedule(elements: u32, factor: u32) -> Vec<u32> {
    let factor = factor.max(2);
    let mut groups = elements.max(1).div_ceil(factor);
    let mut passes = vec![groups];
    while groups > 1 {
        groups = groups.div_ceil(factor);
        passes.push(groups);
    }
    passes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureLayout {
    /// Elements per half; a power of two no smaller than the first pass's group count.
    pub half_len: u32,
    pub factor: u32,
    pub passes: u32,
}

impl ExposureLayout {
    pub fn new(texels: u32, factor: u32) -> Self {
        let schedule = reduction_schedule(texels, factor);
        Self {
            half_len: schedule[0].next_power_of_two(),
            factor,
            passes: schedule.len() as u32,
        }
    }

    pub fn element_count(&self) -> u32 {
        self.half_len * 2
    }

    pub fn byte_size(&self) -> u64 {
        self.element_count() as u64 * std::mem::size_of::<ExposureSample>() as u64
    }

    /// First element of the half written by `pass`.
    pub fn write_offset(&self, pass: u32) -> u32 {
        (pass % 2) * self.half_len
    }

    /// Element holding the reduced sample once every pass has run.
    pub fn result_offset(&self) -> u32 {
        self.write_offset(self.passes - 1)
    }
}

/// Average luminance encoded by a fully reduced sample.
pub fn average_luminance(sample: &ExposureSample) -> f32 {
    if sample.count <= 0.0 {
        return 0.0;
    }
    (sample.log_luminance_sum / sample.count).exp2()
}
