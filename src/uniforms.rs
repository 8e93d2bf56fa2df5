//! Per-frame simulation uniforms and the ring of transient slots they live in.
//!
//! `SimulationUniforms` must match `SimulationUniforms` in
//! `shaders/prelude.wgsl` field for field.

use crate::device::{BufferHandle, BufferKind, DeviceError, GpuDevice, UniformBinding};
use crate::registry::{BufferSlot, GlobalHeap, ResourceIndex};
use bytemuck::{Pod, Zeroable};

pub const FRAMES_IN_FLIGHT: usize = 3;

pub const FLAG_CLEAR: u32 = 1 << 0;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimulationUniforms {
    pub offset_x: f32,
    pub offset_y: f32,
    pub last_offset_x: f32,
    pub last_offset_y: f32,

    pub zoom: f32,
    pub last_zoom: f32,
    pub width: i32,
    pub height: i32,

    pub time: f32,
    pub dt: f32,
    pub sor_omega: f32,
    pub density: f32,

    pub vorticity: f32,
    pub flags: u32,
    pub input_mask: u32,
    /// Element of the exposure buffer holding the reduced sample.
    pub exposure_result_offset: u32,

    // Texture table indices
    pub fractal_texture: u32,
    pub velocity_field_texture: u32,
    pub color_field_texture: u32,
    pub divergence_field_texture: u32,
    pub pressure_field_texture: u32,

    // Storage image table indices
    pub advected_color_field_image: u32,
    pub advected_velocity_field_image: u32,
    pub divergence_field_image: u32,
    pub pressure_field_image: u32,
    pub fractal_image: u32,
    pub velocity_field_image: u32,
    pub iteration_counts_image: u32,
    pub color_field_image: u32,

    pub auto_exposure_buffer: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl SimulationUniforms {
    pub fn clear_requested(&self) -> bool {
        self.flags & FLAG_CLEAR != 0
    }
}

/// A uniform struct replicated once per frame in flight, in one buffer.
///
/// Slot `i` starts at `i * stride`, where the stride honours the device's
/// dynamic-offset alignment. Each slot is registered in the heap's buffer table.
#[derive(Debug)]
pub struct TransientUniforms<T: Pod> {
    buffer: BufferHandle,
    stride: u64,
    slots: [ResourceIndex; FRAMES_IN_FLIGHT],
    values: [T; FRAMES_IN_FLIGHT],
}

impl<T: Pod> TransientUniforms<T> {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        heap: &mut GlobalHeap,
        label: &str,
    ) -> Result<Self, DeviceError> {
        let size = std::mem::size_of::<T>() as u64;
        let stride = size.next_multiple_of(device.uniform_alignment().max(1));
        let buffer =
            device.create_buffer(label, stride * FRAMES_IN_FLIGHT as u64, BufferKind::Uniform)?;
        let slots = std::array::from_fn(|i| {
            heap.buffers.register(BufferSlot {
                buffer,
                offset: i as u64 * stride,
                size,
            })
        });
        Ok(Self {
            buffer,
            stride,
            slots,
            values: [T::zeroed(); FRAMES_IN_FLIGHT],
        })
    }

    pub fn binding(&self) -> UniformBinding {
        UniformBinding {
            buffer: self.buffer,
            size: std::mem::size_of::<T>() as u64,
        }
    }

    pub fn get_mut(&mut self, ring_index: usize) -> &mut T {
        &mut self.values[ring_index % FRAMES_IN_FLIGHT]
    }

    pub fn get(&self, ring_index: usize) -> &T {
        &self.values[ring_index % FRAMES_IN_FLIGHT]
    }

    /// Uploads the slot for `ring_index`.
    pub fn update<D: GpuDevice>(&self, device: &mut D, ring_index: usize) {
        let slot = ring_index % FRAMES_IN_FLIGHT;
        device.write_buffer(
            self.buffer,
            slot as u64 * self.stride,
            bytemuck::bytes_of(&self.values[slot]),
        );
    }

    pub fn dynamic_offset(&self, ring_index: usize) -> u32 {
        ((ring_index % FRAMES_IN_FLIGHT) as u64 * self.stride) as u32
    }

    pub fn slot_index(&self, ring_index: usize) -> ResourceIndex {
        self.slots[ring_index % FRAMES_IN_FLIGHT]
    }

    pub fn destroy<D: GpuDevice>(&self, device: &mut D, heap: &mut GlobalHeap) {
        for slot in self.slots {
            heap.buffers.unregister(slot);
        }
        device.destroy_buffer(self.buffer);
    }
}
