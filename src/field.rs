//! The Field Resource Set: every grid-aligned image the pipeline reads or writes.
//!
//! Formats and usages are fixed per [`FieldId`]. Resizing never mutates a
//! Field; the whole set is destroyed and created again at the new extent.

use crate::device::{BufferHandle, BufferKind, DeviceError, GpuDevice, ImageHandle};
use crate::exposure::{ExposureLayout, ExposureSample};
use crate::registry::{BufferSlot, GlobalHeap, ResourceIndex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldFormat {
    R32Float,
    R32Sint,
    Rg32Float,
    Rgba32Float,
}

impl FieldFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            FieldFormat::R32Float | FieldFormat::R32Sint => 4,
            FieldFormat::Rg32Float => 8,
            FieldFormat::Rgba32Float => 16,
        }
    }

    pub fn components(self) -> u32 {
        self.bytes_per_texel() / 4
    }

    pub fn is_float(self) -> bool {
        !matches!(self, FieldFormat::R32Sint)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldUsage: u32 {
        /// Filtered reads through a sampler.
        const SAMPLED       = 1 << 0;
        /// Unfiltered texel loads.
        const STORAGE_READ  = 1 << 1;
        const STORAGE_WRITE = 1 << 2;
        /// Copy out for read-back and capture.
        const TRANSFER_SRC  = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    pub address_mode: AddressMode,
    pub filter: FilterMode,
}

impl SamplerDesc {
    pub const LINEAR_CLAMP: Self = Self {
        address_mode: AddressMode::ClampToEdge,
        filter: FilterMode::Linear,
    };
    pub const LINEAR_MIRROR: Self = Self {
        address_mode: AddressMode::MirrorRepeat,
        filter: FilterMode::Linear,
    };
    pub const NEAREST_CLAMP: Self = Self {
        address_mode: AddressMode::ClampToEdge,
        filter: FilterMode::Nearest,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    pub format: FieldFormat,
    pub usage: FieldUsage,
    pub sampler: Option<SamplerDesc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldId {
    Velocity,
    AdvectedVelocity,
    Divergence,
    PressureA,
    PressureB,
    ColorA,
    ColorB,
    Fractal,
    IterationCounts,
}

impl FieldId {
    pub const ALL: [FieldId; 9] = [
        FieldId::Velocity,
        FieldId::AdvectedVelocity,
        FieldId::Divergence,
        FieldId::PressureA,
        FieldId::PressureB,
        FieldId::ColorA,
        FieldId::ColorB,
        FieldId::Fractal,
        FieldId::IterationCounts,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FieldId::Velocity => "Velocity Field",
            FieldId::AdvectedVelocity => "Advected Velocity Field",
            FieldId::Divergence => "Divergence Field",
            FieldId::PressureA => "Pressure Field A",
            FieldId::PressureB => "Pressure Field B",
            FieldId::ColorA => "Color Field A",
            FieldId::ColorB => "Color Field B",
            FieldId::Fractal => "Fractal Texture",
            FieldId::IterationCounts => "Iteration Counts",
        }
    }

    pub fn desc(self) -> FieldDesc {
        use FieldUsage as U;
        match self {
            FieldId::Velocity => FieldDesc {
                format: FieldFormat::Rg32Float,
                usage: U::SAMPLED | U::STORAGE_READ | U::STORAGE_WRITE | U::TRANSFER_SRC,
                sampler: Some(SamplerDesc::LINEAR_MIRROR),
            },
            FieldId::AdvectedVelocity => FieldDesc {
                format: FieldFormat::Rg32Float,
                usage: U::STORAGE_READ | U::STORAGE_WRITE,
                sampler: None,
            },
            FieldId::Divergence => FieldDesc {
                format: FieldFormat::R32Float,
                usage: U::SAMPLED | U::STORAGE_READ | U::STORAGE_WRITE | U::TRANSFER_SRC,
                sampler: Some(SamplerDesc::LINEAR_CLAMP),
            },
            FieldId::PressureA | FieldId::PressureB => FieldDesc {
                format: FieldFormat::R32Float,
                usage: U::SAMPLED | U::STORAGE_READ | U::STORAGE_WRITE,
                sampler: Some(SamplerDesc::LINEAR_CLAMP),
            },
            FieldId::ColorA | FieldId::ColorB => FieldDesc {
                format: FieldFormat::Rgba32Float,
                usage: U::SAMPLED | U::STORAGE_READ | U::STORAGE_WRITE | U::TRANSFER_SRC,
                sampler: Some(SamplerDesc::LINEAR_MIRROR),
            },
            FieldId::Fractal => FieldDesc {
                format: FieldFormat::R32Float,
                usage: U::SAMPLED | U::STORAGE_WRITE | U::TRANSFER_SRC,
                sampler: Some(SamplerDesc::LINEAR_CLAMP),
            },
            FieldId::IterationCounts => FieldDesc {
                format: FieldFormat::R32Sint,
                usage: U::STORAGE_READ | U::STORAGE_WRITE,
                sampler: Some(SamplerDesc::NEAREST_CLAMP),
            },
        }
    }
}

/// Grid resolution, equal to the framebuffer resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn texel_count(self) -> u32 {
        self.width * self.height
    }

    /// Workgroup grid covering every texel; shaders discard the overhang.
    pub fn dispatch_grid(self, workgroup_size: u32) -> [u32; 3] {
        [
            self.width.div_ceil(workgroup_size),
            self.height.div_ceil(workgroup_size),
            1,
        ]
    }
}

/// Two physical copies of one logical quantity, alternated by iteration parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong<T> {
    slots: [T; 2],
}

impl<T: Copy> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self { slots: [a, b] }
    }

    pub fn phase(iteration: u32) -> usize {
        (iteration % 2) as usize
    }

    /// Slot read during an iteration of the given phase.
    pub fn source(&self, phase: usize) -> T {
        self.slots[phase]
    }

    /// Slot written during an iteration of the given phase.
    pub fn dest(&self, phase: usize) -> T {
        self.slots[1 - phase]
    }

    pub fn front(&self) -> T {
        self.slots[0]
    }

    pub fn back(&self) -> T {
        self.slots[1]
    }

    /// Slot holding the result after `iterations` passes starting from the front.
    pub fn final_slot(&self, iterations: u32) -> T {
        if iterations == 0 {
            self.front()
        } else {
            self.dest(Self::phase(iterations - 1))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub id: FieldId,
    pub image: ImageHandle,
    /// Index in the heap's storage image table, if the Field is storage-writable.
    pub image_index: Option<ResourceIndex>,
    /// Index in the heap's texture table, if the Field is sampled.
    pub texture_index: Option<ResourceIndex>,
    pub extent: Extent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureBuffer {
    pub buffer: BufferHandle,
    pub index: ResourceIndex,
    pub layout: ExposureLayout,
}

/// Owner of every simulation Field plus the auto-exposure accumulator.
#[derive(Debug)]
pub struct FieldSet {
    extent: Extent,
    fields: Vec<Field>,
    exposure: Option<ExposureBuffer>,
}

impl FieldSet {
    /// Allocates every Field at `extent` and registers it in `heap`.
    ///
    /// Fails on the first Field the device cannot create; anything already
    /// created is released before returning.
    pub fn create<D: GpuDevice>(
        device: &mut D,
        heap: &mut GlobalHeap,
        extent: Extent,
        reduction_factor: u32,
    ) -> Result<Self, DeviceError> {
        let mut set = FieldSet {
            extent,
            fields: Vec::with_capacity(FieldId::ALL.len()),
            exposure: None,
        };

        for id in FieldId::ALL {
            let desc = id.desc();
            if !device.supports_field(&desc) {
                set.destroy(device, heap);
                return Err(DeviceError::UnsupportedField {
                    label: id.label().to_string(),
                    format: desc.format,
                    usage: desc.usage,
                });
            }
            let image = match device.create_image(id.label(), &desc, extent) {
                Ok(image) => image,
                Err(err) => {
                    set.destroy(device, heap);
                    return Err(err);
                }
            };
            let image_index = desc
                .usage
                .contains(FieldUsage::STORAGE_WRITE)
                .then(|| heap.images.register(image));
            let texture_index = desc
                .usage
                .contains(FieldUsage::SAMPLED)
                .then(|| heap.textures.register(image));
            set.fields.push(Field {
                id,
                image,
                image_index,
                texture_index,
                extent,
            });
        }

        let layout = ExposureLayout::new(extent.texel_count(), reduction_factor);
        let size = layout.byte_size();
        let buffer = match device.create_buffer("Auto Exposure Buffer", size, BufferKind::Storage)
        {
            Ok(buffer) => buffer,
            Err(err) => {
                set.destroy(device, heap);
                return Err(err);
            }
        };
        let index = heap.buffers.register(BufferSlot {
            buffer,
            offset: 0,
            size,
        });
        set.exposure = Some(ExposureBuffer {
            buffer,
            index,
            layout,
        });

        log::info!(
            "Created {} fields at {}x{} ({} byte exposure buffer, {} samples of {} bytes per half)",
            set.fields.len(),
            extent.width,
            extent.height,
            size,
            layout.half_len,
            std::mem::size_of::<ExposureSample>()
        );
        Ok(set)
    }

    /// Releases every Field. Calling it again is a no-op.
    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D, heap: &mut GlobalHeap) {
        for field in self.fields.drain(..) {
            if let Some(index) = field.image_index {
                heap.images.unregister(index);
            }
            if let Some(index) = field.texture_index {
                heap.textures.unregister(index);
            }
            device.destroy_image(field.image);
        }
        if let Some(exposure) = self.exposure.take() {
            heap.buffers.unregister(exposure.index);
            device.destroy_buffer(exposure.buffer);
        }
    }

    /// Allocates fresh Fields at `extent`, then releases the current ones.
    ///
    /// On failure the current Fields are left live and untouched.
    pub fn recreate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        heap: &mut GlobalHeap,
        extent: Extent,
        reduction_factor: u32,
    ) -> Result<(), DeviceError> {
        let fresh = FieldSet::create(device, heap, extent, reduction_factor)?;
        let mut old = std::mem::replace(self, fresh);
        old.destroy(device, heap);
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn get(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id as usize)
    }

    /// Image of a live Field. Panics once the set has been destroyed.
    pub fn image(&self, id: FieldId) -> ImageHandle {
        self.fields[id as usize].image
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn exposure(&self) -> Option<&ExposureBuffer> {
        self.exposure.as_ref()
    }

    pub fn pressure(&self) -> PingPong<FieldId> {
        PingPong::new(FieldId::PressureA, FieldId::PressureB)
    }

    pub fn color(&self) -> PingPong<FieldId> {
        PingPong::new(FieldId::ColorA, FieldId::ColorB)
    }
}
