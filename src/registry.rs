//! Index-addressed resource tables.
//!
//! Every GPU resource the shaders can reach is registered here once, at
//! creation, and addressed by a small integer from then on. Freed indices are
//! recycled through a free list so the tables stay dense across resizes.

use crate::device::{BufferHandle, ImageHandle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIndex(pub u32);

impl ResourceIndex {
    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ResourceRegistry<T> {
    entries: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for ResourceRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> ResourceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: T) -> ResourceIndex {
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(resource);
                ResourceIndex(slot)
            }
            None => {
                self.entries.push(Some(resource));
                ResourceIndex(self.entries.len() as u32 - 1)
            }
        }
    }

    /// Releases `index` for reuse. Unregistering a free index is a no-op.
    pub fn unregister(&mut self, index: ResourceIndex) -> Option<T> {
        let entry = self.entries.get_mut(index.0 as usize)?;
        let resource = entry.take()?;
        self.free.push(index.0);
        Some(resource)
    }

    pub fn get(&self, index: ResourceIndex) -> Option<&T> {
        self.entries.get(index.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: ResourceIndex) -> Option<&mut T> {
        self.entries.get_mut(index.0 as usize)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceIndex, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|r| (ResourceIndex(i as u32), r)))
    }
}

/// Sub-allocation of a device buffer, as seen by shader code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlot {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

/// The renderer-wide heap that shader code and the presentation pass index into.
///
/// Storage images, sampled textures and buffers live in separate tables, so a
/// Field usable both ways owns one index in each.
#[derive(Debug, Default)]
pub struct GlobalHeap {
    pub images: ResourceRegistry<ImageHandle>,
    pub textures: ResourceRegistry<ImageHandle>,
    pub buffers: ResourceRegistry<BufferSlot>,
}

impl GlobalHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image behind a texture-table index, as the presentation pass resolves it.
    pub fn texture(&self, index: ResourceIndex) -> Option<ImageHandle> {
        self.textures.get(index).copied()
    }

    pub fn buffer(&self, index: ResourceIndex) -> Option<BufferSlot> {
        self.buffers.get(index).copied()
    }
}
