//! The per-frame command log and its hazard checker.
//!
//! A `CommandStream` is a linear, append-only list owned by the frame. The
//! orchestrator borrows it for the duration of one update; the device drains
//! it on submit. Transitions and buffer barriers are recorded explicitly so
//! the barrier chain can be checked on the CPU, even though the wgpu backend
//! derives its own synchronization from resource usage.

use crate::device::{BufferHandle, ImageHandle, MaterialHandle, PipelineHandle};
use crate::stage::StagePushConstants;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    /// Storage access, both directions.
    General,
    ShaderReadOnly,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Compute,
    Fragment,
}

/// How a dispatch touches one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    /// Filtered read through a sampler.
    Sample(ImageHandle),
    /// Unfiltered texel load.
    Load(ImageHandle),
    Store(ImageHandle),
    /// Read-write structured buffer.
    Buffer(BufferHandle),
}

impl ResourceAccess {
    pub fn image(&self) -> Option<ImageHandle> {
        match *self {
            ResourceAccess::Sample(image)
            | ResourceAccess::Load(image)
            | ResourceAccess::Store(image) => Some(image),
            ResourceAccess::Buffer(_) => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, ResourceAccess::Store(_) | ResourceAccess::Buffer(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TransitionImage {
        image: ImageHandle,
        layout: ImageLayout,
        access: Access,
        stage: PipelineStage,
    },
    BufferBarrier {
        buffer: BufferHandle,
    },
    BindPipeline(PipelineHandle),
    BindMaterial {
        material: MaterialHandle,
        uniform_offset: u32,
        access: Arc<[ResourceAccess]>,
    },
    PushConstants(StagePushConstants),
    Dispatch {
        groups: [u32; 3],
    },
}

#[derive(Debug, Default, Clone)]
pub struct CommandStream {
    commands: Vec<Command>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn transition_image(
        &mut self,
        image: ImageHandle,
        layout: ImageLayout,
        access: Access,
        stage: PipelineStage,
    ) {
        self.push(Command::TransitionImage {
            image,
            layout,
            access,
            stage,
        });
    }

    /// Shorthand for the storage transition every compute write target needs.
    pub fn transition_general(&mut self, image: ImageHandle, access: Access) {
        self.transition_image(image, ImageLayout::General, access, PipelineStage::Compute);
    }

    pub fn transition_read_only(&mut self, image: ImageHandle, stage: PipelineStage) {
        self.transition_image(image, ImageLayout::ShaderReadOnly, Access::READ, stage);
    }

    pub fn buffer_barrier(&mut self, buffer: BufferHandle) {
        self.push(Command::BufferBarrier { buffer });
    }

    pub fn dispatches_since(&self, start: usize) -> usize {
        self.commands[start.min(self.commands.len())..]
            .iter()
            .filter(|c| matches!(c, Command::Dispatch { .. }))
            .count()
    }

    /// Replays everything recorded from `start` and reports the first hazard.
    ///
    /// Image state is tracked from scratch: a dispatch may only touch images
    /// transitioned earlier in the checked range.
    pub fn validate_from(&self, start: usize) -> Result<(), HazardError> {
        let mut checker = HazardChecker::default();
        for (offset, command) in self.commands[start.min(self.commands.len())..]
            .iter()
            .enumerate()
        {
            checker.apply(start + offset, command)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), HazardError> {
        self.validate_from(0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HazardError {
    #[error("command {command}: image {image:?} used before any transition")]
    Untracked { command: usize, image: ImageHandle },
    #[error("command {command}: image {image:?} is {found:?}/{access:?} at {stage:?}, {needed} access needs {expected}")]
    Layout {
        command: usize,
        image: ImageHandle,
        needed: &'static str,
        expected: &'static str,
        found: ImageLayout,
        access: Access,
        stage: PipelineStage,
    },
    #[error("command {command}: read of {image:?} after write without a barrier")]
    ReadAfterWrite { command: usize, image: ImageHandle },
    #[error("command {command}: write of {image:?} after read without a barrier")]
    WriteAfterRead { command: usize, image: ImageHandle },
    #[error("command {command}: write of {image:?} after write without a barrier")]
    WriteAfterWrite { command: usize, image: ImageHandle },
    #[error("command {command}: image {image:?} is both read and written by one dispatch")]
    ReadWriteAlias { command: usize, image: ImageHandle },
    #[error("command {command}: buffer {buffer:?} reused without a buffer barrier")]
    BufferReuse { command: usize, buffer: BufferHandle },
    #[error("command {command}: dispatch without a bound {missing}")]
    Unbound {
        command: usize,
        missing: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
struct ImageState {
    layout: ImageLayout,
    access: Access,
    stage: PipelineStage,
    read: bool,
    written: bool,
}

#[derive(Debug, Default)]
struct HazardChecker {
    images: HashMap<ImageHandle, ImageState>,
    /// Buffers touched since their last barrier.
    pending_buffers: HashMap<BufferHandle, bool>,
    pipeline: Option<PipelineHandle>,
    material: Option<Arc<[ResourceAccess]>>,
}

impl HazardChecker {
    fn apply(&mut self, index: usize, command: &Command) -> Result<(), HazardError> {
        match command {
            Command::TransitionImage {
                image,
                layout,
                access,
                stage,
            } => {
                self.images.insert(
                    *image,
                    ImageState {
                        layout: *layout,
                        access: *access,
                        stage: *stage,
                        read: false,
                        written: false,
                    },
                );
            }
            Command::BufferBarrier { buffer } => {
                self.pending_buffers.insert(*buffer, false);
            }
            Command::BindPipeline(pipeline) => self.pipeline = Some(*pipeline),
            Command::BindMaterial { access, .. } => self.material = Some(access.clone()),
            Command::PushConstants(_) => {}
            Command::Dispatch { .. } => self.dispatch(index)?,
        }
        Ok(())
    }

    fn dispatch(&mut self, index: usize) -> Result<(), HazardError> {
        if self.pipeline.is_none() {
            return Err(HazardError::Unbound {
                command: index,
                missing: "pipeline",
            });
        }
        let Some(accesses) = self.material.clone() else {
            return Err(HazardError::Unbound {
                command: index,
                missing: "material",
            });
        };

        for access in accesses.iter() {
            let Some(image) = access.image() else {
                continue;
            };
            let aliased = accesses
                .iter()
                .any(|other| other.image() == Some(image) && other.is_write() != access.is_write());
            if aliased {
                return Err(HazardError::ReadWriteAlias {
                    command: index,
                    image,
                });
            }
        }

        // Check every access against the state left by earlier dispatches
        // before recording this dispatch's own effects.
        for access in accesses.iter() {
            match *access {
                ResourceAccess::Buffer(buffer) => {
                    if self.pending_buffers.get(&buffer).copied().unwrap_or(false) {
                        return Err(HazardError::BufferReuse {
                            command: index,
                            buffer,
                        });
                    }
                }
                ResourceAccess::Sample(image) | ResourceAccess::Load(image) => {
                    let state = self.state(index, image)?;
                    let readable = match access {
                        ResourceAccess::Sample(_) => matches!(
                            state.layout,
                            ImageLayout::ShaderReadOnly | ImageLayout::General
                        ),
                        _ => state.layout == ImageLayout::General,
                    };
                    if !readable
                        || !state.access.contains(Access::READ)
                        || state.stage != PipelineStage::Compute
                    {
                        return Err(layout_error(index, image, &state, *access));
                    }
                    if state.written {
                        return Err(HazardError::ReadAfterWrite {
                            command: index,
                            image,
                        });
                    }
                }
                ResourceAccess::Store(image) => {
                    let state = self.state(index, image)?;
                    if state.layout != ImageLayout::General
                        || !state.access.contains(Access::WRITE)
                        || state.stage != PipelineStage::Compute
                    {
                        return Err(layout_error(index, image, &state, *access));
                    }
                    if state.written {
                        return Err(HazardError::WriteAfterWrite {
                            command: index,
                            image,
                        });
                    }
                    if state.read {
                        return Err(HazardError::WriteAfterRead {
                            command: index,
                            image,
                        });
                    }
                }
            }
        }

        for access in accesses.iter() {
            match *access {
                ResourceAccess::Buffer(buffer) => {
                    self.pending_buffers.insert(buffer, true);
                }
                ResourceAccess::Sample(image) | ResourceAccess::Load(image) => {
                    if let Some(state) = self.images.get_mut(&image) {
                        state.read = true;
                    }
                }
                ResourceAccess::Store(image) => {
                    if let Some(state) = self.images.get_mut(&image) {
                        state.written = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn state(&self, index: usize, image: ImageHandle) -> Result<ImageState, HazardError> {
        self.images
            .get(&image)
            .copied()
            .ok_or(HazardError::Untracked {
                command: index,
                image,
            })
    }
}

fn layout_error(
    index: usize,
    image: ImageHandle,
    state: &ImageState,
    access: ResourceAccess,
) -> HazardError {
    let (needed, expected) = match access {
        ResourceAccess::Sample(_) => ("sampled", "ShaderReadOnly or General with READ at Compute"),
        ResourceAccess::Load(_) => ("load", "General with READ at Compute"),
        _ => ("store", "General with WRITE at Compute"),
    };
    HazardError::Layout {
        command: index,
        image,
        needed,
        expected,
        found: state.layout,
        access: state.access,
        stage: state.stage,
    }
}
