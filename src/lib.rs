//! GPU-resident 2D stable fluids orchestrated through compute shaders.

pub mod analysis;
pub mod capture;
pub mod command;
pub mod config;
pub mod controller;
pub mod device;
pub mod exposure;
pub mod field;
pub mod input;
pub mod registry;
pub mod simulation;
pub mod stage;
pub mod uniforms;

#[cfg(feature = "gpu")]
pub mod gpu;

#[cfg(feature = "gpu")]
pub mod viewer;

pub use analysis::{AnalysisRecorder, FieldSnapshot, FluidMetrics};
pub use capture::{CaptureError, FrameCapture, HdrFrame};
pub use command::{CommandStream, HazardError};
pub use config::{ConfigError, SimulationConfig};
pub use device::{DeviceError, GpuDevice, HeadlessDevice};
pub use field::{Extent, FieldId, FieldSet, PingPong};
pub use input::{FrameContext, InputMask};
pub use registry::{GlobalHeap, ResourceIndex, ResourceRegistry};
pub use simulation::{FrameStats, PresentationHandles, RecompileReport, Simulation, SimulationError};
pub use stage::{ComputeStage, ShaderError, StageKind};
pub use uniforms::{SimulationUniforms, TransientUniforms};

#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, WgpuDevice};

#[cfg(feature = "gpu")]
pub use viewer::ViewerApp;
