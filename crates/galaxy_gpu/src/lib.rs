pub mod backend;
pub mod buffers;
pub mod context;
pub mod dispatch;
pub mod host;
pub mod negotiator;
pub mod wgpu_backend;

pub use backend::{
    ComputeApi, ComputeDevice, DeviceCapabilities, DeviceInfo, KernelLaunch, PlatformInfo,
    ProgramCapabilities,
};
pub use buffers::ParticleBufferSet;
pub use context::SimulationContext;
pub use dispatch::{Dispatch, DispatchRequest, compute_dispatch, recommend_max_bodies};
pub use host::{HostApi, HostDevice, HostLimits};
pub use negotiator::{CompiledProgram, DeviceCapabilityNegotiator, ProgramSource};
pub use wgpu_backend::{WgpuApi, WgpuDevice};
