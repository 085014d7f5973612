use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Closed taxonomy of compute-device failures.
///
/// Every failure reported by a compute backend maps onto exactly one of these
/// kinds so callers can branch on the kind instead of matching message text.
/// Display text comes from [`DeviceError::description`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    BadCode,
    InvalidValue,
    OutOfHostMemory,
    OutOfResources,
    InvalidPlatform,
    InvalidDeviceType,
    DeviceNotFound,
    InvalidDevice,
    DeviceNotAvailable,
    InvalidContext,
    InvalidCommandQueue,
    InvalidBufferSize,
    MemObjectAllocationFailure,
    InvalidMemObject,
    MapFailure,
    InvalidProgram,
    InvalidBuildOptions,
    InvalidOperation,
    CompilerNotAvailable,
    BuildProgramFailure,
    InvalidProgramExecutable,
    InvalidKernelName,
    InvalidKernel,
    InvalidArgIndex,
    InvalidArgValue,
    InvalidArgSize,
    InvalidWorkDimension,
    InvalidGlobalWorkSize,
    InvalidWorkGroupSize,
    InvalidEvent,
    CompletionTimeout,
}

const DESCRIPTIONS: &[(DeviceError, &str)] = &[
    (DeviceError::BadCode, "Bad error code"),
    (DeviceError::InvalidValue, "Invalid arguments"),
    (
        DeviceError::OutOfHostMemory,
        "Failure to allocate resources required by the compute implementation on the host",
    ),
    (
        DeviceError::OutOfResources,
        "Failure to allocate resources required by the compute implementation on the device",
    ),
    (DeviceError::InvalidPlatform, "Invalid platform"),
    (DeviceError::InvalidDeviceType, "Invalid device type"),
    (DeviceError::DeviceNotFound, "No compute devices were found"),
    (DeviceError::InvalidDevice, "Devices list contains an invalid device"),
    (
        DeviceError::DeviceNotAvailable,
        "A device is currently not available even though it was enumerated",
    ),
    (DeviceError::InvalidContext, "Invalid context"),
    (DeviceError::InvalidCommandQueue, "Invalid command queue"),
    (
        DeviceError::InvalidBufferSize,
        "Buffer size is 0 or greater than the device allocation limit",
    ),
    (
        DeviceError::MemObjectAllocationFailure,
        "Failure to allocate memory for buffer object",
    ),
    (DeviceError::InvalidMemObject, "Invalid mem object"),
    (
        DeviceError::MapFailure,
        "Failure to map the requested region into the host address space",
    ),
    (DeviceError::InvalidProgram, "Invalid program"),
    (DeviceError::InvalidBuildOptions, "Invalid build options"),
    (DeviceError::InvalidOperation, "Invalid operation"),
    (DeviceError::CompilerNotAvailable, "Compiler not available"),
    (
        DeviceError::BuildProgramFailure,
        "Failure to build the program executable",
    ),
    (
        DeviceError::InvalidProgramExecutable,
        "No successfully built executable for program",
    ),
    (DeviceError::InvalidKernelName, "Kernel name is not found in program"),
    (DeviceError::InvalidKernel, "Invalid kernel"),
    (DeviceError::InvalidArgIndex, "Invalid argument index"),
    (DeviceError::InvalidArgValue, "Invalid argument value"),
    (DeviceError::InvalidArgSize, "Invalid argument size"),
    (DeviceError::InvalidWorkDimension, "Invalid work dimension"),
    (DeviceError::InvalidGlobalWorkSize, "Invalid global work size"),
    (DeviceError::InvalidWorkGroupSize, "Invalid work group size"),
    (DeviceError::InvalidEvent, "Invalid event"),
    (
        DeviceError::CompletionTimeout,
        "Completion marker was not signalled in time",
    ),
];

impl DeviceError {
    pub const ALL: [DeviceError; 31] = [
        Self::BadCode,
        Self::InvalidValue,
        Self::OutOfHostMemory,
        Self::OutOfResources,
        Self::InvalidPlatform,
        Self::InvalidDeviceType,
        Self::DeviceNotFound,
        Self::InvalidDevice,
        Self::DeviceNotAvailable,
        Self::InvalidContext,
        Self::InvalidCommandQueue,
        Self::InvalidBufferSize,
        Self::MemObjectAllocationFailure,
        Self::InvalidMemObject,
        Self::MapFailure,
        Self::InvalidProgram,
        Self::InvalidBuildOptions,
        Self::InvalidOperation,
        Self::CompilerNotAvailable,
        Self::BuildProgramFailure,
        Self::InvalidProgramExecutable,
        Self::InvalidKernelName,
        Self::InvalidKernel,
        Self::InvalidArgIndex,
        Self::InvalidArgValue,
        Self::InvalidArgSize,
        Self::InvalidWorkDimension,
        Self::InvalidGlobalWorkSize,
        Self::InvalidWorkGroupSize,
        Self::InvalidEvent,
        Self::CompletionTimeout,
    ];

    pub fn description(self) -> &'static str {
        DESCRIPTIONS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, text)| *text)
            .unwrap_or("Bad error code")
    }

    /// Allocation failures are fatal resource conditions
    pub fn is_allocation_failure(self) -> bool {
        matches!(
            self,
            Self::OutOfHostMemory | Self::OutOfResources | Self::MemObjectAllocationFailure
        )
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Two or more dimensions is not supported (requested {requested})")]
    UnsupportedDimensions { requested: u32 },

    #[error("Invalid {name} range: min {min} > max {max}")]
    InvalidRange {
        name: &'static str,
        min: f32,
        max: f32,
    },

    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f32 },

    #[error("{name} must be positive, got {value}")]
    NonPositiveMass { name: &'static str, value: f32 },

    #[error("Insufficient number of bodies. Required: {required}, got {found}")]
    TooFewBodies { required: usize, found: usize },

    #[error("Step size must be a positive number of years, got {0}")]
    InvalidStepSize(f32),

    #[error("Body index {index} is out of range for {count} bodies")]
    BodyIndexOutOfRange { index: usize, count: usize },

    #[error("Cannot {operation} while the scheduler is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("Out of memory! Could not reserve {bytes} bytes on the host")]
    HostOutOfMemory { bytes: u64 },

    #[error("Could not allocate {bytes} bytes on the device: {kind}")]
    DeviceAllocation { kind: DeviceError, bytes: u64 },

    #[error("Buffer of {bytes} bytes exceeds the device limit of {limit} bytes")]
    BufferTooLarge { bytes: u64, limit: u64 },

    #[error("Local memory is too small! Required {required} byte(s), available {available}")]
    LocalMemoryTooSmall { required: u64, available: u64 },

    #[error("Dispatch needs {groups} work groups, device allows {limit}")]
    TooManyWorkGroups { groups: u64, limit: u64 },
}

/// Program compilation failure with the compiler's log
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Failure to build the program for {device}. Build log:\n{log}")]
pub struct BuildError {
    pub device: String,
    pub log: String,
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("Error open file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error writing data to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file magic: {found:?}")]
    BadMagic { found: [u8; 4] },

    #[error("Invalid file version: {found}")]
    BadVersion { found: u32 },

    #[error("Insufficient number of bodies. Required: {required}, in file: {found}")]
    InsufficientBodies { required: usize, found: usize },

    #[error("Error reading data: {reason}")]
    ReadFailure { reason: String },
}

/// Any failure the engine surfaces to its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Dispatch-time condition that survived the local retry; the step may be
    /// attempted again
    #[error("Transient device condition: {0}")]
    Transient(DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl EngineError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_device_error_has_its_own_text() {
        assert_eq!(DESCRIPTIONS.len(), DeviceError::ALL.len());
        let mut seen = HashSet::new();
        for kind in DeviceError::ALL {
            let entries = DESCRIPTIONS.iter().filter(|(k, _)| *k == kind).count();
            assert_eq!(entries, 1, "{kind:?} must appear exactly once");
            assert!(seen.insert(kind.description()), "{kind:?} shares its text");
        }
    }

    #[test]
    fn device_error_displays_table_text() {
        assert_eq!(DeviceError::InvalidPlatform.to_string(), "Invalid platform");
        assert_eq!(
            EngineError::from(DeviceError::InvalidEvent).to_string(),
            "Device error: Invalid event"
        );
    }

    #[test]
    fn only_transient_errors_are_recoverable() {
        assert!(EngineError::Transient(DeviceError::OutOfResources).is_recoverable());
        assert!(!EngineError::Device(DeviceError::OutOfResources).is_recoverable());
        assert!(
            !EngineError::from(ResourceError::LocalMemoryTooSmall {
                required: 4096,
                available: 1024
            })
            .is_recoverable()
        );
    }
}
