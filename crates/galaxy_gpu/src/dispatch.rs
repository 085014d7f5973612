use bevy::prelude::*;
use galaxy_core::*;

use crate::backend::{DeviceCapabilities, ProgramCapabilities};

/// What the caller wants to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRequest {
    pub body_count: u32,
    /// Only single-dimension launches are supported
    pub dimensions: u32,
}

impl DispatchRequest {
    pub fn linear(body_count: u32) -> Self {
        Self {
            body_count,
            dimensions: 1,
        }
    }
}

/// Launch geometry for one force/integration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub local_size: u32,
    pub global_size: u32,
}

impl Dispatch {
    pub fn work_groups(&self) -> u32 {
        self.global_size / self.local_size.max(1)
    }
}

/// How many bodies fit into `local_memory_bytes` at `per_body_bytes` each
pub fn recommend_max_bodies(local_memory_bytes: u64, per_body_bytes: u64) -> u64 {
    if per_body_bytes == 0 {
        return 0;
    }
    local_memory_bytes / per_body_bytes
}

/// Work-group memory one group of the force kernel needs. The tile is
/// sized by the group, not by how many bodies are left to fill it.
pub fn tile_footprint(local_size: u32) -> u64 {
    local_size as u64 * TILE_BYTES_PER_BODY
}

fn floor_power_of_two(value: u32) -> u32 {
    if value == 0 {
        0
    } else {
        1 << (31 - value.leading_zeros())
    }
}

/// Derive a safe launch from device and kernel limits.
///
/// The local size is the largest power of two allowed by both limits (and not
/// above the population rounded up to a power of two); halving from there,
/// the first size that evenly tiles the population wins. The global size is
/// the smallest multiple of the local size covering every body.
pub fn compute_dispatch(
    device: &DeviceCapabilities,
    kernel: &ProgramCapabilities,
    request: &DispatchRequest,
) -> Result<Dispatch, EngineError> {
    if request.dimensions >= 2 {
        return Err(ConfigError::UnsupportedDimensions {
            requested: request.dimensions,
        }
        .into());
    }
    let count = request.body_count;
    if count == 0 {
        return Err(ConfigError::TooFewBodies {
            required: MIN_BODY_COUNT as usize,
            found: 0,
        }
        .into());
    }

    info!("Device max work group size: {}", device.max_work_group_size);
    info!("Kernel max work group size: {}", kernel.kernel_max_work_group_size);
    info!("Available local memory: {} bytes", device.local_memory_bytes);
    info!(
        "Recommended max bodies: {}",
        recommend_max_bodies(device.local_memory_bytes, TILE_BYTES_PER_BODY)
    );

    let limit = device
        .max_work_group_size
        .min(kernel.kernel_max_work_group_size)
        .min(count.checked_next_power_of_two().unwrap_or(u32::MAX));
    let largest = floor_power_of_two(limit);
    if largest == 0 {
        return Err(DeviceError::InvalidWorkGroupSize.into());
    }

    let floor = MIN_LOCAL_SIZE.min(largest);
    let mut candidate = largest;
    let mut local = largest;
    while candidate >= floor {
        if count % candidate == 0 {
            local = candidate;
            break;
        }
        candidate /= 2;
    }

    let groups = (count as u64).div_ceil(local as u64);
    if groups > device.max_work_groups_per_dimension as u64 {
        return Err(ResourceError::TooManyWorkGroups {
            groups,
            limit: device.max_work_groups_per_dimension as u64,
        }
        .into());
    }
    let global = u32::try_from(groups * local as u64).map_err(|_| ResourceError::TooManyWorkGroups {
        groups,
        limit: device.max_work_groups_per_dimension as u64,
    })?;

    let footprint = tile_footprint(local);
    if footprint > device.local_memory_bytes {
        error!(
            "Local memory is too small! Required {} byte(s), available {}",
            footprint, device.local_memory_bytes
        );
        return Err(ResourceError::LocalMemoryTooSmall {
            required: footprint,
            available: device.local_memory_bytes,
        }
        .into());
    }

    info!("Local work size: {local}, global work size: {global}");
    Ok(Dispatch {
        local_size: local,
        global_size: global,
    })
}
