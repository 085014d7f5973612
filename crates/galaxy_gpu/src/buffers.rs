use galaxy_core::*;

use crate::backend::ComputeDevice;

/// Double-buffered body storage on the device.
///
/// One buffer is read by the next launch and handed to the renderer, the
/// other is written by it. Only `swap` changes which is which.
pub struct ParticleBufferSet<D: ComputeDevice> {
    buffers: [D::Buffer; 2],
    read: BufferRole,
    body_count: usize,
    swaps: u64,
}

impl<D: ComputeDevice> ParticleBufferSet<D> {
    /// Create both buffers for `body_count` bodies. Buffer A starts as read.
    pub fn allocate(device: &D, body_count: usize) -> Result<Self, ResourceError> {
        let body_bytes = std::mem::size_of::<GpuBody>() as u64;
        let bytes = (body_count as u64)
            .checked_mul(body_bytes)
            .ok_or(ResourceError::HostOutOfMemory { bytes: u64::MAX })?;

        let limit = device.capabilities().max_buffer_bytes;
        if bytes > limit {
            return Err(ResourceError::BufferTooLarge { bytes, limit });
        }

        // The host mirror used for uploads and downloads must fit as well
        let mut mirror: Vec<GpuBody> = Vec::new();
        mirror
            .try_reserve_exact(body_count)
            .map_err(|_| ResourceError::HostOutOfMemory { bytes })?;
        drop(mirror);

        let create = |label| {
            device
                .create_buffer(label, bytes)
                .map_err(|kind| ResourceError::DeviceAllocation { kind, bytes })
        };
        let a = create("particles_a")?;
        let b = create("particles_b")?;

        Ok(Self {
            buffers: [a, b],
            read: BufferRole::A,
            body_count,
            swaps: 0,
        })
    }

    /// Copy `bodies` into the write buffer
    pub fn upload(&self, device: &D, bodies: &[Body]) -> Result<(), EngineError> {
        self.write_into(device, self.write_buffer(), bodies)
    }

    /// Read the current read buffer back to the host
    pub fn download(&self, device: &D) -> Result<Vec<Body>, DeviceError> {
        let raw = device.read_buffer(self.read_buffer(), self.body_count)?;
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, body)| body.to_body(i as u32))
            .collect())
    }

    /// Replace the current population in place. Roles and the swap count
    /// are untouched; only completed steps swap.
    pub fn populate(&mut self, device: &D, bodies: &[Body]) -> Result<(), EngineError> {
        self.write_into(device, self.read_buffer(), bodies)
    }

    pub fn swap(&mut self) {
        self.read = self.read.other();
        self.swaps += 1;
    }

    pub fn read_buffer(&self) -> &D::Buffer {
        &self.buffers[self.read.index()]
    }

    pub fn write_buffer(&self) -> &D::Buffer {
        &self.buffers[self.read.other().index()]
    }

    pub fn read_role(&self) -> BufferRole {
        self.read
    }

    pub fn write_role(&self) -> BufferRole {
        self.read.other()
    }

    pub fn body_count(&self) -> usize {
        self.body_count
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps
    }

    fn write_into(&self, device: &D, buffer: &D::Buffer, bodies: &[Body]) -> Result<(), EngineError> {
        if bodies.len() != self.body_count {
            return Err(ConfigError::TooFewBodies {
                required: self.body_count,
                found: bodies.len(),
            }
            .into());
        }

        let mut staging: Vec<GpuBody> = Vec::new();
        staging
            .try_reserve_exact(bodies.len())
            .map_err(|_| ResourceError::HostOutOfMemory {
                bytes: (bodies.len() * std::mem::size_of::<GpuBody>()) as u64,
            })?;
        staging.extend(bodies.iter().map(GpuBody::from));

        device.write_buffer(buffer, &staging)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ComputeApi;
    use crate::host::{HostApi, HostDevice, HostLimits};

    fn bodies(n: u32) -> Vec<Body> {
        (0..n)
            .map(|i| Body::new(i, [i as f32, 0.0, 0.0], [0.0, 0.1, 0.0], 1.0 + i as f32))
            .collect()
    }

    #[test]
    fn populate_then_download_returns_bodies() {
        let device = HostApi::default().open_device(0, 0).unwrap();
        let mut set = ParticleBufferSet::<HostDevice>::allocate(&device, 10).unwrap();
        assert_eq!(set.read_role(), BufferRole::A);

        set.populate(&device, &bodies(10)).unwrap();
        assert_eq!(set.read_role(), BufferRole::A);
        assert_eq!(set.write_role(), BufferRole::B);
        assert_eq!(set.swap_count(), 0);
        assert_eq!(set.download(&device).unwrap(), bodies(10));

        set.swap();
        assert_eq!(set.read_role(), BufferRole::B);
        assert_eq!(set.swap_count(), 1);
    }

    #[test]
    fn upload_does_not_touch_read_buffer() {
        let device = HostApi::default().open_device(0, 0).unwrap();
        let set = ParticleBufferSet::<HostDevice>::allocate(&device, 4).unwrap();
        set.upload(&device, &bodies(4)).unwrap();
        assert!(set.download(&device).unwrap().iter().all(|b| b.mass == 0.0));
    }

    #[test]
    fn mismatched_upload_is_rejected() {
        let device = HostApi::default().open_device(0, 0).unwrap();
        let set = ParticleBufferSet::<HostDevice>::allocate(&device, 8).unwrap();
        assert!(matches!(
            set.upload(&device, &bodies(3)),
            Err(EngineError::Config(ConfigError::TooFewBodies { required: 8, found: 3 }))
        ));
    }

    #[test]
    fn buffer_over_device_limit_is_rejected() {
        let api = HostApi::new(HostLimits {
            max_buffer_bytes: 32 * 100,
            ..HostLimits::default()
        });
        let device = api.open_device(0, 0).unwrap();
        assert!(matches!(
            ParticleBufferSet::<HostDevice>::allocate(&device, 101),
            Err(ResourceError::BufferTooLarge { bytes: 3232, limit: 3200 })
        ));
        assert!(ParticleBufferSet::<HostDevice>::allocate(&device, 100).is_ok());
    }

    #[test]
    fn empty_set_is_a_device_allocation_error() {
        let device = HostApi::default().open_device(0, 0).unwrap();
        assert!(matches!(
            ParticleBufferSet::<HostDevice>::allocate(&device, 0),
            Err(ResourceError::DeviceAllocation {
                kind: DeviceError::InvalidBufferSize,
                bytes: 0
            })
        ));
    }
}
