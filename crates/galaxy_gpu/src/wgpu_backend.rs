use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bevy::prelude::*;
use futures::channel::oneshot;
use galaxy_core::*;
use wgpu::util::DeviceExt;

use crate::backend::*;

/// GPU backend on wgpu. Platforms are wgpu backends (Vulkan, Metal, Dx12,
/// Gl), devices are the adapters each backend exposes.
pub struct WgpuApi {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuApi {
    pub fn new(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self { instance, backends }
    }

    /// Adapters grouped by backend, in enumeration order
    fn grouped_adapters(&self) -> Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> {
        let mut groups: Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> = Vec::new();
        for adapter in self.instance.enumerate_adapters(self.backends) {
            let backend = adapter.get_info().backend;
            match groups.iter_mut().find(|(b, _)| *b == backend) {
                Some((_, adapters)) => adapters.push(adapter),
                None => groups.push((backend, vec![adapter])),
            }
        }
        groups
    }
}

impl Default for WgpuApi {
    fn default() -> Self {
        Self::new(wgpu::Backends::all())
    }
}

impl ComputeApi for WgpuApi {
    type Device = WgpuDevice;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>, DeviceError> {
        Ok(self
            .grouped_adapters()
            .into_iter()
            .enumerate()
            .map(|(index, (backend, adapters))| PlatformInfo {
                index,
                name: format!("{backend:?}"),
                devices: adapters
                    .iter()
                    .enumerate()
                    .map(|(index, adapter)| {
                        let info = adapter.get_info();
                        DeviceInfo {
                            index,
                            name: info.name,
                            kind: format!("{:?}", info.device_type),
                        }
                    })
                    .collect(),
            })
            .collect())
    }

    fn open_device(&self, platform: usize, device: usize) -> Result<WgpuDevice, DeviceError> {
        let mut groups = self.grouped_adapters();
        if groups.is_empty() {
            return Err(DeviceError::DeviceNotFound);
        }
        if platform >= groups.len() {
            return Err(DeviceError::InvalidPlatform);
        }
        let (backend, mut adapters) = groups.swap_remove(platform);
        if adapters.is_empty() {
            return Err(DeviceError::DeviceNotFound);
        }
        if device >= adapters.len() {
            return Err(DeviceError::InvalidDevice);
        }
        let adapter = adapters.swap_remove(device);
        let info = adapter.get_info();
        let limits = adapter.limits();

        let (gpu, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("galaxy_compute"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| {
            error!("Could not open {}: {e}", info.name);
            DeviceError::DeviceNotAvailable
        })?;

        gpu.on_uncaptured_error(Box::new(|e: wgpu::Error| {
            error!("Uncaptured device error: {e}");
        }));

        let invocations = limits.max_compute_invocations_per_workgroup;
        let capabilities = DeviceCapabilities {
            platform,
            device,
            platform_name: format!("{backend:?}"),
            device_name: info.name.clone(),
            compute_units: None,
            max_work_group_size: invocations,
            local_memory_bytes: limits.max_compute_workgroup_storage_size as u64,
            max_buffer_bytes: (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size),
            max_work_groups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_work_dimensions: 3,
            extensions: adapter
                .features()
                .iter_names()
                .map(|(name, _)| name.to_string())
                .collect(),
        };
        let kernel = ProgramCapabilities {
            kernel_max_work_group_size: limits.max_compute_workgroup_size_x.min(invocations),
        };

        let layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("nbody_bind_group_layout"),
            entries: &[
                // bodies_in (read)
                storage_entry(0, true),
                // bodies_out (read_write)
                storage_entry(1, false),
                // params (uniform)
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = gpu.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("nbody_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let params = gpu.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("step_params"),
            contents: bytemuck::bytes_of(&StepParams::new(DT_YEARS, SOFTENING, 0)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok(WgpuDevice {
            capabilities,
            kernel,
            params,
            pipeline_layout,
            layout,
            queue,
            device: gpu,
        })
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub struct WgpuDevice {
    capabilities: DeviceCapabilities,
    kernel: ProgramCapabilities,
    params: wgpu::Buffer,
    pipeline_layout: wgpu::PipelineLayout,
    layout: wgpu::BindGroupLayout,
    queue: wgpu::Queue,
    device: wgpu::Device,
}

pub struct WgpuProgram {
    pipeline: wgpu::ComputePipeline,
}

/// Completion marker backed by `Queue::on_submitted_work_done`
pub struct WgpuFence {
    receiver: Mutex<oneshot::Receiver<()>>,
    done: AtomicBool,
}

impl WgpuDevice {
    fn scope_error(&self) -> Option<wgpu::Error> {
        pollster::block_on(self.device.pop_error_scope())
    }
}

fn format_compilation_log(info: &wgpu::CompilationInfo) -> String {
    info.messages
        .iter()
        .map(|m| match &m.location {
            Some(at) => format!(
                "{:?} {}:{}: {}",
                m.message_type, at.line_number, at.line_position, m.message
            ),
            None => format!("{:?}: {}", m.message_type, m.message),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl ComputeDevice for WgpuDevice {
    type Program = WgpuProgram;
    type Buffer = wgpu::Buffer;
    type Fence = WgpuFence;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn kernel_capabilities(&self) -> ProgramCapabilities {
        self.kernel
    }

    fn compile(&self, source: &str, entry_point: &str) -> Result<WgpuProgram, BuildError> {
        let build_error = |log: String| BuildError {
            device: self.capabilities.to_string(),
            log,
        };
        if source.trim().is_empty() {
            return Err(build_error("error: program source is empty".into()));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("nbody_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let info = pollster::block_on(module.get_compilation_info());
        let mut log = format_compilation_log(&info);
        let failed = info
            .messages
            .iter()
            .any(|m| m.message_type == wgpu::CompilationMessageType::Error);
        if let Some(e) = self.scope_error() {
            if log.is_empty() {
                log = e.to_string();
            }
            return Err(build_error(log));
        }
        if failed {
            return Err(build_error(log));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("nbody_compute_pipeline"),
                layout: Some(&self.pipeline_layout),
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(e) = self.scope_error() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(&e.to_string());
            return Err(build_error(log));
        }

        if !log.is_empty() {
            info!("Build log:\n{log}");
        }
        Ok(WgpuProgram { pipeline })
    }

    fn create_buffer(&self, label: &str, bytes: u64) -> Result<wgpu::Buffer, DeviceError> {
        if bytes == 0 || bytes > self.capabilities.max_buffer_bytes {
            return Err(DeviceError::InvalidBufferSize);
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let invalid = self.scope_error();
        let out_of_memory = self.scope_error();
        if out_of_memory.is_some() {
            return Err(DeviceError::MemObjectAllocationFailure);
        }
        if let Some(e) = invalid {
            warn!("Buffer {label} rejected: {e}");
            return Err(DeviceError::InvalidBufferSize);
        }
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, bodies: &[GpuBody]) -> Result<(), DeviceError> {
        let bytes: &[u8] = bytemuck::cast_slice(bodies);
        if bytes.len() as u64 > buffer.size() {
            return Err(DeviceError::InvalidValue);
        }
        self.queue.write_buffer(buffer, 0, bytes);
        Ok(())
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer, count: usize) -> Result<Vec<GpuBody>, DeviceError> {
        let bytes = (count * std::mem::size_of::<GpuBody>()) as u64;
        if bytes > buffer.size() {
            return Err(DeviceError::InvalidValue);
        }
        if bytes == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(rx) {
            Ok(Ok(())) => {}
            _ => return Err(DeviceError::MapFailure),
        }

        let data = slice.get_mapped_range();
        let bodies: Vec<GpuBody> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(bodies)
    }

    fn enqueue_kernel(
        &self,
        program: &WgpuProgram,
        launch: &KernelLaunch<'_, wgpu::Buffer>,
    ) -> Result<(), DeviceError> {
        if launch.dispatch.local_size == 0
            || launch.dispatch.local_size > self.kernel.kernel_max_work_group_size
            || launch.dispatch.global_size % launch.dispatch.local_size != 0
        {
            return Err(DeviceError::InvalidWorkGroupSize);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&launch.params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("nbody_bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: launch.input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: launch.output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nbody_compute_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("nbody_compute_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(launch.dispatch.work_groups(), 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(e) = self.scope_error() {
            error!("Kernel launch rejected: {e}");
            return Err(DeviceError::InvalidKernel);
        }
        Ok(())
    }

    fn enqueue_marker(&self) -> Result<WgpuFence, DeviceError> {
        let (tx, rx) = oneshot::channel();
        self.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        Ok(WgpuFence {
            receiver: Mutex::new(rx),
            done: AtomicBool::new(false),
        })
    }

    fn await_completion(&self, fence: &WgpuFence, timeout: Duration) -> Result<bool, DeviceError> {
        if fence.done.load(Ordering::Acquire) {
            return Ok(true);
        }
        let mut receiver = fence.receiver.lock().map_err(|_| DeviceError::InvalidEvent)?;
        let started = Instant::now();
        loop {
            let _ = self.device.poll(wgpu::Maintain::Poll);
            match receiver.try_recv() {
                Ok(Some(())) => {
                    fence.done.store(true, Ordering::Release);
                    return Ok(true);
                }
                Ok(None) => {}
                Err(_) => return Err(DeviceError::InvalidEvent),
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            spin_sleep::sleep(Duration::from_micros(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    // Skips quietly on machines without an adapter
    fn open() -> Option<WgpuDevice> {
        let api = WgpuApi::default();
        let platforms = api.platforms().ok()?;
        let platform = platforms.iter().find(|p| !p.devices.is_empty())?;
        api.open_device(platform.index, 0).ok()
    }

    #[test]
    fn invalid_platform_is_reported() {
        let api = WgpuApi::default();
        let count = api.platforms().map(|p| p.len()).unwrap_or(0);
        let err = api.open_device(count + 5, 0).err();
        if count == 0 {
            assert_eq!(err, Some(DeviceError::DeviceNotFound));
        } else {
            assert_eq!(err, Some(DeviceError::InvalidPlatform));
        }
    }

    #[test]
    fn broken_shader_surfaces_build_log() {
        let Some(device) = open() else {
            return;
        };
        let err = device
            .compile("fn step( { this is not wgsl", KERNEL_ENTRY_POINT)
            .err();
        let err = err.expect("broken source must not build");
        assert!(!err.log.is_empty());
    }

    #[test]
    fn kernel_matches_host_integrator() {
        let Some(device) = open() else {
            return;
        };
        let bodies: Vec<GpuBody> = (0..64)
            .map(|i| {
                let x = i as f32;
                GpuBody::from(&Body::new(i, [x, (x * 0.5).sin(), 0.0], [0.0; 3], 1_000.0))
            })
            .collect();
        let params = StepParams::new(10_000.0, SOFTENING, 64);
        let source = crate::negotiator::ProgramSource::builtin().specialize(64);
        let Ok(program) = device.compile(&source, KERNEL_ENTRY_POINT) else {
            return;
        };
        let input = device.create_buffer("in", 64 * 32).unwrap();
        let output = device.create_buffer("out", 64 * 32).unwrap();
        device.write_buffer(&input, &bodies).unwrap();
        device
            .enqueue_kernel(
                &program,
                &KernelLaunch {
                    input: &input,
                    output: &output,
                    dispatch: crate::dispatch::Dispatch {
                        local_size: 64,
                        global_size: 64,
                    },
                    params,
                },
            )
            .unwrap();
        let fence = device.enqueue_marker().unwrap();
        assert!(device.await_completion(&fence, Duration::from_secs(10)).unwrap());

        let gpu = device.read_buffer(&output, 64).unwrap();
        let mut host = vec![GpuBody::zeroed(); 64];
        galaxy_physics::forces::integrate(&bodies, &mut host, &params);
        for (g, h) in gpu.iter().zip(&host) {
            for k in 0..3 {
                approx::assert_relative_eq!(g.position[k], h.position[k], max_relative = 1e-4, epsilon = 1e-5);
            }
            assert_eq!(g.mass(), h.mass());
        }
    }
}
