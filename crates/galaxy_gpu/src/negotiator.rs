use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use bevy::prelude::*;
use galaxy_core::*;

use crate::backend::*;
use crate::dispatch::Dispatch;

/// Text of the force/integration kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    name: String,
    text: String,
}

impl ProgramSource {
    /// The WGSL kernel shipped with the crate
    pub fn builtin() -> Self {
        Self {
            name: "nbody.wgsl".into(),
            text: include_str!("../shaders/nbody.wgsl").into(),
        }
    }

    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| IoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            name: path.display().to_string(),
            text,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Source with the work-group size fixed at build time
    pub fn specialize(&self, local_size: u32) -> String {
        if self.text.trim().is_empty() {
            return String::new();
        }
        format!("const WORKGROUP_SIZE: u32 = {local_size}u;\n{}", self.text)
    }
}

/// A built kernel together with the launch it was specialized for
pub struct CompiledProgram<D: ComputeDevice> {
    program: D::Program,
    device_id: String,
    source_hash: u64,
    dispatch: Dispatch,
}

impl<D: ComputeDevice> CompiledProgram<D> {
    pub fn program(&self) -> &D::Program {
        &self.program
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn source_hash(&self) -> u64 {
        self.source_hash
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }
}

fn hash_source(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Enumerates platforms, opens devices and builds the kernel.
///
/// Opened devices are kept per (platform, device) and built programs per
/// (device id, source hash), so reselecting a device reuses earlier builds.
pub struct DeviceCapabilityNegotiator<A: ComputeApi> {
    api: A,
    devices: HashMap<(usize, usize), Arc<A::Device>>,
    programs: HashMap<(String, u64), Arc<CompiledProgram<A::Device>>>,
}

impl<A: ComputeApi> DeviceCapabilityNegotiator<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            devices: HashMap::new(),
            programs: HashMap::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn list_platforms(&self) -> Result<Vec<PlatformInfo>, DeviceError> {
        let platforms = self.api.platforms()?;
        for platform in &platforms {
            info!("Platform {}: {}", platform.index, platform.name);
            for device in &platform.devices {
                info!("  Device {}: {} ({})", device.index, device.name, device.kind);
            }
        }
        Ok(platforms)
    }

    /// Open (or reuse) a device; its capabilities come with the handle
    pub fn select_device(
        &mut self,
        platform: usize,
        device: usize,
    ) -> Result<Arc<A::Device>, DeviceError> {
        if let Some(opened) = self.devices.get(&(platform, device)) {
            debug!("Reusing device {}", opened.capabilities());
            return Ok(Arc::clone(opened));
        }

        let opened = Arc::new(self.api.open_device(platform, device).map_err(|e| {
            error!("Could not open device {platform}:{device} on {}: {e}", self.api.name());
            e
        })?);

        let caps = opened.capabilities();
        info!("Using device: {caps}");
        match caps.compute_units {
            Some(units) => info!("Compute units: {units}"),
            None => info!("Compute units: not reported"),
        }
        if !caps.extensions.is_empty() {
            debug!("Extensions: {}", caps.extensions.join(" "));
        }

        self.devices.insert((platform, device), Arc::clone(&opened));
        Ok(opened)
    }

    /// Build the kernel specialized for `dispatch`, or return the cached build
    pub fn build_program(
        &mut self,
        device: &Arc<A::Device>,
        source: &ProgramSource,
        dispatch: Dispatch,
    ) -> Result<Arc<CompiledProgram<A::Device>>, BuildError> {
        let caps = device.capabilities();
        let text = source.specialize(dispatch.local_size);
        if text.is_empty() {
            return Err(BuildError {
                device: caps.to_string(),
                log: format!("error: program source {} is empty", source.name()),
            });
        }

        let key = (caps.id(), hash_source(&text));
        info!("Program cache entries: {}", self.programs.len());
        if let Some(program) = self.programs.get(&key) {
            debug!("Program cache hit for {}", source.name());
            return Ok(Arc::clone(program));
        }

        let program = device.compile(&text, KERNEL_ENTRY_POINT).map_err(|e| {
            error!("Build log:\n{}", e.log);
            e
        })?;
        let compiled = Arc::new(CompiledProgram {
            program,
            device_id: key.0.clone(),
            source_hash: key.1,
            dispatch,
        });
        self.programs.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Forget a device and everything built for it
    pub fn evict(&mut self, caps: &DeviceCapabilities) {
        let id = caps.id();
        self.devices.remove(&(caps.platform, caps.device));
        self.programs.retain(|(device_id, _), _| *device_id != id);
        warn!("Evicted device {caps} from cache");
    }

    pub fn clear_cache(&mut self) {
        self.devices.clear();
        self.programs.clear();
    }

    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn cached_devices(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostApi;

    fn dispatch(local_size: u32) -> Dispatch {
        Dispatch {
            local_size,
            global_size: local_size * 4,
        }
    }

    #[test]
    fn builtin_source_has_entry_point() {
        let source = ProgramSource::builtin();
        assert!(source.text().contains("fn step("));
        assert!(source.specialize(128).starts_with("const WORKGROUP_SIZE: u32 = 128u;"));
    }

    #[test]
    fn reselection_reuses_device_and_programs() {
        let mut negotiator = DeviceCapabilityNegotiator::new(HostApi::default());
        let device = negotiator.select_device(0, 0).unwrap();
        let again = negotiator.select_device(0, 0).unwrap();
        assert!(Arc::ptr_eq(&device, &again));

        let source = ProgramSource::builtin();
        let first = negotiator.build_program(&device, &source, dispatch(64)).unwrap();
        let cached = negotiator.build_program(&again, &source, dispatch(64)).unwrap();
        assert!(Arc::ptr_eq(&first, &cached));
        assert_eq!(negotiator.cached_programs(), 1);

        // Different specialization is a different program
        negotiator.build_program(&device, &source, dispatch(32)).unwrap();
        assert_eq!(negotiator.cached_programs(), 2);
    }

    #[test]
    fn evict_drops_device_and_programs() {
        let mut negotiator = DeviceCapabilityNegotiator::new(HostApi::default());
        let device = negotiator.select_device(0, 0).unwrap();
        negotiator
            .build_program(&device, &ProgramSource::builtin(), dispatch(16))
            .unwrap();
        negotiator.evict(device.capabilities());
        assert_eq!(negotiator.cached_programs(), 0);
        assert_eq!(negotiator.cached_devices(), 0);
    }

    #[test]
    fn invalid_selection_is_reported() {
        let mut negotiator = DeviceCapabilityNegotiator::new(HostApi::default());
        assert_eq!(negotiator.select_device(2, 0).err(), Some(DeviceError::InvalidPlatform));
        assert_eq!(negotiator.select_device(0, 1).err(), Some(DeviceError::InvalidDevice));
        assert_eq!(negotiator.cached_devices(), 0);
    }

    #[test]
    fn build_failure_carries_log() {
        let mut negotiator = DeviceCapabilityNegotiator::new(HostApi::default());
        let device = negotiator.select_device(0, 0).unwrap();

        let broken = ProgramSource::from_text("broken.wgsl", "fn main() {}");
        let err = negotiator.build_program(&device, &broken, dispatch(16)).err().unwrap();
        assert!(err.log.contains("`step`"));

        let empty = ProgramSource::from_text("empty.wgsl", "  \n");
        let err = negotiator.build_program(&device, &empty, dispatch(16)).err().unwrap();
        assert!(err.log.contains("empty"));
        assert_eq!(negotiator.cached_programs(), 0);
    }

    #[test]
    fn missing_source_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProgramSource::from_path(dir.path().join("missing.wgsl")).unwrap_err();
        assert!(matches!(err, IoError::Open { .. }));
    }

    #[test]
    fn source_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.wgsl");
        std::fs::write(&path, "fn step() {}").unwrap();
        let source = ProgramSource::from_path(&path).unwrap();
        assert_eq!(source.text(), "fn step() {}");
    }
}
