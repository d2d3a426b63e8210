//! Device resource context
//!
//! Owns the OpenCL platform/device/context/queue quartet for one pipeline
//! instance. The queue is created with profiling enabled so every enqueued
//! operation carries the timestamps the timing collector reads.
//!
//! Device selection follows the usual order: an explicit index pair wins,
//! then the `CLXCORR_OPENCL_PLATFORM` / `CLXCORR_OPENCL_DEVICE` environment
//! variables, then the first GPU of the first platform (falling back to any
//! device type).

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU};
use opencl3::memory::{Buffer, CL_MEM_READ_WRITE};
use opencl3::platform::get_platforms;
use opencl3::types::cl_device_id;

use crate::error::Error;

const PLATFORM_ENV: &str = "CLXCORR_OPENCL_PLATFORM";
const DEVICE_ENV: &str = "CLXCORR_OPENCL_DEVICE";

/// Compute backend capability marker
///
/// Marks types that own the device resources a pipeline runs on. Concrete
/// backends provide creation and resource management as inherent methods;
/// the trait only carries what generic callers (such as test harnesses)
/// need to probe.
pub trait Backend {
    /// Check if this backend is usable on the current system
    fn is_available() -> bool;

    /// Human-readable name of the opened device
    fn device_name(&self) -> String;
}

/// OpenCL execution resources shared by every plan and buffer of a pipeline
pub struct GpuContext {
    device: Device,
    context: Context,
    queue: CommandQueue,
}

impl GpuContext {
    /// Open the default device (environment overrides honored)
    pub fn new() -> Result<Self, Error> {
        let (platform_idx, device_idx) = indices_from_env()?;
        Self::with_device(platform_idx, device_idx)
    }

    /// Open a specific platform/device pair; `None` selects the default
    pub fn with_device(
        platform_idx: Option<usize>,
        device_idx: Option<usize>,
    ) -> Result<Self, Error> {
        let device_id = select_device(platform_idx, device_idx)?;
        let device = Device::new(device_id);
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        log::info!("opening OpenCL device {device_name}");

        let context =
            Context::from_device(&device).map_err(|e| Error::device("create context", e))?;
        // Profiling stays on for the lifetime of the queue; the timing
        // collector reads the per-event counters it produces.
        let queue = unsafe { CommandQueue::create(&context, device_id, CL_QUEUE_PROFILING_ENABLE) }
            .map_err(|e| Error::device("create command queue", e))?;

        Ok(Self {
            device,
            context,
            queue,
        })
    }

    /// Whether any OpenCL device can be opened at all
    ///
    /// Used by tests to skip device-dependent cases on hosts without a
    /// usable OpenCL runtime.
    pub fn is_available() -> bool {
        match get_platforms() {
            Ok(platforms) => platforms
                .iter()
                .any(|p| matches!(p.get_devices(CL_DEVICE_TYPE_ALL), Ok(d) if !d.is_empty())),
            Err(_) => false,
        }
    }

    /// Names of every visible device, as (platform, device) pairs
    pub fn list_devices() -> Result<Vec<(String, String)>, Error> {
        let platforms = get_platforms().map_err(|e| Error::device("list platforms", e))?;
        let mut out = Vec::new();
        for platform in &platforms {
            let platform_name = platform.name().unwrap_or_else(|_| "<unknown>".to_string());
            let devices = platform
                .get_devices(CL_DEVICE_TYPE_ALL)
                .map_err(|e| Error::device("list devices", e))?;
            for id in devices {
                let name = Device::new(id)
                    .name()
                    .unwrap_or_else(|_| "<unknown>".to_string());
                out.push((platform_name.clone(), name));
            }
        }
        Ok(out)
    }

    /// Allocate a read-write device buffer of `len` bytes
    pub fn alloc_bytes(&self, what: &'static str, len: usize) -> Result<Buffer<u8>, Error> {
        if len == 0 {
            return Err(Error::Input(format!("{what}: zero-length allocation")));
        }
        unsafe { Buffer::<u8>::create(&self.context, CL_MEM_READ_WRITE, len, std::ptr::null_mut()) }
            .map_err(|e| Error::allocation(what, e))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Block until every enqueued operation on the queue has completed
    pub fn finish(&self) -> Result<(), Error> {
        self.queue
            .finish()
            .map_err(|e| Error::device("finish queue", e))
    }
}

impl Backend for GpuContext {
    fn is_available() -> bool {
        GpuContext::is_available()
    }

    fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "<unknown>".to_string())
    }
}

fn indices_from_env() -> Result<(Option<usize>, Option<usize>), Error> {
    let parse = |var: &str| -> Result<Option<usize>, Error> {
        match std::env::var(var) {
            Ok(v) => v
                .parse::<usize>()
                .map(Some)
                .map_err(|_| Error::Config(format!("{var} must be an index, got {v:?}"))),
            Err(_) => Ok(None),
        }
    };
    Ok((parse(PLATFORM_ENV)?, parse(DEVICE_ENV)?))
}

fn select_device(
    platform_idx: Option<usize>,
    device_idx: Option<usize>,
) -> Result<cl_device_id, Error> {
    let platforms = get_platforms().map_err(|e| Error::device("list platforms", e))?;
    if platforms.is_empty() {
        return Err(Error::NoDevice("no OpenCL platforms found".into()));
    }

    let platform = match platform_idx {
        Some(i) => *platforms
            .get(i)
            .ok_or_else(|| Error::NoDevice(format!("platform index {i} not found")))?,
        None => platforms[0],
    };

    let devices = platform
        .get_devices(CL_DEVICE_TYPE_ALL)
        .map_err(|e| Error::device("list devices", e))?;
    if devices.is_empty() {
        return Err(Error::NoDevice("no OpenCL devices found".into()));
    }

    match device_idx {
        Some(i) => devices
            .get(i)
            .copied()
            .ok_or_else(|| Error::NoDevice(format!("device index {i} not found"))),
        None => {
            let gpus = platform.get_devices(CL_DEVICE_TYPE_GPU).unwrap_or_default();
            Ok(*gpus.first().unwrap_or(&devices[0]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencl3::memory::ClMem;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn opens_default_device() {
        init_logger();
        if !GpuContext::is_available() {
            println!("no OpenCL device, skipping");
            return;
        }
        let ctx = GpuContext::new().unwrap();
        let name = ctx.device().name().unwrap();
        assert!(!name.is_empty());
    }

    #[test]
    fn allocates_and_rejects_zero_length() {
        init_logger();
        if !GpuContext::is_available() {
            println!("no OpenCL device, skipping");
            return;
        }
        let ctx = GpuContext::new().unwrap();
        let buf = ctx.alloc_bytes("scratch", 4096).unwrap();
        assert_eq!(buf.size().unwrap(), 4096);
        assert!(matches!(
            ctx.alloc_bytes("scratch", 0),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        if !GpuContext::is_available() {
            println!("no OpenCL device, skipping");
            return;
        }
        assert!(matches!(
            GpuContext::with_device(Some(usize::MAX), None),
            Err(Error::NoDevice(_))
        ));
    }
}
