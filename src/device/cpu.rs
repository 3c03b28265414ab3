//! reference executor: runs kernels on a dedicated rayon pool over host memory.
//! every launch completes before it returns, so `synchronize` is only a counted barrier.

use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Device, DeviceBuffer, MemoryTracker, Program};
use crate::error::DeviceError;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// counters snapshot, mostly for tests and diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub live_buffers: usize,
    pub allocated_bytes: usize,
    pub allocations: u64,
    pub launches: u64,
    pub barriers: u64,
}

pub struct CpuDevice {
    id: u64,
    name: String,
    pool: rayon::ThreadPool,
    tracker: Arc<MemoryTracker>,
    rejected_programs: HashSet<&'static str>, // programs that fail to compile (fault injection)
    launches: AtomicU64,
    barriers: AtomicU64,
}

#[derive(Debug, Default)]
pub struct CpuDeviceBuilder {
    threads: usize, // 0 = rayon default (one per core)
    memory_limit: Option<usize>,
    rejected_programs: HashSet<&'static str>,
}

impl CpuDeviceBuilder {
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// cap on live device memory in bytes
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// make `compile` fail for this program name
    pub fn reject_program(mut self, program: &'static str) -> Self {
        self.rejected_programs.insert(program);
        self
    }

    pub fn build(self) -> Result<CpuDevice, DeviceError> {
        profiling::scope!("CpuDevice::build");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("device-{i}"))
            .build()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("cpu-{id} ({} threads)", pool.current_num_threads());
        tracing::debug!(device = %name, "cpu device ready");

        Ok(CpuDevice {
            id,
            name,
            pool,
            tracker: Arc::new(MemoryTracker::new(self.memory_limit)),
            rejected_programs: self.rejected_programs,
            launches: AtomicU64::new(0),
            barriers: AtomicU64::new(0),
        })
    }
}

impl CpuDevice {
    pub fn builder() -> CpuDeviceBuilder {
        CpuDeviceBuilder::default()
    }

    pub fn new() -> Result<Self, DeviceError> {
        Self::builder().build()
    }

    pub fn with_threads(threads: usize) -> Result<Self, DeviceError> {
        Self::builder().threads(threads).build()
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            live_buffers: self.tracker.live_buffers(),
            allocated_bytes: self.tracker.allocated_bytes(),
            allocations: self.tracker.allocations(),
            launches: self.launches.load(Ordering::Relaxed),
            barriers: self.barriers.load(Ordering::Relaxed),
        }
    }

    fn check_buffer(&self, buffer: &DeviceBuffer, len: usize) -> Result<(), DeviceError> {
        if !buffer.belongs_to(&self.tracker) {
            return Err(DeviceError::InvalidBuffer { id: buffer.id() });
        }
        if buffer.len() != len {
            return Err(DeviceError::LengthMismatch { expected: buffer.len(), actual: len });
        }
        Ok(())
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn compile(&self, program: &'static str) -> Result<Program, DeviceError> {
        profiling::scope!("CpuDevice::compile");
        if self.rejected_programs.contains(program) {
            return Err(DeviceError::Compilation {
                program: program.to_owned(),
                reason: "rejected by device configuration".to_owned(),
            });
        }
        Ok(Program::new(program, self.id))
    }

    fn alloc(&self, len: usize) -> Result<DeviceBuffer, DeviceError> {
        profiling::scope!("CpuDevice::alloc");
        DeviceBuffer::zeroed(&self.tracker, len)
    }

    fn upload(&self, dst: &mut DeviceBuffer, src: &[f64]) -> Result<(), DeviceError> {
        profiling::scope!("CpuDevice::upload");
        self.check_buffer(dst, src.len())?;
        dst.as_mut_slice().copy_from_slice(src);
        Ok(())
    }

    fn download(&self, src: &DeviceBuffer, dst: &mut [f64]) -> Result<(), DeviceError> {
        profiling::scope!("CpuDevice::download");
        self.check_buffer(src, dst.len())?;
        dst.copy_from_slice(src.as_slice());
        Ok(())
    }

    fn launch<I, K>(&self, program: &Program, work: I, kernel: K) -> Result<(), DeviceError>
    where
        I: IndexedParallelIterator,
        K: Fn(usize, I::Item) + Sync + Send,
    {
        profiling::scope!("CpuDevice::launch");
        if program.device() != self.id {
            return Err(DeviceError::Launch(format!(
                "program `{}` was compiled for device {}, not {}",
                program.name(),
                program.device(),
                self.id
            )));
        }
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.pool
            .install(|| work.enumerate().for_each(|(index, item)| kernel(index, item)));
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.barriers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
