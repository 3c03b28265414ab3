// Device executor capability
// The engine only ever talks to the accelerator through this trait: allocation, host<->device
// copies, program loading, one-task-per-index launches and a synchronization barrier.

pub mod cpu;

pub use cpu::{CpuDevice, CpuDeviceBuilder, DeviceStats};

use rayon::iter::IndexedParallelIterator;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::DeviceError;

pub type BufferId = u64;

// buffer ids are unique across every device in the process
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// byte accounting shared by a device and every buffer it handed out.
/// buffers give their bytes back on drop, so a buffer is released exactly once.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    limit: Option<usize>,        // None = unbounded
    allocated: AtomicUsize,      // bytes currently held by live buffers
    live: AtomicUsize,           // number of live buffers
    allocations: AtomicU64,      // total successful allocations (never decremented)
}

impl MemoryTracker {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, ..Self::default() }
    }

    fn reserve(&self, bytes: usize) -> Result<(), DeviceError> {
        let limit = self.limit;
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let next = current.checked_add(bytes)?;
                match limit {
                    Some(max) if next > max => None,
                    _ => Some(next),
                }
            })
            .map_err(|current| DeviceError::OutOfMemory {
                requested: bytes,
                available: limit.map_or(usize::MAX, |max| max.saturating_sub(current)),
            })?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// flat device-resident f64 array. multi-dimensional data is laid out row-major on top of it
/// (see `Population`), never as a nested array type.
#[derive(Debug)]
pub struct DeviceBuffer {
    id: BufferId,
    data: Vec<f64>,
    tracker: Arc<MemoryTracker>,
}

impl DeviceBuffer {
    /// allocate a zeroed buffer of `len` elements against the given tracker
    pub fn zeroed(tracker: &Arc<MemoryTracker>, len: usize) -> Result<Self, DeviceError> {
        tracker.reserve(len * std::mem::size_of::<f64>())?;
        Ok(Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            data: vec![0.0; len],
            tracker: Arc::clone(tracker),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// true if this buffer was allocated against `tracker`
    pub fn belongs_to(&self, tracker: &Arc<MemoryTracker>) -> bool {
        Arc::ptr_eq(&self.tracker, tracker)
    }

    /// device-side view, only meant for code running inside a launch (or unified-memory executors)
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.tracker.release(self.data.len() * std::mem::size_of::<f64>());
    }
}

/// handle to a program loaded on a specific device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    name: &'static str,
    device: u64,
}

impl Program {
    pub fn new(name: &'static str, device: u64) -> Self {
        Self { name, device }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn device(&self) -> u64 {
        self.device
    }
}

/// accelerator capability consumed by the engine.
///
/// `launch` runs `kernel` once per work item, passing the item's index. Work items are disjoint
/// per-index views, so tasks cannot mutate each other's state. Launches may be asynchronous;
/// callers must `synchronize` before reading results on the host.
pub trait Device: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn compile(&self, program: &'static str) -> Result<Program, DeviceError>;

    fn alloc(&self, len: usize) -> Result<DeviceBuffer, DeviceError>;

    fn upload(&self, dst: &mut DeviceBuffer, src: &[f64]) -> Result<(), DeviceError>;

    fn download(&self, src: &DeviceBuffer, dst: &mut [f64]) -> Result<(), DeviceError>;

    fn launch<I, K>(&self, program: &Program, work: I, kernel: K) -> Result<(), DeviceError>
    where
        I: IndexedParallelIterator,
        K: Fn(usize, I::Item) + Sync + Send;

    fn synchronize(&self) -> Result<(), DeviceError>;

    /// give a buffer back. takes it by value, so each buffer is freed at most once
    fn free(&self, buffer: DeviceBuffer) {
        drop(buffer);
    }

    /// allocate and fill from host memory in one go
    fn alloc_from(&self, src: &[f64]) -> Result<DeviceBuffer, DeviceError> {
        let mut buffer = self.alloc(src.len())?;
        self.upload(&mut buffer, src)?;
        Ok(buffer)
    }
}
