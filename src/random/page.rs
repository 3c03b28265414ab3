/// random pages and the bookkeeping that tracks where each one is
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::PageCursor;
use crate::device::{Device, DeviceBuffer};
use crate::error::{DeviceError, RandomPoolError};

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u64);

impl PageId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// shape of every page in a pool: `[population_size][page_size * number_of_pages]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLayout {
    pub population_size: usize,
    /// draws per individual in one segment
    pub page_size: usize,
    /// segments per page
    pub number_of_pages: usize,
}

impl PageLayout {
    pub fn row_len(&self) -> usize {
        self.page_size * self.number_of_pages
    }

    pub fn len(&self) -> usize {
        self.population_size * self.row_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// device-resident block of uniform draws, one row per individual
#[derive(Debug)]
pub struct RandomPage {
    id: PageId,
    buffer: DeviceBuffer,
    layout: PageLayout,
}

impl RandomPage {
    pub fn allocate<D: Device>(device: &D, layout: PageLayout) -> Result<Self, DeviceError> {
        Ok(Self {
            id: PageId(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed)),
            buffer: device.alloc(layout.len())?,
            layout,
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut DeviceBuffer {
        &mut self.buffer
    }

    pub(crate) fn into_buffer(self) -> DeviceBuffer {
        self.buffer
    }

    /// one row per individual, in index order
    pub fn rows(&self) -> impl IndexedParallelIterator<Item = &[f64]> + '_ {
        self.buffer.as_slice().par_chunks(self.layout.row_len())
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let len = self.layout.row_len();
        &self.buffer.as_slice()[index * len..(index + 1) * len]
    }

    /// cursor over `segment` of individual `index`'s row
    pub fn cursor(&self, index: usize, segment: usize) -> PageCursor<'_> {
        PageCursor::new(self.row(index), segment * self.layout.page_size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    /// refilled, waiting in the outgoing queue
    Ready,
    /// handed back, waiting for (or undergoing) a refill
    Retired,
    /// held by the generation loop
    CheckedOut,
}

/// ids per state at one instant
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub ready: Vec<PageId>,
    pub retired: Vec<PageId>,
    pub checked_out: Vec<PageId>,
}

impl PoolSnapshot {
    pub fn total(&self) -> usize {
        self.ready.len() + self.retired.len() + self.checked_out.len()
    }
}

/// mirrors the page partition for observation. pages themselves travel by value through
/// the handoff channels, so every transition is one map update under the lock.
#[derive(Debug, Default)]
pub struct PageLedger {
    states: Mutex<HashMap<PageId, PageState>>,
}

impl PageLedger {
    pub(crate) fn insert(&self, id: PageId, state: PageState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, state);
    }

    pub(crate) fn set(&self, id: PageId, state: PageState) -> Result<(), RandomPoolError> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        match states.get_mut(&id) {
            Some(slot) => {
                *slot = state;
                Ok(())
            }
            None => Err(RandomPoolError::UnknownPage { id: id.get() }),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = PoolSnapshot::default();
        for (&id, state) in states.iter() {
            match state {
                PageState::Ready => snapshot.ready.push(id),
                PageState::Retired => snapshot.retired.push(id),
                PageState::CheckedOut => snapshot.checked_out.push(id),
            }
        }
        snapshot.ready.sort();
        snapshot.retired.sort();
        snapshot.checked_out.sort();
        snapshot
    }
}
