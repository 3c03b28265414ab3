// Random number supplies for the device loop
// Two flavors feed the mutation kernel through the same `RandomDraws` cursor: pre-generated pages
// handed out by the `RandomPageController`, or one generator stream per individual.

pub mod controller;
pub mod page;

pub use controller::RandomPageController;
pub use page::{PageId, PageLayout, PageLedger, PageState, PoolSnapshot, RandomPage};

use rand::Rng;
use rand_pcg::Pcg32;
use rayon::prelude::*;

/// sequential source of uniform draws for one individual
pub trait RandomDraws {
    /// uniform value in [0, 1)
    fn next_double(&mut self) -> f64;

    /// uniform integer in `0..=max`
    #[inline]
    fn next_index(&mut self, max: usize) -> usize {
        let scaled = self.next_double() * (max + 1) as f64;
        (scaled as usize).min(max)
    }

    /// draws taken so far
    fn consumed(&self) -> usize;
}

/// walks one individual's row of a random page, starting at a segment offset
#[derive(Debug)]
pub struct PageCursor<'a> {
    row: &'a [f64],
    offset: usize,
    step: usize,
}

impl<'a> PageCursor<'a> {
    pub fn new(row: &'a [f64], offset: usize) -> Self {
        Self { row, offset, step: 0 }
    }
}

impl RandomDraws for PageCursor<'_> {
    #[inline]
    fn next_double(&mut self) -> f64 {
        // page size is validated against the mutation's draw budget, so this stays in the segment
        debug_assert!(self.offset + self.step < self.row.len());
        let value = self.row[self.offset + self.step];
        self.step += 1;
        value
    }

    fn consumed(&self) -> usize {
        self.step
    }
}

/// draws straight from an individual's generator, no page bookkeeping
#[derive(Debug)]
pub struct StreamCursor<'a> {
    rng: &'a mut Pcg32,
    consumed: usize,
}

impl<'a> StreamCursor<'a> {
    pub fn new(rng: &'a mut Pcg32) -> Self {
        Self { rng, consumed: 0 }
    }
}

impl RandomDraws for StreamCursor<'_> {
    #[inline]
    fn next_double(&mut self) -> f64 {
        self.consumed += 1;
        self.rng.random::<f64>()
    }

    fn consumed(&self) -> usize {
        self.consumed
    }
}

/// one independent PCG stream per individual (stream id = individual index).
/// generator state stays where the kernels run and advances in place.
#[derive(Clone, Debug)]
pub struct DeviceGenerators {
    states: Vec<Pcg32>,
}

impl DeviceGenerators {
    pub fn new(population_size: usize, seed: u64) -> Self {
        let states = (0..population_size)
            .map(|index| Pcg32::new(seed, index as u64))
            .collect();
        Self { states }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// one generator per individual, in index order
    pub fn streams_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut Pcg32> + '_ {
        self.states.par_iter_mut()
    }
}
