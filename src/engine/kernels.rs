/// the two device programs: the init pass and the fused generation step
use rayon::prelude::*;

use super::{INIT_PROGRAM, STEP_PROGRAM};
use crate::device::{Device, Program};
use crate::error::DeviceError;
use crate::population::{IndividualMut, Population, PopulationBufferSet};
use crate::random::{DeviceGenerators, PageCursor, RandomDraws, RandomPage, StreamCursor};
use crate::strategy::{FitnessInvoker, MutationStrategy, SelectionStrategy};

/// compiled handles for both programs
#[derive(Debug)]
pub struct Programs {
    pub init: Program,
    pub step: Program,
}

impl Programs {
    pub fn compile<D: Device>(device: &D) -> Result<Self, DeviceError> {
        profiling::scope!("Programs::compile");
        Ok(Self { init: device.compile(INIT_PROGRAM)?, step: device.compile(STEP_PROGRAM)? })
    }
}

/// strategies specialized into the kernels for one run
pub struct Kernels<F, M, S> {
    pub fitness: F,
    pub mutation: M,
    pub selection: S,
}

impl<F, M, S> Kernels<F, M, S>
where
    F: FitnessInvoker,
    M: MutationStrategy,
    S: SelectionStrategy,
{
    /// fitness for every individual of `population`
    pub fn init<D: Device>(&self, device: &D, program: &Program, population: &mut Population) -> Result<(), DeviceError> {
        profiling::scope!("kernel_init");
        device.launch(program, population.rows_mut(), |index, mut row| {
            self.fitness.invoke(index, &mut row)
        })
    }

    /// one generation drawing from `segment` of a page: mutate, evaluate, select, then rotate
    pub fn step_paged<D: Device>(
        &self,
        device: &D,
        program: &Program,
        buffers: &mut PopulationBufferSet,
        page: &RandomPage,
        segment: usize,
    ) -> Result<(), DeviceError> {
        profiling::scope!("kernel_step_paged");
        let offset = segment * page.layout().page_size;
        let (current, next, trial) = buffers.split_mut();
        let work = next.rows_mut().zip(trial.rows_mut()).zip(page.rows());
        device.launch(program, work, |index, ((mut next, mut trial), random)| {
            let mut cursor = PageCursor::new(random, offset);
            self.evolve(index, current, &mut next, &mut trial, &mut cursor);
        })?;
        device.synchronize()?;
        buffers.rotate();
        Ok(())
    }

    /// one generation drawing from each individual's own generator stream
    pub fn step_stream<D: Device>(
        &self,
        device: &D,
        program: &Program,
        buffers: &mut PopulationBufferSet,
        generators: &mut DeviceGenerators,
    ) -> Result<(), DeviceError> {
        profiling::scope!("kernel_step_stream");
        let (current, next, trial) = buffers.split_mut();
        let work = next.rows_mut().zip(trial.rows_mut()).zip(generators.streams_mut());
        device.launch(program, work, |index, ((mut next, mut trial), rng)| {
            let mut cursor = StreamCursor::new(rng);
            self.evolve(index, current, &mut next, &mut trial, &mut cursor);
        })?;
        device.synchronize()?;
        buffers.rotate();
        Ok(())
    }

    #[inline]
    fn evolve<R: RandomDraws>(
        &self,
        index: usize,
        current: &Population,
        next: &mut IndividualMut<'_>,
        trial: &mut IndividualMut<'_>,
        random: &mut R,
    ) {
        self.mutation.mutate(index, current, trial, random);
        self.fitness.invoke(index, trial);
        self.selection.select(index, current, next, trial.view());
    }
}
