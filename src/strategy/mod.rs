// Pluggable per-run behaviors
// Each one is a pure function of its explicit arguments, so any implementation can be swapped in
// without touching the engine. Kernel-side strategies see one individual at a time.

pub mod mutation;
pub mod selection;
pub mod termination;

pub use mutation::{choose_donors, DeviceBounds, RandOneBin, DONOR_COUNT};
pub use selection::GreedySelection;
pub use termination::{AnyOf, MaxGenerations, TargetFitness};

use crate::population::{IndividualMut, IndividualRef, Population};
use crate::random::RandomDraws;

/// writes `individual.fitness` from `individual.genes`. runs once per index inside a launch,
/// so it cannot reach any other individual.
pub trait FitnessInvoker: Send + Sync {
    fn invoke(&self, index: usize, individual: &mut IndividualMut<'_>);
}

/// builds the trial vector for `index` from the current population.
/// draws are consumed strictly in order from `random`.
pub trait MutationStrategy: Send + Sync {
    fn mutate<R: RandomDraws>(
        &self,
        index: usize,
        current: &Population,
        trial: &mut IndividualMut<'_>,
        random: &mut R,
    );

    /// upper bound on draws one `mutate` call may take, sizes a page segment
    fn max_draws_per_individual(&self, vector_size: usize) -> usize;

    /// vector size this strategy was built for, if it is tied to one (e.g. through its bounds)
    fn vector_size(&self) -> Option<usize> {
        None
    }
}

/// fills `next` at `index` with either the incumbent or the trial individual
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, index: usize, current: &Population, next: &mut IndividualMut<'_>, trial: IndividualRef<'_>);
}

/// evaluated on the host after every generation
pub trait TerminationStrategy: Send {
    fn is_terminated(&self, generation: u64, population: &Population) -> bool;
}

impl<T: TerminationStrategy + ?Sized> TerminationStrategy for Box<T> {
    fn is_terminated(&self, generation: u64, population: &Population) -> bool {
        (**self).is_terminated(generation, population)
    }
}
