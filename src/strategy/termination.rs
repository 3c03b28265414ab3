use std::sync::Arc;

use super::TerminationStrategy;
use crate::device::Device;
use crate::population::{best_index, Population};

/// stop once `generation >= max_generations`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxGenerations {
    pub max_generations: u64,
}

impl MaxGenerations {
    pub fn new(max_generations: u64) -> Self {
        Self { max_generations }
    }
}

impl TerminationStrategy for MaxGenerations {
    fn is_terminated(&self, generation: u64, _population: &Population) -> bool {
        generation >= self.max_generations
    }
}

/// stop once the best fitness in the population reaches `target` (minimization).
/// the fitness buffer is copied back from the device after every generation.
pub struct TargetFitness<D: Device> {
    device: Arc<D>,
    pub target: f64,
}

impl<D: Device> TargetFitness<D> {
    pub fn new(device: Arc<D>, target: f64) -> Self {
        Self { device, target }
    }
}

impl<D: Device> TerminationStrategy for TargetFitness<D> {
    fn is_terminated(&self, _generation: u64, population: &Population) -> bool {
        profiling::scope!("TargetFitness::is_terminated");
        match population.download_fitness(self.device.as_ref()) {
            Ok(fitness) => best_index(&fitness).is_some_and(|index| fitness[index] <= self.target),
            Err(e) => {
                // an unreadable device ends the run
                tracing::error!(error = %e, "fitness readback failed, stopping");
                true
            }
        }
    }
}

/// stop as soon as any inner strategy does
#[derive(Default)]
pub struct AnyOf {
    strategies: Vec<Box<dyn TerminationStrategy>>,
}

impl AnyOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn or(mut self, strategy: impl TerminationStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl TerminationStrategy for AnyOf {
    fn is_terminated(&self, generation: u64, population: &Population) -> bool {
        self.strategies
            .iter()
            .any(|strategy| strategy.is_terminated(generation, population))
    }
}
