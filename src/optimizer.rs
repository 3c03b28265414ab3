/// optimizer façade: compile once, run once, pull the best individual out, clean up
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::device::Device;
use crate::engine::{GenerationEngine, OptimizerState};
use crate::error::EngineResult;
use crate::population::{best_index, HostPopulation, Population};
use crate::settings::{reference_page_size, OptimizerSettings};
use crate::strategy::{
    DeviceBounds, FitnessInvoker, GreedySelection, MaxGenerations, MutationStrategy, RandOneBin, SelectionStrategy,
};

/// best individual of a finished run, detached from device memory
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub fitness_value: f64,
    pub vector: Vec<f64>,
}

impl OptimizationResult {
    /// minimum-fitness individual, first occurrence on ties. an all-NaN population
    /// reports its first individual.
    pub fn from_population(population: &HostPopulation) -> Self {
        let index = best_index(&population.fitness).unwrap_or(0);
        let best = population.snapshot(index);
        Self { fitness_value: best.fitness, vector: best.vector }
    }
}

pub struct DifferentialEvolutionOptimizer<D: Device, F, M, S> {
    engine: GenerationEngine<D, F, M, S>,
}

impl<D, F, M, S> DifferentialEvolutionOptimizer<D, F, M, S>
where
    D: Device,
    F: FitnessInvoker,
    M: MutationStrategy,
    S: SelectionStrategy,
{
    /// compiles programs and allocates every buffer up front
    pub fn new(mut engine: GenerationEngine<D, F, M, S>) -> EngineResult<Self> {
        engine.compile_and_allocate()?;
        Ok(Self { engine })
    }

    pub fn run(&mut self) -> EngineResult<OptimizationResult> {
        self.run_with_cancellation(&CancellationToken::new())
    }

    /// init, run until termination or cancellation, then read back the best individual
    pub fn run_with_cancellation(&mut self, cancel: &CancellationToken) -> EngineResult<OptimizationResult> {
        profiling::scope!("DifferentialEvolutionOptimizer::run");
        self.engine.init()?;
        self.engine.run(cancel)?;

        let host = self.engine.current_population()?.download(self.engine.device().as_ref())?;
        let result = OptimizationResult::from_population(&host);
        tracing::info!(
            generation = self.engine.generation(),
            fitness = result.fitness_value,
            "best individual extracted"
        );
        Ok(result)
    }

    pub fn set_update_handler(&mut self, handler: impl FnMut(OptimizerState, u64, &Population) + Send + 'static) {
        self.engine.set_update_handler(handler);
    }

    pub fn engine(&self) -> &GenerationEngine<D, F, M, S> {
        &self.engine
    }
}

impl<D: Device, F: FitnessInvoker> DifferentialEvolutionOptimizer<D, F, RandOneBin, GreedySelection> {
    /// DE/rand/1/bin with greedy selection and a generation cap, all taken from `settings`.
    /// settings are validated before the bounds touch the device.
    pub fn from_settings(device: Arc<D>, settings: OptimizerSettings, fitness: F) -> EngineResult<Self> {
        settings.validate_for(reference_page_size(settings.individual_vector_size))?;
        let bounds = DeviceBounds::upload(device.as_ref(), &settings.lower_bound, &settings.upper_bound)?;
        let mutation = RandOneBin::new(bounds, settings.mutation_force, settings.crossover_factor);
        let termination = MaxGenerations::new(settings.max_generations);
        let engine = GenerationEngine::new(device, settings, fitness, mutation, GreedySelection, termination)?;
        Self::new(engine)
    }
}

impl<D: Device, F, M, S> DifferentialEvolutionOptimizer<D, F, M, S> {
    /// frees the random pool and population buffers; also runs on drop
    pub fn dispose(&mut self) {
        self.engine.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use crate::error::{ConfigError, EngineError};
    use crate::fitness::Sphere;

    #[test]
    fn test_best_is_first_minimum() {
        let host = HostPopulation {
            fitness: vec![4.0, 1.0, 1.0, f64::NAN],
            individuals: vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0],
            vector_size: 2,
        };
        let result = OptimizationResult::from_population(&host);
        assert_eq!(result, OptimizationResult { fitness_value: 1.0, vector: vec![1.0, 1.0] });
        // same answer every time
        assert_eq!(OptimizationResult::from_population(&host), result);
    }

    #[test]
    fn test_invalid_settings_allocate_nothing() {
        let device = Arc::new(CpuDevice::with_threads(1).unwrap());
        let settings = OptimizerSettings { population_size: 1, ..Default::default() };
        let err = DifferentialEvolutionOptimizer::from_settings(Arc::clone(&device), settings, Sphere)
            .err()
            .unwrap();
        assert_eq!(err, EngineError::Config(ConfigError::PopulationTooSmall { minimum: 4, actual: 1 }));
        assert_eq!(device.stats().allocations, 0);
    }

    #[test]
    fn test_out_of_memory_surfaces_as_device_error() {
        let device = Arc::new(CpuDevice::builder().threads(1).memory_limit(1024).build().unwrap());
        let settings = OptimizerSettings { population_size: 64, ..Default::default() };
        let err = DifferentialEvolutionOptimizer::from_settings(Arc::clone(&device), settings, Sphere)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Device(crate::error::DeviceError::OutOfMemory { .. })));
        assert_eq!(device.stats().live_buffers, 0);
    }

    #[test]
    fn test_small_run_returns_in_bounds_result() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let settings = OptimizerSettings {
            population_size: 40,
            max_generations: 50,
            ..OptimizerSettings::with_uniform_bounds(3, -4.0, 4.0)
        };
        let mut optimizer = DifferentialEvolutionOptimizer::from_settings(Arc::clone(&device), settings, Sphere).unwrap();
        let result = optimizer.run().unwrap();
        assert_eq!(result.vector.len(), 3);
        assert!(result.vector.iter().all(|x| (-4.0..=4.0).contains(x)));
        let expected: f64 = result.vector.iter().map(|x| x * x).sum();
        assert_eq!(result.fitness_value, expected);
        assert_eq!(optimizer.engine().generation(), 50);

        // a finished optimizer cannot run again
        assert!(matches!(optimizer.run(), Err(EngineError::Precondition { .. })));
        optimizer.dispose();
        drop(optimizer);
        assert_eq!(device.stats().live_buffers, 0);
    }
}
