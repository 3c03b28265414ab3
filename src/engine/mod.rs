// Generation engine
// Owns the device programs, the three population buffers and the random supply for one run,
// and walks them through Uninitialized -> Compiled -> Initialized -> Running -> Terminated.
// The generation loops live in `run`.

pub mod kernels;
mod run;

pub use kernels::{Kernels, Programs};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::device::Device;
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::population::{Population, PopulationBufferSet};
use crate::random::{DeviceGenerators, PageLayout, PoolSnapshot, RandomPageController};
use crate::sampling::PopulationSampler;
use crate::settings::{OptimizerSettings, RunMode};
use crate::strategy::{FitnessInvoker, MutationStrategy, SelectionStrategy, TerminationStrategy};

pub const INIT_PROGRAM: &str = "de_init";
pub const STEP_PROGRAM: &str = "de_step";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    Uninitialized,
    Compiled,
    Initialized,
    Running,
    Terminated,
}

/// lifecycle events reported to the update handler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerState {
    Starting,
    Running,
    Terminating,
}

/// side-effect-only observer: (event, generation, current population)
pub type UpdateHandler = Box<dyn FnMut(OptimizerState, u64, &Population) + Send>;

enum RandomSupply<D: Device> {
    Pages(RandomPageController<D>),
    Streams(DeviceGenerators),
}

/// everything `compile_and_allocate` produces
struct Allocated {
    programs: Programs,
    buffers: PopulationBufferSet,
}

pub struct GenerationEngine<D: Device, F, M, S> {
    device: Arc<D>,
    settings: OptimizerSettings,
    kernels: Kernels<F, M, S>,
    termination: Box<dyn TerminationStrategy>,
    update_handler: Option<UpdateHandler>,
    sampler: PopulationSampler,
    allocated: Option<Allocated>,
    supply: Option<RandomSupply<D>>,
    state: EngineState,
    generation: u64,
}

impl<D, F, M, S> GenerationEngine<D, F, M, S>
where
    D: Device,
    F: FitnessInvoker,
    M: MutationStrategy,
    S: SelectionStrategy,
{
    /// validates `settings` against the mutation's draw budget; allocates nothing
    pub fn new(
        device: Arc<D>,
        settings: OptimizerSettings,
        fitness: F,
        mutation: M,
        selection: S,
        termination: impl TerminationStrategy + 'static,
    ) -> EngineResult<Self> {
        settings.validate_for(mutation.max_draws_per_individual(settings.individual_vector_size))?;
        if let Some(bounds) = mutation.vector_size() {
            if bounds != settings.individual_vector_size {
                return Err(ConfigError::BoundLengthMismatch {
                    lower: bounds,
                    upper: bounds,
                    vector_size: settings.individual_vector_size,
                }
                .into());
            }
        }
        let sampler = PopulationSampler::new(
            settings.population_size,
            &settings.lower_bound,
            &settings.upper_bound,
            settings.seed,
        );

        Ok(Self {
            device,
            settings,
            kernels: Kernels { fitness, mutation, selection },
            termination: Box::new(termination),
            update_handler: None,
            sampler,
            allocated: None,
            supply: None,
            state: EngineState::Uninitialized,
            generation: 0,
        })
    }

    pub fn with_update_handler(mut self, handler: impl FnMut(OptimizerState, u64, &Population) + Send + 'static) -> Self {
        self.set_update_handler(handler);
        self
    }

    pub fn set_update_handler(&mut self, handler: impl FnMut(OptimizerState, u64, &Population) + Send + 'static) {
        self.update_handler = Some(Box::new(handler));
    }

    /// compile both programs, start the random supply and allocate the three population
    /// buffers, with the sampled population in `current`
    pub fn compile_and_allocate(&mut self) -> EngineResult<()> {
        profiling::scope!("compile_and_allocate");
        self.require("compile_and_allocate", EngineState::Uninitialized)?;
        let device = self.device.as_ref();
        let (size, vector_size) = (self.settings.population_size, self.settings.individual_vector_size);

        let programs = Programs::compile(device)?;
        let mut buffers = PopulationBufferSet::allocate(device, size, vector_size)?;
        buffers
            .current_mut()
            .upload_individuals(device, &self.sampler.take_samples())?;

        // streams and pages get their own seed so they never replay the sampler's draws
        let random_seed = self.settings.seed.wrapping_add(1);
        let supply = match self.settings.run_mode {
            RunMode::Stream => RandomSupply::Streams(DeviceGenerators::new(size, random_seed)),
            RunMode::SinglePage | RunMode::Reusing { .. } => {
                let layout = PageLayout {
                    population_size: size,
                    page_size: self.settings.page_size(),
                    number_of_pages: self.settings.number_of_pages,
                };
                let mut controller = RandomPageController::new(
                    Arc::clone(&self.device),
                    layout,
                    self.settings.random_pool_size,
                    random_seed,
                )?;
                controller.start()?;
                RandomSupply::Pages(controller)
            }
        };

        self.allocated = Some(Allocated { programs, buffers });
        self.supply = Some(supply);
        self.state = EngineState::Compiled;
        tracing::info!(
            device = self.device.name(),
            population = size,
            vector_size,
            run_mode = ?self.settings.run_mode,
            "programs compiled and buffers allocated"
        );
        Ok(())
    }

    /// evaluate the fitness of the initial population
    pub fn init(&mut self) -> EngineResult<()> {
        profiling::scope!("init");
        self.require("init", EngineState::Compiled)?;
        let actual = self.state;
        let Some(allocated) = self.allocated.as_mut() else {
            return Err(EngineError::Precondition { operation: "init", required: EngineState::Compiled, actual });
        };
        let device = self.device.as_ref();
        self.kernels
            .init(device, &allocated.programs.init, allocated.buffers.current_mut())?;
        device.synchronize()?;
        self.state = EngineState::Initialized;
        tracing::info!("initial population evaluated");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// generations completed so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// partition of the random page pool, None in stream mode or before allocation
    pub fn random_pool_snapshot(&self) -> Option<PoolSnapshot> {
        match self.supply.as_ref()? {
            RandomSupply::Pages(controller) => Some(controller.snapshot()),
            RandomSupply::Streams(_) => None,
        }
    }

    /// the buffer currently holding the `current` role; valid from `Initialized` on
    pub fn current_population(&self) -> EngineResult<&Population> {
        let precondition = EngineError::Precondition {
            operation: "current_population",
            required: EngineState::Initialized,
            actual: self.state,
        };
        if self.state < EngineState::Initialized {
            return Err(precondition);
        }
        self.allocated
            .as_ref()
            .map(|allocated| allocated.buffers.current())
            .ok_or(precondition)
    }

    fn require(&self, operation: &'static str, required: EngineState) -> EngineResult<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(EngineError::Precondition { operation, required, actual: self.state })
        }
    }
}

impl<D: Device, F, M, S> GenerationEngine<D, F, M, S> {
    /// release the random pool, then the population buffers. safe to call more than once;
    /// afterwards the engine is back to `Uninitialized`.
    pub fn dispose(&mut self) {
        profiling::scope!("GenerationEngine::dispose");
        if let Some(RandomSupply::Pages(mut controller)) = self.supply.take() {
            controller.dispose();
        }
        if let Some(Allocated { buffers, .. }) = self.allocated.take() {
            drop(buffers);
            tracing::debug!("population buffers freed");
        }
        self.state = EngineState::Uninitialized;
    }
}

impl<D: Device, F, M, S> Drop for GenerationEngine<D, F, M, S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use crate::error::DeviceError;
    use crate::fitness::Sphere;
    use crate::strategy::{DeviceBounds, GreedySelection, MaxGenerations, RandOneBin};

    type TestEngine = GenerationEngine<CpuDevice, Sphere, RandOneBin, GreedySelection>;

    fn settings() -> OptimizerSettings {
        OptimizerSettings {
            population_size: 16,
            max_generations: 5,
            number_of_pages: 2,
            random_pool_size: 2,
            ..OptimizerSettings::with_uniform_bounds(2, -1.0, 1.0)
        }
    }

    fn engine(device: &Arc<CpuDevice>, settings: OptimizerSettings) -> EngineResult<TestEngine> {
        let bounds = DeviceBounds::upload(device.as_ref(), &settings.lower_bound, &settings.upper_bound)?;
        let mutation = RandOneBin::new(bounds, settings.mutation_force, settings.crossover_factor);
        let termination = MaxGenerations::new(settings.max_generations);
        GenerationEngine::new(Arc::clone(device), settings, Sphere, mutation, GreedySelection, termination)
    }

    #[test]
    fn test_operations_out_of_order_are_rejected() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings()).unwrap();

        let err = engine.init().unwrap_err();
        assert_eq!(
            err,
            EngineError::Precondition {
                operation: "init",
                required: EngineState::Compiled,
                actual: EngineState::Uninitialized
            }
        );
        assert!(engine.current_population().is_err());

        engine.compile_and_allocate().unwrap();
        let err = engine.compile_and_allocate().unwrap_err();
        assert!(matches!(err, EngineError::Precondition { operation: "compile_and_allocate", .. }));
        assert!(matches!(
            engine.current_population(),
            Err(EngineError::Precondition { actual: EngineState::Compiled, .. })
        ));
    }

    #[test]
    fn test_init_evaluates_every_individual() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings()).unwrap();
        engine.compile_and_allocate().unwrap();
        engine.init().unwrap();
        assert_eq!(engine.state(), EngineState::Initialized);

        let population = engine.current_population().unwrap();
        for index in 0..population.size() {
            let expected: f64 = population.individual(index).iter().map(|x| x * x).sum();
            assert_eq!(population.fitness(index), expected);
        }
    }

    #[test]
    fn test_page_too_small_rejected_before_allocation() {
        let device = Arc::new(CpuDevice::with_threads(1).unwrap());
        let settings = OptimizerSettings { random_page_size: Some(4), ..settings() };
        let bounds = DeviceBounds::upload(device.as_ref(), &settings.lower_bound, &settings.upper_bound).unwrap();
        let mutation = RandOneBin::new(bounds, 0.3, 0.8);
        let live_before = device.stats().live_buffers;
        let result = TestEngine::new(
            Arc::clone(&device),
            settings,
            Sphere,
            mutation,
            GreedySelection,
            MaxGenerations::new(1),
        );
        assert_eq!(result.err(), Some(EngineError::Config(ConfigError::PageTooSmall { required: 7, actual: 4 })));
        assert_eq!(device.stats().live_buffers, live_before - 2);
    }

    #[test]
    fn test_bounds_of_wrong_length_rejected_before_allocation() {
        let device = Arc::new(CpuDevice::with_threads(1).unwrap());
        let settings = OptimizerSettings::with_uniform_bounds(3, -1.0, 1.0);
        let bounds = DeviceBounds::upload(device.as_ref(), &[-1.0, -1.0], &[1.0, 1.0]).unwrap();
        let mutation = RandOneBin::new(bounds, 0.3, 0.8);
        let result = TestEngine::new(
            Arc::clone(&device),
            settings,
            Sphere,
            mutation,
            GreedySelection,
            MaxGenerations::new(1),
        );
        assert_eq!(
            result.err(),
            Some(EngineError::Config(ConfigError::BoundLengthMismatch { lower: 2, upper: 2, vector_size: 3 }))
        );
        // the rejected strategy took its bounds with it
        assert_eq!(device.stats().live_buffers, 0);
    }

    #[test]
    fn test_compile_failure_is_fatal_and_allocates_nothing() {
        let device = Arc::new(CpuDevice::builder().threads(1).reject_program(STEP_PROGRAM).build().unwrap());
        let mut engine = engine(&device, settings()).unwrap();
        let live_before = device.stats().live_buffers;
        let err = engine.compile_and_allocate().unwrap_err();
        assert!(matches!(err, EngineError::Device(DeviceError::Compilation { .. })));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(device.stats().live_buffers, live_before);
    }

    #[test]
    fn test_dispose_releases_everything_once() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings()).unwrap();
        engine.compile_and_allocate().unwrap();
        engine.init().unwrap();
        engine.dispose();
        engine.dispose();
        // only the two bound buffers owned by the mutation strategy remain
        assert_eq!(device.stats().live_buffers, 2);
        drop(engine);
        assert_eq!(device.stats().live_buffers, 0);
    }
}
