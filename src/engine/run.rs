use super::{Allocated, EngineState, GenerationEngine, OptimizerState, RandomSupply};
use crate::cancel::CancellationToken;
use crate::device::Device;
use crate::error::{EngineError, EngineResult};
use crate::random::{DeviceGenerators, RandomPage, RandomPageController};
use crate::settings::RunMode;
use crate::strategy::{FitnessInvoker, MutationStrategy, SelectionStrategy};

impl<D, F, M, S> GenerationEngine<D, F, M, S>
where
    D: Device,
    F: FitnessInvoker,
    M: MutationStrategy,
    S: SelectionStrategy,
{
    /// run generations until the termination strategy or `cancel` says stop.
    /// cancellation is checked between generations only, so a started generation always
    /// completes. returns the number of generations run.
    pub fn run(&mut self, cancel: &CancellationToken) -> EngineResult<u64> {
        profiling::scope!("run");
        self.require("run", EngineState::Initialized)?;
        let Some(mut supply) = self.supply.take() else {
            return Err(EngineError::Precondition {
                operation: "run",
                required: EngineState::Initialized,
                actual: self.state,
            });
        };
        self.state = EngineState::Running;
        tracing::info!(run_mode = ?self.settings.run_mode, "run started");
        self.emit(OptimizerState::Starting);

        let result = match (&mut supply, self.settings.run_mode) {
            (RandomSupply::Pages(controller), RunMode::Reusing { .. }) => self.run_reusing(controller, cancel),
            (RandomSupply::Pages(controller), _) => self.run_single_page(controller, cancel),
            (RandomSupply::Streams(generators), _) => self.run_stream(generators, cancel),
        };
        if let RandomSupply::Pages(controller) = &mut supply {
            // nothing is checked out any more; let the worker wind down until disposal joins it
            let _ = controller.stop();
        }
        self.supply = Some(supply);
        self.state = EngineState::Terminated;

        match result {
            Ok(()) => {
                self.emit(OptimizerState::Terminating);
                tracing::info!(
                    generation = self.generation,
                    cancelled = cancel.is_cancelled(),
                    "run finished"
                );
                Ok(self.generation)
            }
            Err(e) => {
                tracing::error!(generation = self.generation, error = %e, "run failed");
                Err(e)
            }
        }
    }

    /// one page segment per generation; the page goes back for a refill after its last segment
    fn run_single_page(&mut self, controller: &mut RandomPageController<D>, cancel: &CancellationToken) -> EngineResult<()> {
        let pages = controller.layout().number_of_pages;
        let mut page = controller.take_first()?;
        let mut segment = 0;

        loop {
            profiling::scope!("generation");
            self.generation += 1;
            if segment >= pages {
                page = controller.recycle_and_take_next(page)?;
                segment = 0;
            }
            if let Err(e) = self.step_paged(&page, segment) {
                controller.return_page(page)?;
                return Err(e);
            }
            segment += 1;
            self.emit(OptimizerState::Running);

            if self.should_stop(cancel) {
                break;
            }
        }
        controller.return_page(page)?;
        Ok(())
    }

    /// sweep every segment of a page `number_of_reuses` times before recycling it.
    /// each sub-step is its own dispatch followed by a rotation, so after the burst `current`
    /// holds exactly what the same number of single steps would have left there.
    fn run_reusing(&mut self, controller: &mut RandomPageController<D>, cancel: &CancellationToken) -> EngineResult<()> {
        let pages = controller.layout().number_of_pages;
        // validated not to overflow
        let burst = self.settings.sweeps_per_checkout();
        let mut page = controller.take_first()?;

        loop {
            profiling::scope!("reuse_burst");
            for sub_step in 0..burst {
                if let Err(e) = self.step_paged(&page, sub_step % pages) {
                    controller.return_page(page)?;
                    return Err(e);
                }
            }
            self.generation += burst as u64;
            self.emit(OptimizerState::Running);

            if self.should_stop(cancel) {
                break;
            }
            page = controller.recycle_and_take_next(page)?;
        }
        controller.return_page(page)?;
        Ok(())
    }

    fn run_stream(&mut self, generators: &mut DeviceGenerators, cancel: &CancellationToken) -> EngineResult<()> {
        loop {
            profiling::scope!("generation");
            self.generation += 1;
            let actual = self.state;
            let Some(Allocated { programs, buffers }) = self.allocated.as_mut() else {
                return Err(missing_buffers(actual));
            };
            self.kernels
                .step_stream(self.device.as_ref(), &programs.step, buffers, generators)?;
            self.emit(OptimizerState::Running);

            if self.should_stop(cancel) {
                return Ok(());
            }
        }
    }

    fn step_paged(&mut self, page: &RandomPage, segment: usize) -> EngineResult<()> {
        let actual = self.state;
        let Some(Allocated { programs, buffers }) = self.allocated.as_mut() else {
            return Err(missing_buffers(actual));
        };
        self.kernels
            .step_paged(self.device.as_ref(), &programs.step, buffers, page, segment)?;
        Ok(())
    }

    fn should_stop(&self, cancel: &CancellationToken) -> bool {
        let Some(allocated) = self.allocated.as_ref() else {
            return true;
        };
        self.termination
            .is_terminated(self.generation, allocated.buffers.current())
            || cancel.is_cancelled()
    }

    fn emit(&mut self, event: OptimizerState) {
        if let (Some(handler), Some(allocated)) = (self.update_handler.as_mut(), self.allocated.as_ref()) {
            handler(event, self.generation, allocated.buffers.current());
        }
    }
}

fn missing_buffers(actual: EngineState) -> EngineError {
    EngineError::Precondition { operation: "run", required: EngineState::Initialized, actual }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::cancel::CancellationToken;
    use crate::device::CpuDevice;
    use crate::engine::{EngineState, GenerationEngine, OptimizerState};
    use crate::fitness::Sphere;
    use crate::settings::{OptimizerSettings, RunMode};
    use crate::strategy::{DeviceBounds, GreedySelection, MaxGenerations, RandOneBin};

    fn engine(
        device: &Arc<CpuDevice>,
        settings: OptimizerSettings,
    ) -> GenerationEngine<CpuDevice, Sphere, RandOneBin, GreedySelection> {
        let bounds = DeviceBounds::upload(device.as_ref(), &settings.lower_bound, &settings.upper_bound).unwrap();
        let mutation = RandOneBin::new(bounds, settings.mutation_force, settings.crossover_factor);
        let termination = MaxGenerations::new(settings.max_generations);
        let mut engine =
            GenerationEngine::new(Arc::clone(device), settings, Sphere, mutation, GreedySelection, termination).unwrap();
        engine.compile_and_allocate().unwrap();
        engine.init().unwrap();
        engine
    }

    fn settings(run_mode: RunMode, max_generations: u64) -> OptimizerSettings {
        OptimizerSettings {
            population_size: 32,
            max_generations,
            number_of_pages: 3,
            random_pool_size: 2,
            run_mode,
            ..OptimizerSettings::with_uniform_bounds(3, -5.0, 5.0)
        }
    }

    #[test]
    fn test_single_page_stops_at_max_generations() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings(RunMode::SinglePage, 7));
        assert_eq!(engine.run(&CancellationToken::new()).unwrap(), 7);
        assert_eq!(engine.generation(), 7);
        assert_eq!(engine.state(), EngineState::Terminated);
        // one launch per generation plus the init pass
        assert_eq!(device.stats().launches, 8);
        let snapshot = engine.random_pool_snapshot().unwrap();
        assert_eq!(snapshot.total(), 2);
        assert!(snapshot.checked_out.is_empty());
    }

    #[test]
    fn test_events_bracket_the_run() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut engine = engine(&device, settings(RunMode::Stream, 3));
        engine.set_update_handler(move |event, generation, population| {
            assert_eq!(population.size(), 32);
            sink.lock().unwrap().push((event, generation));
        });
        engine.run(&CancellationToken::new()).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (OptimizerState::Starting, 0),
                (OptimizerState::Running, 1),
                (OptimizerState::Running, 2),
                (OptimizerState::Running, 3),
                (OptimizerState::Terminating, 3),
            ]
        );
    }

    #[test]
    fn test_cancelled_run_still_completes_one_generation() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings(RunMode::SinglePage, 1_000));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(engine.run(&cancel).unwrap(), 1);
    }

    #[test]
    fn test_reusing_counts_whole_bursts() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings(RunMode::Reusing { number_of_reuses: 2 }, 10));
        // bursts of 2 * 3 sub-steps: 6, then 12 >= 10
        assert_eq!(engine.run(&CancellationToken::new()).unwrap(), 12);
        assert_eq!(device.stats().launches, 1 + 12);
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let device = Arc::new(CpuDevice::with_threads(1).unwrap());
        let mut engine = engine(&device, settings(RunMode::Stream, 2));
        engine.run(&CancellationToken::new()).unwrap();
        let err = engine.run(&CancellationToken::new()).unwrap_err();
        assert_eq!(
            err,
            crate::error::EngineError::Precondition {
                operation: "run",
                required: EngineState::Initialized,
                actual: EngineState::Terminated
            }
        );
        assert!(engine.current_population().is_ok());
    }

    #[test]
    fn test_fitness_never_gets_worse() {
        let device = Arc::new(CpuDevice::with_threads(2).unwrap());
        let mut engine = engine(&device, settings(RunMode::SinglePage, 1));
        let before: Vec<f64> = engine.current_population().unwrap().fitness_values().to_vec();
        engine.run(&CancellationToken::new()).unwrap();
        let after = engine.current_population().unwrap().fitness_values();
        assert!(before.iter().zip(after).all(|(b, a)| a <= b));
    }
}
