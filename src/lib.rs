//! Differential evolution that keeps its population resident on a compute device.
//!
//! The host sets up a [`GenerationEngine`](engine::GenerationEngine), compiles and allocates once,
//! then only steers generations. Random numbers come either from a pool of pre-generated pages
//! refilled by a background worker ([`random::RandomPageController`]) or from per-individual
//! generator streams.

pub mod cancel;
pub mod device;
pub mod engine;
pub mod error;
pub mod fitness;
pub mod optimizer;
pub mod population;
pub mod random;
pub mod sampling;
pub mod settings;
pub mod strategy;

pub use cancel::CancellationToken;
pub use device::{CpuDevice, Device};
pub use engine::{EngineState, GenerationEngine, OptimizerState};
pub use error::{ConfigError, DeviceError, EngineError, EngineResult, RandomPoolError};
pub use optimizer::{DifferentialEvolutionOptimizer, OptimizationResult};
pub use settings::{OptimizerSettings, RunMode};
