//! error taxonomy for the optimizer.
//! precondition and config errors are programmer/ordering mistakes, device errors are fatal,
//! cancellation is not an error at all (see `cancel`).

use thiserror::Error;

use crate::engine::EngineState;

/// failures reported by the device executor (allocation, compilation, copies, launches)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("program `{program}` failed to compile: {reason}")]
    Compilation { program: String, reason: String },

    #[error("buffer {id} does not belong to this device")]
    InvalidBuffer { id: u64 },

    #[error("copy length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("kernel launch failed: {0}")]
    Launch(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// rejected configuration, reported before any device resource is allocated
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("population size must be at least {minimum}, got {actual}")]
    PopulationTooSmall { minimum: usize, actual: usize },

    #[error("individual vector size must be greater than zero")]
    EmptyIndividual,

    #[error("bound length mismatch: lower has {lower} entries, upper has {upper}, vector size is {vector_size}")]
    BoundLengthMismatch { lower: usize, upper: usize, vector_size: usize },

    #[error("invalid bounds for gene {gene}: lower {lower} must be finite and not above upper {upper}")]
    InvalidBounds { gene: usize, lower: f64, upper: f64 },

    #[error("mutation force must be finite and in [0, 2], got {0}")]
    MutationForce(f64),

    #[error("crossover factor must be in [0, 1], got {0}")]
    CrossoverFactor(f64),

    #[error("max generations must be greater than zero")]
    ZeroGenerations,

    #[error("random pool size must be greater than zero")]
    EmptyRandomPool,

    #[error("number of pages must be greater than zero")]
    ZeroPages,

    #[error("number of reuses must be greater than zero")]
    ZeroReuses,

    #[error("{number_of_reuses} reuses of {number_of_pages} pages overflow the sub-step count")]
    TooManyReuses { number_of_reuses: usize, number_of_pages: usize },

    #[error("random page size {actual} is below the {required} draws one individual may consume")]
    PageTooSmall { required: usize, actual: usize },
}

/// failures of the random page pool and its refill worker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RandomPoolError {
    #[error("the refill worker has already started")]
    AlreadyStarted,

    #[error("the refill worker has already stopped")]
    AlreadyStopped,

    #[error("the refill worker has not started yet")]
    NotStarted,

    #[error("the refill worker stopped and no page will be handed out")]
    WorkerStopped,

    #[error("page {id} is not part of this pool")]
    UnknownPage { id: u64 },

    #[error("failed to spawn the refill worker: {0}")]
    Spawn(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// everything the generation engine and the optimizer facade can fail with
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("`{operation}` requires the engine to be {required:?}, but it is {actual:?}")]
    Precondition {
        operation: &'static str,
        required: EngineState,
        actual: EngineState,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    RandomPool(#[from] RandomPoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type EngineResult<T> = Result<T, EngineError>;
