/// optimizer settings
/// loaded from / saved to JSON, validated before any device resource is allocated
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// smallest population the donor selection can work with (index + 3 distinct donors)
pub const MIN_POPULATION_SIZE: usize = 4;

/// random draws the DE/rand/1/bin mutation may consume for one individual:
/// 3 donor draws + up to 2 draws per gene
pub const fn reference_page_size(vector_size: usize) -> usize {
    3 + 2 * vector_size
}

/// how the generation loop gets its random numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// one page segment per generation, page recycled after its last segment
    SinglePage,
    /// every checked-out page is swept `number_of_reuses` times before it is recycled
    Reusing { number_of_reuses: usize },
    /// per-individual generator streams, no page pool at all
    Stream,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    // problem shape
    pub population_size: usize,
    pub individual_vector_size: usize,
    pub lower_bound: Vec<f64>,
    pub upper_bound: Vec<f64>,

    // DE/rand/1/bin parameters
    /// F, scales the donor difference vector
    pub mutation_force: f64,
    /// probability of taking the mutated gene instead of the incumbent one
    pub crossover_factor: f64,
    pub max_generations: u64,

    // random page pool
    pub random_pool_size: usize,
    /// draws reserved per individual in one page segment (None = 3 + 2D)
    pub random_page_size: Option<usize>,
    /// segments per page, i.e. generations served by one checkout
    pub number_of_pages: usize,

    pub run_mode: RunMode,
    pub seed: u64,
    /// worker threads for the cpu device (0 = one per core)
    pub device_threads: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            population_size: 1024,
            individual_vector_size: 2,
            lower_bound: vec![-2000.0; 2],
            upper_bound: vec![2000.0; 2],

            mutation_force: 0.3,
            crossover_factor: 0.8,
            max_generations: 1000,

            random_pool_size: 4,
            random_page_size: None,
            number_of_pages: 16,

            run_mode: RunMode::SinglePage,
            seed: 0xDEAD_BEEF,
            device_threads: 0,
        }
    }
}

impl OptimizerSettings {
    /// settings for a `vector_size`-dimensional box `[lower, upper]^D`, defaults elsewhere
    pub fn with_uniform_bounds(vector_size: usize, lower: f64, upper: f64) -> Self {
        Self {
            individual_vector_size: vector_size,
            lower_bound: vec![lower; vector_size],
            upper_bound: vec![upper; vector_size],
            ..Self::default()
        }
    }

    pub fn page_size(&self) -> usize {
        self.random_page_size
            .unwrap_or_else(|| reference_page_size(self.individual_vector_size))
    }

    /// page segments swept per checkout
    pub fn sweeps_per_checkout(&self) -> usize {
        match self.run_mode {
            RunMode::Reusing { number_of_reuses } => number_of_reuses.saturating_mul(self.number_of_pages),
            RunMode::SinglePage | RunMode::Stream => self.number_of_pages,
        }
    }

    /// check every rule that does not depend on the mutation strategy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size < MIN_POPULATION_SIZE {
            return Err(ConfigError::PopulationTooSmall {
                minimum: MIN_POPULATION_SIZE,
                actual: self.population_size,
            });
        }
        if self.individual_vector_size == 0 {
            return Err(ConfigError::EmptyIndividual);
        }
        if self.lower_bound.len() != self.individual_vector_size
            || self.upper_bound.len() != self.individual_vector_size
        {
            return Err(ConfigError::BoundLengthMismatch {
                lower: self.lower_bound.len(),
                upper: self.upper_bound.len(),
                vector_size: self.individual_vector_size,
            });
        }
        for (gene, (&lower, &upper)) in self.lower_bound.iter().zip(&self.upper_bound).enumerate() {
            // also rejects NaN, which fails every comparison
            if !(lower.is_finite() && upper.is_finite() && lower <= upper) {
                return Err(ConfigError::InvalidBounds { gene, lower, upper });
            }
        }
        if !(0.0..=2.0).contains(&self.mutation_force) {
            return Err(ConfigError::MutationForce(self.mutation_force));
        }
        if !(0.0..=1.0).contains(&self.crossover_factor) {
            return Err(ConfigError::CrossoverFactor(self.crossover_factor));
        }
        if self.max_generations == 0 {
            return Err(ConfigError::ZeroGenerations);
        }

        if self.run_mode != RunMode::Stream {
            if self.random_pool_size == 0 {
                return Err(ConfigError::EmptyRandomPool);
            }
            if self.number_of_pages == 0 {
                return Err(ConfigError::ZeroPages);
            }
        }
        if let RunMode::Reusing { number_of_reuses } = self.run_mode {
            if number_of_reuses == 0 {
                return Err(ConfigError::ZeroReuses);
            }
            if number_of_reuses.checked_mul(self.number_of_pages).is_none() {
                return Err(ConfigError::TooManyReuses {
                    number_of_reuses,
                    number_of_pages: self.number_of_pages,
                });
            }
        }
        Ok(())
    }

    /// `validate` plus the page size check against what the mutation strategy consumes
    pub fn validate_for(&self, draws_per_individual: usize) -> Result<(), ConfigError> {
        self.validate()?;
        if self.run_mode != RunMode::Stream && self.page_size() < draws_per_individual {
            return Err(ConfigError::PageTooSmall {
                required: draws_per_individual,
                actual: self.page_size(),
            });
        }
        Ok(())
    }

    /// save settings to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// load settings from a JSON file, or return defaults if it is missing or unparsable
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse settings, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "settings not readable, using defaults");
                Self::default()
            }
        }
    }
}
