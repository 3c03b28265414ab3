/// DE/rand/1/bin mutation with resample-on-violation bound handling
use super::MutationStrategy;
use crate::device::{Device, DeviceBuffer};
use crate::error::{ConfigError, EngineError};
use crate::population::{IndividualMut, Population};
use crate::random::RandomDraws;

/// donors combined into one mutant: r1 + F * (r2 - r3)
pub const DONOR_COUNT: usize = 3;

/// max draws per gene: the crossover coin plus an optional resample
const DRAWS_PER_GENE: usize = 2;

/// per-gene search box, resident on the device
#[derive(Debug)]
pub struct DeviceBounds {
    lower: DeviceBuffer,
    upper: DeviceBuffer,
}

impl DeviceBounds {
    pub fn upload<D: Device>(device: &D, lower: &[f64], upper: &[f64]) -> Result<Self, EngineError> {
        if lower.len() != upper.len() {
            return Err(ConfigError::BoundLengthMismatch {
                lower: lower.len(),
                upper: upper.len(),
                vector_size: lower.len(),
            }
            .into());
        }
        Ok(Self { lower: device.alloc_from(lower)?, upper: device.alloc_from(upper)? })
    }

    pub fn lower(&self) -> &[f64] {
        self.lower.as_slice()
    }

    pub fn upper(&self) -> &[f64] {
        self.upper.as_slice()
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }
}

#[derive(Debug)]
pub struct RandOneBin {
    bounds: DeviceBounds,
    mutation_force: f64,
    crossover_factor: f64,
}

impl RandOneBin {
    pub fn new(bounds: DeviceBounds, mutation_force: f64, crossover_factor: f64) -> Self {
        Self { bounds, mutation_force, crossover_factor }
    }

}

/// three donors, pairwise distinct and all different from `index`. needs `size >= 4`.
///
/// each draw picks from the `size - 1` indices other than `index`; a collision with an earlier
/// donor walks forward (wrapping, skipping `index`) to the next free one.
pub fn choose_donors<R: RandomDraws>(index: usize, size: usize, random: &mut R) -> [usize; DONOR_COUNT] {
    debug_assert!(size > DONOR_COUNT);
    let mut donors = [0; DONOR_COUNT];
    for slot in 0..DONOR_COUNT {
        let mut candidate = random.next_index(size - 2);
        if candidate >= index {
            candidate += 1;
        }
        while donors[..slot].contains(&candidate) {
            candidate = (candidate + 1) % size;
            if candidate == index {
                candidate = (candidate + 1) % size;
            }
        }
        donors[slot] = candidate;
    }
    donors
}

impl MutationStrategy for RandOneBin {
    #[inline]
    fn mutate<R: RandomDraws>(
        &self,
        index: usize,
        current: &Population,
        trial: &mut IndividualMut<'_>,
        random: &mut R,
    ) {
        let [r1, r2, r3] = choose_donors(index, current.size(), random);
        let (a, b, c) = (current.individual(r1), current.individual(r2), current.individual(r3));
        let incumbent = current.individual(index);
        let (lower, upper) = (self.bounds.lower(), self.bounds.upper());

        for (gene, value) in trial.genes.iter_mut().enumerate() {
            if random.next_double() <= self.crossover_factor {
                let mutant = a[gene] + self.mutation_force * (b[gene] - c[gene]);
                let (lo, hi) = (lower[gene], upper[gene]);
                // NaN fails the range check too and gets resampled
                *value = if mutant >= lo && mutant <= hi {
                    mutant
                } else {
                    (lo + random.next_double() * (hi - lo)).min(hi)
                };
            } else {
                *value = incumbent[gene];
            }
        }
    }

    fn max_draws_per_individual(&self, vector_size: usize) -> usize {
        DONOR_COUNT + DRAWS_PER_GENE * vector_size
    }

    fn vector_size(&self) -> Option<usize> {
        Some(self.bounds.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use crate::random::PageCursor;

    fn population(device: &CpuDevice, rows: &[f64], vector_size: usize) -> Population {
        let mut population = Population::allocate(device, rows.len() / vector_size, vector_size).unwrap();
        population.upload_individuals(device, rows).unwrap();
        population
    }

    #[test]
    fn test_donor_collision_walks_forward() {
        // every draw maps to candidate 0, so collisions must walk to 2 and 3 (skipping index 1)
        let draws = [0.0, 0.0, 0.0];
        let mut cursor = PageCursor::new(&draws, 0);
        assert_eq!(choose_donors(1, 4, &mut cursor), [0, 2, 3]);
        assert_eq!(cursor.consumed(), 3);
    }

    #[test]
    fn test_donor_walk_wraps_around() {
        // top of the range for index 0 is 3; the following collisions wrap to 1 and 2
        let draws = [0.99, 0.99, 0.99];
        let mut cursor = PageCursor::new(&draws, 0);
        assert_eq!(choose_donors(0, 4, &mut cursor), [3, 1, 2]);
    }

    #[test]
    fn test_crossover_and_copy_paths() {
        let device = CpuDevice::with_threads(1).unwrap();
        let current = population(&device, &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 4.0, 4.0], 2);
        let bounds = DeviceBounds::upload(&device, &[-10.0, -10.0], &[10.0, 10.0]).unwrap();
        let strategy = RandOneBin::new(bounds, 0.5, 0.8);

        // donors for index 0 from draws 0.0 / 0.4 / 0.7 -> 1, 2, 3. gene 0 crosses over, gene 1 copies.
        let draws = [0.0, 0.4, 0.7, 0.1, 0.9];
        let mut cursor = PageCursor::new(&draws, 0);
        let mut genes = [f64::NAN; 2];
        let mut fitness = 0.0;
        let mut trial = IndividualMut { genes: &mut genes, fitness: &mut fitness };
        strategy.mutate(0, &current, &mut trial, &mut cursor);

        assert_eq!(genes, [1.0 + 0.5 * (2.0 - 4.0), 0.0]);
        assert_eq!(cursor.consumed(), 5);
    }

    #[test]
    fn test_out_of_bounds_mutant_is_resampled() {
        let device = CpuDevice::with_threads(1).unwrap();
        let current = population(&device, &[0.0, 9.0, 1.0, -9.0], 1);
        let bounds = DeviceBounds::upload(&device, &[-10.0], &[10.0]).unwrap();
        let strategy = RandOneBin::new(bounds, 2.0, 1.0);

        // donors for index 2: 1 (9.0), 0 (0.0), 3 (-9.0). mutant 9 + 2 * (0 + 9) = 27 leaves the box
        let draws = [0.4, 0.0, 0.99, 0.5, 0.25];
        let mut cursor = PageCursor::new(&draws, 0);
        let mut genes = [0.0];
        let mut fitness = 0.0;
        let mut trial = IndividualMut { genes: &mut genes, fitness: &mut fitness };
        strategy.mutate(2, &current, &mut trial, &mut cursor);

        assert_eq!(cursor.consumed(), 5);
        assert_eq!(genes[0], -10.0 + 0.25 * 20.0);
    }

    #[test]
    fn test_max_draws() {
        let device = CpuDevice::with_threads(1).unwrap();
        let bounds = DeviceBounds::upload(&device, &[0.0; 3], &[1.0; 3]).unwrap();
        assert_eq!(RandOneBin::new(bounds, 0.3, 0.8).max_draws_per_individual(3), 9);
    }

    #[test]
    fn test_bound_lengths_must_match() {
        let device = CpuDevice::with_threads(1).unwrap();
        let err = DeviceBounds::upload(&device, &[0.0; 2], &[1.0; 3]).unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::BoundLengthMismatch { .. })));
    }
}
