/// initial population: every gene drawn uniformly inside its bounds
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rayon::prelude::*;

#[derive(Clone, Debug)]
pub struct PopulationSampler {
    size: usize,
    lower: Vec<f64>,
    upper: Vec<f64>,
    seed: u64,
}

impl PopulationSampler {
    pub fn new(size: usize, lower: &[f64], upper: &[f64], seed: u64) -> Self {
        Self { size, lower: lower.to_vec(), upper: upper.to_vec(), seed }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn vector_size(&self) -> usize {
        self.lower.len()
    }

    /// row-major `[size][vector_size]` samples, reproducible for a given seed
    /// regardless of how many threads fill the rows
    pub fn take_samples(&self) -> Vec<f64> {
        profiling::scope!("take_samples");
        let vector_size = self.vector_size();
        let mut master = Pcg32::seed_from_u64(self.seed);
        let seeds: Vec<u64> = (0..self.size).map(|_| master.random::<u64>()).collect();

        let mut samples = vec![0.0; self.size * vector_size];
        if vector_size == 0 {
            return samples;
        }
        samples
            .par_chunks_mut(vector_size)
            .zip(seeds.par_iter())
            .for_each(|(row, &seed)| {
                let mut rng = Pcg32::seed_from_u64(seed);
                for (gene, value) in row.iter_mut().enumerate() {
                    let (lo, hi) = (self.lower[gene], self.upper[gene]);
                    *value = lo + rng.random::<f64>() * (hi - lo);
                }
            });
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_stay_inside_bounds() {
        let sampler = PopulationSampler::new(500, &[-1.0, 10.0, 0.0], &[1.0, 20.0, 0.0], 7);
        let samples = sampler.take_samples();
        assert_eq!(samples.len(), 1500);
        for row in samples.chunks(3) {
            assert!((-1.0..=1.0).contains(&row[0]));
            assert!((10.0..=20.0).contains(&row[1]));
            assert_eq!(row[2], 0.0);
        }
    }

    #[test]
    fn test_same_seed_same_samples() {
        let a = PopulationSampler::new(64, &[-5.0; 4], &[5.0; 4], 42).take_samples();
        let b = PopulationSampler::new(64, &[-5.0; 4], &[5.0; 4], 42).take_samples();
        let c = PopulationSampler::new(64, &[-5.0; 4], &[5.0; 4], 43).take_samples();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
