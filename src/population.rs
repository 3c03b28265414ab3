/// device-resident populations and the three-slot buffer rotation
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceBuffer};
use crate::error::DeviceError;

/// struct-of-arrays population: `fitness[N]` and row-major `individuals[N * D]`
/// sharing one index space. the shape never changes after allocation.
#[derive(Debug)]
pub struct Population {
    fitness: DeviceBuffer,
    individuals: DeviceBuffer,
    size: usize,
    vector_size: usize,
}

impl Population {
    pub fn allocate<D: Device>(device: &D, size: usize, vector_size: usize) -> Result<Self, DeviceError> {
        profiling::scope!("Population::allocate");
        Ok(Self {
            fitness: device.alloc(size)?,
            individuals: device.alloc(size * vector_size)?,
            size,
            vector_size,
        })
    }

    /// copy host-side gene rows in; fitness stays untouched until the init pass
    pub fn upload_individuals<D: Device>(&mut self, device: &D, rows: &[f64]) -> Result<(), DeviceError> {
        device.upload(&mut self.individuals, rows)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// start of row `index` in the flat individuals buffer
    #[inline]
    pub fn offset(&self, index: usize) -> usize {
        index * self.vector_size
    }

    #[inline]
    pub fn individual(&self, index: usize) -> &[f64] {
        let start = self.offset(index);
        &self.individuals.as_slice()[start..start + self.vector_size]
    }

    #[inline]
    pub fn gene(&self, index: usize, gene: usize) -> f64 {
        self.individuals.as_slice()[self.offset(index) + gene]
    }

    #[inline]
    pub fn fitness(&self, index: usize) -> f64 {
        self.fitness.as_slice()[index]
    }

    pub fn fitness_values(&self) -> &[f64] {
        self.fitness.as_slice()
    }

    #[inline]
    pub fn row(&self, index: usize) -> IndividualRef<'_> {
        IndividualRef { genes: self.individual(index), fitness: self.fitness(index) }
    }

    /// one disjoint mutable view per individual, in index order. this is the work
    /// handed to `Device::launch`.
    pub fn rows_mut(&mut self) -> impl IndexedParallelIterator<Item = IndividualMut<'_>> + '_ {
        self.individuals
            .as_mut_slice()
            .par_chunks_mut(self.vector_size)
            .zip(self.fitness.as_mut_slice().par_iter_mut())
            .map(|(genes, fitness)| IndividualMut { genes, fitness })
    }

    /// host copy of the fitness array alone
    pub fn download_fitness<D: Device>(&self, device: &D) -> Result<Vec<f64>, DeviceError> {
        let mut fitness = vec![0.0; self.size];
        device.download(&self.fitness, &mut fitness)?;
        Ok(fitness)
    }

    pub fn download<D: Device>(&self, device: &D) -> Result<HostPopulation, DeviceError> {
        profiling::scope!("Population::download");
        let mut host = HostPopulation {
            fitness: vec![0.0; self.size],
            individuals: vec![0.0; self.size * self.vector_size],
            vector_size: self.vector_size,
        };
        device.download(&self.fitness, &mut host.fitness)?;
        device.download(&self.individuals, &mut host.individuals)?;
        Ok(host)
    }
}

/// read-only view of one individual
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndividualRef<'a> {
    pub genes: &'a [f64],
    pub fitness: f64,
}

/// the slice of a population one device task owns during a launch
#[derive(Debug)]
pub struct IndividualMut<'a> {
    pub genes: &'a mut [f64],
    pub fitness: &'a mut f64,
}

impl IndividualMut<'_> {
    pub fn view(&self) -> IndividualRef<'_> {
        IndividualRef { genes: &*self.genes, fitness: *self.fitness }
    }

    /// overwrite genes and fitness with `source`
    #[inline]
    pub fn assign(&mut self, source: IndividualRef<'_>) {
        self.genes.copy_from_slice(source.genes);
        *self.fitness = source.fitness;
    }
}

/// current / next / trial buffers. `trial` always lives in slot 2; current and next
/// trade slots 0 and 1 on every rotation, so contents are never copied.
#[derive(Debug)]
pub struct PopulationBufferSet {
    slots: [Population; 3],
    swapped: bool,
}

impl PopulationBufferSet {
    pub fn allocate<D: Device>(device: &D, size: usize, vector_size: usize) -> Result<Self, DeviceError> {
        Ok(Self {
            slots: [
                Population::allocate(device, size, vector_size)?,
                Population::allocate(device, size, vector_size)?,
                Population::allocate(device, size, vector_size)?,
            ],
            swapped: false,
        })
    }

    pub fn current(&self) -> &Population {
        &self.slots[self.roles()[0]]
    }

    pub fn current_mut(&mut self) -> &mut Population {
        let slot = self.roles()[0];
        &mut self.slots[slot]
    }

    pub fn next(&self) -> &Population {
        &self.slots[self.roles()[1]]
    }

    pub fn trial(&self) -> &Population {
        &self.slots[2]
    }

    /// slot index holding (current, next, trial)
    pub fn roles(&self) -> [usize; 3] {
        if self.swapped {
            [1, 0, 2]
        } else {
            [0, 1, 2]
        }
    }

    /// `(current, next) = (next, current)`
    pub fn rotate(&mut self) {
        self.swapped = !self.swapped;
    }

    /// borrow all three roles at once: current shared, next and trial exclusive
    pub fn split_mut(&mut self) -> (&Population, &mut Population, &mut Population) {
        let [first, second, trial] = &mut self.slots;
        if self.swapped {
            (second, first, trial)
        } else {
            (first, second, trial)
        }
    }
}

/// owned copy of one individual, independent of any device buffer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub vector: Vec<f64>,
    pub fitness: f64,
}

/// host copy of a whole population
#[derive(Clone, Debug, PartialEq)]
pub struct HostPopulation {
    pub fitness: Vec<f64>,
    pub individuals: Vec<f64>,
    pub vector_size: usize,
}

impl HostPopulation {
    pub fn len(&self) -> usize {
        self.fitness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fitness.is_empty()
    }

    pub fn individual(&self, index: usize) -> &[f64] {
        let start = index * self.vector_size;
        &self.individuals[start..start + self.vector_size]
    }

    pub fn snapshot(&self, index: usize) -> Individual {
        Individual { vector: self.individual(index).to_vec(), fitness: self.fitness[index] }
    }
}

/// index of the smallest fitness. linear scan with strict `<`, so the first
/// occurrence wins ties; NaN never wins. None if every value is NaN.
pub fn best_index(fitness: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &value) in fitness.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, incumbent)) if value >= incumbent => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}
