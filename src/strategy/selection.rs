use super::SelectionStrategy;
use crate::population::{IndividualMut, IndividualRef, Population};

/// keeps the trial individual only if it is strictly better; ties keep the incumbent
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedySelection;

impl SelectionStrategy for GreedySelection {
    #[inline]
    fn select(&self, index: usize, current: &Population, next: &mut IndividualMut<'_>, trial: IndividualRef<'_>) {
        if trial.fitness < current.fitness(index) {
            next.assign(trial);
        } else {
            next.assign(current.row(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;

    #[test]
    fn test_tie_keeps_incumbent() {
        let device = CpuDevice::with_threads(1).unwrap();
        let mut current = Population::allocate(&device, 4, 1).unwrap();
        current.upload_individuals(&device, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        // fitness is zero everywhere after allocation

        let mut genes = [0.0];
        let mut fitness = 0.0;
        let mut next = IndividualMut { genes: &mut genes, fitness: &mut fitness };
        GreedySelection.select(2, &current, &mut next, IndividualRef { genes: &[9.0], fitness: 0.0 });
        assert_eq!(next.view(), IndividualRef { genes: &[3.0], fitness: 0.0 });

        GreedySelection.select(2, &current, &mut next, IndividualRef { genes: &[9.0], fitness: -1.0 });
        assert_eq!(next.view(), IndividualRef { genes: &[9.0], fitness: -1.0 });
    }
}
