/// reference objective functions (all minimized)
/// used by the demo binary and the end-to-end tests; real callers bring their own `FitnessInvoker`
use crate::population::IndividualMut;
use crate::strategy::FitnessInvoker;

/// adapts any `Fn(&[f64]) -> f64` into a fitness invoker
pub struct FnFitness<F> {
    function: F,
}

impl<F> FnFitness<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> FitnessInvoker for FnFitness<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    #[inline]
    fn invoke(&self, _index: usize, individual: &mut IndividualMut<'_>) {
        *individual.fitness = (self.function)(individual.genes);
    }
}

/// generalized Rosenbrock: sum of `(a - x_i)^2 + b * (x_{i+1} - x_i^2)^2`, minimum 0 at (a, a^2, ...)
/// for a = 1 that is the all-ones vector
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rosenbrock {
    pub a: f64,
    pub b: f64,
}

impl Default for Rosenbrock {
    fn default() -> Self {
        Self { a: 1.0, b: 100.0 }
    }
}

impl Rosenbrock {
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        x.windows(2)
            .map(|pair| {
                let (xi, xn) = (pair[0], pair[1]);
                (self.a - xi).powi(2) + self.b * (xn - xi * xi).powi(2)
            })
            .sum()
    }
}

impl FitnessInvoker for Rosenbrock {
    #[inline]
    fn invoke(&self, _index: usize, individual: &mut IndividualMut<'_>) {
        *individual.fitness = self.evaluate(individual.genes);
    }
}

/// sum of squares, minimum 0 at the origin
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sphere;

impl FitnessInvoker for Sphere {
    #[inline]
    fn invoke(&self, _index: usize, individual: &mut IndividualMut<'_>) {
        *individual.fitness = individual.genes.iter().map(|x| x * x).sum();
    }
}

/// least-squares fit of a polynomial (genes = coefficients, lowest degree first)
/// against sampled points
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialFit {
    points: Vec<(f64, f64)>,
}

impl PolynomialFit {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// 12 samples of a slowly decaying curve on [1, 6.5]
    pub fn decay_samples() -> Self {
        let xs = [1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0, 6.5];
        let ys = [0.264, 0.228, 0.194, 0.176, 0.162, 0.15, 0.14, 0.134, 0.13, 0.122, 0.12, 0.114];
        Self::new(xs.into_iter().zip(ys).collect())
    }

    pub fn evaluate(&self, coefficients: &[f64]) -> f64 {
        self.points
            .iter()
            .map(|&(x, y)| {
                // horner
                let value = coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c);
                (y - value).powi(2)
            })
            .sum()
    }
}

impl FitnessInvoker for PolynomialFit {
    #[inline]
    fn invoke(&self, _index: usize, individual: &mut IndividualMut<'_>) {
        *individual.fitness = self.evaluate(individual.genes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke(fitness: &impl FitnessInvoker, genes: &[f64]) -> f64 {
        let mut genes = genes.to_vec();
        let mut value = f64::NAN;
        fitness.invoke(0, &mut IndividualMut { genes: &mut genes, fitness: &mut value });
        value
    }

    #[test]
    fn test_rosenbrock_minimum() {
        let rosenbrock = Rosenbrock::default();
        assert_eq!(invoke(&rosenbrock, &[1.0, 1.0]), 0.0);
        assert_eq!(invoke(&rosenbrock, &[1.0, 1.0, 1.0, 1.0]), 0.0);
        // (1 - 0)^2 + 100 * (0 - 0)^2
        assert_eq!(invoke(&rosenbrock, &[0.0, 0.0]), 1.0);
        assert_eq!(invoke(&rosenbrock, &[-1.0, 1.0]), 4.0);
    }

    #[test]
    fn test_sphere_and_closure() {
        assert_eq!(invoke(&Sphere, &[3.0, 4.0]), 25.0);
        let abs_sum = FnFitness::new(|x: &[f64]| x.iter().map(|v| v.abs()).sum());
        assert_eq!(invoke(&abs_sum, &[-1.0, 2.0, -3.0]), 6.0);
    }

    #[test]
    fn test_polynomial_fit_exact() {
        // y = 1 + 2x sampled exactly
        let fit = PolynomialFit::new(vec![(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]);
        assert_eq!(invoke(&fit, &[1.0, 2.0]), 0.0);
        assert_eq!(invoke(&fit, &[1.0, 2.0, 0.0]), 0.0);
        assert!(invoke(&fit, &[0.0, 2.0]) > 0.0);
        assert_eq!(PolynomialFit::decay_samples().points.len(), 12);
    }
}
