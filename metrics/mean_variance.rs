//! https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance#Parallel_algorithm

use super::Metric;
use num_traits::ToPrimitive;

/// The population mean and variance of a slice of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanVariance {
	pub n: u64,
	pub mean: f64,
	pub m2: f64,
}

impl<'a> Metric<'a> for MeanVariance {
	type Input = &'a [f32];
	type Output = MeanVariance;

	fn compute(values: &'a [f32]) -> MeanVariance {
		let mut n = 0u64;
		let mut mean = 0.0f64;
		let mut m2 = 0.0f64;
		for value in values {
			let value = value.to_f64().unwrap();
			n += 1;
			let delta = value - mean;
			mean += delta / n.to_f64().unwrap();
			m2 += delta * (value - mean);
		}
		MeanVariance { n, mean, m2 }
	}
}

impl MeanVariance {
	/// Merge in `n_zeros` implicit zero values, the entries a sparse column does not store.
	pub fn with_zeros(self, n_zeros: u64) -> MeanVariance {
		if n_zeros == 0 {
			return self;
		}
		if self.n == 0 {
			return MeanVariance {
				n: n_zeros,
				mean: 0.0,
				m2: 0.0,
			};
		}
		let (mean, m2) = merge_mean_m2(self.n, self.mean, self.m2, n_zeros, 0.0, 0.0);
		MeanVariance {
			n: self.n + n_zeros,
			mean,
			m2,
		}
	}

	pub fn variance(&self) -> f32 {
		if self.n == 0 {
			0.0
		} else {
			m2_to_variance(self.m2, self.n)
		}
	}
}

/// combine two separate means and variances into a single mean and variance
/// useful in parallel algorithms
pub fn merge_mean_m2(
	n_a: u64,
	mean_a: f64,
	m2_a: f64,
	n_b: u64,
	mean_b: f64,
	m2_b: f64,
) -> (f64, f64) {
	let n_a = n_a.to_f64().unwrap();
	let n_b = n_b.to_f64().unwrap();
	(
		(((n_a * mean_a) + (n_b * mean_b)) / (n_a + n_b)),
		m2_a + m2_b + (mean_b - mean_a) * (mean_b - mean_a) * (n_a * n_b / (n_a + n_b)),
	)
}

pub fn m2_to_variance(m2: f64, n: u64) -> f32 {
	(m2 / n.to_f64().unwrap()) as f32
}

#[test]
fn test_with_zeros() {
	let dense = MeanVariance::compute(&[2.0, 4.0, 0.0, 0.0]);
	let sparse = MeanVariance::compute(&[2.0, 4.0]).with_zeros(2);
	assert_eq!(dense.n, sparse.n);
	assert!((dense.mean - sparse.mean).abs() < 1e-9);
	assert!((dense.variance() - sparse.variance()).abs() < 1e-6);
	assert!((sparse.variance() - 2.75).abs() < 1e-6);
}
