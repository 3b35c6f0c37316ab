use super::StreamingMetric;
use num_traits::ToPrimitive;

/// The arithmetic mean of a stream of `f32`s. It finalizes to `None` if no values were aggregated.
#[derive(Debug, Clone, Default)]
pub struct Mean {
	n: u64,
	sum: f64,
}

impl StreamingMetric<'_> for Mean {
	type Input = f32;
	type Output = Option<f32>;

	fn update(&mut self, value: f32) {
		self.n += 1;
		self.sum += value.to_f64().unwrap();
	}

	fn merge(&mut self, other: Self) {
		self.n += other.n;
		self.sum += other.sum;
	}

	fn finalize(self) -> Option<f32> {
		if self.n == 0 {
			None
		} else {
			(self.sum / self.n.to_f64().unwrap()).to_f32()
		}
	}
}

#[test]
fn test_mean() {
	let mut mean = Mean::default();
	for value in &[0.5, 0.75, 1.0] {
		mean.update(*value);
	}
	assert!((mean.finalize().unwrap() - 0.75).abs() < std::f32::EPSILON);
	assert_eq!(Mean::default().finalize(), None);
}
