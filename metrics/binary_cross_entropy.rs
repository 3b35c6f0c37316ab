use super::mean::Mean;
use super::StreamingMetric;
use num_traits::clamp;

/// The mean log loss of a stream of predicted probabilities against their labels. Probabilities are clamped to `[EPSILON, 1 - EPSILON]` so confident mistakes stay finite.
#[derive(Debug, Default)]
pub struct BinaryCrossEntropy(Mean);

pub struct BinaryCrossEntropyInput {
	pub probability: f32,
	pub label: bool,
}

impl StreamingMetric<'_> for BinaryCrossEntropy {
	type Input = BinaryCrossEntropyInput;
	type Output = Option<f32>;

	fn update(&mut self, input: BinaryCrossEntropyInput) {
		let probability = clamp(input.probability, std::f32::EPSILON, 1.0 - std::f32::EPSILON);
		let loss = if input.label {
			-probability.ln()
		} else {
			-(1.0 - probability).ln()
		};
		self.0.update(loss);
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Option<f32> {
		self.0.finalize()
	}
}

#[test]
fn test_binary_cross_entropy() {
	let mut metric = BinaryCrossEntropy::default();
	metric.update(BinaryCrossEntropyInput {
		probability: 0.5,
		label: true,
	});
	metric.update(BinaryCrossEntropyInput {
		probability: 0.5,
		label: false,
	});
	let loss = metric.finalize().unwrap();
	assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
}
