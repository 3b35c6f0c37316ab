use crate::{
	train::{sigmoid, train_rounds},
	BiasInitialization, TrainOptions, TrainProgress, Tree,
};
use converge_features::SparseMatrix;
use ndarray::prelude::*;
use num_traits::{clamp, ToPrimitive};
use serde::{Deserialize, Serialize};

/// A `BinaryClassifier` predicts the probability of the positive class as the sigmoid of its bias plus the sum of the outputs of its trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryClassifier {
	/// The initial prediction of the model given no trained trees.
	pub bias: f32,
	/// The trees for this model, in the order they were trained.
	pub trees: Vec<Tree>,
}

impl BinaryClassifier {
	/// Train a binary classifier with `options.max_rounds` trees.
	pub fn train(
		features: &SparseMatrix,
		labels: &[bool],
		options: &TrainOptions,
		update_progress: &mut dyn FnMut(TrainProgress),
	) -> BinaryClassifier {
		let bias = match options.bias {
			BiasInitialization::Zero => 0.0,
			BiasInitialization::LogOdds => compute_log_odds(labels),
		};
		let mut margins = vec![bias; features.nrows()];
		let trees = train_rounds(
			features,
			labels,
			&mut margins,
			options.max_rounds,
			options,
			update_progress,
		);
		BinaryClassifier { bias, trees }
	}

	/// Extend the ensemble with `n_rounds` trees fit to a new batch of examples. The bias and the existing trees are left unchanged, and the new trees start from the margins the existing ones produce.
	pub fn train_incremental(
		&mut self,
		features: &SparseMatrix,
		labels: &[bool],
		n_rounds: usize,
		options: &TrainOptions,
		update_progress: &mut dyn FnMut(TrainProgress),
	) {
		let mut margins = self.predict_margins(features).to_vec();
		let trees = train_rounds(
			features,
			labels,
			&mut margins,
			n_rounds,
			options,
			update_progress,
		);
		self.trees.extend(trees);
	}

	/// Compute the bias plus the sum of the tree outputs for each example.
	pub fn predict_margins(&self, features: &SparseMatrix) -> Array1<f32> {
		features
			.rows()
			.map(|row| {
				self.bias
					+ self
						.trees
						.iter()
						.map(|tree| tree.predict(row))
						.sum::<f32>()
			})
			.collect()
	}

	/// Compute the probability of the positive class for each example.
	pub fn predict(&self, features: &SparseMatrix) -> Array1<f32> {
		self.predict_margins(features).mapv_into(sigmoid)
	}
}

/// The log of the ratio of positive to negative examples. The ratio is clamped so that a batch with a single class still produces a finite bias.
pub fn compute_log_odds(labels: &[bool]) -> f32 {
	if labels.is_empty() {
		return 0.0;
	}
	let n_positive = labels.iter().filter(|label| **label).count();
	let fraction = n_positive.to_f32().unwrap() / labels.len().to_f32().unwrap();
	let fraction = clamp(fraction, std::f32::EPSILON, 1.0 - std::f32::EPSILON);
	(fraction / (1.0 - fraction)).ln()
}

#[cfg(test)]
mod test {
	use super::*;

	fn dataset() -> (SparseMatrix, Vec<bool>) {
		// The label is positive exactly when the first feature exceeds 5.
		let dense = Array2::from_shape_fn((60, 2), |(i, j)| match j {
			0 => (i % 10) as f32,
			_ => (i % 3) as f32,
		});
		let labels = (0..60).map(|i| i % 10 > 5).collect();
		(SparseMatrix::from_dense(dense.view()), labels)
	}

	#[test]
	fn test_train_and_predict() {
		let (features, labels) = dataset();
		for options in [
			TrainOptions::gradient_boosted_trees(),
			TrainOptions::histogram_gradient_boosting(),
		]
		.iter()
		{
			let model = BinaryClassifier::train(&features, &labels, options, &mut |_| {});
			assert_eq!(model.trees.len(), 100);
			let probabilities = model.predict(&features);
			for (probability, label) in probabilities.iter().zip(labels.iter()) {
				assert_eq!(*probability > 0.5, *label);
			}
		}
	}

	#[test]
	fn test_bias() {
		let (features, labels) = dataset();
		let options = TrainOptions {
			max_rounds: 0,
			..TrainOptions::histogram_gradient_boosting()
		};
		let model = BinaryClassifier::train(&features, &labels, &options, &mut |_| {});
		assert!((model.bias - (24.0f32 / 36.0).ln()).abs() < 1e-6);
		let model = BinaryClassifier::train(
			&features,
			&labels,
			&TrainOptions {
				max_rounds: 0,
				..TrainOptions::gradient_boosted_trees()
			},
			&mut |_| {},
		);
		assert_eq!(model.bias, 0.0);
		assert!(compute_log_odds(&[true, true]).is_finite());
	}

	#[test]
	fn test_train_incremental_keeps_existing_trees() {
		let (features, labels) = dataset();
		let options = TrainOptions {
			max_rounds: 5,
			..TrainOptions::gradient_boosted_trees()
		};
		let mut model = BinaryClassifier::train(&features, &labels, &options, &mut |_| {});
		let before = model.clone();
		let new_features = features.select_rows(&(0..30).collect::<Vec<_>>());
		model.train_incremental(&new_features, &labels[..30], 3, &options, &mut |_| {});
		assert_eq!(model.bias, before.bias);
		assert_eq!(model.trees.len(), 8);
		assert_eq!(&model.trees[..5], &before.trees[..]);
	}
}
