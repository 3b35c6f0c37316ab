use super::{conjugate_gradient, TrainOptions};
use converge_features::SparseMatrix;
use itertools::izip;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Neg;
use tracing::warn;

/**
A `RidgeClassifier` fits a linear function to targets of -1 and +1 by minimizing `‖Xw + b - y‖² + α‖w - w₀‖²`. For a freshly trained model `w₀` is zero. When training incrementally `w₀` is the current weights, so each new shard moves the model away from what it learned before only as far as the new data justifies.

The predicted label is positive when the decision value `x·w + b` is positive. Probabilities are the sigmoid of the decision value.
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeClassifier {
	pub weights: Array1<f32>,
	pub bias: f32,
	/// The number of conjugate gradient iterations used by each call to `train` or `train_incremental`.
	pub n_iterations: Vec<usize>,
}

impl RidgeClassifier {
	pub fn train(features: &SparseMatrix, labels: &[bool], options: &TrainOptions) -> RidgeClassifier {
		let mut model = RidgeClassifier {
			weights: Array1::zeros(features.ncols()),
			bias: 0.0,
			n_iterations: Vec::new(),
		};
		model.train_incremental(features, labels, options);
		model
	}

	/// Continue training on a new batch of examples, using the current weights as the center of the regularization penalty and as the solver's starting point.
	pub fn train_incremental(&mut self, features: &SparseMatrix, labels: &[bool], options: &TrainOptions) {
		assert_eq!(features.ncols(), self.weights.len());
		assert_eq!(features.nrows(), labels.len());
		let n_features = features.ncols();
		let alpha = f64::from(options.alpha);
		let prior: Array1<f64> = self.weights.mapv(f64::from);

		// The right hand side is [Xᵀy + αw₀, 1ᵀy].
		let mut rhs = Array1::<f64>::zeros(n_features + 1);
		for (row, label) in izip!(features.rows(), labels.iter()) {
			let y = if *label { 1.0 } else { -1.0 };
			for (column_index, value) in row.iter() {
				rhs[column_index] += f64::from(value) * y;
			}
			rhs[n_features] += y;
		}
		rhs.slice_mut(s![..n_features]).scaled_add(alpha, &prior);

		let mut initial = Array1::<f64>::zeros(n_features + 1);
		initial.slice_mut(s![..n_features]).assign(&prior);
		initial[n_features] = f64::from(self.bias);

		let output = conjugate_gradient(
			|theta| apply_normal_operator(features, alpha, theta),
			rhs.view(),
			initial,
			options.max_iterations,
			options.tolerance,
		);
		self.weights = output
			.solution
			.slice(s![..n_features])
			.mapv(|weight| weight as f32);
		self.bias = output.solution[n_features] as f32;
		if !output.converged {
			warn!(
				n_iterations = output.n_iterations,
				max_iterations = options.max_iterations,
				"conjugate gradient did not converge, keeping the last iterate"
			);
		}
		self.n_iterations.push(output.n_iterations);
	}

	/// Compute `x·w + b` for each example.
	pub fn decision_function(&self, features: &SparseMatrix) -> Array1<f32> {
		features.dot(self.weights.view()) + self.bias
	}

	/// Compute the probability of the positive class for each example.
	pub fn predict(&self, features: &SparseMatrix) -> Array1<f32> {
		self.decision_function(features)
			.mapv_into(|decision| 1.0 / (decision.neg().exp() + 1.0))
	}
}

/// Compute `[XᵀXw + Xᵀ1b + αw, 1ᵀXw + nb]` for `theta = [w, b]`.
fn apply_normal_operator(features: &SparseMatrix, alpha: f64, theta: ArrayView1<f64>) -> Array1<f64> {
	let n_features = features.ncols();
	let weights = theta.slice(s![..n_features]);
	let bias = theta[n_features];
	let mut output = Array1::<f64>::zeros(n_features + 1);
	for row in features.rows() {
		let z = bias
			+ row
				.iter()
				.map(|(column_index, value)| f64::from(value) * weights[column_index])
				.sum::<f64>();
		for (column_index, value) in row.iter() {
			output[column_index] += f64::from(value) * z;
		}
		output[n_features] += z;
	}
	for (output, weight) in izip!(output.slice_mut(s![..n_features]), weights) {
		*output += alpha * weight;
	}
	output
}
