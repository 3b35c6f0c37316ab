/*!
This crate implements the ridge classifier, the one linear model family among the session pipeline's candidates. Labels are mapped to -1 and +1, and the weights are the exact solution of the regularized least squares problem, found by running the [conjugate gradient](https://en.wikipedia.org/wiki/Conjugate_gradient_method) method on the normal equations without ever forming `XᵀX`.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod conjugate_gradient;
mod ridge_classifier;

pub use self::conjugate_gradient::{conjugate_gradient, ConjugateGradientOutput};
pub use self::ridge_classifier::RidgeClassifier;

/// These are the options passed to `RidgeClassifier::train` and `RidgeClassifier::train_incremental`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
	/// This is the L2 regularization strength. The bias is not regularized.
	pub alpha: f32,
	/// This is the maximum number of conjugate gradient iterations.
	pub max_iterations: usize,
	/// The solver stops when the norm of the residual falls below `tolerance` times the norm of the right hand side.
	pub tolerance: f64,
}

impl Default for TrainOptions {
	fn default() -> Self {
		Self {
			alpha: 1.0,
			max_iterations: 1000,
			tolerance: 1e-10,
		}
	}
}
