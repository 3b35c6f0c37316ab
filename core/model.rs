use crate::grid::{Candidate, ModelFamily};
use converge_features::SparseMatrix;
use converge_linear::RidgeClassifier;
use converge_tree::BinaryClassifier;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Neg;

/// A trained model of one of the three families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
	GradientBoostedTrees(BinaryClassifier),
	Ridge(RidgeClassifier),
	HistogramGradientBoosting(BinaryClassifier),
}

/// The output of a model for a batch of examples.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
	pub probabilities: Array1<f32>,
	pub labels: Vec<bool>,
}

/// Progress reported while a model trains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelTrainProgress {
	Tree(converge_tree::TrainProgress),
	/// Ridge models are solved in a single step.
	Ridge,
}

impl Model {
	pub fn family(&self) -> ModelFamily {
		match self {
			Model::GradientBoostedTrees(_) => ModelFamily::GradientBoostedTrees,
			Model::Ridge(_) => ModelFamily::Ridge,
			Model::HistogramGradientBoosting(_) => ModelFamily::HistogramGradientBoosting,
		}
	}

	pub fn train(
		candidate: &Candidate,
		features: &SparseMatrix,
		labels: &[bool],
		update_progress: &mut dyn FnMut(ModelTrainProgress),
	) -> Model {
		match candidate {
			Candidate::GradientBoostedTrees(options) => {
				Model::GradientBoostedTrees(BinaryClassifier::train(
					features,
					labels,
					options,
					&mut |progress| update_progress(ModelTrainProgress::Tree(progress)),
				))
			}
			Candidate::Ridge(options) => {
				update_progress(ModelTrainProgress::Ridge);
				Model::Ridge(RidgeClassifier::train(features, labels, options))
			}
			Candidate::HistogramGradientBoosting(options) => {
				Model::HistogramGradientBoosting(BinaryClassifier::train(
					features,
					labels,
					options,
					&mut |progress| update_progress(ModelTrainProgress::Tree(progress)),
				))
			}
		}
	}

	/// Continue training on a new shard. Boosted models append `n_rounds` trees fit to the shard. Ridge models re-solve on the shard with the penalty centered on their current weights.
	pub fn train_incremental(
		&mut self,
		features: &SparseMatrix,
		labels: &[bool],
		n_rounds: usize,
		update_progress: &mut dyn FnMut(ModelTrainProgress),
	) {
		match self {
			Model::GradientBoostedTrees(model) => model.train_incremental(
				features,
				labels,
				n_rounds,
				&converge_tree::TrainOptions::gradient_boosted_trees(),
				&mut |progress| update_progress(ModelTrainProgress::Tree(progress)),
			),
			Model::Ridge(model) => {
				update_progress(ModelTrainProgress::Ridge);
				model.train_incremental(features, labels, &converge_linear::TrainOptions::default())
			}
			Model::HistogramGradientBoosting(model) => model.train_incremental(
				features,
				labels,
				n_rounds,
				&converge_tree::TrainOptions::histogram_gradient_boosting(),
				&mut |progress| update_progress(ModelTrainProgress::Tree(progress)),
			),
		}
	}

	/// The raw score of each example. The predicted label is positive when the score is positive.
	pub fn decision_function(&self, features: &SparseMatrix) -> Array1<f32> {
		match self {
			Model::GradientBoostedTrees(model) | Model::HistogramGradientBoosting(model) => {
				model.predict_margins(features)
			}
			Model::Ridge(model) => model.decision_function(features),
		}
	}

	pub fn predict(&self, features: &SparseMatrix) -> ModelOutput {
		let decisions = self.decision_function(features);
		let labels = decisions.iter().map(|decision| *decision > 0.0).collect();
		let probabilities = decisions.mapv_into(|decision| 1.0 / (decision.neg().exp() + 1.0));
		ModelOutput {
			probabilities,
			labels,
		}
	}
}
