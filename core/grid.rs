use serde::{Deserialize, Serialize};
use std::fmt;

/// The three model families the selector evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
	GradientBoostedTrees,
	Ridge,
	HistogramGradientBoosting,
}

impl ModelFamily {
	pub fn as_str(&self) -> &'static str {
		match self {
			ModelFamily::GradientBoostedTrees => "gradient_boosted_trees",
			ModelFamily::Ridge => "ridge",
			ModelFamily::HistogramGradientBoosting => "histogram_gradient_boosting",
		}
	}
}

impl fmt::Display for ModelFamily {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
	GradientBoostedTrees(converge_tree::TrainOptions),
	Ridge(converge_linear::TrainOptions),
	HistogramGradientBoosting(converge_tree::TrainOptions),
}

impl Candidate {
	pub fn family(&self) -> ModelFamily {
		match self {
			Candidate::GradientBoostedTrees(_) => ModelFamily::GradientBoostedTrees,
			Candidate::Ridge(_) => ModelFamily::Ridge,
			Candidate::HistogramGradientBoosting(_) => ModelFamily::HistogramGradientBoosting,
		}
	}

	/// The candidate a family is trained with. Hyperparameters are fixed per family, so a saved model is extended with the same options it was selected with.
	pub fn for_family(family: ModelFamily) -> Candidate {
		match family {
			ModelFamily::GradientBoostedTrees => Candidate::GradientBoostedTrees(
				converge_tree::TrainOptions::gradient_boosted_trees(),
			),
			ModelFamily::Ridge => Candidate::Ridge(converge_linear::TrainOptions::default()),
			ModelFamily::HistogramGradientBoosting => Candidate::HistogramGradientBoosting(
				converge_tree::TrainOptions::histogram_gradient_boosting(),
			),
		}
	}
}

/// The candidates in evaluation order. Ties in cross validation score go to the earlier candidate.
pub fn default_candidates() -> Vec<Candidate> {
	[
		ModelFamily::GradientBoostedTrees,
		ModelFamily::Ridge,
		ModelFamily::HistogramGradientBoosting,
	]
	.iter()
	.map(|family| Candidate::for_family(*family))
	.collect()
}

#[test]
fn test_default_candidates() {
	let families: Vec<String> = default_candidates()
		.iter()
		.map(|candidate| candidate.family().to_string())
		.collect();
	assert_eq!(
		families,
		vec![
			"gradient_boosted_trees",
			"ridge",
			"histogram_gradient_boosting"
		]
	);
}

#[test]
fn test_for_family_matches_default_candidates() {
	for candidate in default_candidates() {
		assert_eq!(Candidate::for_family(candidate.family()), candidate);
	}
	assert_ne!(
		Candidate::for_family(ModelFamily::Ridge),
		Candidate::Ridge(converge_linear::TrainOptions {
			alpha: 2.0,
			..Default::default()
		})
	);
}
