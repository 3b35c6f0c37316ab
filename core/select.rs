use crate::{
	error::PipelineError,
	grid::{Candidate, ModelFamily},
	model::{Model, ModelTrainProgress},
};
use converge_features::SparseMatrix;
use converge_metrics::{auc_roc, Mean, StreamingMetric};
use rand::{seq::SliceRandom, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use tracing::{debug, info};

pub struct SelectOptions {
	pub n_folds: usize,
	/// If set, the examples of each class are shuffled with this seed before they are split into folds.
	pub shuffle_seed: Option<u64>,
}

/// The cross validation score of one candidate. Folds with only one class have no AUC and are excluded from the mean.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
	pub family: ModelFamily,
	pub fold_aucs: Vec<Option<f32>>,
	pub mean_auc: Option<f32>,
}

#[derive(Debug)]
pub struct SelectOutput {
	/// The winning candidate refit on all of the examples.
	pub model: Model,
	pub scores: Vec<CandidateScore>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectProgress {
	CrossValidating {
		family: ModelFamily,
		fold_index: usize,
		n_folds: usize,
	},
	Refitting {
		family: ModelFamily,
		progress: ModelTrainProgress,
	},
}

/// Score each candidate with stratified k-fold cross validation and refit the best one on all of the examples. A candidate only replaces the current best if its mean AUC is strictly greater, so ties go to the earlier candidate.
pub fn select_model(
	candidates: &[Candidate],
	features: &SparseMatrix,
	labels: &[bool],
	options: &SelectOptions,
	update_progress: &mut dyn FnMut(SelectProgress),
) -> Result<SelectOutput, PipelineError> {
	let folds = stratified_k_fold(labels, options.n_folds, options.shuffle_seed);
	let mut scores = Vec::with_capacity(candidates.len());
	for candidate in candidates.iter() {
		let score = cross_validate(candidate, features, labels, &folds, update_progress);
		info!(
			family = %score.family,
			mean_auc = ?score.mean_auc,
			"cross validated candidate"
		);
		scores.push(score);
	}
	let best_index = choose_best(&scores).ok_or(PipelineError::ModelSelection)?;
	let candidate = &candidates[best_index];
	let family = candidate.family();
	info!(%family, "selected model family");
	let model = Model::train(candidate, features, labels, &mut |progress| {
		update_progress(SelectProgress::Refitting { family, progress })
	});
	Ok(SelectOutput { model, scores })
}

/// The index of the first candidate with the highest defined mean AUC.
pub fn choose_best(scores: &[CandidateScore]) -> Option<usize> {
	let mut best: Option<(usize, f32)> = None;
	for (index, score) in scores.iter().enumerate() {
		let mean_auc = match score.mean_auc {
			Some(mean_auc) => mean_auc,
			None => continue,
		};
		match best {
			Some((_, best_auc)) if mean_auc <= best_auc => {}
			_ => best = Some((index, mean_auc)),
		}
	}
	best.map(|(index, _)| index)
}

pub fn cross_validate(
	candidate: &Candidate,
	features: &SparseMatrix,
	labels: &[bool],
	folds: &[Vec<usize>],
	update_progress: &mut dyn FnMut(SelectProgress),
) -> CandidateScore {
	let family = candidate.family();
	let mut mean = Mean::default();
	let mut fold_aucs = Vec::with_capacity(folds.len());
	for (fold_index, test_indices) in folds.iter().enumerate() {
		update_progress(SelectProgress::CrossValidating {
			family,
			fold_index,
			n_folds: folds.len(),
		});
		let train_indices = complement(test_indices, labels.len());
		let train_labels: Vec<bool> = train_indices.iter().map(|i| labels[*i]).collect();
		let test_labels: Vec<bool> = test_indices.iter().map(|i| labels[*i]).collect();
		let model = Model::train(
			candidate,
			&features.select_rows(&train_indices),
			&train_labels,
			&mut |_| {},
		);
		let output = model.predict(&features.select_rows(test_indices));
		let auc = auc_roc(output.probabilities.as_slice().unwrap_or(&[]), &test_labels);
		debug!(%family, fold_index, auc = ?auc, "scored fold");
		if let Some(auc) = auc {
			mean.update(auc);
		}
		fold_aucs.push(auc);
	}
	CandidateScore {
		family,
		fold_aucs,
		mean_auc: mean.finalize(),
	}
}

/**
Split the examples into `n_folds` test folds that preserve the class proportions. The examples of each class are dealt into contiguous blocks in order, with the first `count % n_folds` blocks one example larger. Fold `i` is the union of block `i` of every class. The indices of each fold are sorted.
*/
pub fn stratified_k_fold(labels: &[bool], n_folds: usize, shuffle_seed: Option<u64>) -> Vec<Vec<usize>> {
	let n_folds = n_folds.max(2);
	let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_folds];
	let mut rng = shuffle_seed.map(Xoshiro256Plus::seed_from_u64);
	for class in [false, true].iter() {
		let mut indices: Vec<usize> = labels
			.iter()
			.enumerate()
			.filter(|(_, label)| *label == class)
			.map(|(index, _)| index)
			.collect();
		if let Some(rng) = rng.as_mut() {
			indices.shuffle(rng);
		}
		let block_size = indices.len() / n_folds;
		let n_larger_blocks = indices.len() % n_folds;
		let mut start = 0;
		for (fold_index, fold) in folds.iter_mut().enumerate() {
			let size = block_size + if fold_index < n_larger_blocks { 1 } else { 0 };
			fold.extend_from_slice(&indices[start..start + size]);
			start += size;
		}
	}
	for fold in folds.iter_mut() {
		fold.sort_unstable();
	}
	folds
}

fn complement(sorted_indices: &[usize], n: usize) -> Vec<usize> {
	let mut excluded = sorted_indices.iter().peekable();
	(0..n)
		.filter(|index| {
			if excluded.peek() == Some(&index) {
				excluded.next();
				false
			} else {
				true
			}
		})
		.collect()
}
