use crate::{
	artifacts::{ArtifactRecord, ArtifactSet, ArtifactStore},
	config::{self, Config, Paths},
	error::PipelineError,
	grid::{self, Candidate, ModelFamily},
	model::Model,
	progress::Progress,
	select::{self, CandidateScore, SelectOptions},
};
use anyhow::{Context, Result};
use converge_dataframe::{DataFrame, FromCsvOptions};
use converge_features::{FeatureEncoder, Scaler, Schema, SparseMatrix};
use converge_metrics::{BinaryCrossEntropy, BinaryCrossEntropyInput, StreamingMetric};
use itertools::izip;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The settings of a training run, resolved from the config.
#[derive(Debug, Clone)]
pub struct TrainOptions {
	pub schema: Schema,
	pub shards_dir: PathBuf,
	pub shard_file_prefix: String,
	/// Shards `0..n_selection_shards` are pooled for model selection.
	pub n_selection_shards: usize,
	/// Shards `n_selection_shards..max_shard_index` are used for incremental training.
	pub max_shard_index: usize,
	pub incremental_rounds: usize,
	pub n_folds: usize,
	pub shuffle_seed: Option<u64>,
	pub candidates: Vec<Candidate>,
}

impl TrainOptions {
	pub fn from_config(config: &Option<Config>, paths: &Paths) -> TrainOptions {
		TrainOptions {
			schema: config::schema(config),
			shards_dir: paths.shards_dir.clone(),
			shard_file_prefix: config::shard_file_prefix(config),
			n_selection_shards: config::n_selection_shards(config),
			max_shard_index: config::max_shard_index(config),
			incremental_rounds: config::incremental_rounds(config),
			n_folds: config::n_folds(config),
			shuffle_seed: config::shuffle_seed(config),
			candidates: grid::default_candidates(),
		}
	}

	pub fn shard_path(&self, shard_index: usize) -> PathBuf {
		self.shards_dir
			.join(format!("{}{}.csv", self.shard_file_prefix, shard_index))
	}
}

pub struct TrainOutput {
	pub artifacts: ArtifactSet,
	pub report: TrainReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
	pub family: ModelFamily,
	pub scores: Vec<CandidateScore>,
	/// Every shard the model was trained on, in order, starting with the selection shards.
	pub trained_shard_indexes: Vec<usize>,
	/// Incremental shards whose file did not exist, in order.
	pub skipped_shard_indexes: Vec<usize>,
	/// The loss of the model on each incremental shard right after training on it.
	pub shard_losses: Vec<(usize, Option<f32>)>,
}

/**
Run a full training pass.

1. Fit the feature encoder on the first shard and the scaler on the pooled, encoded selection shards.
2. Choose a model family with cross validation on the pooled selection shards and refit it on all of them.
3. Train the model incrementally on each of the remaining shards in ascending order. A missing shard is logged and skipped. Any other failure aborts the run.
*/
pub fn train(options: &TrainOptions, update_progress: &mut dyn FnMut(Progress)) -> Result<TrainOutput> {
	info!(
		shards_dir = %options.shards_dir.display(),
		n_selection_shards = options.n_selection_shards,
		max_shard_index = options.max_shard_index,
		"starting training"
	);

	// Load the selection shards. Each of them is required.
	let mut selection_dataframes = Vec::with_capacity(options.n_selection_shards);
	for shard_index in 0..options.n_selection_shards {
		update_progress(Progress::LoadingShard { shard_index });
		let path = options.shard_path(shard_index);
		if !path.exists() {
			return Err(PipelineError::MissingShardFile(path).into());
		}
		selection_dataframes.push(load_shard(&path, &options.schema)?);
	}
	let first_dataframe = selection_dataframes
		.first()
		.ok_or_else(|| PipelineError::MissingShardFile(options.shard_path(0)))?;

	// The encoder only sees the first shard.
	let encoder = FeatureEncoder::fit(options.schema.clone(), first_dataframe)
		.map_err(PipelineError::from)
		.context("failed to fit the feature encoder")?;
	info!(n_features = encoder.n_features(), "fit feature encoder");

	let mut selection_features = Vec::with_capacity(selection_dataframes.len());
	let mut selection_labels = Vec::new();
	for (shard_index, dataframe) in selection_dataframes.iter().enumerate() {
		let (features, labels) = encode_training_shard(&encoder, dataframe)
			.with_context(|| format!("failed to encode shard {}", shard_index))?;
		selection_features.push(features);
		selection_labels.extend(labels);
	}
	let mut features = SparseMatrix::vstack(&selection_features.iter().collect::<Vec<_>>());
	let scaler = Scaler::fit(&features);
	scaler.transform(&mut features);

	let select::SelectOutput { mut model, scores } = select::select_model(
		&options.candidates,
		&features,
		&selection_labels,
		&SelectOptions {
			n_folds: options.n_folds,
			shuffle_seed: options.shuffle_seed,
		},
		&mut |progress| update_progress(Progress::Selecting(progress)),
	)?;
	let family = model.family();

	let mut trained_shard_indexes: Vec<usize> = (0..options.n_selection_shards).collect();
	let mut skipped_shard_indexes = Vec::new();
	let mut shard_losses = Vec::new();
	for shard_index in options.n_selection_shards..options.max_shard_index {
		let path = options.shard_path(shard_index);
		if !path.exists() {
			warn!(shard_index, path = %path.display(), "shard file does not exist, skipping");
			skipped_shard_indexes.push(shard_index);
			continue;
		}
		update_progress(Progress::LoadingShard { shard_index });
		let dataframe = load_shard(&path, &options.schema)?;
		let (mut features, labels) = encode_training_shard(&encoder, &dataframe)
			.with_context(|| format!("failed to encode shard {}", shard_index))?;
		scaler.transform(&mut features);
		model.train_incremental(
			&features,
			&labels,
			options.incremental_rounds,
			&mut |progress| update_progress(Progress::Training { shard_index, progress }),
		);
		let loss = compute_loss(&model, &features, &labels);
		info!(shard_index, n_examples = labels.len(), loss = ?loss, "trained on shard");
		trained_shard_indexes.push(shard_index);
		shard_losses.push((shard_index, loss));
	}

	info!(
		%family,
		trained = ?trained_shard_indexes,
		skipped = ?skipped_shard_indexes,
		"finished training"
	);
	Ok(TrainOutput {
		artifacts: ArtifactSet {
			encoder,
			scaler,
			model,
		},
		report: TrainReport {
			family,
			scores,
			trained_shard_indexes,
			skipped_shard_indexes,
			shard_losses,
		},
	})
}

/// Train with the settings in `config` and save the artifacts.
pub fn train_and_save(
	config: &Option<Config>,
	paths: &Paths,
	update_progress: &mut dyn FnMut(Progress),
) -> Result<(TrainReport, ArtifactRecord)> {
	let options = TrainOptions::from_config(config, paths);
	let TrainOutput { artifacts, report } = train(&options, update_progress)?;
	update_progress(Progress::Saving);
	let store = ArtifactStore::new(&paths.artifacts_dir);
	let record = store
		.save(&artifacts, &report.trained_shard_indexes, chrono::Utc::now())
		.context("failed to save artifacts")?;
	Ok((report, record))
}

/// Load a shard with the column types its schema declares.
pub fn load_shard(path: &Path, schema: &Schema) -> Result<DataFrame> {
	DataFrame::from_path(
		path,
		FromCsvOptions {
			column_types: Some(schema.column_types()),
			..Default::default()
		},
	)
	.with_context(|| format!("failed to load shard {}", path.display()))
}

fn encode_training_shard(
	encoder: &FeatureEncoder,
	dataframe: &DataFrame,
) -> Result<(SparseMatrix, Vec<bool>), PipelineError> {
	encoder.schema.validate(dataframe, true)?;
	let encoded = encoder.transform(dataframe)?;
	let labels = encoded.target.unwrap_or_default();
	Ok((encoded.features, labels))
}

fn compute_loss(model: &Model, features: &SparseMatrix, labels: &[bool]) -> Option<f32> {
	let output = model.predict(features);
	let mut loss = BinaryCrossEntropy::default();
	for (probability, label) in izip!(output.probabilities.iter(), labels.iter()) {
		loss.update(BinaryCrossEntropyInput {
			probability: *probability,
			label: *label,
		});
	}
	loss.finalize()
}
