/*!
This module defines the `Config` struct, which is read from an optional yaml file and configures every stage of the pipeline. Every field is optional. The accessor functions at the bottom of this module resolve each setting against its default.
*/

use anyhow::{Context, Result};
use converge_features::Schema;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct Config {
	/// The columns of a session shard and their roles. Defaults to `Schema::session_default()`.
	pub schema: Option<Schema>,
	pub paths: Option<PathsConfig>,
	pub training: Option<TrainingConfig>,
	pub cross_validation: Option<CrossValidationConfig>,
	pub upload: Option<UploadConfig>,
}

/// Directories are resolved relative to the project path unless they are absolute.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct PathsConfig {
	pub raw_dir: Option<PathBuf>,
	pub aggregated_dir: Option<PathBuf>,
	pub shards_dir: Option<PathBuf>,
	pub artifacts_dir: Option<PathBuf>,
	pub predictions_dir: Option<PathBuf>,
	pub warehouse_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct TrainingConfig {
	pub n_selection_shards: Option<usize>,
	/// Shards with an index below this value are read by the incremental trainer.
	pub max_shard_index: Option<usize>,
	pub shard_file_prefix: Option<String>,
	/// The number of trees appended to a boosted model for each incremental shard.
	pub incremental_rounds: Option<usize>,
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct CrossValidationConfig {
	pub n_folds: Option<usize>,
	pub shuffle: Option<Shuffle>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum Shuffle {
	Enabled(bool),
	Options { seed: u64 },
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct UploadConfig {
	pub max_failures: Option<usize>,
}

/// The directories every stage reads from and writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
	/// Raw `hits` and `sessions` json extracts.
	pub raw_dir: PathBuf,
	/// Session shards written by the aggregator and read by the predictor.
	pub aggregated_dir: PathBuf,
	/// Training shards named `<prefix><index>.csv`.
	pub shards_dir: PathBuf,
	pub artifacts_dir: PathBuf,
	pub predictions_dir: PathBuf,
	pub warehouse_dir: PathBuf,
}

impl Paths {
	pub fn resolve(project_path: &Path, config: &Option<Config>) -> Paths {
		let paths = config.as_ref().and_then(|config| config.paths.as_ref());
		let resolve = |path: Option<&PathBuf>, default: &str| {
			project_path.join(path.map(PathBuf::as_path).unwrap_or_else(|| Path::new(default)))
		};
		Paths {
			raw_dir: resolve(paths.and_then(|p| p.raw_dir.as_ref()), "data/raw"),
			aggregated_dir: resolve(
				paths.and_then(|p| p.aggregated_dir.as_ref()),
				"data/aggregated",
			),
			shards_dir: resolve(paths.and_then(|p| p.shards_dir.as_ref()), "data/shards"),
			artifacts_dir: resolve(
				paths.and_then(|p| p.artifacts_dir.as_ref()),
				"data/artifacts",
			),
			predictions_dir: resolve(
				paths.and_then(|p| p.predictions_dir.as_ref()),
				"data/predictions",
			),
			warehouse_dir: resolve(
				paths.and_then(|p| p.warehouse_dir.as_ref()),
				"data/warehouse",
			),
		}
	}
}

/// Load the config from the yaml file at `config_path`, if provided.
pub fn load_config(config_path: Option<&Path>) -> Result<Option<Config>> {
	if let Some(config_path) = config_path {
		let config = std::fs::read_to_string(config_path)
			.with_context(|| format!("failed to read config file {}", config_path.display()))?;
		let config = serde_yaml::from_str(&config)
			.with_context(|| format!("failed to parse config file {}", config_path.display()))?;
		Ok(Some(config))
	} else {
		Ok(None)
	}
}

pub fn schema(config: &Option<Config>) -> Schema {
	config
		.as_ref()
		.and_then(|config| config.schema.clone())
		.unwrap_or_else(Schema::session_default)
}

pub fn n_selection_shards(config: &Option<Config>) -> usize {
	training(config)
		.and_then(|training| training.n_selection_shards)
		.unwrap_or(3)
}

pub fn max_shard_index(config: &Option<Config>) -> usize {
	training(config)
		.and_then(|training| training.max_shard_index)
		.unwrap_or(19)
}

pub fn shard_file_prefix(config: &Option<Config>) -> String {
	training(config)
		.and_then(|training| training.shard_file_prefix.clone())
		.unwrap_or_else(|| "mod-".to_owned())
}

pub fn incremental_rounds(config: &Option<Config>) -> usize {
	training(config)
		.and_then(|training| training.incremental_rounds)
		.unwrap_or(20)
}

pub fn n_folds(config: &Option<Config>) -> usize {
	config
		.as_ref()
		.and_then(|config| config.cross_validation.as_ref())
		.and_then(|cross_validation| cross_validation.n_folds)
		.unwrap_or(5)
}

/// Cross validation folds are contiguous blocks of each class unless shuffling is enabled. Enabling shuffling without a seed uses a seed of 42.
pub fn shuffle_seed(config: &Option<Config>) -> Option<u64> {
	let default_seed = 42;
	config
		.as_ref()
		.and_then(|config| config.cross_validation.as_ref())
		.and_then(|cross_validation| cross_validation.shuffle.as_ref())
		.and_then(|shuffle| match shuffle {
			Shuffle::Enabled(enabled) => {
				if *enabled {
					Some(default_seed)
				} else {
					None
				}
			}
			Shuffle::Options { seed } => Some(*seed),
		})
}

pub fn max_failures(config: &Option<Config>) -> Option<usize> {
	config
		.as_ref()
		.and_then(|config| config.upload.as_ref())
		.and_then(|upload| upload.max_failures)
}

fn training(config: &Option<Config>) -> Option<&TrainingConfig> {
	config.as_ref().and_then(|config| config.training.as_ref())
}
