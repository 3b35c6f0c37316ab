/*!
This module persists the three artifacts a training run produces: the feature encoder, the scaler, and the model. Each is written to its own file, which starts with a single byte holding the major version of the format followed by the value encoded as MessagePack.

File names embed the creation time at minute granularity and a version counter, for example `model_202610161230_000004.bin`. The counter and the file names of every saved set are recorded in `artifacts.json` beside the artifacts, and [`ArtifactStore::latest`](struct.ArtifactStore.html#method.latest) reads that record. Directories written before the record existed are resolved by picking the lexically last model file.
*/

use crate::{error::PipelineError, grid::ModelFamily, model::Model};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use converge_features::{FeatureEncoder, Scaler};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
	io::{Read, Write},
	path::{Path, PathBuf},
};
use tracing::info;

const MAJOR_VERSION: u8 = 0;
const RECORD_FILE_NAME: &str = "artifacts.json";

/// The artifacts that are always saved and loaded together.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSet {
	pub encoder: FeatureEncoder,
	pub scaler: Scaler,
	pub model: Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
	pub version: u64,
	/// Formatted as `%Y%m%d%H%M`.
	pub created_at: String,
	pub model_file_name: String,
	pub encoder_file_name: String,
	pub scaler_file_name: String,
	/// Only missing for sets resolved from file names alone.
	pub family: Option<ModelFamily>,
	/// The training shards the model has seen, in the order it saw them.
	#[serde(default)]
	pub shard_indexes: Vec<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionRecord {
	latest_version: u64,
	artifacts: Vec<ArtifactRecord>,
}

pub struct ArtifactStore {
	dir: PathBuf,
}

impl ArtifactStore {
	pub fn new(dir: impl Into<PathBuf>) -> ArtifactStore {
		ArtifactStore { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Write a new artifact set with the next version number and record it as the latest.
	pub fn save(
		&self,
		artifacts: &ArtifactSet,
		shard_indexes: &[usize],
		created_at: DateTime<Utc>,
	) -> Result<ArtifactRecord> {
		std::fs::create_dir_all(&self.dir).with_context(|| {
			format!("failed to create artifact directory {}", self.dir.display())
		})?;
		let mut version_record = self.read_version_record()?.unwrap_or_default();
		if version_record.artifacts.is_empty() {
			// Continue numbering after any sets saved without a record.
			version_record.latest_version = self
				.legacy_latest()?
				.map(|record| record.version)
				.unwrap_or(0);
		}
		let version = version_record.latest_version + 1;
		let suffix = format!("{}_{:06}.bin", created_at.format("%Y%m%d%H%M"), version);
		let record = ArtifactRecord {
			version,
			created_at: created_at.format("%Y%m%d%H%M").to_string(),
			model_file_name: format!("model_{}", suffix),
			encoder_file_name: format!("encoder_{}", suffix),
			scaler_file_name: format!("scaler_{}", suffix),
			family: Some(artifacts.model.family()),
			shard_indexes: shard_indexes.to_owned(),
		};
		write_artifact(&self.dir.join(&record.encoder_file_name), &artifacts.encoder)?;
		write_artifact(&self.dir.join(&record.scaler_file_name), &artifacts.scaler)?;
		write_artifact(&self.dir.join(&record.model_file_name), &artifacts.model)?;
		version_record.latest_version = version;
		version_record.artifacts.push(record.clone());
		let record_path = self.dir.join(RECORD_FILE_NAME);
		let json = serde_json::to_string_pretty(&version_record)?;
		std::fs::write(&record_path, json)
			.with_context(|| format!("failed to write {}", record_path.display()))?;
		info!(
			version,
			model = %record.model_file_name,
			dir = %self.dir.display(),
			"saved artifacts"
		);
		Ok(record)
	}

	/// The most recently saved artifact set, if any.
	pub fn latest(&self) -> Result<Option<ArtifactRecord>> {
		if let Some(version_record) = self.read_version_record()? {
			if let Some(record) = version_record
				.artifacts
				.into_iter()
				.max_by_key(|record| record.version)
			{
				return Ok(Some(record));
			}
		}
		self.legacy_latest()
	}

	pub fn load(&self, record: &ArtifactRecord) -> Result<ArtifactSet> {
		let encoder = read_artifact(&self.dir.join(&record.encoder_file_name))?;
		let scaler = read_artifact(&self.dir.join(&record.scaler_file_name))?;
		let model = read_artifact(&self.dir.join(&record.model_file_name))?;
		Ok(ArtifactSet {
			encoder,
			scaler,
			model,
		})
	}

	pub fn load_latest(&self) -> Result<(ArtifactRecord, ArtifactSet)> {
		let record = self
			.latest()?
			.ok_or_else(|| PipelineError::MissingArtifact(self.dir.clone()))?;
		let artifacts = self.load(&record)?;
		Ok((record, artifacts))
	}

	fn read_version_record(&self) -> Result<Option<VersionRecord>> {
		let path = self.dir.join(RECORD_FILE_NAME);
		if !path.exists() {
			return Ok(None);
		}
		let json = std::fs::read_to_string(&path)
			.with_context(|| format!("failed to read {}", path.display()))?;
		let record = serde_json::from_str(&json)
			.with_context(|| format!("failed to parse {}", path.display()))?;
		Ok(Some(record))
	}

	/// Pick the lexically last `model_*.bin` file. The encoder and scaler share its suffix.
	fn legacy_latest(&self) -> Result<Option<ArtifactRecord>> {
		if !self.dir.exists() {
			return Ok(None);
		}
		let mut model_file_names = Vec::new();
		for entry in std::fs::read_dir(&self.dir)
			.with_context(|| format!("failed to read directory {}", self.dir.display()))?
		{
			let file_name = entry?.file_name().to_string_lossy().into_owned();
			if file_name.starts_with("model_") && file_name.ends_with(".bin") {
				model_file_names.push(file_name);
			}
		}
		model_file_names.sort();
		let model_file_name = match model_file_names.pop() {
			Some(model_file_name) => model_file_name,
			None => return Ok(None),
		};
		let suffix = &model_file_name["model_".len()..];
		let stem = &suffix[..suffix.len() - ".bin".len()];
		let mut parts = stem.splitn(2, '_');
		let created_at = parts.next().unwrap_or_default().to_owned();
		let version = parts
			.next()
			.and_then(|version| version.parse().ok())
			.unwrap_or(0);
		Ok(Some(ArtifactRecord {
			version,
			created_at,
			encoder_file_name: format!("encoder_{}", suffix),
			scaler_file_name: format!("scaler_{}", suffix),
			model_file_name,
			family: None,
			shard_indexes: Vec::new(),
		}))
	}
}

/// Write `value` to the file at `path` with the major version header.
pub fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	let file = std::fs::File::create(path)
		.with_context(|| format!("failed to create {}", path.display()))?;
	let mut writer = std::io::BufWriter::new(file);
	writer.write_all(&[MAJOR_VERSION])?;
	rmp_serde::encode::write_named(&mut writer, value)?;
	writer.flush()?;
	Ok(())
}

/// Read a value written by `write_artifact`.
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
	let file =
		std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
	let mut reader = std::io::BufReader::new(file);
	let mut major_version = [0u8; 1];
	reader.read_exact(&mut major_version)?;
	let major_version = major_version[0];
	if major_version != MAJOR_VERSION {
		return Err(PipelineError::UnsupportedArtifactVersion(major_version).into());
	}
	let value = rmp_serde::from_read(&mut reader)
		.with_context(|| format!("failed to decode {}", path.display()))?;
	Ok(value)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::grid::{default_candidates, Candidate};
	use chrono::TimeZone;
	use converge_dataframe::{Column, DataFrame, NumberColumn, TextColumn};
	use converge_features::{ColumnRole, ColumnSchema, Schema};

	fn artifact_set() -> ArtifactSet {
		let schema = Schema {
			columns: vec![
				ColumnSchema {
					name: "session_id".to_owned(),
					role: ColumnRole::Identifying,
				},
				ColumnSchema {
					name: "utm_source".to_owned(),
					role: ColumnRole::Categorical,
				},
				ColumnSchema {
					name: "conversion_rate".to_owned(),
					role: ColumnRole::Target,
				},
			],
		};
		let dataframe = DataFrame {
			columns: vec![
				Column::Text(TextColumn::with_data(
					"session_id".to_owned(),
					(0..4).map(|i| i.to_string()).collect(),
				)),
				Column::Text(TextColumn::with_data(
					"utm_source".to_owned(),
					vec!["a", "b", "a", "b"].into_iter().map(String::from).collect(),
				)),
				Column::Number(NumberColumn::with_data(
					"conversion_rate".to_owned(),
					vec![1.0, 0.0, 1.0, 0.0],
				)),
			],
		};
		let encoder = FeatureEncoder::fit(schema, &dataframe).unwrap();
		let mut encoded = encoder.transform(&dataframe).unwrap();
		let scaler = Scaler::fit(&encoded.features);
		scaler.transform(&mut encoded.features);
		let labels = encoded.target.unwrap();
		let candidate: &Candidate = &default_candidates()[1];
		let model = Model::train(candidate, &encoded.features, &labels, &mut |_| {});
		ArtifactSet {
			encoder,
			scaler,
			model,
		}
	}

	#[test]
	fn test_save_and_load_latest() {
		let dir = tempfile::tempdir().unwrap();
		let store = ArtifactStore::new(dir.path());
		assert!(store.latest().unwrap().is_none());
		let error = store.load_latest().unwrap_err();
		assert!(matches!(
			error.downcast_ref::<PipelineError>(),
			Some(PipelineError::MissingArtifact(_))
		));
		let artifacts = artifact_set();
		let first = store
			.save(&artifacts, &[0, 1, 2], Utc.with_ymd_and_hms(2026, 10, 16, 12, 30, 5).unwrap())
			.unwrap();
		assert_eq!(first.model_file_name, "model_202610161230_000001.bin");
		assert_eq!(first.encoder_file_name, "encoder_202610161230_000001.bin");
		let second = store
			.save(&artifacts, &[0, 1, 2, 3], Utc.with_ymd_and_hms(2026, 10, 16, 12, 30, 40).unwrap())
			.unwrap();
		assert_eq!(second.version, 2);
		assert_eq!(second.scaler_file_name, "scaler_202610161230_000002.bin");
		let (record, loaded) = store.load_latest().unwrap();
		assert_eq!(record, second);
		assert_eq!(record.family, Some(ModelFamily::Ridge));
		assert_eq!(loaded, artifacts);
	}

	#[test]
	fn test_legacy_resolution() {
		let dir = tempfile::tempdir().unwrap();
		let artifacts = artifact_set();
		for suffix in &["202401010000_000001.bin", "202402010000_000002.bin"] {
			write_artifact(&dir.path().join(format!("model_{}", suffix)), &artifacts.model)
				.unwrap();
			write_artifact(&dir.path().join(format!("encoder_{}", suffix)), &artifacts.encoder)
				.unwrap();
			write_artifact(&dir.path().join(format!("scaler_{}", suffix)), &artifacts.scaler)
				.unwrap();
		}
		let store = ArtifactStore::new(dir.path());
		let record = store.latest().unwrap().unwrap();
		assert_eq!(record.model_file_name, "model_202402010000_000002.bin");
		assert_eq!(record.scaler_file_name, "scaler_202402010000_000002.bin");
		assert_eq!(record.version, 2);
		assert_eq!(record.family, None);
		assert_eq!(store.load(&record).unwrap(), artifacts);
		// The first recorded save continues the numbering.
		let saved = store
			.save(&artifacts, &[], Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
			.unwrap();
		assert_eq!(saved.version, 3);
	}

	#[test]
	fn test_unsupported_version() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.bin");
		std::fs::write(&path, &[1u8, 0x90]).unwrap();
		let error = read_artifact::<Model>(&path).unwrap_err();
		assert!(matches!(
			error.downcast_ref::<PipelineError>(),
			Some(PipelineError::UnsupportedArtifactVersion(1))
		));
	}
}
