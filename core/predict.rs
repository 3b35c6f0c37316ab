use crate::{
	artifacts::{ArtifactRecord, ArtifactSet, ArtifactStore},
	classify::{classify, OutcomeTag},
	error::PipelineError,
	train::load_shard,
};
use anyhow::{Context, Result};
use converge_dataframe::{Column, DataFrame, NumberColumn, TextColumn};
use itertools::izip;
use std::path::{Path, PathBuf};
use tracing::info;

pub const PROBABILITY_COLUMN_NAME: &str = "probability";
pub const PREDICTED_LABEL_COLUMN_NAME: &str = "predicted_label";
pub const PREDICTED_CLASS_COLUMN_NAME: &str = "predicted_class";

/// The prediction for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
	/// The values of the identifying columns, in schema order.
	pub identifiers: Vec<(String, String)>,
	pub probability: f32,
	pub predicted_label: bool,
	pub predicted_class: OutcomeTag,
}

/// A `Predictor` holds one frozen artifact set. Construct it once and use it for every shard of a run.
pub struct Predictor {
	artifacts: ArtifactSet,
	record: Option<ArtifactRecord>,
}

impl Predictor {
	pub fn new(artifacts: ArtifactSet) -> Predictor {
		Predictor {
			artifacts,
			record: None,
		}
	}

	/// Load the latest artifact set from `store`. This fails with `PipelineError::MissingArtifact` if no model has been saved.
	pub fn load(store: &ArtifactStore) -> Result<Predictor> {
		let (record, artifacts) = store.load_latest()?;
		info!(
			model = %record.model_file_name,
			family = ?record.family,
			"loaded artifacts"
		);
		Ok(Predictor {
			artifacts,
			record: Some(record),
		})
	}

	pub fn record(&self) -> Option<&ArtifactRecord> {
		self.record.as_ref()
	}

	pub fn predict(&self, dataframe: &DataFrame) -> Result<Vec<PredictionRecord>, PipelineError> {
		let ArtifactSet {
			encoder,
			scaler,
			model,
		} = &self.artifacts;
		let mut encoded = encoder.transform(dataframe)?;
		scaler.transform(&mut encoded.features);
		let output = model.predict(&encoded.features);
		let records = izip!(output.probabilities.iter(), output.labels.iter())
			.enumerate()
			.map(|(row_index, (probability, label))| PredictionRecord {
				identifiers: encoded
					.identifiers
					.iter()
					.map(|column| (column.name.clone(), column.values[row_index].clone()))
					.collect(),
				probability: *probability,
				predicted_label: *label,
				predicted_class: classify(*probability, *label),
			})
			.collect();
		Ok(records)
	}

	/// Predict a shard and return it without the target column and with the `probability`, `predicted_label`, and `predicted_class` columns appended. Rows keep their order.
	pub fn predict_dataframe(&self, dataframe: &DataFrame) -> Result<DataFrame, PipelineError> {
		let records = self.predict(dataframe)?;
		let mut output = dataframe.clone();
		if let Some(target_column_name) = self.artifacts.encoder.schema.target_column_name() {
			output.remove_column(target_column_name);
		}
		output.push_column(Column::Number(NumberColumn::with_data(
			PROBABILITY_COLUMN_NAME.to_owned(),
			records.iter().map(|record| record.probability).collect(),
		)));
		output.push_column(Column::Number(NumberColumn::with_data(
			PREDICTED_LABEL_COLUMN_NAME.to_owned(),
			records
				.iter()
				.map(|record| if record.predicted_label { 1.0 } else { 0.0 })
				.collect(),
		)));
		output.push_column(Column::Text(TextColumn::with_data(
			PREDICTED_CLASS_COLUMN_NAME.to_owned(),
			records
				.iter()
				.map(|record| record.predicted_class.to_string())
				.collect(),
		)));
		Ok(output)
	}

	/// Predict every `.csv` file in `input_dir`, in order of file name, and write each to `output_dir` as `<stem>_with_predictions.csv`.
	pub fn predict_directory(&self, input_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
		std::fs::create_dir_all(output_dir)
			.with_context(|| format!("failed to create directory {}", output_dir.display()))?;
		let mut output_paths = Vec::new();
		for input_path in list_csv_files(input_dir)? {
			let dataframe = load_shard(&input_path, &self.artifacts.encoder.schema)?;
			let output = self
				.predict_dataframe(&dataframe)
				.with_context(|| format!("failed to predict {}", input_path.display()))?;
			let stem = input_path
				.file_stem()
				.map(|stem| stem.to_string_lossy().into_owned())
				.unwrap_or_default();
			let output_path = output_dir.join(format!("{}_with_predictions.csv", stem));
			output
				.to_path(&output_path)
				.with_context(|| format!("failed to write {}", output_path.display()))?;
			info!(
				input = %input_path.display(),
				output = %output_path.display(),
				n_rows = output.nrows(),
				"wrote predictions"
			);
			output_paths.push(output_path);
		}
		Ok(output_paths)
	}
}

/// The `.csv` files directly inside `dir`, sorted by file name.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
	let mut paths = Vec::new();
	for entry in
		std::fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
	{
		let path = entry?.path();
		if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
			paths.push(path);
		}
	}
	paths.sort();
	Ok(paths)
}
