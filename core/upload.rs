/*!
This module moves prediction shards into a warehouse. Each file is staged, the sessions it holds that the warehouse does not have yet are merged into the permanent table, and the staging area is dropped.

The local file is deleted after every attempt, whether or not the merge succeeded. A file whose upload failed is therefore gone, and the failure is only visible in the returned [`UploadReport`](struct.UploadReport.html) and the log.
*/

use crate::{error::PipelineError, predict::list_csv_files};
use anyhow::{format_err, Context, Result};
use fnv::FnvHashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const KEY_COLUMN_NAME: &str = "session_id";

/// A `Warehouse` holds one permanent table of sessions keyed by `session_id`.
pub trait Warehouse {
	/// Load the csv file at `path` into the staging area, replacing anything already staged.
	fn stage(&self, path: &Path) -> Result<()>;
	/// Insert the staged rows whose `session_id` is not in the permanent table yet, keeping the first staged row of each session. Returns the number of rows inserted.
	fn merge_staged(&self) -> Result<usize>;
	fn drop_staging(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct UploadPolicy {
	/// Stop the batch once this many files have failed.
	pub max_failures: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
	Uploaded { rows_merged: usize },
	Failed { reason: String },
}

#[derive(Debug, Default, PartialEq)]
pub struct UploadReport {
	pub outcomes: Vec<(PathBuf, FileOutcome)>,
	/// True if `max_failures` was reached, including when the file that reached it was the last one.
	pub stopped_early: bool,
}

impl UploadReport {
	pub fn n_failed(&self) -> usize {
		self.outcomes
			.iter()
			.filter(|(_, outcome)| matches!(outcome, FileOutcome::Failed { .. }))
			.count()
	}
}

/// Upload every `.csv` file in `dir`, in order of file name.
pub fn upload_directory(
	dir: &Path,
	warehouse: &dyn Warehouse,
	policy: &UploadPolicy,
) -> Result<UploadReport> {
	let reached_max_failures = |report: &UploadReport| match policy.max_failures {
		Some(max_failures) => report.n_failed() >= max_failures,
		None => false,
	};
	let mut report = UploadReport::default();
	for path in list_csv_files(dir)? {
		if reached_max_failures(&report) {
			break;
		}
		let outcome = match upload_file(&path, warehouse) {
			Ok(rows_merged) => {
				info!(path = %path.display(), rows_merged, "uploaded file");
				FileOutcome::Uploaded { rows_merged }
			}
			Err(e) => {
				let reason = format!("{:#}", e);
				let error = PipelineError::Upload {
					path: path.clone(),
					reason: reason.clone(),
				};
				error!(%error);
				if let Err(e) = warehouse.drop_staging() {
					warn!(error = %e, "failed to drop the staging area");
				}
				FileOutcome::Failed { reason }
			}
		};
		if let Err(e) = std::fs::remove_file(&path) {
			warn!(path = %path.display(), error = %e, "failed to delete local file");
		}
		report.outcomes.push((path, outcome));
	}
	if reached_max_failures(&report) {
		warn!(
			n_failed = report.n_failed(),
			n_attempted = report.outcomes.len(),
			"too many failed uploads, stopping"
		);
		report.stopped_early = true;
	}
	Ok(report)
}

fn upload_file(path: &Path, warehouse: &dyn Warehouse) -> Result<usize> {
	warehouse.stage(path)?;
	let rows_merged = warehouse.merge_staged()?;
	warehouse.drop_staging()?;
	Ok(rows_merged)
}

/// A warehouse in a local directory. The permanent table is `table.csv` and the staging area is `staging.csv`. A merge writes the new table to `table.csv.tmp` and renames it over `table.csv`, so an interrupted merge leaves the previous table intact.
pub struct LocalWarehouse {
	dir: PathBuf,
}

impl LocalWarehouse {
	pub fn new(dir: impl Into<PathBuf>) -> Result<LocalWarehouse> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir)
			.with_context(|| format!("failed to create directory {}", dir.display()))?;
		Ok(LocalWarehouse { dir })
	}

	pub fn table_path(&self) -> PathBuf {
		self.dir.join("table.csv")
	}

	fn staging_path(&self) -> PathBuf {
		self.dir.join("staging.csv")
	}

	fn pending_table_path(&self) -> PathBuf {
		self.dir.join("table.csv.tmp")
	}
}

impl Warehouse for LocalWarehouse {
	fn stage(&self, path: &Path) -> Result<()> {
		let (header, _) = read_table(path)?;
		key_index(&header).with_context(|| format!("failed to stage {}", path.display()))?;
		std::fs::copy(path, self.staging_path())
			.with_context(|| format!("failed to stage {}", path.display()))?;
		Ok(())
	}

	fn merge_staged(&self) -> Result<usize> {
		let staging_path = self.staging_path();
		if !staging_path.exists() {
			return Err(format_err!("nothing is staged"));
		}
		let (staged_header, staged_records) = read_table(&staging_path)?;
		let table_path = self.table_path();
		let (header, mut records) = if table_path.exists() {
			read_table(&table_path)?
		} else {
			(staged_header.clone(), Vec::new())
		};
		if header != staged_header {
			return Err(format_err!(
				"the staged columns do not match the columns of {}",
				table_path.display()
			));
		}
		let key_index = key_index(&header)?;
		let mut session_ids: FnvHashSet<String> = records
			.iter()
			.map(|record| record[key_index].to_owned())
			.collect();
		let mut rows_merged = 0;
		for record in staged_records {
			if session_ids.insert(record[key_index].to_owned()) {
				records.push(record);
				rows_merged += 1;
			}
		}
		let pending_table_path = self.pending_table_path();
		let mut writer = csv::Writer::from_path(&pending_table_path)
			.with_context(|| format!("failed to write {}", pending_table_path.display()))?;
		writer.write_record(&header)?;
		for record in records.iter() {
			writer.write_record(record)?;
		}
		writer.flush()?;
		drop(writer);
		std::fs::rename(&pending_table_path, &table_path)
			.with_context(|| format!("failed to replace {}", table_path.display()))?;
		Ok(rows_merged)
	}

	fn drop_staging(&self) -> Result<()> {
		let staging_path = self.staging_path();
		if staging_path.exists() {
			std::fs::remove_file(&staging_path)
				.with_context(|| format!("failed to remove {}", staging_path.display()))?;
		}
		Ok(())
	}
}

fn read_table(path: &Path) -> Result<(csv::StringRecord, Vec<csv::StringRecord>)> {
	let mut reader =
		csv::Reader::from_path(path).with_context(|| format!("failed to read {}", path.display()))?;
	let header = reader.headers()?.clone();
	let records = reader
		.records()
		.collect::<Result<Vec<_>, _>>()
		.with_context(|| format!("failed to read {}", path.display()))?;
	Ok((header, records))
}

fn key_index(header: &csv::StringRecord) -> Result<usize> {
	header
		.iter()
		.position(|column_name| column_name == KEY_COLUMN_NAME)
		.ok_or_else(|| format_err!("there is no \"{}\" column", KEY_COLUMN_NAME))
}

#[cfg(test)]
mod test {
	use super::*;
	use std::cell::RefCell;

	#[test]
	fn test_local_warehouse_merges_new_sessions_only() {
		let dir = tempfile::tempdir().unwrap();
		let input_dir = dir.path().join("predictions");
		std::fs::create_dir(&input_dir).unwrap();
		std::fs::write(
			input_dir.join("a_with_predictions.csv"),
			"session_id,predicted_class\ns1,TP\ns2,TN\ns1,FN\n",
		)
		.unwrap();
		std::fs::write(
			input_dir.join("b_with_predictions.csv"),
			"session_id,predicted_class\ns2,FP\ns3,TN\n",
		)
		.unwrap();
		let warehouse = LocalWarehouse::new(dir.path().join("warehouse")).unwrap();
		let report = upload_directory(&input_dir, &warehouse, &UploadPolicy::default()).unwrap();
		assert_eq!(
			report.outcomes,
			vec![
				(
					input_dir.join("a_with_predictions.csv"),
					FileOutcome::Uploaded { rows_merged: 2 }
				),
				(
					input_dir.join("b_with_predictions.csv"),
					FileOutcome::Uploaded { rows_merged: 1 }
				),
			]
		);
		assert_eq!(
			std::fs::read_to_string(warehouse.table_path()).unwrap(),
			"session_id,predicted_class\ns1,TP\ns2,TN\ns3,TN\n"
		);
		assert!(list_csv_files(&input_dir).unwrap().is_empty());
		assert!(!warehouse.staging_path().exists());
		assert!(!warehouse.pending_table_path().exists());
	}

	#[test]
	fn test_interrupted_merge_keeps_the_table() {
		let dir = tempfile::tempdir().unwrap();
		let warehouse = LocalWarehouse::new(dir.path()).unwrap();
		std::fs::write(warehouse.table_path(), "session_id,predicted_class\ns1,TP\n").unwrap();
		// A merge that died while writing left a truncated table behind.
		std::fs::write(warehouse.pending_table_path(), "session_id,predicted_cl").unwrap();
		assert_eq!(
			std::fs::read_to_string(warehouse.table_path()).unwrap(),
			"session_id,predicted_class\ns1,TP\n"
		);
		let staged = dir.path().join("b.csv");
		std::fs::write(&staged, "session_id,predicted_class\ns1,FN\ns2,TN\n").unwrap();
		warehouse.stage(&staged).unwrap();
		assert_eq!(warehouse.merge_staged().unwrap(), 1);
		assert_eq!(
			std::fs::read_to_string(warehouse.table_path()).unwrap(),
			"session_id,predicted_class\ns1,TP\ns2,TN\n"
		);
		assert!(!warehouse.pending_table_path().exists());
	}

	#[test]
	fn test_failed_file_is_deleted() {
		let dir = tempfile::tempdir().unwrap();
		let input_dir = dir.path().join("predictions");
		std::fs::create_dir(&input_dir).unwrap();
		std::fs::write(input_dir.join("a.csv"), "client_id\nc1\n").unwrap();
		std::fs::write(input_dir.join("b.csv"), "session_id\ns1\n").unwrap();
		let warehouse = LocalWarehouse::new(dir.path().join("warehouse")).unwrap();
		let report = upload_directory(&input_dir, &warehouse, &UploadPolicy::default()).unwrap();
		assert!(matches!(report.outcomes[0].1, FileOutcome::Failed { .. }));
		assert_eq!(report.outcomes[1].1, FileOutcome::Uploaded { rows_merged: 1 });
		assert_eq!(report.n_failed(), 1);
		assert!(!input_dir.join("a.csv").exists());
	}

	/// A warehouse whose merges always fail.
	struct FailingWarehouse {
		calls: RefCell<Vec<String>>,
	}

	impl Warehouse for FailingWarehouse {
		fn stage(&self, path: &Path) -> Result<()> {
			self.calls.borrow_mut().push(format!(
				"stage {}",
				path.file_name().unwrap().to_string_lossy()
			));
			Ok(())
		}
		fn merge_staged(&self) -> Result<usize> {
			self.calls.borrow_mut().push("merge".to_owned());
			Err(format_err!("the warehouse is unavailable"))
		}
		fn drop_staging(&self) -> Result<()> {
			self.calls.borrow_mut().push("drop".to_owned());
			Ok(())
		}
	}

	#[test]
	fn test_max_failures() {
		let dir = tempfile::tempdir().unwrap();
		for name in &["a.csv", "b.csv", "c.csv"] {
			std::fs::write(dir.path().join(name), "session_id\ns1\n").unwrap();
		}
		let warehouse = FailingWarehouse {
			calls: RefCell::new(Vec::new()),
		};
		let policy = UploadPolicy {
			max_failures: Some(2),
		};
		let report = upload_directory(dir.path(), &warehouse, &policy).unwrap();
		assert!(report.stopped_early);
		assert_eq!(report.outcomes.len(), 2);
		assert_eq!(
			report.outcomes[0].1,
			FileOutcome::Failed {
				reason: "the warehouse is unavailable".to_owned()
			}
		);
		assert_eq!(
			*warehouse.calls.borrow(),
			vec!["stage a.csv", "merge", "drop", "stage b.csv", "merge", "drop"]
		);
		// The file that was never attempted is kept.
		assert!(dir.path().join("c.csv").exists());
		assert!(!dir.path().join("a.csv").exists());
	}

	#[test]
	fn test_max_failures_reached_on_the_last_file() {
		let dir = tempfile::tempdir().unwrap();
		for name in &["a.csv", "b.csv"] {
			std::fs::write(dir.path().join(name), "session_id\ns1\n").unwrap();
		}
		let warehouse = FailingWarehouse {
			calls: RefCell::new(Vec::new()),
		};
		let policy = UploadPolicy {
			max_failures: Some(2),
		};
		let report = upload_directory(dir.path(), &warehouse, &policy).unwrap();
		assert_eq!(report.outcomes.len(), 2);
		assert_eq!(report.n_failed(), 2);
		assert!(report.stopped_early);

		std::fs::write(dir.path().join("c.csv"), "session_id\ns1\n").unwrap();
		let policy = UploadPolicy {
			max_failures: Some(3),
		};
		let report = upload_directory(dir.path(), &warehouse, &policy).unwrap();
		assert_eq!(report.n_failed(), 1);
		assert!(!report.stopped_early);
	}
}
