//! This module contains the main entrypoint to the converge cli.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use converge_core::{
	aggregate::aggregate_directory,
	artifacts::ArtifactStore,
	config::{self, Config, Paths},
	FileOutcome, LocalWarehouse, Predictor, Progress, UploadPolicy,
};
use std::path::PathBuf;
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(
	name = "converge",
	about = "Predict which sessions convert.",
	disable_help_subcommand = true
)]
struct Args {
	/// The directory the configured paths are relative to.
	#[arg(long, global = true, env = "PROJECT_PATH", default_value = ".")]
	project_path: PathBuf,
	/// The path to a .yaml config file.
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,
	/// Log debug events, including training progress.
	#[arg(short, long, global = true)]
	verbose: bool,
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Join the raw hits and sessions extracts into one shard per date.
	Aggregate,
	/// Select a model family and train it over the training shards.
	Train,
	/// Predict every aggregated shard with the latest artifacts.
	Predict,
	/// Merge the prediction shards into the warehouse.
	Upload,
}

fn main() {
	let args = Args::parse();
	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			Level::DEBUG
		} else {
			Level::INFO
		})
		.with_writer(std::io::stderr)
		.finish();
	if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
		eprintln!("{}: {}", "warning".yellow().bold(), error);
	}
	let result = config::load_config(args.config.as_deref()).and_then(|config| {
		let paths = Paths::resolve(&args.project_path, &config);
		match args.command {
			Command::Aggregate => cli_aggregate(&paths),
			Command::Train => cli_train(&config, &paths),
			Command::Predict => cli_predict(&paths),
			Command::Upload => cli_upload(&config, &paths),
		}
	});
	if let Err(error) = result {
		eprintln!("{}: {:#}", "error".red().bold(), error);
		std::process::exit(1);
	}
}

fn cli_aggregate(paths: &Paths) -> Result<()> {
	let report = aggregate_directory(&paths.raw_dir, &paths.aggregated_dir)?;
	eprintln!(
		"Wrote {} shards to {}.",
		report.written.len(),
		paths.aggregated_dir.display()
	);
	if !report.skipped_dates.is_empty() {
		eprintln!("Skipped {}.", report.skipped_dates.join(", "));
	}
	if !report.failed_dates.is_empty() {
		eprintln!(
			"{}: failed to aggregate {}.",
			"warning".yellow().bold(),
			report.failed_dates.join(", ")
		);
	}
	Ok(())
}

fn cli_train(config: &Option<Config>, paths: &Paths) -> Result<()> {
	let (report, record) = converge_core::train_and_save(config, paths, &mut |progress| {
		match progress {
			Progress::LoadingShard { shard_index } => debug!(shard_index, "loading shard"),
			Progress::Selecting(progress) => debug!(?progress, "selecting"),
			Progress::Training {
				shard_index,
				progress,
			} => debug!(shard_index, ?progress, "training"),
			Progress::Saving => debug!("saving"),
		}
	})?;
	for score in report.scores.iter() {
		let mean_auc = score
			.mean_auc
			.map(|mean_auc| format!("{:.4}", mean_auc))
			.unwrap_or_else(|| "undefined".to_owned());
		eprintln!("{:<28} {}", score.family.as_str(), mean_auc);
	}
	eprintln!(
		"Selected {}, trained on shards {:?}.",
		report.family, report.trained_shard_indexes
	);
	if !report.skipped_shard_indexes.is_empty() {
		eprintln!("Skipped missing shards {:?}.", report.skipped_shard_indexes);
	}
	eprintln!(
		"Artifacts version {} were written to {}.",
		record.version,
		paths.artifacts_dir.display()
	);
	Ok(())
}

fn cli_predict(paths: &Paths) -> Result<()> {
	let store = ArtifactStore::new(&paths.artifacts_dir);
	let predictor = Predictor::load(&store)?;
	let written = predictor.predict_directory(&paths.aggregated_dir, &paths.predictions_dir)?;
	eprintln!(
		"Wrote {} prediction shards to {}.",
		written.len(),
		paths.predictions_dir.display()
	);
	Ok(())
}

fn cli_upload(config: &Option<Config>, paths: &Paths) -> Result<()> {
	let warehouse = LocalWarehouse::new(&paths.warehouse_dir)?;
	let policy = UploadPolicy {
		max_failures: config::max_failures(config),
	};
	let report = converge_core::upload_directory(&paths.predictions_dir, &warehouse, &policy)?;
	let rows_merged: usize = report
		.outcomes
		.iter()
		.map(|(_, outcome)| match outcome {
			FileOutcome::Uploaded { rows_merged } => *rows_merged,
			FileOutcome::Failed { .. } => 0,
		})
		.sum();
	info!(
		n_files = report.outcomes.len(),
		n_failed = report.n_failed(),
		rows_merged,
		"upload finished"
	);
	eprintln!(
		"Merged {} rows from {} files into {}.",
		rows_merged,
		report.outcomes.len() - report.n_failed(),
		warehouse.table_path().display()
	);
	for (path, outcome) in report.outcomes.iter() {
		if let FileOutcome::Failed { reason } = outcome {
			eprintln!(
				"{}: failed to upload {}: {}",
				"warning".yellow().bold(),
				path.display(),
				reason
			);
		}
	}
	if report.stopped_early {
		eprintln!(
			"{}: stopped after {} failed uploads.",
			"warning".yellow().bold(),
			report.n_failed()
		);
	}
	Ok(())
}
