use converge_core::{
	artifacts::ArtifactStore,
	config::{Config, Paths},
	predict::PREDICTED_CLASS_COLUMN_NAME,
	train::{load_shard, TrainOptions},
	OutcomeTag, PipelineError, Predictor,
};
use serde_json::json;
use std::path::Path;

const HEADER: &str = "session_id,hit_date,hit_number,hit_page_path,event_category,event_action,event_label,client_id,visit_time,visit_number,utm_source,utm_medium,utm_campaign,utm_adcontent,device_category,device_brand,device_browser,geo_country,geo_city";

/// Sessions from paid campaigns convert and all others do not. The other columns carry no signal.
fn shard_csv(shard_index: usize, n_rows: usize, with_target: bool) -> String {
	let mut csv = HEADER.to_owned();
	if with_target {
		csv.push_str(",conversion_rate");
	}
	csv.push('\n');
	for i in 0..n_rows {
		let converted = (i + shard_index) % 3 == 0;
		let utm_medium = if converted { "cpc" } else { "organic" };
		let device_category = ["mobile", "desktop", "tablet"][i % 3];
		let geo_city = ["Moscow", "Kazan", "Omsk", "Tver"][i % 4];
		csv.push_str(&format!(
			"{shard}-{i},2021-05-{day:02},{hit_number},/page/{page},click,view,unknown,client-{i},10:00:00,{visit_number},google,{utm_medium},spring,banner,{device_category},Apple,Safari,Russia,{geo_city}",
			shard = shard_index,
			i = i,
			day = 1 + shard_index,
			hit_number = i % 5,
			page = i % 2,
			visit_number = 1 + i % 3,
			utm_medium = utm_medium,
			device_category = device_category,
			geo_city = geo_city,
		));
		if with_target {
			csv.push_str(if converted { ",1" } else { ",0" });
		}
		csv.push('\n');
	}
	csv
}

fn config(root: &Path) -> Option<Config> {
	let yaml = format!(
		r#"
paths:
  shards_dir: {root}/shards
  artifacts_dir: {root}/artifacts
  aggregated_dir: {root}/aggregated
  predictions_dir: {root}/predictions
training:
  max_shard_index: 6
  incremental_rounds: 3
"#,
		root = root.display()
	);
	Some(serde_yaml::from_str(&yaml).unwrap())
}

fn write_shards(paths: &Paths, shard_indexes: &[usize]) {
	std::fs::create_dir_all(&paths.shards_dir).unwrap();
	for shard_index in shard_indexes {
		std::fs::write(
			paths.shards_dir.join(format!("mod-{}.csv", shard_index)),
			shard_csv(*shard_index, 45, true),
		)
		.unwrap();
	}
}

#[test]
fn test_train_skips_missing_shards_in_order() {
	let dir = tempfile::tempdir().unwrap();
	let config = config(dir.path());
	let paths = Paths::resolve(dir.path(), &config);
	write_shards(&paths, &[0, 1, 2, 3, 5]);
	let mut n_shards_loaded = 0;
	let (report, record) = converge_core::train_and_save(&config, &paths, &mut |progress| {
		if let converge_core::Progress::LoadingShard { .. } = progress {
			n_shards_loaded += 1;
		}
	})
	.unwrap();
	assert_eq!(report.trained_shard_indexes, vec![0, 1, 2, 3, 5]);
	assert_eq!(report.skipped_shard_indexes, vec![4]);
	assert_eq!(n_shards_loaded, 5);
	assert_eq!(
		report
			.shard_losses
			.iter()
			.map(|(shard_index, _)| *shard_index)
			.collect::<Vec<_>>(),
		vec![3, 5]
	);
	assert_eq!(report.scores.len(), 3);
	for score in report.scores.iter() {
		assert!(score.mean_auc.unwrap() > 0.99);
	}
	let best_auc = report
		.scores
		.iter()
		.filter_map(|score| score.mean_auc)
		.fold(std::f32::MIN, f32::max);
	let first_best = report
		.scores
		.iter()
		.find(|score| score.mean_auc == Some(best_auc))
		.unwrap();
	assert_eq!(report.family, first_best.family);
	assert_eq!(record.version, 1);
	assert_eq!(record.family, Some(report.family));
	assert_eq!(record.shard_indexes, vec![0, 1, 2, 3, 5]);
	assert!(paths.artifacts_dir.join(&record.model_file_name).exists());
	assert!(paths.artifacts_dir.join("artifacts.json").exists());
}

#[test]
fn test_missing_selection_shard_is_fatal() {
	let dir = tempfile::tempdir().unwrap();
	let config = config(dir.path());
	let paths = Paths::resolve(dir.path(), &config);
	write_shards(&paths, &[0, 2, 3]);
	let options = TrainOptions::from_config(&config, &paths);
	let error = match converge_core::train(&options, &mut |_| {}) {
		Ok(_) => panic!("training without shard 1 should fail"),
		Err(error) => error,
	};
	match error.downcast_ref::<PipelineError>() {
		Some(PipelineError::MissingShardFile(path)) => {
			assert_eq!(path, &paths.shards_dir.join("mod-1.csv"))
		}
		_ => panic!("unexpected error {:?}", error),
	}
}

#[test]
fn test_predict_without_artifacts_is_fatal() {
	let dir = tempfile::tempdir().unwrap();
	let store = ArtifactStore::new(dir.path().join("artifacts"));
	let error = match Predictor::load(&store) {
		Ok(_) => panic!("loading from an empty store should fail"),
		Err(error) => error,
	};
	assert!(matches!(
		error.downcast_ref::<PipelineError>(),
		Some(PipelineError::MissingArtifact(_))
	));
}

#[test]
fn test_end_to_end() {
	let dir = tempfile::tempdir().unwrap();
	let config = config(dir.path());
	let paths = Paths::resolve(dir.path(), &config);
	write_shards(&paths, &[0, 1, 2, 3, 4, 5]);
	let options = TrainOptions::from_config(&config, &paths);
	let output = converge_core::train(&options, &mut |_| {}).unwrap();
	let store = ArtifactStore::new(&paths.artifacts_dir);
	let record = store
		.save(
			&output.artifacts,
			&output.report.trained_shard_indexes,
			chrono::Utc::now(),
		)
		.unwrap();

	// The saved artifacts reproduce the outputs of the in-memory ones.
	let held_out_path = dir.path().join("held_out.csv");
	std::fs::write(&held_out_path, shard_csv(7, 30, true)).unwrap();
	let held_out = load_shard(&held_out_path, &options.schema).unwrap();
	let in_memory = Predictor::new(output.artifacts.clone());
	let loaded = Predictor::load(&store).unwrap();
	assert_eq!(loaded.record(), Some(&record));
	let expected = in_memory.predict(&held_out).unwrap();
	let records = loaded.predict(&held_out).unwrap();
	assert_eq!(records, expected);

	// Paid sessions are separated from the rest on a shard the model has never seen.
	let session_ids: Vec<String> = records
		.iter()
		.map(|record| record.identifiers[0].1.clone())
		.collect();
	for (i, (record, session_id)) in records.iter().zip(session_ids.iter()).enumerate() {
		assert_eq!(session_id, &format!("7-{}", i));
		let converted = (i + 7) % 3 == 0;
		assert_eq!(record.predicted_label, converted, "session {}", session_id);
		assert_eq!(
			record.predicted_class,
			converge_core::classify(record.probability, record.predicted_label)
		);
		assert_ne!(record.predicted_class, OutcomeTag::Unknown);
	}

	// Every probability is the sigmoid of the model's margin, and the label is the sign of the margin.
	let mut encoded = output.artifacts.encoder.transform(&held_out).unwrap();
	output.artifacts.scaler.transform(&mut encoded.features);
	let margins = output.artifacts.model.decision_function(&encoded.features);
	assert_eq!(margins.len(), records.len());
	for (margin, record) in margins.iter().zip(records.iter()) {
		let probability = 1.0 / (1.0 + (-margin).exp());
		assert!((record.probability - probability).abs() < 1e-6);
		assert_eq!(record.predicted_label, *margin > 0.0);
	}

	// Prediction shards from the aggregator have no target column.
	std::fs::create_dir_all(&paths.aggregated_dir).unwrap();
	std::fs::write(
		paths.aggregated_dir.join("combined_2021-05-30.csv"),
		shard_csv(8, 12, false),
	)
	.unwrap();
	let written = loaded
		.predict_directory(&paths.aggregated_dir, &paths.predictions_dir)
		.unwrap();
	assert_eq!(
		written,
		vec![paths
			.predictions_dir
			.join("combined_2021-05-30_with_predictions.csv")]
	);
	let predictions =
		converge_dataframe::DataFrame::from_path(&written[0], Default::default()).unwrap();
	assert_eq!(predictions.nrows(), 12);
	assert!(predictions.column(PREDICTED_CLASS_COLUMN_NAME).is_some());
	assert!(predictions.column("conversion_rate").is_none());
}

#[test]
fn test_aggregated_sessions_spanning_two_days_predict() {
	let dir = tempfile::tempdir().unwrap();
	let config = config(dir.path());
	let paths = Paths::resolve(dir.path(), &config);
	write_shards(&paths, &[0, 1, 2]);
	let options = TrainOptions::from_config(&config, &paths);
	let output = converge_core::train(&options, &mut |_| {}).unwrap();
	let predictor = Predictor::new(output.artifacts);

	let hit = |session_id: &str, hit_date: &str, hit_number: u64| {
		json!({
			"session_id": session_id,
			"hit_date": hit_date,
			"hit_number": hit_number,
			"hit_page_path": "/page/0",
			"event_category": "click",
			"event_action": "view",
			"event_label": "unknown",
		})
	};
	let session = |session_id: &str, utm_medium: &str| {
		json!({
			"session_id": session_id,
			"client_id": "client-0",
			"visit_time": "23:59:00",
			"visit_number": 1,
			"utm_source": "google",
			"utm_medium": utm_medium,
			"utm_campaign": "spring",
			"utm_adcontent": "banner",
			"device_category": "mobile",
			"device_brand": "Apple",
			"device_browser": "Safari",
			"geo_country": "Russia",
			"geo_city": "Moscow",
		})
	};
	let raw_dir = dir.path().join("raw");
	std::fs::create_dir_all(&raw_dir).unwrap();
	let hits = json!({ "2021-05-24": [
		hit("a", "2021-05-24", 1),
		hit("a", "2021-05-25", 2),
		hit("b", "2021-05-24", 1),
	]});
	let sessions = json!({ "2021-05-24": [session("a", "cpc"), session("b", "organic")] });
	std::fs::write(raw_dir.join("ga_hits_2021-05-24.json"), hits.to_string()).unwrap();
	std::fs::write(raw_dir.join("ga_sessions_2021-05-24.json"), sessions.to_string()).unwrap();
	let report = converge_core::aggregate::aggregate_directory(&raw_dir, &paths.aggregated_dir).unwrap();
	assert_eq!(report.written.len(), 1);
	assert!(report.failed_dates.is_empty());

	let written = predictor
		.predict_directory(&paths.aggregated_dir, &paths.predictions_dir)
		.unwrap();
	assert_eq!(written.len(), 1);
	let predictions =
		converge_dataframe::DataFrame::from_path(&written[0], Default::default()).unwrap();
	let column = |name: &str| predictions.column(name).unwrap().as_text().unwrap().data.clone();
	assert_eq!(column("session_id"), vec!["a", "b"]);
	assert_eq!(column("hit_date"), vec!["2021-05-24", "2021-05-24"]);
	assert_eq!(column("hit_number"), vec!["2", "1"]);
	assert_eq!(column(PREDICTED_CLASS_COLUMN_NAME).len(), 2);
}
