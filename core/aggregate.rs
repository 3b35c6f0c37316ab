/*!
This module joins the raw per-day json extracts into session shards. For each date that has both a `hits` and a `sessions` extract, the records of the two are outer joined on `session_id` and then grouped so each session becomes a single row:

| column | aggregate |
|--------|-----------|
| `hit_number`, `visit_number` | the maximum |
| `hit_date` | the earliest date |
| every other output column | the distinct values in order of appearance, joined with `", "` |

Missing values are filled before grouping: `0` in columns whose values are all numbers and `"unknown"` everywhere else.
*/

use anyhow::{format_err, Context, Result};
use converge_dataframe::{Column, DataFrame, NumberColumn, TextColumn};
use fnv::FnvHashMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

const KEY_COLUMN_NAME: &str = "session_id";
const MISSING_TEXT_VALUE: &str = "unknown";

/// Columns of the raw extracts that are not carried into session shards.
pub const DROPPED_COLUMNS: &[&str] = &[
	"hit_time",
	"hit_type",
	"hit_referer",
	"event_value",
	"date_x",
	"visit_date",
	"utm_keyword",
	"device_os",
	"device_model",
	"device_screen_resolution",
	"date_y",
];

const MAX_COLUMNS: &[&str] = &["hit_number", "visit_number"];

/// Columns holding `YYYY-MM-DD` dates. A session that spans several days keeps the first.
const EARLIEST_COLUMNS: &[&str] = &["hit_date"];

/// The columns of an aggregated session shard, in order.
pub const OUTPUT_COLUMNS: &[&str] = &[
	"session_id",
	"hit_date",
	"hit_number",
	"hit_page_path",
	"event_category",
	"event_action",
	"event_label",
	"client_id",
	"visit_time",
	"visit_number",
	"utm_source",
	"utm_medium",
	"utm_campaign",
	"utm_adcontent",
	"device_category",
	"device_brand",
	"device_browser",
	"geo_country",
	"geo_city",
];

#[derive(Debug, Default, PartialEq)]
pub struct AggregateReport {
	pub written: Vec<PathBuf>,
	/// Dates where one of the extracts was empty.
	pub skipped_dates: Vec<String>,
	pub failed_dates: Vec<String>,
}

#[derive(Debug, Default)]
struct DateExtracts {
	hits: Option<PathBuf>,
	sessions: Option<PathBuf>,
}

/// Aggregate every date in `input_dir` and write each to `output_dir` as `combined_<date>.csv`. A failure on one date is logged and does not stop the others.
pub fn aggregate_directory(input_dir: &Path, output_dir: &Path) -> Result<AggregateReport> {
	info!(input_dir = %input_dir.display(), "starting aggregation");
	let extracts = group_extracts_by_date(input_dir)?;
	std::fs::create_dir_all(output_dir)
		.with_context(|| format!("failed to create directory {}", output_dir.display()))?;
	let mut report = AggregateReport::default();
	for (date, extracts) in extracts {
		let (hits_path, sessions_path) = match (extracts.hits, extracts.sessions) {
			(Some(hits), Some(sessions)) => (hits, sessions),
			_ => {
				debug!(%date, "date does not have both extracts");
				continue;
			}
		};
		let output_path = output_dir.join(format!("combined_{}.csv", date));
		let result = aggregate_date(&hits_path, &sessions_path).and_then(|dataframe| {
			if let Some(dataframe) = &dataframe {
				dataframe
					.to_path(&output_path)
					.with_context(|| format!("failed to write {}", output_path.display()))?;
			}
			Ok(dataframe)
		});
		match result {
			Ok(Some(dataframe)) => {
				info!(%date, n_sessions = dataframe.nrows(), path = %output_path.display(), "wrote session shard");
				report.written.push(output_path);
			}
			Ok(None) => {
				warn!(%date, "an extract is empty, skipping");
				report.skipped_dates.push(date);
			}
			Err(e) => {
				error!(%date, error = %format!("{:#}", e), "failed to aggregate");
				report.failed_dates.push(date);
			}
		}
	}
	Ok(report)
}

/// Find the `.json` files in `dir` whose name contains a `YYYY-MM-DD` date, and sort them into the hits and sessions extract of each date.
fn group_extracts_by_date(dir: &Path) -> Result<BTreeMap<String, DateExtracts>> {
	let date_regex = Regex::new(r"\d{4}-\d{2}-\d{2}")?;
	let mut extracts: BTreeMap<String, DateExtracts> = BTreeMap::new();
	for entry in
		std::fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
	{
		let path = entry?.path();
		let file_name = match path.file_name() {
			Some(file_name) => file_name.to_string_lossy().into_owned(),
			None => continue,
		};
		if !file_name.ends_with(".json") {
			continue;
		}
		let date = match date_regex.find(&file_name) {
			Some(date) => date.as_str().to_owned(),
			None => continue,
		};
		let entry = extracts.entry(date).or_default();
		if file_name.contains("hits") {
			entry.hits = Some(path);
		} else if file_name.contains("sessions") {
			entry.sessions = Some(path);
		}
	}
	Ok(extracts)
}

/// Aggregate one date. Returns `None` if either extract is empty.
pub fn aggregate_date(hits_path: &Path, sessions_path: &Path) -> Result<Option<DataFrame>> {
	let hits = read_json(hits_path)?;
	let sessions = read_json(sessions_path)?;
	if is_empty(&hits) || is_empty(&sessions) {
		return Ok(None);
	}
	let hits = Table::from_records(flatten_records(&hits));
	let sessions = Table::from_records(flatten_records(&sessions));
	let joined = outer_join(&hits, &sessions)
		.with_context(|| format!("{} and {}", hits_path.display(), sessions_path.display()))?;
	group_sessions(joined).map(Some)
}

fn read_json(path: &Path) -> Result<Value> {
	let json = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read {}", path.display()))?;
	serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
}

fn is_empty(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::Object(object) => object.is_empty(),
		Value::Array(array) => array.is_empty(),
		_ => false,
	}
}

/// Collect the objects held in the arrays of `value`, descending into nested objects.
pub fn flatten_records(value: &Value) -> Vec<Map<String, Value>> {
	fn visit(value: &Value, records: &mut Vec<Map<String, Value>>) {
		if let Value::Object(object) = value {
			for value in object.values() {
				match value {
					Value::Array(items) => records.extend(
						items
							.iter()
							.filter_map(|item| item.as_object())
							.cloned(),
					),
					Value::Object(_) => visit(value, records),
					_ => {}
				}
			}
		}
	}
	let mut records = Vec::new();
	visit(value, &mut records);
	records
}

/// Records laid out as rows. Columns appear in the order they are first seen.
#[derive(Debug, Default, PartialEq)]
struct Table {
	column_names: Vec<String>,
	rows: Vec<Vec<Option<Value>>>,
}

impl Table {
	fn from_records(records: Vec<Map<String, Value>>) -> Table {
		let mut column_indexes: FnvHashMap<String, usize> = FnvHashMap::default();
		let mut column_names = Vec::new();
		for record in records.iter() {
			for key in record.keys() {
				if !column_indexes.contains_key(key) {
					column_indexes.insert(key.clone(), column_names.len());
					column_names.push(key.clone());
				}
			}
		}
		let rows = records
			.into_iter()
			.map(|record| {
				let mut row = vec![None; column_names.len()];
				for (key, value) in record {
					if !value.is_null() {
						row[column_indexes[&key]] = Some(value);
					}
				}
				row
			})
			.collect();
		Table { column_names, rows }
	}

	fn column_index(&self, name: &str) -> Option<usize> {
		self.column_names.iter().position(|column_name| column_name == name)
	}
}

/// Outer join on `session_id`. Columns other than the key that appear in both tables get the suffixes `_x` and `_y`.
fn outer_join(left: &Table, right: &Table) -> Result<Table> {
	let left_key = left
		.column_index(KEY_COLUMN_NAME)
		.ok_or_else(|| format_err!("the hits extract has no \"{}\" column", KEY_COLUMN_NAME))?;
	let right_key = right
		.column_index(KEY_COLUMN_NAME)
		.ok_or_else(|| format_err!("the sessions extract has no \"{}\" column", KEY_COLUMN_NAME))?;
	let suffixed = |name: &String, other: &Table, suffix: &str| {
		if name != KEY_COLUMN_NAME && other.column_index(name).is_some() {
			format!("{}{}", name, suffix)
		} else {
			name.clone()
		}
	};
	let mut column_names: Vec<String> = left
		.column_names
		.iter()
		.map(|name| suffixed(name, right, "_x"))
		.collect();
	let right_columns: Vec<usize> = (0..right.column_names.len())
		.filter(|index| *index != right_key)
		.collect();
	column_names.extend(
		right_columns
			.iter()
			.map(|index| suffixed(&right.column_names[*index], left, "_y")),
	);

	let mut right_rows_by_key: FnvHashMap<String, Vec<usize>> = FnvHashMap::default();
	for (row_index, row) in right.rows.iter().enumerate() {
		if let Some(key) = &row[right_key] {
			right_rows_by_key
				.entry(key_to_string(key))
				.or_default()
				.push(row_index);
		}
	}
	let joined_row = |left_row: Option<&Vec<Option<Value>>>, right_row: Option<&Vec<Option<Value>>>| {
		let mut row: Vec<Option<Value>> = match left_row {
			Some(left_row) => left_row.clone(),
			None => vec![None; left.column_names.len()],
		};
		if let (None, Some(right_row)) = (left_row, right_row) {
			row[left_key] = right_row[right_key].clone();
		}
		row.extend(
			right_columns
				.iter()
				.map(|index| right_row.and_then(|right_row| right_row[*index].clone())),
		);
		row
	};

	let mut rows = Vec::new();
	let mut matched = vec![false; right.rows.len()];
	for left_row in left.rows.iter() {
		let matches = left_row[left_key]
			.as_ref()
			.and_then(|key| right_rows_by_key.get(&key_to_string(key)));
		match matches {
			Some(matches) => {
				for right_index in matches {
					matched[*right_index] = true;
					rows.push(joined_row(Some(left_row), Some(&right.rows[*right_index])));
				}
			}
			None => rows.push(joined_row(Some(left_row), None)),
		}
	}
	for (right_row, matched) in right.rows.iter().zip(matched.iter()) {
		if !matched {
			rows.push(joined_row(None, Some(right_row)));
		}
	}
	Ok(Table { column_names, rows })
}

/// Fill missing values, then group the rows by session, with sessions in ascending order of id.
fn group_sessions(mut table: Table) -> Result<DataFrame> {
	fill_missing_values(&mut table);
	let key_index = table
		.column_index(KEY_COLUMN_NAME)
		.ok_or_else(|| format_err!("missing column \"{}\"", KEY_COLUMN_NAME))?;
	let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
	for (row_index, row) in table.rows.iter().enumerate() {
		if let Some(key) = &row[key_index] {
			groups.entry(key_to_string(key)).or_default().push(row_index);
		}
	}
	let mut dataframe = DataFrame { columns: Vec::new() };
	for column_name in OUTPUT_COLUMNS.iter() {
		if *column_name == KEY_COLUMN_NAME {
			dataframe.push_column(Column::Text(TextColumn::with_data(
				KEY_COLUMN_NAME.to_owned(),
				groups.keys().cloned().collect(),
			)));
			continue;
		}
		let column_index = table
			.column_index(column_name)
			.ok_or_else(|| format_err!("missing column \"{}\"", column_name))?;
		let rows = &table.rows;
		let values = groups.values().map(move |row_indexes| {
			row_indexes
				.iter()
				.map(move |row_index| &rows[*row_index][column_index])
		});
		if MAX_COLUMNS.contains(column_name) {
			let data = values
				.map(|values| max_value(column_name, values))
				.collect::<Result<Vec<f32>>>()?;
			dataframe.push_column(Column::Number(NumberColumn::with_data(
				(*column_name).to_owned(),
				data,
			)));
		} else if EARLIEST_COLUMNS.contains(column_name) {
			let data = values.map(earliest_value).collect();
			dataframe.push_column(Column::Text(TextColumn::with_data(
				(*column_name).to_owned(),
				data,
			)));
		} else {
			let data = values.map(join_distinct_values).collect();
			dataframe.push_column(Column::Text(TextColumn::with_data(
				(*column_name).to_owned(),
				data,
			)));
		}
	}
	Ok(dataframe)
}

/// A column whose present values are all numbers is filled with 0. Every other column is filled with "unknown". Dropped columns are left as they are.
fn fill_missing_values(table: &mut Table) {
	for (column_index, column_name) in table.column_names.iter().enumerate() {
		if DROPPED_COLUMNS.contains(&column_name.as_str()) {
			continue;
		}
		let mut present = table
			.rows
			.iter()
			.filter_map(|row| row[column_index].as_ref())
			.peekable();
		let is_numeric = present.peek().is_some() && present.all(|value| value.is_number());
		let fill = if is_numeric {
			Value::from(0)
		} else {
			Value::from(MISSING_TEXT_VALUE)
		};
		for row in table.rows.iter_mut() {
			if row[column_index].is_none() {
				row[column_index] = Some(fill.clone());
			}
		}
	}
}

fn max_value<'a>(
	column_name: &str,
	values: impl Iterator<Item = &'a Option<Value>>,
) -> Result<f32> {
	let mut max: Option<f64> = None;
	for value in values.flatten() {
		let number = match value {
			Value::Number(number) => number.as_f64(),
			Value::String(string) => string.trim().parse().ok(),
			_ => None,
		}
		.ok_or_else(|| format_err!("value {} in column \"{}\" is not a number", value, column_name))?;
		max = Some(max.map_or(number, |max: f64| max.max(number)));
	}
	Ok(max.unwrap_or(0.0) as f32)
}

/// The least of the present values. `YYYY-MM-DD` dates order the same as text.
fn earliest_value<'a>(values: impl Iterator<Item = &'a Option<Value>>) -> String {
	values
		.flatten()
		.map(value_to_string)
		.map(|value| value.trim().to_owned())
		.filter(|value| !value.is_empty() && value != MISSING_TEXT_VALUE)
		.min()
		.unwrap_or_else(|| MISSING_TEXT_VALUE.to_owned())
}

fn join_distinct_values<'a>(values: impl Iterator<Item = &'a Option<Value>>) -> String {
	let mut distinct: Vec<&Value> = Vec::new();
	for value in values.flatten() {
		if !distinct.contains(&value) {
			distinct.push(value);
		}
	}
	let joined = distinct
		.into_iter()
		.map(value_to_string)
		.filter(|value| !value.trim().is_empty())
		.map(|value| value.trim().to_owned())
		.collect::<Vec<_>>()
		.join(", ");
	if joined.is_empty() {
		MISSING_TEXT_VALUE.to_owned()
	} else {
		joined
	}
}

fn key_to_string(value: &Value) -> String {
	value_to_string(value)
}

fn value_to_string(value: &Value) -> String {
	match value {
		Value::String(string) => string.clone(),
		Value::Bool(true) => "True".to_owned(),
		Value::Bool(false) => "False".to_owned(),
		value => value.to_string(),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_flatten_records() {
		let value = json!({
			"2021-05-24": [{ "session_id": "a" }, { "session_id": "b" }, 3],
			"nested": { "more": [{ "session_id": "c" }] },
			"count": 3,
		});
		let records = flatten_records(&value);
		let session_ids: Vec<&str> = records
			.iter()
			.map(|record| record["session_id"].as_str().unwrap())
			.collect();
		assert_eq!(session_ids.len(), 3);
		assert!(session_ids.contains(&"c"));
	}

	#[test]
	fn test_outer_join() {
		let hits = Table::from_records(
			flatten_records(&json!({ "rows": [
				{ "session_id": "a", "hit_number": 1, "date": "x" },
				{ "session_id": "a", "hit_number": 2, "date": "x" },
				{ "session_id": "b", "hit_number": 1, "date": "x" },
			]})),
		);
		let sessions = Table::from_records(
			flatten_records(&json!({ "rows": [
				{ "session_id": "a", "visit_number": 3, "date": "y" },
				{ "session_id": "c", "visit_number": 1, "date": "y" },
			]})),
		);
		let joined = outer_join(&hits, &sessions).unwrap();
		// Keys of a json object are visited in sorted order.
		assert_eq!(
			joined.column_names,
			vec!["date_x", "hit_number", "session_id", "date_y", "visit_number"]
		);
		assert_eq!(joined.rows.len(), 4);
		assert_eq!(
			joined.rows[3],
			vec![None, None, Some(json!("c")), Some(json!("y")), Some(json!(1))]
		);
		assert_eq!(joined.rows[2][4], None);
	}

	#[test]
	fn test_outer_join_requires_session_id() {
		let hits = Table::from_records(flatten_records(&json!({ "rows": [{ "id": 1 }] })));
		let sessions = Table::from_records(flatten_records(&json!({ "rows": [{ "session_id": 1 }] })));
		assert!(outer_join(&hits, &sessions).is_err());
	}

	#[test]
	fn test_join_distinct_values() {
		let values = vec![
			Some(json!(" /home ")),
			Some(json!("/cart")),
			Some(json!(" /home ")),
			Some(json!("")),
			Some(json!(1)),
		];
		assert_eq!(join_distinct_values(values.iter()), "/home, /cart, 1");
		let values = vec![Some(json!(" ")), Some(json!(""))];
		assert_eq!(join_distinct_values(values.iter()), "unknown");
	}

	#[test]
	fn test_earliest_value() {
		let values = vec![
			Some(json!("2021-05-25")),
			Some(json!("unknown")),
			Some(json!(" 2021-05-24 ")),
			Some(json!("2021-05-25")),
		];
		assert_eq!(earliest_value(values.iter()), "2021-05-24");
		let values = vec![Some(json!("unknown")), Some(json!(""))];
		assert_eq!(earliest_value(values.iter()), "unknown");
	}

	#[test]
	fn test_max_value() {
		let values = vec![Some(json!(2)), Some(json!("7")), Some(json!(0))];
		assert_eq!(max_value("hit_number", values.iter()).unwrap(), 7.0);
		let values = vec![Some(json!("seven"))];
		assert!(max_value("hit_number", values.iter()).is_err());
	}

	fn write_json(dir: &Path, file_name: &str, value: Value) {
		std::fs::write(dir.join(file_name), value.to_string()).unwrap();
	}

	fn hit(session_id: &str, hit_number: u64, page: &str) -> Value {
		hit_on("2021-05-24", session_id, hit_number, page)
	}

	fn hit_on(hit_date: &str, session_id: &str, hit_number: u64, page: &str) -> Value {
		json!({
			"session_id": session_id,
			"hit_date": hit_date,
			"hit_time": 100.0,
			"hit_number": hit_number,
			"hit_type": "event",
			"hit_page_path": page,
			"event_category": "click",
			"event_action": "view",
			"event_label": null,
		})
	}

	fn session(session_id: &str, client_id: &str, visit_number: u64) -> Value {
		json!({
			"session_id": session_id,
			"client_id": client_id,
			"visit_date": "2021-05-24",
			"visit_time": "10:00:00",
			"visit_number": visit_number,
			"utm_source": "ads",
			"utm_medium": "cpc",
			"utm_campaign": "spring",
			"utm_adcontent": "banner",
			"utm_keyword": "shoes",
			"device_category": "mobile",
			"device_brand": "Apple",
			"device_browser": "Safari",
			"geo_country": "Russia",
			"geo_city": "Moscow",
		})
	}

	#[test]
	fn test_aggregate_directory() {
		let dir = tempfile::tempdir().unwrap();
		let input_dir = dir.path().join("raw");
		let output_dir = dir.path().join("aggregated");
		std::fs::create_dir(&input_dir).unwrap();
		write_json(
			&input_dir,
			"ga_hits_2021-05-24.json",
			json!({ "2021-05-24": [
				hit_on("2021-05-25", "s1", 1, "/home"),
				hit("s1", 3, "/cart"),
				hit("s1", 2, "/home"),
				hit("s2", 1, "/home"),
			] }),
		);
		write_json(
			&input_dir,
			"ga_sessions_2021-05-24.json",
			json!({ "2021-05-24": [session("s1", "c1", 2), session("s3", "c3", 1)] }),
		);
		write_json(&input_dir, "ga_hits_2021-05-25.json", json!({}));
		write_json(
			&input_dir,
			"ga_sessions_2021-05-25.json",
			json!({ "2021-05-25": [session("s4", "c4", 1)] }),
		);
		write_json(&input_dir, "ga_hits_2021-05-26.json", json!({ "2021-05-26": [{ "hit_number": 1 }] }));
		write_json(&input_dir, "ga_sessions_2021-05-26.json", json!({ "2021-05-26": [session("s5", "c5", 1)] }));
		write_json(&input_dir, "ga_hits_2021-05-27.json", json!({ "2021-05-27": [hit("s6", 1, "/")] }));

		let report = aggregate_directory(&input_dir, &output_dir).unwrap();
		assert_eq!(report.written, vec![output_dir.join("combined_2021-05-24.csv")]);
		assert_eq!(report.skipped_dates, vec!["2021-05-25"]);
		assert_eq!(report.failed_dates, vec!["2021-05-26"]);

		let csv = std::fs::read_to_string(&report.written[0]).unwrap();
		let expected = [
			"session_id,hit_date,hit_number,hit_page_path,event_category,event_action,event_label,client_id,visit_time,visit_number,utm_source,utm_medium,utm_campaign,utm_adcontent,device_category,device_brand,device_browser,geo_country,geo_city",
			"s1,2021-05-24,3,\"/home, /cart\",click,view,unknown,c1,10:00:00,2,ads,cpc,spring,banner,mobile,Apple,Safari,Russia,Moscow",
			"s2,2021-05-24,1,/home,click,view,unknown,unknown,unknown,0,unknown,unknown,unknown,unknown,unknown,unknown,unknown,unknown,unknown",
			"s3,unknown,0,unknown,unknown,unknown,unknown,c3,10:00:00,1,ads,cpc,spring,banner,mobile,Apple,Safari,Russia,Moscow",
		];
		assert_eq!(csv.lines().collect::<Vec<_>>(), expected);
	}
}
