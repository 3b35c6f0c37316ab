use crate::{ColumnRole, Schema, SchemaError, SparseMatrix};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use converge_dataframe::{Column, DataFrame};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/**
A `FeatureEncoder` turns a session shard into a fixed width sparse feature matrix. It is fit once, on the first training shard, and every shard encoded afterward produces the same columns in the same order.

The feature columns are laid out as follows:

| block       | source columns                   | order                                    |
|-------------|----------------------------------|------------------------------------------|
| numeric     | numeric and date columns         | schema order                             |
| categorical | one indicator per known category | schema order, categories sorted          |
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
	pub schema: Schema,
	pub feature_groups: Vec<FeatureGroup>,
}

/// This enum describes how one column from the input shard becomes one or more feature columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureGroup {
	Identity(IdentityFeatureGroup),
	Timestamp(TimestampFeatureGroup),
	OneHotEncoded(OneHotEncodedFeatureGroup),
}

/// An `IdentityFeatureGroup` passes a number column through untouched. Missing values become 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityFeatureGroup {
	pub source_column_name: String,
}

/**
A `TimestampFeatureGroup` converts a date column to seconds since `origin`, the earliest timestamp in the shard the encoder was fit on. Subtracting the origin before narrowing to `f32` keeps whole seconds exact for the first 194 days after it. The accepted formats are tried in this order, and values without an offset are taken to be UTC:

| format                | example                     |
|-----------------------|-----------------------------|
| RFC 3339              | 2021-05-24T10:15:00+03:00   |
| `%Y-%m-%d %H:%M:%S`   | 2021-05-24 10:15:00         |
| `%Y-%m-%d`            | 2021-05-24                  |

Empty values become 0.0, the origin itself.
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampFeatureGroup {
	pub source_column_name: String,
	/// Seconds since the unix epoch.
	pub origin: i64,
}

/**
A `OneHotEncodedFeatureGroup` creates one feature for each category seen when the encoder was fit. For each example, the feature corresponding to the column's value is 1.0 and the rest are 0.0. Values that were not seen at fit time produce all zeros.

| dataframe value | feature values |
|-----------------|----------------|
| "desktop"       | [1, 0, 0]      |
| "mobile"        | [0, 1, 0]      |
| "tablet"        | [0, 0, 1]      |
| "tv"            | [0, 0, 0]      |
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncodedFeatureGroup {
	pub source_column_name: String,
	/// Sorted and deduplicated.
	pub options: Vec<String>,
}

/// The result of encoding one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedShard {
	pub features: SparseMatrix,
	/// Present only if the shard had a target column.
	pub target: Option<Vec<bool>>,
	/// The identifying columns, in schema order, removed before encoding.
	pub identifiers: Vec<IdentifierColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierColumn {
	pub name: String,
	pub values: Vec<String>,
}

impl FeatureGroup {
	pub fn source_column_name(&self) -> &str {
		match self {
			FeatureGroup::Identity(g) => &g.source_column_name,
			FeatureGroup::Timestamp(g) => &g.source_column_name,
			FeatureGroup::OneHotEncoded(g) => &g.source_column_name,
		}
	}

	pub fn n_features(&self) -> usize {
		match self {
			FeatureGroup::Identity(_) | FeatureGroup::Timestamp(_) => 1,
			FeatureGroup::OneHotEncoded(g) => g.options.len(),
		}
	}
}

impl OneHotEncodedFeatureGroup {
	pub fn fit(source_column_name: String, values: &[String]) -> Self {
		let options: BTreeSet<&str> = values.iter().map(|value| value.as_str()).collect();
		Self {
			source_column_name,
			options: options.into_iter().map(|option| option.to_owned()).collect(),
		}
	}

	/// The position of `value` within this group's features, or `None` for an unknown category.
	pub fn option_index(&self, value: &str) -> Option<usize> {
		self.options
			.binary_search_by(|option| option.as_str().cmp(value))
			.ok()
	}
}

impl TimestampFeatureGroup {
	pub fn fit(source_column_name: String, column: &Column) -> Result<Self, SchemaError> {
		let origin = match column {
			Column::Number(column) => column
				.data
				.iter()
				.filter(|value| !value.is_nan())
				.filter_map(|value| value.to_i64())
				.min(),
			Column::Text(column) => {
				let mut origin = None;
				for value in column.data.iter() {
					if let Some(seconds) = timestamp_seconds(&source_column_name, value)? {
						origin = Some(origin.map_or(seconds, |origin: i64| origin.min(seconds)));
					}
				}
				origin
			}
		};
		Ok(Self {
			source_column_name,
			origin: origin.unwrap_or(0),
		})
	}

	fn compute(&self, value: &str) -> Result<f32, SchemaError> {
		match timestamp_seconds(&self.source_column_name, value)? {
			Some(seconds) => Ok((seconds - self.origin).to_f32().unwrap()),
			None => Ok(0.0),
		}
	}
}

impl FeatureEncoder {
	pub fn fit(schema: Schema, dataframe: &DataFrame) -> Result<Self, SchemaError> {
		schema.validate(dataframe, false)?;
		let mut feature_groups = Vec::new();
		for column_schema in schema.columns.iter() {
			let source_column_name = column_schema.name.clone();
			match column_schema.role {
				ColumnRole::Numeric => feature_groups.push(FeatureGroup::Identity(
					IdentityFeatureGroup { source_column_name },
				)),
				ColumnRole::Date => {
					let column = dataframe
						.column(&source_column_name)
						.ok_or_else(|| SchemaError::MissingColumn(source_column_name.clone()))?;
					feature_groups.push(FeatureGroup::Timestamp(TimestampFeatureGroup::fit(
						source_column_name,
						column,
					)?))
				}
				_ => {}
			}
		}
		for column_schema in schema.columns.iter() {
			if column_schema.role != ColumnRole::Categorical {
				continue;
			}
			let values = text_values(dataframe, &column_schema.name)?;
			feature_groups.push(FeatureGroup::OneHotEncoded(
				OneHotEncodedFeatureGroup::fit(column_schema.name.clone(), values),
			));
		}
		Ok(Self {
			schema,
			feature_groups,
		})
	}

	pub fn n_features(&self) -> usize {
		self.feature_groups
			.iter()
			.map(|feature_group| feature_group.n_features())
			.sum()
	}

	/// The names of the feature columns. One hot encoded features are named `column=category`.
	pub fn feature_names(&self) -> Vec<String> {
		let mut names = Vec::with_capacity(self.n_features());
		for feature_group in self.feature_groups.iter() {
			match feature_group {
				FeatureGroup::Identity(g) => names.push(g.source_column_name.clone()),
				FeatureGroup::Timestamp(g) => names.push(g.source_column_name.clone()),
				FeatureGroup::OneHotEncoded(g) => {
					for option in g.options.iter() {
						names.push(format!("{}={}", g.source_column_name, option));
					}
				}
			}
		}
		names
	}

	/// Encode a shard. Identifying columns and the target, if present, are split off and returned beside the features.
	pub fn transform(&self, dataframe: &DataFrame) -> Result<EncodedShard, SchemaError> {
		self.schema.validate(dataframe, false)?;
		let nrows = dataframe.nrows();

		let identifiers = self
			.schema
			.column_names_with_role(ColumnRole::Identifying)
			.map(|name| {
				let column = dataframe
					.column(name)
					.ok_or_else(|| SchemaError::MissingColumn(name.to_owned()))?;
				Ok(IdentifierColumn {
					name: name.to_owned(),
					values: (0..nrows).map(|i| column.value_to_string(i)).collect(),
				})
			})
			.collect::<Result<Vec<_>, SchemaError>>()?;

		let target = match self.schema.target_column_name() {
			Some(name) => match dataframe.column(name) {
				Some(column) => Some(compute_target(name, column)?),
				None => None,
			},
			None => None,
		};

		// Compute the values of every feature group first, then assemble the rows.
		let group_values = self
			.feature_groups
			.iter()
			.map(|feature_group| self.compute_group_values(feature_group, dataframe))
			.collect::<Result<Vec<_>, SchemaError>>()?;

		let mut features = SparseMatrix::new(self.n_features());
		let mut entries = Vec::new();
		for row_index in 0..nrows {
			entries.clear();
			let mut offset = 0;
			for (feature_group, values) in self.feature_groups.iter().zip(group_values.iter()) {
				match values {
					GroupValues::Number(values) => entries.push((offset, values[row_index])),
					GroupValues::OptionIndex(indices) => {
						if let Some(index) = indices[row_index] {
							entries.push((offset + index, 1.0));
						}
					}
				}
				offset += feature_group.n_features();
			}
			features.push_row(entries.iter().copied());
		}

		Ok(EncodedShard {
			features,
			target,
			identifiers,
		})
	}

	fn compute_group_values(
		&self,
		feature_group: &FeatureGroup,
		dataframe: &DataFrame,
	) -> Result<GroupValues, SchemaError> {
		let name = feature_group.source_column_name();
		let column = dataframe
			.column(name)
			.ok_or_else(|| SchemaError::MissingColumn(name.to_owned()))?;
		let values = match (feature_group, column) {
			(FeatureGroup::Identity(_), Column::Number(column)) => GroupValues::Number(
				column
					.data
					.iter()
					.map(|value| if value.is_nan() { 0.0 } else { *value })
					.collect(),
			),
			// A date column that loaded as numbers already holds epoch seconds.
			(FeatureGroup::Timestamp(g), Column::Number(column)) => {
				let origin = g.origin.to_f64().unwrap();
				GroupValues::Number(
					column
						.data
						.iter()
						.map(|value| {
							if value.is_nan() {
								0.0
							} else {
								(f64::from(*value) - origin).to_f32().unwrap()
							}
						})
						.collect(),
				)
			}
			(FeatureGroup::Timestamp(g), Column::Text(column)) => GroupValues::Number(
				column
					.data
					.iter()
					.map(|value| g.compute(value))
					.collect::<Result<_, _>>()?,
			),
			(FeatureGroup::OneHotEncoded(g), Column::Text(column)) => GroupValues::OptionIndex(
				column
					.data
					.iter()
					.map(|value| g.option_index(value))
					.collect(),
			),
			(FeatureGroup::Identity(_), _) => {
				return Err(SchemaError::ColumnType {
					column: name.to_owned(),
					expected: "number",
				})
			}
			(_, _) => {
				return Err(SchemaError::ColumnType {
					column: name.to_owned(),
					expected: "text",
				})
			}
		};
		Ok(values)
	}
}

enum GroupValues {
	Number(Vec<f32>),
	OptionIndex(Vec<Option<usize>>),
}

fn text_values<'a>(dataframe: &'a DataFrame, name: &str) -> Result<&'a [String], SchemaError> {
	match dataframe.column(name) {
		Some(Column::Text(column)) => Ok(&column.data),
		Some(_) => Err(SchemaError::ColumnType {
			column: name.to_owned(),
			expected: "text",
		}),
		None => Err(SchemaError::MissingColumn(name.to_owned())),
	}
}

fn compute_target(name: &str, column: &Column) -> Result<Vec<bool>, SchemaError> {
	let column = match column {
		Column::Number(column) => column,
		Column::Text(_) => {
			return Err(SchemaError::ColumnType {
				column: name.to_owned(),
				expected: "number",
			})
		}
	};
	column
		.data
		.iter()
		.map(|value| {
			if *value == 0.0 {
				Ok(false)
			} else if *value == 1.0 {
				Ok(true)
			} else {
				Err(SchemaError::InvalidTarget {
					column: name.to_owned(),
					value: if value.is_nan() {
						String::new()
					} else {
						value.to_string()
					},
				})
			}
		})
		.collect()
}

/// Aggregated shards fill missing text values with this marker.
const MISSING_TEXT_VALUE: &str = "unknown";

/// The seconds since the unix epoch of a date value, or `None` if the value is missing.
fn timestamp_seconds(name: &str, value: &str) -> Result<Option<i64>, SchemaError> {
	let value = value.trim();
	if value.is_empty() || value == MISSING_TEXT_VALUE {
		return Ok(None);
	}
	parse_timestamp(value)
		.map(Some)
		.ok_or_else(|| SchemaError::InvalidDate {
			column: name.to_owned(),
			value: value.to_owned(),
		})
}

/// Parse a date or datetime into seconds since the unix epoch. Values without an offset are taken to be UTC.
pub fn parse_timestamp(value: &str) -> Option<i64> {
	if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
		return Some(datetime.timestamp());
	}
	if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
		return Some(Utc.from_utc_datetime(&datetime).timestamp());
	}
	if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
		let datetime = date.and_hms_opt(0, 0, 0)?;
		return Some(Utc.from_utc_datetime(&datetime).timestamp());
	}
	None
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ColumnSchema;
	use converge_dataframe::{NumberColumn, TextColumn};

	fn schema() -> Schema {
		let columns = [
			("session_id", ColumnRole::Identifying),
			("device_category", ColumnRole::Categorical),
			("hit_number", ColumnRole::Numeric),
			("geo_city", ColumnRole::Categorical),
			("hit_date", ColumnRole::Date),
			("conversion_rate", ColumnRole::Target),
		];
		Schema {
			columns: columns
				.iter()
				.map(|(name, role)| ColumnSchema {
					name: (*name).to_owned(),
					role: *role,
				})
				.collect(),
		}
	}

	fn text(name: &str, values: &[&str]) -> Column {
		Column::Text(TextColumn::with_data(
			name.to_owned(),
			values.iter().map(|value| (*value).to_owned()).collect(),
		))
	}

	fn number(name: &str, values: &[f32]) -> Column {
		Column::Number(NumberColumn::with_data(name.to_owned(), values.to_owned()))
	}

	fn shard(devices: &[&str], cities: &[&str], target: Option<&[f32]>) -> DataFrame {
		let n = devices.len();
		let mut columns = vec![
			text("session_id", &(0..n).map(|_| "s").collect::<Vec<_>>()),
			text("device_category", devices),
			number("hit_number", &(0..n).map(|i| i as f32 + 1.0).collect::<Vec<_>>()),
			text("geo_city", cities),
			text("hit_date", &(0..n).map(|_| "1970-01-02").collect::<Vec<_>>()),
		];
		if let Some(target) = target {
			columns.push(number("conversion_rate", target));
		}
		DataFrame { columns }
	}

	#[test]
	fn test_layout() {
		let train = shard(
			&["mobile", "desktop", "mobile"],
			&["Moscow", "Kazan", "Moscow"],
			Some(&[0.0, 1.0, 0.0]),
		);
		let encoder = FeatureEncoder::fit(schema(), &train).unwrap();
		assert_eq!(
			encoder.feature_names(),
			vec![
				"hit_number",
				"hit_date",
				"device_category=desktop",
				"device_category=mobile",
				"geo_city=Kazan",
				"geo_city=Moscow",
			]
		);
		let encoded = encoder.transform(&train).unwrap();
		assert_eq!(encoded.target, Some(vec![false, true, false]));
		assert_eq!(encoded.identifiers[0].name, "session_id");
		let dense = encoded.features.to_dense();
		assert_eq!(dense.row(1).to_vec(), vec![2.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
	}

	#[test]
	fn test_unknown_category_is_all_zeros() {
		let train = shard(&["mobile", "desktop"], &["Moscow", "Kazan"], Some(&[0.0, 1.0]));
		let encoder = FeatureEncoder::fit(schema(), &train).unwrap();
		let other = shard(&["tv"], &["Kazan"], None);
		let encoded = encoder.transform(&other).unwrap();
		assert_eq!(encoded.target, None);
		assert_eq!(encoded.features.ncols(), encoder.n_features());
		assert_eq!(
			encoded.features.to_dense().row(0).to_vec(),
			vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
		);
	}

	#[test]
	fn test_transform_is_idempotent() {
		let train = shard(&["mobile", "desktop"], &["Moscow", "Kazan"], Some(&[0.0, 1.0]));
		let encoder = FeatureEncoder::fit(schema(), &train).unwrap();
		let other = shard(&["tablet", "mobile"], &["Omsk", "Moscow"], None);
		assert_eq!(
			encoder.transform(&other).unwrap(),
			encoder.transform(&other).unwrap()
		);
	}

	#[test]
	fn test_schema_errors() {
		let train = shard(&["mobile"], &["Moscow"], Some(&[0.0]));
		let encoder = FeatureEncoder::fit(schema(), &train).unwrap();
		let invalid_target = shard(&["mobile"], &["Moscow"], Some(&[2.0]));
		assert_eq!(
			encoder.transform(&invalid_target),
			Err(SchemaError::InvalidTarget {
				column: "conversion_rate".to_owned(),
				value: "2".to_owned(),
			})
		);
		let mut missing = shard(&["mobile"], &["Moscow"], None);
		missing.remove_column("geo_city");
		assert_eq!(
			encoder.transform(&missing),
			Err(SchemaError::MissingColumn("geo_city".to_owned()))
		);
		let mut invalid_date = shard(&["mobile"], &["Moscow"], None);
		invalid_date.columns[4] = text("hit_date", &["yesterday"]);
		assert_eq!(
			encoder.transform(&invalid_date),
			Err(SchemaError::InvalidDate {
				column: "hit_date".to_owned(),
				value: "yesterday".to_owned(),
			})
		);
		let mut unknown_date = shard(&["mobile"], &["Moscow"], None);
		unknown_date.columns[4] = text("hit_date", &["unknown"]);
		assert!(encoder.transform(&unknown_date).is_ok());
	}

	#[test]
	fn test_timestamps_keep_whole_seconds() {
		let mut train = shard(&["mobile", "desktop"], &["Moscow", "Kazan"], Some(&[0.0, 1.0]));
		train.columns[4] = text("hit_date", &["2021-05-24 10:15:37", "2021-05-24"]);
		let encoder = FeatureEncoder::fit(schema(), &train).unwrap();
		match &encoder.feature_groups[1] {
			FeatureGroup::Timestamp(g) => assert_eq!(g.origin, 1_621_814_400),
			_ => panic!("expected a timestamp feature group"),
		}
		let mut other = shard(&["mobile", "mobile", "mobile"], &["Omsk", "Omsk", "Omsk"], None);
		other.columns[4] = text(
			"hit_date",
			&["2021-05-24 10:15:37", "2021-08-01 23:59:59", "unknown"],
		);
		let dense = encoder.transform(&other).unwrap().features.to_dense();
		assert_eq!(dense.column(1).to_vec(), vec![36_937.0, 5_961_599.0, 0.0]);
	}

	#[test]
	fn test_parse_timestamp() {
		assert_eq!(parse_timestamp("1970-01-01T00:01:00+00:00"), Some(60));
		assert_eq!(parse_timestamp("1970-01-01T03:00:00+03:00"), Some(0));
		assert_eq!(parse_timestamp("1970-01-01 00:00:30"), Some(30));
		assert_eq!(parse_timestamp("2021-05-24"), Some(1_621_814_400));
		assert_eq!(parse_timestamp("24/05/2021"), None);
	}
}
