use converge_dataframe::{ColumnType, DataFrame};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The role a column plays in the feature encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
	/// Removed before encoding and re-attached to predictions.
	Identifying,
	/// One-hot encoded with the vocabulary fixed at fit time.
	Categorical,
	/// Passed through unchanged.
	Numeric,
	/// Converted to epoch seconds and then treated as numeric.
	Date,
	/// The binary label. Only present in training shards.
	Target,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
	pub name: String,
	pub role: ColumnRole,
}

/// A `Schema` declares every column a shard is expected to have, in order, and the role of each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
	pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
	#[error("missing column \"{0}\"")]
	MissingColumn(String),
	#[error("column \"{0}\" is not described by the schema")]
	UnexpectedColumn(String),
	#[error("column \"{column}\" must be a {expected} column")]
	ColumnType {
		column: String,
		expected: &'static str,
	},
	#[error("value \"{value}\" in target column \"{column}\" is not 0 or 1")]
	InvalidTarget { column: String, value: String },
	#[error("value \"{value}\" in date column \"{column}\" is not a date")]
	InvalidDate { column: String, value: String },
}

impl Schema {
	/// The schema of the session-level shards produced by the aggregation step, with the `conversion_rate` target.
	pub fn session_default() -> Schema {
		use ColumnRole::*;
		let columns = [
			("session_id", Identifying),
			("hit_date", Date),
			("hit_number", Numeric),
			("hit_page_path", Categorical),
			("event_category", Categorical),
			("event_action", Categorical),
			("event_label", Categorical),
			("client_id", Identifying),
			("visit_time", Categorical),
			("visit_number", Numeric),
			("utm_source", Categorical),
			("utm_medium", Categorical),
			("utm_campaign", Categorical),
			("utm_adcontent", Categorical),
			("device_category", Categorical),
			("device_brand", Categorical),
			("device_browser", Categorical),
			("geo_country", Categorical),
			("geo_city", Categorical),
			("conversion_rate", Target),
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

	pub fn column_names_with_role(&self, role: ColumnRole) -> impl Iterator<Item = &str> + '_ {
		self.columns
			.iter()
			.filter(move |column| column.role == role)
			.map(|column| column.name.as_str())
	}

	pub fn target_column_name(&self) -> Option<&str> {
		self.column_names_with_role(ColumnRole::Target).next()
	}

	pub fn role(&self, column_name: &str) -> Option<ColumnRole> {
		self.columns
			.iter()
			.find(|column| column.name == column_name)
			.map(|column| column.role)
	}

	/// The column types to load a shard with. Date columns are loaded as text and parsed during encoding.
	pub fn column_types(&self) -> BTreeMap<String, ColumnType> {
		self.columns
			.iter()
			.map(|column| {
				let column_type = match column.role {
					ColumnRole::Numeric | ColumnRole::Target => ColumnType::Number,
					ColumnRole::Identifying | ColumnRole::Categorical | ColumnRole::Date => {
						ColumnType::Text
					}
				};
				(column.name.clone(), column_type)
			})
			.collect()
	}

	/// Check that `dataframe` has exactly the columns this schema describes. The target column is only required if `require_target` is true.
	pub fn validate(&self, dataframe: &DataFrame, require_target: bool) -> Result<(), SchemaError> {
		for column_name in dataframe.column_names() {
			if self.role(column_name).is_none() {
				return Err(SchemaError::UnexpectedColumn(column_name.to_owned()));
			}
		}
		for column_schema in self.columns.iter() {
			let column = match dataframe.column(&column_schema.name) {
				Some(column) => column,
				None if column_schema.role == ColumnRole::Target && !require_target => continue,
				None => return Err(SchemaError::MissingColumn(column_schema.name.clone())),
			};
			let expected = match column_schema.role {
				ColumnRole::Numeric | ColumnRole::Target => Some((ColumnType::Number, "number")),
				ColumnRole::Identifying | ColumnRole::Categorical => {
					Some((ColumnType::Text, "text"))
				}
				ColumnRole::Date => None,
			};
			if let Some((column_type, expected)) = expected {
				if column.column_type() != column_type {
					return Err(SchemaError::ColumnType {
						column: column_schema.name.clone(),
						expected,
					});
				}
			}
		}
		Ok(())
	}
}
