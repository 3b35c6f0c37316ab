use super::*;
use anyhow::{format_err, Result};
use std::{collections::BTreeMap, path::Path};

#[derive(Clone)]
pub struct FromCsvOptions<'a> {
	/// Columns not listed here are loaded as text.
	pub column_types: Option<BTreeMap<String, ColumnType>>,
	pub invalid_values: &'a [&'a str],
}

impl<'a> Default for FromCsvOptions<'a> {
	fn default() -> Self {
		Self {
			column_types: None,
			invalid_values: DEFAULT_INVALID_VALUES,
		}
	}
}

/// These values are the default values that are considered invalid in number columns.
const DEFAULT_INVALID_VALUES: &[&str] = &[
	"", "null", "NULL", "n/a", "N/A", "nan", "-nan", "NaN", "-NaN", "?",
];

impl DataFrame {
	pub fn from_path(path: &Path, options: FromCsvOptions) -> Result<Self> {
		Self::from_csv(&mut csv::Reader::from_path(path)?, options)
	}

	pub fn from_csv<R>(reader: &mut csv::Reader<R>, options: FromCsvOptions) -> Result<Self>
	where
		R: std::io::Read,
	{
		let column_names: Vec<String> = reader
			.headers()?
			.into_iter()
			.map(|column_name| column_name.to_owned())
			.collect();
		let columns = column_names
			.into_iter()
			.map(|column_name| {
				let column_type = options
					.column_types
					.as_ref()
					.and_then(|column_types| column_types.get(&column_name))
					.cloned()
					.unwrap_or(ColumnType::Text);
				Column::empty(column_name, column_type)
			})
			.collect();
		let mut dataframe = DataFrame { columns };
		let mut record = csv::StringRecord::new();
		let mut row_index = 0;
		while reader.read_record(&mut record)? {
			if record.len() != dataframe.ncols() {
				return Err(format_err!(
					"row {} has {} values but the header has {} columns",
					row_index + 1,
					record.len(),
					dataframe.ncols(),
				));
			}
			for (column, value) in dataframe.columns.iter_mut().zip(record.iter()) {
				match column {
					Column::Number(column) => {
						let value = if options.invalid_values.contains(&value) {
							std::f32::NAN
						} else {
							value.trim().parse::<f32>().map_err(|_| {
								format_err!(
									"value \"{}\" in column \"{}\" at row {} is not a number",
									value,
									column.name,
									row_index + 1,
								)
							})?
						};
						// Infinities, whether written out or overflowing f32, are missing values.
						let value = if value.is_finite() {
							value
						} else {
							std::f32::NAN
						};
						column.data.push(value);
					}
					Column::Text(column) => column.data.push(value.to_owned()),
				}
			}
			row_index += 1;
		}
		Ok(dataframe)
	}
}

#[test]
fn test_column_types() {
	let csv = r#"number,text,missing
1,test,
2,hello,3.5
"#;
	let mut column_types = BTreeMap::new();
	column_types.insert("number".to_owned(), ColumnType::Number);
	column_types.insert("missing".to_owned(), ColumnType::Number);
	let df = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions {
			column_types: Some(column_types),
			..Default::default()
		},
	)
	.unwrap();
	assert_eq!(df.nrows(), 2);
	assert_eq!(df.column_names(), vec!["number", "text", "missing"]);
	assert_eq!(df.column("number").unwrap().as_number().unwrap().data, vec![1.0, 2.0]);
	assert_eq!(
		df.column("text").unwrap().as_text().unwrap().data,
		vec!["test".to_owned(), "hello".to_owned()]
	);
	let missing = &df.column("missing").unwrap().as_number().unwrap().data;
	assert!(missing[0].is_nan());
	assert!((missing[1] - 3.5).abs() < std::f32::EPSILON);
}

#[test]
fn test_untyped_columns_are_text() {
	let csv = "session_id,hit_number\n9055434745589932991,3\n";
	let df = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions::default(),
	)
	.unwrap();
	insta::assert_debug_snapshot!(df, @r###"
 DataFrame {
     columns: [
         Text(
             TextColumn {
                 name: "session_id",
                 data: [
                     "9055434745589932991",
                 ],
             },
         ),
         Text(
             TextColumn {
                 name: "hit_number",
                 data: [
                     "3",
                 ],
             },
         ),
     ],
 }
 "###);
}

#[test]
fn test_invalid_number() {
	let csv = "hit_number\nabc\n";
	let mut column_types = BTreeMap::new();
	column_types.insert("hit_number".to_owned(), ColumnType::Number);
	let result = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions {
			column_types: Some(column_types),
			..Default::default()
		},
	);
	assert!(result.is_err());
}

#[test]
fn test_non_finite_numbers_are_missing() {
	let csv = "visit_number\ninf\n-Infinity\n1e39\n7\n";
	let mut column_types = BTreeMap::new();
	column_types.insert("visit_number".to_owned(), ColumnType::Number);
	let df = DataFrame::from_csv(
		&mut csv::Reader::from_reader(std::io::Cursor::new(csv)),
		FromCsvOptions {
			column_types: Some(column_types),
			..Default::default()
		},
	)
	.unwrap();
	let data = &df.column("visit_number").unwrap().as_number().unwrap().data;
	assert!(data[..3].iter().all(|value| value.is_nan()));
	assert_eq!(data[3], 7.0);
}
