/*!
A small columnar table for session shards. A [`DataFrame`](struct.DataFrame.html) is a list of named columns of equal length, each holding either numbers or text. Shards are read from and written to csv, see [`DataFrame::from_path`](struct.DataFrame.html#method.from_path) and [`DataFrame::to_path`](struct.DataFrame.html#method.to_path).

Missing numbers are stored as NaN. Missing text is stored as whatever the file held, usually the empty string.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod load;
mod write;

pub use self::load::*;

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
	pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
	Number(NumberColumn),
	Text(TextColumn),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberColumn {
	pub name: String,
	pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextColumn {
	pub name: String,
	pub data: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnType {
	Number,
	Text,
}

impl DataFrame {
	pub fn ncols(&self) -> usize {
		self.columns.len()
	}

	/// The number of rows, taken from the first column. A dataframe with no columns has no rows.
	pub fn nrows(&self) -> usize {
		match self.columns.first() {
			Some(column) => column.len(),
			None => 0,
		}
	}

	pub fn column_names(&self) -> Vec<&str> {
		self.columns.iter().map(Column::name).collect()
	}

	pub fn column(&self, name: &str) -> Option<&Column> {
		self.columns.iter().find(|column| column.name() == name)
	}

	/// Take the column named `name` out of the dataframe. The other columns keep their order.
	pub fn remove_column(&mut self, name: &str) -> Option<Column> {
		let index = self
			.columns
			.iter()
			.position(|column| column.name() == name)?;
		Some(self.columns.remove(index))
	}

	/// Append `column` after the existing columns.
	///
	/// # Panics
	///
	/// Panics if the dataframe already has columns and `column` has a different number of rows.
	pub fn push_column(&mut self, column: Column) {
		if !self.columns.is_empty() {
			assert_eq!(self.nrows(), column.len(), "column \"{}\"", column.name());
		}
		self.columns.push(column);
	}
}

impl Column {
	/// A column with no rows.
	pub fn empty(name: String, column_type: ColumnType) -> Column {
		match column_type {
			ColumnType::Number => Column::Number(NumberColumn::with_data(name, Vec::new())),
			ColumnType::Text => Column::Text(TextColumn::with_data(name, Vec::new())),
		}
	}

	pub fn name(&self) -> &str {
		match self {
			Column::Number(column) => &column.name,
			Column::Text(column) => &column.name,
		}
	}

	pub fn column_type(&self) -> ColumnType {
		match self {
			Column::Number(_) => ColumnType::Number,
			Column::Text(_) => ColumnType::Text,
		}
	}

	pub fn len(&self) -> usize {
		match self {
			Column::Number(column) => column.data.len(),
			Column::Text(column) => column.data.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn as_number(&self) -> Option<&NumberColumn> {
		if let Column::Number(column) = self {
			Some(column)
		} else {
			None
		}
	}

	pub fn as_text(&self) -> Option<&TextColumn> {
		if let Column::Text(column) = self {
			Some(column)
		} else {
			None
		}
	}

	/// The value in row `index` as it is written to csv. NaN numbers are written as the empty string.
	pub fn value_to_string(&self, index: usize) -> String {
		match self {
			Column::Number(column) => match column.data[index] {
				value if value.is_nan() => String::new(),
				value => value.to_string(),
			},
			Column::Text(column) => column.data[index].clone(),
		}
	}
}

impl NumberColumn {
	pub fn with_data(name: String, data: Vec<f32>) -> NumberColumn {
		NumberColumn { name, data }
	}
}

impl TextColumn {
	pub fn with_data(name: String, data: Vec<String>) -> TextColumn {
		TextColumn { name, data }
	}
}
