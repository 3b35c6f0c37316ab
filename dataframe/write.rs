use super::*;
use anyhow::Result;
use std::path::Path;

impl DataFrame {
	pub fn to_path(&self, path: &Path) -> Result<()> {
		let mut writer = csv::Writer::from_path(path)?;
		self.to_csv(&mut writer)?;
		writer.flush()?;
		Ok(())
	}

	pub fn to_csv<W>(&self, writer: &mut csv::Writer<W>) -> Result<()>
	where
		W: std::io::Write,
	{
		writer.write_record(self.columns.iter().map(|column| column.name()))?;
		for row_index in 0..self.nrows() {
			writer.write_record(
				self.columns
					.iter()
					.map(|column| column.value_to_string(row_index)),
			)?;
		}
		Ok(())
	}
}

#[test]
fn test_missing_numbers_are_written_empty() {
	let df = DataFrame {
		columns: vec![
			Column::Text(TextColumn::with_data(
				"session_id".to_owned(),
				vec!["a".to_owned(), "b".to_owned()],
			)),
			Column::Number(NumberColumn::with_data(
				"hit_number".to_owned(),
				vec![3.0, std::f32::NAN],
			)),
		],
	};
	let mut writer = csv::Writer::from_writer(Vec::new());
	df.to_csv(&mut writer).unwrap();
	let bytes = writer.into_inner().unwrap();
	assert_eq!(
		String::from_utf8(bytes).unwrap(),
		"session_id,hit_number\na,3\nb,\n"
	);
}
