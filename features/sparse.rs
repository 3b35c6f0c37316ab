use itertools::izip;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/**
A `SparseMatrix` stores a two dimensional `f32` matrix in compressed sparse row form. Only nonzero values are stored. The entries of each row are sorted by column index.

| row | dense          | column_indices | values     |
|-----|----------------|----------------|------------|
| 0   | [0, 2.0, 0, 1] | [1, 3]         | [2.0, 1.0] |
| 1   | [0, 0, 0, 0]   | []             | []         |
| 2   | [5.0, 0, 0, 0] | [0]            | [5.0]      |
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
	n_cols: usize,
	row_offsets: Vec<usize>,
	column_indices: Vec<usize>,
	values: Vec<f32>,
}

/// A borrowed view of one row of a `SparseMatrix`.
#[derive(Debug, Clone, Copy)]
pub struct SparseRow<'a> {
	pub column_indices: &'a [usize],
	pub values: &'a [f32],
}

impl SparseMatrix {
	/// Create a matrix with `n_cols` columns and no rows.
	pub fn new(n_cols: usize) -> Self {
		Self {
			n_cols,
			row_offsets: vec![0],
			column_indices: Vec::new(),
			values: Vec::new(),
		}
	}

	pub fn from_dense(dense: ArrayView2<f32>) -> Self {
		let mut matrix = Self::new(dense.ncols());
		for row in dense.axis_iter(Axis(0)) {
			matrix.push_row(row.iter().copied().enumerate());
		}
		matrix
	}

	/// Append a row. The entries must be sorted by column index. Zero values are not stored.
	pub fn push_row(&mut self, entries: impl IntoIterator<Item = (usize, f32)>) {
		let mut previous_column_index = None;
		for (column_index, value) in entries {
			assert!(column_index < self.n_cols);
			assert!(previous_column_index.map_or(true, |previous| previous < column_index));
			previous_column_index = Some(column_index);
			if value != 0.0 {
				self.column_indices.push(column_index);
				self.values.push(value);
			}
		}
		self.row_offsets.push(self.values.len());
	}

	pub fn nrows(&self) -> usize {
		self.row_offsets.len() - 1
	}

	pub fn ncols(&self) -> usize {
		self.n_cols
	}

	/// The number of stored nonzero values.
	pub fn nnz(&self) -> usize {
		self.values.len()
	}

	pub fn row(&self, row_index: usize) -> SparseRow {
		let start = self.row_offsets[row_index];
		let end = self.row_offsets[row_index + 1];
		SparseRow {
			column_indices: &self.column_indices[start..end],
			values: &self.values[start..end],
		}
	}

	pub fn rows(&self) -> impl Iterator<Item = SparseRow<'_>> + '_ {
		(0..self.nrows()).map(move |row_index| self.row(row_index))
	}

	/// Stack matrices with the same number of columns on top of one another.
	pub fn vstack(matrices: &[&SparseMatrix]) -> SparseMatrix {
		let n_cols = matrices.first().map(|matrix| matrix.ncols()).unwrap_or(0);
		let mut stacked = SparseMatrix::new(n_cols);
		for matrix in matrices {
			assert_eq!(matrix.ncols(), n_cols);
			for row in matrix.rows() {
				stacked.push_row(row.iter());
			}
		}
		stacked
	}

	/// Build a new matrix from the rows at `row_indices`, in that order.
	pub fn select_rows(&self, row_indices: &[usize]) -> SparseMatrix {
		let mut selected = SparseMatrix::new(self.n_cols);
		for row_index in row_indices {
			selected.push_row(self.row(*row_index).iter());
		}
		selected
	}

	/// Compute `self * weights`, one value per row.
	pub fn dot(&self, weights: ArrayView1<f32>) -> Array1<f32> {
		assert_eq!(weights.len(), self.n_cols);
		self.rows().map(|row| row.dot(weights)).collect()
	}

	/// Compute `self^T * values`, one value per column.
	pub fn transpose_dot(&self, values: ArrayView1<f32>) -> Array1<f32> {
		assert_eq!(values.len(), self.nrows());
		let mut output = Array1::zeros(self.n_cols);
		for (row, value) in izip!(self.rows(), values.iter()) {
			for (column_index, entry) in row.iter() {
				output[column_index] += entry * value;
			}
		}
		output
	}

	/// Multiply every stored value in column `j` by `factors[j]`.
	pub fn scale_columns(&mut self, factors: &[f32]) {
		assert_eq!(factors.len(), self.n_cols);
		for (column_index, value) in izip!(self.column_indices.iter(), self.values.iter_mut()) {
			*value *= factors[*column_index];
		}
	}

	/// Gather the stored entries of each column as `(row_index, value)` pairs sorted by row index.
	pub fn columns(&self) -> Vec<Vec<(usize, f32)>> {
		let mut columns = vec![Vec::new(); self.n_cols];
		for (row_index, row) in self.rows().enumerate() {
			for (column_index, value) in row.iter() {
				columns[column_index].push((row_index, value));
			}
		}
		columns
	}

	pub fn to_dense(&self) -> Array2<f32> {
		let mut dense = Array2::zeros((self.nrows(), self.n_cols));
		for (row_index, row) in self.rows().enumerate() {
			for (column_index, value) in row.iter() {
				dense[[row_index, column_index]] = value;
			}
		}
		dense
	}
}

impl<'a> SparseRow<'a> {
	pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + 'a {
		izip!(self.column_indices.iter().copied(), self.values.iter().copied())
	}

	/// Look up the value in column `column_index`. Columns that are not stored are zero.
	pub fn get(&self, column_index: usize) -> f32 {
		match self.column_indices.binary_search(&column_index) {
			Ok(position) => self.values[position],
			Err(_) => 0.0,
		}
	}

	pub fn dot(&self, weights: ArrayView1<f32>) -> f32 {
		self.iter()
			.map(|(column_index, value)| value * weights[column_index])
			.sum()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn example() -> SparseMatrix {
		SparseMatrix::from_dense(
			arr2(&[[0.0, 2.0, 0.0, 1.0], [0.0, 0.0, 0.0, 0.0], [5.0, 0.0, 0.0, 0.0]]).view(),
		)
	}

	#[test]
	fn test_layout() {
		let matrix = example();
		assert_eq!(matrix.nrows(), 3);
		assert_eq!(matrix.ncols(), 4);
		assert_eq!(matrix.nnz(), 3);
		assert_eq!(matrix.row(0).column_indices, &[1, 3]);
		assert_eq!(matrix.row(1).values.len(), 0);
		assert_eq!(matrix.row(2).get(0), 5.0);
		assert_eq!(matrix.row(2).get(3), 0.0);
	}

	#[test]
	fn test_products() {
		let matrix = example();
		let weights = arr1(&[1.0, 1.0, 1.0, 2.0]);
		assert_eq!(matrix.dot(weights.view()), arr1(&[4.0, 0.0, 5.0]));
		let values = arr1(&[1.0, 3.0, 2.0]);
		assert_eq!(
			matrix.transpose_dot(values.view()),
			arr1(&[10.0, 2.0, 0.0, 1.0])
		);
	}

	#[test]
	fn test_vstack_and_select() {
		let matrix = example();
		let stacked = SparseMatrix::vstack(&[&matrix, &matrix]);
		assert_eq!(stacked.nrows(), 6);
		assert_eq!(stacked.to_dense().row(5), matrix.to_dense().row(2));
		let selected = stacked.select_rows(&[2, 0]);
		assert_eq!(selected.row(0).values, &[5.0]);
		assert_eq!(selected.row(1).values, &[2.0, 1.0]);
	}

	#[test]
	fn test_columns() {
		let columns = example().columns();
		assert_eq!(columns[0], vec![(2, 5.0)]);
		assert!(columns[2].is_empty());
		assert_eq!(columns[3], vec![(0, 1.0)]);
	}
}
