use crate::SparseMatrix;
use converge_metrics::{MeanVariance, Metric};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/**
A `Scaler` divides every feature column by its standard deviation. The columns are not centered, so zeros stay zeros and the matrix stays sparse. Columns whose standard deviation is zero are left unchanged.

| column values  | std     | scaled values          |
|----------------|---------|------------------------|
| [0, 2, 0, 2]   | 1.0     | [0, 2, 0, 2]           |
| [0, 0, 4, 0]   | 1.73205 | [0, 0, 2.30940, 0]     |
| [3, 3, 3, 3]   | 0.0     | [3, 3, 3, 3]           |
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
	/// One standard deviation per column, with zero variance columns set to 1.0.
	pub scales: Vec<f32>,
}

impl Scaler {
	pub fn fit(features: &SparseMatrix) -> Self {
		let n_rows = features.nrows();
		let scales = features
			.columns()
			.iter()
			.map(|column| {
				let nonzeros: Vec<f32> = column.iter().map(|(_, value)| *value).collect();
				let n_zeros = (n_rows - nonzeros.len()).to_u64().unwrap();
				let std = MeanVariance::compute(&nonzeros)
					.with_zeros(n_zeros)
					.variance()
					.sqrt();
				if std.is_finite() && std > 0.0 {
					std
				} else {
					1.0
				}
			})
			.collect();
		Self { scales }
	}

	pub fn n_features(&self) -> usize {
		self.scales.len()
	}

	pub fn transform(&self, features: &mut SparseMatrix) {
		let factors: Vec<f32> = self.scales.iter().map(|scale| 1.0 / scale).collect();
		features.scale_columns(&factors);
	}
}
