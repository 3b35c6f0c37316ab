use converge_features::SparseMatrix;
use num_traits::ToPrimitive;
use std::cmp::Ordering;

/// This struct describes how the values of one feature are bucketed into bins. A value belongs to the first bin whose threshold is >= the value, or to the last bin if there is none.
#[derive(Debug, Clone, PartialEq)]
pub struct BinInfo {
	pub thresholds: Vec<f32>,
	/// The bin that the implicit zeros of a sparse column belong to.
	pub zero_bin: u16,
}

impl BinInfo {
	pub fn n_bins(&self) -> usize {
		self.thresholds.len() + 1
	}

	pub fn bin(&self, value: f32) -> u16 {
		compute_bin(&self.thresholds, value)
	}
}

fn compute_bin(thresholds: &[f32], value: f32) -> u16 {
	thresholds
		.binary_search_by(|threshold| threshold.partial_cmp(&value).unwrap_or(Ordering::Equal))
		.unwrap_or_else(|bin| bin)
		.to_u16()
		.unwrap()
}

/// The binned nonzero values of each feature, as `(example_index, bin)` pairs sorted by example index.
#[derive(Debug)]
pub struct BinnedFeatures {
	pub bin_info: Vec<BinInfo>,
	pub columns: Vec<Vec<(usize, u16)>>,
}

pub fn compute_binned_features(features: &SparseMatrix, max_bins: usize) -> BinnedFeatures {
	let n_examples = features.nrows();
	let columns = features.columns();
	let bin_info: Vec<BinInfo> = columns
		.iter()
		.map(|column| compute_bin_info(column, n_examples, max_bins))
		.collect();
	let columns = columns
		.iter()
		.zip(bin_info.iter())
		.map(|(column, bin_info)| {
			column
				.iter()
				.map(|(example_index, value)| (*example_index, bin_info.bin(*value)))
				.collect()
		})
		.collect();
	BinnedFeatures { bin_info, columns }
}

/// Compute the thresholds for a sparse column. If there are at most `max_bins` unique values, including zero if any value is implicit, the thresholds are all the unique values but the largest. Otherwise, the thresholds are chosen at evenly spaced quantiles.
pub fn compute_bin_info(column: &[(usize, f32)], n_examples: usize, max_bins: usize) -> BinInfo {
	let mut values: Vec<f32> = column.iter().map(|(_, value)| *value).collect();
	values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
	let n_zeros = n_examples - values.len();
	// Count the occurrences of each unique value.
	let mut unique_values: Vec<(f32, usize)> = Vec::new();
	for value in values {
		if let Some((last_value, count)) = unique_values.last_mut() {
			if *last_value == value {
				*count += 1;
				continue;
			}
		}
		unique_values.push((value, 1));
	}
	if n_zeros > 0 {
		let position = unique_values
			.iter()
			.position(|(value, _)| *value > 0.0)
			.unwrap_or_else(|| unique_values.len());
		unique_values.insert(position, (0.0, n_zeros));
	}
	let thresholds: Vec<f32> = if unique_values.len() <= max_bins {
		unique_values
			.iter()
			.take(unique_values.len().saturating_sub(1))
			.map(|(value, _)| *value)
			.collect()
	} else {
		let mut thresholds = Vec::new();
		let mut cumulative_count = 0;
		let mut next_quantile = 1;
		for (value, count) in unique_values.iter().take(unique_values.len() - 1) {
			cumulative_count += count;
			if cumulative_count * max_bins >= next_quantile * n_examples {
				thresholds.push(*value);
				while next_quantile * n_examples <= cumulative_count * max_bins {
					next_quantile += 1;
				}
			}
		}
		thresholds
	};
	let zero_bin = compute_bin(&thresholds, 0.0);
	BinInfo {
		thresholds,
		zero_bin,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use ndarray::prelude::*;

	#[test]
	fn test_few_unique_values() {
		let column = vec![(0, 2.0), (2, -1.0), (3, 2.0)];
		let bin_info = compute_bin_info(&column, 5, 256);
		assert_eq!(bin_info.thresholds, vec![-1.0, 0.0]);
		assert_eq!(bin_info.zero_bin, 1);
		assert_eq!(bin_info.bin(-1.0), 0);
		assert_eq!(bin_info.bin(2.0), 2);
		assert_eq!(bin_info.n_bins(), 3);
	}

	#[test]
	fn test_quantile_thresholds() {
		let column: Vec<(usize, f32)> = (0..100).map(|i| (i, (i + 1) as f32)).collect();
		let bin_info = compute_bin_info(&column, 100, 4);
		assert_eq!(bin_info.thresholds, vec![25.0, 50.0, 75.0]);
		assert!(bin_info.n_bins() <= 4);
	}

	#[test]
	fn test_compute_binned_features() {
		let features = SparseMatrix::from_dense(arr2(&[[1.0, 0.0], [0.0, 0.0], [1.0, 3.0]]).view());
		let binned = compute_binned_features(&features, 256);
		assert_eq!(binned.bin_info[0].thresholds, vec![0.0]);
		assert_eq!(binned.columns[0], vec![(0, 1), (2, 1)]);
		assert_eq!(binned.columns[1], vec![(2, 1)]);
		assert_eq!(binned.bin_info[1].zero_bin, 0);
	}
}
