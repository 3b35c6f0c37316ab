use crate::{
	bin::{compute_binned_features, BinnedFeatures},
	BranchNode, GrowthPolicy, LeafNode, Node, TrainOptions, TrainProgress, Tree,
};
use converge_features::SparseMatrix;
use itertools::izip;
use num_traits::{clamp, ToPrimitive};
use std::ops::Neg;

/// This struct tracks the sum of gradients and hessians and the number of examples for all examples in a node, or for all examples in a node whose value for a particular feature falls in a particular bin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BinStatsEntry {
	pub sum_gradients: f64,
	pub sum_hessians: f64,
	pub n_examples: usize,
}

impl BinStatsEntry {
	fn add(&mut self, gradient: f32, hessian: f32) {
		self.sum_gradients += gradient.to_f64().unwrap();
		self.sum_hessians += hessian.to_f64().unwrap();
		self.n_examples += 1;
	}

	fn accumulate(&mut self, other: &BinStatsEntry) {
		self.sum_gradients += other.sum_gradients;
		self.sum_hessians += other.sum_hessians;
		self.n_examples += other.n_examples;
	}

	fn subtract(&self, other: &BinStatsEntry) -> BinStatsEntry {
		BinStatsEntry {
			sum_gradients: self.sum_gradients - other.sum_gradients,
			sum_hessians: self.sum_hessians - other.sum_hessians,
			n_examples: self.n_examples - other.n_examples,
		}
	}
}

#[derive(Clone, Debug)]
struct Split {
	feature_index: usize,
	split_value: f32,
	gain: f64,
	left: BinStatsEntry,
	right: BinStatsEntry,
}

/// Train `n_rounds` trees, one after another, each fit to the gradients of the log loss at the current `margins`. After each round the new tree's outputs are added to `margins`.
pub fn train_rounds(
	features: &SparseMatrix,
	labels: &[bool],
	margins: &mut [f32],
	n_rounds: usize,
	options: &TrainOptions,
	update_progress: &mut dyn FnMut(TrainProgress),
) -> Vec<Tree> {
	let n_examples = features.nrows();
	assert_eq!(labels.len(), n_examples);
	assert_eq!(margins.len(), n_examples);
	if n_examples == 0 {
		return Vec::new();
	}
	let binned_features = compute_binned_features(features, options.max_bins);
	let mut gradients = vec![0.0; n_examples];
	let mut hessians = vec![0.0; n_examples];
	let mut trees = Vec::with_capacity(n_rounds);
	for round_index in 0..n_rounds {
		update_gradients_and_hessians(&mut gradients, &mut hessians, labels, margins);
		let mut builder = TreeBuilder::new(features, &binned_features, &gradients, &hessians, options);
		match options.growth {
			GrowthPolicy::DepthWise { max_depth } => builder.grow_depth_wise(max_depth),
			GrowthPolicy::LeafWise { max_leaf_nodes } => builder.grow_leaf_wise(max_leaf_nodes),
		}
		for (margin, value) in izip!(margins.iter_mut(), builder.example_leaf_values()) {
			*margin += value;
		}
		trees.push(Tree {
			nodes: builder.nodes,
		});
		update_progress(TrainProgress {
			n_rounds_trained: round_index + 1,
			n_rounds,
		});
	}
	trees
}

/// Compute the gradients and hessians of the log loss for each example given the labels and the current margins.
pub fn update_gradients_and_hessians(
	gradients: &mut [f32],
	hessians: &mut [f32],
	labels: &[bool],
	margins: &[f32],
) {
	for (gradient, hessian, label, margin) in izip!(gradients, hessians, labels, margins) {
		let probability = clamp(
			sigmoid(*margin),
			std::f32::EPSILON,
			1.0 - std::f32::EPSILON,
		);
		let label = if *label { 1.0 } else { 0.0 };
		*gradient = probability - label;
		*hessian = probability * (1.0 - probability);
	}
}

pub fn sigmoid(value: f32) -> f32 {
	1.0 / (value.neg().exp() + 1.0)
}

struct TreeBuilder<'a> {
	features: &'a SparseMatrix,
	binned_features: &'a BinnedFeatures,
	gradients: &'a [f32],
	hessians: &'a [f32],
	options: &'a TrainOptions,
	nodes: Vec<Node>,
	/// The sums for the examples in each node, indexed like `nodes`.
	node_stats: Vec<BinStatsEntry>,
	/// The index of the leaf each example currently belongs to.
	example_nodes: Vec<usize>,
}

impl<'a> TreeBuilder<'a> {
	fn new(
		features: &'a SparseMatrix,
		binned_features: &'a BinnedFeatures,
		gradients: &'a [f32],
		hessians: &'a [f32],
		options: &'a TrainOptions,
	) -> TreeBuilder<'a> {
		let mut root_stats = BinStatsEntry::default();
		for (gradient, hessian) in izip!(gradients, hessians) {
			root_stats.add(*gradient, *hessian);
		}
		let mut builder = TreeBuilder {
			features,
			binned_features,
			gradients,
			hessians,
			options,
			nodes: Vec::new(),
			node_stats: Vec::new(),
			example_nodes: vec![0; gradients.len()],
		};
		builder.push_leaf(root_stats);
		builder
	}

	fn grow_depth_wise(&mut self, max_depth: usize) {
		let mut frontier = vec![0];
		for _ in 0..max_depth {
			if frontier.is_empty() {
				break;
			}
			let bin_stats = self.compute_bin_stats(&frontier);
			let splits: Vec<(usize, Split)> = izip!(frontier.iter(), bin_stats.iter())
				.filter_map(|(node_index, bin_stats)| {
					self.find_best_split(*node_index, bin_stats)
						.map(|split| (*node_index, split))
				})
				.collect();
			frontier = self
				.apply_splits(splits)
				.into_iter()
				.flat_map(|(left, right)| vec![left, right])
				.collect();
		}
	}

	fn grow_leaf_wise(&mut self, max_leaf_nodes: usize) {
		let mut candidates: Vec<(usize, Split)> = Vec::new();
		let root_bin_stats = self.compute_bin_stats(&[0]);
		if let Some(split) = self.find_best_split(0, &root_bin_stats[0]) {
			candidates.push((0, split));
		}
		let mut n_leaves = 1;
		while n_leaves < max_leaf_nodes {
			// Take the candidate with the highest gain. Ties go to the candidate found first.
			let mut best: Option<usize> = None;
			for (position, (_, split)) in candidates.iter().enumerate() {
				match best {
					Some(best_position) if split.gain <= candidates[best_position].1.gain => {}
					_ => best = Some(position),
				}
			}
			let position = match best {
				Some(position) => position,
				None => break,
			};
			let candidate = candidates.remove(position);
			let children = self.apply_splits(vec![candidate]);
			n_leaves += 1;
			let (left, right) = children[0];
			let bin_stats = self.compute_bin_stats(&[left, right]);
			for (child, bin_stats) in izip!([left, right].iter(), bin_stats.iter()) {
				if let Some(split) = self.find_best_split(*child, bin_stats) {
					candidates.push((*child, split));
				}
			}
		}
	}

	/// Compute the bin stats of every feature for each node in `node_indexes`. Only the nonzero values are visited. The stats for the bin containing zero are the node's totals minus the stats of the nonzero values.
	fn compute_bin_stats(&self, node_indexes: &[usize]) -> Vec<Vec<Vec<BinStatsEntry>>> {
		let mut slots = vec![None; self.nodes.len()];
		for (slot, node_index) in node_indexes.iter().enumerate() {
			slots[*node_index] = Some(slot);
		}
		let mut bin_stats: Vec<Vec<Vec<BinStatsEntry>>> = node_indexes
			.iter()
			.map(|_| {
				self.binned_features
					.bin_info
					.iter()
					.map(|bin_info| vec![BinStatsEntry::default(); bin_info.n_bins()])
					.collect()
			})
			.collect();
		for (feature_index, column) in self.binned_features.columns.iter().enumerate() {
			for (example_index, bin) in column.iter() {
				if let Some(slot) = slots[self.example_nodes[*example_index]] {
					bin_stats[slot][feature_index][*bin as usize]
						.add(self.gradients[*example_index], self.hessians[*example_index]);
				}
			}
		}
		for (node_index, bin_stats_for_node) in izip!(node_indexes.iter(), bin_stats.iter_mut()) {
			let node_stats = self.node_stats[*node_index];
			for (bin_info, bin_stats_for_feature) in
				izip!(self.binned_features.bin_info.iter(), bin_stats_for_node.iter_mut())
			{
				let mut nonzero_stats = BinStatsEntry::default();
				for entry in bin_stats_for_feature.iter() {
					nonzero_stats.accumulate(entry);
				}
				let zero_stats = node_stats.subtract(&nonzero_stats);
				bin_stats_for_feature[bin_info.zero_bin as usize].accumulate(&zero_stats);
			}
		}
		bin_stats
	}

	/// Find the split with the highest gain across all features, if a valid one exists. Ties go to the lower feature index and then the lower threshold.
	fn find_best_split(&self, node_index: usize, bin_stats: &[Vec<BinStatsEntry>]) -> Option<Split> {
		let options = self.options;
		let node_stats = self.node_stats[node_index];
		if node_stats.n_examples < 2 * options.min_examples_per_child.max(1) {
			return None;
		}
		let l2_regularization = options.l2_regularization.to_f64().unwrap();
		let min_sum_hessians_per_child = options.min_sum_hessians_per_child.to_f64().unwrap();
		let min_gain_to_split = options.min_gain_to_split.to_f64().unwrap();
		let negative_loss_for_parent_node = compute_negative_loss(&node_stats, l2_regularization);
		let mut best_split: Option<Split> = None;
		for (feature_index, (bin_info, bin_stats_for_feature)) in
			izip!(self.binned_features.bin_info.iter(), bin_stats.iter()).enumerate()
		{
			let mut left = BinStatsEntry::default();
			for (bin_index, bin_stats_entry) in bin_stats_for_feature
				[..bin_stats_for_feature.len() - 1]
				.iter()
				.enumerate()
			{
				left.accumulate(bin_stats_entry);
				let right = node_stats.subtract(&left);
				if left.n_examples < options.min_examples_per_child {
					continue;
				}
				// Every later bin only sends more examples left, so no later split can be valid.
				if right.n_examples < options.min_examples_per_child {
					break;
				}
				if left.sum_hessians < min_sum_hessians_per_child {
					continue;
				}
				if right.sum_hessians < min_sum_hessians_per_child {
					break;
				}
				let gain = compute_negative_loss(&left, l2_regularization)
					+ compute_negative_loss(&right, l2_regularization)
					- negative_loss_for_parent_node;
				if gain <= min_gain_to_split {
					continue;
				}
				if best_split.as_ref().map_or(true, |best| gain > best.gain) {
					best_split = Some(Split {
						feature_index,
						split_value: bin_info.thresholds[bin_index],
						gain,
						left,
						right,
					});
				}
			}
		}
		best_split
	}

	/// Turn each leaf in `splits` into a branch with two new leaves, then move the examples of each split node into its children. Returns the indexes of the new children.
	fn apply_splits(&mut self, splits: Vec<(usize, Split)>) -> Vec<(usize, usize)> {
		let mut directions: Vec<Option<(usize, f32, usize, usize)>> = vec![None; self.nodes.len()];
		let mut children = Vec::with_capacity(splits.len());
		for (node_index, split) in splits {
			let left_child_index = self.push_leaf(split.left);
			let right_child_index = self.push_leaf(split.right);
			let examples_fraction = self.examples_fraction(&self.node_stats[node_index]);
			self.nodes[node_index] = Node::Branch(BranchNode {
				left_child_index,
				right_child_index,
				feature_index: split.feature_index,
				split_value: split.split_value,
				examples_fraction,
			});
			directions[node_index] = Some((
				split.feature_index,
				split.split_value,
				left_child_index,
				right_child_index,
			));
			children.push((left_child_index, right_child_index));
		}
		for (example_index, node_index) in self.example_nodes.iter_mut().enumerate() {
			if let Some((feature_index, split_value, left, right)) = directions[*node_index] {
				*node_index = if self.features.row(example_index).get(feature_index) <= split_value {
					left
				} else {
					right
				};
			}
		}
		children
	}

	fn push_leaf(&mut self, stats: BinStatsEntry) -> usize {
		let node_index = self.nodes.len();
		let value = compute_leaf_value(&stats, self.options);
		let examples_fraction = self.examples_fraction(&stats);
		self.nodes.push(Node::Leaf(LeafNode {
			value,
			examples_fraction,
		}));
		self.node_stats.push(stats);
		node_index
	}

	fn examples_fraction(&self, stats: &BinStatsEntry) -> f32 {
		stats.n_examples.to_f32().unwrap() / self.example_nodes.len().to_f32().unwrap()
	}

	/// The value of the leaf each example ended up in.
	fn example_leaf_values(&self) -> Vec<f32> {
		self.example_nodes
			.iter()
			.map(|node_index| match &self.nodes[*node_index] {
				Node::Leaf(leaf) => leaf.value,
				Node::Branch(_) => unreachable!(),
			})
			.collect()
	}
}

fn compute_negative_loss(stats: &BinStatsEntry, l2_regularization: f64) -> f64 {
	let denominator = stats.sum_hessians + l2_regularization;
	if denominator <= 0.0 {
		return 0.0;
	}
	stats.sum_gradients * stats.sum_gradients / denominator
}

fn compute_leaf_value(stats: &BinStatsEntry, options: &TrainOptions) -> f32 {
	let denominator = stats.sum_hessians + options.l2_regularization.to_f64().unwrap();
	if denominator <= 0.0 {
		return 0.0;
	}
	(-options.learning_rate.to_f64().unwrap() * stats.sum_gradients / denominator)
		.to_f32()
		.unwrap()
}
