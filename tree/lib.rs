/*!
This crate implements gradient boosted decision trees for binary classification on sparse features. Both boosting families the session pipeline evaluates are built on the same histogram engine and differ only in their [`TrainOptions`](struct.TrainOptions.html):

- [`TrainOptions::gradient_boosted_trees`](struct.TrainOptions.html#method.gradient_boosted_trees) grows each tree depth by depth, similar to [XGBoost](https://github.com/dmlc/xgboost).
- [`TrainOptions::histogram_gradient_boosting`](struct.TrainOptions.html#method.histogram_gradient_boosting) grows each tree by repeatedly splitting the leaf with the highest gain, similar to [LightGBM](https://github.com/microsoft/lightgbm).

Feature values are bucketed into bins once per training call. Most feature values in a one hot encoded matrix are zero, so only the nonzero values are binned, and the statistics of the bin containing zero are computed by subtracting the other bins from the node's totals.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod bin;
mod binary_classifier;
mod train;

pub use self::binary_classifier::BinaryClassifier;

use converge_features::SparseRow;
use serde::{Deserialize, Serialize};

/// These are the options passed to `BinaryClassifier::train` and `BinaryClassifier::train_incremental`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
	/// This option controls the order in which nodes are split and when a tree stops growing.
	pub growth: GrowthPolicy,
	/// The learning rate scales the leaf values to control the effect each tree has on the output.
	pub learning_rate: f32,
	/// This is the number of trees trained by `BinaryClassifier::train`.
	pub max_rounds: usize,
	/// This option sets the L2 regularization value, which helps avoid overfitting.
	pub l2_regularization: f32,
	/// A split will only be considered valid if the number of training examples sent to each of the resulting children is at least this value.
	pub min_examples_per_child: usize,
	/// A split will only be considered valid if the sum of hessians in each of the resulting children is at least this value.
	pub min_sum_hessians_per_child: f32,
	/// A node will only be split if the best split achieves more than this gain.
	pub min_gain_to_split: f32,
	/// The maximum number of bins per feature. If a feature has fewer unique values than this, there is one bin per unique value.
	pub max_bins: usize,
	/// This option determines the model's output before any trees are trained.
	pub bias: BiasInitialization,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GrowthPolicy {
	/// Split every splittable node of a level before moving on to the next level, until `max_depth` levels have been split.
	DepthWise { max_depth: usize },
	/// Split the leaf with the highest gain until the tree has `max_leaf_nodes` leaves.
	LeafWise { max_leaf_nodes: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BiasInitialization {
	Zero,
	/// The log of the ratio of positive to negative examples in the training set.
	LogOdds,
}

impl TrainOptions {
	pub fn gradient_boosted_trees() -> TrainOptions {
		TrainOptions {
			growth: GrowthPolicy::DepthWise { max_depth: 6 },
			learning_rate: 0.3,
			max_rounds: 100,
			l2_regularization: 1.0,
			min_examples_per_child: 1,
			min_sum_hessians_per_child: 1.0,
			min_gain_to_split: 0.0,
			max_bins: 256,
			bias: BiasInitialization::Zero,
		}
	}

	pub fn histogram_gradient_boosting() -> TrainOptions {
		TrainOptions {
			growth: GrowthPolicy::LeafWise { max_leaf_nodes: 31 },
			learning_rate: 0.1,
			max_rounds: 100,
			l2_regularization: 0.0,
			min_examples_per_child: 20,
			min_sum_hessians_per_child: 1e-3,
			min_gain_to_split: 0.0,
			max_bins: 255,
			bias: BiasInitialization::LogOdds,
		}
	}
}

/// This struct reports the training progress after each round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainProgress {
	pub n_rounds_trained: usize,
	pub n_rounds: usize,
}

/// Trees are stored as a `Vec` of `Node`s. The root is the first node, and each branch holds the indexes of its two children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
	pub nodes: Vec<Node>,
}

impl Tree {
	/// Make a prediction for a given example.
	pub fn predict(&self, features: SparseRow) -> f32 {
		// Start at the root node.
		let mut node_index = 0;
		// Traverse the tree until we get to a leaf.
		loop {
			match &self.nodes[node_index] {
				Node::Branch(BranchNode {
					left_child_index,
					right_child_index,
					feature_index,
					split_value,
					..
				}) => {
					node_index = if features.get(*feature_index) <= *split_value {
						*left_child_index
					} else {
						*right_child_index
					};
				}
				Node::Leaf(LeafNode { value, .. }) => return *value,
			}
		}
	}

	pub fn n_leaves(&self) -> usize {
		self.nodes
			.iter()
			.filter(|node| matches!(node, Node::Leaf(_)))
			.count()
	}

	/// The number of branches on the longest path from the root to a leaf.
	pub fn depth(&self) -> usize {
		fn depth(nodes: &[Node], node_index: usize) -> usize {
			match &nodes[node_index] {
				Node::Branch(branch) => {
					1 + usize::max(
						depth(nodes, branch.left_child_index),
						depth(nodes, branch.right_child_index),
					)
				}
				Node::Leaf(_) => 0,
			}
		}
		depth(&self.nodes, 0)
	}
}

/// A node is either a branch or a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
	Branch(BranchNode),
	Leaf(LeafNode),
}

/// A `BranchNode` sends an example to its left child if the value of the feature at `feature_index` is <= `split_value`, and to its right child otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
	pub left_child_index: usize,
	pub right_child_index: usize,
	pub feature_index: usize,
	pub split_value: f32,
	/// The fraction of training examples that passed through this node.
	pub examples_fraction: f32,
}

/// The leaves in a tree hold the values to output for examples that get sent to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafNode {
	pub value: f32,
	/// The fraction of training examples that were sent to this leaf.
	pub examples_fraction: f32,
}

#[test]
fn test_tree_predict() {
	use converge_features::SparseMatrix;
	use ndarray::prelude::*;
	let tree = Tree {
		nodes: vec![
			Node::Branch(BranchNode {
				left_child_index: 1,
				right_child_index: 2,
				feature_index: 1,
				split_value: 0.5,
				examples_fraction: 1.0,
			}),
			Node::Leaf(LeafNode {
				value: -1.0,
				examples_fraction: 0.5,
			}),
			Node::Leaf(LeafNode {
				value: 1.0,
				examples_fraction: 0.5,
			}),
		],
	};
	let features = SparseMatrix::from_dense(arr2(&[[3.0, 0.0], [0.0, 0.5], [0.0, 0.7]]).view());
	assert_eq!(tree.predict(features.row(0)), -1.0);
	assert_eq!(tree.predict(features.row(1)), -1.0);
	assert_eq!(tree.predict(features.row(2)), 1.0);
	assert_eq!(tree.n_leaves(), 2);
	assert_eq!(tree.depth(), 1);
}
