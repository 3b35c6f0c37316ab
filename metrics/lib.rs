/*!
This crate holds the metrics the session pipeline computes.

| metric | used for |
|--------|----------|
| [`auc_roc`](fn.auc_roc.html) | scoring each cross validation fold during model selection |
| [`Mean`](struct.Mean.html) | averaging the fold scores of a candidate |
| [`BinaryCrossEntropy`](struct.BinaryCrossEntropy.html) | the loss of each incrementally trained shard |
| [`MeanVariance`](struct.MeanVariance.html) | fitting the feature scaler |
*/

#![allow(clippy::tabs_in_doc_comments)]

mod auc_roc;
mod binary_cross_entropy;
mod mean;
mod mean_variance;

pub use self::auc_roc::auc_roc;
pub use self::binary_cross_entropy::{BinaryCrossEntropy, BinaryCrossEntropyInput};
pub use self::mean::Mean;
pub use self::mean_variance::MeanVariance;

/// A metric computed from its whole input at once. The lifetime lets `Input` borrow, as in `&'a [f32]`.
pub trait Metric<'a> {
	type Input;
	type Output;
	fn compute(input: Self::Input) -> Self::Output;
}

/**
A metric computed over a stream of inputs, such as the examples of a shard or the folds of a cross validation run.

Start from `Default`, call `update()` for each input, combine partial results computed elsewhere with `merge()`, and call `finalize()` for the output.

```
use converge_metrics::{Mean, StreamingMetric};

let mut fold_scores = Mean::default();
fold_scores.update(0.75);
fold_scores.update(0.85);
assert!((fold_scores.finalize().unwrap() - 0.8).abs() < 1e-6);
```
*/
pub trait StreamingMetric<'a> {
	type Input;
	type Output;
	fn update(&mut self, input: Self::Input);
	fn merge(&mut self, other: Self);
	fn finalize(self) -> Self::Output;
}
