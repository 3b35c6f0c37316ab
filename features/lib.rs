/*!
This crate turns session shards into the numeric features the models train on. A [`Schema`](struct.Schema.html) declares the role of every column, a [`FeatureEncoder`](struct.FeatureEncoder.html) fit on the first shard produces a fixed width [`SparseMatrix`](struct.SparseMatrix.html) for every shard after it, and a [`Scaler`](struct.Scaler.html) brings the feature columns to unit standard deviation without destroying sparsity.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod encoder;
mod scaler;
mod schema;
mod sparse;

pub use self::encoder::*;
pub use self::scaler::Scaler;
pub use self::schema::{ColumnRole, ColumnSchema, Schema, SchemaError};
pub use self::sparse::{SparseMatrix, SparseRow};
