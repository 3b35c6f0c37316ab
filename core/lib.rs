/*!
This crate implements the stages of the session conversion pipeline.

- [`aggregate`](aggregate/index.html) joins the raw per-day json extracts into session shards.
- [`train`](train/index.html) fits the feature encoder and scaler, selects a model family with cross validation, and trains the selected model incrementally over the remaining shards.
- [`artifacts`](artifacts/index.html) saves and loads the encoder, scaler, and model.
- [`predict`](predict/index.html) scores session shards with the latest artifacts and tags each prediction with [`classify`](classify/fn.classify.html).
- [`upload`](upload/index.html) merges prediction shards into a warehouse.

Stages communicate only through files, so each can run in its own process.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod error;

pub mod aggregate;
pub mod artifacts;
pub mod classify;
pub mod config;
pub mod grid;
pub mod model;
pub mod predict;
pub mod progress;
pub mod select;
pub mod train;
pub mod upload;

pub use self::{
	artifacts::{ArtifactRecord, ArtifactSet, ArtifactStore},
	classify::{classify, OutcomeTag},
	config::{load_config, Config, Paths},
	error::PipelineError,
	grid::ModelFamily,
	model::Model,
	predict::{PredictionRecord, Predictor},
	progress::Progress,
	train::{train, train_and_save, TrainOptions, TrainReport},
	upload::{upload_directory, FileOutcome, LocalWarehouse, UploadPolicy, UploadReport, Warehouse},
};
