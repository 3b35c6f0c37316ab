use converge_features::SchemaError;
use std::path::PathBuf;
use thiserror::Error;

/// The errors a pipeline stage can fail with. Stage functions return `anyhow::Result` and attach context, so callers that need to react to a specific failure can `downcast_ref::<PipelineError>()`.
#[derive(Debug, Error)]
pub enum PipelineError {
	#[error(transparent)]
	Schema(#[from] SchemaError),
	#[error("no model artifact found in {}", .0.display())]
	MissingArtifact(PathBuf),
	#[error("shard file {} does not exist", .0.display())]
	MissingShardFile(PathBuf),
	#[error("failed to upload {}: {reason}", .path.display())]
	Upload { path: PathBuf, reason: String },
	#[error("no candidate model produced a defined cross validation score")]
	ModelSelection,
	#[error("unsupported artifact major version {0}")]
	UnsupportedArtifactVersion(u8),
}
