use crate::{model::ModelTrainProgress, select::SelectProgress};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
	LoadingShard { shard_index: usize },
	Selecting(SelectProgress),
	Training {
		shard_index: usize,
		progress: ModelTrainProgress,
	},
	Saving,
}
