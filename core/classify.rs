use serde::{Deserialize, Serialize};
use std::fmt;

/// Probabilities at or above this value are confident positives.
pub const UPPER_THRESHOLD: f32 = 0.70;
/// Probabilities below this value are confident negatives.
pub const LOWER_THRESHOLD: f32 = 0.20;

/**
The outcome tag attached to every prediction.

| probability | predicted label | tag |
|-------------|-----------------|-----|
| p >= 0.70 | 1 | TP |
| 0.20 <= p < 0.70 | 1 | FN |
| 0.20 <= p < 0.70 | 0 | FP |
| p < 0.20 | 0 | TN |
| anything else | | Unknown |

The tags do not compare against ground truth. They bucket each prediction by how confident it is and whether the label agrees with that confidence.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeTag {
	TP,
	FP,
	TN,
	FN,
	Unknown,
}

impl fmt::Display for OutcomeTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let tag = match self {
			OutcomeTag::TP => "TP",
			OutcomeTag::FP => "FP",
			OutcomeTag::TN => "TN",
			OutcomeTag::FN => "FN",
			OutcomeTag::Unknown => "Unknown",
		};
		write!(f, "{}", tag)
	}
}

pub fn classify(probability: f32, label: bool) -> OutcomeTag {
	let confident_positive = probability >= UPPER_THRESHOLD;
	let uncertain = probability >= LOWER_THRESHOLD && probability < UPPER_THRESHOLD;
	let confident_negative = probability < LOWER_THRESHOLD;
	match (label, confident_positive, uncertain, confident_negative) {
		(true, true, _, _) => OutcomeTag::TP,
		(true, _, true, _) => OutcomeTag::FN,
		(false, _, true, _) => OutcomeTag::FP,
		(false, _, _, true) => OutcomeTag::TN,
		_ => OutcomeTag::Unknown,
	}
}
