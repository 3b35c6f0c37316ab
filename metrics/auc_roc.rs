use num_traits::ToPrimitive;

/**
This function computes the area under the receiver operating characteristic curve with the trapezoid rule.

Examples are visited in order of descending score. All examples that share a score form one step of the curve, so ties contribute a diagonal segment rather than an arbitrary staircase. The result is `None` when `labels` does not hold at least one positive and one negative example, since the false or true positive rate is then undefined.
*/
pub fn auc_roc(scores: &[f32], labels: &[bool]) -> Option<f32> {
	let n_positives = labels.iter().filter(|label| **label).count();
	let n_negatives = labels.len() - n_positives;
	if n_positives == 0 || n_negatives == 0 {
		return None;
	}
	let n_positives = n_positives.to_f64().unwrap();
	let n_negatives = n_negatives.to_f64().unwrap();
	let mut area = 0.0;
	let mut true_positive_rate = 0.0;
	let mut false_positive_rate = 0.0;
	for step in tie_groups(scores, labels) {
		let next_true_positive_rate =
			true_positive_rate + step.n_positives.to_f64().unwrap() / n_positives;
		let next_false_positive_rate =
			false_positive_rate + step.n_negatives.to_f64().unwrap() / n_negatives;
		area += (next_false_positive_rate - false_positive_rate)
			* (true_positive_rate + next_true_positive_rate)
			/ 2.0;
		true_positive_rate = next_true_positive_rate;
		false_positive_rate = next_false_positive_rate;
	}
	area.to_f32()
}

#[derive(Debug, PartialEq)]
struct TieGroup {
	score: f32,
	n_positives: usize,
	n_negatives: usize,
}

/// Group the examples by score in descending order. NaN scores compare equal to everything so they cannot panic the sort.
fn tie_groups(scores: &[f32], labels: &[bool]) -> Vec<TieGroup> {
	let mut examples: Vec<(f32, bool)> = scores
		.iter()
		.cloned()
		.zip(labels.iter().cloned())
		.collect();
	examples.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
	let mut groups: Vec<TieGroup> = Vec::new();
	for (score, label) in examples {
		let starts_group = groups
			.last()
			.map(|group| group.score != score)
			.unwrap_or(true);
		if starts_group {
			groups.push(TieGroup {
				score,
				n_positives: 0,
				n_negatives: 0,
			});
		}
		let group = groups.last_mut().unwrap();
		if label {
			group.n_positives += 1;
		} else {
			group.n_negatives += 1;
		}
	}
	groups
}

#[test]
fn test_tie_groups() {
	let groups = tie_groups(&[0.9, 0.4, 0.4, 0.2], &[true, true, false, false]);
	assert_eq!(
		groups,
		vec![
			TieGroup {
				score: 0.9,
				n_positives: 1,
				n_negatives: 0
			},
			TieGroup {
				score: 0.4,
				n_positives: 1,
				n_negatives: 1
			},
			TieGroup {
				score: 0.2,
				n_positives: 0,
				n_negatives: 1
			},
		]
	);
}

#[test]
fn test_auc_roc_with_ties() {
	let auc = auc_roc(&[0.9, 0.4, 0.4, 0.2], &[true, true, false, false]).unwrap();
	assert!((auc - 0.875).abs() < 1e-6);
}

#[test]
fn test_auc_roc_single_class() {
	assert_eq!(auc_roc(&[0.1, 0.8], &[true, true]), None);
	assert_eq!(auc_roc(&[0.1, 0.8], &[false, false]), None);
}

#[test]
fn test_auc_roc_perfect_and_inverted() {
	let labels = [false, false, true, true];
	assert_eq!(auc_roc(&[0.1, 0.2, 0.8, 0.9], &labels), Some(1.0));
	assert_eq!(auc_roc(&[0.9, 0.8, 0.2, 0.1], &labels), Some(0.0));
}

#[test]
fn test_auc_roc_all_tied() {
	let auc = auc_roc(&[0.5; 4], &[false, true, false, true]).unwrap();
	assert!((auc - 0.5).abs() < 1e-6);
}
