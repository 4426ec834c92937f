use num_traits::ToPrimitive;
use rand::Rng;

/// Compute how many features a single tree may use: `max(1, round(subsample_rate * feature_num))`, never more than `feature_num`.
pub fn n_valid_features(feature_num: usize, subsample_rate: f64) -> usize {
	let n = (subsample_rate * feature_num.to_f64().unwrap_or(0.0))
		.round()
		.to_usize()
		.unwrap_or(0);
	n.max(1).min(feature_num)
}

/// Sample the valid feature mask for one tree. The returned mask has length `feature_num` and exactly `n_valid_features(feature_num, subsample_rate)` entries set, chosen uniformly at random without replacement.
pub fn sample_valid_features<R>(feature_num: usize, subsample_rate: f64, rng: &mut R) -> Vec<bool>
where
	R: Rng + ?Sized,
{
	let amount = n_valid_features(feature_num, subsample_rate);
	let mut valid_features = vec![false; feature_num];
	for feature_index in rand::seq::index::sample(rng, feature_num, amount).iter() {
		valid_features[feature_index] = true;
	}
	valid_features
}

#[cfg(test)]
fn count_valid(mask: &[bool]) -> usize {
	mask.iter().filter(|valid| **valid).count()
}

#[test]
fn test_ten_features_at_thirty_percent() {
	use rand::SeedableRng;
	let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(0);
	let mask = sample_valid_features(10, 0.3, &mut rng);
	assert_eq!(mask.len(), 10);
	assert_eq!(count_valid(&mask), 3);
}

#[test]
fn test_mask_sizes() {
	use rand::SeedableRng;
	let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(1);
	for feature_num in 1..=40 {
		for subsample_rate in &[0.01, 0.1, 0.25, 0.5, 0.8, 1.0] {
			let mask = sample_valid_features(feature_num, *subsample_rate, &mut rng);
			let expected = ((subsample_rate * feature_num as f64).round() as usize).max(1);
			assert_eq!(mask.len(), feature_num);
			assert_eq!(count_valid(&mask), expected);
		}
	}
}

#[test]
fn test_at_least_one_feature() {
	assert_eq!(n_valid_features(3, 0.01), 1);
	assert_eq!(n_valid_features(1, 0.4), 1);
	assert_eq!(n_valid_features(0, 0.5), 0);
	assert_eq!(n_valid_features(4, 2.0), 4);
}

#[test]
fn test_draws_are_independent() {
	use rand::SeedableRng;
	let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(2);
	let masks: std::collections::HashSet<Vec<bool>> = (0..50)
		.map(|_| sample_valid_features(20, 0.5, &mut rng))
		.collect();
	assert!(masks.len() > 1);
}

#[test]
fn test_seeded_draws_are_reproducible() {
	use rand::SeedableRng;
	let mut a = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(3);
	let mut b = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(3);
	for _ in 0..10 {
		assert_eq!(
			sample_valid_features(15, 0.4, &mut a),
			sample_valid_features(15, 0.4, &mut b),
		);
	}
}
