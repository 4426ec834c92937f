/*!
Before any tree is fit, the host's raw feature values are mapped into a small number of bins. Tree workers only ever see the bins.

For each feature, the binner computes an ascending list of split points. The bin for a value is the number of split points strictly less than it, so given the split points `[0.5, 1.5, 2]` the bins are:
0. (-infinity, 0.5]
1. (0.5, 1.5]
2. (1.5, 2]
3. (2, infinity)

The sparse point of a feature is the bin that the value `0.0` falls into.
*/

use crate::options::{BinningOptions, QuantileMethod};
use itertools::Itertools;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::RngCore;
use rayon::prelude::*;
use thiserror::Error;

/// The output of a `FeatureBinner`. It is computed once per training run and never modified afterward.
#[derive(Clone, Debug, PartialEq)]
pub struct BinnedFeatures {
	/// The bin of every value, with shape `(n_examples, n_features)`.
	pub bins: Array2<u16>,
	/// The split points for each feature. There is one row per feature.
	pub split_points: Vec<Vec<f32>>,
	/// The bin of `0.0` for each feature.
	pub sparse_points: Vec<u16>,
}

impl BinnedFeatures {
	pub fn feature_num(&self) -> usize {
		self.split_points.len()
	}

	pub fn n_examples(&self) -> usize {
		self.bins.nrows()
	}
}

#[derive(Debug, Error)]
pub enum BinningError {
	#[error("cannot bin a dataset with {n_examples} examples and {n_features} features")]
	EmptyData { n_examples: usize, n_features: usize },
	#[error("invalid binning option {name}: {message}")]
	InvalidOption { name: &'static str, message: String },
	#[error("feature {feature_index} has a non-finite value at example {example_index}")]
	NonFiniteValue {
		feature_index: usize,
		example_index: usize,
	},
}

/// A `FeatureBinner` converts raw feature columns into bins. Any randomness, such as the rows sampled by `QuantileMethod::BinBySampleData`, must come from `rng`.
pub trait FeatureBinner {
	fn convert(
		&self,
		data: ArrayView2<f32>,
		options: &BinningOptions,
		rng: &mut dyn RngCore,
	) -> Result<BinnedFeatures, BinningError>;
}

/// The default binner places split points at evenly spaced quantiles of each feature. If a feature has no more unique values than `bin_num`, the split points are the midpoints between consecutive unique values instead.
#[derive(Clone, Debug, Default)]
pub struct QuantileBinner;

impl FeatureBinner for QuantileBinner {
	fn convert(
		&self,
		data: ArrayView2<f32>,
		options: &BinningOptions,
		rng: &mut dyn RngCore,
	) -> Result<BinnedFeatures, BinningError> {
		validate_options(options)?;
		let (n_examples, n_features) = data.dim();
		if n_examples == 0 || n_features == 0 {
			return Err(BinningError::EmptyData {
				n_examples,
				n_features,
			});
		}
		if let Some(((example_index, feature_index), _)) =
			data.indexed_iter().find(|(_, value)| !value.is_finite())
		{
			return Err(BinningError::NonFiniteValue {
				feature_index,
				example_index,
			});
		}
		// Split points come from a uniform sample of rows, so the order of the data does not matter.
		let sample = match options.method {
			QuantileMethod::BinBySampleData if options.bin_sample_num < n_examples => {
				let mut sample_indices =
					rand::seq::index::sample(rng, n_examples, options.bin_sample_num).into_vec();
				sample_indices.sort_unstable();
				Some(data.select(Axis(0), &sample_indices))
			}
			_ => None,
		};
		let split_data = sample.as_ref().map(|sample| sample.view()).unwrap_or(data.view());
		let split_points: Vec<Vec<f32>> = (0..n_features)
			.into_par_iter()
			.map(|feature_index| compute_split_points(split_data.column(feature_index), options))
			.collect();
		let bins = Array2::from_shape_fn((n_examples, n_features), |(example_index, feature_index)| {
			compute_bin(&split_points[feature_index], data[[example_index, feature_index]])
		});
		let sparse_points = split_points
			.iter()
			.map(|split_points| compute_bin(split_points, 0.0))
			.collect();
		Ok(BinnedFeatures {
			bins,
			split_points,
			sparse_points,
		})
	}
}

fn validate_options(options: &BinningOptions) -> Result<(), BinningError> {
	let invalid = |name, message: &str| {
		Err(BinningError::InvalidOption {
			name,
			message: message.to_owned(),
		})
	};
	if options.bin_num < 2 || options.bin_num > u16::MAX as usize {
		return invalid("bin_num", "must be between 2 and 65535");
	}
	if !options.bin_gap.is_finite() || options.bin_gap < 0.0 {
		return invalid("bin_gap", "must be finite and non-negative");
	}
	if options.bin_sample_num == 0 {
		return invalid("bin_sample_num", "must be at least 1");
	}
	Ok(())
}

/// Compute the split points for a single feature from its (finite) values.
fn compute_split_points(values: ArrayView1<f32>, options: &BinningOptions) -> Vec<f32> {
	let mut values: Vec<f32> = values.iter().cloned().collect();
	values.sort_unstable_by(|a, b| a.total_cmp(b));
	let unique_values: Vec<f32> = values.iter().cloned().dedup().collect();
	let candidates: Vec<f32> = if unique_values.len() <= options.bin_num {
		unique_values
			.iter()
			.tuple_windows()
			.map(|(a, b)| (a + b) / 2.0)
			.collect()
	} else {
		compute_quantiles(&values, options.bin_num)
	};
	// Drop split points that are too close to the previous one, which also removes duplicate quantiles.
	let mut split_points: Vec<f32> = Vec::with_capacity(candidates.len());
	for candidate in candidates {
		match split_points.last() {
			Some(last) if candidate - last <= options.bin_gap => {}
			_ => split_points.push(candidate),
		}
	}
	split_points
}

/// Compute the `bin_num - 1` interior quantiles of `sorted_values` with linear interpolation.
fn compute_quantiles(sorted_values: &[f32], bin_num: usize) -> Vec<f32> {
	let n_values = sorted_values.len();
	let last_index = (n_values - 1).to_f32().unwrap_or(0.0);
	let bin_num_f32 = bin_num.to_f32().unwrap_or(1.0);
	(1..bin_num)
		.map(|i| {
			let position = last_index * i.to_f32().unwrap_or(0.0) / bin_num_f32;
			let index = position.trunc().to_usize().unwrap_or(0);
			let fract = position.fract();
			let value = sorted_values[index];
			if fract > 0.0 && index + 1 < n_values {
				value * (1.0 - fract) + sorted_values[index + 1] * fract
			} else {
				value
			}
		})
		.collect()
}

/// The bin of `value` is the number of split points strictly less than it. `bin_num` is validated to fit in a `u16`.
fn compute_bin(split_points: &[f32], value: f32) -> u16 {
	split_points.partition_point(|split_point| *split_point < value) as u16
}

#[cfg(test)]
fn options(method: QuantileMethod, bin_num: usize, bin_gap: f32, bin_sample_num: usize) -> BinningOptions {
	BinningOptions {
		method,
		bin_num,
		bin_gap,
		bin_sample_num,
	}
}

#[cfg(test)]
fn convert(data: ArrayView2<f32>, options: &BinningOptions) -> Result<BinnedFeatures, BinningError> {
	use rand::SeedableRng;
	let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(0);
	QuantileBinner.convert(data, options, &mut rng)
}

#[test]
fn test_few_unique_values() {
	let data = arr2(&[[1.0, -1.0], [2.0, 0.0], [3.0, 1.0], [4.0, 0.0]]);
	let binned = convert(data.view(), &options(QuantileMethod::BinByDataBlock, 32, 0.0, 100)).unwrap();
	assert_eq!(binned.feature_num(), 2);
	assert_eq!(binned.n_examples(), 4);
	assert_eq!(binned.split_points[0], vec![1.5, 2.5, 3.5]);
	assert_eq!(binned.split_points[1], vec![-0.5, 0.5]);
	assert_eq!(binned.bins, arr2(&[[0u16, 0], [1, 1], [2, 2], [3, 1]]));
	assert_eq!(binned.sparse_points, vec![0, 1]);
}

#[test]
fn test_quantiles() {
	let data = Array2::from_shape_fn((100, 1), |(i, _)| i as f32);
	let binned = convert(data.view(), &options(QuantileMethod::BinByDataBlock, 4, 0.0, 100)).unwrap();
	assert_eq!(binned.split_points[0], vec![24.75, 49.5, 74.25]);
	assert_eq!(binned.bins[[0, 0]], 0);
	assert_eq!(binned.bins[[24, 0]], 0);
	assert_eq!(binned.bins[[25, 0]], 1);
	assert_eq!(binned.bins[[99, 0]], 3);
}

#[test]
fn test_bin_gap() {
	let data = arr2(&[[1.0], [2.0], [3.0], [4.0]]);
	let binned = convert(data.view(), &options(QuantileMethod::BinByDataBlock, 32, 1.0, 100)).unwrap();
	assert_eq!(binned.split_points[0], vec![1.5, 3.5]);
}

#[test]
fn test_bin_by_sample_data() {
	// Rows are sampled from the whole dataset, not read from its start.
	let data = Array2::from_shape_fn((1000, 1), |(i, _)| i as f32);
	let binned = convert(
		data.view(),
		&options(QuantileMethod::BinBySampleData, 4, 0.0, 100),
	)
	.unwrap();
	let split_points = &binned.split_points[0];
	assert_eq!(split_points.len(), 3);
	assert!(split_points[0] < 500.0);
	assert!(split_points[2] > 500.0);
	let n_top_bin = binned.bins.iter().filter(|bin| **bin == 3).count();
	assert!(n_top_bin < 500);
	assert!((0..4).all(|bin| binned.bins.iter().any(|b| *b == bin)));
}

#[test]
fn test_bin_by_sample_data_is_seeded() {
	use rand::SeedableRng;
	let data = Array2::from_shape_fn((500, 2), |(i, j)| ((i * 31 + j * 17) % 97) as f32);
	let options = options(QuantileMethod::BinBySampleData, 8, 0.0, 50);
	let convert_with_seed = |seed| {
		let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(seed);
		QuantileBinner
			.convert(data.view(), &options, &mut rng)
			.unwrap()
	};
	assert_eq!(convert_with_seed(3), convert_with_seed(3));
}

#[test]
fn test_bin_by_sample_data_with_few_examples() {
	let data = arr2(&[[1.0], [2.0], [100.0], [200.0]]);
	let sampled = convert(
		data.view(),
		&options(QuantileMethod::BinBySampleData, 32, 0.0, 10),
	)
	.unwrap();
	let full = convert(
		data.view(),
		&options(QuantileMethod::BinByDataBlock, 32, 0.0, 10),
	)
	.unwrap();
	assert_eq!(sampled, full);
	assert_eq!(sampled.split_points[0], vec![1.5, 51.0, 150.0]);
}

#[test]
fn test_invalid_input() {
	let empty: Array2<f32> = Array2::zeros((0, 3));
	assert!(matches!(
		convert(empty.view(), &BinningOptions::default()),
		Err(BinningError::EmptyData {
			n_examples: 0,
			n_features: 3
		})
	));
	let data = arr2(&[[1.0, 2.0], [f32::NAN, 3.0]]);
	assert!(matches!(
		convert(data.view(), &BinningOptions::default()),
		Err(BinningError::NonFiniteValue {
			feature_index: 0,
			example_index: 1
		})
	));
	let data = arr2(&[[1.0], [2.0]]);
	assert!(matches!(
		convert(
			data.view(),
			&options(QuantileMethod::BinByDataBlock, 1, 0.0, 10)
		),
		Err(BinningError::InvalidOption { name: "bin_num", .. })
	));
	assert!(matches!(
		convert(
			data.view(),
			&options(QuantileMethod::BinByDataBlock, 8, -1.0, 10)
		),
		Err(BinningError::InvalidOption { name: "bin_gap", .. })
	));
}
