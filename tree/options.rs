/*!
This module defines the options that control a host's boosting run and the `Config` file format they are usually loaded from.

A config file may be written in YAML or JSON. Every field is optional and missing fields take their default value:

```yaml
task_type: classification
loss_type: cross_entropy
num_trees: 10
subsample_feature_rate: 0.5
n_iter_no_change: true
binning:
  method: bin_by_sample_data
  bin_num: 32
tree_options:
  max_depth: 4
```
*/

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
	Classification,
	Regression,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
	CrossEntropy,
	LeastSquaredError,
	LeastAbsoluteError,
	Huber,
	Fair,
	LogCosh,
	Tweedie,
}

/// The method the feature binner uses to choose which examples to compute split points from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantileMethod {
	/// Compute split points from `bin_sample_num` examples sampled uniformly without replacement.
	BinBySampleData,
	/// Compute split points from every example.
	BinByDataBlock,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BinningOptions {
	pub method: QuantileMethod,
	/// The maximum number of bins per feature.
	pub bin_num: usize,
	/// Split points closer than this to the previous split point are dropped.
	pub bin_gap: f32,
	/// The number of examples used to compute split points with `QuantileMethod::BinBySampleData`.
	pub bin_sample_num: usize,
}

impl Default for BinningOptions {
	fn default() -> Self {
		Self {
			method: QuantileMethod::BinBySampleData,
			bin_num: 32,
			bin_gap: 1e-3,
			bin_sample_num: 10_000,
		}
	}
}

/// These options are handed to the tree worker factory for every tree. The host does not interpret them.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeOptions {
	pub criterion_method: String,
	pub criterion_params: Vec<f32>,
	pub max_depth: usize,
	pub min_sample_split: usize,
	pub min_impurity_split: f32,
	pub min_leaf_node: usize,
	pub max_split_nodes: usize,
}

impl Default for TreeOptions {
	fn default() -> Self {
		Self {
			criterion_method: "xgboost".to_owned(),
			criterion_params: vec![0.1],
			max_depth: 5,
			min_sample_split: 2,
			min_impurity_split: 1e-3,
			min_leaf_node: 1,
			max_split_nodes: 65536,
		}
	}
}

/// The options passed to `HeteroBoostingHost::new`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoostingOptions {
	pub task_type: TaskType,
	pub loss_type: LossType,
	/// The learning rate is applied by the tree workers. It is carried here so both parties are configured from the same file.
	pub learning_rate: f32,
	/// This is the maximum number of boosting rounds. Fewer rounds are trained if the guest signals an early stop.
	pub num_trees: usize,
	/// The fraction of the host's features each tree may split on.
	pub subsample_feature_rate: f64,
	/// If true, the host waits for the guest's stop flag after every round.
	pub n_iter_no_change: bool,
	/// The early stopping tolerance the guest applies.
	pub tol: f32,
	pub binning: BinningOptions,
	pub tree_options: TreeOptions,
	/// Seed for feature subsampling. If `None`, the generator is seeded from entropy.
	pub random_seed: Option<u64>,
}

impl Default for BoostingOptions {
	fn default() -> Self {
		Self {
			task_type: TaskType::Classification,
			loss_type: LossType::CrossEntropy,
			learning_rate: 0.3,
			num_trees: 5,
			subsample_feature_rate: 0.8,
			n_iter_no_change: true,
			tol: 1e-4,
			binning: BinningOptions::default(),
			tree_options: TreeOptions::default(),
			random_seed: None,
		}
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse yaml config")]
	Yaml(#[from] serde_yaml::Error),
	#[error("failed to parse json config")]
	Json(#[from] serde_json::Error),
	#[error("invalid option {name}: {message}")]
	Invalid { name: &'static str, message: String },
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
	pub task_type: Option<TaskType>,
	pub loss_type: Option<LossType>,
	pub learning_rate: Option<f32>,
	pub num_trees: Option<usize>,
	pub subsample_feature_rate: Option<f64>,
	pub n_iter_no_change: Option<bool>,
	pub tol: Option<f32>,
	pub binning: Option<BinningConfig>,
	pub tree_options: Option<TreeOptionsConfig>,
	pub random_seed: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct BinningConfig {
	pub method: Option<QuantileMethod>,
	pub bin_num: Option<usize>,
	pub bin_gap: Option<f32>,
	pub bin_sample_num: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct TreeOptionsConfig {
	pub criterion_method: Option<String>,
	pub criterion_params: Option<Vec<f32>>,
	pub max_depth: Option<usize>,
	pub min_sample_split: Option<usize>,
	pub min_impurity_split: Option<f32>,
	pub min_leaf_node: Option<usize>,
	pub max_split_nodes: Option<usize>,
}

impl Config {
	/// Read a config file. Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
	pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_owned(),
			source,
		})?;
		match path.extension().and_then(|extension| extension.to_str()) {
			Some("yaml") | Some("yml") => Self::from_yaml(&text),
			_ => Self::from_json(&text),
		}
	}

	pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
		Ok(serde_yaml::from_str(text)?)
	}

	pub fn from_json(text: &str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(text)?)
	}
}

impl BoostingOptions {
	/// Fill in the defaults for every field missing from `config` and validate the result.
	pub fn from_config(config: Config) -> Result<Self, ConfigError> {
		let defaults = Self::default();
		let binning = config.binning.unwrap_or_default();
		let tree_options = config.tree_options.unwrap_or_default();
		let options = Self {
			task_type: config.task_type.unwrap_or(defaults.task_type),
			loss_type: config.loss_type.unwrap_or(defaults.loss_type),
			learning_rate: config.learning_rate.unwrap_or(defaults.learning_rate),
			num_trees: config.num_trees.unwrap_or(defaults.num_trees),
			subsample_feature_rate: config
				.subsample_feature_rate
				.unwrap_or(defaults.subsample_feature_rate),
			n_iter_no_change: config.n_iter_no_change.unwrap_or(defaults.n_iter_no_change),
			tol: config.tol.unwrap_or(defaults.tol),
			binning: BinningOptions {
				method: binning.method.unwrap_or(defaults.binning.method),
				bin_num: binning.bin_num.unwrap_or(defaults.binning.bin_num),
				bin_gap: binning.bin_gap.unwrap_or(defaults.binning.bin_gap),
				bin_sample_num: binning
					.bin_sample_num
					.unwrap_or(defaults.binning.bin_sample_num),
			},
			tree_options: TreeOptions {
				criterion_method: tree_options
					.criterion_method
					.unwrap_or(defaults.tree_options.criterion_method),
				criterion_params: tree_options
					.criterion_params
					.unwrap_or(defaults.tree_options.criterion_params),
				max_depth: tree_options
					.max_depth
					.unwrap_or(defaults.tree_options.max_depth),
				min_sample_split: tree_options
					.min_sample_split
					.unwrap_or(defaults.tree_options.min_sample_split),
				min_impurity_split: tree_options
					.min_impurity_split
					.unwrap_or(defaults.tree_options.min_impurity_split),
				min_leaf_node: tree_options
					.min_leaf_node
					.unwrap_or(defaults.tree_options.min_leaf_node),
				max_split_nodes: tree_options
					.max_split_nodes
					.unwrap_or(defaults.tree_options.max_split_nodes),
			},
			random_seed: config.random_seed,
		};
		options.validate()?;
		Ok(options)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let invalid = |name, message: &str| {
			Err(ConfigError::Invalid {
				name,
				message: message.to_owned(),
			})
		};
		if self.num_trees < 1 {
			return invalid("num_trees", "must be at least 1");
		}
		if !(self.subsample_feature_rate > 0.0 && self.subsample_feature_rate <= 1.0) {
			return invalid("subsample_feature_rate", "must be in (0, 1]");
		}
		if self.binning.bin_num < 2 {
			return invalid("binning.bin_num", "must be at least 2");
		}
		if !self.binning.bin_gap.is_finite() || self.binning.bin_gap < 0.0 {
			return invalid("binning.bin_gap", "must be finite and non-negative");
		}
		if self.binning.bin_sample_num < 1 {
			return invalid("binning.bin_sample_num", "must be at least 1");
		}
		Ok(())
	}
}

#[test]
fn test_defaults() {
	let options = BoostingOptions::from_config(Config::default()).unwrap();
	assert_eq!(options, BoostingOptions::default());
}

#[test]
fn test_yaml() {
	let yaml = r#"
task_type: regression
loss_type: least_squared_error
num_trees: 10
subsample_feature_rate: 0.5
n_iter_no_change: false
binning:
  method: bin_by_data_block
  bin_num: 16
tree_options:
  max_depth: 3
random_seed: 42
"#;
	let options = BoostingOptions::from_config(Config::from_yaml(yaml).unwrap()).unwrap();
	assert_eq!(options.task_type, TaskType::Regression);
	assert_eq!(options.loss_type, LossType::LeastSquaredError);
	assert_eq!(options.num_trees, 10);
	assert!(!options.n_iter_no_change);
	assert_eq!(options.binning.method, QuantileMethod::BinByDataBlock);
	assert_eq!(options.binning.bin_num, 16);
	assert_eq!(options.binning.bin_sample_num, 10_000);
	assert_eq!(options.tree_options.max_depth, 3);
	assert_eq!(options.tree_options.criterion_method, "xgboost");
	assert_eq!(options.random_seed, Some(42));
}

#[test]
fn test_json() {
	let json = r#"{ "loss_type": "huber", "binning": { "bin_gap": 0.5 } }"#;
	let options = BoostingOptions::from_config(Config::from_json(json).unwrap()).unwrap();
	assert_eq!(options.loss_type, LossType::Huber);
	assert_eq!(options.task_type, TaskType::Classification);
	assert!((options.binning.bin_gap - 0.5).abs() < f32::EPSILON);
}

#[test]
fn test_from_path() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("host.yml");
	std::fs::write(&path, "num_trees: 7\n").unwrap();
	let options = BoostingOptions::from_config(Config::from_path(&path).unwrap()).unwrap();
	assert_eq!(options.num_trees, 7);
	let missing = dir.path().join("missing.json");
	assert!(matches!(
		Config::from_path(&missing),
		Err(ConfigError::Io { .. })
	));
}

#[test]
fn test_invalid_options() {
	let json = r#"{ "subsample_feature_rate": 0.0 }"#;
	let result = BoostingOptions::from_config(Config::from_json(json).unwrap());
	assert!(matches!(
		result,
		Err(ConfigError::Invalid {
			name: "subsample_feature_rate",
			..
		})
	));
	let json = r#"{ "binning": { "bin_num": 1 } }"#;
	let result = BoostingOptions::from_config(Config::from_json(json).unwrap());
	assert!(matches!(
		result,
		Err(ConfigError::Invalid {
			name: "binning.bin_num",
			..
		})
	));
	let json = r#"{ "num_trees": 0 }"#;
	assert!(BoostingOptions::from_config(Config::from_json(json).unwrap()).is_err());
	assert!(Config::from_json(r#"{ "loss_type": "hinge" }"#).is_err());
}
