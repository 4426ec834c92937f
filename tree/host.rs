/*!
The host side of hetero secure boosting. The host owns a vertical slice of the features and no labels. It bins its features once, learns from the guest how many trees to fit per round, and then fits `tree_dim` trees per round in lock step with the guest until it runs out of rounds or the guest tells it to stop.

A run moves through the stages of `RunStage`:

```text
Uninitialized -> Binned -> DimSynced -> RoundRunning { round }* -> Done
```
*/

use crate::{
	binning::{BinnedFeatures, FeatureBinner},
	error::{HostError, SyncFailure},
	flow_id::FlowId,
	model::{read_model_meta, write_model_meta, ModelMeta, ModelStore, TreeEnsemble},
	options::{BoostingOptions, LossType, TaskType},
	sampling,
	transfer::{TransferChannel, TransferVariable, GUEST_INDEX, STOP_FLAG, TREE_DIM},
	worker::{FitRequest, PredictRequest, TreeArtifact, TreeWorker, TreeWorkerFactory},
};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStage {
	Uninitialized,
	Binned,
	DimSynced,
	RoundRunning { round: usize },
	Done,
}

/// The state a single run accumulates.
#[derive(Debug)]
pub struct RunState {
	pub stage: RunStage,
	pub tree_dim: Option<usize>,
	pub feature_num: Option<usize>,
	pub binned: Option<BinnedFeatures>,
	pub trees: TreeEnsemble,
}

impl Default for RunState {
	fn default() -> Self {
		Self {
			stage: RunStage::Uninitialized,
			tree_dim: None,
			feature_num: None,
			binned: None,
			trees: TreeEnsemble::new(),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainSummary {
	pub rounds_trained: usize,
	pub trees_fit: usize,
	pub stopped_early: bool,
}

/// This enum reports the training progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainProgress {
	Binning,
	Training { round: usize, num_rounds: usize },
	Stopped { rounds_trained: usize },
}

/// The output of replaying one stored tree.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeOutput<T> {
	pub round: usize,
	pub tree_index: usize,
	pub flow_id: FlowId,
	pub output: T,
}

pub struct HeteroBoostingHost<B, C, W> {
	options: BoostingOptions,
	binner: B,
	channel: C,
	worker_factory: W,
	span: tracing::Span,
	rng: Xoshiro256PlusPlus,
	flowid: String,
	state: RunState,
}

impl<B, C, W> HeteroBoostingHost<B, C, W>
where
	B: FeatureBinner,
	C: TransferChannel,
	W: TreeWorkerFactory,
{
	/// Create a host for one run. Every event the host logs is recorded inside `span`.
	pub fn new(
		options: BoostingOptions,
		binner: B,
		channel: C,
		worker_factory: W,
		span: tracing::Span,
	) -> Self {
		let rng = match options.random_seed {
			Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
			None => Xoshiro256PlusPlus::from_entropy(),
		};
		Self {
			options,
			binner,
			channel,
			worker_factory,
			span,
			rng,
			flowid: "0".to_owned(),
			state: RunState::default(),
		}
	}

	pub fn options(&self) -> &BoostingOptions {
		&self.options
	}

	pub fn flowid(&self) -> &str {
		&self.flowid
	}

	pub fn stage(&self) -> RunStage {
		self.state.stage
	}

	pub fn tree_dim(&self) -> Option<usize> {
		self.state.tree_dim
	}

	pub fn feature_num(&self) -> Option<usize> {
		self.state.feature_num
	}

	pub fn binned_features(&self) -> Option<&BinnedFeatures> {
		self.state.binned.as_ref()
	}

	pub fn trees(&self) -> &TreeEnsemble {
		&self.state.trees
	}

	pub fn loss_type(&self) -> LossType {
		self.options.loss_type
	}

	pub fn task_type(&self) -> TaskType {
		self.options.task_type
	}

	/// Set the flowid every flow id and transfer tag of this run is derived from. The guest must use the same flowid.
	pub fn set_flowid(&mut self, flowid: impl Into<String>) {
		let _span = self.span.clone().entered();
		self.flowid = flowid.into();
		info!(flowid = %self.flowid, "set flowid");
	}

	/// Bin the host's features. This must happen exactly once per run, before anything else.
	pub fn convert_feature_to_bin(&mut self, data: ArrayView2<f32>) -> Result<(), HostError> {
		let _span = self.span.clone().entered();
		if self.state.stage != RunStage::Uninitialized {
			return Err(HostError::AlreadyBinned);
		}
		info!(
			n_examples = data.nrows(),
			n_features = data.ncols(),
			"convert feature to bins"
		);
		let binned = self
			.binner
			.convert(data, &self.options.binning, &mut self.rng)?;
		self.state.binned = Some(binned);
		self.state.stage = RunStage::Binned;
		Ok(())
	}

	/// Sample the valid feature mask for one tree using `rng`.
	pub fn sample_valid_features<R>(&mut self, rng: &mut R) -> Result<Vec<bool>, HostError>
	where
		R: Rng + ?Sized,
	{
		let feature_num = self.feature_num_or_init()?;
		Ok(sampling::sample_valid_features(
			feature_num,
			self.options.subsample_feature_rate,
			rng,
		))
	}

	pub fn generate_flowid(&self, round: usize, tree_index: usize) -> FlowId {
		FlowId::new(&self.flowid, round, tree_index)
	}

	/// Block until the guest publishes the number of trees per round.
	pub fn sync_tree_dim(&mut self) -> Result<usize, HostError> {
		let _span = self.span.clone().entered();
		match self.state.stage {
			RunStage::Uninitialized => return Err(HostError::NotBinned),
			RunStage::Binned => {}
			_ => return Err(HostError::TreeDimAlreadySynced),
		}
		info!("sync tree dim from guest");
		let tag = TREE_DIM.tag(&self.flowid);
		let value = self.receive(TREE_DIM, &tag)?;
		let tree_dim = match value.as_u64().and_then(|tree_dim| tree_dim.to_usize()) {
			Some(tree_dim) if tree_dim > 0 => tree_dim,
			_ => {
				return Err(HostError::Sync {
					variable: TREE_DIM.name,
					tag,
					reason: SyncFailure::InvalidValue(value),
				})
			}
		};
		self.state.tree_dim = Some(tree_dim);
		self.state.stage = RunStage::DimSynced;
		info!(tree_dim, "synced tree dim");
		Ok(tree_dim)
	}

	/// Block until the guest publishes whether training stops after `round`.
	pub fn sync_stop_flag(&self, round: usize) -> Result<bool, HostError> {
		let _span = self.span.clone().entered();
		info!(round, "sync stop flag from guest");
		let tag = STOP_FLAG.round_tag(&self.flowid, round);
		let value = self.receive(STOP_FLAG, &tag)?;
		match value.as_bool() {
			Some(stop_flag) => {
				info!(round, stop_flag, "received stop flag");
				Ok(stop_flag)
			}
			None => Err(HostError::Sync {
				variable: STOP_FLAG.name,
				tag,
				reason: SyncFailure::InvalidValue(value),
			}),
		}
	}

	pub fn fit(&mut self, data: ArrayView2<f32>) -> Result<TrainSummary, HostError> {
		self.fit_with_progress(data, &mut |_| {})
	}

	/// Train the host's half of the model. Rounds run strictly in order, and with early stopping enabled, round `i + 1` does not start until the guest's stop flag for round `i` arrives.
	pub fn fit_with_progress(
		&mut self,
		data: ArrayView2<f32>,
		update_progress: &mut dyn FnMut(TrainProgress),
	) -> Result<TrainSummary, HostError> {
		let _span = self.span.clone().entered();
		info!("begin to train secureboosting host model");
		update_progress(TrainProgress::Binning);
		self.convert_feature_to_bin(data)?;
		let tree_dim = self.sync_tree_dim()?;
		let num_rounds = self.options.num_trees;
		let mut stopped_early = false;
		for round in 0..num_rounds {
			update_progress(TrainProgress::Training { round, num_rounds });
			self.state.stage = RunStage::RoundRunning { round };
			let trees = self.fit_round(round, tree_dim)?;
			self.state.trees.push_round(trees);
			if self.options.n_iter_no_change && self.sync_stop_flag(round)? {
				stopped_early = true;
				break;
			}
		}
		self.state.stage = RunStage::Done;
		let rounds_trained = self.state.trees.len();
		update_progress(TrainProgress::Stopped { rounds_trained });
		info!(rounds_trained, stopped_early, "end to train secureboosting host model");
		Ok(TrainSummary {
			rounds_trained,
			trees_fit: self.state.trees.n_trees(),
			stopped_early,
		})
	}

	/// Replay every stored tree, in the order it was fit, under the flow id it was fit with. Combining the outputs is up to the caller.
	pub fn predict(
		&self,
		data: ArrayView2<f32>,
	) -> Result<Vec<TreeOutput<<W::Worker as TreeWorker>::Output>>, HostError> {
		let _span = self.span.clone().entered();
		if self.state.trees.is_empty() {
			warn!("predict called on a model without trees");
		}
		info!(
			n_rounds = self.state.trees.len(),
			n_examples = data.nrows(),
			"start predict"
		);
		let mut outputs = Vec::with_capacity(self.state.trees.n_trees());
		for (round, trees) in self.state.trees.rounds().iter().enumerate() {
			for (tree_index, model) in trees.iter().enumerate() {
				let flow_id = self.generate_flowid(round, tree_index);
				debug!(round, tree_index, flow_id = %flow_id, "predict tree");
				let mut worker = self.worker_factory.create(&self.options.tree_options);
				let output = worker
					.predict(PredictRequest {
						model,
						flow_id: &flow_id,
						data: data.view(),
					})
					.map_err(|source| HostError::TreePredict {
						round,
						tree_index,
						flow_id: flow_id.clone(),
						source,
					})?;
				outputs.push(TreeOutput {
					round,
					tree_index,
					flow_id,
					output,
				});
			}
		}
		info!("end predict");
		Ok(outputs)
	}

	pub fn save_model<S>(&self, store: &mut S, namespace: &str) -> Result<(), HostError>
	where
		S: ModelStore + ?Sized,
	{
		let _span = self.span.clone().entered();
		let tree_dim = self.state.tree_dim.ok_or(HostError::NotTrained)?;
		let model_meta = ModelMeta {
			trees: self.state.trees.clone(),
			loss_type: self.options.loss_type,
			tree_dim,
			task_type: self.options.task_type,
		};
		write_model_meta(store, namespace, &model_meta)?;
		info!(
			namespace,
			n_rounds = model_meta.trees.len(),
			tree_dim,
			"saved model"
		);
		Ok(())
	}

	/// Replace this host's state with the model stored in `namespace`. The loaded model's task and loss replace the configured ones.
	pub fn load_model<S>(&mut self, store: &S, namespace: &str) -> Result<(), HostError>
	where
		S: ModelStore + ?Sized,
	{
		let _span = self.span.clone().entered();
		let model_meta = read_model_meta(store, namespace)?;
		self.options.task_type = model_meta.task_type;
		self.options.loss_type = model_meta.loss_type;
		self.state = RunState {
			stage: RunStage::Done,
			tree_dim: Some(model_meta.tree_dim),
			feature_num: None,
			binned: None,
			trees: model_meta.trees,
		};
		info!(
			namespace,
			n_rounds = self.state.trees.len(),
			tree_dim = model_meta.tree_dim,
			"loaded model"
		);
		Ok(())
	}

	fn fit_round(&mut self, round: usize, tree_dim: usize) -> Result<Vec<TreeArtifact>, HostError> {
		let mut trees = Vec::with_capacity(tree_dim);
		for tree_index in 0..tree_dim {
			let feature_num = self.feature_num_or_init()?;
			let flow_id = self.generate_flowid(round, tree_index);
			let valid_features = sampling::sample_valid_features(
				feature_num,
				self.options.subsample_feature_rate,
				&mut self.rng,
			);
			let binned_features = self.state.binned.as_ref().ok_or(HostError::NotBinned)?;
			debug!(
				round,
				tree_index,
				flow_id = %flow_id,
				n_valid_features = valid_features.iter().filter(|valid| **valid).count(),
				"fit tree"
			);
			let mut worker = self.worker_factory.create(&self.options.tree_options);
			let tree = worker
				.fit(FitRequest {
					binned_features,
					flow_id: &flow_id,
					valid_features: &valid_features,
				})
				.map_err(|source| HostError::TreeFit {
					round,
					tree_index,
					flow_id,
					source,
				})?;
			trees.push(tree);
		}
		Ok(trees)
	}

	fn feature_num_or_init(&mut self) -> Result<usize, HostError> {
		if let Some(feature_num) = self.state.feature_num {
			return Ok(feature_num);
		}
		let feature_num = self
			.state
			.binned
			.as_ref()
			.ok_or(HostError::NotBinned)?
			.feature_num();
		self.state.feature_num = Some(feature_num);
		Ok(feature_num)
	}

	fn receive(&self, variable: TransferVariable, tag: &str) -> Result<Value, HostError> {
		let sync_error = |reason| HostError::Sync {
			variable: variable.name,
			tag: tag.to_owned(),
			reason,
		};
		match self.channel.receive(variable.name, tag, GUEST_INDEX) {
			Ok(Some(value)) => Ok(value),
			Ok(None) => Err(sync_error(SyncFailure::Missing)),
			Err(error) => Err(sync_error(SyncFailure::Transport(error))),
		}
	}
}

#[cfg(test)]
#[derive(Clone, Debug, PartialEq)]
struct FitCall {
	flow_id: String,
	feature_num: usize,
	n_valid_features: usize,
	valid_features: Vec<bool>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct FakeWorkerLog {
	fits: Vec<FitCall>,
	predicts: Vec<String>,
}

#[cfg(test)]
struct FakeWorker {
	log: std::rc::Rc<std::cell::RefCell<FakeWorkerLog>>,
	fail_on: Option<String>,
}

#[cfg(test)]
impl TreeWorker for FakeWorker {
	type Output = String;

	fn fit(
		&mut self,
		request: FitRequest<'_>,
	) -> Result<TreeArtifact, crate::worker::TreeWorkerError> {
		let flow_id = request.flow_id.to_string();
		if self.fail_on.as_deref() == Some(flow_id.as_str()) {
			return Err("split finding failed".into());
		}
		self.log.borrow_mut().fits.push(FitCall {
			flow_id: flow_id.clone(),
			feature_num: request.valid_features.len(),
			n_valid_features: request.valid_features.iter().filter(|valid| **valid).count(),
			valid_features: request.valid_features.to_vec(),
		});
		Ok(TreeArtifact::new(flow_id.into_bytes()))
	}

	fn predict(&mut self, request: PredictRequest<'_>) -> Result<String, crate::worker::TreeWorkerError> {
		let flow_id = request.flow_id.to_string();
		self.log.borrow_mut().predicts.push(flow_id.clone());
		let model = String::from_utf8_lossy(request.model.as_bytes()).into_owned();
		Ok(format!("{}@{}:{}", model, flow_id, request.data.sum()))
	}
}

#[cfg(test)]
type FakeHost = HeteroBoostingHost<
	crate::binning::QuantileBinner,
	crate::transfer::LocalTransferChannel,
	Box<dyn Fn(&crate::options::TreeOptions) -> FakeWorker>,
>;

#[cfg(test)]
fn fake_host(
	options: BoostingOptions,
	channel: crate::transfer::LocalTransferChannel,
	log: &std::rc::Rc<std::cell::RefCell<FakeWorkerLog>>,
	fail_on: Option<&str>,
) -> FakeHost {
	let log = log.clone();
	let fail_on = fail_on.map(|fail_on| fail_on.to_owned());
	let worker_factory: Box<dyn Fn(&crate::options::TreeOptions) -> FakeWorker> =
		Box::new(move |_| FakeWorker {
			log: log.clone(),
			fail_on: fail_on.clone(),
		});
	HeteroBoostingHost::new(
		options,
		crate::binning::QuantileBinner,
		channel,
		worker_factory,
		tracing::info_span!("host", party = "host"),
	)
}

/// A channel that already holds everything the guest would publish.
#[cfg(test)]
fn fake_guest(flowid: &str, tree_dim: Value, stop_flags: &[Value]) -> crate::transfer::LocalTransferChannel {
	let channel =
		crate::transfer::LocalTransferChannel::with_timeout(std::time::Duration::from_millis(20));
	channel
		.send(TREE_DIM.name, &TREE_DIM.tag(flowid), GUEST_INDEX, tree_dim)
		.unwrap();
	for (round, stop_flag) in stop_flags.iter().enumerate() {
		channel
			.send(
				STOP_FLAG.name,
				&STOP_FLAG.round_tag(flowid, round),
				GUEST_INDEX,
				stop_flag.clone(),
			)
			.unwrap();
	}
	channel
}

#[cfg(test)]
fn test_options(num_trees: usize, n_iter_no_change: bool) -> BoostingOptions {
	BoostingOptions {
		num_trees,
		n_iter_no_change,
		subsample_feature_rate: 0.3,
		random_seed: Some(7),
		..Default::default()
	}
}

#[cfg(test)]
fn test_data() -> Array2<f32> {
	Array2::from_shape_fn((20, 10), |(i, j)| ((i * 7 + j * 3) % 11) as f32)
}

#[cfg(test)]
fn fit_flow_ids(log: &std::rc::Rc<std::cell::RefCell<FakeWorkerLog>>) -> Vec<String> {
	log.borrow()
		.fits
		.iter()
		.map(|call| call.flow_id.clone())
		.collect()
}

#[test]
fn test_fit_without_early_stopping() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(3, false),
		fake_guest("0", Value::from(2), &[]),
		&log,
		None,
	);
	let summary = host.fit(test_data().view()).unwrap();
	insta::assert_debug_snapshot!(summary, @r###"
 TrainSummary {
     rounds_trained: 3,
     trees_fit: 6,
     stopped_early: false,
 }
 "###);
	assert_eq!(host.stage(), RunStage::Done);
	assert_eq!(host.tree_dim(), Some(2));
	assert_eq!(host.feature_num(), Some(10));
	assert_eq!(host.trees().len(), 3);
	assert!(host.trees().rounds().iter().all(|round| round.len() == 2));
	assert_eq!(
		fit_flow_ids(&log),
		vec!["0.0.0", "0.0.1", "0.1.0", "0.1.1", "0.2.0", "0.2.1"]
	);
	assert!(log
		.borrow()
		.fits
		.iter()
		.all(|call| call.feature_num == 10 && call.n_valid_features == 3));
}

#[cfg(test)]
fn fit_masks(log: &std::rc::Rc<std::cell::RefCell<FakeWorkerLog>>) -> Vec<Vec<bool>> {
	log.borrow()
		.fits
		.iter()
		.map(|call| call.valid_features.clone())
		.collect()
}

#[test]
fn test_masks_are_sampled_per_tree() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(5, false),
		fake_guest("0", Value::from(2), &[]),
		&log,
		None,
	);
	host.fit(test_data().view()).unwrap();
	let masks = fit_masks(&log);
	assert_eq!(masks.len(), 10);
	assert!(masks
		.iter()
		.all(|mask| mask.len() == 10 && mask.iter().filter(|valid| **valid).count() == 3));
	let distinct_masks: std::collections::HashSet<&Vec<bool>> = masks.iter().collect();
	assert!(distinct_masks.len() > 1);
}

#[test]
fn test_seeded_masks_are_reproducible() {
	let masks_for_seed = |random_seed| {
		let log = Default::default();
		let mut host = fake_host(
			BoostingOptions {
				random_seed: Some(random_seed),
				..test_options(4, false)
			},
			fake_guest("0", Value::from(2), &[]),
			&log,
			None,
		);
		host.fit(test_data().view()).unwrap();
		fit_masks(&log)
	};
	let masks = masks_for_seed(7);
	assert_eq!(masks.len(), 8);
	assert_eq!(masks, masks_for_seed(7));
	assert_ne!(masks, masks_for_seed(8));
}

#[test]
fn test_early_stopping() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(5, true),
		fake_guest("0", Value::from(2), &[Value::Bool(false), Value::Bool(true)]),
		&log,
		None,
	);
	let summary = host.fit(test_data().view()).unwrap();
	assert_eq!(
		summary,
		TrainSummary {
			rounds_trained: 2,
			trees_fit: 4,
			stopped_early: true,
		}
	);
	assert_eq!(host.trees().len(), 2);
	assert_eq!(host.stage(), RunStage::Done);
	assert_eq!(fit_flow_ids(&log), vec!["0.0.0", "0.0.1", "0.1.0", "0.1.1"]);
}

#[test]
fn test_early_stopping_never_signalled() {
	let log = Default::default();
	let stop_flags = vec![Value::Bool(false); 3];
	let mut host = fake_host(
		test_options(3, true),
		fake_guest("0", Value::from(1), &stop_flags),
		&log,
		None,
	);
	let summary = host.fit(test_data().view()).unwrap();
	assert_eq!(summary.rounds_trained, 3);
	assert!(!summary.stopped_early);
	assert_eq!(fit_flow_ids(&log), vec!["0.0.0", "0.1.0", "0.2.0"]);
}

#[test]
fn test_missing_stop_flag() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(3, true),
		fake_guest("0", Value::from(1), &[Value::Bool(false)]),
		&log,
		None,
	);
	let error = host.fit(test_data().view()).unwrap_err();
	match error {
		HostError::Sync {
			variable,
			tag,
			reason: SyncFailure::Missing,
		} => {
			assert_eq!(variable, STOP_FLAG.name);
			assert_eq!(tag, STOP_FLAG.round_tag("0", 1));
		}
		error => panic!("unexpected error {:?}", error),
	}
	// The round is appended before its stop flag is awaited.
	assert_eq!(host.trees().len(), 2);
	assert_eq!(host.stage(), RunStage::RoundRunning { round: 1 });
}

#[test]
fn test_invalid_stop_flag() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(3, true),
		fake_guest("0", Value::from(1), &[Value::from("yes")]),
		&log,
		None,
	);
	assert!(matches!(
		host.fit(test_data().view()),
		Err(HostError::Sync {
			reason: SyncFailure::InvalidValue(_),
			..
		})
	));
}

#[test]
fn test_sync_tree_dim_before_binning() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(3, false),
		fake_guest("0", Value::from(2), &[]),
		&log,
		None,
	);
	assert!(matches!(host.sync_tree_dim(), Err(HostError::NotBinned)));
	assert_eq!(host.tree_dim(), None);
	assert_eq!(host.stage(), RunStage::Uninitialized);
	host.convert_feature_to_bin(test_data().view()).unwrap();
	assert_eq!(host.sync_tree_dim().unwrap(), 2);
	assert!(matches!(
		host.sync_tree_dim(),
		Err(HostError::TreeDimAlreadySynced)
	));
}

#[test]
fn test_invalid_tree_dim() {
	for tree_dim in vec![
		Value::from(0),
		Value::from(-1),
		Value::from(2.5),
		Value::from("two"),
	] {
		let log = Default::default();
		let mut host = fake_host(
			test_options(3, false),
			fake_guest("0", tree_dim, &[]),
			&log,
			None,
		);
		assert!(matches!(
			host.fit(test_data().view()),
			Err(HostError::Sync {
				reason: SyncFailure::InvalidValue(_),
				..
			})
		));
		assert!(log.borrow().fits.is_empty());
	}
}

#[test]
fn test_missing_tree_dim() {
	let log = Default::default();
	let channel =
		crate::transfer::LocalTransferChannel::with_timeout(std::time::Duration::from_millis(10));
	let mut host = fake_host(test_options(3, false), channel, &log, None);
	let error = host.fit(test_data().view()).unwrap_err();
	assert!(matches!(
		error,
		HostError::Sync {
			variable,
			reason: SyncFailure::Missing,
			..
		} if variable == TREE_DIM.name
	));
	assert_eq!(host.stage(), RunStage::Binned);
}

#[test]
fn test_binning_failure() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(3, false),
		fake_guest("0", Value::from(2), &[]),
		&log,
		None,
	);
	let empty: Array2<f32> = Array2::zeros((0, 4));
	assert!(matches!(
		host.fit(empty.view()),
		Err(HostError::Binning(_))
	));
	assert_eq!(host.stage(), RunStage::Uninitialized);
}

#[test]
fn test_tree_fit_failure() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(3, false),
		fake_guest("0", Value::from(2), &[]),
		&log,
		Some("0.1.0"),
	);
	let error = host.fit(test_data().view()).unwrap_err();
	assert_eq!(
		error.to_string(),
		"failed to fit tree 0 of round 1 with flow id 0.1.0"
	);
	assert_eq!(
		std::error::Error::source(&error).unwrap().to_string(),
		"split finding failed"
	);
	match error {
		HostError::TreeFit {
			round,
			tree_index,
			flow_id,
			..
		} => {
			assert_eq!((round, tree_index), (1, 0));
			assert_eq!(flow_id, FlowId::new("0", 1, 0));
		}
		error => panic!("unexpected error {:?}", error),
	}
	assert_eq!(host.trees().len(), 1);
}

#[test]
fn test_convert_twice() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(1, false),
		fake_guest("0", Value::from(1), &[]),
		&log,
		None,
	);
	host.convert_feature_to_bin(test_data().view()).unwrap();
	assert_eq!(host.stage(), RunStage::Binned);
	assert_eq!(host.binned_features().unwrap().feature_num(), 10);
	assert!(matches!(
		host.convert_feature_to_bin(test_data().view()),
		Err(HostError::AlreadyBinned)
	));
	assert!(matches!(
		host.fit(test_data().view()),
		Err(HostError::AlreadyBinned)
	));
}

#[test]
fn test_sample_valid_features() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(1, false),
		fake_guest("0", Value::from(1), &[]),
		&log,
		None,
	);
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
	assert!(matches!(
		host.sample_valid_features(&mut rng),
		Err(HostError::NotBinned)
	));
	host.convert_feature_to_bin(test_data().view()).unwrap();
	assert_eq!(host.feature_num(), None);
	let mask = host.sample_valid_features(&mut rng).unwrap();
	assert_eq!(host.feature_num(), Some(10));
	assert_eq!(mask.len(), 10);
	assert_eq!(mask.iter().filter(|valid| **valid).count(), 3);
}

#[test]
fn test_set_flowid() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(2, true),
		fake_guest("train_9", Value::from(1), &[Value::Bool(false), Value::Bool(false)]),
		&log,
		None,
	);
	assert_eq!(host.flowid(), "0");
	host.set_flowid("train_9");
	assert_eq!(host.generate_flowid(4, 2).to_string(), "train_9.4.2");
	host.fit(test_data().view()).unwrap();
	assert_eq!(fit_flow_ids(&log), vec!["train_9.0.0", "train_9.1.0"]);
}

#[test]
fn test_progress() {
	let log = Default::default();
	let mut host = fake_host(
		test_options(2, false),
		fake_guest("0", Value::from(1), &[]),
		&log,
		None,
	);
	let mut progress = Vec::new();
	host.fit_with_progress(test_data().view(), &mut |event| progress.push(event))
		.unwrap();
	assert_eq!(
		progress,
		vec![
			TrainProgress::Binning,
			TrainProgress::Training {
				round: 0,
				num_rounds: 2
			},
			TrainProgress::Training {
				round: 1,
				num_rounds: 2
			},
			TrainProgress::Stopped { rounds_trained: 2 },
		]
	);
}

#[test]
fn test_save_and_load() {
	let log = Default::default();
	let mut trained = fake_host(
		test_options(2, false),
		fake_guest("0", Value::from(2), &[]),
		&log,
		None,
	);
	trained.fit(test_data().view()).unwrap();
	let before = trained.predict(test_data().view()).unwrap();
	let mut store = crate::model::MemoryModelStore::new();
	trained.save_model(&mut store, "host_model").unwrap();

	let mut loaded = fake_host(
		BoostingOptions {
			task_type: TaskType::Regression,
			loss_type: LossType::LeastSquaredError,
			..test_options(1, false)
		},
		crate::transfer::LocalTransferChannel::with_timeout(std::time::Duration::from_millis(1)),
		&log,
		None,
	);
	loaded.load_model(&store, "host_model").unwrap();
	assert_eq!(loaded.trees(), trained.trees());
	assert_eq!(loaded.tree_dim(), Some(2));
	assert_eq!(loaded.loss_type(), LossType::CrossEntropy);
	assert_eq!(loaded.task_type(), TaskType::Classification);
	assert_eq!(loaded.stage(), RunStage::Done);
	let after = loaded.predict(test_data().view()).unwrap();
	assert_eq!(before, after);
	assert_eq!(
		after
			.iter()
			.map(|output| output.flow_id.to_string())
			.collect::<Vec<_>>(),
		vec!["0.0.0", "0.0.1", "0.1.0", "0.1.1"]
	);
	assert_eq!(after[3].output, "0.1.1@0.1.1:996");
	assert_eq!(
		log.borrow().predicts,
		vec!["0.0.0", "0.0.1", "0.1.0", "0.1.1", "0.0.0", "0.0.1", "0.1.0", "0.1.1"]
	);
}

#[test]
fn test_save_before_training() {
	let log = Default::default();
	let host = fake_host(
		test_options(1, false),
		fake_guest("0", Value::from(1), &[]),
		&log,
		None,
	);
	let mut store = crate::model::MemoryModelStore::new();
	assert!(matches!(
		host.save_model(&mut store, "host_model"),
		Err(HostError::NotTrained)
	));
	assert!(host.predict(test_data().view()).unwrap().is_empty());
}

#[test]
fn test_load_requires_exactly_one_record() {
	struct DuplicatingStore(Vec<u8>);
	impl ModelStore for DuplicatingStore {
		fn write(
			&mut self,
			_: &str,
			record: Vec<u8>,
		) -> Result<(), crate::model::ModelStoreError> {
			self.0 = record;
			Ok(())
		}
		fn read(&self, _: &str) -> Result<Vec<Vec<u8>>, crate::model::ModelStoreError> {
			Ok(vec![self.0.clone(), self.0.clone()])
		}
	}
	let log = Default::default();
	let mut host = fake_host(
		test_options(1, false),
		fake_guest("0", Value::from(1), &[]),
		&log,
		None,
	);
	host.fit(test_data().view()).unwrap();
	let mut store = DuplicatingStore(Vec::new());
	host.save_model(&mut store, "host_model").unwrap();
	assert!(matches!(
		host.load_model(&store, "host_model"),
		Err(HostError::ModelStore(
			crate::model::ModelStoreError::TooManyRecords { count: 2, .. }
		))
	));
	let empty = crate::model::MemoryModelStore::new();
	assert!(matches!(
		host.load_model(&empty, "host_model"),
		Err(HostError::ModelStore(
			crate::model::ModelStoreError::NoRecord(_)
		))
	));
	assert_eq!(host.trees().len(), 1);
}
