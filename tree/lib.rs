/*!
This crate implements the host party of hetero secure boosting, a federated gradient boosted decision tree where the features of each example are split between a guest, who also holds the labels, and one or more hosts.

The host does not compute gradients and never sees a label. It bins its features, follows the guest's lead on how many trees to fit per round and when to stop, and delegates each tree to a `TreeWorker`. See `HeteroBoostingHost` for the round loop.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod binning;
mod error;
mod flow_id;
mod host;
mod model;
mod options;
mod sampling;
mod transfer;
mod worker;

pub use binning::{BinnedFeatures, BinningError, FeatureBinner, QuantileBinner};
pub use error::{HostError, SyncFailure};
pub use flow_id::FlowId;
pub use host::{
	HeteroBoostingHost, RunStage, RunState, TrainProgress, TrainSummary, TreeOutput,
};
pub use model::{
	read_model_meta, write_model_meta, FileModelStore, MemoryModelStore, ModelMeta, ModelStore,
	ModelStoreError, TreeEnsemble,
};
pub use options::{
	BinningConfig, BinningOptions, BoostingOptions, Config, ConfigError, LossType, QuantileMethod,
	TaskType, TreeOptions, TreeOptionsConfig,
};
pub use sampling::{n_valid_features, sample_valid_features};
pub use transfer::{
	LocalTransferChannel, TransferChannel, TransferError, TransferVariable, GUEST_INDEX, STOP_FLAG,
	TREE_DIM,
};
pub use worker::{
	FitRequest, PredictRequest, TreeArtifact, TreeWorker, TreeWorkerError, TreeWorkerFactory,
};
