use crate::{
	binning::BinningError, flow_id::FlowId, model::ModelStoreError, transfer::TransferError,
	worker::TreeWorkerError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
	#[error("failed to bin features")]
	Binning(#[from] BinningError),
	#[error("failed to sync {variable} with tag {tag}: {reason}")]
	Sync {
		variable: &'static str,
		tag: String,
		reason: SyncFailure,
	},
	#[error("failed to fit tree {tree_index} of round {round} with flow id {flow_id}")]
	TreeFit {
		round: usize,
		tree_index: usize,
		flow_id: FlowId,
		#[source]
		source: TreeWorkerError,
	},
	#[error("failed to predict with tree {tree_index} of round {round} with flow id {flow_id}")]
	TreePredict {
		round: usize,
		tree_index: usize,
		flow_id: FlowId,
		#[source]
		source: TreeWorkerError,
	},
	#[error("model store failure")]
	ModelStore(#[from] ModelStoreError),
	#[error("features must be binned before this step")]
	NotBinned,
	#[error("features were already binned for this run")]
	AlreadyBinned,
	#[error("the tree dimension was already synced for this run")]
	TreeDimAlreadySynced,
	#[error("there is no trained model")]
	NotTrained,
}

/// The reason a cross party sync failed.
#[derive(Debug, Error)]
pub enum SyncFailure {
	#[error("no value was received")]
	Missing,
	#[error("received invalid value {0}")]
	InvalidValue(serde_json::Value),
	#[error("{0}")]
	Transport(TransferError),
}
