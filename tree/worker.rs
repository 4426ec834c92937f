/*!
The decision tree itself is fit by a tree worker. The host creates a fresh worker for every tree it fits or replays, and never looks inside the artifact a worker returns.
*/

use crate::{binning::BinnedFeatures, flow_id::FlowId, options::TreeOptions};
use ndarray::prelude::*;

pub type TreeWorkerError = Box<dyn std::error::Error + Send + Sync>;

/// An opaque tree model produced by a `TreeWorker`. It serializes as a byte string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeArtifact(Vec<u8>);

impl TreeArtifact {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl serde::Serialize for TreeArtifact {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_bytes(&self.0)
	}
}

struct TreeArtifactVisitor;

impl<'de> serde::de::Visitor<'de> for TreeArtifactVisitor {
	type Value = TreeArtifact;
	fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
		formatter.write_str("a byte string")
	}
	fn visit_bytes<E>(self, value: &[u8]) -> Result<Self::Value, E>
	where
		E: serde::de::Error,
	{
		Ok(TreeArtifact(value.to_owned()))
	}
	fn visit_byte_buf<E>(self, value: Vec<u8>) -> Result<Self::Value, E>
	where
		E: serde::de::Error,
	{
		Ok(TreeArtifact(value))
	}
	// Formats without a byte string type write a sequence of integers.
	fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
	where
		A: serde::de::SeqAccess<'de>,
	{
		let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
		while let Some(byte) = seq.next_element()? {
			bytes.push(byte);
		}
		Ok(TreeArtifact(bytes))
	}
}

impl<'de> serde::Deserialize<'de> for TreeArtifact {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		deserializer.deserialize_byte_buf(TreeArtifactVisitor)
	}
}

/// Everything a worker needs to fit one tree.
#[derive(Debug)]
pub struct FitRequest<'a> {
	pub binned_features: &'a BinnedFeatures,
	pub flow_id: &'a FlowId,
	/// Only the features set in this mask may be used for splits.
	pub valid_features: &'a [bool],
}

/// Everything a worker needs to replay one stored tree.
#[derive(Debug)]
pub struct PredictRequest<'a> {
	pub model: &'a TreeArtifact,
	/// The flow id the tree was fit under.
	pub flow_id: &'a FlowId,
	pub data: ArrayView2<'a, f32>,
}

pub trait TreeWorker {
	type Output;
	fn fit(&mut self, request: FitRequest<'_>) -> Result<TreeArtifact, TreeWorkerError>;
	fn predict(&mut self, request: PredictRequest<'_>) -> Result<Self::Output, TreeWorkerError>;
}

/// A `TreeWorkerFactory` creates the worker for a single tree. Any `Fn(&TreeOptions) -> W` is a factory.
pub trait TreeWorkerFactory {
	type Worker: TreeWorker;
	fn create(&self, options: &TreeOptions) -> Self::Worker;
}

impl<F, W> TreeWorkerFactory for F
where
	F: Fn(&TreeOptions) -> W,
	W: TreeWorker,
{
	type Worker = W;
	fn create(&self, options: &TreeOptions) -> W {
		self(options)
	}
}

#[test]
fn test_artifact_encodes_as_bytes() {
	let artifact = TreeArtifact::new(vec![0xff; 100]);
	let encoded = rmp_serde::to_vec(&artifact).unwrap();
	// bin 8 marker, length, then the raw bytes
	assert_eq!(encoded.len(), 102);
	assert_eq!(&encoded[..2], &[0xc4, 100]);
	let decoded: TreeArtifact = rmp_serde::from_slice(&encoded).unwrap();
	assert_eq!(decoded, artifact);
}

#[test]
fn test_artifact_json() {
	let artifact = TreeArtifact::new(vec![0, 1, 255]);
	let json = serde_json::to_string(&artifact).unwrap();
	assert_eq!(json, "[0,1,255]");
	let decoded: TreeArtifact = serde_json::from_str(&json).unwrap();
	assert_eq!(decoded, artifact);
}
