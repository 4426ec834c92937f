/*!
A trained host model is persisted as a single `ModelMeta` record. The record is a major version byte followed by the MessagePack encoding of the `ModelMeta`.
*/

use crate::{
	options::{LossType, TaskType},
	worker::TreeArtifact,
};
use std::{
	collections::HashMap,
	io::Write,
	path::{Path, PathBuf},
};
use thiserror::Error;

const MAJOR_VERSION: u8 = 0;
const FILE_EXTENSION: &str = "fbm";
const TMP_FILE_EXTENSION: &str = "fbm.tmp";

/// The trees of a model in round-major order. Rounds are only ever appended.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TreeEnsemble {
	rounds: Vec<Vec<TreeArtifact>>,
}

impl TreeEnsemble {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push_round(&mut self, trees: Vec<TreeArtifact>) {
		self.rounds.push(trees);
	}

	pub fn rounds(&self) -> &[Vec<TreeArtifact>] {
		&self.rounds
	}

	/// The number of rounds.
	pub fn len(&self) -> usize {
		self.rounds.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rounds.is_empty()
	}

	/// The total number of trees across all rounds.
	pub fn n_trees(&self) -> usize {
		self.rounds.iter().map(|round| round.len()).sum()
	}
}

impl From<Vec<Vec<TreeArtifact>>> for TreeEnsemble {
	fn from(rounds: Vec<Vec<TreeArtifact>>) -> Self {
		Self { rounds }
	}
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelMeta {
	pub trees: TreeEnsemble,
	pub loss_type: LossType,
	pub tree_dim: usize,
	pub task_type: TaskType,
}

#[derive(Debug, Error)]
pub enum ModelStoreError {
	#[error("io error at {path}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("no model record in namespace {0}")]
	NoRecord(String),
	#[error("expected one model record in namespace {namespace}, found {count}")]
	TooManyRecords { namespace: String, count: usize },
	#[error("malformed model record: {0}")]
	Malformed(String),
	#[error("failed to encode model record")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("failed to decode model record")]
	Decode(#[from] rmp_serde::decode::Error),
	#[error("invalid namespace {0:?}")]
	InvalidNamespace(String),
}

impl ModelMeta {
	/// Serialize this `ModelMeta` into a model record.
	pub fn to_record(&self) -> Result<Vec<u8>, ModelStoreError> {
		let mut record = vec![MAJOR_VERSION];
		rmp_serde::encode::write_named(&mut record, self)?;
		Ok(record)
	}

	/// Deserialize and validate a `ModelMeta` from a model record.
	pub fn from_record(record: &[u8]) -> Result<Self, ModelStoreError> {
		let (major_version, slice) = record
			.split_first()
			.ok_or_else(|| ModelStoreError::Malformed("empty record".to_owned()))?;
		if *major_version != MAJOR_VERSION {
			return Err(ModelStoreError::Malformed(format!(
				"unknown major version {}",
				major_version
			)));
		}
		let model_meta: Self = rmp_serde::from_slice(slice)?;
		model_meta.validate()?;
		Ok(model_meta)
	}

	fn validate(&self) -> Result<(), ModelStoreError> {
		if self.tree_dim == 0 {
			return Err(ModelStoreError::Malformed(
				"tree_dim must be positive".to_owned(),
			));
		}
		for (round, trees) in self.trees.rounds().iter().enumerate() {
			if trees.len() != self.tree_dim {
				return Err(ModelStoreError::Malformed(format!(
					"round {} has {} trees but tree_dim is {}",
					round,
					trees.len(),
					self.tree_dim
				)));
			}
		}
		Ok(())
	}
}

/// A `ModelStore` keeps model records under namespace keys.
pub trait ModelStore {
	/// Replace the records in `namespace` with `record`.
	fn write(&mut self, namespace: &str, record: Vec<u8>) -> Result<(), ModelStoreError>;
	/// Read every record in `namespace`. A namespace that was never written has no records.
	fn read(&self, namespace: &str) -> Result<Vec<Vec<u8>>, ModelStoreError>;
}

/// Write `model_meta` as the only record in `namespace`.
pub fn write_model_meta<S>(
	store: &mut S,
	namespace: &str,
	model_meta: &ModelMeta,
) -> Result<(), ModelStoreError>
where
	S: ModelStore + ?Sized,
{
	store.write(namespace, model_meta.to_record()?)
}

/// Read the `ModelMeta` in `namespace`, which must hold exactly one record.
pub fn read_model_meta<S>(store: &S, namespace: &str) -> Result<ModelMeta, ModelStoreError>
where
	S: ModelStore + ?Sized,
{
	let mut records = store.read(namespace)?;
	match records.len() {
		0 => Err(ModelStoreError::NoRecord(namespace.to_owned())),
		1 => ModelMeta::from_record(&records.remove(0)),
		count => Err(ModelStoreError::TooManyRecords {
			namespace: namespace.to_owned(),
			count,
		}),
	}
}

#[derive(Debug, Default)]
pub struct MemoryModelStore {
	records: HashMap<String, Vec<Vec<u8>>>,
}

impl MemoryModelStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl ModelStore for MemoryModelStore {
	fn write(&mut self, namespace: &str, record: Vec<u8>) -> Result<(), ModelStoreError> {
		self.records.insert(namespace.to_owned(), vec![record]);
		Ok(())
	}

	fn read(&self, namespace: &str) -> Result<Vec<Vec<u8>>, ModelStoreError> {
		Ok(self.records.get(namespace).cloned().unwrap_or_default())
	}
}

/// A `ModelStore` that keeps each namespace in its own file, `<root>/<namespace>.fbm`.
#[derive(Clone, Debug)]
pub struct FileModelStore {
	root: PathBuf,
}

impl FileModelStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path(&self, namespace: &str) -> Result<PathBuf, ModelStoreError> {
		if namespace.is_empty()
			|| namespace.contains('/')
			|| namespace.contains('\\')
			|| namespace.contains("..")
		{
			return Err(ModelStoreError::InvalidNamespace(namespace.to_owned()));
		}
		Ok(self
			.root
			.join(format!("{}.{}", namespace, FILE_EXTENSION)))
	}
}

impl ModelStore for FileModelStore {
	/// The record is written to a temporary file next to its final path and then renamed into place, so a reader never sees a partial record.
	fn write(&mut self, namespace: &str, record: Vec<u8>) -> Result<(), ModelStoreError> {
		let path = self.path(namespace)?;
		std::fs::create_dir_all(&self.root).map_err(|source| ModelStoreError::Io {
			path: self.root.clone(),
			source,
		})?;
		let tmp_path = path.with_extension(TMP_FILE_EXTENSION);
		let write_tmp = || -> std::io::Result<()> {
			let mut file = std::fs::File::create(&tmp_path)?;
			file.write_all(&record)?;
			file.sync_all()
		};
		if let Err(source) = write_tmp() {
			std::fs::remove_file(&tmp_path).ok();
			return Err(ModelStoreError::Io {
				path: tmp_path,
				source,
			});
		}
		std::fs::rename(&tmp_path, &path).map_err(|source| ModelStoreError::Io { path, source })
	}

	fn read(&self, namespace: &str) -> Result<Vec<Vec<u8>>, ModelStoreError> {
		let path = self.path(namespace)?;
		match std::fs::read(&path) {
			Ok(record) => Ok(vec![record]),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(source) => Err(ModelStoreError::Io { path, source }),
		}
	}
}

#[cfg(test)]
fn model_meta(n_rounds: usize, tree_dim: usize) -> ModelMeta {
	let trees = (0..n_rounds)
		.map(|round| {
			(0..tree_dim)
				.map(|tree_index| TreeArtifact::new(vec![round as u8, tree_index as u8, 0xff]))
				.collect()
		})
		.collect::<Vec<_>>();
	ModelMeta {
		trees: trees.into(),
		loss_type: LossType::CrossEntropy,
		tree_dim,
		task_type: TaskType::Classification,
	}
}

#[test]
fn test_record_round_trip() {
	let model_meta = model_meta(3, 2);
	let record = model_meta.to_record().unwrap();
	assert_eq!(record[0], MAJOR_VERSION);
	let loaded = ModelMeta::from_record(&record).unwrap();
	assert_eq!(loaded, model_meta);
	assert_eq!(loaded.trees.len(), 3);
	assert_eq!(loaded.trees.n_trees(), 6);
}

#[test]
fn test_malformed_records() {
	assert!(matches!(
		ModelMeta::from_record(&[]),
		Err(ModelStoreError::Malformed(_))
	));
	let mut record = model_meta(1, 1).to_record().unwrap();
	record[0] = 1;
	assert!(matches!(
		ModelMeta::from_record(&record),
		Err(ModelStoreError::Malformed(_))
	));
	assert!(matches!(
		ModelMeta::from_record(&[MAJOR_VERSION, 0xc1]),
		Err(ModelStoreError::Decode(_))
	));
	let mut ragged = model_meta(2, 2);
	ragged.trees = vec![
		vec![TreeArtifact::new(vec![1]), TreeArtifact::new(vec![2])],
		vec![TreeArtifact::new(vec![3])],
	]
	.into();
	let record = ragged.to_record().unwrap();
	assert!(matches!(
		ModelMeta::from_record(&record),
		Err(ModelStoreError::Malformed(_))
	));
	let mut zero_dim = model_meta(0, 1);
	zero_dim.tree_dim = 0;
	let record = zero_dim.to_record().unwrap();
	assert!(matches!(
		ModelMeta::from_record(&record),
		Err(ModelStoreError::Malformed(_))
	));
}

#[test]
fn test_memory_store() {
	let mut store = MemoryModelStore::new();
	assert!(matches!(
		read_model_meta(&store, "model"),
		Err(ModelStoreError::NoRecord(_))
	));
	write_model_meta(&mut store, "model", &model_meta(1, 3)).unwrap();
	write_model_meta(&mut store, "model", &model_meta(2, 3)).unwrap();
	assert_eq!(store.read("model").unwrap().len(), 1);
	assert_eq!(read_model_meta(&store, "model").unwrap(), model_meta(2, 3));
}

#[test]
fn test_file_store() {
	let dir = tempfile::tempdir().unwrap();
	let mut store = FileModelStore::new(dir.path().join("models"));
	assert!(store.read("host_model").unwrap().is_empty());
	write_model_meta(&mut store, "host_model", &model_meta(4, 1)).unwrap();
	assert!(dir.path().join("models").join("host_model.fbm").exists());
	let reopened = FileModelStore::new(store.root().to_owned());
	assert_eq!(
		read_model_meta(&reopened, "host_model").unwrap(),
		model_meta(4, 1)
	);
	assert!(matches!(
		store.write("../escape", vec![0]),
		Err(ModelStoreError::InvalidNamespace(_))
	));
	assert!(matches!(
		store.read(""),
		Err(ModelStoreError::InvalidNamespace(_))
	));
}

#[test]
fn test_file_store_replaces_records_whole() {
	let dir = tempfile::tempdir().unwrap();
	let mut store = FileModelStore::new(dir.path());
	write_model_meta(&mut store, "host_model", &model_meta(1, 2)).unwrap();
	// A temporary file left behind by an interrupted write is never read.
	std::fs::write(dir.path().join("host_model.fbm.tmp"), [0u8, 0xc1]).unwrap();
	assert_eq!(
		read_model_meta(&store, "host_model").unwrap(),
		model_meta(1, 2)
	);
	write_model_meta(&mut store, "host_model", &model_meta(3, 2)).unwrap();
	assert_eq!(
		read_model_meta(&store, "host_model").unwrap(),
		model_meta(3, 2)
	);
	let file_names: Vec<_> = std::fs::read_dir(dir.path())
		.unwrap()
		.map(|entry| entry.unwrap().file_name())
		.collect();
	assert_eq!(file_names, vec![std::ffi::OsString::from("host_model.fbm")]);
}

#[test]
fn test_record_stores_artifacts_as_bytes() {
	let mut model_meta = model_meta(2, 2);
	model_meta.trees = vec![vec![TreeArtifact::new(vec![0xff; 256]); 2]; 2].into();
	let record = model_meta.to_record().unwrap();
	assert!(record.len() < 4 * 256 + 128);
	assert_eq!(ModelMeta::from_record(&record).unwrap(), model_meta);
}
