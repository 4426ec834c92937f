/*!
Flow identifiers scope every cross-party message and every tree worker's state to exactly one tree. The host and the guest compute them independently, so a flow identifier must be a pure function of the run's flowid, the round index, and the tree's index within the round.
*/

/// A `FlowId` identifies one tree fit or tree predict. It displays as `{flowid}.{round}.{tree_index}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowId {
	flowid: String,
	round: usize,
	tree_index: usize,
}

impl FlowId {
	pub fn new(flowid: &str, round: usize, tree_index: usize) -> Self {
		Self {
			flowid: flowid.to_owned(),
			round,
			tree_index,
		}
	}

	/// The run level flowid this identifier was derived from.
	pub fn flowid(&self) -> &str {
		&self.flowid
	}

	pub fn round(&self) -> usize {
		self.round
	}

	pub fn tree_index(&self) -> usize {
		self.tree_index
	}
}

impl std::fmt::Display for FlowId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}.{}", self.flowid, self.round, self.tree_index)
	}
}

#[test]
fn test_format() {
	assert_eq!(FlowId::new("0", 0, 0).to_string(), "0.0.0");
	assert_eq!(FlowId::new("0", 2, 1).to_string(), "0.2.1");
	assert_eq!(FlowId::new("train_42", 17, 3).to_string(), "train_42.17.3");
}

#[test]
fn test_pure() {
	let a = FlowId::new("7", 3, 1);
	let b = FlowId::new("7", 3, 1);
	assert_eq!(a, b);
	assert_eq!(a.to_string(), b.to_string());
}

#[test]
fn test_injective() {
	let mut seen = std::collections::HashSet::new();
	for round in 0..50 {
		for tree_index in 0..12 {
			assert!(seen.insert(FlowId::new("0", round, tree_index).to_string()));
		}
	}
	assert_eq!(seen.len(), 50 * 12);
}
