/*!
The host and the guest exchange control signals over a named, tagged transfer channel. A transfer variable gives each kind of signal a fixed name, and its tag scopes one instance of the signal to a run, and for signals that recur every round, to a round.
*/

use serde_json::Value;
use std::{
	collections::{HashMap, VecDeque},
	sync::{Arc, Condvar, Mutex},
	time::{Duration, Instant},
};
use thiserror::Error;

/// The guest's index among the parties a host receives from.
pub const GUEST_INDEX: usize = 0;

#[derive(Debug, Error)]
pub enum TransferError {
	#[error("transfer channel lock poisoned")]
	Poisoned,
	#[error("transport failure")]
	Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A `TransferChannel` receives values published by another party. `receive` blocks until the value named `name` with tag `tag` arrives from `source_index`. It returns `Ok(None)` if the channel gives up without a value.
pub trait TransferChannel {
	fn receive(
		&self,
		name: &str,
		tag: &str,
		source_index: usize,
	) -> Result<Option<Value>, TransferError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferVariable {
	pub name: &'static str,
}

/// The guest publishes the number of trees per round once per run.
pub const TREE_DIM: TransferVariable = TransferVariable {
	name: "HeteroSecureBoostingTreeTransferVariable.tree_dim",
};

/// The guest publishes whether training should stop after every round when early stopping is enabled.
pub const STOP_FLAG: TransferVariable = TransferVariable {
	name: "HeteroSecureBoostingTreeTransferVariable.stop_flag",
};

impl TransferVariable {
	/// The tag for a signal sent once per run.
	pub fn tag(&self, flowid: &str) -> String {
		format!("{}.{}", self.name, flowid)
	}

	/// The tag for a signal sent once per round.
	pub fn round_tag(&self, flowid: &str, round: usize) -> String {
		format!("{}.{}.{}", self.name, flowid, round)
	}
}

type MessageKey = (String, String, usize);

#[derive(Default)]
struct LocalTransferChannelState {
	messages: Mutex<HashMap<MessageKey, VecDeque<Value>>>,
	ready: Condvar,
}

/// An in process `TransferChannel`. Clones share the same queues, so one clone can play the guest on another thread while the host receives on the other. Without a timeout, `receive` waits forever.
#[derive(Clone, Default)]
pub struct LocalTransferChannel {
	state: Arc<LocalTransferChannelState>,
	timeout: Option<Duration>,
}

impl LocalTransferChannel {
	pub fn new() -> Self {
		Self::default()
	}

	/// Give up on a `receive` after `timeout` and return `Ok(None)`.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self {
			state: Arc::default(),
			timeout: Some(timeout),
		}
	}

	/// Publish `value` as if it were sent by the party at `source_index`.
	pub fn send(
		&self,
		name: &str,
		tag: &str,
		source_index: usize,
		value: Value,
	) -> Result<(), TransferError> {
		let mut messages = self
			.state
			.messages
			.lock()
			.map_err(|_| TransferError::Poisoned)?;
		messages
			.entry((name.to_owned(), tag.to_owned(), source_index))
			.or_default()
			.push_back(value);
		self.state.ready.notify_all();
		Ok(())
	}
}

impl TransferChannel for LocalTransferChannel {
	fn receive(
		&self,
		name: &str,
		tag: &str,
		source_index: usize,
	) -> Result<Option<Value>, TransferError> {
		let key = (name.to_owned(), tag.to_owned(), source_index);
		let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
		let mut messages = self
			.state
			.messages
			.lock()
			.map_err(|_| TransferError::Poisoned)?;
		loop {
			if let Some(value) = messages.get_mut(&key).and_then(|queue| queue.pop_front()) {
				return Ok(Some(value));
			}
			messages = match deadline {
				None => self
					.state
					.ready
					.wait(messages)
					.map_err(|_| TransferError::Poisoned)?,
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						return Ok(None);
					}
					let (messages, _) = self
						.state
						.ready
						.wait_timeout(messages, deadline - now)
						.map_err(|_| TransferError::Poisoned)?;
					messages
				}
			};
		}
	}
}

#[test]
fn test_tags() {
	assert_eq!(
		TREE_DIM.tag("0"),
		"HeteroSecureBoostingTreeTransferVariable.tree_dim.0"
	);
	assert_eq!(
		STOP_FLAG.round_tag("0", 3),
		"HeteroSecureBoostingTreeTransferVariable.stop_flag.0.3"
	);
	assert_ne!(STOP_FLAG.round_tag("0", 1), STOP_FLAG.round_tag("0", 11));
}

#[test]
fn test_send_then_receive() {
	let channel = LocalTransferChannel::with_timeout(Duration::from_millis(10));
	channel
		.send("a", "t.0", GUEST_INDEX, Value::from(1))
		.unwrap();
	channel
		.send("a", "t.0", GUEST_INDEX, Value::from(2))
		.unwrap();
	channel
		.send("a", "t.1", GUEST_INDEX, Value::from(3))
		.unwrap();
	assert_eq!(
		channel.receive("a", "t.1", GUEST_INDEX).unwrap(),
		Some(Value::from(3))
	);
	assert_eq!(
		channel.receive("a", "t.0", GUEST_INDEX).unwrap(),
		Some(Value::from(1))
	);
	assert_eq!(
		channel.receive("a", "t.0", GUEST_INDEX).unwrap(),
		Some(Value::from(2))
	);
	assert_eq!(channel.receive("a", "t.0", GUEST_INDEX).unwrap(), None);
	assert_eq!(channel.receive("a", "t.1", 1).unwrap(), None);
}

#[test]
fn test_receive_blocks_until_sent() {
	let channel = LocalTransferChannel::new();
	let guest = channel.clone();
	let handle = std::thread::spawn(move || {
		std::thread::sleep(Duration::from_millis(20));
		guest
			.send("stop_flag", "t.0", GUEST_INDEX, Value::Bool(true))
			.unwrap();
	});
	assert_eq!(
		channel.receive("stop_flag", "t.0", GUEST_INDEX).unwrap(),
		Some(Value::Bool(true))
	);
	handle.join().unwrap();
}
