//! Scripted in-memory transport for tests.
//!
//! [`MockConnector`] records every connection the channel opens. Tests drive
//! each one through its [`MockLink`]: accept it, push inbound frames, fail
//! it, close it, and inspect what the channel sent.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::OutgoingMessage;
use crate::transport::{CloseCode, Connection, Connector, EventSink, TransportEvent};
use crate::{Error, Result};

#[derive(Debug)]
struct LinkState {
	sink: EventSink,
	open: bool,
	closed_by_client: bool,
	fail_sends: bool,
	sent: Vec<String>,
}

/// Test-side view of one opened connection.
#[derive(Debug, Clone)]
pub struct MockLink {
	state: Arc<Mutex<LinkState>>,
}

impl MockLink {
	/// Generation the channel stamped on this connection.
	pub fn generation(&self) -> u64 {
		self.state.lock().sink.generation()
	}

	/// Set the transport's readiness flag without emitting anything.
	pub fn mark_open(&self, open: bool) {
		self.state.lock().open = open;
	}

	/// Complete the open handshake.
	pub fn accept(&self) {
		self.mark_open(true);
		self.emit(TransportEvent::Open);
	}

	/// Deliver one inbound frame.
	pub fn reply(&self, frame: impl Into<String>) {
		self.emit(TransportEvent::Message(frame.into()));
	}

	/// Report a transport error.
	pub fn fail(&self, reason: impl Into<String>) {
		self.mark_open(false);
		self.emit(TransportEvent::Error(reason.into()));
	}

	/// Report a close with `code`.
	pub fn close(&self, code: CloseCode) {
		self.mark_open(false);
		self.emit(TransportEvent::Closed(code));
	}

	/// Make subsequent sends fail synchronously.
	pub fn set_fail_sends(&self, fail: bool) {
		self.state.lock().fail_sends = fail;
	}

	/// Raw frames the channel sent.
	pub fn sent(&self) -> Vec<String> {
		self.state.lock().sent.clone()
	}

	/// Sent frames decoded as completion queries.
	///
	/// # Panics
	///
	/// Panics if a sent frame is not a valid query.
	pub fn sent_messages(&self) -> Vec<OutgoingMessage> {
		self.sent()
			.iter()
			.map(|frame| serde_json::from_str(frame).expect("channel sent an invalid frame"))
			.collect()
	}

	/// Whether the channel closed this connection itself.
	pub fn closed_by_client(&self) -> bool {
		self.state.lock().closed_by_client
	}

	fn emit(&self, event: TransportEvent) {
		let sink = self.state.lock().sink.clone();
		sink.emit(event);
	}
}

/// Connection handed to the channel.
#[derive(Debug)]
pub struct MockConnection {
	state: Arc<Mutex<LinkState>>,
}

impl Connection for MockConnection {
	fn send(&mut self, frame: String) -> Result<()> {
		let mut state = self.state.lock();
		if !state.open || state.closed_by_client {
			return Err(Error::NotConnected);
		}
		if state.fail_sends {
			return Err(Error::TransportClosed);
		}
		state.sent.push(frame);
		Ok(())
	}

	fn is_open(&self) -> bool {
		let state = self.state.lock();
		state.open && !state.closed_by_client
	}

	fn close(&mut self) {
		let mut state = self.state.lock();
		state.open = false;
		state.closed_by_client = true;
	}
}

/// Connector that records every open and never touches the network.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
	links: Arc<Mutex<Vec<MockLink>>>,
}

impl MockConnector {
	/// Creates a connector with no recorded connections.
	pub fn new() -> Self {
		Self::default()
	}

	/// How many connections the channel opened.
	pub fn open_count(&self) -> usize {
		self.links.lock().len()
	}

	/// The `index`-th opened connection.
	pub fn link(&self, index: usize) -> Option<MockLink> {
		self.links.lock().get(index).cloned()
	}

	/// The most recently opened connection.
	pub fn latest(&self) -> Option<MockLink> {
		self.links.lock().last().cloned()
	}
}

impl Connector for MockConnector {
	type Conn = MockConnection;

	fn open(&mut self, sink: EventSink) -> MockConnection {
		let state = Arc::new(Mutex::new(LinkState {
			sink,
			open: false,
			closed_by_client: false,
			fail_sends: false,
			sent: Vec::new(),
		}));
		self.links.lock().push(MockLink {
			state: Arc::clone(&state),
		});
		MockConnection { state }
	}
}
