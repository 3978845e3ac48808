//! Request dispatch and inbound correlation.


use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ChannelConfig;
use crate::connection::{ConnectionMachine, ConnectionState};
use crate::event::ChannelEvent;
use crate::protocol::{Completion, Inbound, OutgoingMessage, Project, RequestId, parse_inbound};
use crate::registry::PendingRegistry;
use crate::retry_slot::{Flush, RetrySlot};
use crate::transport::{Connector, TransportEvent};

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
	/// Connection lifecycle state.
	pub state: ConnectionState,
	/// Outstanding requests.
	pub pending: usize,
	/// Request waiting in the retry slot.
	pub queued: Option<RequestId>,
	/// Consecutive reconnect attempts.
	pub reconnect_attempts: u32,
	/// Whether a delayed reconnect is scheduled.
	pub retry_scheduled: bool,
}

/// The channel's state and the rules that move it.
///
/// Purely synchronous: every method runs to completion and any waiting is
/// expressed as registered timers or transport events that arrive later.
#[derive(Debug)]
pub struct Dispatcher<C: Connector> {
	config: ChannelConfig,
	registry: PendingRegistry,
	connection: ConnectionMachine<C>,
	retry: RetrySlot,
}

impl<C: Connector> Dispatcher<C> {
	pub(crate) fn new(connector: C, config: ChannelConfig, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
		Self {
			registry: PendingRegistry::new(),
			connection: ConnectionMachine::new(connector, config.clone(), events),
			retry: RetrySlot::new(),
			config,
		}
	}

	/// Issue a completion query. The callback runs exactly once.
	pub fn request_completion(
		&mut self,
		project: Project,
		line: u32,
		ch: u32,
		callback: impl FnOnce(Vec<Completion>) + Send + 'static,
	) -> RequestId {
		let id = self.registry.register(Box::new(callback), self.config.completion_timeout());
		let message = OutgoingMessage::new(id, project, line, ch);

		if self.connection.is_ready() {
			match send_message(&mut self.connection, &message) {
				Ok(()) => {
					self.retry.clear_if_matches(id);
					tracing::trace!(request_id = %id, "completion.sent");
				}
				Err(err) => {
					tracing::warn!(request_id = %id, error = %err, "completion send failed; requeueing");
					self.enqueue(message);
					self.disconnect(true);
				}
			}
		} else {
			self.enqueue(message);
			self.connection.connect();
		}
		id
	}

	fn enqueue(&mut self, message: OutgoingMessage) {
		let Some(superseded) = self.retry.enqueue(message) else {
			return;
		};
		tracing::debug!(request_id = %superseded.request_id, "completion.superseded");
		if self.config.resolve_superseded {
			self.registry.resolve(superseded.request_id, Vec::new());
		}
	}

	/// Send the retry slot's request, if any. A failed send counts as a
	/// broken connection.
	fn flush(&mut self) {
		let connection = &mut self.connection;
		match self.retry.flush(|message| send_message(connection, message)) {
			Flush::Empty => {}
			Flush::Sent(id) => tracing::debug!(request_id = %id, "completion.flushed"),
			Flush::Failed(err) => {
				tracing::warn!(error = %err, "flushing queued completion failed");
				self.disconnect(true);
			}
		}
	}

	/// Tear down the connection state and release every pending caller,
	/// then retry within budget or go idle. No-op when already disconnected.
	pub fn disconnect(&mut self, should_retry: bool) {
		if !self.connection.begin_disconnect() {
			return;
		}
		let released = self.registry.fail_all();
		tracing::info!(should_retry, released, "completion channel disconnected");
		self.connection.finish_disconnect(should_retry);
	}

	/// Apply one transport event. Events from discarded connections are dropped.
	pub fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
		if !self.connection.is_current(generation) {
			tracing::trace!(generation, current = self.connection.generation(), ?event, "completion.stale_event");
			return;
		}
		match event {
			TransportEvent::Open => {
				if self.connection.opened() {
					self.flush();
				}
			}
			TransportEvent::Message(raw) => self.on_message(&raw),
			TransportEvent::Error(reason) => {
				tracing::warn!(generation, %reason, "completion transport error");
				self.disconnect(true);
			}
			TransportEvent::Closed(code) => {
				tracing::debug!(generation, %code, "completion transport closed");
				self.disconnect(!code.is_normal());
			}
		}
	}

	/// Correlate one inbound frame with its pending request.
	pub fn on_message(&mut self, raw: &str) {
		let inbound = match parse_inbound(raw) {
			Ok(Some(inbound)) => inbound,
			Ok(None) => {
				tracing::debug!(len = raw.len(), "ignoring unrecognized completion frame");
				return;
			}
			Err(err) => {
				tracing::debug!(error = %err, "dropping undecodable completion frame");
				return;
			}
		};

		match inbound {
			Inbound::Completions { id, completions } => {
				let count = completions.len();
				if self.registry.resolve(id, completions) {
					tracing::trace!(request_id = %id, count, "completion.resolved");
				} else {
					tracing::trace!(request_id = %id, "completion.late_response");
				}
			}
			Inbound::Failure { id, message } => {
				tracing::warn!(request_id = %id, %message, "completion server reported an error");
				self.registry.resolve(id, Vec::new());
			}
		}
	}

	/// Explicit normal close. The next request reconnects.
	pub fn close(&mut self) {
		if self.connection.begin_disconnect() {
			self.registry.fail_all();
		}
		self.connection.finish_disconnect(false);
	}

	/// Final teardown: close and release everything still waiting.
	pub fn shutdown(&mut self) {
		self.close();
		self.retry.clear();
		self.registry.fail_all();
	}

	/// Route an actor event.
	pub(crate) fn handle(&mut self, event: ChannelEvent) {
		match event {
			ChannelEvent::Request {
				project,
				line,
				ch,
				callback,
			} => {
				self.request_completion(project, line, ch, callback);
			}
			ChannelEvent::Close => self.close(),
			ChannelEvent::Status(reply) => {
				let _ = reply.send(self.status());
			}
			ChannelEvent::Shutdown => self.shutdown(),
			ChannelEvent::Transport { generation, event } => self.on_transport_event(generation, event),
		}
	}

	/// Snapshot for diagnostics.
	pub fn status(&self) -> ChannelStatus {
		ChannelStatus {
			state: self.connection.state(),
			pending: self.registry.len(),
			queued: self.retry.queued_id(),
			reconnect_attempts: self.connection.attempts(),
			retry_scheduled: self.connection.retry_deadline().is_some(),
		}
	}

	/// Returns true while any request awaits an answer.
	pub fn has_pending(&self) -> bool {
		!self.registry.is_empty()
	}

	/// Wait for the next request timeout, resolving it empty.
	pub async fn next_expired(&mut self) -> Option<RequestId> {
		self.registry.next_expired().await
	}

	/// When a delayed reconnect is due.
	pub fn retry_deadline(&self) -> Option<Instant> {
		self.connection.retry_deadline()
	}

	/// Fire a due delayed reconnect.
	pub fn retry_due(&mut self) {
		self.connection.retry_due();
	}
}

fn send_message<C: Connector>(connection: &mut ConnectionMachine<C>, message: &OutgoingMessage) -> crate::Result<()> {
	let frame = message.encode()?;
	connection.send(frame)
}
