//! Connection lifecycle state machine.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ChannelConfig;
use crate::event::ChannelEvent;
use crate::transport::{Connection, Connector, EventSink};
use crate::{Error, Result};

/// Lifecycle state of the shared completion connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
	/// No usable connection; idle or waiting to retry.
	Disconnected,
	/// An open attempt is in flight.
	Connecting,
	/// The transport reported open.
	Connected,
}

/// Owns the transport handle and drives reconnects.
///
/// Each [`connect`](Self::connect) opens a new connection stamped with a fresh
/// generation; transport events carrying any other generation are stale and
/// must be ignored by the caller (see [`is_current`](Self::is_current)).
pub struct ConnectionMachine<C: Connector> {
	connector: C,
	conn: Option<C::Conn>,
	state: ConnectionState,
	generation: u64,
	attempts: u32,
	retry_at: Option<Instant>,
	config: ChannelConfig,
	events: mpsc::UnboundedSender<ChannelEvent>,
}

impl<C: Connector> std::fmt::Debug for ConnectionMachine<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionMachine")
			.field("state", &self.state)
			.field("generation", &self.generation)
			.field("attempts", &self.attempts)
			.field("retry_at", &self.retry_at)
			.finish_non_exhaustive()
	}
}

impl<C: Connector> ConnectionMachine<C> {
	pub(crate) fn new(connector: C, config: ChannelConfig, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
		Self {
			connector,
			conn: None,
			state: ConnectionState::Disconnected,
			generation: 0,
			attempts: 0,
			retry_at: None,
			config,
			events,
		}
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ConnectionState {
		self.state
	}

	/// Consecutive reconnect attempts since the last successful open.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	/// Generation of the most recently opened connection.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns true if `generation` belongs to the live connection.
	pub fn is_current(&self, generation: u64) -> bool {
		self.conn.is_some() && generation == self.generation
	}

	/// Ready to send: we believe we are connected and the transport agrees.
	pub fn is_ready(&self) -> bool {
		self.state == ConnectionState::Connected && self.conn.as_ref().is_some_and(Connection::is_open)
	}

	/// When a delayed reconnect is due, if one is scheduled.
	pub fn retry_deadline(&self) -> Option<Instant> {
		self.retry_at
	}

	/// Start opening a connection unless one is already open or opening.
	///
	/// Returns true if a new attempt started. A caller-initiated connect also
	/// pre-empts any scheduled delayed retry.
	pub fn connect(&mut self) -> bool {
		if self.state != ConnectionState::Disconnected {
			return false;
		}
		self.retry_at = None;
		if let Some(mut stale) = self.conn.take() {
			stale.close();
		}

		self.generation = self.generation.wrapping_add(1);
		self.state = ConnectionState::Connecting;
		tracing::debug!(generation = self.generation, attempt = self.attempts, "completion.connect");

		let sink = EventSink::new(self.generation, self.events.clone());
		self.conn = Some(self.connector.open(sink));
		true
	}

	/// The transport reported open: reset the retry budget.
	///
	/// Returns false if the machine was not waiting for this open.
	pub fn opened(&mut self) -> bool {
		if self.state != ConnectionState::Connecting {
			return false;
		}
		tracing::info!(generation = self.generation, after_attempts = self.attempts, "completion channel connected");
		self.state = ConnectionState::Connected;
		self.attempts = 0;
		true
	}

	/// First half of a disconnect: leave the connected/connecting state.
	///
	/// Returns false when already disconnected, in which case the whole
	/// disconnect is a no-op.
	pub fn begin_disconnect(&mut self) -> bool {
		if self.state == ConnectionState::Disconnected {
			return false;
		}
		self.state = ConnectionState::Disconnected;
		true
	}

	/// Second half of a disconnect: retry within budget or go idle.
	pub fn finish_disconnect(&mut self, should_retry: bool) {
		if should_retry && self.attempts < self.config.max_reconnect_attempts {
			self.attempts += 1;
			let delay = self.config.reconnect_delay_for(self.attempts);
			if delay.is_zero() {
				self.connect();
			} else {
				tracing::debug!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "completion.reconnect_scheduled");
				self.retry_at = Some(Instant::now() + delay);
			}
			return;
		}

		if should_retry {
			tracing::warn!(attempts = self.attempts, "completion reconnect budget exhausted; idling until next request");
		}
		if let Some(mut conn) = self.conn.take() {
			conn.close();
		}
		self.attempts = 0;
		self.retry_at = None;
	}

	/// Run a scheduled retry if one is pending.
	pub fn retry_due(&mut self) -> bool {
		if self.retry_at.take().is_none() {
			return false;
		}
		self.connect()
	}

	/// Hand a frame to the live connection.
	///
	/// # Errors
	///
	/// Returns [`Error::NotConnected`] without a connection, otherwise whatever
	/// the transport's send reports.
	pub fn send(&mut self, frame: String) -> Result<()> {
		match self.conn.as_mut() {
			Some(conn) => conn.send(frame),
			None => Err(Error::NotConnected),
		}
	}
}
