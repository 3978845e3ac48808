//! Transport boundary of the completion channel.
//!
//! The channel never touches sockets directly. A [`Connector`] opens a
//! [`Connection`] and reports its lifecycle (open, inbound frames, errors,
//! close) as [`TransportEvent`]s through the [`EventSink`] it was handed.
//! Events are queued on the same ordered queue as caller requests, so the
//! channel observes one total order of everything that happens.

mod tcp;

use tokio::sync::mpsc;

pub use self::tcp::{DEFAULT_MAX_FRAME_LEN, TcpConnection, TcpConnector};
use crate::Result;
use crate::event::ChannelEvent;

/// Close code reported with [`TransportEvent::Closed`].
///
/// Uses the WebSocket numbering: only [`CloseCode::NORMAL`] marks an
/// intentional shutdown, everything else is abnormal and triggers a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
	/// Intentional, expected closure.
	pub const NORMAL: Self = Self(1000);
	/// The peer is going away (server restart, page navigation).
	pub const GOING_AWAY: Self = Self(1001);
	/// The connection dropped without a close handshake.
	pub const ABNORMAL: Self = Self(1006);

	/// Returns true for the intentional-shutdown code.
	pub fn is_normal(self) -> bool {
		self == Self::NORMAL
	}
}

impl std::fmt::Display for CloseCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Lifecycle event of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// The connection is established and ready to send.
	Open,
	/// One inbound frame.
	Message(String),
	/// The connection failed.
	Error(String),
	/// The connection closed.
	Closed(CloseCode),
}

/// Delivery handle for [`TransportEvent`]s of a single connection.
///
/// Each sink is stamped with the generation of the connection it belongs to;
/// events from a connection the channel already discarded are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
	generation: u64,
	tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl EventSink {
	pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<ChannelEvent>) -> Self {
		Self { generation, tx }
	}

	/// Generation of the connection this sink reports for.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Report an event. Returns `false` once the channel is gone.
	pub fn emit(&self, event: TransportEvent) -> bool {
		tracing::trace!(generation = self.generation, ?event, "transport.event");
		self.tx
			.send(ChannelEvent::Transport {
				generation: self.generation,
				event,
			})
			.is_ok()
	}

	/// Returns true once the channel stopped listening.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// An established (or establishing) connection.
pub trait Connection: Send + 'static {
	/// Send one frame. May fail synchronously when the channel is not usable.
	///
	/// # Errors
	///
	/// Returns an error when the frame cannot be handed to the transport.
	fn send(&mut self, frame: String) -> Result<()>;

	/// The transport's own readiness flag.
	fn is_open(&self) -> bool;

	/// Close the connection. Idempotent; emits no further events.
	fn close(&mut self);
}

/// Factory for connections.
pub trait Connector: Send + 'static {
	/// Connection type produced by this connector.
	type Conn: Connection;

	/// Start opening a connection and return immediately.
	///
	/// The outcome is reported through `sink`: [`TransportEvent::Open`] on
	/// success, [`TransportEvent::Error`] or [`TransportEvent::Closed`]
	/// otherwise.
	fn open(&mut self, sink: EventSink) -> Self::Conn;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_normal_code_is_normal() {
		assert!(CloseCode::NORMAL.is_normal());
		assert!(!CloseCode::GOING_AWAY.is_normal());
		assert!(!CloseCode::ABNORMAL.is_normal());
		assert!(!CloseCode(4000).is_normal());
	}

	#[test]
	fn sink_stamps_generation() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let sink = EventSink::new(4, tx);
		assert!(sink.emit(TransportEvent::Open));

		let Ok(ChannelEvent::Transport { generation, event }) = rx.try_recv() else {
			panic!("expected transport event");
		};
		assert_eq!(generation, 4);
		assert_eq!(event, TransportEvent::Open);

		drop(rx);
		assert!(sink.is_closed());
		assert!(!sink.emit(TransportEvent::Closed(CloseCode::NORMAL)));
	}
}
