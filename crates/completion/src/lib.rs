//! Resilient completion-request channel for the playground editor.
//!
//! The editor asks for completions through a [`CompletionClient`]. Each query
//! travels over one long-lived, unreliable connection to the completion
//! server and is answered through a callback, always exactly once:
//!
//! * with the server's completions when a matching response arrives,
//! * with an empty list when the request times out, the server reports an
//!   error, or the connection drops while the request is outstanding.
//!
//! # Architecture
//!
//! The channel is a small actor. A single task owns every piece of mutable
//! state and reacts, one event at a time, to caller requests, transport
//! events and timer expirations:
//!
//! * [`PendingRegistry`]: request id → callback + expiry timer.
//! * [`ConnectionMachine`]: `Disconnected → Connecting → Connected` with a
//!   bounded reconnect counter.
//! * [`RetrySlot`]: the single most recent request that could not be sent yet.
//! * [`Dispatcher`]: ties the three together and handles inbound frames.
//!
//! The transport itself sits behind the [`Connector`] / [`Connection`] traits.
//! [`TcpConnector`] speaks newline-delimited JSON over TCP.
//!
//! # Example
//!
//! ```ignore
//! use kplay_completion::{ChannelConfig, CompletionClient, File, Project, TcpConnector};
//!
//! let client = CompletionClient::spawn(TcpConnector::new("127.0.0.1:8080"), ChannelConfig::default());
//! let project = Project::new(vec![File::new("a.kt", "fun f(){}")]);
//! client.request_completion(project, 0, 5, |completions| {
//!     for completion in completions {
//!         println!("{}", completion.text);
//!     }
//! });
//! ```
//!
//! ## Cargo features
//!
//! - `test-util`: the scripted in-memory transport in [`testing`].
//!   *Disabled by default.*
#![warn(missing_docs)]

mod client;
mod config;
mod connection;
mod dispatcher;
mod event;
mod protocol;
mod registry;
mod retry_slot;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::CompletionClient;
pub use config::{ChannelConfig, DEFAULT_COMPLETION_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS, MAX_TIMER};
pub use connection::{ConnectionMachine, ConnectionState};
pub use dispatcher::{ChannelStatus, Dispatcher};
pub use protocol::{Completion, CompletionRequest, File, Inbound, OutgoingMessage, Project, RequestId, parse_inbound};
pub use registry::{CompletionCallback, PendingRegistry};
pub use retry_slot::{Flush, RetrySlot};
pub use transport::{CloseCode, Connection, Connector, EventSink, TcpConnector, TransportEvent};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// None of these reach the caller of a completion request; they describe
/// failures at the transport boundary and while loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The transport has no open channel to send on.
	#[error("transport is not open")]
	NotConnected,
	/// The transport's I/O task is gone.
	#[error("transport closed")]
	TransportClosed,
	/// A frame could not be encoded or decoded.
	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
	/// Input/output errors from the underlying channel or config files.
	#[error("{0}")]
	Io(#[from] std::io::Error),
	/// The configuration file is not valid TOML for [`ChannelConfig`].
	#[error("invalid config: {0}")]
	ConfigParse(#[from] toml::de::Error),
	/// The configuration parsed but holds an unusable value.
	#[error("invalid config: {0}")]
	Config(String),
}
