//! Events delivered to the channel actor.

use tokio::sync::oneshot;

use crate::dispatcher::ChannelStatus;
use crate::protocol::Project;
use crate::registry::CompletionCallback;
use crate::transport::TransportEvent;

/// Everything the actor reacts to, except timers, arrives through one ordered
/// queue of these.
pub(crate) enum ChannelEvent {
	/// A caller asks for completions.
	Request {
		project: Project,
		line: u32,
		ch: u32,
		callback: CompletionCallback,
	},
	/// Explicit normal close of the transport.
	Close,
	/// Diagnostics snapshot.
	Status(oneshot::Sender<ChannelStatus>),
	/// The last client handle was dropped.
	Shutdown,
	/// A transport lifecycle event, tagged with the connection generation
	/// that produced it.
	Transport { generation: u64, event: TransportEvent },
}

impl std::fmt::Debug for ChannelEvent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Request { line, ch, project, .. } => f
				.debug_struct("Request")
				.field("files", &project.files.len())
				.field("line", line)
				.field("ch", ch)
				.finish_non_exhaustive(),
			Self::Close => f.write_str("Close"),
			Self::Status(_) => f.write_str("Status"),
			Self::Shutdown => f.write_str("Shutdown"),
			Self::Transport { generation, event } => f
				.debug_struct("Transport")
				.field("generation", generation)
				.field("event", event)
				.finish(),
		}
	}
}
