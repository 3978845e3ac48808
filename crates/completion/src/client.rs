//! Cloneable handle to the channel actor.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::config::ChannelConfig;
use crate::dispatcher::{ChannelStatus, Dispatcher};
use crate::event::ChannelEvent;
use crate::protocol::{Completion, Project};
use crate::transport::Connector;

/// Handle for issuing completion queries over one shared connection.
///
/// Clones share the same channel. When the last clone is dropped the actor
/// closes the transport and releases any caller still waiting.
#[derive(Clone)]
pub struct CompletionClient {
	inner: Arc<ClientInner>,
}

struct ClientInner {
	inbox: mpsc::UnboundedSender<ChannelEvent>,
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		let _ = self.inbox.send(ChannelEvent::Shutdown);
	}
}

impl std::fmt::Debug for CompletionClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CompletionClient")
			.field("running", &!self.inner.inbox.is_closed())
			.finish()
	}
}

impl CompletionClient {
	/// Start the channel actor on the current tokio runtime.
	///
	/// Nothing connects until the first request.
	pub fn spawn<C: Connector>(connector: C, config: ChannelConfig) -> Self {
		let (inbox, rx) = mpsc::unbounded_channel();
		let dispatcher = Dispatcher::new(connector, config, inbox.clone());
		tokio::spawn(run_channel(dispatcher, rx).instrument(tracing::info_span!("completion_channel")));
		Self {
			inner: Arc::new(ClientInner { inbox }),
		}
	}

	/// Ask for completions at `line`/`ch` (0-based) in the project's first file.
	///
	/// `callback` runs exactly once on the channel task, with an empty list on
	/// timeout, server error or disconnect. It must not block.
	pub fn request_completion(
		&self,
		project: Project,
		line: u32,
		ch: u32,
		callback: impl FnOnce(Vec<Completion>) + Send + 'static,
	) {
		let event = ChannelEvent::Request {
			project,
			line,
			ch,
			callback: Box::new(callback),
		};
		if let Err(mpsc::error::SendError(event)) = self.inner.inbox.send(event) {
			tracing::debug!("completion channel is gone; answering empty");
			if let ChannelEvent::Request { callback, .. } = event {
				callback(Vec::new());
			}
		}
	}

	/// Awaitable form of [`request_completion`](Self::request_completion).
	pub async fn complete(&self, project: Project, line: u32, ch: u32) -> Vec<Completion> {
		let (tx, rx) = oneshot::channel();
		self.request_completion(project, line, ch, move |completions| {
			let _ = tx.send(completions);
		});
		rx.await.unwrap_or_default()
	}

	/// Close the connection normally. Pending requests resolve empty; the next
	/// request reconnects.
	pub fn close(&self) {
		let _ = self.inner.inbox.send(ChannelEvent::Close);
	}

	/// Snapshot of the channel, or `None` once the actor has stopped.
	pub async fn status(&self) -> Option<ChannelStatus> {
		let (tx, rx) = oneshot::channel();
		self.inner.inbox.send(ChannelEvent::Status(tx)).ok()?;
		rx.await.ok()
	}
}

async fn run_channel<C: Connector>(mut dispatcher: Dispatcher<C>, mut inbox: mpsc::UnboundedReceiver<ChannelEvent>) {
	tracing::debug!("completion channel started");
	loop {
		let retry_at = dispatcher.retry_deadline();
		let has_pending = dispatcher.has_pending();

		tokio::select! {
			biased;
			Some(id) = dispatcher.next_expired(), if has_pending => {
				tracing::debug!(request_id = %id, "completion.timeout");
			}
			_ = tokio::time::sleep_until(retry_at.unwrap_or_else(tokio::time::Instant::now)), if retry_at.is_some() => {
				dispatcher.retry_due();
			}
			event = inbox.recv() => match event {
				None | Some(ChannelEvent::Shutdown) => break,
				Some(event) => dispatcher.handle(event),
			},
		}
	}
	dispatcher.shutdown();
	tracing::debug!("completion channel stopped");
}
