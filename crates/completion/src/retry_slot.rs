//! Single-slot queue for a request that could not be sent yet.
//!
//! Only the most recent unsent request is kept. Requests issued in a burst
//! while offline collapse into the last one; the earlier ones keep their
//! registry entries and resolve through their own timers.

use crate::Error;
use crate::protocol::{OutgoingMessage, RequestId};

/// Outcome of [`RetrySlot::flush`].
#[derive(Debug)]
pub enum Flush {
	/// Nothing was queued.
	Empty,
	/// The queued request was sent and the slot cleared.
	Sent(RequestId),
	/// Sending failed; the request stays queued.
	Failed(Error),
}

/// Holds at most one not-yet-sent request.
#[derive(Debug, Default)]
pub struct RetrySlot {
	queued: Option<OutgoingMessage>,
}

impl RetrySlot {
	/// Creates an empty slot.
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue `message`, returning the request it superseded, if any.
	pub fn enqueue(&mut self, message: OutgoingMessage) -> Option<OutgoingMessage> {
		self.queued.replace(message)
	}

	/// Try to send the queued request through `send`.
	pub fn flush(&mut self, send: impl FnOnce(&OutgoingMessage) -> crate::Result<()>) -> Flush {
		let Some(message) = self.queued.as_ref() else {
			return Flush::Empty;
		};
		let id = message.request_id;
		match send(message) {
			Ok(()) => {
				self.queued = None;
				Flush::Sent(id)
			}
			Err(err) => Flush::Failed(err),
		}
	}

	/// Drop the queued request if it is `id`. Returns true if it was.
	pub fn clear_if_matches(&mut self, id: RequestId) -> bool {
		if self.queued_id() == Some(id) {
			self.queued = None;
			return true;
		}
		false
	}

	/// Id of the queued request.
	pub fn queued_id(&self) -> Option<RequestId> {
		self.queued.as_ref().map(|message| message.request_id)
	}

	/// Returns true when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.queued.is_none()
	}

	/// Drop whatever is queued.
	pub fn clear(&mut self) -> Option<OutgoingMessage> {
		self.queued.take()
	}
}
