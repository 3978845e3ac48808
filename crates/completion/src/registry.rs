//! Pending-request registry.
//!
//! Maps each outstanding request id to its caller's callback and expiry
//! timer. Whichever path removes an entry first (response, timeout or
//! [`PendingRegistry::fail_all`]) invokes the callback and cancels the timer;
//! every later path finds nothing and does nothing.

use std::collections::HashMap;
use std::future::poll_fn;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::time::{DelayQueue, delay_queue};

use crate::protocol::{Completion, RequestId};

/// Caller continuation for one completion query.
pub type CompletionCallback = Box<dyn FnOnce(Vec<Completion>) + Send + 'static>;

struct PendingRequest {
	callback: CompletionCallback,
	expiry: delay_queue::Key,
}

/// Outstanding completion queries keyed by request id.
pub struct PendingRegistry {
	next_id: u64,
	entries: HashMap<RequestId, PendingRequest>,
	expiries: DelayQueue<RequestId>,
}

impl std::fmt::Debug for PendingRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingRegistry")
			.field("next_id", &self.next_id)
			.field("pending", &self.entries.len())
			.finish_non_exhaustive()
	}
}

impl Default for PendingRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl PendingRegistry {
	/// Creates an empty registry. Ids start at 1.
	pub fn new() -> Self {
		Self {
			next_id: 1,
			entries: HashMap::new(),
			expiries: DelayQueue::new(),
		}
	}

	/// Register a callback that resolves empty after `timeout` unless answered
	/// first. Returns the fresh id to put on the wire.
	///
	/// Must be called within a tokio runtime.
	pub fn register(&mut self, callback: CompletionCallback, timeout: Duration) -> RequestId {
		let id = self.allocate_id();
		let expiry = self.expiries.insert(id, timeout);
		self.entries.insert(id, PendingRequest { callback, expiry });
		tracing::trace!(request_id = %id, timeout_ms = timeout.as_millis() as u64, pending = self.entries.len(), "completion.register");
		id
	}

	fn allocate_id(&mut self) -> RequestId {
		loop {
			let id = RequestId(self.next_id);
			self.next_id = self.next_id.wrapping_add(1);
			if !self.entries.contains_key(&id) {
				return id;
			}
		}
	}

	/// Deliver `completions` to the caller of `id`.
	///
	/// Returns `false` for late or unknown ids, which are ignored.
	pub fn resolve(&mut self, id: RequestId, completions: Vec<Completion>) -> bool {
		let Some(entry) = self.entries.remove(&id) else {
			return false;
		};
		// The timer may already have fired in this same tick.
		let _ = self.expiries.try_remove(&entry.expiry);
		(entry.callback)(completions);
		true
	}

	/// Resolve every outstanding request with an empty list and clear all
	/// timers. Returns how many callers were released.
	pub fn fail_all(&mut self) -> usize {
		self.expiries.clear();
		let count = self.entries.len();
		for (_, entry) in self.entries.drain() {
			(entry.callback)(Vec::new());
		}
		count
	}

	/// Returns true if `id` is still waiting for an answer.
	pub fn contains(&self, id: RequestId) -> bool {
		self.entries.contains_key(&id)
	}

	/// Number of outstanding requests.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns true when no request is outstanding.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Poll for the next expired request, resolving it empty.
	///
	/// Returns `Poll::Ready(None)` when no timer is armed.
	pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<RequestId>> {
		loop {
			let Some(expired) = std::task::ready!(self.expiries.poll_expired(cx)) else {
				return Poll::Ready(None);
			};
			let id = expired.into_inner();
			if let Some(entry) = self.entries.remove(&id) {
				(entry.callback)(Vec::new());
				return Poll::Ready(Some(id));
			}
		}
	}

	/// Wait for the next expired request, resolving it empty.
	pub async fn next_expired(&mut self) -> Option<RequestId> {
		poll_fn(|cx| self.poll_expired(cx)).await
	}
}
