//! Channel configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Per-request deadline before a caller receives an empty result.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling on consecutive automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 5_000;

/// Longest timer the channel arms: one day. Request timeouts and reconnect
/// delays above this are rejected by [`ChannelConfig::validate`] and clamped
/// everywhere else.
pub const MAX_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_TIMER_MS: u64 = MAX_TIMER.as_millis() as u64;

/// Configuration for a completion channel.
///
/// Every key is optional in TOML form; missing keys take their defaults.
///
/// ```toml
/// completion_timeout_ms = 10000
/// max_reconnect_attempts = 5
/// reconnect_delay_ms = 0
/// max_reconnect_delay_ms = 5000
/// resolve_superseded = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
	/// Per-request deadline in milliseconds.
	pub completion_timeout_ms: u64,
	/// Consecutive reconnect attempts before the channel goes idle.
	pub max_reconnect_attempts: u32,
	/// Delay before the first automatic reconnect; doubles per attempt.
	/// Zero reconnects immediately.
	pub reconnect_delay_ms: u64,
	/// Upper bound on the reconnect delay.
	pub max_reconnect_delay_ms: u64,
	/// Resolve a queued request with an empty list as soon as a newer request
	/// replaces it, instead of letting its timer run out.
	pub resolve_superseded: bool,
}

impl Default for ChannelConfig {
	fn default() -> Self {
		Self {
			completion_timeout_ms: DEFAULT_COMPLETION_TIMEOUT.as_millis() as u64,
			max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
			reconnect_delay_ms: 0,
			max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
			resolve_superseded: false,
		}
	}
}

impl ChannelConfig {
	/// Parse a configuration from TOML text.
	///
	/// # Errors
	///
	/// Returns [`Error::ConfigParse`] for malformed TOML or unknown keys and
	/// [`Error::Config`] for values the channel cannot run with.
	pub fn from_toml_str(text: &str) -> Result<Self> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Load a configuration file.
	///
	/// # Errors
	///
	/// Returns [`Error::Io`] when the file cannot be read, otherwise the same
	/// errors as [`Self::from_toml_str`].
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path)?;
		tracing::debug!(path = %path.display(), "loading channel config");
		Self::from_toml_str(&text)
	}

	/// Check that the values describe a usable channel.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] describing the first offending key.
	pub fn validate(&self) -> Result<()> {
		if self.completion_timeout_ms == 0 {
			return Err(Error::Config("completion_timeout_ms must be greater than zero".into()));
		}
		if self.completion_timeout_ms > MAX_TIMER_MS {
			return Err(Error::Config(format!(
				"completion_timeout_ms ({}) exceeds the {MAX_TIMER_MS} ms limit",
				self.completion_timeout_ms
			)));
		}
		if self.max_reconnect_delay_ms > MAX_TIMER_MS {
			return Err(Error::Config(format!(
				"max_reconnect_delay_ms ({}) exceeds the {MAX_TIMER_MS} ms limit",
				self.max_reconnect_delay_ms
			)));
		}
		if self.reconnect_delay_ms > self.max_reconnect_delay_ms {
			return Err(Error::Config(format!(
				"reconnect_delay_ms ({}) exceeds max_reconnect_delay_ms ({})",
				self.reconnect_delay_ms, self.max_reconnect_delay_ms
			)));
		}
		Ok(())
	}

	/// Set the per-request timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.completion_timeout_ms = saturating_millis(timeout);
		self
	}

	/// Set the reconnect attempt ceiling.
	pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
		self.max_reconnect_attempts = attempts;
		self
	}

	/// Set the initial and maximum reconnect delays.
	pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
		self.reconnect_delay_ms = saturating_millis(initial);
		self.max_reconnect_delay_ms = saturating_millis(max);
		self
	}

	/// Resolve superseded queued requests immediately.
	pub fn resolve_superseded(mut self, enabled: bool) -> Self {
		self.resolve_superseded = enabled;
		self
	}

	/// The per-request timeout as a [`Duration`], at most [`MAX_TIMER`].
	pub fn completion_timeout(&self) -> Duration {
		Duration::from_millis(self.completion_timeout_ms.min(MAX_TIMER_MS))
	}

	/// Delay before reconnect attempt number `attempt` (1-based), at most
	/// [`MAX_TIMER`].
	pub fn reconnect_delay_for(&self, attempt: u32) -> Duration {
		if self.reconnect_delay_ms == 0 {
			return Duration::ZERO;
		}
		let shift = attempt.saturating_sub(1).min(16);
		let delay = self.reconnect_delay_ms.saturating_mul(1_u64 << shift);
		Duration::from_millis(delay.min(self.max_reconnect_delay_ms).min(MAX_TIMER_MS))
	}
}

fn saturating_millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
