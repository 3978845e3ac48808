//! Wire types for the completion channel.
//!
//! Frames are JSON objects, one per transport message:
//!
//! * outgoing: `{ "requestId": "7", "completionRequest": { "files": [...] }, "line": 0, "ch": 5 }`
//! * incoming: `{ "requestId": "7", "completions": [...] }` or
//!   `{ "requestId": "7", "message": "..." }`

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::Result;

/// Correlation identifier for one completion query.
///
/// Written on the wire as a decimal string; numeric ids are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl RequestId {
	/// Interpret a JSON value as a request id.
	fn from_json(value: &Value) -> Option<Self> {
		match value {
			Value::Number(n) => n.as_u64().map(Self),
			Value::String(s) => s.trim().parse().ok().map(Self),
			_ => None,
		}
	}
}

impl Serialize for RequestId {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.collect_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for RequestId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		Self::from_json(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid request id: {value}")))
	}
}

/// One source file of the project being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
	/// File name, e.g. `File.kt`.
	pub name: String,
	/// Full file contents.
	pub text: String,
}

impl File {
	/// Create a file.
	pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			text: text.into(),
		}
	}
}

/// The files a completion query is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
	/// Project files, forwarded verbatim to the server.
	pub files: Vec<File>,
}

impl Project {
	/// Create a project from its files.
	pub fn new(files: Vec<File>) -> Self {
		Self { files }
	}
}

/// A single completion suggestion.
///
/// Only `text` is required by the editor; the remaining fields are whatever
/// the server chose to send and are kept for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
	/// Text inserted on accept.
	#[serde(default)]
	pub text: String,
	/// Label shown in the completion list.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub display_text: Option<String>,
	/// Trailing detail, usually the type.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tail: Option<String>,
	/// Import to add on accept.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub import: Option<String>,
	/// Icon hint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<String>,
	/// Whether other candidate imports exist.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub has_other_imports: Option<bool>,
	/// Fields this client does not interpret.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Completion {
	/// A completion carrying only its insert text.
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			..Self::default()
		}
	}
}

/// Body of an outgoing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
	/// Project files.
	pub files: Vec<File>,
}

/// One completion query as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
	/// Correlation id.
	pub request_id: RequestId,
	/// Files to complete against.
	pub completion_request: CompletionRequest,
	/// Zero-based cursor line.
	pub line: u32,
	/// Zero-based cursor column.
	pub ch: u32,
}

impl OutgoingMessage {
	/// Build the frame for a query.
	pub fn new(request_id: RequestId, project: Project, line: u32, ch: u32) -> Self {
		Self {
			request_id,
			completion_request: CompletionRequest { files: project.files },
			line,
			ch,
		}
	}

	/// Serialize to a single JSON frame.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Json`] if serialization fails.
	pub fn encode(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}

/// A recognized inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
	/// The server answered a query.
	Completions {
		/// Correlation id.
		id: RequestId,
		/// Suggestions, possibly empty.
		completions: Vec<Completion>,
	},
	/// The server reported a failure for a query.
	Failure {
		/// Correlation id.
		id: RequestId,
		/// Server-provided error text.
		message: String,
	},
}

impl Inbound {
	/// The correlation id of the frame.
	pub fn id(&self) -> RequestId {
		match self {
			Self::Completions { id, .. } | Self::Failure { id, .. } => *id,
		}
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
	#[serde(default)]
	request_id: Option<Value>,
	#[serde(default)]
	completions: Option<Value>,
	#[serde(default)]
	message: Option<Value>,
}

/// Classify an inbound frame.
///
/// Returns `Ok(None)` for well-formed JSON that is not a recognizable answer:
/// no usable `requestId`, or neither `completions` nor an error `message`.
/// A `completions` value that does not decode is reported as a failure of
/// that request.
///
/// # Errors
///
/// Returns [`crate::Error::Json`] when the frame is not a JSON object.
pub fn parse_inbound(raw: &str) -> Result<Option<Inbound>> {
	let frame: RawInbound = serde_json::from_str(raw)?;
	let Some(id) = frame.request_id.as_ref().and_then(RequestId::from_json) else {
		return Ok(None);
	};

	if let Some(completions) = frame.completions.filter(|v| !v.is_null()) {
		return Ok(Some(match serde_json::from_value(completions) {
			Ok(completions) => Inbound::Completions { id, completions },
			Err(err) => Inbound::Failure {
				id,
				message: format!("undecodable completions: {err}"),
			},
		}));
	}

	let message = match frame.message {
		Some(Value::String(text)) => text,
		Some(Value::Null) | None => return Ok(None),
		Some(other) => other.to_string(),
	};
	Ok(Some(Inbound::Failure { id, message }))
}
