//! Newline-delimited JSON over TCP.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::{CloseCode, Connection, Connector, EventSink, TransportEvent};
use crate::{Error, Result};

/// Default cap on one inbound line.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Connects to a completion server speaking one JSON frame per line.
#[derive(Debug, Clone)]
pub struct TcpConnector {
	addr: String,
	max_frame_len: usize,
}

impl TcpConnector {
	/// Create a connector for `host:port`.
	pub fn new(addr: impl Into<String>) -> Self {
		Self {
			addr: addr.into(),
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}

	/// Cap inbound lines at `max` bytes. A longer line fails the connection.
	pub fn with_max_frame_len(mut self, max: usize) -> Self {
		self.max_frame_len = max;
		self
	}

	/// Target address.
	pub fn addr(&self) -> &str {
		&self.addr
	}
}

/// One TCP connection owned by the channel.
///
/// The socket lives in a background I/O task; frames are handed to it through
/// an unbounded queue so [`Connection::send`] never blocks.
#[derive(Debug)]
pub struct TcpConnection {
	outbound: mpsc::UnboundedSender<String>,
	open: Arc<AtomicBool>,
	cancel: CancellationToken,
}

impl Connector for TcpConnector {
	type Conn = TcpConnection;

	fn open(&mut self, sink: EventSink) -> TcpConnection {
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let open = Arc::new(AtomicBool::new(false));
		let cancel = CancellationToken::new();

		tracing::debug!(addr = %self.addr, generation = sink.generation(), "opening completion connection");
		tokio::spawn(run_connection_io(
			self.addr.clone(),
			self.max_frame_len,
			sink,
			outbound_rx,
			Arc::clone(&open),
			cancel.clone(),
		));

		TcpConnection { outbound, open, cancel }
	}
}

impl Connection for TcpConnection {
	fn send(&mut self, frame: String) -> Result<()> {
		if !self.is_open() {
			return Err(Error::NotConnected);
		}
		self.outbound.send(frame).map_err(|_| Error::TransportClosed)
	}

	fn is_open(&self) -> bool {
		self.open.load(Ordering::Acquire) && !self.cancel.is_cancelled()
	}

	fn close(&mut self) {
		self.open.store(false, Ordering::Release);
		self.cancel.cancel();
	}
}

impl Drop for TcpConnection {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Runs the I/O loop for a single connection.
async fn run_connection_io(
	addr: String,
	max_frame_len: usize,
	sink: EventSink,
	mut outbound_rx: mpsc::UnboundedReceiver<String>,
	open: Arc<AtomicBool>,
	cancel: CancellationToken,
) {
	let stream = tokio::select! {
		_ = cancel.cancelled() => return,
		res = TcpStream::connect(&addr) => res,
	};
	let stream = match stream {
		Ok(stream) => stream,
		Err(e) => {
			tracing::warn!(addr = %addr, error = %e, "completion server unreachable");
			sink.emit(TransportEvent::Error(e.to_string()));
			return;
		}
	};
	if let Err(e) = stream.set_nodelay(true) {
		tracing::trace!(error = %e, "set_nodelay failed");
	}

	let (reader, mut writer) = stream.into_split();
	let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_frame_len));

	open.store(true, Ordering::Release);
	sink.emit(TransportEvent::Open);

	let outcome = loop {
		tokio::select! {
			_ = cancel.cancelled() => break None,

			Some(frame) = outbound_rx.recv() => {
				if let Err(e) = write_frame(&mut writer, &frame).await {
					tracing::warn!(addr = %addr, error = %e, "completion frame write failed");
					break Some(TransportEvent::Error(e.to_string()));
				}
			}

			line = lines.next() => match line {
				Some(Ok(line)) => {
					if !line.trim().is_empty() {
						sink.emit(TransportEvent::Message(line));
					}
				}
				None => {
					tracing::info!(addr = %addr, "completion server closed connection");
					break Some(TransportEvent::Closed(CloseCode::ABNORMAL));
				}
				Some(Err(e)) => {
					tracing::warn!(addr = %addr, error = %e, "error reading from completion server");
					break Some(TransportEvent::Error(e.to_string()));
				}
			},
		}
	};

	open.store(false, Ordering::Release);
	if let Some(event) = outcome {
		sink.emit(event);
	}
	let _ = writer.shutdown().await;
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &str) -> std::io::Result<()> {
	writer.write_all(frame.as_bytes()).await?;
	writer.write_all(b"\n").await?;
	writer.flush().await
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::io::{AsyncBufReadExt, BufReader};
	use tokio::net::TcpListener;

	use super::*;
	use crate::event::ChannelEvent;

	async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> TransportEvent {
		let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("timed out waiting for transport event")
			.expect("channel closed");
		match event {
			ChannelEvent::Transport { event, .. } => event,
			other => panic!("unexpected event {other:?}"),
		}
	}

	#[tokio::test]
	async fn frames_round_trip_over_lines() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let (reader, mut writer) = stream.into_split();
			let mut lines = BufReader::new(reader).lines();
			let line = lines.next_line().await.unwrap().unwrap();
			writer.write_all(format!("{line}-ack\n").as_bytes()).await.unwrap();
		});

		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut connector = TcpConnector::new(addr.to_string());
		let mut conn = connector.open(EventSink::new(1, tx));
		assert!(conn.send("early".into()).is_err());

		assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
		assert!(conn.is_open());
		conn.send("hello".into()).unwrap();
		assert_eq!(next_event(&mut rx).await, TransportEvent::Message("hello-ack".into()));

		server.await.unwrap();
		assert_eq!(next_event(&mut rx).await, TransportEvent::Closed(CloseCode::ABNORMAL));
		assert!(!conn.is_open());
	}

	#[tokio::test]
	async fn oversized_line_fails_connection() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			stream.write_all(b"{\"ok\":1}\n").await.unwrap();
			// Never terminated by a newline.
			stream.write_all(&vec![b'x'; 4096]).await.unwrap();
			stream
		});

		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut connector = TcpConnector::new(addr.to_string()).with_max_frame_len(1024);
		let conn = connector.open(EventSink::new(1, tx));

		assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
		assert_eq!(next_event(&mut rx).await, TransportEvent::Message(r#"{"ok":1}"#.into()));
		match next_event(&mut rx).await {
			TransportEvent::Error(reason) => assert!(reason.contains("max line length"), "{reason}"),
			other => panic!("expected error, got {other:?}"),
		}
		assert!(!conn.is_open());
		drop(server.await.unwrap());
	}

	#[tokio::test]
	async fn refused_connection_reports_error() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut connector = TcpConnector::new(addr.to_string());
		let conn = connector.open(EventSink::new(1, tx));

		assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
		assert!(!conn.is_open());
	}

	#[tokio::test]
	async fn close_is_silent() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let mut lines = BufReader::new(stream).lines();
			while let Ok(Some(_)) = lines.next_line().await {}
		});

		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut connector = TcpConnector::new(addr.to_string());
		let mut conn = connector.open(EventSink::new(1, tx));
		assert_eq!(next_event(&mut rx).await, TransportEvent::Open);

		conn.close();
		assert!(!conn.is_open());
		assert!(matches!(conn.send("late".into()), Err(Error::NotConnected)));

		server.await.unwrap();
		let next = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
		assert!(!matches!(next, Ok(Some(_))), "closed connection emitted {next:?}");
	}
}
