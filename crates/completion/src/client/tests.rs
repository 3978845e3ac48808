use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use super::*;
use crate::config::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use crate::connection::ConnectionState;
use crate::protocol::{File, OutgoingMessage, RequestId};
use crate::testing::MockConnector;
use crate::transport::{CloseCode, TcpConnector};

type Results = Arc<Mutex<Vec<(u32, Vec<Completion>)>>>;

fn project() -> Project {
	Project::new(vec![File::new("main.kt", "fun main() { pri }")])
}

fn spawn_mock(config: ChannelConfig) -> (CompletionClient, MockConnector) {
	let connector = MockConnector::new();
	(CompletionClient::spawn(connector.clone(), config), connector)
}

fn request(client: &CompletionClient, results: &Results, tag: u32) {
	let results = Arc::clone(results);
	client.request_completion(project(), 0, 16, move |completions| results.lock().push((tag, completions)));
}

/// Round-trips through the actor, so every earlier event has been handled.
async fn settle(client: &CompletionClient) -> ChannelStatus {
	client.status().await.expect("channel actor stopped")
}

fn reply(id: RequestId, texts: &[&str]) -> String {
	let completions: Vec<_> = texts.iter().map(|text| serde_json::json!({ "text": text })).collect();
	serde_json::json!({ "requestId": id.to_string(), "completions": completions }).to_string()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn complete_round_trip() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let pending = tokio::spawn({
		let client = client.clone();
		async move { client.complete(project(), 0, 16).await }
	});

	let status = settle(&client).await;
	assert_eq!(status.state, ConnectionState::Connecting);
	let link = connector.latest().unwrap();
	link.accept();
	settle(&client).await;

	let sent = link.sent_messages();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0], OutgoingMessage::new(sent[0].request_id, project(), 0, 16));

	link.reply(reply(sent[0].request_id, &["println", "print"]));
	let completions = pending.await.unwrap();
	assert_eq!(completions, vec![Completion::text("println"), Completion::text("print")]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unanswered_request_times_out_on_schedule() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let results = Results::default();
	request(&client, &results, 1);
	settle(&client).await;
	connector.latest().unwrap().accept();
	settle(&client).await;

	tokio::time::advance(Duration::from_millis(9_999)).await;
	settle(&client).await;
	assert!(results.lock().is_empty());

	tokio::time::advance(Duration::from_millis(2)).await;
	let status = settle(&client).await;
	assert_eq!(*results.lock(), vec![(1, Vec::new())]);
	assert_eq!(status.pending, 0);
	assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn custom_timeout_is_honoured() {
	let (client, _connector) = spawn_mock(ChannelConfig::default().timeout(Duration::from_millis(250)));
	let results = Results::default();
	request(&client, &results, 1);
	settle(&client).await;

	tokio::time::advance(Duration::from_millis(249)).await;
	settle(&client).await;
	assert!(results.lock().is_empty());

	tokio::time::advance(Duration::from_millis(2)).await;
	settle(&client).await;
	assert_eq!(*results.lock(), vec![(1, Vec::new())]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn offline_burst_sends_only_latest() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let results = Results::default();
	request(&client, &results, 1);
	request(&client, &results, 2);
	let status = settle(&client).await;
	assert_eq!(connector.open_count(), 1);
	assert_eq!(status.pending, 2);

	let link = connector.latest().unwrap();
	link.accept();
	settle(&client).await;
	let sent = link.sent_messages();
	assert_eq!(sent.len(), 1);
	assert_eq!(Some(sent[0].request_id), status.queued);

	link.reply(reply(sent[0].request_id, &["b"]));
	settle(&client).await;
	assert_eq!(*results.lock(), vec![(2, vec![Completion::text("b")])]);

	// The superseded request still resolves, through its timer.
	tokio::time::advance(Duration::from_secs(11)).await;
	settle(&client).await;
	assert_eq!(*results.lock(), vec![(2, vec![Completion::text("b")]), (1, Vec::new())]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn abnormal_close_releases_in_flight_requests() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let results = Results::default();
	request(&client, &results, 1);
	settle(&client).await;
	let link = connector.latest().unwrap();
	link.accept();
	request(&client, &results, 2);
	settle(&client).await;
	assert_eq!(link.sent().len(), 2);

	link.close(CloseCode::ABNORMAL);
	let status = settle(&client).await;

	let mut got = results.lock().clone();
	got.sort_by_key(|(tag, _)| *tag);
	assert_eq!(got, vec![(1, Vec::new()), (2, Vec::new())]);
	assert_eq!(status.reconnect_attempts, 1);
	assert_eq!(status.state, ConnectionState::Connecting);
	assert_eq!(connector.open_count(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reconnects_are_bounded_until_next_request() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let results = Results::default();
	request(&client, &results, 1);
	settle(&client).await;

	for _ in 0..=DEFAULT_MAX_RECONNECT_ATTEMPTS {
		connector.latest().unwrap().fail("connection refused");
		settle(&client).await;
	}
	let opens = 1 + DEFAULT_MAX_RECONNECT_ATTEMPTS as usize;
	assert_eq!(connector.open_count(), opens);

	tokio::time::advance(Duration::from_secs(30)).await;
	let status = settle(&client).await;
	assert_eq!(connector.open_count(), opens);
	assert_eq!(status.state, ConnectionState::Disconnected);
	assert_eq!(status.reconnect_attempts, 0);
	assert_eq!(*results.lock(), vec![(1, Vec::new())]);

	request(&client, &results, 2);
	settle(&client).await;
	assert_eq!(connector.open_count(), opens + 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn open_resets_reconnect_budget() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let results = Results::default();
	request(&client, &results, 1);
	settle(&client).await;
	// Only the first failure belongs to the live connection; the rest are stale.
	for _ in 0..3 {
		connector.latest().unwrap().fail("refused");
	}
	assert_eq!(settle(&client).await.reconnect_attempts, 1);

	connector.latest().unwrap().fail("refused");
	connector.latest().unwrap().fail("refused");
	assert_eq!(settle(&client).await.reconnect_attempts, 2);

	connector.latest().unwrap().accept();
	assert_eq!(settle(&client).await.reconnect_attempts, 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn close_then_request_reconnects() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let results = Results::default();
	request(&client, &results, 1);
	settle(&client).await;
	let link = connector.latest().unwrap();
	link.accept();
	settle(&client).await;

	client.close();
	let status = settle(&client).await;
	assert_eq!(*results.lock(), vec![(1, Vec::new())]);
	assert_eq!(status.state, ConnectionState::Disconnected);
	assert!(link.closed_by_client());

	request(&client, &results, 2);
	settle(&client).await;
	assert_eq!(connector.open_count(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_last_handle_releases_callers() {
	let (client, connector) = spawn_mock(ChannelConfig::default());
	let other = client.clone();
	let (tx, rx) = tokio::sync::oneshot::channel();
	client.request_completion(project(), 0, 0, move |completions| {
		let _ = tx.send(completions);
	});
	settle(&client).await;
	let link = connector.latest().unwrap();
	link.accept();
	settle(&client).await;

	drop(client);
	assert_eq!(settle(&other).await.pending, 1);

	drop(other);
	assert_eq!(rx.await.unwrap(), Vec::<Completion>::new());
	assert!(link.closed_by_client());
}

#[tokio::test]
async fn tcp_end_to_end() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let (reader, mut writer) = stream.into_split();
		let mut lines = BufReader::new(reader).lines();
		while let Some(line) = lines.next_line().await.unwrap() {
			let query: OutgoingMessage = serde_json::from_str(&line).unwrap();
			let file = &query.completion_request.files[0];
			let answer = format!("{}@{}:{}", file.name, query.line, query.ch);
			let mut frame = reply(query.request_id, &[answer.as_str()]);
			frame.push('\n');
			writer.write_all(frame.as_bytes()).await.unwrap();
		}
	});

	let client = CompletionClient::spawn(TcpConnector::new(addr.to_string()), ChannelConfig::default());
	let first = client.complete(project(), 0, 16).await;
	assert_eq!(first, vec![Completion::text("main.kt@0:16")]);
	let second = client.complete(project(), 3, 1).await;
	assert_eq!(second, vec![Completion::text("main.kt@3:1")]);

	drop(client);
	tokio::time::timeout(Duration::from_secs(5), server)
		.await
		.expect("server did not see the connection close")
		.unwrap();
}

#[tokio::test]
async fn unreachable_server_answers_empty() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);

	let client = CompletionClient::spawn(TcpConnector::new(addr.to_string()), ChannelConfig::default());
	let completions = tokio::time::timeout(Duration::from_secs(5), client.complete(project(), 0, 0))
		.await
		.expect("request was not released");
	assert!(completions.is_empty());
}
