use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
pub use aws_smithy_types::event_stream::Message;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::llm::AIError;
use crate::llm::types::bedrock::{ConverseErrorResponse, ConverseStreamOutput};

/// Error type for EventStream decoding.
///
/// Wraps AWS Smithy's eventstream errors and satisfies the `tokio_util::codec::Decoder`
/// requirement of implementing `From<io::Error>`.
#[derive(Debug)]
pub enum EventStreamError {
	/// AWS EventStream protocol error (CRC mismatch, invalid headers, etc.)
	Protocol(aws_smithy_eventstream::error::Error),
	/// I/O error while reading the body
	Io(std::io::Error),
}

impl std::fmt::Display for EventStreamError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Protocol(e) => write!(f, "event stream framing: {e}"),
			Self::Io(e) => write!(f, "event stream read: {e}"),
		}
	}
}

impl std::error::Error for EventStreamError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Protocol(e) => Some(e),
			Self::Io(e) => Some(e),
		}
	}
}

impl From<std::io::Error> for EventStreamError {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<aws_smithy_eventstream::error::Error> for EventStreamError {
	fn from(err: aws_smithy_eventstream::error::Error) -> Self {
		Self::Protocol(err)
	}
}

/// A `tokio_util::codec::Decoder` over AWS Smithy's `MessageFrameDecoder`.
#[derive(Default)]
pub struct EventStreamCodec {
	inner: MessageFrameDecoder,
}

impl EventStreamCodec {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Decoder for EventStreamCodec {
	type Item = Message;
	type Error = EventStreamError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.inner.decode_frame(src)? {
			DecodedFrame::Complete(message) => Ok(Some(message)),
			DecodedFrame::Incomplete => Ok(None),
		}
	}
}

fn header(m: &Message, name: &str) -> Option<String> {
	m.headers()
		.iter()
		.find(|h| h.name().as_str() == name)
		.and_then(|h| h.value().as_string().ok())
		.map(|s| s.as_str().to_owned())
}

/// Decode one event-stream message into a Converse event.
///
/// Exceptions become `AIError::Provider`. Payloads that do not parse become
/// `AIError::MalformedUpstreamEvent`. Event types we do not translate yield `Ok(None)`.
pub fn decode_event(m: &Message) -> Result<Option<ConverseStreamOutput>, AIError> {
	// AWS EventStream uses :message-type to separate exceptions from normal events
	if header(m, ":message-type").as_deref() == Some("exception") {
		let exception_type = header(m, ":exception-type").unwrap_or_else(|| "unknown".to_owned());
		let message = serde_json::from_slice::<ConverseErrorResponse>(m.payload())
			.map(|e| e.message)
			.unwrap_or_else(|_| String::from_utf8_lossy(m.payload()).into_owned());
		return Err(AIError::Provider(format!("{exception_type}: {message}")));
	}

	let Some(event_type) = header(m, ":event-type") else {
		return Err(AIError::MalformedUpstreamEvent(
			"event without :event-type header".to_string(),
		));
	};
	let event = ConverseStreamOutput::from_payload(&event_type, m.payload()).map_err(|e| {
		AIError::MalformedUpstreamEvent(format!("invalid {event_type} payload: {e}"))
	})?;
	if event.is_none() {
		debug!(%event_type, "skipping untranslated backend event");
	}
	Ok(event)
}

/// Turn a raw event-stream body into Converse events.
///
/// A framing or read error ends the stream after yielding it, since the decoder cannot resync.
pub fn converse_events<S, E>(body: S) -> BoxStream<'static, Result<ConverseStreamOutput, AIError>>
where
	S: Stream<Item = Result<Bytes, E>> + Send + 'static,
	E: std::error::Error + Send + Sync + 'static,
{
	let reader = StreamReader::new(body.map_err(std::io::Error::other));
	let mut failed = false;
	FramedRead::new(reader, EventStreamCodec::new())
		.take_while(move |frame| {
			let keep = !failed;
			failed |= frame.is_err();
			futures::future::ready(keep)
		})
		.filter_map(|frame| {
			futures::future::ready(match frame {
				Ok(m) => decode_event(&m).transpose(),
				Err(e) => Some(Err(AIError::Provider(e.to_string()))),
			})
		})
		.boxed()
}

#[cfg(test)]
mod tests {
	use aws_smithy_eventstream::frame::write_message_to;
	use aws_smithy_types::event_stream::{Header, HeaderValue};
	use serde_json::json;

	use super::*;
	use crate::llm::types::bedrock::{ContentBlockDelta, StopReason};

	fn frame(headers: &[(&'static str, &'static str)], payload: serde_json::Value) -> Bytes {
		let mut msg = Message::new(Bytes::from(serde_json::to_vec(&payload).unwrap()));
		for (name, value) in headers {
			msg = msg.add_header(Header::new(*name, HeaderValue::String((*value).into())));
		}
		let mut buf = Vec::new();
		write_message_to(&msg, &mut buf).unwrap();
		Bytes::from(buf)
	}

	fn event(event_type: &'static str, payload: serde_json::Value) -> Bytes {
		frame(
			&[(":message-type", "event"), (":event-type", event_type)],
			payload,
		)
	}

	async fn collect(chunks: Vec<Bytes>) -> Vec<Result<ConverseStreamOutput, AIError>> {
		let body = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
		converse_events(body).collect().await
	}

	#[tokio::test]
	async fn decodes_frames_split_across_chunks() {
		let mut all = BytesMut::new();
		all.extend_from_slice(&event(
			"contentBlockDelta",
			json!({"contentBlockIndex": 0, "delta": {"text": "hi"}}),
		));
		all.extend_from_slice(&event(
			"messageStop",
			json!({"stopReason": "end_turn"}),
		));
		let all = all.freeze();
		// Split at an arbitrary point inside the first frame.
		let chunks = vec![all.slice(..7), all.slice(7..)];
		let events = collect(chunks).await;
		assert_eq!(events.len(), 2);
		match &events[0] {
			Ok(ConverseStreamOutput::ContentBlockDelta(d)) => {
				assert_eq!(d.delta, Some(ContentBlockDelta::Text("hi".to_string())));
			},
			other => panic!("unexpected {other:?}"),
		}
		match &events[1] {
			Ok(ConverseStreamOutput::MessageStop(s)) => assert_eq!(s.stop_reason, StopReason::EndTurn),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn exception_frames_are_provider_errors() {
		let events = collect(vec![frame(
			&[
				(":message-type", "exception"),
				(":exception-type", "throttlingException"),
			],
			json!({"message": "slow down"}),
		)])
		.await;
		match &events[..] {
			[Err(AIError::Provider(msg))] => assert_eq!(msg, "throttlingException: slow down"),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn unknown_events_are_skipped_and_bad_payloads_flagged() {
		let events = collect(vec![
			event("somethingNew", json!({})),
			event("contentBlockStop", json!({"index": "nope"})),
		])
		.await;
		match &events[..] {
			[Err(AIError::MalformedUpstreamEvent(_))] => {},
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn corrupt_frame_ends_stream() {
		let mut bad = event("messageStart", json!({"role": "assistant"})).to_vec();
		let last = bad.len() - 1;
		bad[last] ^= 0xff;
		let events = collect(vec![Bytes::from(bad), event("messageStart", json!({"role": "assistant"}))]).await;
		match &events[..] {
			[Err(AIError::Provider(_))] => {},
			other => panic!("unexpected {other:?}"),
		}
	}
}
