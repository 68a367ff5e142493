use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use futures::Stream;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::llm::AIError;
use crate::llm::conversion::bedrock::{from_messages, helpers};
use crate::llm::types::bedrock;
use crate::llm::types::messages::typed as messages;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BlockKind {
	Text,
	ToolUse,
}

/// Per-request state for turning a Converse event stream into Messages stream events.
///
/// Block indices are the backend's; they are never renumbered. A block index is opened at most
/// once, and deltas are only forwarded while their block is open.
#[derive(Debug)]
pub struct StreamTranslator {
	model: String,
	message_id: String,
	open: BTreeMap<usize, BlockKind>,
	seen: HashSet<usize>,
	started: bool,
	closed: bool,
	pending_stop: Option<(messages::StopReason, Option<String>)>,
	usage: Option<bedrock::TokenUsage>,
}

fn malformed(msg: impl Into<String>) -> AIError {
	AIError::MalformedUpstreamEvent(msg.into())
}

fn block_index(index: i32) -> Result<usize, AIError> {
	usize::try_from(index).map_err(|_| malformed(format!("negative content block index {index}")))
}

impl StreamTranslator {
	pub fn new(model: impl Into<String>) -> Self {
		StreamTranslator {
			model: model.into(),
			message_id: helpers::generate_message_id(),
			open: BTreeMap::new(),
			seen: HashSet::new(),
			started: false,
			closed: false,
			pending_stop: None,
			usage: None,
		}
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// The envelope opener. Emitted once, before any backend event is looked at.
	pub fn message_start(&mut self) -> Option<messages::MessagesStreamEvent> {
		if self.started {
			return None;
		}
		self.started = true;
		Some(messages::MessagesStreamEvent::MessageStart {
			message: messages::MessagesResponse {
				id: self.message_id.clone(),
				r#type: "message".to_string(),
				role: messages::Role::Assistant,
				content: Vec::new(),
				model: self.model.clone(),
				stop_reason: None,
				stop_sequence: None,
				usage: messages::Usage::default(),
			},
		})
	}

	/// Translate one backend event.
	///
	/// `Err(AIError::MalformedUpstreamEvent)` means the event violated the block grammar and was
	/// dropped; the translator state is unchanged and translation may continue. Any other error
	/// is fatal and should be passed to [`StreamTranslator::fail`].
	pub fn translate(
		&mut self,
		event: bedrock::ConverseStreamOutput,
	) -> Result<Vec<messages::MessagesStreamEvent>, AIError> {
		if self.closed {
			debug!(?event, "ignoring backend event after stream close");
			return Ok(Vec::new());
		}
		let mut out = Vec::new();
		match event {
			// message_start is ours; the backend's carries nothing new.
			bedrock::ConverseStreamOutput::MessageStart(_) => {},
			bedrock::ConverseStreamOutput::ContentBlockStart(start) => {
				let index = block_index(start.content_block_index)?;
				if self.seen.contains(&index) {
					return Err(malformed(format!("second start for content block {index}")));
				}
				let (kind, content_block) = match start.start {
					Some(bedrock::ContentBlockStart::ToolUse(tu)) => (
						BlockKind::ToolUse,
						messages::ContentBlock::ToolUse {
							id: tu.tool_use_id,
							name: tu.name,
							input: serde_json::json!({}),
						},
					),
					Some(bedrock::ContentBlockStart::Text(_)) | None => (BlockKind::Text, empty_text()),
				};
				self.open_block(index, kind);
				out.push(messages::MessagesStreamEvent::ContentBlockStart {
					index,
					content_block,
				});
			},
			bedrock::ConverseStreamOutput::ContentBlockDelta(delta) => {
				let index = block_index(delta.content_block_index)?;
				let Some(d) = delta.delta else {
					return Ok(out);
				};
				match (self.open.get(&index).copied(), d) {
					(Some(BlockKind::Text), bedrock::ContentBlockDelta::Text(text)) => {
						out.push(text_delta(index, text));
					},
					// Bedrock does not announce text blocks; the first delta opens them.
					(None, bedrock::ContentBlockDelta::Text(text)) if !self.seen.contains(&index) => {
						self.open_block(index, BlockKind::Text);
						out.push(messages::MessagesStreamEvent::ContentBlockStart {
							index,
							content_block: empty_text(),
						});
						out.push(text_delta(index, text));
					},
					(Some(BlockKind::ToolUse), bedrock::ContentBlockDelta::ToolUse(tu)) => {
						out.push(messages::MessagesStreamEvent::ContentBlockDelta {
							index,
							delta: messages::ContentBlockDelta::InputJsonDelta {
								partial_json: tu.input,
							},
						});
					},
					(Some(kind), _) => {
						return Err(malformed(format!(
							"delta kind does not match open {kind:?} block {index}"
						)));
					},
					(None, _) => {
						return Err(malformed(format!("delta for content block {index} which is not open")));
					},
				}
			},
			bedrock::ConverseStreamOutput::ContentBlockStop(stop) => {
				let index = block_index(stop.content_block_index)?;
				if self.open.remove(&index).is_none() {
					return Err(malformed(format!("stop for content block {index} which is not open")));
				}
				out.push(messages::MessagesStreamEvent::ContentBlockStop { index });
			},
			bedrock::ConverseStreamOutput::MessageStop(stop) => {
				let reason = from_messages::translate_stop_reason(stop.stop_reason)?;
				let stop_sequence = bedrock::stop_sequence(stop.additional_model_response_fields.as_ref());
				self.pending_stop = Some((reason, stop_sequence));
				// Usage normally follows the stop; only close now if it already arrived.
				if self.usage.is_some() {
					self.terminate(&mut out);
				}
			},
			bedrock::ConverseStreamOutput::Metadata(meta) => {
				if let Some(usage) = meta.usage {
					self.usage = Some(usage);
				}
				if self.pending_stop.is_some() {
					self.terminate(&mut out);
				} else if let Some(usage) = meta.usage {
					out.push(messages::MessagesStreamEvent::MessageDelta {
						delta: messages::MessageDelta {
							stop_reason: None,
							stop_sequence: None,
						},
						usage: from_messages::translate_delta_usage(usage),
					});
				}
			},
		}
		Ok(out)
	}

	/// The backend stream ended.
	pub fn finish(&mut self) -> Vec<messages::MessagesStreamEvent> {
		if self.closed {
			return Vec::new();
		}
		if self.pending_stop.is_some() {
			let mut out = Vec::new();
			self.terminate(&mut out);
			return out;
		}
		self.fail(&AIError::Provider(
			"backend stream ended without a stop reason".to_string(),
		))
	}

	/// Close the stream with a single error event. Nothing follows it.
	///
	/// A turn whose stop reason already arrived is complete; it closes normally with whatever
	/// usage was seen and the error is dropped.
	pub fn fail(&mut self, err: &AIError) -> Vec<messages::MessagesStreamEvent> {
		if self.closed {
			return Vec::new();
		}
		if self.pending_stop.is_some() {
			debug!(error = %err, "backend failed after the stop reason, closing normally");
			let mut out = Vec::new();
			self.terminate(&mut out);
			return out;
		}
		self.closed = true;
		vec![messages::MessagesStreamEvent::Error {
			error: err.to_messages_error(),
		}]
	}

	fn open_block(&mut self, index: usize, kind: BlockKind) {
		self.seen.insert(index);
		self.open.insert(index, kind);
	}

	fn terminate(&mut self, out: &mut Vec<messages::MessagesStreamEvent>) {
		let Some((stop_reason, stop_sequence)) = self.pending_stop.take() else {
			return;
		};
		// Blocks the backend never closed still get their stop, in index order.
		for (index, _) in std::mem::take(&mut self.open) {
			out.push(messages::MessagesStreamEvent::ContentBlockStop { index });
		}
		out.push(messages::MessagesStreamEvent::MessageDelta {
			delta: messages::MessageDelta {
				stop_reason: Some(stop_reason),
				stop_sequence,
			},
			usage: self
				.usage
				.map(from_messages::translate_delta_usage)
				.unwrap_or_default(),
		});
		out.push(messages::MessagesStreamEvent::MessageStop);
		self.closed = true;
	}
}

fn empty_text() -> messages::ContentBlock {
	messages::ContentBlock::Text(messages::ContentTextBlock {
		text: String::new(),
	})
}

fn text_delta(index: usize, text: String) -> messages::MessagesStreamEvent {
	messages::MessagesStreamEvent::ContentBlockDelta {
		index,
		delta: messages::ContentBlockDelta::TextDelta { text },
	}
}

enum Next {
	Upstream(Option<Result<bedrock::ConverseStreamOutput, AIError>>),
	Idle,
}

/// Drive a [`StreamTranslator`] over a live backend stream.
///
/// A `ping` is emitted whenever `keepalive` passes without any other event. Dropping the returned
/// stream drops `upstream`, which releases the backend connection.
pub fn translate_stream(
	upstream: BoxStream<'static, Result<bedrock::ConverseStreamOutput, AIError>>,
	model: String,
	keepalive: Duration,
) -> impl Stream<Item = messages::MessagesStreamEvent> + Send + 'static {
	let mut translator = StreamTranslator::new(model);
	let mut upstream = upstream;
	async_stream::stream! {
		if let Some(start) = translator.message_start() {
			yield start;
		}
		let mut last_emit = Instant::now();
		loop {
			let next = tokio::select! {
				biased;
				ev = upstream.next() => Next::Upstream(ev),
				_ = sleep_until(last_emit + keepalive) => Next::Idle,
			};
			let events = match next {
				Next::Idle => {
					trace!("stream idle, sending ping");
					vec![messages::MessagesStreamEvent::Ping]
				},
				Next::Upstream(Some(Ok(ev))) => match translator.translate(ev) {
					Ok(events) => events,
					Err(e @ AIError::MalformedUpstreamEvent(_)) => {
						warn!(error = %e, "dropping malformed backend event");
						Vec::new()
					},
					Err(e) => {
						warn!(error = %e, "backend stream failed");
						translator.fail(&e)
					},
				},
				Next::Upstream(Some(Err(e @ AIError::MalformedUpstreamEvent(_)))) => {
					warn!(error = %e, "dropping malformed backend event");
					Vec::new()
				},
				Next::Upstream(Some(Err(e))) => {
					warn!(error = %e, "backend stream failed");
					translator.fail(&e)
				},
				Next::Upstream(None) => translator.finish(),
			};
			if !events.is_empty() {
				last_emit = Instant::now();
			}
			for ev in events {
				yield ev;
			}
			if translator.is_closed() {
				break;
			}
		}
	}
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
