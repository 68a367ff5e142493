use crate::llm::types::bedrock;
use crate::llm::types::messages::typed as messages;

#[cfg(test)]
#[path = "bedrock_tests.rs"]
mod tests;

/// Block-level mapping between the two content unions.
pub mod codec {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;

	use super::{bedrock, messages};
	use crate::llm::AIError;

	/// Map one client block to its backend counterpart.
	///
	/// Images must already carry bytes; remote references are resolved by `llm::images` before
	/// the request reaches this point.
	pub fn to_backend(block: messages::ContentBlock) -> Result<bedrock::ContentBlock, AIError> {
		Ok(match block {
			messages::ContentBlock::Text(messages::ContentTextBlock { text }) => {
				bedrock::ContentBlock::Text(text)
			},
			messages::ContentBlock::Image { source } => match source {
				messages::ImageSource::Base64 { media_type, data } => {
					let bytes = STANDARD
						.decode(data.as_bytes())
						.map_err(AIError::InvalidImageData)?;
					let media_type = media_type.to_ascii_lowercase();
					let format = media_type
						.strip_prefix("image/")
						.unwrap_or(&media_type)
						.to_string();
					bedrock::ContentBlock::Image(bedrock::ImageBlock {
						format,
						source: bedrock::ImageSource {
							bytes: bytes.into(),
						},
					})
				},
				messages::ImageSource::Url { url } => return Err(AIError::UnresolvedImageUrl(url)),
			},
			messages::ContentBlock::ToolUse { id, name, input } => {
				bedrock::ContentBlock::ToolUse(bedrock::ToolUseBlock {
					tool_use_id: id,
					name,
					input,
				})
			},
			messages::ContentBlock::ToolResult {
				tool_use_id,
				content,
				is_error,
			} => {
				let content = content
					.into_iter()
					.map(|part| match part {
						messages::ToolResultContentPart::Text { text } => {
							bedrock::ToolResultContentBlock::Text(text)
						},
						messages::ToolResultContentPart::Json { json } => {
							bedrock::ToolResultContentBlock::Json(json)
						},
					})
					.collect();
				let status = if is_error {
					bedrock::ToolResultStatus::Error
				} else {
					bedrock::ToolResultStatus::Success
				};
				bedrock::ContentBlock::ToolResult(bedrock::ToolResultBlock {
					tool_use_id,
					content,
					status: Some(status),
				})
			},
		})
	}

	/// Map one backend block back to the client union. Total: every backend block has a client form.
	pub fn to_client(block: bedrock::ContentBlock) -> messages::ContentBlock {
		match block {
			bedrock::ContentBlock::Text(text) => {
				messages::ContentBlock::Text(messages::ContentTextBlock { text })
			},
			bedrock::ContentBlock::Image(bedrock::ImageBlock { format, source }) => {
				messages::ContentBlock::Image {
					source: messages::ImageSource::Base64 {
						media_type: format!("image/{format}"),
						data: STANDARD.encode(&source.bytes),
					},
				}
			},
			bedrock::ContentBlock::ToolUse(bedrock::ToolUseBlock {
				tool_use_id,
				name,
				input,
			}) => messages::ContentBlock::ToolUse {
				id: tool_use_id,
				name,
				input,
			},
			bedrock::ContentBlock::ToolResult(bedrock::ToolResultBlock {
				tool_use_id,
				content,
				status,
			}) => {
				let content = content
					.into_iter()
					.map(|entry| match entry {
						bedrock::ToolResultContentBlock::Text(text) => {
							messages::ToolResultContentPart::Text { text }
						},
						bedrock::ToolResultContentBlock::Json(json) => {
							messages::ToolResultContentPart::Json { json }
						},
					})
					.collect();
				// Anything but an explicit success is a failure.
				let is_error = status.is_some_and(|s| s != bedrock::ToolResultStatus::Success);
				messages::ContentBlock::ToolResult {
					tool_use_id,
					content,
					is_error,
				}
			},
		}
	}
}

pub mod from_messages {
	use itertools::Itertools;
	use tracing::debug;

	use super::{bedrock, codec, helpers, messages};
	use crate::llm::AIError;

	/// translate a validated messages request to a Bedrock converse request
	pub fn translate(
		req: messages::Request,
		model_id: &str,
	) -> Result<bedrock::ConverseRequest, AIError> {
		let system = req
			.system
			.into_iter()
			.map(|b| bedrock::SystemContentBlock { text: b.text })
			.collect_vec();

		let messages = req
			.messages
			.into_iter()
			.map(|msg| {
				let role = match msg.role {
					messages::Role::Assistant => bedrock::Role::Assistant,
					messages::Role::User => bedrock::Role::User,
				};
				let content = msg
					.content
					.into_iter()
					.map(codec::to_backend)
					.collect::<Result<Vec<_>, _>>()?;
				Ok(bedrock::Message { role, content })
			})
			.collect::<Result<Vec<_>, AIError>>()?;

		let inference_config = bedrock::InferenceConfiguration {
			max_tokens: req.max_tokens,
			temperature: req.temperature,
			top_p: req.top_p,
			stop_sequences: req.stop_sequences,
		};

		// The backend treats the presence of toolConfig as tools being enabled, so an empty list
		// must not produce one. A choice without tools is dropped with it.
		let tool_config = if req.tools.is_empty() {
			if req.tool_choice.is_some() {
				debug!("dropping tool_choice: request has no tools");
			}
			None
		} else {
			let tools = req
				.tools
				.into_iter()
				.map(|tool| {
					bedrock::Tool::ToolSpec(bedrock::ToolSpecification {
						name: tool.name,
						description: tool.description,
						input_schema: bedrock::ToolInputSchema::Json(tool.input_schema),
					})
				})
				.collect_vec();
			Some(bedrock::ToolConfiguration {
				tools,
				tool_choice: req.tool_choice.map(translate_tool_choice),
			})
		};

		Ok(bedrock::ConverseRequest {
			model_id: model_id.to_string(),
			messages,
			system: (!system.is_empty()).then_some(system),
			inference_config: (!inference_config.is_empty()).then_some(inference_config),
			tool_config,
			additional_model_request_fields: (!req.passthrough.is_empty()).then_some(req.passthrough),
		})
	}

	/// translate a complete Bedrock response. `model` is the name the client asked for.
	pub fn translate_response(
		resp: bedrock::ConverseResponse,
		model: &str,
	) -> Result<messages::MessagesResponse, AIError> {
		let Some(bedrock::ConverseOutput::Message(message)) = resp.output else {
			return Err(AIError::IncompleteResponse);
		};
		let stop_reason = translate_stop_reason(resp.stop_reason)?;
		let stop_sequence = bedrock::stop_sequence(resp.additional_model_response_fields.as_ref());
		let content = message.content.into_iter().map(codec::to_client).collect_vec();
		Ok(messages::MessagesResponse {
			id: helpers::generate_message_id(),
			r#type: "message".to_string(),
			role: messages::Role::Assistant,
			content,
			model: model.to_string(),
			stop_reason: Some(stop_reason),
			stop_sequence,
			usage: resp.usage.map(translate_usage).unwrap_or_default(),
		})
	}

	pub fn translate_tool_choice(choice: messages::ToolChoice) -> bedrock::ToolChoice {
		match choice {
			messages::ToolChoice::Auto => bedrock::ToolChoice::Auto(bedrock::Empty {}),
			messages::ToolChoice::Any => bedrock::ToolChoice::Any(bedrock::Empty {}),
			messages::ToolChoice::None => bedrock::ToolChoice::None(bedrock::Empty {}),
			messages::ToolChoice::Tool { name } => bedrock::ToolChoice::Tool { name },
		}
	}

	pub fn tool_choice_to_client(choice: bedrock::ToolChoice) -> messages::ToolChoice {
		match choice {
			bedrock::ToolChoice::Auto(_) => messages::ToolChoice::Auto,
			bedrock::ToolChoice::Any(_) => messages::ToolChoice::Any,
			bedrock::ToolChoice::None(_) => messages::ToolChoice::None,
			bedrock::ToolChoice::Tool { name } => messages::ToolChoice::Tool { name },
		}
	}

	/// Never guesses: a stop reason outside the shared vocabulary is an error, since defaulting to
	/// `end_turn` would hide truncation.
	pub fn translate_stop_reason(
		stop_reason: bedrock::StopReason,
	) -> Result<messages::StopReason, AIError> {
		Ok(match stop_reason {
			bedrock::StopReason::EndTurn => messages::StopReason::EndTurn,
			bedrock::StopReason::ToolUse => messages::StopReason::ToolUse,
			bedrock::StopReason::MaxTokens => messages::StopReason::MaxTokens,
			bedrock::StopReason::StopSequence => messages::StopReason::StopSequence,
			bedrock::StopReason::Unrecognized(other) => {
				return Err(AIError::UnrecognizedStopReason(other));
			},
		})
	}

	pub fn translate_usage(usage: bedrock::TokenUsage) -> messages::Usage {
		messages::Usage {
			input_tokens: usage.input_tokens,
			output_tokens: usage.output_tokens,
			cache_creation_input_tokens: usage.cache_write_input_tokens,
			cache_read_input_tokens: usage.cache_read_input_tokens,
		}
	}

	pub fn translate_delta_usage(usage: bedrock::TokenUsage) -> messages::MessageDeltaUsage {
		messages::MessageDeltaUsage {
			input_tokens: usage.input_tokens,
			output_tokens: usage.output_tokens,
			cache_creation_input_tokens: usage.cache_write_input_tokens,
			cache_read_input_tokens: usage.cache_read_input_tokens,
		}
	}
}

pub(crate) mod helpers {
	/// `msg_` followed by 24 hex characters: 48 bits of millisecond timestamp, 48 random bits.
	pub fn generate_message_id() -> String {
		let timestamp = chrono::Utc::now().timestamp_millis() as u64 & 0xffff_ffff_ffff;
		let random = rand::random::<u64>() & 0xffff_ffff_ffff;
		format!("msg_{timestamp:012x}{random:012x}")
	}
}
