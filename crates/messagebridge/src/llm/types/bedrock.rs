use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Copy, Clone, Deserialize, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Role {
	#[default]
	User,
	Assistant,
}

/// Serializes as `{}`; Bedrock uses empty objects as unit markers (`{"auto": {}}`).
#[derive(Copy, Clone, Deserialize, Serialize, Debug, Default, PartialEq, Eq)]
pub struct Empty {}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
	Text(String),
	Image(ImageBlock),
	ToolResult(ToolResultBlock),
	ToolUse(ToolUseBlock),
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlock {
	/// Image format without the `image/` prefix (png, jpeg, gif, webp).
	pub format: String,
	pub source: ImageSource,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
	/// Raw image bytes. Base64 encoded on the wire.
	#[serde(with = "base64_bytes")]
	pub bytes: Bytes,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
	/// The ID of the tool request that this is the result for.
	pub tool_use_id: String,
	/// The content for tool result content block.
	#[serde(default)]
	pub content: Vec<ToolResultContentBlock>,
	/// The status for the tool result content block.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<ToolResultStatus>,
}

/// Tool result status. Values other than `success` and `error` are kept verbatim so they can be
/// treated as failures rather than rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolResultStatus {
	Success,
	Error,
	Other(String),
}

impl ToolResultStatus {
	pub fn as_str(&self) -> &str {
		match self {
			ToolResultStatus::Success => "success",
			ToolResultStatus::Error => "error",
			ToolResultStatus::Other(s) => s.as_str(),
		}
	}
}

impl Serialize for ToolResultStatus {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for ToolResultStatus {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Ok(match s.as_str() {
			"success" => ToolResultStatus::Success,
			"error" => ToolResultStatus::Error,
			_ => ToolResultStatus::Other(s),
		})
	}
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
	/// The ID for the tool request.
	pub tool_use_id: String,
	/// The name of the tool that the model wants to use.
	pub name: String,
	/// The input to pass to the tool.
	pub input: serde_json::Value,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContentBlock {
	/// A tool result that is text.
	Text(String),
	/// A tool result that is JSON format data.
	Json(serde_json::Value),
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
pub struct SystemContentBlock {
	pub text: String,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}

#[derive(Clone, Serialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
	/// The maximum number of tokens to generate before stopping.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	/// Amount of randomness injected into the response.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f32>,
	/// Use nucleus sampling.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f32>,
	/// The stop sequences to use.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequences: Option<Vec<String>>,
}

impl InferenceConfiguration {
	pub fn is_empty(&self) -> bool {
		self == &InferenceConfiguration::default()
	}
}

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
	/// Specifies the model or throughput with which to run inference.
	/// This is part of the request path, not the body.
	#[serde(skip)]
	pub model_id: String,
	/// The messages that you want to send to the model.
	pub messages: Vec<Message>,
	/// A prompt that provides instructions or context to the model.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<Vec<SystemContentBlock>>,
	/// Inference parameters to pass to the model.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inference_config: Option<InferenceConfiguration>,
	/// Configuration information for the tools that the model can use.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_config: Option<ToolConfiguration>,
	/// Fields the mapper does not interpret, forwarded verbatim to the model.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub additional_model_request_fields: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfiguration {
	/// An array of tools that you want to pass to a model.
	pub tools: Vec<Tool>,
	/// If supported by model, forces the model to request a tool.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<ToolChoice>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
	/// The specification for the tool.
	ToolSpec(ToolSpecification),
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
	/// The name for the tool.
	pub name: String,
	/// The description for the tool.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// The input schema for the tool in JSON format.
	pub input_schema: ToolInputSchema,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ToolInputSchema {
	Json(serde_json::Value),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ToolChoice {
	/// (Default). The Model automatically decides if a tool should be called or whether to generate text instead.
	Auto(Empty),
	/// The model must request at least one tool (no text is generated).
	Any(Empty),
	/// The model must not request a tool.
	None(Empty),
	/// The Model must request the specified tool.
	Tool { name: String },
}

/// The response from the Converse API
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
	/// The result from the call to Converse
	pub output: Option<ConverseOutput>,
	/// The reason why the model stopped generating output
	pub stop_reason: StopReason,
	/// The total number of tokens used in the call to Converse
	pub usage: Option<TokenUsage>,
	/// Additional fields in the response that are unique to the model
	pub additional_model_response_fields: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConverseErrorResponse {
	// Sometimes its capitalized, sometimes it is not.
	#[serde(alias = "Message")]
	pub message: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ConverseOutput {
	Message(Message),
}

/// Token usage information
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
	/// The number of input tokens which were used
	pub input_tokens: usize,
	/// The number of output tokens which were used
	pub output_tokens: usize,
	/// The total number of tokens used
	#[serde(default)]
	pub total_tokens: usize,
	/// The number of input tokens read from cache
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_read_input_tokens: Option<usize>,
	/// The number of input tokens written to cache
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_write_input_tokens: Option<usize>,
}

/// Reason for stopping the response generation.
///
/// Values outside the shared vocabulary are kept as `Unrecognized` so the mapping layer can reject
/// them explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
	EndTurn,
	ToolUse,
	MaxTokens,
	StopSequence,
	Unrecognized(String),
}

impl StopReason {
	pub fn as_str(&self) -> &str {
		match self {
			StopReason::EndTurn => "end_turn",
			StopReason::ToolUse => "tool_use",
			StopReason::MaxTokens => "max_tokens",
			StopReason::StopSequence => "stop_sequence",
			StopReason::Unrecognized(s) => s.as_str(),
		}
	}
}

impl Serialize for StopReason {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for StopReason {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Ok(match s.as_str() {
			"end_turn" => StopReason::EndTurn,
			"tool_use" => StopReason::ToolUse,
			"max_tokens" => StopReason::MaxTokens,
			"stop_sequence" => StopReason::StopSequence,
			_ => StopReason::Unrecognized(s),
		})
	}
}

/// One decoded event from the Converse stream.
// This is NOT deserialized directly, see `parse::aws_sse::decode_event`
#[derive(Clone, Debug, PartialEq)]
pub enum ConverseStreamOutput {
	/// The messages output content block delta.
	ContentBlockDelta(ContentBlockDeltaEvent),
	/// Start information for a content block.
	ContentBlockStart(ContentBlockStartEvent),
	/// Stop information for a content block.
	ContentBlockStop(ContentBlockStopEvent),
	/// Message start information.
	MessageStart(MessageStartEvent),
	/// Message stop information.
	MessageStop(MessageStopEvent),
	/// Metadata for the converse output stream.
	Metadata(ConverseStreamMetadataEvent),
}

impl ConverseStreamOutput {
	/// Decode the JSON payload of an event with the given `:event-type`.
	/// Returns `Ok(None)` for event types this crate does not translate.
	pub fn from_payload(event_type: &str, payload: &[u8]) -> serde_json::Result<Option<Self>> {
		Ok(Some(match event_type {
			"contentBlockDelta" => ConverseStreamOutput::ContentBlockDelta(serde_json::from_slice(payload)?),
			"contentBlockStart" => ConverseStreamOutput::ContentBlockStart(serde_json::from_slice(payload)?),
			"contentBlockStop" => ConverseStreamOutput::ContentBlockStop(serde_json::from_slice(payload)?),
			"messageStart" => ConverseStreamOutput::MessageStart(serde_json::from_slice(payload)?),
			"messageStop" => ConverseStreamOutput::MessageStop(serde_json::from_slice(payload)?),
			"metadata" => ConverseStreamOutput::Metadata(serde_json::from_slice(payload)?),
			_ => return Ok(None),
		}))
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
	/// The delta for a content block delta event.
	pub delta: Option<ContentBlockDelta>,
	/// The block index for a content block delta event.
	pub content_block_index: i32,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStartEvent {
	/// Start information about a content block start event.
	pub start: Option<ContentBlockStart>,
	/// The index for a content block start event.
	pub content_block_index: i32,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStopEvent {
	/// The index for a content block.
	pub content_block_index: i32,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStartEvent {
	/// The role for the message.
	pub role: Role,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopEvent {
	/// The reason why the model stopped generating output.
	pub stop_reason: StopReason,
	/// The additional model response fields.
	pub additional_model_response_fields: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConverseStreamMetadataEvent {
	/// Usage information for the conversation stream event.
	pub usage: Option<TokenUsage>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlockDelta {
	Text(String),
	ToolUse(ToolUseBlockDelta),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlockDelta {
	/// A fragment of the tool input JSON.
	pub input: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlockStart {
	/// Information about a tool that the model is requesting to use.
	ToolUse(ToolUseBlockStart),
	/// Text content block start. The payload carries nothing we use.
	Text(serde::de::IgnoredAny),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlockStart {
	/// The ID for the tool request.
	pub tool_use_id: String,
	/// The name of the tool that the model is requesting to use.
	pub name: String,
}

/// Extract the stop sequence echoed back by the model, if any.
pub fn stop_sequence(fields: Option<&serde_json::Value>) -> Option<String> {
	fields?
		.get("stop_sequence")
		.and_then(|v| v.as_str())
		.map(ToOwned::to_owned)
}

mod base64_bytes {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;
	use bytes::Bytes;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
		let s = String::deserialize(deserializer)?;
		STANDARD
			.decode(s.as_bytes())
			.map(Bytes::from)
			.map_err(serde::de::Error::custom)
	}
}
