use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::AIError;

/// The raw request body as the client sent it. Anything this layer does not name is kept, in order,
/// in `rest` so it can be forwarded to the backend untouched.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default)]
	pub messages: Vec<RequestMessage>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<RequestContent>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequences: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<Value>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<Value>,

	#[serde(flatten, default)]
	pub rest: Map<String, Value>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RequestMessage {
	pub role: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<RequestContent>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum RequestContent {
	Text(String),
	Array(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentPart {
	pub r#type: String,
	#[serde(flatten, default)]
	pub rest: Map<String, Value>,
}

const KNOWN_BLOCKS: [&str; 4] = ["text", "image", "tool_use", "tool_result"];

impl ContentPart {
	fn into_typed(self) -> Result<typed::ContentBlock, AIError> {
		let ContentPart { r#type, mut rest } = self;
		if !KNOWN_BLOCKS.contains(&r#type.as_str()) {
			return Err(AIError::UnsupportedContentBlock(r#type));
		}
		rest.insert("type".to_string(), Value::String(r#type.clone()));
		serde_json::from_value(Value::Object(rest)).map_err(|source| AIError::InvalidContentBlock {
			kind: r#type,
			source,
		})
	}
}

impl RequestContent {
	/// Normalize string shorthand into a single text block.
	fn into_parts(self) -> Vec<ContentPart> {
		match self {
			RequestContent::Text(text) => {
				let mut rest = Map::new();
				rest.insert("text".to_string(), Value::String(text));
				vec![ContentPart {
					r#type: "text".to_string(),
					rest,
				}]
			},
			RequestContent::Array(parts) => parts,
		}
	}
}

impl RequestMessage {
	fn into_typed(self) -> Result<typed::Message, AIError> {
		let role = match self.role.as_str() {
			"user" => typed::Role::User,
			"assistant" => typed::Role::Assistant,
			// Tool results travel as user content on both protocols.
			"tool" => typed::Role::User,
			_ => return Err(AIError::InvalidRole(self.role)),
		};
		let content = self
			.content
			.map(RequestContent::into_parts)
			.unwrap_or_default()
			.into_iter()
			.map(ContentPart::into_typed)
			.collect::<Result<Vec<_>, _>>()?;
		Ok(typed::Message { role, content })
	}
}

fn system_prompt(system: Option<RequestContent>) -> Result<Vec<typed::ContentTextBlock>, AIError> {
	let Some(system) = system else {
		return Ok(Vec::new());
	};
	system
		.into_parts()
		.into_iter()
		.map(|part| match part.into_typed()? {
			typed::ContentBlock::Text(text) => Ok(text),
			other => Err(AIError::UnsupportedContentBlock(format!(
				"{} in system prompt",
				other.kind()
			))),
		})
		.collect()
}

fn tool_choice(choice: Value) -> Result<typed::ToolChoice, AIError> {
	match &choice {
		Value::String(s) => match s.as_str() {
			"auto" => Ok(typed::ToolChoice::Auto),
			"any" => Ok(typed::ToolChoice::Any),
			"none" => Ok(typed::ToolChoice::None),
			_ => Err(AIError::InvalidToolChoice(choice.to_string())),
		},
		Value::Object(_) => serde_json::from_value(choice.clone())
			.map_err(|e| AIError::InvalidToolChoice(format!("{choice}: {e}"))),
		_ => Err(AIError::InvalidToolChoice(choice.to_string())),
	}
}

impl TryFrom<Request> for typed::Request {
	type Error = AIError;

	fn try_from(req: Request) -> Result<Self, Self::Error> {
		let model = req
			.model
			.filter(|m| !m.is_empty())
			.ok_or(AIError::MissingField("model"))?;
		let messages = req
			.messages
			.into_iter()
			.map(RequestMessage::into_typed)
			.collect::<Result<Vec<_>, _>>()?;
		let system = system_prompt(req.system)?;
		let tools = req
			.tools
			.unwrap_or_default()
			.into_iter()
			.map(|t| serde_json::from_value::<typed::Tool>(t).map_err(AIError::InvalidTool))
			.collect::<Result<Vec<_>, _>>()?;
		let tool_choice = req.tool_choice.map(tool_choice).transpose()?;
		Ok(typed::Request {
			model,
			messages,
			system,
			max_tokens: req.max_tokens,
			temperature: req.temperature,
			top_p: req.top_p,
			stop_sequences: req.stop_sequences,
			stream: req.stream.unwrap_or_default(),
			tools,
			tool_choice,
			passthrough: req.rest,
		})
	}
}

// 'typed' provides a typed accessor
pub mod typed {
	use serde::{Deserialize, Deserializer, Serialize};
	use serde_json::{Map, Value};

	#[derive(Copy, Clone, Deserialize, Serialize, Debug, PartialEq, Eq, Default)]
	#[serde(rename_all = "snake_case")]
	pub enum Role {
		User,
		#[default]
		Assistant,
	}

	#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
	pub struct ContentTextBlock {
		pub text: String,
	}

	impl From<&str> for ContentTextBlock {
		fn from(text: &str) -> Self {
			ContentTextBlock {
				text: text.to_string(),
			}
		}
	}

	#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
	#[serde(rename_all = "snake_case", tag = "type")]
	pub enum ImageSource {
		Base64 { media_type: String, data: String },
		/// A remote image. Must be resolved to `Base64` before reaching the backend.
		Url { url: String },
	}

	#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
	#[serde(rename_all = "snake_case", tag = "type")]
	pub enum ContentBlock {
		Text(ContentTextBlock),
		Image {
			source: ImageSource,
		},
		/// Tool use content
		ToolUse {
			id: String,
			name: String,
			input: Value,
		},
		/// Tool result content
		ToolResult {
			tool_use_id: String,
			#[serde(default, deserialize_with = "tool_result_content")]
			content: Vec<ToolResultContentPart>,
			#[serde(default, skip_serializing_if = "std::ops::Not::not")]
			is_error: bool,
		},
	}

	impl ContentBlock {
		pub fn kind(&self) -> &'static str {
			match self {
				ContentBlock::Text(_) => "text",
				ContentBlock::Image { .. } => "image",
				ContentBlock::ToolUse { .. } => "tool_use",
				ContentBlock::ToolResult { .. } => "tool_result",
			}
		}
	}

	/// Tool result content arrives as a bare string, a single JSON object or a list of parts.
	/// All three normalize to the list form.
	fn tool_result_content<'de, D>(deserializer: D) -> Result<Vec<ToolResultContentPart>, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Raw {
			Text(String),
			Parts(Vec<ToolResultContentPart>),
			Object(Map<String, Value>),
		}
		Ok(match Option::<Raw>::deserialize(deserializer)? {
			None => Vec::new(),
			Some(Raw::Text(text)) => vec![ToolResultContentPart::Text { text }],
			Some(Raw::Parts(parts)) => parts,
			Some(Raw::Object(json)) => vec![ToolResultContentPart::Json {
				json: Value::Object(json),
			}],
		})
	}

	#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
	#[serde(tag = "type", rename_all = "snake_case")]
	pub enum ToolResultContentPart {
		Text { text: String },
		Json { json: Value },
	}

	#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
	pub struct Message {
		pub role: Role,
		pub content: Vec<ContentBlock>,
	}

	/// A fully validated client request. The system prompt is always a list of text blocks here,
	/// regardless of how the client sent it.
	#[derive(Clone, Debug, PartialEq)]
	pub struct Request {
		pub model: String,
		pub messages: Vec<Message>,
		pub system: Vec<ContentTextBlock>,
		pub max_tokens: Option<u64>,
		pub temperature: Option<f32>,
		pub top_p: Option<f32>,
		pub stop_sequences: Option<Vec<String>>,
		pub stream: bool,
		pub tools: Vec<Tool>,
		pub tool_choice: Option<ToolChoice>,
		/// Unrecognized top-level fields, in the order received.
		pub passthrough: Map<String, Value>,
	}

	/// Response body for the Messages API.
	#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
	pub struct MessagesResponse {
		/// Unique object identifier.
		pub id: String,
		/// Object type.
		/// For Messages, this is always "message".
		pub r#type: String,
		/// Conversational role of the generated message.
		/// This will always be "assistant".
		pub role: Role,
		/// Content generated by the model.
		pub content: Vec<ContentBlock>,
		/// The model that handled the request, as the client named it.
		pub model: String,
		/// The reason that we stopped.
		///
		/// In non-streaming mode this value is always non-null. In streaming mode, it is null
		/// in the message_start event and non-null otherwise.
		pub stop_reason: Option<StopReason>,
		/// Which custom stop sequence was generated, if any.
		pub stop_sequence: Option<String>,
		/// Billing and rate-limit usage.
		pub usage: Usage,
	}

	#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
	#[serde(rename_all = "snake_case", tag = "type")]
	pub enum MessagesStreamEvent {
		MessageStart {
			message: MessagesResponse,
		},
		ContentBlockStart {
			index: usize,
			content_block: ContentBlock,
		},
		ContentBlockDelta {
			index: usize,
			delta: ContentBlockDelta,
		},
		ContentBlockStop {
			index: usize,
		},
		MessageDelta {
			delta: MessageDelta,
			usage: MessageDeltaUsage,
		},
		MessageStop,
		Ping,
		Error {
			error: MessagesError,
		},
	}

	impl MessagesStreamEvent {
		/// Get the SSE event name for this event type
		pub fn event_name(&self) -> &'static str {
			match self {
				Self::MessageStart { .. } => "message_start",
				Self::ContentBlockStart { .. } => "content_block_start",
				Self::ContentBlockDelta { .. } => "content_block_delta",
				Self::ContentBlockStop { .. } => "content_block_stop",
				Self::MessageDelta { .. } => "message_delta",
				Self::MessageStop => "message_stop",
				Self::Ping => "ping",
				Self::Error { .. } => "error",
			}
		}

		pub fn into_sse_tuple(self) -> (&'static str, Self) {
			let name = self.event_name();
			(name, self)
		}
	}

	#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
	#[serde(rename_all = "snake_case", tag = "type")]
	#[allow(clippy::enum_variant_names)]
	pub enum ContentBlockDelta {
		TextDelta { text: String },
		InputJsonDelta { partial_json: String },
	}

	#[derive(Clone, Serialize, Deserialize, Debug, Default, Eq, PartialEq)]
	pub struct MessageDeltaUsage {
		/// Cumulative input tokens
		pub input_tokens: usize,
		/// Cumulative output tokens
		pub output_tokens: usize,
		/// Cumulative cache creation tokens
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_creation_input_tokens: Option<usize>,
		/// Cumulative cache read tokens
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_read_input_tokens: Option<usize>,
	}

	#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
	pub struct MessageDelta {
		/// Null on usage-only updates, set on the terminal delta.
		pub stop_reason: Option<StopReason>,
		/// Which custom stop sequence was generated, if any.
		pub stop_sequence: Option<String>,
	}

	/// Error body shared by JSON responses and the streaming `error` event.
	#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
	pub struct MessagesErrorResponse {
		pub r#type: String,
		pub error: MessagesError,
	}

	#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
	pub struct MessagesError {
		pub r#type: String,
		pub message: String,
	}

	/// Reason for stopping the response generation.
	#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
	#[serde(rename_all = "snake_case")]
	pub enum StopReason {
		/// The model reached a natural stopping point.
		EndTurn,
		/// The requested max_tokens or the model's maximum was exceeded.
		MaxTokens,
		/// One of the provided custom stop_sequences was generated.
		StopSequence,
		/// The model invoked one or more tools.
		ToolUse,
	}

	/// Billing and rate-limit usage.
	#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
	pub struct Usage {
		/// The number of input tokens which were used.
		pub input_tokens: usize,

		/// The number of output tokens which were used.
		pub output_tokens: usize,

		/// The number of input tokens used to create the cache entry.
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_creation_input_tokens: Option<usize>,

		/// The number of input tokens read from the cache.
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_read_input_tokens: Option<usize>,
	}

	/// Tool definition
	#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
	pub struct Tool {
		/// Name of the tool
		pub name: String,
		/// Description of the tool
		#[serde(default, skip_serializing_if = "Option::is_none")]
		pub description: Option<String>,
		/// JSON schema for tool input
		#[serde(default)]
		pub input_schema: Value,
	}

	/// Tool choice configuration
	#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
	#[serde(tag = "type")]
	pub enum ToolChoice {
		/// Let model choose whether to use tools
		#[serde(rename = "auto")]
		Auto,
		/// Model must use one of the provided tools
		#[serde(rename = "any")]
		Any,
		/// Model must use a specific tool
		#[serde(rename = "tool")]
		Tool { name: String },
		/// Model must not use any tools
		#[serde(rename = "none")]
		None,
	}
}
