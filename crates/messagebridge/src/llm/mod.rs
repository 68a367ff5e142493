use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures_util::StreamExt;
use http::StatusCode;
use tracing::{debug, info};

use crate::llm::bedrock::Backend;
use crate::llm::conversion::bedrock::from_messages;
use crate::llm::images::ImageFetcher;
use crate::llm::models::ModelResolver;
use crate::llm::types::messages::typed as messages;

pub mod bedrock;
pub mod conversion;
pub mod images;
pub mod models;
pub mod types;


/// The taxonomy tag carried by every error shown to a client.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	Authentication,
	InvalidRequest,
	Provider,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::Authentication => "authentication_error",
			ErrorKind::InvalidRequest => "invalid_request_error",
			ErrorKind::Provider => "provider_error",
		}
	}

	pub fn status_code(&self) -> StatusCode {
		match self {
			ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
			ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
			ErrorKind::Provider => StatusCode::BAD_GATEWAY,
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum AIError {
	#[error("invalid API key")]
	Unauthorized,
	#[error("missing field: {0}")]
	MissingField(&'static str),
	#[error("failed to parse request: {0}")]
	RequestParsing(serde_json::Error),
	#[error("unsupported content block type: {0}")]
	UnsupportedContentBlock(String),
	#[error("invalid {kind} content block: {source}")]
	InvalidContentBlock {
		kind: String,
		source: serde_json::Error,
	},
	#[error("unsupported role: {0}")]
	InvalidRole(String),
	#[error("invalid tool choice: {0}")]
	InvalidToolChoice(String),
	#[error("invalid tool definition: {0}")]
	InvalidTool(serde_json::Error),
	#[error("invalid base64 image data: {0}")]
	InvalidImageData(base64::DecodeError),
	#[error("image url was not resolved to bytes: {0}")]
	UnresolvedImageUrl(String),
	#[error("remote image URLs are not allowed; enable ALLOW_IMAGE_URL_FETCH")]
	FetchDisabled,
	#[error("failed to fetch image: {0}")]
	ImageFetch(String),
	#[error("image exceeds the {0} byte limit")]
	ImageTooLarge(usize),
	#[error("unknown model '{0}'; configure MODEL_ID_MAP_JSON to map it to a Bedrock model id")]
	UnknownModel(String),
	#[error("bedrock error: {0}")]
	Provider(String),
	#[error("bedrock request failed: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("failed to marshal request: {0}")]
	RequestMarshal(serde_json::Error),
	#[error("failed to parse response: {0}")]
	ResponseParsing(serde_json::Error),
	#[error("failed to marshal response: {0}")]
	ResponseMarshal(serde_json::Error),
	#[error("response was missing fields")]
	IncompleteResponse,
	#[error("unrecognized stop reason: {0}")]
	UnrecognizedStopReason(String),
	#[error("malformed upstream event: {0}")]
	MalformedUpstreamEvent(String),
}

impl AIError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			AIError::Unauthorized => ErrorKind::Authentication,
			AIError::MissingField(_)
			| AIError::RequestParsing(_)
			| AIError::UnsupportedContentBlock(_)
			| AIError::InvalidContentBlock { .. }
			| AIError::InvalidRole(_)
			| AIError::InvalidToolChoice(_)
			| AIError::InvalidTool(_)
			| AIError::InvalidImageData(_)
			| AIError::UnresolvedImageUrl(_)
			| AIError::FetchDisabled
			| AIError::ImageFetch(_)
			| AIError::ImageTooLarge(_)
			| AIError::UnknownModel(_) => ErrorKind::InvalidRequest,
			AIError::Provider(_)
			| AIError::Transport(_)
			| AIError::RequestMarshal(_)
			| AIError::ResponseParsing(_)
			| AIError::ResponseMarshal(_)
			| AIError::IncompleteResponse
			| AIError::UnrecognizedStopReason(_)
			| AIError::MalformedUpstreamEvent(_) => ErrorKind::Provider,
		}
	}

	pub fn to_messages_error(&self) -> messages::MessagesError {
		messages::MessagesError {
			r#type: self.kind().as_str().to_string(),
			message: self.to_string(),
		}
	}

	pub fn to_error_response(&self) -> messages::MessagesErrorResponse {
		messages::MessagesErrorResponse {
			r#type: "error".to_string(),
			error: self.to_messages_error(),
		}
	}
}

/// One server-sent event: the event name and its single-line JSON payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
	pub name: &'static str,
	pub data: String,
}

impl TryFrom<messages::MessagesStreamEvent> for SseEvent {
	type Error = AIError;

	fn try_from(event: messages::MessagesStreamEvent) -> Result<Self, Self::Error> {
		let (name, event) = event.into_sse_tuple();
		let data = serde_json::to_string(&event).map_err(AIError::ResponseMarshal)?;
		Ok(SseEvent { name, data })
	}
}

pub enum Output {
	Response(messages::MessagesResponse),
	Stream(BoxStream<'static, Result<SseEvent, AIError>>),
}

impl std::fmt::Debug for Output {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Output::Response(r) => f.debug_tuple("Response").field(r).finish(),
			Output::Stream(_) => f.write_str("Stream(..)"),
		}
	}
}

/// Converts client requests into backend calls and backend output back into client output.
///
/// Holds no per-request state; one instance serves every request.
#[derive(Clone)]
pub struct Bridge {
	backend: Arc<dyn Backend>,
	models: ModelResolver,
	images: ImageFetcher,
	keepalive: Duration,
}

impl Bridge {
	pub fn new(
		backend: Arc<dyn Backend>,
		models: ModelResolver,
		images: ImageFetcher,
		keepalive: Duration,
	) -> Self {
		Bridge {
			backend,
			models,
			images,
			keepalive,
		}
	}

	/// Run one request. Errors returned here happen before any output was produced; once a
	/// stream is handed back, failures arrive in-band as an `error` event.
	pub async fn convert(&self, mut req: messages::Request, stream: bool) -> Result<Output, AIError> {
		let model = req.model.clone();
		let model_id = self.models.resolve(&model)?;
		self.images.resolve(&mut req.messages).await?;
		let converse = from_messages::translate(req, &model_id)?;
		info!(%model, %model_id, stream, "calling bedrock converse");

		if stream {
			let upstream = self.backend.converse_stream(&converse).await?;
			let events = conversion::stream::translate_stream(upstream, model, self.keepalive)
				.map(|ev| -> Result<SseEvent, AIError> {
					let ev = SseEvent::try_from(ev)?;
					tracing::trace!(event = ev.name, data = %ev.data, "SSE>");
					Ok(ev)
				});
			Ok(Output::Stream(events.boxed()))
		} else {
			let resp = self.backend.converse(&converse).await?;
			let out = from_messages::translate_response(resp, &model)?;
			debug!(stop_reason = ?out.stop_reason, usage = ?out.usage, "converse complete");
			Ok(Output::Response(out))
		}
	}
}
