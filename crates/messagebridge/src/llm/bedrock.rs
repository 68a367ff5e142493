use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::header::{ACCEPT, CONTENT_TYPE};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::llm::AIError;
use crate::llm::types::bedrock::{
	ConverseErrorResponse, ConverseRequest, ConverseResponse, ConverseStreamOutput,
};
use crate::parse;
use crate::telemetry::sanitize_for_log;

/// Characters left unescaped in a model id path segment. Everything else (notably `:` and `/`
/// in versioned ids and ARNs) is percent-encoded.
const MODEL_ID: &AsciiSet = &NON_ALPHANUMERIC
	.remove(b'-')
	.remove(b'.')
	.remove(b'_')
	.remove(b'~');

/// The backend call surface.
#[async_trait]
pub trait Backend: Send + Sync {
	async fn converse(&self, req: &ConverseRequest) -> Result<ConverseResponse, AIError>;

	async fn converse_stream(
		&self,
		req: &ConverseRequest,
	) -> Result<BoxStream<'static, Result<ConverseStreamOutput, AIError>>, AIError>;
}

#[derive(Debug, Clone)]
pub struct Provider {
	pub region: String,
	/// Overrides the regional endpoint, e.g. for a VPC endpoint or a test server.
	pub endpoint: Option<String>,
}

impl Provider {
	pub fn get_host(&self) -> String {
		format!("bedrock-runtime.{}.amazonaws.com", self.region)
	}

	pub fn base_url(&self) -> String {
		match &self.endpoint {
			Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
			None => format!("https://{}", self.get_host()),
		}
	}

	pub fn get_path(&self, streaming: bool, model: &str) -> String {
		let model = utf8_percent_encode(model, MODEL_ID);
		if streaming {
			format!("/model/{model}/converse-stream")
		} else {
			format!("/model/{model}/converse")
		}
	}
}

/// Calls the Converse REST API directly, authenticating with a Bedrock API key.
pub struct HttpBackend {
	client: reqwest::Client,
	provider: Provider,
	token: Option<SecretString>,
	timeout: Duration,
}

impl HttpBackend {
	pub fn new(
		client: reqwest::Client,
		provider: Provider,
		token: Option<SecretString>,
		timeout: Duration,
	) -> Self {
		HttpBackend {
			client,
			provider,
			token,
			timeout,
		}
	}

	async fn send(&self, req: &ConverseRequest, streaming: bool) -> Result<reqwest::Response, AIError> {
		let body = serde_json::to_vec(req).map_err(AIError::RequestMarshal)?;
		if tracing::enabled!(tracing::Level::DEBUG)
			&& let Ok(v) = serde_json::to_value(req)
		{
			debug!(model_id = %req.model_id, body = %sanitize_for_log(&v), "bedrock request");
		}
		let url = format!(
			"{}{}",
			self.provider.base_url(),
			self.provider.get_path(streaming, &req.model_id)
		);
		let accept = if streaming {
			"application/vnd.amazon.eventstream"
		} else {
			"application/json"
		};
		let mut builder = self
			.client
			.post(url)
			.header(CONTENT_TYPE, "application/json")
			.header(ACCEPT, accept)
			.body(body);
		if !streaming {
			builder = builder.timeout(self.timeout);
		}
		if let Some(token) = &self.token {
			builder = builder.bearer_auth(token.expose_secret());
		}
		let resp = builder.send().await?;
		let status = resp.status();
		if status.is_success() {
			return Ok(resp);
		}
		let bytes = resp.bytes().await.unwrap_or_default();
		let message = translate_error(&bytes);
		warn!(%status, %message, "bedrock rejected the request");
		Err(AIError::Provider(format!("{status}: {message}")))
	}
}

fn translate_error(bytes: &Bytes) -> String {
	match serde_json::from_slice::<ConverseErrorResponse>(bytes) {
		Ok(err) => err.message,
		Err(_) => String::from_utf8_lossy(bytes).into_owned(),
	}
}

#[async_trait]
impl Backend for HttpBackend {
	async fn converse(&self, req: &ConverseRequest) -> Result<ConverseResponse, AIError> {
		let resp = self.send(req, false).await?;
		let bytes = resp.bytes().await?;
		serde_json::from_slice(&bytes).map_err(AIError::ResponseParsing)
	}

	async fn converse_stream(
		&self,
		req: &ConverseRequest,
	) -> Result<BoxStream<'static, Result<ConverseStreamOutput, AIError>>, AIError> {
		let resp = self.send(req, true).await?;
		Ok(parse::aws_sse::converse_events(resp.bytes_stream()))
	}
}
