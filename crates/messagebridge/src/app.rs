use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::bedrock::{HttpBackend, Provider};
use crate::llm::images::ImageFetcher;
use crate::llm::models::ModelResolver;
use crate::llm::types::messages;
use crate::llm::{AIError, Bridge, Output};
use crate::telemetry::sanitize_for_log;

#[derive(Clone)]
struct AppState {
	bridge: Bridge,
	api_key: Option<Arc<SecretString>>,
}

impl IntoResponse for AIError {
	fn into_response(self) -> Response {
		let kind = self.kind();
		(kind.status_code(), Json(self.to_error_response())).into_response()
	}
}

pub fn router(bridge: Bridge, api_key: Option<SecretString>) -> Router {
	let state = AppState {
		bridge,
		api_key: api_key.map(Arc::new),
	};
	Router::new()
		.route("/healthz", get(healthz))
		.route("/v1/messages", post(create_message))
		.with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
	Json(json!({"status": "ok"}))
}

fn check_api_key(expected: Option<&SecretString>, headers: &HeaderMap) -> Result<(), AIError> {
	let Some(expected) = expected else {
		return Ok(());
	};
	match headers.get("x-api-key") {
		Some(provided) if provided.as_bytes().ct_eq(expected.expose_secret().as_bytes()).into() => Ok(()),
		_ => Err(AIError::Unauthorized),
	}
}

async fn create_message(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, AIError> {
	check_api_key(state.api_key.as_deref(), &headers)?;

	if tracing::enabled!(tracing::Level::DEBUG)
		&& let Ok(raw) = serde_json::from_slice::<serde_json::Value>(&body)
	{
		debug!(body = %sanitize_for_log(&raw), "incoming /v1/messages");
	}
	let req: messages::Request = serde_json::from_slice(&body).map_err(AIError::RequestParsing)?;
	let req = messages::typed::Request::try_from(req).inspect_err(|e| warn!(error = %e, "rejected request"))?;
	let stream = req.stream;

	match state.bridge.convert(req, stream).await {
		Ok(Output::Response(resp)) => Ok(Json(resp).into_response()),
		Ok(Output::Stream(events)) => {
			let events = events.map(|ev| ev.map(|ev| Event::default().event(ev.name).data(ev.data)));
			Ok(Sse::new(events).into_response())
		},
		Err(e) => {
			warn!(error = %e, kind = e.kind().as_str(), "request failed");
			Err(e)
		},
	}
}

/// Build the bridge from configuration and serve until interrupted.
pub async fn serve(config: Config) -> anyhow::Result<()> {
	let client = reqwest::Client::builder()
		.connect_timeout(Duration::from_secs(10))
		.read_timeout(config.request_timeout)
		.build()?;
	let backend = HttpBackend::new(
		client.clone(),
		Provider {
			region: config.region.clone(),
			endpoint: config.endpoint.clone(),
		},
		config.bedrock_token,
		config.request_timeout,
	);
	let bridge = Bridge::new(
		Arc::new(backend),
		ModelResolver::new(config.model_id_map),
		ImageFetcher::new(client, config.allow_image_url_fetch),
		config.keepalive_interval,
	);
	let app = router(bridge, config.proxy_api_key);

	let listener = TcpListener::bind(config.listen).await?;
	info!(address = %listener.local_addr()?, region = %config.region, "listening");
	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutting down");
		})
		.await?;
	Ok(())
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
