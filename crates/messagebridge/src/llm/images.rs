use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use tracing::debug;

use crate::llm::AIError;
use crate::llm::types::messages::typed as messages;

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Resolves remote image references to inline bytes, if allowed.
#[derive(Clone, Debug)]
pub struct ImageFetcher {
	client: reqwest::Client,
	allow_fetch: bool,
	max_bytes: usize,
}

impl ImageFetcher {
	pub fn new(client: reqwest::Client, allow_fetch: bool) -> Self {
		ImageFetcher {
			client,
			allow_fetch,
			max_bytes: DEFAULT_MAX_IMAGE_BYTES,
		}
	}

	pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
		self.max_bytes = max_bytes;
		self
	}

	/// Rewrite every URL image source in `msgs` into its base64 form.
	pub async fn resolve(&self, msgs: &mut [messages::Message]) -> Result<(), AIError> {
		for block in msgs.iter_mut().flat_map(|m| m.content.iter_mut()) {
			let messages::ContentBlock::Image { source } = block else {
				continue;
			};
			let messages::ImageSource::Url { url } = source else {
				continue;
			};
			let (media_type, bytes) = self.fetch_if_allowed(url).await?;
			*source = messages::ImageSource::Base64 {
				media_type,
				data: STANDARD.encode(&bytes),
			};
		}
		Ok(())
	}

	/// Fetch one image, returning its media type and bytes.
	pub async fn fetch_if_allowed(&self, url: &str) -> Result<(String, Bytes), AIError> {
		if !self.allow_fetch {
			return Err(AIError::FetchDisabled);
		}
		let url = url::Url::parse(url).map_err(|e| AIError::ImageFetch(format!("{url}: {e}")))?;
		if !matches!(url.scheme(), "http" | "https") {
			return Err(AIError::ImageFetch(format!(
				"unsupported scheme '{}'",
				url.scheme()
			)));
		}
		debug!(%url, "fetching image");
		let mut resp = self
			.client
			.get(url.clone())
			.send()
			.await
			.and_then(|r| r.error_for_status())
			.map_err(|e| AIError::ImageFetch(e.to_string()))?;

		let media_type = resp
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.split(';').next())
			.map(|v| v.trim().to_ascii_lowercase())
			.unwrap_or_default();
		if !media_type.starts_with("image/") {
			return Err(AIError::ImageFetch(format!(
				"{url} has content type '{media_type}', expected image/*"
			)));
		}
		if resp
			.content_length()
			.is_some_and(|len| len > self.max_bytes as u64)
		{
			return Err(AIError::ImageTooLarge(self.max_bytes));
		}

		let mut buf = BytesMut::new();
		while let Some(chunk) = resp
			.chunk()
			.await
			.map_err(|e| AIError::ImageFetch(e.to_string()))?
		{
			if buf.len() + chunk.len() > self.max_bytes {
				return Err(AIError::ImageTooLarge(self.max_bytes));
			}
			buf.extend_from_slice(&chunk);
		}
		Ok((media_type, buf.freeze()))
	}
}
