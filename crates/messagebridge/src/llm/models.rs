use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::llm::AIError;

/// Ids that already name a Bedrock model: `<provider>.<model>`, optionally behind a cross-region
/// inference prefix, or a full ARN.
static BACKEND_ID: Lazy<Regex> = Lazy::new(|| {
	Regex::new(
		r"^(?:arn:aws[a-z-]*:bedrock:\S+|(?:(?:us|us-gov|eu|apac|jp|au|ca|global)\.)?(?:anthropic|amazon|meta|mistral|cohere|ai21|deepseek|qwen|openai|writer|twelvelabs|stability)\.[A-Za-z0-9._:-]+)$",
	)
	.expect("static regex")
});

/// Defaults for model families when the map has no entry.
const FAMILY_DEFAULTS: [(&str, &str); 3] = [
	("sonnet", "us.anthropic.claude-sonnet-4-20250514-v1:0"),
	("haiku", "anthropic.claude-3-haiku-20240307-v1:0"),
	("opus", "us.anthropic.claude-opus-4-20250514-v1:0"),
];

/// Maps client model names to backend model ids.
#[derive(Clone, Debug, Default)]
pub struct ModelResolver {
	map: HashMap<String, String>,
}

impl ModelResolver {
	pub fn new(map: HashMap<String, String>) -> Self {
		ModelResolver { map }
	}

	pub fn resolve(&self, model: &str) -> Result<String, AIError> {
		if model.is_empty() {
			return Err(AIError::MissingField("model"));
		}
		if let Some(id) = self.map.get(model) {
			return Ok(id.clone());
		}
		if BACKEND_ID.is_match(model) {
			return Ok(model.to_string());
		}
		let normalized = model.to_ascii_lowercase();
		if let Some((family, id)) = FAMILY_DEFAULTS
			.iter()
			.find(|(family, _)| normalized.contains(family))
		{
			debug!(%model, %family, model_id = %id, "using model family default");
			return Ok(id.to_string());
		}
		Err(AIError::UnknownModel(model.to_string()))
	}
}
