use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MAX_LOGGED_STRING: usize = 200;

/// Install the global subscriber. `RUST_LOG` overrides the default `info` level.
pub fn setup_logging(json: bool) -> anyhow::Result<()> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	if json {
		registry
			.with(tracing_subscriber::fmt::layer().json().flatten_event(true))
			.try_init()?;
	} else {
		registry.with(tracing_subscriber::fmt::layer()).try_init()?;
	}
	Ok(())
}

/// Copy of `value` that is safe to log: long strings are cut and inline image payloads are
/// replaced by their length.
pub fn sanitize_for_log(value: &Value) -> Value {
	match value {
		Value::String(s) => Value::String(truncate(s)),
		Value::Array(items) => Value::Array(items.iter().map(sanitize_for_log).collect()),
		Value::Object(obj) => Value::Object(
			obj
				.iter()
				.map(|(k, v)| (k.clone(), sanitize_entry(k, v)))
				.collect::<Map<_, _>>(),
		),
		other => other.clone(),
	}
}

fn sanitize_entry(key: &str, value: &Value) -> Value {
	match (key, value) {
		// Messages image source: {"type": "base64", "media_type": ..., "data": ...}
		("source", Value::Object(src)) if src.get("type").and_then(Value::as_str) == Some("base64") => {
			let mut out = Map::new();
			for (k, v) in src {
				let v = match (k.as_str(), v) {
					("data", Value::String(data)) => base64_marker(data),
					_ => sanitize_for_log(v),
				};
				out.insert(k.clone(), v);
			}
			Value::Object(out)
		},
		// Converse image source: {"bytes": ...}
		("bytes", Value::String(data)) => base64_marker(data),
		_ => sanitize_for_log(value),
	}
}

fn base64_marker(data: &str) -> Value {
	Value::String(format!("<base64 len={}>", data.len()))
}

fn truncate(s: &str) -> String {
	let len = s.chars().count();
	if len <= MAX_LOGGED_STRING {
		return s.to_string();
	}
	let head: String = s.chars().take(MAX_LOGGED_STRING).collect();
	format!("{head}...<truncated len={len}>")
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn long_strings_are_truncated() {
		let long = "x".repeat(250);
		let out = sanitize_for_log(&json!({"messages": [{"content": long}]}));
		let logged = out["messages"][0]["content"].as_str().unwrap();
		assert!(logged.starts_with(&"x".repeat(200)));
		assert!(logged.ends_with("...<truncated len=250>"));
		assert_eq!(sanitize_for_log(&json!("short")), json!("short"));
	}

	#[test]
	fn image_payloads_are_replaced() {
		let out = sanitize_for_log(&json!({
			"content": [{
				"type": "image",
				"source": {"type": "base64", "media_type": "image/png", "data": "QUJD"}
			}],
			"image": {"format": "png", "source": {"bytes": "QUJDRA=="}},
			"max_tokens": 10
		}));
		assert_eq!(
			out,
			json!({
				"content": [{
					"type": "image",
					"source": {"type": "base64", "media_type": "image/png", "data": "<base64 len=4>"}
				}],
				"image": {"format": "png", "source": {"bytes": "<base64 len=8>"}},
				"max_tokens": 10
			})
		);
	}
}
