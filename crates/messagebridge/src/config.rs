use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// The on-disk configuration file. Every field is optional; environment variables win over it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawConfig {
	listen: Option<String>,
	region: Option<String>,
	endpoint: Option<String>,
	allow_image_url_fetch: Option<bool>,
	model_id_map: Option<HashMap<String, String>>,
	keepalive_interval: Option<String>,
	request_timeout: Option<String>,
	json_logs: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
	pub listen: SocketAddr,
	pub region: String,
	/// Replaces `https://bedrock-runtime.<region>.amazonaws.com`.
	pub endpoint: Option<String>,
	pub bedrock_token: Option<SecretString>,
	/// When set, clients must send it as `x-api-key`.
	pub proxy_api_key: Option<SecretString>,
	pub allow_image_url_fetch: bool,
	pub model_id_map: HashMap<String, String>,
	pub keepalive_interval: Duration,
	pub request_timeout: Duration,
	pub json_logs: bool,
}

/// Build the configuration from an optional YAML document and the process environment.
pub fn parse_config(contents: Option<&str>) -> anyhow::Result<Config> {
	let raw = match contents {
		Some(c) => serde_yaml::from_str(c).context("invalid config file")?,
		None => RawConfig::default(),
	};
	from_raw(raw, |k| std::env::var(k).ok())
}

pub fn from_raw(raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
	let env = |k: &str| env(k).filter(|v| !v.trim().is_empty());

	let listen = env("LISTEN_ADDR")
		.or(raw.listen)
		.unwrap_or_else(|| DEFAULT_LISTEN.to_string());
	let listen: SocketAddr = listen
		.parse()
		.with_context(|| format!("invalid listen address {listen}"))?;

	let region = env("AWS_REGION")
		.or_else(|| env("AWS_DEFAULT_REGION"))
		.or(raw.region)
		.unwrap_or_else(|| DEFAULT_REGION.to_string());

	let model_id_map = match env("MODEL_ID_MAP_JSON") {
		Some(v) => parse_model_map(&v)?,
		None => raw.model_id_map.unwrap_or_default(),
	};

	let keepalive_interval = match env("KEEPALIVE_INTERVAL").or(raw.keepalive_interval) {
		Some(d) => parse_duration(&d)?,
		None => DEFAULT_KEEPALIVE,
	};
	if keepalive_interval.is_zero() {
		anyhow::bail!("keepalive interval must be positive");
	}
	let request_timeout = match env("REQUEST_TIMEOUT").or(raw.request_timeout) {
		Some(d) => parse_duration(&d)?,
		None => DEFAULT_REQUEST_TIMEOUT,
	};

	Ok(Config {
		listen,
		region,
		endpoint: env("BEDROCK_ENDPOINT").or(raw.endpoint),
		bedrock_token: env("AWS_BEARER_TOKEN_BEDROCK").map(|v| SecretString::new(v.into())),
		proxy_api_key: env("PROXY_API_KEY").map(|v| SecretString::new(v.into())),
		allow_image_url_fetch: env("ALLOW_IMAGE_URL_FETCH")
			.map(|v| parse_flag(&v))
			.or(raw.allow_image_url_fetch)
			.unwrap_or_default(),
		model_id_map,
		keepalive_interval,
		request_timeout,
		json_logs: env("LOG_FORMAT")
			.map(|v| v.eq_ignore_ascii_case("json"))
			.or(raw.json_logs)
			.unwrap_or_default(),
	})
}

fn parse_flag(v: &str) -> bool {
	matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
	let nanos = go_parse_duration::parse_duration(s.trim())
		.map_err(|e| anyhow!("invalid duration {s:?}: {e:?}"))?;
	u64::try_from(nanos)
		.map(Duration::from_nanos)
		.map_err(|_| anyhow!("duration {s:?} must not be negative"))
}

/// Accepts a JSON object, `@<path>` to a file holding one, or `alias=id;alias2=id2`.
pub fn parse_model_map(raw: &str) -> anyhow::Result<HashMap<String, String>> {
	let raw = raw.trim();
	if let Some(path) = raw.strip_prefix('@') {
		return read_model_map(Path::new(path));
	}
	if raw.starts_with('{') {
		return serde_json::from_str(raw).context("MODEL_ID_MAP_JSON is not a JSON object of strings");
	}
	raw
		.split(';')
		.map(str::trim)
		.filter(|pair| !pair.is_empty())
		.map(|pair| {
			let (k, v) = pair
				.split_once('=')
				.ok_or_else(|| anyhow!("invalid model mapping {pair:?}, expected alias=model-id"))?;
			Ok((k.trim().to_string(), v.trim().to_string()))
		})
		.collect()
}

fn read_model_map(path: &Path) -> anyhow::Result<HashMap<String, String>> {
	let contents = fs_err::read_to_string(path)?;
	serde_json::from_str(&contents).with_context(|| format!("invalid model map in {}", path.display()))
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use secrecy::ExposeSecret;

	use super::*;

	fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |k| map.get(k).cloned()
	}

	#[test]
	fn defaults() {
		let cfg = from_raw(RawConfig::default(), env_of(&[])).unwrap();
		assert_eq!(cfg.listen, "127.0.0.1:8080".parse().unwrap());
		assert_eq!(cfg.region, "us-east-1");
		assert!(!cfg.allow_image_url_fetch);
		assert!(cfg.proxy_api_key.is_none());
		assert!(cfg.model_id_map.is_empty());
		assert_eq!(cfg.keepalive_interval, Duration::from_secs(15));
		assert_eq!(cfg.request_timeout, Duration::from_secs(300));
		assert!(!cfg.json_logs);
	}

	#[test]
	fn environment_overrides_file() {
		let raw: RawConfig = serde_yaml::from_str(
			r#"
region: eu-west-1
allowImageUrlFetch: false
keepaliveInterval: 30s
modelIdMap:
  fast: anthropic.claude-3-haiku-20240307-v1:0
"#,
		)
		.unwrap();
		let cfg = from_raw(
			raw,
			env_of(&[
				("AWS_DEFAULT_REGION", "ap-south-1"),
				("ALLOW_IMAGE_URL_FETCH", "Yes"),
				("PROXY_API_KEY", "sekret"),
				("KEEPALIVE_INTERVAL", "1m30s"),
				("LOG_FORMAT", "json"),
			]),
		)
		.unwrap();
		assert_eq!(cfg.region, "ap-south-1");
		assert!(cfg.allow_image_url_fetch);
		assert_eq!(cfg.proxy_api_key.unwrap().expose_secret(), "sekret");
		assert_eq!(cfg.keepalive_interval, Duration::from_secs(90));
		assert_eq!(cfg.model_id_map["fast"], "anthropic.claude-3-haiku-20240307-v1:0");
		assert!(cfg.json_logs);
	}

	#[test]
	fn aws_region_beats_default_region() {
		let cfg = from_raw(
			RawConfig::default(),
			env_of(&[("AWS_REGION", "us-west-2"), ("AWS_DEFAULT_REGION", "eu-west-1")]),
		)
		.unwrap();
		assert_eq!(cfg.region, "us-west-2");
	}

	#[test]
	fn unknown_file_keys_are_rejected() {
		assert!(serde_yaml::from_str::<RawConfig>("regoin: us-east-1").is_err());
	}

	#[test]
	fn model_map_forms() {
		let json = parse_model_map(r#"{"a": "anthropic.x-v1:0"}"#).unwrap();
		assert_eq!(json["a"], "anthropic.x-v1:0");

		let pairs = parse_model_map("a = anthropic.x-v1:0; b=amazon.y ;").unwrap();
		assert_eq!(pairs.len(), 2);
		assert_eq!(pairs["b"], "amazon.y");

		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"c": "meta.z"}}"#).unwrap();
		let from_file = parse_model_map(&format!("@{}", file.path().display())).unwrap();
		assert_eq!(from_file["c"], "meta.z");

		assert!(parse_model_map("{not json").is_err());
		assert!(parse_model_map("novalue").is_err());
	}

	#[test]
	fn bad_durations_fail() {
		assert!(from_raw(RawConfig::default(), env_of(&[("KEEPALIVE_INTERVAL", "soon")])).is_err());
		assert!(from_raw(RawConfig::default(), env_of(&[("KEEPALIVE_INTERVAL", "0s")])).is_err());
	}
}
