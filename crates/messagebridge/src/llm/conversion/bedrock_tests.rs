use assert_matches::assert_matches;
use rstest::rstest;
use serde_json::{Map, Value, json};

use super::*;
use crate::llm::AIError;
use crate::llm::types::messages::Request as RawRequest;

fn text(t: &str) -> messages::ContentBlock {
	messages::ContentBlock::Text(messages::ContentTextBlock::from(t))
}

fn request(msgs: Vec<messages::Message>) -> messages::Request {
	messages::Request {
		model: "claude-sonnet-4".to_string(),
		messages: msgs,
		system: vec![],
		max_tokens: None,
		temperature: None,
		top_p: None,
		stop_sequences: None,
		stream: false,
		tools: vec![],
		tool_choice: None,
		passthrough: Map::new(),
	}
}

fn ingest(body: Value) -> messages::Request {
	let raw: RawRequest = serde_json::from_value(body).unwrap();
	raw.try_into().unwrap()
}

fn wire(req: &bedrock::ConverseRequest) -> Value {
	serde_json::to_value(req).unwrap()
}

#[test]
fn test_content_blocks_round_trip() {
	let blocks = vec![
		text("hello"),
		messages::ContentBlock::Image {
			source: messages::ImageSource::Base64 {
				media_type: "image/png".to_string(),
				data: "iVBORw0KGgo=".to_string(),
			},
		},
		messages::ContentBlock::ToolUse {
			id: "t1".to_string(),
			name: "fs_read".to_string(),
			input: json!({"path": "a.txt", "opts": {"follow": true}}),
		},
		messages::ContentBlock::ToolResult {
			tool_use_id: "t1".to_string(),
			content: vec![messages::ToolResultContentPart::Text {
				text: "contents".to_string(),
			}],
			is_error: false,
		},
		messages::ContentBlock::ToolResult {
			tool_use_id: "t2".to_string(),
			content: vec![
				messages::ToolResultContentPart::Text {
					text: "rows:".to_string(),
				},
				messages::ToolResultContentPart::Json {
					json: json!([{"id": 1}]),
				},
			],
			is_error: true,
		},
	];
	for block in blocks {
		let back = codec::to_client(codec::to_backend(block.clone()).unwrap());
		assert_eq!(back, block);
	}
}

#[rstest]
#[case::bare_string(json!("ok"))]
#[case::single_text_entry(json!([{"type": "text", "text": "ok"}]))]
fn test_single_text_tool_result_round_trip(#[case] content: Value) {
	let block: messages::ContentBlock = serde_json::from_value(
		json!({"type": "tool_result", "tool_use_id": "t1", "content": content}),
	)
	.unwrap();
	let back = codec::to_client(codec::to_backend(block.clone()).unwrap());
	assert_eq!(back, block);
	assert_eq!(
		serde_json::to_value(&back).unwrap(),
		json!({"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "ok"}]})
	);
}

#[test]
fn test_object_tool_result_is_a_json_entry() {
	let block: messages::ContentBlock = serde_json::from_value(json!({
		"type": "tool_result",
		"tool_use_id": "t1",
		"content": {"rows": 2}
	}))
	.unwrap();
	assert_eq!(
		serde_json::to_value(codec::to_backend(block).unwrap()).unwrap(),
		json!({"toolResult": {
			"toolUseId": "t1",
			"content": [{"json": {"rows": 2}}],
			"status": "success"
		}})
	);
}

#[test]
fn test_null_tool_result_content_is_empty() {
	let block: messages::ContentBlock = serde_json::from_value(
		json!({"type": "tool_result", "tool_use_id": "t1", "content": null}),
	)
	.unwrap();
	assert_matches!(block, messages::ContentBlock::ToolResult { content, .. } if content.is_empty());
}

#[test]
fn test_error_tool_result_with_bare_string() {
	let block: messages::ContentBlock = serde_json::from_value(json!({
		"type": "tool_result",
		"tool_use_id": "t9",
		"content": "file not found",
		"is_error": true
	}))
	.unwrap();
	let backend = codec::to_backend(block.clone()).unwrap();
	assert_eq!(
		serde_json::to_value(&backend).unwrap(),
		json!({"toolResult": {
			"toolUseId": "t9",
			"content": [{"text": "file not found"}],
			"status": "error"
		}})
	);
	assert_eq!(codec::to_client(backend), block);
}

#[rstest]
#[case::success(Some("success"), false)]
#[case::error(Some("error"), true)]
#[case::unknown(Some("partial"), true)]
#[case::absent(None, false)]
fn test_tool_result_status_to_is_error(#[case] status: Option<&str>, #[case] is_error: bool) {
	let mut raw = json!({"toolUseId": "t", "content": [{"json": {"k": 1}}]});
	if let Some(status) = status {
		raw["status"] = json!(status);
	}
	let block: bedrock::ToolResultBlock = serde_json::from_value(raw).unwrap();
	assert_matches!(
		codec::to_client(bedrock::ContentBlock::ToolResult(block)),
		messages::ContentBlock::ToolResult { is_error: e, .. } if e == is_error
	);
}

#[test]
fn test_image_decoding() {
	let ok = codec::to_backend(messages::ContentBlock::Image {
		source: messages::ImageSource::Base64 {
			media_type: "image/JPEG".to_string(),
			data: "AQID".to_string(),
		},
	})
	.unwrap();
	assert_eq!(
		serde_json::to_value(&ok).unwrap(),
		json!({"image": {"format": "jpeg", "source": {"bytes": "AQID"}}})
	);

	let bad = codec::to_backend(messages::ContentBlock::Image {
		source: messages::ImageSource::Base64 {
			media_type: "image/png".to_string(),
			data: "not base64!".to_string(),
		},
	});
	assert_matches!(bad, Err(AIError::InvalidImageData(_)));

	let url = codec::to_backend(messages::ContentBlock::Image {
		source: messages::ImageSource::Url {
			url: "https://example.com/a.png".to_string(),
		},
	});
	assert_matches!(url, Err(AIError::UnresolvedImageUrl(_)));
}

#[test]
fn test_image_media_type_is_case_insensitive() {
	let block = codec::to_backend(messages::ContentBlock::Image {
		source: messages::ImageSource::Base64 {
			media_type: "IMAGE/PNG".to_string(),
			data: "AQID".to_string(),
		},
	})
	.unwrap();
	assert_matches!(block, bedrock::ContentBlock::Image(img) if img.format == "png");
}

#[test]
fn test_translate_full_request() {
	let req = ingest(json!({
		"model": "claude-sonnet-4",
		"system": [{"type": "text", "text": "one"}, {"type": "text", "text": "two"}],
		"max_tokens": 1024,
		"temperature": 0.5,
		"stop_sequences": ["STOP"],
		"tools": [{
			"name": "fs_read",
			"description": "read a file",
			"input_schema": {"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}
		}],
		"tool_choice": "auto",
		"top_k": 40,
		"thinking": {"type": "enabled", "budget_tokens": 2048},
		"messages": [
			{"role": "user", "content": "list files"},
			{"role": "assistant", "content": [
				{"type": "text", "text": "ok"},
				{"type": "tool_use", "id": "t1", "name": "fs_read", "input": {"path": "."}}
			]},
			{"role": "tool", "content": [
				{"type": "tool_result", "tool_use_id": "t1", "content": "a.txt"}
			]},
			{"role": "user", "content": []}
		]
	}));
	let out = from_messages::translate(req, "us.anthropic.claude-sonnet-4-20250514-v1:0").unwrap();
	assert_eq!(out.model_id, "us.anthropic.claude-sonnet-4-20250514-v1:0");
	assert_eq!(
		wire(&out),
		json!({
			"messages": [
				{"role": "user", "content": [{"text": "list files"}]},
				{"role": "assistant", "content": [
					{"text": "ok"},
					{"toolUse": {"toolUseId": "t1", "name": "fs_read", "input": {"path": "."}}}
				]},
				{"role": "user", "content": [
					{"toolResult": {"toolUseId": "t1", "content": [{"text": "a.txt"}], "status": "success"}}
				]},
				{"role": "user", "content": []}
			],
			"system": [{"text": "one"}, {"text": "two"}],
			"inferenceConfig": {"maxTokens": 1024, "temperature": 0.5, "stopSequences": ["STOP"]},
			"toolConfig": {
				"tools": [{"toolSpec": {
					"name": "fs_read",
					"description": "read a file",
					"inputSchema": {"json": {"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}}
				}}],
				"toolChoice": {"auto": {}}
			},
			"additionalModelRequestFields": {
				"top_k": 40,
				"thinking": {"type": "enabled", "budget_tokens": 2048}
			}
		})
	);
}

#[test]
fn test_minimal_request_omits_optional_sections() {
	let out = from_messages::translate(request(vec![]), "m").unwrap();
	assert_eq!(wire(&out), json!({"messages": []}));
}

#[test]
fn test_tool_choice_without_tools_is_dropped() {
	let mut req = request(vec![messages::Message {
		role: messages::Role::User,
		content: vec![text("hi")],
	}]);
	req.tool_choice = Some(messages::ToolChoice::Any);
	let out = from_messages::translate(req, "m").unwrap();
	assert!(out.tool_config.is_none());
	assert!(wire(&out).get("toolConfig").is_none());
}

#[test]
fn test_passthrough_keeps_order_and_values() {
	let req = ingest(json!({
		"model": "m",
		"messages": [],
		"zeta": 1,
		"alpha": {"nested": [1, 2]},
		"mid": null
	}));
	let out = from_messages::translate(req, "m").unwrap();
	let extra = out.additional_model_request_fields.unwrap();
	assert_eq!(extra.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
	assert_eq!(extra["alpha"], json!({"nested": [1, 2]}));
	assert_eq!(extra["mid"], Value::Null);
}

#[rstest]
#[case::auto(messages::ToolChoice::Auto, json!({"auto": {}}))]
#[case::any(messages::ToolChoice::Any, json!({"any": {}}))]
#[case::none(messages::ToolChoice::None, json!({"none": {}}))]
#[case::named(messages::ToolChoice::Tool { name: "x".to_string() }, json!({"tool": {"name": "x"}}))]
fn test_tool_choice_mapping(#[case] choice: messages::ToolChoice, #[case] expected: Value) {
	let backend = from_messages::translate_tool_choice(choice.clone());
	assert_eq!(serde_json::to_value(&backend).unwrap(), expected);
	assert_eq!(from_messages::tool_choice_to_client(backend), choice);
}

#[rstest]
#[case::end_turn("end_turn", messages::StopReason::EndTurn)]
#[case::tool_use("tool_use", messages::StopReason::ToolUse)]
#[case::max_tokens("max_tokens", messages::StopReason::MaxTokens)]
#[case::stop_sequence("stop_sequence", messages::StopReason::StopSequence)]
fn test_stop_reason_identity(#[case] tag: &str, #[case] expected: messages::StopReason) {
	let backend: bedrock::StopReason = serde_json::from_value(json!(tag)).unwrap();
	assert_eq!(from_messages::translate_stop_reason(backend).unwrap(), expected);
	assert_eq!(serde_json::to_value(expected).unwrap(), json!(tag));
}

#[test]
fn test_unknown_stop_reason_is_an_error() {
	let backend: bedrock::StopReason = serde_json::from_value(json!("guardrail_intervened")).unwrap();
	assert_matches!(
		from_messages::translate_stop_reason(backend),
		Err(AIError::UnrecognizedStopReason(r)) if r == "guardrail_intervened"
	);
}

#[test]
fn test_translate_response() {
	let resp: bedrock::ConverseResponse = serde_json::from_value(json!({
		"output": {"message": {"role": "assistant", "content": [
			{"text": "Let me check."},
			{"toolUse": {"toolUseId": "tu_1", "name": "fs_read", "input": {"path": "a.txt"}}}
		]}},
		"stopReason": "stop_sequence",
		"usage": {"inputTokens": 12, "outputTokens": 7, "totalTokens": 19, "cacheReadInputTokens": 3},
		"additionalModelResponseFields": {"stop_sequence": "STOP"},
		"metrics": {"latencyMs": 100}
	}))
	.unwrap();
	let out = from_messages::translate_response(resp, "claude-sonnet-4").unwrap();
	assert!(out.id.starts_with("msg_"));
	assert_eq!(out.id.len(), 28);
	let mut value = serde_json::to_value(&out).unwrap();
	value["id"] = json!("msg_fixed");
	assert_eq!(
		value,
		json!({
			"id": "msg_fixed",
			"type": "message",
			"role": "assistant",
			"content": [
				{"type": "text", "text": "Let me check."},
				{"type": "tool_use", "id": "tu_1", "name": "fs_read", "input": {"path": "a.txt"}}
			],
			"model": "claude-sonnet-4",
			"stop_reason": "stop_sequence",
			"stop_sequence": "STOP",
			"usage": {"input_tokens": 12, "output_tokens": 7, "cache_read_input_tokens": 3}
		})
	);
}

#[test]
fn test_translate_response_requires_output() {
	let resp: bedrock::ConverseResponse =
		serde_json::from_value(json!({"stopReason": "end_turn"})).unwrap();
	assert_matches!(
		from_messages::translate_response(resp, "m"),
		Err(AIError::IncompleteResponse)
	);
}

#[test]
fn test_message_ids_are_unique() {
	let a = helpers::generate_message_id();
	let b = helpers::generate_message_id();
	assert_ne!(a, b);
	assert!(a[4..].chars().all(|c| c.is_ascii_hexdigit()));
}
