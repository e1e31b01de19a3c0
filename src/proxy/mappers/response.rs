use super::models::*;
use serde_json::Value;

fn random_tool_id() -> String {
    use rand::Rng;
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..24)
        .map(|_| HEX[rng.gen_range(0..16)] as char)
        .collect();
    format!("toolu_{}", suffix)
}

fn convert_part(part: &Part, blocks: &mut Vec<ContentBlock>) {
    if let Some(fc) = &part.function_call {
        blocks.push(ContentBlock::ToolUse {
            id: fc.id.clone().unwrap_or_else(random_tool_id),
            name: fc.name.clone(),
            input: fc.args.clone().unwrap_or_else(|| Value::Object(Default::default())),
            thought_signature: part.thought_signature.clone(),
        });
        return;
    }

    if part.thought.unwrap_or(false) {
        blocks.push(ContentBlock::Thinking {
            thinking: part.text.clone().unwrap_or_default(),
            signature: part.thought_signature.clone(),
        });
        return;
    }

    if let Some(text) = &part.text {
        blocks.push(ContentBlock::Text { text: text.clone() });
        return;
    }

    if let Some(img) = &part.inline_data {
        blocks.push(ContentBlock::Image {
            source: ImageSource {
                source_type: "base64".to_string(),
                media_type: img.mime_type.clone(),
                data: img.data.clone(),
            },
        });
    }
}

fn map_stop_reason(finish_reason: Option<&str>, has_tool_call: bool) -> &'static str {
    if has_tool_call {
        return "tool_use";
    }
    match finish_reason {
        Some("MAX_TOKENS") => "max_tokens",
        Some("TOOL_USE") => "tool_use",
        _ => "end_turn",
    }
}

fn to_usage(metadata: Option<&UsageMetadata>) -> Usage {
    let Some(metadata) = metadata else {
        return Usage::default();
    };
    let prompt = metadata.prompt_token_count.unwrap_or(0);
    let cached = metadata.cached_content_token_count.unwrap_or(0);
    Usage {
        input_tokens: (prompt - cached).max(0),
        cache_read_input_tokens: cached,
        output_tokens: metadata.candidates_token_count.unwrap_or(0),
    }
}

/// Map the upstream Google response to the Anthropic-style message shape.
/// Total: any input (including a `{response: …}` wrapper, empty candidates,
/// or garbage) yields a well-formed envelope with at least one block.
pub fn convert_google_to_anthropic(raw: &Value, model_name: &str) -> AnthropicMessage {
    let unwrapped = raw.get("response").unwrap_or(raw);
    let response: GoogleResponse =
        serde_json::from_value(unwrapped.clone()).unwrap_or_default();

    let mut blocks = Vec::new();
    let first_candidate = response.candidates.as_ref().and_then(|c| c.first());
    if let Some(content) = first_candidate.and_then(|c| c.content.as_ref()) {
        for part in &content.parts {
            convert_part(part, &mut blocks);
        }
    }
    if blocks.is_empty() {
        blocks.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    let has_tool_call = blocks
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
    let finish_reason = first_candidate.and_then(|c| c.finish_reason.as_deref());

    AnthropicMessage {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        message_type: "message".to_string(),
        role: "assistant".to_string(),
        model: model_name.to_string(),
        content: blocks,
        stop_reason: map_stop_reason(finish_reason, has_tool_call).to_string(),
        usage: to_usage(response.usage_metadata.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thinking_then_text() {
        let signature = format!("sig_{}", "x".repeat(60));
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "I am thinking...", "thought": true, "thoughtSignature": signature},
                    {"text": "Here is the result."}
                ]},
                "finishReason": "STOP"
            }]
        });

        let message = convert_google_to_anthropic(&raw, "claude-3-5-sonnet-20241022");
        assert_eq!(message.message_type, "message");
        assert_eq!(message.role, "assistant");
        assert_eq!(message.model, "claude-3-5-sonnet-20241022");
        assert_eq!(message.stop_reason, "end_turn");
        assert_eq!(
            message.content,
            vec![
                ContentBlock::Thinking {
                    thinking: "I am thinking...".to_string(),
                    signature: Some(signature),
                },
                ContentBlock::Text {
                    text: "Here is the result.".to_string(),
                },
            ]
        );
    }

    #[test]
    fn tool_call_without_id_gets_a_generated_one() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "test_tool", "args": {}}}
                ]}
            }]
        });

        let message = convert_google_to_anthropic(&raw, "gemini-1.5-pro");
        assert_eq!(message.stop_reason, "tool_use");
        match &message.content[0] {
            ContentBlock::ToolUse {
                id,
                name,
                input,
                thought_signature,
            } => {
                assert!(id.starts_with("toolu_"));
                assert_eq!(id.len(), "toolu_".len() + 24);
                assert_eq!(name, "test_tool");
                assert_eq!(input, &json!({}));
                assert!(thought_signature.is_none());
            }
            other => panic!("expected tool_use block, got {:?}", other),
        }
    }

    #[test]
    fn tool_call_keeps_its_signature_verbatim() {
        let signature = "s".repeat(64);
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"id": "call-1", "name": "lookup", "args": {"q": "x"}},
                     "thoughtSignature": signature}
                ]}
            }]
        });

        let message = convert_google_to_anthropic(&raw, "gemini-1.5-pro");
        match &message.content[0] {
            ContentBlock::ToolUse {
                id,
                thought_signature,
                ..
            } => {
                assert_eq!(id, "call-1");
                assert_eq!(thought_signature.as_deref(), Some(signature.as_str()));
            }
            other => panic!("expected tool_use block, got {:?}", other),
        }
        let serialized = serde_json::to_value(&message.content[0]).expect("serialize block");
        assert_eq!(serialized["thoughtSignature"], json!(signature));
    }

    #[test]
    fn usage_subtracts_cached_tokens() {
        let raw = json!({
            "candidates": [{"content": {"parts": [{"text": "ok"}]}}],
            "usageMetadata": {
                "promptTokenCount": 1000,
                "cachedContentTokenCount": 400,
                "candidatesTokenCount": 50
            }
        });

        let message = convert_google_to_anthropic(&raw, "gemini-1.5-pro");
        assert_eq!(message.usage.input_tokens, 600);
        assert_eq!(message.usage.cache_read_input_tokens, 400);
        assert_eq!(message.usage.output_tokens, 50);
    }

    #[test]
    fn cached_count_larger_than_prompt_clamps_to_zero() {
        let raw = json!({
            "candidates": [],
            "usageMetadata": {"promptTokenCount": 100, "cachedContentTokenCount": 400}
        });
        let message = convert_google_to_anthropic(&raw, "m");
        assert_eq!(message.usage.input_tokens, 0);
        assert_eq!(message.usage.cache_read_input_tokens, 400);
    }

    #[test]
    fn empty_candidates_yield_an_empty_text_block() {
        for raw in [json!({}), json!({"candidates": []}), json!({"candidates": null})] {
            let message = convert_google_to_anthropic(&raw, "m");
            assert_eq!(
                message.content,
                vec![ContentBlock::Text {
                    text: String::new()
                }]
            );
            assert_eq!(message.stop_reason, "end_turn");
        }
    }

    #[test]
    fn response_wrapper_is_unwrapped() {
        let raw = json!({
            "response": {
                "candidates": [{"content": {"parts": [{"text": "wrapped"}]}}]
            }
        });
        let message = convert_google_to_anthropic(&raw, "m");
        assert_eq!(
            message.content,
            vec![ContentBlock::Text {
                text: "wrapped".to_string()
            }]
        );
    }

    #[test]
    fn inline_images_become_base64_blocks() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                ]}
            }]
        });
        let message = convert_google_to_anthropic(&raw, "m");
        match &message.content[0] {
            ContentBlock::Image { source } => {
                assert_eq!(source.source_type, "base64");
                assert_eq!(source.media_type, "image/png");
                assert_eq!(source.data, "aGVsbG8=");
            }
            other => panic!("expected image block, got {:?}", other),
        }
    }

    #[test]
    fn max_tokens_finish_reason_maps_through() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"text": "cut off"}]},
                "finishReason": "MAX_TOKENS"
            }]
        });
        let message = convert_google_to_anthropic(&raw, "m");
        assert_eq!(message.stop_reason, "max_tokens");
    }

    #[test]
    fn tool_use_overrides_finish_reason() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "t", "args": {}}}
                ]},
                "finishReason": "STOP"
            }]
        });
        let message = convert_google_to_anthropic(&raw, "m");
        assert_eq!(message.stop_reason, "tool_use");
    }
}
