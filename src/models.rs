use serde::Deserialize;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const INVOCATION_METRICS: &str = "amazon-bedrock-invocationMetrics";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    fn apply_invocation_metrics(&mut self, payload: &Value) {
        let Some(metrics) = payload.get(INVOCATION_METRICS) else {
            return;
        };
        if let Some(input) = metrics.get("inputTokenCount").and_then(Value::as_u64) {
            self.input_tokens = input;
        }
        if let Some(output) = metrics.get("outputTokenCount").and_then(Value::as_u64) {
            self.output_tokens = output;
        }
    }
}

/// Request/response dialect of a Bedrock model family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFamily {
    Claude,
    DeepSeek,
    Mistral,
    Qwen,
    Llama,
}

impl ModelFamily {
    /// Picks the dialect from a model id or ARN, first match wins.
    pub fn detect(model_id: &str) -> Option<Self> {
        let id = model_id.to_lowercase();
        if id.contains("claude") || id.contains("anthropic") {
            Some(ModelFamily::Claude)
        } else if id.contains("deepseek") {
            Some(ModelFamily::DeepSeek)
        } else if id.contains("mistral") || id.contains("mixtral") {
            Some(ModelFamily::Mistral)
        } else if id.contains("qwen") {
            Some(ModelFamily::Qwen)
        } else if id.contains("llama") || id.contains("meta") {
            Some(ModelFamily::Llama)
        } else {
            None
        }
    }

    pub fn supports_streaming(self) -> bool {
        !matches!(self, ModelFamily::Llama)
    }

    pub fn request_body(self, prompt: &str, params: GenerationParams) -> Value {
        match self {
            ModelFamily::Claude => {
                let mut body = json!({
                    "anthropic_version": ANTHROPIC_VERSION,
                    "max_tokens": params.max_tokens,
                    "messages": [{ "role": "user", "content": prompt }],
                });
                if params.temperature != 0.0 {
                    body["temperature"] = json!(params.temperature);
                }
                body
            }
            ModelFamily::DeepSeek | ModelFamily::Qwen => json!({
                "messages": [{ "role": "user", "content": prompt }],
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
            }),
            ModelFamily::Mistral => json!({
                "prompt": format!("<s>[INST] {} [/INST]", prompt),
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
            }),
            ModelFamily::Llama => {
                let mut body = json!({
                    "prompt": prompt,
                    "max_gen_len": params.max_tokens,
                });
                if params.temperature != 0.0 {
                    body["temperature"] = json!(params.temperature);
                }
                body
            }
        }
    }

    /// Token usage from a complete (non-streaming) response body.
    pub fn parse_response(self, body: &[u8]) -> Result<Usage, serde_json::Error> {
        match self {
            ModelFamily::Claude => {
                let response: ClaudeResponse = serde_json::from_slice(body)?;
                Ok(Usage {
                    input_tokens: response.usage.input_tokens,
                    output_tokens: response.usage.output_tokens,
                })
            }
            ModelFamily::Llama => {
                let response: LlamaResponse = serde_json::from_slice(body)?;
                Ok(Usage {
                    input_tokens: response.prompt_token_count,
                    output_tokens: response.generation_token_count,
                })
            }
            ModelFamily::DeepSeek | ModelFamily::Qwen | ModelFamily::Mistral => {
                let payload: Value = serde_json::from_slice(body)?;
                let mut usage = Usage::default();
                if let Some(tokens) = payload.get("usage") {
                    if let Some(input) = tokens.get("prompt_tokens").and_then(Value::as_u64) {
                        usage.input_tokens = input;
                    }
                    if let Some(output) = tokens.get("completion_tokens").and_then(Value::as_u64) {
                        usage.output_tokens = output;
                    }
                }
                usage.apply_invocation_metrics(&payload);
                Ok(usage)
            }
        }
    }

    /// Folds one decoded stream chunk into `usage`.
    ///
    /// Returns `Ok(true)` when the chunk carried generated content, which is
    /// what time-to-first-token is measured against. Only Claude chunks are
    /// strictly typed; other families skip chunks they cannot read.
    pub fn apply_chunk(self, chunk: &[u8], usage: &mut Usage) -> Result<bool, serde_json::Error> {
        if self == ModelFamily::Claude {
            let event: ClaudeStreamEvent = serde_json::from_slice(chunk)?;
            match event.kind.as_str() {
                "message_start" => {
                    if let Some(message) = event.message {
                        usage.input_tokens = message.usage.input_tokens;
                    }
                }
                "message_delta" => {
                    if let Some(delta_usage) = event.usage {
                        usage.output_tokens = delta_usage.output_tokens;
                    }
                }
                _ => {}
            }
            return Ok(event.kind == "content_block_delta");
        }

        let Ok(payload) = serde_json::from_slice::<Value>(chunk) else {
            return Ok(false);
        };
        usage.apply_invocation_metrics(&payload);

        let text_pointer = match self {
            ModelFamily::Mistral => "/outputs/0/text",
            _ => "/choices/0/delta/content",
        };
        let has_content = payload
            .pointer(text_pointer)
            .and_then(Value::as_str)
            .is_some_and(|text| !text.is_empty());
        Ok(has_content)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ClaudeStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<ClaudeResponse>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct LlamaResponse {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    generation_token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: GenerationParams = GenerationParams {
        max_tokens: 128,
        temperature: 0.0,
    };

    #[test]
    fn detects_families_in_priority_order() {
        assert_eq!(
            ModelFamily::detect("anthropic.claude-3-haiku-20240307-v1:0"),
            Some(ModelFamily::Claude)
        );
        assert_eq!(
            ModelFamily::detect("us.deepseek.r1-v1:0"),
            Some(ModelFamily::DeepSeek)
        );
        assert_eq!(
            ModelFamily::detect("mistral.mixtral-8x7b-instruct-v0:1"),
            Some(ModelFamily::Mistral)
        );
        assert_eq!(
            ModelFamily::detect("qwen.qwen3-32b-v1:0"),
            Some(ModelFamily::Qwen)
        );
        assert_eq!(
            ModelFamily::detect("meta.llama3-8b-instruct-v1:0"),
            Some(ModelFamily::Llama)
        );
        assert_eq!(ModelFamily::detect("amazon.titan-text-express-v1"), None);
    }

    #[test]
    fn claude_body_omits_zero_temperature() {
        let body = ModelFamily::Claude.request_body("hi", PARAMS);
        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("temperature").is_none());

        let warm = ModelFamily::Claude.request_body(
            "hi",
            GenerationParams {
                temperature: 0.7,
                ..PARAMS
            },
        );
        assert_eq!(warm["temperature"], 0.7);
    }

    #[test]
    fn mistral_wraps_prompt_in_instruction_tags() {
        let body = ModelFamily::Mistral.request_body("hi", PARAMS);
        assert_eq!(body["prompt"], "<s>[INST] hi [/INST]");
        assert_eq!(body["max_tokens"], 128);
    }

    #[test]
    fn llama_uses_max_gen_len() {
        let body = ModelFamily::Llama.request_body("hi", PARAMS);
        assert_eq!(body["max_gen_len"], 128);
        assert!(!ModelFamily::Llama.supports_streaming());
    }

    #[test]
    fn parses_usage_per_family() {
        let claude = br#"{"content":[{"type":"text","text":"x"}],"usage":{"input_tokens":12,"output_tokens":34}}"#;
        assert_eq!(
            ModelFamily::Claude.parse_response(claude).unwrap(),
            Usage { input_tokens: 12, output_tokens: 34 }
        );

        let llama = br#"{"generation":"x","prompt_token_count":5,"generation_token_count":6}"#;
        assert_eq!(
            ModelFamily::Llama.parse_response(llama).unwrap(),
            Usage { input_tokens: 5, output_tokens: 6 }
        );

        let qwen = br#"{"choices":[{"message":{"content":"x"}}],"usage":{"prompt_tokens":1,"completion_tokens":2},
            "amazon-bedrock-invocationMetrics":{"inputTokenCount":3,"outputTokenCount":4}}"#;
        assert_eq!(
            ModelFamily::Qwen.parse_response(qwen).unwrap(),
            Usage { input_tokens: 3, output_tokens: 4 }
        );

        assert!(ModelFamily::DeepSeek.parse_response(b"not json").is_err());
    }

    #[test]
    fn claude_stream_tracks_usage_and_first_delta() {
        let mut usage = Usage::default();
        let start = br#"{"type":"message_start","message":{"usage":{"input_tokens":9}}}"#;
        assert!(!ModelFamily::Claude.apply_chunk(start, &mut usage).unwrap());
        let delta = br#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert!(ModelFamily::Claude.apply_chunk(delta, &mut usage).unwrap());
        let end = br#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":17}}"#;
        assert!(!ModelFamily::Claude.apply_chunk(end, &mut usage).unwrap());
        assert_eq!(usage, Usage { input_tokens: 9, output_tokens: 17 });

        assert!(ModelFamily::Claude.apply_chunk(b"{oops", &mut usage).is_err());
    }

    #[test]
    fn openai_style_stream_ignores_empty_deltas() {
        let mut usage = Usage::default();
        let role_only = br#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        assert!(!ModelFamily::DeepSeek.apply_chunk(role_only, &mut usage).unwrap());
        let content = br#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert!(ModelFamily::DeepSeek.apply_chunk(content, &mut usage).unwrap());
        let last = br#"{"choices":[],"amazon-bedrock-invocationMetrics":{"inputTokenCount":7,"outputTokenCount":8}}"#;
        assert!(!ModelFamily::DeepSeek.apply_chunk(last, &mut usage).unwrap());
        assert_eq!(usage, Usage { input_tokens: 7, output_tokens: 8 });

        assert!(!ModelFamily::Qwen.apply_chunk(b"garbage", &mut usage).unwrap());
    }

    #[test]
    fn mistral_stream_reads_outputs() {
        let mut usage = Usage::default();
        let chunk = br#"{"outputs":[{"text":"Bonjour","stop_reason":null}]}"#;
        assert!(ModelFamily::Mistral.apply_chunk(chunk, &mut usage).unwrap());
    }
}
