// Request/Response translator between the client schema and the upstream schema

use crate::config::{DefaultParams, RelayConfig};
use crate::error::ProxyError;
use crate::proxy::router::ModelRouter;
use crate::proxy::schema::{ChatRequest, ChatResponse, Message, Role, UpstreamRequest};
use crate::proxy::tools::{self, StructuredChoicePolicy};

/// Translated payload plus the alias the client asked for.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub request: UpstreamRequest,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct RequestTranslator {
    router: ModelRouter,
    forward_tools: bool,
    choice_policy: StructuredChoicePolicy,
    defaults: Option<DefaultParams>,
}

impl RequestTranslator {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            router: ModelRouter::new(&config.provider),
            forward_tools: config.provider.forward_tools,
            choice_policy: config.provider.structured_tool_choice,
            defaults: config.default_params,
        }
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn decode(&self, body: &[u8]) -> Result<ChatRequest, ProxyError> {
        serde_json::from_slice(body)
            .map_err(|e| ProxyError::InvalidRequest(format!("Invalid request body: {}", e)))
    }

    pub fn translate(&self, request: ChatRequest) -> Result<TranslatedRequest, ProxyError> {
        let upstream_model = self.router.resolve(&request.model).ok_or_else(|| {
            ProxyError::InvalidRequest(format!(
                "Model {} not supported. Use {} instead.",
                request.model,
                self.router.aliases().join(" or ")
            ))
        })?;
        tracing::debug!(alias = %request.model, upstream = %upstream_model, "model converted");

        let mut out = UpstreamRequest {
            model: upstream_model.to_string(),
            messages: request.messages.into_iter().map(normalize_message).collect(),
            stream: request.stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            stop: request.stop,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            tools: Vec::new(),
            tool_choice: None,
        };

        if let Some(defaults) = &self.defaults {
            out.temperature = out.temperature.or(defaults.temperature);
            out.max_tokens = out.max_tokens.or(defaults.max_tokens);
        }

        if self.forward_tools {
            out.tools = tools::consolidate_tools(request.tools, request.functions);
            // tool_choice without tools is rejected by some upstreams
            if !out.tools.is_empty() {
                out.tool_choice = tools::resolve_choice(&request.tool_choice, self.choice_policy);
            }
        }

        Ok(TranslatedRequest {
            request: out,
            alias: request.model,
        })
    }
}

/// Rewrite a message into the upstream shape. Idempotent.
pub fn normalize_message(mut message: Message) -> Message {
    if message.role == Role::Function {
        message.role = Role::Tool;
    }
    if message.role == Role::Assistant {
        message.tool_calls = tools::sanitize_tool_calls(std::mem::take(&mut message.tool_calls));
    } else {
        message.tool_calls.clear();
    }
    message
}

/// Rewrite a buffered upstream body into the client schema.
pub fn translate_response(body: &[u8], alias: &str) -> Result<ChatResponse, ProxyError> {
    let mut response: ChatResponse = serde_json::from_slice(body)
        .map_err(|e| ProxyError::UpstreamResponseMalformed(e.to_string()))?;

    response.object = "chat.completion".to_string();
    response.model = alias.to_string();
    for choice in &mut response.choices {
        let calls = std::mem::take(&mut choice.message.tool_calls);
        choice.message.tool_calls = tools::sanitize_tool_calls(calls);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::proxy::schema::MessageContent;
    use serde_json::{json, Value};

    fn translator_with(yaml: &str) -> RequestTranslator {
        let config = AppConfig::from_yaml(yaml)
            .unwrap()
            .resolve(|name| (name == "DEEPSEEK_API_KEY").then(|| "sk-test".to_string()))
            .unwrap();
        RequestTranslator::new(&config)
    }

    fn translator() -> RequestTranslator {
        translator_with("{}")
    }

    fn translate_json(t: &RequestTranslator, body: Value) -> Result<TranslatedRequest, ProxyError> {
        let request = t.decode(body.to_string().as_bytes())?;
        t.translate(request)
    }

    fn upstream_json(t: &RequestTranslator, body: Value) -> Value {
        serde_json::to_value(translate_json(t, body).unwrap().request).unwrap()
    }

    #[test]
    fn test_model_alias_is_replaced_and_kept() {
        let translated = translate_json(
            &translator(),
            json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .unwrap();
        assert_eq!(translated.request.model, "deepseek-chat");
        assert_eq!(translated.alias, "gpt-4o");
        assert!(!translated.request.stream);
    }

    #[test]
    fn test_unknown_alias_is_invalid_request() {
        let err = translate_json(
            &translator(),
            json!({"model": "gpt-3.5-turbo", "messages": []}),
        )
        .unwrap_err();
        match err {
            ProxyError::InvalidRequest(msg) => {
                assert!(msg.contains("gpt-3.5-turbo"));
                assert!(msg.contains("gpt-4o"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_body_is_invalid_request() {
        let t = translator();
        assert!(matches!(t.decode(b"{not json"), Err(ProxyError::InvalidRequest(_))));
        assert!(matches!(
            t.decode(br#"{"messages": []}"#),
            Err(ProxyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_optional_params_copied_only_when_present() {
        let t = translator();
        let bare = upstream_json(&t, json!({"model": "gpt-4o", "messages": []}));
        assert!(bare.get("temperature").is_none());
        assert!(bare.get("max_tokens").is_none());

        let set = upstream_json(
            &t,
            json!({"model": "gpt-4o", "messages": [], "temperature": 0.2, "max_tokens": 64, "top_p": 0.9}),
        );
        assert_eq!(set["temperature"], 0.2);
        assert_eq!(set["max_tokens"], 64);
        assert_eq!(set["top_p"], 0.9);
    }

    #[test]
    fn test_default_params_are_opt_in() {
        let t = translator_with("default-params:\n  temperature: 0.7\n  max-tokens: 4096\n");
        let bare = upstream_json(&t, json!({"model": "gpt-4o", "messages": []}));
        assert_eq!(bare["temperature"], 0.7);
        assert_eq!(bare["max_tokens"], 4096);

        let explicit = upstream_json(
            &t,
            json!({"model": "gpt-4o", "messages": [], "temperature": 0.1}),
        );
        assert_eq!(explicit["temperature"], 0.1);
        assert_eq!(explicit["max_tokens"], 4096);
    }

    #[test]
    fn test_function_role_becomes_tool_and_is_idempotent() {
        let message = Message {
            role: Role::Function,
            content: Some(MessageContent::text("42")),
            tool_calls: vec![],
            tool_call_id: Some("call_1".into()),
            name: Some("lookup".into()),
        };
        let once = normalize_message(message);
        let twice = normalize_message(once.clone());
        assert_eq!(once.role, Role::Tool);
        assert_eq!(once, twice);
        assert_eq!(once.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_assistant_tool_calls_are_normalized() {
        let out = upstream_json(
            &translator(),
            json!({
                "model": "gpt-4o",
                "messages": [{
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_a", "type": "custom", "function": {"name": "weather", "arguments": "{\"q\":1}"}},
                        {"id": "call_b", "type": "function", "function": {"name": "", "arguments": "{}"}}
                    ]
                }]
            }),
        );
        let calls = out["messages"][0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "call_a");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["arguments"], "{\"q\":1}");
        assert!(out["messages"][0]["content"].is_null());
    }

    #[test]
    fn test_tools_and_choice() {
        let t = translator();
        let body = |functions: Value| {
            json!({
                "model": "gpt-4o",
                "messages": [],
                "tools": [{"type": "function", "function": {"name": "weather", "parameters": {"type": "object"}}}],
                "functions": functions,
                "tool_choice": {"type": "function", "function": {"name": "weather"}}
            })
        };
        let a = upstream_json(&t, body(json!([{"name": "a"}])));
        let b = upstream_json(&t, body(json!([{"name": "b"}, {"name": "c"}])));
        assert_eq!(a, b);
        assert_eq!(a["tools"][0]["function"]["name"], "weather");
        assert_eq!(a["tool_choice"], "auto");
    }

    #[test]
    fn test_legacy_functions_are_wrapped() {
        let out = upstream_json(
            &translator(),
            json!({
                "model": "gpt-4o",
                "messages": [],
                "functions": [{"name": "lookup", "description": "d", "parameters": {"type": "object"}}],
                "tool_choice": "none"
            }),
        );
        assert_eq!(out["tools"][0]["type"], "function");
        assert_eq!(out["tools"][0]["function"]["name"], "lookup");
        assert_eq!(out["tool_choice"], "none");
    }

    #[test]
    fn test_choice_without_tools_is_omitted() {
        let out = upstream_json(
            &translator(),
            json!({"model": "gpt-4o", "messages": [], "tool_choice": "auto"}),
        );
        assert!(out.get("tools").is_none());
        assert!(out.get("tool_choice").is_none());
    }

    #[test]
    fn test_profile_without_tool_support_drops_tools() {
        let t = translator_with("provider: ollama\n");
        let out = upstream_json(
            &t,
            json!({
                "model": "gpt-4o",
                "messages": [],
                "tools": [{"type": "function", "function": {"name": "weather"}}],
                "tool_choice": "auto"
            }),
        );
        assert_eq!(out["model"], "llama2");
        assert!(out.get("tools").is_none());
        assert!(out.get("tool_choice").is_none());
    }

    #[test]
    fn test_response_model_is_rewritten_to_alias() {
        let translated = translate_json(
            &translator(),
            json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .unwrap();
        let upstream_body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": translated.request.model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        });

        let response =
            translate_response(upstream_body.to_string().as_bytes(), &translated.alias).unwrap();
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.usage.total_tokens, 4);
        assert_eq!(response.created, 1700000000);
    }

    #[test]
    fn test_response_drops_unnamed_tool_calls() {
        let body = json!({
            "id": "chatcmpl-2",
            "created": 1,
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "", "arguments": "{}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "weather", "arguments": "{}"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        });
        let response = translate_response(body.to_string().as_bytes(), "gpt-4o").unwrap();
        let calls = &response.choices[0].message.tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_2");
        assert_eq!(response.object, "chat.completion");
    }

    #[test]
    fn test_malformed_response() {
        assert!(matches!(
            translate_response(b"<html>", "gpt-4o"),
            Err(ProxyError::UpstreamResponseMalformed(_))
        ));
        assert!(matches!(
            translate_response(br#"{"id": "x"}"#, "gpt-4o"),
            Err(ProxyError::UpstreamResponseMalformed(_))
        ));
    }
}
