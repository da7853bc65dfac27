use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::{
    format_error_parts, Message, MessageRole, Provider, ProviderFuture, ProviderResponse,
    ProviderUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Provider for OpenAI {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(call_with_chat_completions(self))
    }
}

fn base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn request_body(provider: &OpenAI) -> serde_json::Value {
    let messages = provider
        .messages
        .iter()
        .map(|message| match message.role {
            MessageRole::System => json!({"role": "system", "content": message.content}),
            MessageRole::User => json!({"role": "user", "content": message.content}),
        })
        .collect::<Vec<_>>();

    json!({
        "model": provider.model,
        "messages": messages,
    })
}

async fn call_with_chat_completions(provider: OpenAI) -> Result<ProviderResponse> {
    let client = reqwest::Client::new();
    let url = format!("{}/chat/completions", base_url().trim_end_matches('/'));
    let body = request_body(&provider);

    let response = client
        .post(&url)
        .bearer_auth(&provider.key)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("failed to reach OpenAI at {}", url))?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        return extract_chat_response(&text, &provider.model);
    }
    Err(anyhow!(
        "OpenAI API error ({}): {}",
        status,
        extract_openai_error(&text).unwrap_or(text)
    ))
}

fn extract_chat_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: OpenAIResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("no message content returned from OpenAI"))?;

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, error.code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    #[test]
    fn openai_extract_chat_response_snapshot() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/openai_chat_response.json"
        ));
        let response = extract_chat_response(payload, "gpt-4o-mini").unwrap();
        assert_json_snapshot!(response, @r#"
        {
          "text": "Bonjour\nAu revoir\nOui",
          "model": "gpt-4o-mini-2024-07-18",
          "usage": {
            "prompt_tokens": 58,
            "completion_tokens": 9,
            "total_tokens": 67
          }
        }
        "#);
    }

    #[test]
    fn request_body_keeps_message_order() {
        let provider = OpenAI::new("sk-test")
            .with_model("gpt-4o")
            .append_system_input("system".to_string())
            .append_user_input("first".to_string())
            .append_user_input("second".to_string());
        let body = request_body(&provider);
        assert_eq!(body["model"], "gpt-4o");
        let roles = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|message| message["role"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(roles, ["system", "user", "user"]);
        assert_eq!(body["messages"][2]["content"], "second");
    }

    #[test]
    fn empty_content_is_an_error() {
        let payload = r#"{"choices":[{"message":{"role":"assistant","content":""}}]}"#;
        assert!(extract_chat_response(payload, "gpt-4o-mini").is_err());
    }

    #[test]
    fn openai_error_body_is_summarized() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        assert_eq!(
            extract_openai_error(body).unwrap(),
            "Rate limit reached | type: requests | code: rate_limit_exceeded"
        );
        assert!(extract_openai_error("<html>").is_none());
    }
}
