use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AiConfig;
use crate::error::AiError;
use crate::store::PortalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// Image sent alongside a user message, already base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImageAttachment {
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub image: Option<ImageAttachment>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            image: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            image: None,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Text completion seam; the HTTP client implements it, tests fake it.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns `AiError` when the generator is disabled or the call fails.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AiError>;

    /// Stream a completion, calling `on_chunk` for every piece of text.
    /// Returns the full text.
    ///
    /// # Errors
    ///
    /// Returns `AiError` when the generator is disabled or the call fails.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, AiError> {
        let text = self.generate(request).await?;
        on_chunk(&text);
        Ok(text)
    }
}

/// Client for OpenAI-style `/chat/completions` endpoints.
///
/// Credentials are resolved on every call so that settings saved by an admin
/// take effect without a restart.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: Client,
    env: Option<AiConfig>,
    store: Arc<PortalStore>,
}

impl OpenAiCompatibleClient {
    #[must_use]
    pub fn new(env: Option<AiConfig>, store: Arc<PortalStore>) -> Self {
        Self {
            http: Client::new(),
            env,
            store,
        }
    }

    pub async fn config(&self) -> Option<AiConfig> {
        let settings = self.store.settings().await;
        AiConfig::resolve(self.env.as_ref(), &settings)
    }

    pub async fn enabled(&self) -> bool {
        self.config().await.is_some()
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, AiError> {
        let config = self.config().await.ok_or(AiError::Disabled)?;
        let url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let payload = ChatRequest {
            model: config.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            stream,
        };
        debug!(model = %config.model, messages = payload.messages.len(), stream, "sending chat completion");

        let response = self
            .http
            .post(url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AiError::HttpStatus(response.status()));
        }
        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AiError> {
        let response = self.send(request, false).await?;
        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AiError::EmptyResponse)?;

        Ok(content.trim().to_string())
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, AiError> {
        let response = self.send(request, true).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut full = String::new();

        'outer: while let Some(chunk) = stream.next().await {
            for event in decoder.push(&chunk?) {
                match event {
                    SseEvent::Delta(text) => {
                        on_chunk(&text);
                        full.push_str(&text);
                    }
                    SseEvent::Done => break 'outer,
                }
            }
        }

        if full.trim().is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(full)
    }
}

//
// ─── SERVER-SENT EVENTS ────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Incremental decoder for `data:` lines of a streamed completion.
///
/// Lines may be split across network chunks, so bytes are buffered until a
/// newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
                continue;
            };
            if let Some(text) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|t| !t.is_empty())
            {
                events.push(SseEvent::Delta(text));
            }
        }
        events
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Serialize)]
struct WireImageUrl {
    url: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let content = match &message.image {
            None => WireContent::Text(message.content.clone()),
            Some(image) => WireContent::Parts(vec![
                WirePart::Text {
                    text: message.content.clone(),
                },
                WirePart::ImageUrl {
                    image_url: WireImageUrl {
                        url: image.data_url(),
                    },
                },
            ]),
        };
        Self {
            role: message.role.as_str(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::InMemoryKeyValueStore;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());
        let events = decoder.push(
            b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{}}]}\n\n: keep-alive\ndata: [DONE]\n\n",
        );
        assert_eq!(
            events,
            vec![SseEvent::Delta("Hello".into()), SseEvent::Done]
        );
    }

    #[test]
    fn images_become_content_parts() {
        let mut message = ChatMessage::user("What is this?");
        message.image = Some(ImageAttachment {
            mime_type: "image/png".into(),
            base64_data: "AAAA".into(),
        });
        let json = serde_json::to_value(WireMessage::from(&message)).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );

        let plain = serde_json::to_value(WireMessage::from(&ChatMessage::system("Be brief"))).unwrap();
        assert_eq!(plain["content"], "Be brief");
    }

    #[tokio::test]
    async fn disabled_without_a_key() {
        let store = Arc::new(PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await);
        let client = OpenAiCompatibleClient::new(None, store);
        assert!(!client.enabled().await);
        let request = GenerationRequest {
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.2,
        };
        assert!(matches!(
            client.generate(&request).await,
            Err(AiError::Disabled)
        ));
    }
}
