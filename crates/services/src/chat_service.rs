use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::ai::{ChatMessage, GenerationRequest, ImageAttachment, TextGenerator};
use crate::error::AiError;
use crate::markdown::markdown_to_html;
use crate::store::PortalStore;

/// Messages kept as context, oldest dropped first.
pub const MAX_HISTORY_MESSAGES: usize = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly study assistant for an online \
     learning portal. Explain concepts clearly and step by step, and keep answers concise.";

const CHAT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Raw markdown as produced by the model.
    pub text: String,
    /// Sanitized HTML rendering of `text`.
    pub html: String,
}

/// One running conversation with the study assistant.
pub struct ChatAssistant {
    generator: Arc<dyn TextGenerator>,
    store: Arc<PortalStore>,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatAssistant {
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<PortalStore>) -> Self {
        Self {
            generator,
            store,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Send a message, streaming the reply into `on_chunk` as it arrives.
    ///
    /// The exchange is added to the history only when the reply succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AiError::EmptyPrompt` for a blank message without an image,
    /// or the generator's error.
    pub async fn send(
        &self,
        text: &str,
        image: Option<ImageAttachment>,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<ChatReply, AiError> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(AiError::EmptyPrompt);
        }
        let system_prompt = self
            .store
            .settings()
            .await
            .ai_system_prompt()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .to_string();

        let mut history = self.history.lock().await;
        let user_message = ChatMessage {
            image,
            ..ChatMessage::user(text)
        };
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(user_message.clone());

        debug!(context = messages.len(), "sending chat message");
        let reply = self
            .generator
            .generate_stream(
                &GenerationRequest {
                    messages,
                    temperature: CHAT_TEMPERATURE,
                },
                on_chunk,
            )
            .await?;
        let reply = reply.trim().to_string();

        // Images are sent once; later turns only keep the text.
        history.push(ChatMessage {
            image: None,
            ..user_message
        });
        history.push(ChatMessage::assistant(reply.clone()));
        let overflow = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
        history.drain(..overflow);

        Ok(ChatReply {
            html: markdown_to_html(&reply),
            text: reply,
        })
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    pub async fn reset(&self) {
        self.history.lock().await.clear();
        info!("chat history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatRole;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use storage::repository::InMemoryKeyValueStore;

    #[derive(Default)]
    struct Echo {
        fail: AtomicBool,
        last_context: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, AiError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AiError::EmptyResponse);
            }
            self.last_context
                .store(request.messages.len(), Ordering::SeqCst);
            let last = request.messages.last().map(|m| m.content.clone());
            Ok(format!("**echo** {}", last.unwrap_or_default()))
        }
    }

    async fn assistant() -> (ChatAssistant, Arc<Echo>) {
        let store = Arc::new(PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await);
        let echo = Arc::new(Echo::default());
        (ChatAssistant::new(echo.clone(), store), echo)
    }

    #[tokio::test]
    async fn reply_is_streamed_and_rendered() {
        let (chat, _) = assistant().await;
        let mut streamed = String::new();
        let reply = chat
            .send("hello", None, &mut |chunk| streamed.push_str(chunk))
            .await
            .unwrap();
        assert_eq!(reply.text, "**echo** hello");
        assert_eq!(streamed, reply.text);
        assert!(reply.html.contains("<strong>echo</strong>"));

        let history = chat.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn failures_leave_history_untouched() {
        let (chat, echo) = assistant().await;
        chat.send("one", None, &mut |_| {}).await.unwrap();
        echo.fail.store(true, Ordering::SeqCst);
        assert!(chat.send("two", None, &mut |_| {}).await.is_err());
        assert_eq!(chat.history().await.len(), 2);
        assert!(matches!(
            chat.send("   ", None, &mut |_| {}).await,
            Err(AiError::EmptyPrompt)
        ));
    }

    #[tokio::test]
    async fn history_is_capped() {
        let (chat, echo) = assistant().await;
        for i in 0..15 {
            chat.send(&format!("message {i}"), None, &mut |_| {})
                .await
                .unwrap();
        }
        let history = chat.history().await;
        assert_eq!(history.len(), MAX_HISTORY_MESSAGES);
        assert_eq!(history[0].content, "message 5");
        // System prompt, capped history and the new message.
        assert_eq!(
            echo.last_context.load(Ordering::SeqCst),
            MAX_HISTORY_MESSAGES + 2
        );

        chat.reset().await;
        assert!(chat.history().await.is_empty());
    }
}
