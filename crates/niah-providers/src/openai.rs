use tracing::debug;

use niah_core::{ChatMessage, ModelWorker, NiahError, NiahResult, Prompt};

use crate::protocol::{ChatRequest, ChatResponse};
use crate::{agent, http_error, WorkerSettings};

/// Chat-completions client (`POST {base_url}/chat/completions`).
pub struct OpenAiWorker {
    agent: ureq::Agent,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiWorker {
    pub fn new(base_url: &str, api_key: String, settings: &WorkerSettings) -> Self {
        Self {
            agent: agent(settings.timeout),
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }
}

impl ModelWorker for OpenAiWorker {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &Prompt) -> NiahResult<String> {
        let messages = match prompt {
            Prompt::Messages(messages) => messages.clone(),
            Prompt::Text(text) => vec![ChatMessage::user(text.as_str())],
        };
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };
        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let response: ChatResponse = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&request)
            .map_err(|e| http_error(&self.url, e))?
            .into_json()
            .map_err(|e| NiahError::Inference(format!("malformed chat response: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| NiahError::Inference("chat response has no content".into()))
    }
}
