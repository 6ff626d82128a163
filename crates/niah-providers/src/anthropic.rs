use tracing::debug;

use niah_core::{ModelWorker, NiahError, NiahResult, Prompt, Role};

use crate::protocol::{AnthropicMessage, MessagesRequest, MessagesResponse};
use crate::{agent, http_error, WorkerSettings};

const API_VERSION: &str = "2023-06-01";

/// Messages API client (`POST {base_url}/messages`).
pub struct AnthropicWorker {
    agent: ureq::Agent,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicWorker {
    pub fn new(base_url: &str, api_key: String, settings: &WorkerSettings) -> Self {
        Self {
            agent: agent(settings.timeout),
            url: format!("{}/messages", base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    fn request<'a>(&'a self, prompt: &Prompt) -> MessagesRequest<'a> {
        let (system, messages) = match prompt {
            Prompt::Text(text) => (
                None,
                vec![AnthropicMessage {
                    role: Role::User,
                    content: text.clone(),
                }],
            ),
            Prompt::Messages(parts) => {
                let system: Vec<&str> = parts
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(|m| m.content.as_str())
                    .collect();
                let messages = parts
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .map(|m| AnthropicMessage {
                        role: m.role,
                        content: m.content.clone(),
                    })
                    .collect();
                let system = (!system.is_empty()).then(|| system.join("\n"));
                (system, messages)
            }
        };
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system,
            messages,
        }
    }
}

impl ModelWorker for AnthropicWorker {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &Prompt) -> NiahResult<String> {
        let request = self.request(prompt);
        debug!(model = %self.model, "messages request");

        let response: MessagesResponse = self
            .agent
            .post(&self.url)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", API_VERSION)
            .send_json(&request)
            .map_err(|e| http_error(&self.url, e))?
            .into_json()
            .map_err(|e| NiahError::Inference(format!("malformed messages response: {e}")))?;

        let text: String = response
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.is_empty() {
            return Err(NiahError::Inference("messages response has no text".into()));
        }
        Ok(text)
    }
}
