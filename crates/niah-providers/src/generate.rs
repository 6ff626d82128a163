use serde_json::Value;
use tracing::debug;

use niah_core::{ModelWorker, NiahError, NiahResult, Prompt};

use crate::protocol::{generated_text, GenerateRequest};
use crate::{agent, http_error, WorkerSettings};

/// Client for a self-hosted generation server: `POST {url}` with
/// `{"prompt": ..., "penalty": ...}`.
pub struct GenerateWorker {
    agent: ureq::Agent,
    url: String,
    penalty: f32,
}

impl GenerateWorker {
    pub fn new(url: &str, settings: &WorkerSettings) -> Self {
        Self {
            agent: agent(settings.timeout),
            url: url.to_string(),
            penalty: settings.penalty,
        }
    }
}

impl ModelWorker for GenerateWorker {
    fn name(&self) -> &str {
        &self.url
    }

    fn complete(&self, prompt: &Prompt) -> NiahResult<String> {
        let text = prompt.to_text();
        let request = GenerateRequest {
            prompt: &text,
            penalty: self.penalty,
        };
        debug!(url = %self.url, chars = text.len(), "generate request");

        let body: Value = self
            .agent
            .post(&self.url)
            .send_json(&request)
            .map_err(|e| http_error(&self.url, e))?
            .into_json()
            .map_err(|e| NiahError::Inference(format!("malformed generate response: {e}")))?;

        generated_text(&body).ok_or_else(|| {
            NiahError::Inference(format!("no completion text in response from {}", self.url))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::serve_once;

    #[test]
    fn test_complete_posts_prompt() {
        let stub = serve_once(200, r#"{"response": "刘秀"}"#);
        let settings = WorkerSettings {
            penalty: 1.5,
            ..Default::default()
        };
        let worker = GenerateWorker::new(&format!("{}/generate", stub.url), &settings);

        let answer = worker.complete(&Prompt::Text("王莽在谁的手下工作？".into())).unwrap();
        assert_eq!(answer, "刘秀");

        let request = stub.request();
        assert!(request.starts_with("POST /generate"));
        assert!(request.contains("王莽在谁的手下工作？"));
        assert!(request.contains(r#""penalty":1.5"#));
    }

    #[test]
    fn test_unrecognized_body() {
        let stub = serve_once(200, r#"{"tokens": [1, 2, 3]}"#);
        let worker = GenerateWorker::new(&stub.url, &WorkerSettings::default());
        let err = worker.complete(&Prompt::Text("x".into())).unwrap_err();
        assert!(err.to_string().contains("no completion text"));
        stub.request();
    }

    #[test]
    fn test_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/generate", listener.local_addr().unwrap());
        drop(listener);

        let worker = GenerateWorker::new(&url, &WorkerSettings::default());
        assert!(matches!(
            worker.complete(&Prompt::Text("x".into())),
            Err(NiahError::Inference(_))
        ));
    }
}
