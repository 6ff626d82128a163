mod anthropic;
mod generate;
mod judge;
mod openai;
mod protocol;
#[cfg(test)]
mod stub;

use std::sync::Arc;
use std::time::Duration;

use niah_core::{ModelWorker, NiahError, NiahResult, Provider};

pub use anthropic::AnthropicWorker;
pub use generate::GenerateWorker;
pub use judge::{parse_rating, JudgeScorer, JUDGE_RUBRIC};
pub use openai::OpenAiWorker;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Connection settings shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Self-hosted generation endpoints, one worker each.
    pub endpoints: Vec<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub penalty: f32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            api_key: None,
            base_url: None,
            endpoints: Vec::new(),
            timeout: Duration::from_secs(600),
            max_tokens: DEFAULT_MAX_TOKENS,
            penalty: 0.0,
        }
    }
}

pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Map a transport or status failure to an inference error, keeping the body.
pub(crate) fn http_error(url: &str, err: ureq::Error) -> NiahError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            NiahError::Inference(format!("{url} returned {code}: {}", body.trim()))
        }
        ureq::Error::Transport(t) => NiahError::Inference(format!("{url}: {t}")),
    }
}

/// Resolve the API key from settings or the provider's environment variable.
pub fn resolve_api_key(provider: Provider, explicit: Option<&str>) -> NiahResult<Option<String>> {
    let Some(var) = provider.api_key_env() else {
        return Ok(None);
    };
    if let Some(key) = explicit.filter(|k| !k.is_empty()) {
        return Ok(Some(key.to_string()));
    }
    match std::env::var(var) {
        Ok(key) if !key.is_empty() => Ok(Some(key)),
        _ => Err(NiahError::Config(format!(
            "{provider} requires an API key: set {var} or model.api_key"
        ))),
    }
}

/// Build the workers for a provider. Selection happens once per run.
pub fn build_workers(
    provider: Provider,
    settings: &WorkerSettings,
) -> NiahResult<Vec<Arc<dyn ModelWorker>>> {
    provider.validate_model_name(&settings.model)?;
    match provider {
        Provider::OpenAi => {
            let key = resolve_api_key(provider, settings.api_key.as_deref())?.unwrap_or_default();
            let url = settings.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
            let worker: Arc<dyn ModelWorker> = Arc::new(OpenAiWorker::new(url, key, settings));
            Ok(vec![worker])
        }
        Provider::Anthropic => {
            let key = resolve_api_key(provider, settings.api_key.as_deref())?.unwrap_or_default();
            let url = settings
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_ANTHROPIC_URL);
            let worker: Arc<dyn ModelWorker> = Arc::new(AnthropicWorker::new(url, key, settings));
            Ok(vec![worker])
        }
        Provider::Qwen => {
            if settings.endpoints.is_empty() {
                return Err(NiahError::Config(
                    "qwen provider needs at least one endpoint in model.endpoints".into(),
                ));
            }
            Ok(settings
                .endpoints
                .iter()
                .map(|url| Arc::new(GenerateWorker::new(url, settings)) as Arc<dyn ModelWorker>)
                .collect())
        }
    }
}
