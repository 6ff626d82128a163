//! Provider families and the prompt shape each one expects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NiahError, NiahResult};
use crate::worker::{ChatMessage, Prompt};

/// Instruction appended after the question unless overridden.
pub const DEFAULT_INSTRUCTION: &str =
    "Don't give information outside the document or repeat your findings";

pub const SYSTEM_PROMPT: &str =
    "You are a helpful AI bot that answers questions for a user. Keep your response short and direct";

/// Flat prompt for Anthropic-style models. `{context}` and
/// `{retrieval_question}` are substituted.
pub const ANTHROPIC_TEMPLATE: &str = "You are a helpful AI bot that answers questions for a user. Keep your response short and direct.

<document_content>
{context}
</document_content>

Here is the user question:
<question>
{retrieval_question}
</question>

Don't give information outside the document or repeat your findings.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    #[default]
    Qwen,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Qwen => write!(f, "qwen"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "qwen" => Ok(Self::Qwen),
            _ => Err(format!("invalid provider: {s}")),
        }
    }
}

impl Provider {
    /// Reject model names that cannot belong to this provider family.
    pub fn validate_model_name(&self, model: &str) -> NiahResult<()> {
        if model.trim().is_empty() {
            return Err(NiahError::Config("model name must be provided".into()));
        }
        if *self == Self::Anthropic && !model.contains("claude") {
            return Err(NiahError::Config(format!(
                "anthropic model names must include 'claude', got '{model}'"
            )));
        }
        Ok(())
    }

    /// Credential environment variable, if the provider needs one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Qwen => None,
        }
    }
}

/// Builds the provider-specific prompt around an assembled context.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub provider: Provider,
    pub retrieval_question: String,
    pub further_instruct: Option<String>,
    pub question_at_beginning: bool,
    pub anthropic_template: String,
}

impl PromptBuilder {
    pub fn new(provider: Provider, retrieval_question: impl Into<String>) -> Self {
        Self {
            provider,
            retrieval_question: retrieval_question.into(),
            further_instruct: None,
            question_at_beginning: false,
            anthropic_template: ANTHROPIC_TEMPLATE.to_string(),
        }
    }

    pub fn with_instruction(mut self, further_instruct: Option<String>) -> Self {
        self.further_instruct = further_instruct.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_question_at_beginning(mut self, yes: bool) -> Self {
        self.question_at_beginning = yes;
        self
    }

    pub fn with_anthropic_template(mut self, template: String) -> Self {
        self.anthropic_template = template;
        self
    }

    fn instruction(&self) -> &str {
        self.further_instruct.as_deref().unwrap_or(DEFAULT_INSTRUCTION)
    }

    pub fn build(&self, context: &str) -> Prompt {
        let question = format!("{} {}", self.retrieval_question, self.instruction());
        match self.provider {
            Provider::OpenAi => Prompt::Messages(vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(context),
                ChatMessage::user(question),
            ]),
            Provider::Anthropic => Prompt::Text(
                self.anthropic_template
                    .replace("{retrieval_question}", &self.retrieval_question)
                    .replace("{context}", context),
            ),
            Provider::Qwen if self.question_at_beginning => Prompt::Text(format!(
                "{}\n\n{context}\n\n{question}",
                self.retrieval_question
            )),
            Provider::Qwen => Prompt::Text(format!("{context}\n\n{question}")),
        }
    }
}
