pub mod context;
pub mod distribution;
pub mod error;
pub mod haystack;
#[cfg(feature = "hf-tokenizer")]
pub mod hf_tokenizer;
pub mod prompt;
pub mod scorer;
pub mod store;
pub mod tokenizer;
pub mod trial;
pub mod worker;

pub use context::{AssembledContext, ContextAssembler, DEFAULT_BUFFER, SENTENCE_TERMINATORS};
pub use distribution::{context_lengths, depth_percents, logistic, DepthSpacing};
pub use error::{NiahError, NiahResult};
pub use haystack::HaystackSource;
#[cfg(feature = "hf-tokenizer")]
pub use hf_tokenizer::HfTokenizer;
pub use prompt::{PromptBuilder, Provider, DEFAULT_INSTRUCTION};
pub use scorer::{F1Scorer, Scorer, Segmentation};
pub use store::ResultStore;
pub use tokenizer::{CharTokenizer, Tokenizer};
pub use trial::{ResultRecord, TrialKey, TrialSpec};
pub use worker::{ChatMessage, ModelWorker, Prompt, Role};
