//! Needle-bearing context assembly.
//!
//! The haystack is tokenized once per run. Each trial takes a token prefix
//! of it, trims that prefix so haystack + needle fit in
//! `context_length - buffer` tokens, and splices the needle in at the
//! requested depth, pulled back to the nearest preceding sentence end.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::{NiahError, NiahResult};
use crate::haystack::HaystackSource;
use crate::tokenizer::Tokenizer;

/// Tokens reserved for the system prompt, the question and the answer.
pub const DEFAULT_BUFFER: usize = 200;

/// Characters whose tokens count as a sentence end.
pub const SENTENCE_TERMINATORS: &str = ".，。？";

/// How far back the insertion point may move to reach a sentence end.
pub const MAX_ALIGNMENT_STEPS: usize = 100;

/// A context ready to be put in a prompt.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    /// Haystack + needle tokens.
    pub token_count: usize,
    /// Token index where the needle starts.
    pub needle_offset: usize,
    /// How many tokens the insertion point moved back to hit a sentence end.
    pub alignment_shift: usize,
}

pub struct ContextAssembler {
    tokenizer: Arc<dyn Tokenizer>,
    corpus_tokens: Vec<u32>,
    needle_tokens: Vec<u32>,
    terminators: HashSet<u32>,
    buffer: usize,
}

impl ContextAssembler {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        corpus: &str,
        needle: &str,
        buffer: usize,
    ) -> NiahResult<Self> {
        if needle.is_empty() {
            return Err(NiahError::Config("needle must not be empty".into()));
        }
        let corpus_tokens = tokenizer.encode(corpus)?;
        let needle_tokens = tokenizer.encode(needle)?;
        let terminators = tokenizer.encode(SENTENCE_TERMINATORS)?.into_iter().collect();
        debug!(
            corpus_tokens = corpus_tokens.len(),
            needle_tokens = needle_tokens.len(),
            "context assembler ready"
        );
        Ok(Self {
            tokenizer,
            corpus_tokens,
            needle_tokens,
            terminators,
            buffer,
        })
    }

    /// Load the haystack so it covers `max_context_length` and build an assembler.
    pub fn from_source(
        tokenizer: Arc<dyn Tokenizer>,
        source: &HaystackSource,
        max_context_length: usize,
        needle: &str,
        buffer: usize,
    ) -> NiahResult<Self> {
        let corpus = source.load(tokenizer.as_ref(), max_context_length)?;
        Self::new(tokenizer, &corpus, needle, buffer)
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus_tokens.len()
    }

    pub fn needle_len(&self) -> usize {
        self.needle_tokens.len()
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Build the context for one trial.
    pub fn assemble(&self, context_length: usize, depth_percent: f64) -> NiahResult<AssembledContext> {
        if context_length <= self.buffer {
            return Err(NiahError::Config(format!(
                "context length {context_length} does not exceed buffer {}",
                self.buffer
            )));
        }
        let effective = context_length - self.buffer;
        if self.needle_tokens.len() > effective {
            return Err(NiahError::Config(format!(
                "needle ({} tokens) does not fit in {effective} tokens",
                self.needle_tokens.len()
            )));
        }

        let mut haystack = &self.corpus_tokens[..context_length.min(self.corpus_tokens.len())];
        if haystack.len() + self.needle_tokens.len() > effective {
            haystack = &haystack[..effective - self.needle_tokens.len()];
        }

        let (tokens, needle_offset, alignment_shift) =
            insert_needle(haystack, &self.needle_tokens, depth_percent, &self.terminators);
        debug!(
            context_length,
            depth_percent, needle_offset, alignment_shift, "needle inserted"
        );

        Ok(AssembledContext {
            text: self.tokenizer.decode(&tokens)?,
            token_count: tokens.len(),
            needle_offset,
            alignment_shift,
        })
    }
}

/// Splice `needle` into `haystack` at `depth_percent`.
///
/// Returns the new token sequence, the needle's start offset and the number
/// of tokens the insertion point moved back. When no terminator precedes the
/// point within [`MAX_ALIGNMENT_STEPS`], the unshifted point is used.
pub fn insert_needle(
    haystack: &[u32],
    needle: &[u32],
    depth_percent: f64,
    terminators: &HashSet<u32>,
) -> (Vec<u32>, usize, usize) {
    let mut out = Vec::with_capacity(haystack.len() + needle.len());

    if depth_percent >= 100.0 {
        out.extend_from_slice(haystack);
        out.extend_from_slice(needle);
        return (out, haystack.len(), 0);
    }

    let target = ((haystack.len() as f64 * (depth_percent.max(0.0) / 100.0)).floor() as usize)
        .min(haystack.len());
    let mut point = target;
    let mut steps = 0;
    while point > 0 && !terminators.contains(&haystack[point - 1]) && steps < MAX_ALIGNMENT_STEPS {
        point -= 1;
        steps += 1;
    }
    if point > 0 && !terminators.contains(&haystack[point - 1]) {
        point = target;
    }

    out.extend_from_slice(&haystack[..point]);
    out.extend_from_slice(needle);
    out.extend_from_slice(&haystack[point..]);
    (out, point, target - point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;

    const NEEDLE: &str = "The secret code is 42.";
    const FILLER: &str = "The quick brown fox jumps over the lazy dog. ";

    fn filler(tokens: usize) -> String {
        FILLER.repeat(tokens / FILLER.len() + 1)
    }

    fn assembler(corpus: &str, needle: &str, buffer: usize) -> ContextAssembler {
        ContextAssembler::new(Arc::new(CharTokenizer), corpus, needle, buffer).unwrap()
    }

    #[test]
    fn test_midpoint_scenario() {
        let asm = assembler(&filler(5000), NEEDLE, DEFAULT_BUFFER);
        let ctx = asm.assemble(2000, 50.0).unwrap();

        assert!(ctx.token_count <= 1800);
        assert!(ctx.text.contains(NEEDLE));

        let haystack_tokens = ctx.token_count - asm.needle_len();
        let target = haystack_tokens / 2;
        assert!(ctx.needle_offset <= target);
        assert!(target - ctx.needle_offset <= MAX_ALIGNMENT_STEPS);
        assert_eq!(ctx.alignment_shift, target - ctx.needle_offset);

        // Needle sits right after a sentence end.
        let before: String = ctx.text.chars().take(ctx.needle_offset).collect();
        assert!(before.ends_with('.'));
    }

    #[test]
    fn test_depth_zero_starts_with_needle() {
        let asm = assembler(&filler(3000), NEEDLE, DEFAULT_BUFFER);
        let ctx = asm.assemble(1000, 0.0).unwrap();
        assert!(ctx.text.starts_with(NEEDLE));
        assert_eq!(ctx.needle_offset, 0);
    }

    #[test]
    fn test_depth_hundred_ends_with_needle() {
        let asm = assembler(&filler(3000), NEEDLE, DEFAULT_BUFFER);
        let ctx = asm.assemble(1000, 100.0).unwrap();
        assert!(ctx.text.ends_with(NEEDLE));
        assert_eq!(ctx.token_count, 800);
    }

    #[test]
    fn test_budget_and_containment_across_grid() {
        let asm = assembler(&filler(10_000), NEEDLE, DEFAULT_BUFFER);
        for length in [300, 512, 1000, 4096, 9000] {
            for depth in [0.0, 1.799, 10.0, 33.0, 50.0, 73.106, 99.0, 100.0] {
                let ctx = asm.assemble(length, depth).unwrap();
                assert!(ctx.token_count <= length - DEFAULT_BUFFER);
                assert!(ctx.text.contains(NEEDLE), "len={length} depth={depth}");
                assert_eq!(ctx.text.chars().count(), ctx.token_count);
            }
        }
    }

    #[test]
    fn test_short_corpus_is_not_padded() {
        let asm = assembler("One. Two. Three. ", NEEDLE, 10);
        let ctx = asm.assemble(1000, 50.0).unwrap();
        assert_eq!(ctx.token_count, 17 + NEEDLE.len());
        assert!(ctx.text.contains(NEEDLE));
    }

    #[test]
    fn test_no_terminator_keeps_target_point() {
        let corpus = "abcdefghij".repeat(100);
        let asm = assembler(&corpus, "XYZ", 0);
        let ctx = asm.assemble(1003, 50.0).unwrap();
        assert_eq!(ctx.needle_offset, 500);
        assert_eq!(ctx.alignment_shift, 0);
        assert_eq!(&ctx.text[500..503], "XYZ");
    }

    #[test]
    fn test_chinese_terminators() {
        let corpus = "今天天气很好，我们去公园散步吧".repeat(20);
        let asm = assembler(&corpus, "王莽在刘秀手下工作。", 0);
        let ctx = asm.assemble(200, 50.0).unwrap();
        let before: String = ctx.text.chars().take(ctx.needle_offset).collect();
        assert!(before.ends_with('，'));
    }

    #[test]
    fn test_context_not_above_buffer_fails() {
        let asm = assembler(&filler(1000), NEEDLE, DEFAULT_BUFFER);
        assert!(matches!(
            asm.assemble(200, 50.0),
            Err(NiahError::Config(_))
        ));
        assert!(asm.assemble(210, 50.0).is_err());
    }

    #[test]
    fn test_insert_needle_reaches_start() {
        let terminators: HashSet<u32> = [46].into_iter().collect();
        let (tokens, offset, shift) = insert_needle(&[1, 2, 3, 4], &[9], 75.0, &terminators);
        assert_eq!(tokens, vec![9, 1, 2, 3, 4]);
        assert_eq!(offset, 0);
        assert_eq!(shift, 3);
    }

    #[test]
    fn test_from_source_covers_max_length() {
        let source = HaystackSource::Blocks(vec![filler(600), filler(600), filler(600)]);
        let asm = ContextAssembler::from_source(Arc::new(CharTokenizer), &source, 1000, NEEDLE, 0)
            .unwrap();
        assert!(asm.corpus_len() > 1000);
    }
}
