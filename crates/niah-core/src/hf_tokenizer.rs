use std::path::Path;

use tokenizers::Tokenizer as InnerTokenizer;

use crate::error::{NiahError, NiahResult};
use crate::tokenizer::Tokenizer;

/// Hugging Face `tokenizer.json` loaded through the `tokenizers` crate.
pub struct HfTokenizer {
    inner: InnerTokenizer,
}

impl HfTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> NiahResult<Self> {
        let path = path.as_ref();
        let inner = InnerTokenizer::from_file(path).map_err(|e| {
            NiahError::Tokenizer(format!("cannot load {}: {e}", path.display()))
        })?;
        Ok(Self { inner })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> NiahResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| NiahError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> NiahResult<String> {
        self.inner
            .decode(tokens, false)
            .map_err(|e| NiahError::Tokenizer(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::context::ContextAssembler;

    // Word-level vocabulary split on whitespace and punctuation, decoded by
    // joining tokens with single spaces.
    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {
            "type": "Sequence",
            "pretokenizers": [
                {"type": "WhitespaceSplit"},
                {"type": "Punctuation", "behavior": "Isolated"}
            ]
        },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "[UNK]": 0, "the": 1, "cat": 2, "sat": 3, "on": 4, "mat": 5,
                "dog": 6, "ran": 7, ".": 8, "，": 9, "。": 10, "？": 11
            },
            "unk_token": "[UNK]"
        }
    }"#;

    fn word_tokenizer() -> (tempfile::TempDir, HfTokenizer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, TOKENIZER_JSON).unwrap();
        let tok = HfTokenizer::from_file(&path).unwrap();
        (dir, tok)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, tok) = word_tokenizer();
        assert_eq!(tok.vocab_size(), 12);

        let text = "the cat sat on the mat . the dog ran .";
        let ids = tok.encode(text).unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4, 1, 5, 8, 1, 6, 7, 8]);
        assert_eq!(tok.decode(&ids).unwrap(), text);
        assert_eq!(tok.decode_limited(&ids, Some(3)).unwrap(), "the cat sat");
    }

    #[test]
    fn test_terminators_encode_separately() {
        let (_dir, tok) = word_tokenizer();
        assert_eq!(tok.encode(".，。？").unwrap(), vec![8, 9, 10, 11]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            HfTokenizer::from_file("/nonexistent/tokenizer.json"),
            Err(NiahError::Tokenizer(_))
        ));
    }

    #[test]
    fn test_assembler_budget_and_alignment() {
        let (_dir, tok) = word_tokenizer();
        let corpus = "the cat sat on the mat . ".repeat(50);
        let needle = "the dog ran .";
        let asm = ContextAssembler::new(Arc::new(tok), &corpus, needle, 10).unwrap();
        assert_eq!(asm.corpus_len(), 350);
        assert_eq!(asm.needle_len(), 4);

        let ctx = asm.assemble(60, 50.0).unwrap();
        // 46 haystack tokens plus the needle fill the 50-token budget.
        assert_eq!(ctx.token_count, 50);
        assert!(ctx.text.contains(needle));
        // Midpoint 23 moves back to just after the "." at index 20.
        assert_eq!(ctx.needle_offset, 21);
        assert_eq!(ctx.alignment_shift, 2);
        assert!(ctx.text.contains("mat . the dog ran . the cat"));

        for depth in [0.0, 25.0, 100.0] {
            let ctx = asm.assemble(60, depth).unwrap();
            assert!(ctx.token_count <= 50);
            assert!(ctx.text.contains(needle));
        }
    }
}
