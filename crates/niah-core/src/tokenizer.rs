use crate::error::{NiahError, NiahResult};

/// Model-specific text <-> token id conversion.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> NiahResult<Vec<u32>>;
    fn decode(&self, tokens: &[u32]) -> NiahResult<String>;

    /// Decode at most `limit` leading tokens (all of them when `None`).
    fn decode_limited(&self, tokens: &[u32], limit: Option<usize>) -> NiahResult<String> {
        let end = limit.map_or(tokens.len(), |l| l.min(tokens.len()));
        self.decode(&tokens[..end])
    }

    fn count(&self, text: &str) -> NiahResult<usize> {
        Ok(self.encode(text)?.len())
    }
}

/// One token per Unicode scalar value.
///
/// Lossless for any input. Token counts roughly track CJK tokenizers, and
/// overestimate for English text, which keeps budgets conservative.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> NiahResult<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> NiahResult<String> {
        tokens
            .iter()
            .map(|&t| {
                char::from_u32(t)
                    .ok_or_else(|| NiahError::Tokenizer(format!("invalid char token: {t}")))
            })
            .collect()
    }

    fn count(&self, text: &str) -> NiahResult<usize> {
        Ok(text.chars().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_mixed_text() {
        let tok = CharTokenizer;
        let text = "Paul Graham wrote essays. 在北京，最快乐的事情是什么？ done.";
        let ids = tok.encode(text).unwrap();
        assert_eq!(tok.decode(&ids).unwrap(), text);
        assert_eq!(tok.count(text).unwrap(), ids.len());
    }

    #[test]
    fn test_decode_limited() {
        let tok = CharTokenizer;
        let ids = tok.encode("abcdef").unwrap();
        assert_eq!(tok.decode_limited(&ids, Some(3)).unwrap(), "abc");
        assert_eq!(tok.decode_limited(&ids, Some(99)).unwrap(), "abcdef");
        assert_eq!(tok.decode_limited(&ids, None).unwrap(), "abcdef");
    }

    #[test]
    fn test_decode_rejects_surrogate() {
        let tok = CharTokenizer;
        assert!(tok.decode(&[0xD800]).is_err());
    }
}
