//! Response scoring.
//!
//! Every scorer maps a model response onto an integer in `0..=10`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::NiahResult;

pub const MAX_SCORE: u8 = 10;

pub trait Scorer: Send + Sync {
    fn score(&self, response: &str, needle: &str, question: &str) -> NiahResult<u8>;
}

/// How text is split into comparable tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segmentation {
    /// Whitespace words, ASCII punctuation and English articles removed.
    #[default]
    Whitespace,
    /// CJK characters as single tokens, alphanumeric runs as words.
    Cjk,
}

/// Bag-of-tokens F1 between response and needle.
#[derive(Debug, Clone, Copy, Default)]
pub struct F1Scorer {
    segmentation: Segmentation,
}

impl F1Scorer {
    pub fn whitespace() -> Self {
        Self {
            segmentation: Segmentation::Whitespace,
        }
    }

    pub fn segmented() -> Self {
        Self {
            segmentation: Segmentation::Cjk,
        }
    }

    pub fn tokens(&self, text: &str) -> Vec<String> {
        match self.segmentation {
            Segmentation::Whitespace => whitespace_tokens(text),
            Segmentation::Cjk => cjk_tokens(text),
        }
    }

    /// F1 in `[0, 1]`.
    pub fn f1(&self, response: &str, needle: &str) -> f64 {
        f1_overlap(&self.tokens(response), &self.tokens(needle))
    }
}

impl Scorer for F1Scorer {
    fn score(&self, response: &str, needle: &str, _question: &str) -> NiahResult<u8> {
        let scaled = (self.f1(response, needle) * f64::from(MAX_SCORE)).round();
        Ok(scaled.clamp(0.0, f64::from(MAX_SCORE)) as u8)
    }
}

pub fn f1_overlap(prediction: &[String], reference: &[String]) -> f64 {
    if prediction.is_empty() || reference.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tok in reference {
        *counts.entry(tok.as_str()).or_default() += 1;
    }
    let mut common = 0usize;
    for tok in prediction {
        if let Some(n) = counts.get_mut(tok.as_str()) {
            if *n > 0 {
                *n -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / prediction.len() as f64;
    let recall = common as f64 / reference.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

fn whitespace_tokens(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    stripped
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .map(str::to_string)
        .collect()
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

fn cjk_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.to_lowercase().chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.push(c);
        } else if !word.is_empty() {
            // Whitespace and punctuation, ASCII or full-width, end a word.
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}
