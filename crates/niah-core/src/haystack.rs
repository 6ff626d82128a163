//! Haystack corpus loading.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{NiahError, NiahResult};
use crate::tokenizer::Tokenizer;

/// Where filler text comes from.
#[derive(Debug, Clone)]
pub enum HaystackSource {
    /// Every `*.txt` file in a directory, re-read in name order until long enough.
    Directory(PathBuf),
    /// JSON lines, one `{"content": "..."}` object per line.
    JsonLines(PathBuf),
    /// Text blocks already in memory, used in order.
    Blocks(Vec<String>),
}

#[derive(Deserialize)]
struct ContentLine {
    content: String,
}

impl HaystackSource {
    /// Pick a source from a path: directories are scanned for `.txt` files,
    /// anything else is read as JSON lines.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::Directory(path)
        } else {
            Self::JsonLines(path)
        }
    }

    /// Concatenate source text until it holds more than `min_tokens` tokens.
    ///
    /// Block and JSON-lines sources are used at most once; if they run out
    /// first the shorter corpus is returned. Directory sources cycle.
    pub fn load(&self, tokenizer: &dyn Tokenizer, min_tokens: usize) -> NiahResult<String> {
        match self {
            Self::Directory(dir) => load_directory(dir, tokenizer, min_tokens),
            Self::JsonLines(path) => {
                let blocks = read_json_lines(path)?;
                concat_blocks(&blocks, tokenizer, min_tokens)
            }
            Self::Blocks(blocks) => concat_blocks(blocks, tokenizer, min_tokens),
        }
    }
}

fn concat_blocks(
    blocks: &[String],
    tokenizer: &dyn Tokenizer,
    min_tokens: usize,
) -> NiahResult<String> {
    let mut text = String::new();
    let mut tokens = 0;
    for block in blocks {
        text.push_str(block);
        tokens += tokenizer.count(block)?;
        if tokens > min_tokens {
            break;
        }
    }
    if text.is_empty() {
        return Err(NiahError::Config("haystack has no text".into()));
    }
    debug!(tokens, "haystack loaded from blocks");
    Ok(text)
}

fn load_directory(dir: &Path, tokenizer: &dyn Tokenizer, min_tokens: usize) -> NiahResult<String> {
    let files = list_text_files(dir)?;
    if files.is_empty() {
        return Err(NiahError::Config(format!(
            "no .txt files in haystack directory {}",
            dir.display()
        )));
    }

    let contents = files
        .iter()
        .map(std::fs::read_to_string)
        .collect::<Result<Vec<_>, _>>()?;
    let pass_tokens: usize = contents
        .iter()
        .map(|c| tokenizer.count(c))
        .sum::<NiahResult<usize>>()?;
    if pass_tokens == 0 {
        return Err(NiahError::Config(format!(
            "haystack directory {} contains only empty files",
            dir.display()
        )));
    }

    let mut text = String::new();
    let mut tokens = 0;
    while tokens < min_tokens {
        for content in &contents {
            text.push_str(content);
        }
        tokens += pass_tokens;
    }
    debug!(tokens, files = files.len(), "haystack loaded from directory");
    Ok(text)
}

fn list_text_files(dir: &Path) -> NiahResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    files.sort();
    Ok(files)
}

/// Read the `content` field of each non-empty line.
pub fn read_json_lines(path: &Path) -> NiahResult<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str::<ContentLine>(l)
                .map(|c| c.content)
                .map_err(NiahError::from)
        })
        .collect()
}
