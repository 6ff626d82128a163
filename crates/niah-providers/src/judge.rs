//! Model-as-judge scoring.

use std::sync::Arc;

use tracing::debug;

use niah_core::scorer::MAX_SCORE;
use niah_core::{ChatMessage, ModelWorker, NiahError, NiahResult, Prompt, Scorer};

/// Accuracy bands the judge maps its rating onto.
pub const JUDGE_RUBRIC: &str = "\
Score 1: The answer is completely unrelated to the reference.
Score 3: The answer has minor relevance but does not align with the reference.
Score 5: The answer has moderate relevance but contains inaccuracies.
Score 7: The answer aligns with the reference but has minor omissions.
Score 10: The answer is completely accurate and aligns perfectly with the reference.
Only respond with a numerical score";

const JUDGE_SYSTEM: &str = "You are a helpful assistant. Please act as an impartial judge and \
evaluate the quality of the response provided by an AI assistant to the user question displayed \
below, comparing it against the reference answer.";

/// Delegates scoring to an instruction-following model.
pub struct JudgeScorer {
    judge: Arc<dyn ModelWorker>,
}

impl JudgeScorer {
    pub fn new(judge: Arc<dyn ModelWorker>) -> Self {
        Self { judge }
    }

    fn prompt(&self, response: &str, needle: &str, question: &str) -> Prompt {
        Prompt::Messages(vec![
            ChatMessage::system(JUDGE_SYSTEM),
            ChatMessage::user(format!(
                "[Criteria]\n{JUDGE_RUBRIC}\n\n\
                 [Question]\n{question}\n\n\
                 [Reference]\n{}\n\n\
                 [Answer]\n{}\n\n\
                 Rate the answer strictly following this format: \"Rating: [[score]]\".",
                needle.trim(),
                response.trim()
            )),
        ])
    }
}

impl Scorer for JudgeScorer {
    fn score(&self, response: &str, needle: &str, question: &str) -> NiahResult<u8> {
        let reply = self
            .judge
            .complete(&self.prompt(response, needle, question))
            .map_err(|e| NiahError::Scoring(format!("judge call failed: {e}")))?;
        debug!(reply = %reply, "judge reply");
        parse_rating(&reply)
            .ok_or_else(|| NiahError::Scoring(format!("judge reply has no rating: {reply}")))
    }
}

/// Extract the rating from a judge reply, preferring `[[n]]`, else the first
/// integer. Values above the scale are clamped.
pub fn parse_rating(reply: &str) -> Option<u8> {
    let bracketed = reply.find("[[").and_then(|start| {
        let rest = &reply[start + 2..];
        rest.find("]]").and_then(|end| first_integer(&rest[..end]))
    });
    bracketed
        .or_else(|| first_integer(reply))
        .map(|n| n.min(u64::from(MAX_SCORE)) as u8)
}

fn first_integer(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedJudge {
        reply: NiahResult<String>,
        seen: Mutex<Vec<Prompt>>,
    }

    impl CannedJudge {
        fn new(reply: NiahResult<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl ModelWorker for CannedJudge {
        fn name(&self) -> &str {
            "canned"
        }

        fn complete(&self, prompt: &Prompt) -> NiahResult<String> {
            self.seen.lock().unwrap().push(prompt.clone());
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(NiahError::Inference(e.to_string())),
            }
        }
    }

    #[test]
    fn test_parse_rating_variants() {
        assert_eq!(parse_rating("Rating: [[7]]"), Some(7));
        assert_eq!(parse_rating("Score 1 of rubric... Rating: [[10]]"), Some(10));
        assert_eq!(parse_rating("5"), Some(5));
        assert_eq!(parse_rating("I'd say 3/10"), Some(3));
        assert_eq!(parse_rating("[[42]]"), Some(10));
        assert_eq!(parse_rating("no idea"), None);
    }

    #[test]
    fn test_judge_scores_and_sees_reference() {
        let judge = CannedJudge::new(Ok("Rating: [[7]]".into()));
        let scorer = JudgeScorer::new(judge.clone());
        let score = scorer
            .score("Eat a sandwich.", "Eat a sandwich in Dolores Park.", "What to do?")
            .unwrap();
        assert_eq!(score, 7);

        let seen = judge.seen.lock().unwrap();
        let text = seen[0].to_text();
        assert!(text.contains("Dolores Park"));
        assert!(text.contains("What to do?"));
        assert!(text.contains("Score 10"));
    }

    #[test]
    fn test_judge_failures_are_scoring_errors() {
        let scorer = JudgeScorer::new(CannedJudge::new(Ok("cannot rate".into())));
        assert!(matches!(
            scorer.score("a", "b", "c"),
            Err(NiahError::Scoring(_))
        ));

        let scorer = JudgeScorer::new(CannedJudge::new(Err(NiahError::Inference("down".into()))));
        assert!(matches!(
            scorer.score("a", "b", "c"),
            Err(NiahError::Scoring(_))
        ));
    }
}
